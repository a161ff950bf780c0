//! Simple submission workflow: create, claim, feedback, approve, delete.

use chrono::Utc;
use crowdreview_core::{
    ActivityAction, ActivityEvent, Actor, NewSubmission, Review, ReviewId, Role, Submission,
    TaskId, Target, UserId,
};
use serde_json::json;
use tracing::{info, warn};

use super::{single, Engine};
use crate::error::{EngineError, Result};
use crate::state_machine::submission::{transition, SubmissionCommand};

impl Engine {
    /// Store a new submission and, if enabled, hand it to the least-loaded
    /// reviewer straight away.
    ///
    /// The returned record reflects the state after auto-assignment.
    pub async fn create_submission(
        &self,
        contributor: UserId,
        payload: NewSubmission,
    ) -> Result<Submission> {
        let submission = self
            .repo
            .insert_submission(Submission::new(contributor, payload))
            .await?;
        info!("Created submission {} ({})", submission.id, submission.title);

        self.record(
            ActivityEvent::new(
                ActivityAction::SubmissionCreated,
                Actor::user(contributor, Role::Contributor),
                format!("Task \"{}\" submitted", submission.title),
            )
            .with_target(Target::Submission(submission.id))
            .with_metadata(json!({
                "domain": submission.domain,
                "language": submission.language,
            })),
        )
        .await;

        if !self.config.auto_assign {
            return Ok(submission);
        }
        // The insert is committed; a failed assignment leaves the task queued.
        match self.assign(submission.id).await {
            Ok(None) => Ok(submission),
            Ok(Some(_)) => Ok(self
                .require_submission(submission.id)
                .await
                .unwrap_or(submission)),
            Err(e) => {
                warn!(
                    "Auto-assign of submission {} failed, leaving it queued: {}",
                    submission.id, e
                );
                Ok(submission)
            }
        }
    }

    /// Admin force-binds a task to themselves.
    pub async fn claim(&self, id: TaskId, admin: UserId) -> Result<Submission> {
        let actor = self.require_worker(admin).await?;
        let role = actor.role;
        let claimed = self
            .retrying("claim", || async move {
                let submission = self.require_submission(id).await?;
                let next = transition(
                    &submission,
                    &SubmissionCommand::Claim {
                        admin,
                        role,
                        at: Utc::now(),
                    },
                )?;
                single(self.repo.save_submissions(vec![next]).await?, "claim")
            })
            .await?;

        info!("Submission {} claimed by {}", id, actor.name);
        self.record(
            ActivityEvent::new(
                ActivityAction::ManualClaim,
                Actor::user(admin, actor.role),
                format!("Task \"{}\" claimed by {}", claimed.title, actor.name),
            )
            .with_target(Target::Submission(id)),
        )
        .await;
        Ok(claimed)
    }

    /// Leave feedback on a submission, optionally recommending approval.
    ///
    /// The review and the status change are written together.
    pub async fn submit_feedback(
        &self,
        id: TaskId,
        reviewer: UserId,
        feedback: &str,
        mark_eligible: bool,
        account_posted_in: Option<String>,
    ) -> Result<Submission> {
        let feedback = feedback.trim();
        if feedback.is_empty() {
            let current = self.require_submission(id).await?.status;
            return Err(EngineError::precondition(
                current.as_str(),
                "feedback must not be empty",
            ));
        }
        let actor = self.require_worker(reviewer).await?;
        let account_posted_in = account_posted_in
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty());

        let role = actor.role;
        let saved = self
            .retrying("submit feedback", || {
                let account_posted_in = account_posted_in.clone();
                async move {
                    let submission = self.require_submission(id).await?;
                    let next = transition(
                        &submission,
                        &SubmissionCommand::Feedback {
                            reviewer,
                            role,
                            mark_eligible,
                        },
                    )?;
                    let review = Review {
                        id: ReviewId::new(),
                        submission_id: id,
                        reviewer_id: reviewer,
                        feedback: feedback.to_string(),
                        account_posted_in,
                        created_at: Utc::now(),
                    };
                    Ok(self.repo.commit_feedback(review, next).await?)
                }
            })
            .await?;

        info!(
            "Feedback on submission {} by {} (status {})",
            id, actor.name, saved.status
        );
        self.record(
            ActivityEvent::new(
                ActivityAction::Review,
                Actor::user(reviewer, actor.role),
                format!("{} reviewed \"{}\"", actor.name, saved.title),
            )
            .with_target(Target::Submission(id))
            .with_metadata(json!({
                "markEligible": mark_eligible,
                "status": saved.status,
                "accountPostedIn": account_posted_in,
            })),
        )
        .await;
        Ok(saved)
    }

    /// Admin approval of an eligible submission.
    pub async fn approve(&self, id: TaskId, admin: UserId) -> Result<Submission> {
        let actor = self.require_worker(admin).await?;
        let role = actor.role;
        let approved = self
            .retrying("approve", || async move {
                let submission = self.require_submission(id).await?;
                let next = transition(&submission, &SubmissionCommand::Approve { role })?;
                single(self.repo.save_submissions(vec![next]).await?, "approve")
            })
            .await?;

        info!("Submission {} approved by {}", id, actor.name);
        self.record(
            ActivityEvent::new(
                ActivityAction::Approve,
                Actor::user(admin, actor.role),
                format!("Task \"{}\" approved", approved.title),
            )
            .with_target(Target::Submission(id)),
        )
        .await;
        Ok(approved)
    }

    /// Delete a submission and its reviews. Only the contributor who
    /// created it or an admin may do this.
    pub async fn delete_submission(&self, id: TaskId, actor: Actor) -> Result<()> {
        let submission = self.require_submission(id).await?;
        let allowed = match &actor {
            Actor::User { role: Role::Admin, .. } => true,
            Actor::User { id: user, .. } => *user == submission.contributor_id,
            Actor::System => false,
        };
        if !allowed {
            return Err(EngineError::precondition(
                submission.status.as_str(),
                format!("{} may not delete this submission", actor.role_name()),
            ));
        }

        if !self.repo.delete_submission(id).await? {
            return Err(EngineError::not_found(format!("submission {}", id)));
        }
        info!("Deleted submission {}", id);
        self.record(
            ActivityEvent::new(
                ActivityAction::Delete,
                actor,
                format!("Task \"{}\" deleted", submission.title),
            )
            .with_target(Target::Submission(id))
            .with_metadata(json!({ "status": submission.status })),
        )
        .await;
        Ok(())
    }

    /// Reviews left on a submission, oldest first.
    pub async fn list_reviews(&self, id: TaskId) -> Result<Vec<Review>> {
        Ok(self.repo.list_reviews(id).await?)
    }
}
