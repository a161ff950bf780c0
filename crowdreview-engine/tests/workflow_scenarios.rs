//! End-to-end scenarios through the public engine API.

use std::sync::Arc;

use crowdreview_core::{
    Actor, NewProjectTask, NewSubmission, ProjectRevision, ProjectStatus, Role, Slot,
    SubmissionStatus, UserId, Worker,
};
use crowdreview_engine::{
    Engine, EngineConfig, EngineError, NoopNotifier, Pool, SqliteRepository, TransitionExtra,
};

fn admin() -> Actor {
    Actor::user(UserId::new(), Role::Admin)
}

async fn ready(engine: &Engine, name: &str, role: Role) -> Worker {
    let worker = engine.register_worker(name, role).await.unwrap();
    engine.approve_worker(worker.id, admin()).await.unwrap();
    engine.set_availability(worker.id, true).await.unwrap().worker
}

fn sqlite_engine() -> Engine {
    Engine::with_store(
        Arc::new(SqliteRepository::new_in_memory().unwrap()),
        Arc::new(NoopNotifier),
        EngineConfig::default(),
    )
}

#[tokio::test]
async fn five_project_tasks_over_three_testers() {
    let engine = Engine::in_memory();
    let testers = vec![
        ready(&engine, "T1", Role::Tester).await,
        ready(&engine, "T2", Role::Tester).await,
        ready(&engine, "T3", Role::Tester).await,
    ];

    let mut picked = Vec::new();
    for _ in 0..5 {
        let task = engine
            .create_project_task(UserId::new(), NewProjectTask::default())
            .await
            .unwrap();
        assert_eq!(task.status, ProjectStatus::InTesting);
        picked.push(task.tester_id.unwrap());
    }

    let ids: Vec<_> = testers.iter().map(|t| t.id).collect();
    assert_eq!(
        picked,
        vec![ids[0], ids[1], ids[2], ids[0], ids[1]],
        "ties go to the earliest registered tester"
    );

    let mut loads = Vec::new();
    for tester in &testers {
        loads.push(
            engine
                .directory()
                .current_load(tester.id, Pool::ProjectTester)
                .await
                .unwrap(),
        );
    }
    assert_eq!(loads, vec![2, 2, 1]);
}

#[tokio::test]
async fn deleting_an_unavailable_worker_requeues_their_tasks() {
    let engine = sqlite_engine();
    let rae = ready(&engine, "Rae", Role::Reviewer).await;
    let mut created = Vec::new();
    for _ in 0..2 {
        created.push(
            engine
                .create_submission(UserId::new(), NewSubmission::default())
                .await
                .unwrap(),
        );
    }
    assert!(created.iter().all(|s| s.claimed_by == Some(rae.id)));
    engine.set_availability(rae.id, false).await.unwrap();

    engine.delete_worker(rae.id, admin()).await.unwrap();

    for submission in created {
        let after = engine
            .repository()
            .get_submission(submission.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.status, SubmissionStatus::Pending);
        assert!(after.claimed_by.is_none());
    }
}

#[tokio::test]
async fn changes_requested_round_trip_keeps_reviewer() {
    let engine = sqlite_engine();
    let contributor = engine
        .register_worker("Cody", Role::Contributor)
        .await
        .unwrap()
        .id;
    let tester = ready(&engine, "Tess", Role::Tester).await;
    let reviewer = ready(&engine, "Rae", Role::Reviewer).await;
    let boss = engine.register_worker("Boss", Role::Admin).await.unwrap();

    let task = engine
        .create_project_task(contributor, NewProjectTask::default())
        .await
        .unwrap();
    assert_eq!(task.tester_id, Some(tester.id));

    engine
        .transition_project(
            task.id,
            ProjectStatus::EligibleForManualReview,
            Actor::user(tester.id, Role::Tester),
            TransitionExtra {
                task_link: Some("https://platform.example/t/9".to_string()),
                ..TransitionExtra::default()
            },
        )
        .await
        .unwrap();

    let requested = engine
        .transition_project(
            task.id,
            ProjectStatus::ChangesRequested,
            Actor::user(reviewer.id, Role::Reviewer),
            TransitionExtra {
                feedback: Some("fix X".to_string()),
                ..TransitionExtra::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(requested.reviewer_feedback.as_deref(), Some("fix X"));
    assert!(requested.has_changes_requested);

    let resubmitted = engine
        .transition_project(
            task.id,
            ProjectStatus::InTesting,
            Actor::user(contributor, Role::Contributor),
            TransitionExtra {
                revision: Some(ProjectRevision {
                    title: Some("Parser with X fixed".to_string()),
                    github_repo: Some("https://github.com/cody/parser".to_string()),
                    ..ProjectRevision::default()
                }),
                ..TransitionExtra::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(resubmitted.status, ProjectStatus::InTesting);
    assert_eq!(resubmitted.title, "Parser with X fixed");
    assert_eq!(resubmitted.github_repo, "https://github.com/cody/parser");
    assert!(resubmitted.changes_done);
    assert_eq!(resubmitted.reviewer_id, Some(reviewer.id));
    assert_eq!(resubmitted.tester_id, Some(tester.id));

    for (to, actor) in [
        (ProjectStatus::ChangesDone, Actor::user(tester.id, Role::Tester)),
        (ProjectStatus::FinalChecks, Actor::user(reviewer.id, Role::Reviewer)),
        (ProjectStatus::Approved, Actor::user(boss.id, Role::Admin)),
    ] {
        engine
            .transition_project(task.id, to, actor, TransitionExtra::default())
            .await
            .unwrap();
    }
    let done = engine
        .repository()
        .get_project_task(task.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, ProjectStatus::Approved);
}

#[tokio::test]
async fn approval_needs_an_eligible_task_and_an_admin() {
    let engine = Engine::in_memory();
    let rae = ready(&engine, "Rae", Role::Reviewer).await;
    let boss = engine.register_worker("Boss", Role::Admin).await.unwrap();
    let submission = engine
        .create_submission(UserId::new(), NewSubmission::default())
        .await
        .unwrap();

    let err = engine.approve(submission.id, boss.id).await.unwrap_err();
    assert_eq!(err.current_status(), Some("CLAIMED"));

    engine
        .submit_feedback(submission.id, rae.id, "good", true, None)
        .await
        .unwrap();
    let err = engine.approve(submission.id, rae.id).await.unwrap_err();
    assert_eq!(err.current_status(), Some("ELIGIBLE"));

    let approved = engine.approve(submission.id, boss.id).await.unwrap();
    assert_eq!(approved.status, SubmissionStatus::Approved);
}

#[tokio::test]
async fn assign_queued_then_redistribute_is_fair_and_stable() {
    let engine = Engine::with_store(
        Arc::new(SqliteRepository::new_in_memory().unwrap()),
        Arc::new(NoopNotifier),
        EngineConfig {
            auto_assign: false,
            ..EngineConfig::default()
        },
    );
    for _ in 0..8 {
        engine
            .create_submission(UserId::new(), NewSubmission::default())
            .await
            .unwrap();
    }
    let reviewers = vec![
        ready(&engine, "A", Role::Reviewer).await,
        ready(&engine, "B", Role::Reviewer).await,
        ready(&engine, "C", Role::Reviewer).await,
    ];

    // Each green light rebalanced the open work across the reviewers online.
    let loads = |engine: &Engine| {
        let reviewers = reviewers.clone();
        let directory = engine.directory().clone();
        async move {
            let mut loads = Vec::new();
            for r in reviewers {
                loads.push(directory.current_load(r.id, Pool::Submission).await.unwrap());
            }
            loads
        }
    };
    assert_eq!(loads(&engine).await, vec![3, 3, 2]);

    assert_eq!(engine.redistribute_all().await.unwrap(), 8);
    assert_eq!(loads(&engine).await, vec![3, 3, 2]);
    assert_eq!(engine.assign_queued().await.unwrap(), 0);
}

#[tokio::test]
async fn concurrent_assigns_bind_a_task_once() {
    let engine = Engine::with_store(
        Arc::new(SqliteRepository::new_in_memory().unwrap()),
        Arc::new(NoopNotifier),
        EngineConfig {
            auto_assign: false,
            ..EngineConfig::default()
        },
    );
    ready(&engine, "A", Role::Reviewer).await;
    ready(&engine, "B", Role::Reviewer).await;
    let submission = engine
        .create_submission(UserId::new(), NewSubmission::default())
        .await
        .unwrap();

    let (first, second) = tokio::join!(engine.assign(submission.id), engine.assign(submission.id));
    let winners: Vec<_> = [first, second]
        .into_iter()
        .filter_map(|r| match r {
            Ok(Some(worker)) => Some(worker),
            Ok(None) => panic!("pool was not empty"),
            Err(EngineError::PreconditionFailed { current, .. }) => {
                assert_eq!(current, "CLAIMED");
                None
            }
            Err(e) => panic!("unexpected error: {e}"),
        })
        .collect();
    assert_eq!(winners.len(), 1);

    let stored = engine
        .repository()
        .get_submission(submission.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.claimed_by, Some(winners[0]));
}

#[tokio::test]
async fn reviewer_coming_online_fills_unreviewed_project_tasks() {
    let engine = Engine::in_memory();
    let tester = ready(&engine, "Tess", Role::Tester).await;
    let task = engine
        .create_project_task(UserId::new(), NewProjectTask::default())
        .await
        .unwrap();
    engine
        .transition_project(
            task.id,
            ProjectStatus::PendingReview,
            Actor::user(tester.id, Role::Tester),
            TransitionExtra::default(),
        )
        .await
        .unwrap();
    let waiting = engine
        .repository()
        .get_project_task(task.id)
        .await
        .unwrap()
        .unwrap();
    assert!(waiting.is_queued_for(Slot::Reviewer));

    let rae = ready(&engine, "Rae", Role::Reviewer).await;
    let workload = engine.workload(rae.id).await.unwrap();
    assert_eq!(workload.reviewing.len(), 1);
    assert_eq!(workload.reviewing[0].status, ProjectStatus::PendingReview);
}

#[tokio::test]
async fn promoting_a_reviewer_frees_their_review_slot() {
    let engine = sqlite_engine();
    let tester = ready(&engine, "Tess", Role::Tester).await;
    let reviewer = ready(&engine, "Rae", Role::Reviewer).await;
    let task = engine
        .create_project_task(UserId::new(), NewProjectTask::default())
        .await
        .unwrap();
    engine
        .transition_project(
            task.id,
            ProjectStatus::EligibleForManualReview,
            Actor::user(tester.id, Role::Tester),
            TransitionExtra {
                task_link: Some("https://platform.example/t/3".to_string()),
                ..TransitionExtra::default()
            },
        )
        .await
        .unwrap();
    let queued = engine
        .repository()
        .get_project_task(task.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(queued.reviewer_id, Some(reviewer.id));

    let promoted = engine
        .switch_role(reviewer.id, Role::Admin, admin())
        .await
        .unwrap();
    assert_eq!(promoted.role, Role::Admin);
    assert!(!promoted.available);

    let after = engine
        .repository()
        .get_project_task(task.id)
        .await
        .unwrap()
        .unwrap();
    assert!(after.reviewer_id.is_none());
    assert_eq!(after.tester_id, Some(tester.id));
    assert!(after.is_queued_for(Slot::Reviewer));
}
