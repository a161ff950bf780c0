pub mod activity;
pub mod model;
pub mod project;
pub mod submission;

pub use activity::{ActivityAction, ActivityEvent, Actor, Target};
pub use model::{ReviewId, Role, TaskId, UserId, Worker};
pub use project::{NewProjectTask, ProjectRevision, ProjectStatus, ProjectTask, Slot};
pub use submission::{NewSubmission, Review, Submission, SubmissionStatus};
