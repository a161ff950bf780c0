pub mod allocation;
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod notifier;
pub mod repository;
pub mod state_machine;

pub use config::{Config, EngineConfig};
pub use directory::{Pool, WorkerDirectory};
pub use engine::{AvailabilityChange, Engine, Workload};
pub use error::{EngineError, Result};
pub use notifier::{BroadcastNotifier, NoopNotifier, Notifier, StatusChange};
pub use repository::{
    ActivityLog, InMemoryRepository, RemovedWork, Repository, RepositoryError, SqliteRepository,
};
pub use state_machine::project::{TransitionExtra, TransitionRequest};
pub use state_machine::{Effect, TransitionError};
