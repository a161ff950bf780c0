//! Outbound status-change notifications.
//!
//! Delivery is best effort. The engine logs and ignores notifier failures.

use async_trait::async_trait;
use crowdreview_core::{ProjectStatus, TaskId};
use thiserror::Error;
use tokio::sync::broadcast;

/// A project task changed status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub task_id: TaskId,
    pub from: ProjectStatus,
    pub to: ProjectStatus,
}

#[derive(Debug, Error)]
#[error("notification failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn broadcast_status_change(&self, change: StatusChange) -> Result<(), NotifyError>;
}

/// Drops every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn broadcast_status_change(&self, _change: StatusChange) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// In-process fan-out. Transport layers subscribe and forward to clients.
pub struct BroadcastNotifier {
    sender: broadcast::Sender<StatusChange>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusChange> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn broadcast_status_change(&self, change: StatusChange) -> Result<(), NotifyError> {
        // No subscribers is normal when nobody is watching.
        let _ = self.sender.send(change);
        Ok(())
    }
}
