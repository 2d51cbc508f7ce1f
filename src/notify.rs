//! Update notifications for UI subscribers.
//!
//! Publishing never blocks a sync handler. Each subscriber has a bounded
//! channel; when it is full the event is dropped for that subscriber and a
//! warning is logged. Subscribers whose receiver is gone are pruned.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

use crate::types::{CodebaseId, RecordId, ViewId, WorkspaceId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    CodebaseUpdated {
        codebase_id: CodebaseId,
    },
    WorkspaceUpdated {
        workspace_id: WorkspaceId,
    },
    ViewUpdated {
        view_id: ViewId,
    },
    PullRequestUpdated {
        pull_request_id: RecordId,
        workspace_id: WorkspaceId,
    },
}

impl Notification {
    fn kind(&self) -> &'static str {
        match self {
            Notification::CodebaseUpdated { .. } => "codebase_updated",
            Notification::WorkspaceUpdated { .. } => "workspace_updated",
            Notification::ViewUpdated { .. } => "view_updated",
            Notification::PullRequestUpdated { .. } => "pull_request_updated",
        }
    }
}

#[derive(Debug, Default)]
pub struct Notifier {
    subscribers: Mutex<Vec<mpsc::Sender<Notification>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber that can fall `capacity` events behind.
    pub fn subscribe(&self, capacity: usize) -> mpsc::Receiver<Notification> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    pub fn publish(&self, notification: Notification) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|tx| match tx.try_send(notification.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(event = notification.kind(), "subscriber is full, dropping event");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
