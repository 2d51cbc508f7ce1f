//! What to do with a delivery whose handler failed.

use crate::webhooks::WebhookEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Leave the delivery in the spool for a later attempt.
    Retry,
    /// Log the failure and finish the delivery.
    Acknowledge,
}

/// Per-kind failure policy.
///
/// Status, workflow job and installation handlers only write local state, so
/// replaying them is safe and they are retried. Push and pull request
/// handlers talk to git and the remote host part way through; a failure
/// there is logged and the delivery finished. The next push or pull request
/// event reconciles whatever was left behind.
pub fn classify_failure(event: &WebhookEvent) -> FailureAction {
    match event {
        WebhookEvent::Status(_)
        | WebhookEvent::WorkflowJob(_)
        | WebhookEvent::Installation(_)
        | WebhookEvent::InstallationRepositories(_) => FailureAction::Retry,
        WebhookEvent::Push(_) | WebhookEvent::PullRequest(_) => FailureAction::Acknowledge,
    }
}
