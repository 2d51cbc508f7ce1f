//! Routes a webhook event to the service that handles it.

use tracing::{debug, instrument};

use crate::context::SyncContext;
use crate::effects::{GitInterpreter, RemoteInterpreter};
use crate::error::Result;
use crate::importer::ImporterService;
use crate::pull_requests::PullRequestService;
use crate::push::PushService;
use crate::statuses::StatusService;
use crate::webhooks::WebhookEvent;

pub struct EventRouter<R, G> {
    push: PushService<R, G>,
    pull_requests: PullRequestService<R, G>,
    importer: ImporterService<R, G>,
    statuses: StatusService<R, G>,
}

impl<R, G> Clone for EventRouter<R, G> {
    fn clone(&self) -> Self {
        Self {
            push: self.push.clone(),
            pull_requests: self.pull_requests.clone(),
            importer: self.importer.clone(),
            statuses: self.statuses.clone(),
        }
    }
}

impl<R: RemoteInterpreter, G: GitInterpreter> EventRouter<R, G> {
    pub fn new(ctx: SyncContext<R, G>) -> Self {
        Self {
            push: PushService::new(ctx.clone()),
            pull_requests: PullRequestService::new(ctx.clone()),
            importer: ImporterService::new(ctx.clone()),
            statuses: StatusService::new(ctx),
        }
    }

    /// Handles one event. Events about things that are not tracked succeed
    /// without doing anything.
    #[instrument(skip_all, fields(kind = event.kind(), installation_id = %event.installation_id()))]
    pub async fn route(&self, event: &WebhookEvent) -> Result<()> {
        let result = match event {
            WebhookEvent::Installation(e) => self.importer.handle_installation(e),
            WebhookEvent::InstallationRepositories(e) => {
                self.importer.handle_installation_repositories(e)
            }
            WebhookEvent::Push(e) => {
                if e.after.is_none() {
                    debug!(git_ref = %e.git_ref, "ref was deleted, nothing to sync");
                    return Ok(());
                }
                self.push
                    .handle_push(e.installation_id, e.repository_id, &e.git_ref)
                    .await
            }
            WebhookEvent::PullRequest(e) => {
                debug!(action = %e.action, "pull request event");
                self.pull_requests
                    .handle_pull_request_event(&e.pull_request)
                    .await
            }
            WebhookEvent::Status(e) => self.statuses.handle_status(e),
            WebhookEvent::WorkflowJob(e) => self.statuses.handle_workflow_job(e),
        };

        match result {
            Err(e) if e.is_not_tracked() => {
                debug!(error = %e, "event is about something untracked");
                Ok(())
            }
            other => other,
        }
    }
}
