use tracing::{debug, info, instrument, warn};

use crate::effects::{GitInterpreter, PrData, RemoteInterpreter};
use crate::error::{Context, Result};
use crate::notify::Notification;
use crate::pr_import::markdown_to_html;
use crate::types::{PullRequest, PullRequestState};

use super::{PullRequestService, apply_remote};

impl<R: RemoteInterpreter, G: GitInterpreter> PullRequestService<R, G> {
    /// Applies a `pull_request` webhook to every codebase tracking the PR.
    ///
    /// Untracked pull requests are ignored. Safe to replay and to receive out
    /// of order: `Merged` is terminal and an in-flight `Merging` survives an
    /// `open` observation.
    ///
    /// A merged pull request lands its workspace as a change. While a pull
    /// request is still importing, its description and open/closed state are
    /// mirrored onto the workspace.
    #[instrument(skip(self, data), fields(remote_pr_id = %data.id, number = %data.number))]
    pub async fn handle_pull_request_event(&self, data: &PrData) -> Result<()> {
        let rows = self
            .ctx
            .store
            .list_pull_requests_by_remote_id(data.id)
            .context("list pull requests by remote id")?;
        if rows.is_empty() {
            debug!("pull request is not tracked");
            return Ok(());
        }

        for mut pr in rows {
            let before = pr.state;
            apply_remote(&mut pr, data);
            self.ctx
                .store
                .update_pull_request(&pr)
                .context("update pull request")?;
            if before != pr.state {
                info!(codebase_id = %pr.codebase_id, from = ?before, to = ?pr.state, "pull request state changed");
            }

            let workspace = self
                .ctx
                .platform
                .get_workspace(&pr.workspace_id)
                .context("get workspace")?;
            let Some(mut workspace) = workspace else {
                warn!(workspace_id = %pr.workspace_id, "pull request workspace not found");
                continue;
            };

            if pr.importing {
                workspace.draft_description = self.mirror_import(&pr, data)?;
            }
            // A merge in flight lands the workspace itself once the remote
            // call returns.
            if pr.state == PullRequestState::Merged && before != PullRequestState::Merging {
                self.land_merged(&pr, &workspace, data).await?;
            }
            self.notify_updated(&pr);
        }
        Ok(())
    }

    /// Copies the remote description onto an importing workspace and follows
    /// the pull request being closed or reopened. Returns the new description.
    fn mirror_import(&self, pr: &PullRequest, data: &PrData) -> Result<String> {
        let platform = &self.ctx.platform;
        let description = markdown_to_html(data.body.as_deref().unwrap_or_default());
        platform
            .set_draft_description(&pr.workspace_id, &description)
            .context("set draft description")?;
        match pr.state {
            PullRequestState::Open => platform
                .unarchive_workspace(&pr.workspace_id)
                .context("unarchive workspace")?,
            PullRequestState::Closed => platform
                .archive_workspace(&pr.workspace_id, None)
                .context("archive workspace")?,
            PullRequestState::Merging | PullRequestState::Merged => {}
        }
        self.ctx.notifier.publish(Notification::WorkspaceUpdated {
            workspace_id: pr.workspace_id.clone(),
        });
        Ok(description)
    }
}
