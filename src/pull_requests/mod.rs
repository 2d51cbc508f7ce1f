//! Tracked pull requests: webhook updates, platform-initiated merges and
//! publishing workspaces as pull requests.
//!
//! State changes follow [`PullRequestState`]. The only conditional write is
//! the `Merging` guard, which goes through
//! [`PullRequestStore::transition_state`](crate::store::PullRequestStore::transition_state)
//! so two concurrent merges of the same pull request make one remote call.

mod land;
mod merge;
mod publish;
mod update;

pub use publish::{pull_request_branch, pull_request_body};

use tracing::warn;

use crate::context::SyncContext;
use crate::effects::PrData;
use crate::error::{Context, Result, SyncError};
use crate::notify::Notification;
use crate::types::{
    CodebaseId, Installation, PullRequest, PullRequestState, Repository, WorkspaceId,
    primary_pull_request,
};

pub struct PullRequestService<R, G> {
    ctx: SyncContext<R, G>,
}

impl<R, G> Clone for PullRequestService<R, G> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
        }
    }
}

impl<R, G> PullRequestService<R, G> {
    pub fn new(ctx: SyncContext<R, G>) -> Self {
        Self { ctx }
    }

    /// The pull request that represents a workspace, if any.
    ///
    /// More than one open pull request for a workspace is an anomaly: it is
    /// logged and the most recently created one is used.
    pub fn workspace_pull_request(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Option<PullRequest>> {
        let prs = self
            .ctx
            .store
            .list_pull_requests_by_workspace(workspace_id)
            .context("list pull requests by workspace")?;
        let open = prs.iter().filter(|pr| pr.state.is_open_like()).count();
        if open > 1 {
            warn!(workspace_id = %workspace_id, open, "workspace has more than one open pull request");
        }
        Ok(primary_pull_request(&prs).cloned())
    }

    /// The repository row and installation behind a codebase.
    fn repository_for(&self, codebase_id: &CodebaseId) -> Result<(Repository, Installation)> {
        let repository = self
            .ctx
            .store
            .get_repository_by_codebase(codebase_id)
            .context("get repository by codebase")?
            .ok_or_else(|| SyncError::not_tracked("repository for codebase", codebase_id))?;
        let installation = self
            .ctx
            .store
            .get_installation(repository.installation_id)
            .context("get installation")?
            .ok_or_else(|| SyncError::not_tracked("installation", repository.installation_id))?;
        Ok((repository, installation))
    }

    fn notify_updated(&self, pr: &PullRequest) {
        self.ctx.notifier.publish(Notification::PullRequestUpdated {
            pull_request_id: pr.id.clone(),
            workspace_id: pr.workspace_id.clone(),
        });
    }
}

/// Applies state and timestamps observed on the remote host.
pub(crate) fn apply_remote(pr: &mut PullRequest, data: &PrData) {
    let observed = PullRequestState::from_remote(data.state, data.merged);
    pr.state = pr.state.apply_observed(observed);
    if data.updated_at.is_some() {
        pr.updated_at = data.updated_at;
    }
    if pr.state == PullRequestState::Open || data.closed_at.is_some() {
        pr.closed_at = data.closed_at;
    }
    if data.merged_at.is_some() {
        pr.merged_at = data.merged_at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{at, pr_data, pull_request};
    use crate::types::RemotePrState;

    #[test]
    fn apply_remote_closes_and_reopens() {
        let mut pr = pull_request(1, "cb-1", "ws-1");

        let mut data = pr_data(1, 1);
        data.state = RemotePrState::Closed;
        data.closed_at = Some(at(30));
        apply_remote(&mut pr, &data);
        assert_eq!(pr.state, PullRequestState::Closed);
        assert_eq!(pr.closed_at, Some(at(30)));

        data.state = RemotePrState::Open;
        data.closed_at = None;
        apply_remote(&mut pr, &data);
        assert_eq!(pr.state, PullRequestState::Open);
        assert_eq!(pr.closed_at, None);
    }

    #[test]
    fn apply_remote_never_leaves_merged() {
        let mut pr = pull_request(1, "cb-1", "ws-1");
        pr.state = PullRequestState::Merged;
        pr.merged_at = Some(at(5));

        apply_remote(&mut pr, &pr_data(1, 1));
        assert_eq!(pr.state, PullRequestState::Merged);
        assert_eq!(pr.merged_at, Some(at(5)));
    }
}
