use tracing::{debug, info, instrument, warn};

use crate::effects::{GitInterpreter, PrData, RemoteAuth, RemoteEffect, RemoteInterpreter};
use crate::error::{Context, Result, SyncError};
use crate::github::RemoteApiError;
use crate::types::{PullRequest, PullRequestState, RemotePrState, UserId, WorkspaceId};

use super::{PullRequestService, apply_remote};

impl<R: RemoteInterpreter, G: GitInterpreter> PullRequestService<R, G> {
    /// Merges the workspace's pull request on the remote host as `user`.
    ///
    /// Only an open pull request can be merged. The row moves to `Merging`
    /// with a conditional update first, which is published. A caller
    /// that loses that race returns `Ok` without touching the remote host.
    /// On any failure the row goes back to the state it had before.
    #[instrument(skip(self), fields(workspace_id = %workspace_id, user_id = %user_id))]
    pub async fn merge_pull_request(
        &self,
        workspace_id: &WorkspaceId,
        user_id: &UserId,
    ) -> Result<()> {
        let mut pr = self
            .workspace_pull_request(workspace_id)?
            .ok_or_else(|| SyncError::not_tracked("pull request for workspace", workspace_id))?;

        let prior = pr.state;
        match prior {
            PullRequestState::Merging => {
                info!("pull request is already being merged");
                return Ok(());
            }
            PullRequestState::Merged => {
                debug!("pull request is already merged");
                return Ok(());
            }
            PullRequestState::Closed => {
                return Err(SyncError::not_tracked(
                    "open pull request for workspace",
                    workspace_id,
                ));
            }
            PullRequestState::Open => {}
        }

        let (repository, installation) = self.repository_for(&pr.codebase_id)?;
        let account = self
            .ctx
            .platform
            .linked_account(user_id)
            .context("get linked account")?
            .ok_or_else(|| {
                SyncError::Invalid(format!("user {user_id} has no linked remote account"))
            })?;

        let claimed = self
            .ctx
            .store
            .transition_state(&pr.id, prior, PullRequestState::Merging)
            .context("mark pull request merging")?;
        if !claimed {
            info!("pull request changed state concurrently, not merging");
            return Ok(());
        }
        pr.state = PullRequestState::Merging;
        self.notify_updated(&pr);

        let auth = RemoteAuth::Personal(account.access_token);
        let owner = installation.owner;
        let repo = repository.name;

        let current = match self.get_remote(&auth, &owner, &repo, &pr).await {
            Ok(current) => current,
            Err(e) => {
                self.roll_back(&pr, prior);
                return Err(e);
            }
        };
        if current.merged {
            info!("pull request was merged on the remote host already");
            return self.record_merged(pr, &current).await;
        }

        let merge = RemoteEffect::MergePullRequest {
            owner: owner.clone(),
            repo: repo.clone(),
            number: pr.number,
            commit_title: format!("Merge pull request #{} - {}", pr.number.0, current.title),
        };
        let outcome = self
            .ctx
            .remote
            .interpret(&auth, merge)
            .await
            .and_then(|response| response.into_merge());
        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                self.roll_back(&pr, prior);
                return Err(merge_error(e));
            }
        };
        if !outcome.merged {
            self.roll_back(&pr, prior);
            return Err(SyncError::RemoteRejected {
                message: outcome
                    .message
                    .unwrap_or_else(|| "pull request was not merged".to_string()),
            });
        }

        let merged = match self.get_remote(&auth, &owner, &repo, &pr).await {
            Ok(merged) => merged,
            Err(e) => {
                // The merge went through; the webhook will bring the timestamps.
                warn!(error = %e, "failed to fetch pull request after merge");
                let mut fallback = current;
                fallback.merged = true;
                fallback.state = RemotePrState::Closed;
                fallback
            }
        };
        self.record_merged(pr, &merged).await
    }

    async fn get_remote(
        &self,
        auth: &RemoteAuth,
        owner: &str,
        repo: &str,
        pr: &PullRequest,
    ) -> Result<PrData> {
        self.ctx
            .remote
            .interpret(
                auth,
                RemoteEffect::GetPullRequest {
                    owner: owner.to_string(),
                    repo: repo.to_string(),
                    number: pr.number,
                },
            )
            .await
            .and_then(|response| response.into_pull_request())
            .context("get pull request")
    }

    async fn record_merged(&self, mut pr: PullRequest, data: &PrData) -> Result<()> {
        apply_remote(&mut pr, data);
        pr.state = PullRequestState::Merged;
        self.ctx
            .store
            .update_pull_request(&pr)
            .context("update pull request")?;
        info!(number = pr.number.0, "pull request merged");

        match self
            .ctx
            .platform
            .get_workspace(&pr.workspace_id)
            .context("get workspace")?
        {
            Some(workspace) => self.land_merged(&pr, &workspace, data).await?,
            None => warn!(workspace_id = %pr.workspace_id, "merged pull request workspace not found"),
        }
        self.notify_updated(&pr);
        Ok(())
    }

    fn roll_back(&self, pr: &PullRequest, prior: PullRequestState) {
        match self
            .ctx
            .store
            .transition_state(&pr.id, PullRequestState::Merging, prior)
        {
            Ok(true) => {
                debug!(state = ?prior, "rolled back merge attempt");
                let mut restored = pr.clone();
                restored.state = prior;
                self.notify_updated(&restored);
            }
            Ok(false) => warn!("pull request left Merging concurrently, not rolling back"),
            Err(e) => warn!(error = %e, "failed to roll back merge attempt"),
        }
    }
}

fn merge_error(err: RemoteApiError) -> SyncError {
    if err.is_user_facing() {
        SyncError::RemoteRejected {
            message: err.message,
        }
    } else {
        SyncError::Remote {
            operation: "merge pull request",
            source: err,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::effects::{MergeData, RemoteAuth, RemoteEffect, RemoteResponse};
    use crate::error::SyncError;
    use crate::github::RemoteApiError;
    use crate::notify::Notification;
    use crate::pull_requests::PullRequestService;
    use crate::store::{InstallationStore, PullRequestStore, RepositoryStore};
    use crate::test_utils::{
        Harness, account, at, installation, pr_data, pull_request, repository, sha, workspace,
    };
    use crate::types::{PrNumber, PullRequestState, RemotePrState, UserId, WorkspaceId};

    fn setup() -> Harness {
        let h = Harness::new();
        h.store.insert_installation(&installation(1)).unwrap();
        h.store.insert_repository(&repository(1, 10, "cb-1")).unwrap();
        h.platform.insert_workspace(workspace("ws-1", "cb-1", "u1"));
        h.platform.link_account(account("u1", "octocat"));
        h.store
            .insert_pull_request(&pull_request(7, "cb-1", "ws-1"))
            .unwrap();
        h
    }

    fn merged_data() -> crate::effects::PrData {
        let mut data = pr_data(7, 7);
        data.state = RemotePrState::Closed;
        data.merged = true;
        data.merged_at = Some(at(50));
        data.closed_at = Some(at(50));
        data
    }

    fn state(h: &Harness) -> PullRequestState {
        h.store.pull_requests()[0].state
    }

    #[tokio::test]
    async fn merge_uses_personal_token_and_marks_merged() {
        let h = setup();
        h.remote
            .respond("get_pull_request", RemoteResponse::PullRequest(pr_data(7, 7)));
        h.remote.respond(
            "merge_pull_request",
            RemoteResponse::Merge(MergeData {
                merged: true,
                message: None,
            }),
        );
        h.remote
            .respond("get_pull_request", RemoteResponse::PullRequest(merged_data()));

        PullRequestService::new(h.ctx.clone())
            .merge_pull_request(&WorkspaceId::new("ws-1"), &UserId::new("u1"))
            .await
            .unwrap();

        assert_eq!(state(&h), PullRequestState::Merged);
        assert_eq!(h.store.pull_requests()[0].merged_at, Some(at(50)));
        let merges = h.remote.calls_named("merge_pull_request");
        assert_eq!(merges.len(), 1);
        assert_eq!(merges[0].0, RemoteAuth::Personal("gho_u1".into()));
        assert_eq!(
            merges[0].1,
            RemoteEffect::MergePullRequest {
                owner: "acme".into(),
                repo: "widgets".into(),
                number: PrNumber(7),
                commit_title: "Merge pull request #7 - Fix the widgets".into(),
            }
        );
    }

    #[tokio::test]
    async fn concurrent_merges_call_the_remote_once() {
        let h = setup();
        h.remote
            .respond("get_pull_request", RemoteResponse::PullRequest(pr_data(7, 7)));
        h.remote.respond(
            "merge_pull_request",
            RemoteResponse::Merge(MergeData {
                merged: true,
                message: None,
            }),
        );
        h.remote
            .respond("get_pull_request", RemoteResponse::PullRequest(merged_data()));

        let service = PullRequestService::new(h.ctx.clone());
        let ws = WorkspaceId::new("ws-1");
        let user = UserId::new("u1");
        let (first, second) = tokio::join!(
            service.merge_pull_request(&ws, &user),
            service.merge_pull_request(&ws, &user),
        );
        first.unwrap();
        second.unwrap();

        assert_eq!(h.remote.calls_named("merge_pull_request").len(), 1);
        assert_eq!(state(&h), PullRequestState::Merged);
    }

    #[tokio::test]
    async fn branch_protection_rejection_rolls_back_with_remote_message() {
        let h = setup();
        h.remote
            .respond("get_pull_request", RemoteResponse::PullRequest(pr_data(7, 7)));
        h.remote.fail(
            "merge_pull_request",
            RemoteApiError::user_facing(Some(405), "At least 1 approving review is required"),
        );

        let err = PullRequestService::new(h.ctx.clone())
            .merge_pull_request(&WorkspaceId::new("ws-1"), &UserId::new("u1"))
            .await
            .unwrap_err();

        match err {
            SyncError::RemoteRejected { message } => {
                assert_eq!(message, "At least 1 approving review is required")
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(state(&h), PullRequestState::Open);
    }

    #[tokio::test]
    async fn transport_failure_rolls_back_and_propagates() {
        let h = setup();
        h.remote
            .respond("get_pull_request", RemoteResponse::PullRequest(pr_data(7, 7)));
        h.remote.fail(
            "merge_pull_request",
            RemoteApiError::transient_without_source("connection reset"),
        );

        let err = PullRequestService::new(h.ctx.clone())
            .merge_pull_request(&WorkspaceId::new("ws-1"), &UserId::new("u1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Remote { .. }));
        assert_eq!(state(&h), PullRequestState::Open);
    }

    #[tokio::test]
    async fn not_merged_response_rolls_back() {
        let h = setup();
        h.remote
            .respond("get_pull_request", RemoteResponse::PullRequest(pr_data(7, 7)));
        h.remote.respond(
            "merge_pull_request",
            RemoteResponse::Merge(MergeData {
                merged: false,
                message: None,
            }),
        );

        let err = PullRequestService::new(h.ctx.clone())
            .merge_pull_request(&WorkspaceId::new("ws-1"), &UserId::new("u1"))
            .await
            .unwrap_err();
        assert_eq!(err.user_message(), "pull request was not merged");
        assert_eq!(state(&h), PullRequestState::Open);
    }

    #[tokio::test]
    async fn already_merged_remotely_skips_merge_call() {
        let h = setup();
        h.remote
            .respond("get_pull_request", RemoteResponse::PullRequest(merged_data()));

        PullRequestService::new(h.ctx.clone())
            .merge_pull_request(&WorkspaceId::new("ws-1"), &UserId::new("u1"))
            .await
            .unwrap();
        assert!(h.remote.calls_named("merge_pull_request").is_empty());
        assert_eq!(state(&h), PullRequestState::Merged);
    }

    #[tokio::test]
    async fn merging_row_is_left_alone() {
        let h = setup();
        let id = h.store.pull_requests()[0].id.clone();
        h.store
            .transition_state(&id, PullRequestState::Open, PullRequestState::Merging)
            .unwrap();

        PullRequestService::new(h.ctx.clone())
            .merge_pull_request(&WorkspaceId::new("ws-1"), &UserId::new("u1"))
            .await
            .unwrap();
        assert!(h.remote.calls().is_empty());
    }

    #[tokio::test]
    async fn closed_pull_request_is_not_merged() {
        let h = setup();
        let id = h.store.pull_requests()[0].id.clone();
        h.store
            .transition_state(&id, PullRequestState::Open, PullRequestState::Closed)
            .unwrap();

        let err = PullRequestService::new(h.ctx.clone())
            .merge_pull_request(&WorkspaceId::new("ws-1"), &UserId::new("u1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotTracked { .. }));
        assert!(h.remote.calls().is_empty());
        assert_eq!(state(&h), PullRequestState::Closed);
    }

    #[tokio::test]
    async fn merge_publishes_merging_then_lands_the_change() {
        let h = setup();
        let mut events = h.notifier.subscribe(16);
        let pr_id = h.store.pull_requests()[0].id.clone();
        let mut merged = merged_data();
        merged.merge_commit_sha = Some(sha('c'));
        h.remote
            .respond("get_pull_request", RemoteResponse::PullRequest(pr_data(7, 7)));
        h.remote.respond(
            "merge_pull_request",
            RemoteResponse::Merge(MergeData {
                merged: true,
                message: None,
            }),
        );
        h.remote
            .respond("get_pull_request", RemoteResponse::PullRequest(merged));

        PullRequestService::new(h.ctx.clone())
            .merge_pull_request(&WorkspaceId::new("ws-1"), &UserId::new("u1"))
            .await
            .unwrap();

        let updated = Notification::PullRequestUpdated {
            pull_request_id: pr_id,
            workspace_id: WorkspaceId::new("ws-1"),
        };
        assert_eq!(events.recv().await, Some(updated.clone()));
        let mut rest = Vec::new();
        while let Ok(event) = events.try_recv() {
            rest.push(event);
        }
        assert_eq!(rest.last(), Some(&updated));

        let changes = h.platform.changes();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].commit_id, sha('c'));
        let workspaces = h.platform.workspaces();
        let ws = &workspaces[0];
        assert!(ws.archived);
        assert_eq!(ws.change_id, Some(changes[0].id.clone()));
    }

    #[tokio::test]
    async fn rollback_is_published() {
        let h = setup();
        let mut events = h.notifier.subscribe(16);
        h.remote
            .respond("get_pull_request", RemoteResponse::PullRequest(pr_data(7, 7)));
        h.remote.fail(
            "merge_pull_request",
            RemoteApiError::transient_without_source("connection reset"),
        );

        PullRequestService::new(h.ctx.clone())
            .merge_pull_request(&WorkspaceId::new("ws-1"), &UserId::new("u1"))
            .await
            .unwrap_err();

        let mut count = 0;
        while let Ok(event) = events.try_recv() {
            assert!(matches!(event, Notification::PullRequestUpdated { .. }));
            count += 1;
        }
        assert_eq!(count, 2);
    }
}
