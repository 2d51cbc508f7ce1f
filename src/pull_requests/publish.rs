use chrono::Utc;
use tracing::{info, instrument};

use crate::effects::{
    GitEffect, GitInterpreter, GitToken, RemoteAuth, RemoteEffect, RemoteInterpreter, TRUNK,
};
use crate::error::{Context, Result, SyncError};
use crate::platform::Workspace;
use crate::types::{PullRequest, PullRequestState, RecordId, WorkspaceId};

use crate::push::push_and_record;

use super::{PullRequestService, apply_remote};

/// Remote branch a workspace is published to.
pub fn pull_request_branch(workspace_id: &WorkspaceId) -> String {
    format!("sync-pr-{workspace_id}")
}

/// The workspace's draft followed by a footer linking back to the platform.
pub fn pull_request_body(workspace: &Workspace, platform_url: &str) -> String {
    let link = format!(
        "{}/{}/{}",
        platform_url.trim_end_matches('/'),
        workspace.codebase_id,
        workspace.id
    );
    let footer = format!("---\nThis pull request is kept in sync with [its workspace]({link}).");
    if workspace.draft_description.trim().is_empty() {
        footer
    } else {
        format!("{}\n\n{footer}", workspace.draft_description)
    }
}

impl<R: RemoteInterpreter, G: GitInterpreter> PullRequestService<R, G> {
    /// Publishes a workspace to the remote host and opens or updates its pull
    /// request, acting as the workspace owner.
    ///
    /// Only repositories where the remote host is the source of truth take
    /// pull requests; the others receive trunk directly.
    ///
    /// When the remote repository does not have the tracked branch yet (a
    /// fresh remote), trunk is pushed there first without force.
    #[instrument(skip(self), fields(workspace_id = %workspace_id))]
    pub async fn create_or_update_pull_request(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<PullRequest> {
        let workspace = self
            .ctx
            .platform
            .get_workspace(workspace_id)
            .context("get workspace")?
            .ok_or_else(|| SyncError::not_tracked("workspace", workspace_id))?;
        let (repository, installation) = self.repository_for(&workspace.codebase_id)?;
        if !repository.integration_enabled || !repository.remote_is_source_of_truth {
            return Err(SyncError::IntegrationNotEnabled);
        }

        let account = self
            .ctx
            .platform
            .linked_account(&workspace.user_id)
            .context("get linked account")?
            .ok_or_else(|| {
                SyncError::Invalid(format!(
                    "user {} has no linked remote account",
                    workspace.user_id
                ))
            })?;
        let token = self
            .ctx
            .tokens
            .get_access_token(installation.installation_id, repository.remote_repo_id)
            .await?;
        let url = self
            .ctx
            .settings
            .clone_url(&installation.owner, &repository.name);
        let codebase = &workspace.codebase_id;
        let git = &self.ctx.git;

        let has_tracked = git
            .interpret(
                codebase,
                GitEffect::RemoteBranchExists {
                    url: url.clone(),
                    token: GitToken(token.token.clone()),
                    branch: repository.tracked_branch.clone(),
                },
            )
            .await
            .and_then(|response| response.into_bool())
            .context("check tracked branch")?;
        if !has_tracked {
            info!(branch = %repository.tracked_branch, "remote lacks tracked branch, pushing trunk");
            push_and_record(
                self.ctx.store.as_ref(),
                git.as_ref(),
                codebase,
                GitEffect::Push {
                    url: url.clone(),
                    token: GitToken(token.token.clone()),
                    refspec: format!("refs/heads/{TRUNK}:{}", repository.tracked_ref()),
                },
            )
            .await?;
        }

        // An open pull request on our own repository is updated in place,
        // under whatever head branch it already has. Forks cannot be pushed
        // to, so they get a fresh pull request from our branch.
        let branch = pull_request_branch(workspace_id);
        let (existing, fork) = match self
            .workspace_pull_request(workspace_id)?
            .filter(|pr| pr.state.is_open_like())
        {
            Some(pr) if pr.fork => (None, Some(pr)),
            other => (other, None),
        };
        let remote_branch = existing
            .as_ref()
            .map(|pr| pr.head.as_str())
            .filter(|head| !head.is_empty())
            .unwrap_or(&branch)
            .to_string();

        let head_sha = self
            .ctx
            .platform
            .commit_workspace(codebase, workspace_id, &branch)
            .context("commit workspace")?;
        push_and_record(
            self.ctx.store.as_ref(),
            git.as_ref(),
            codebase,
            GitEffect::Push {
                url,
                token: GitToken(account.access_token.clone()),
                refspec: format!("+refs/heads/{branch}:refs/heads/{remote_branch}"),
            },
        )
        .await?;

        let auth = RemoteAuth::Personal(account.access_token);
        let title = workspace
            .name
            .clone()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| "Untitled".to_string());
        let body = pull_request_body(&workspace, &self.ctx.settings.platform_url);

        let pr = match existing {
            Some(mut pr) => {
                let data = self
                    .ctx
                    .remote
                    .interpret(
                        &auth,
                        RemoteEffect::EditPullRequest {
                            owner: installation.owner.clone(),
                            repo: repository.name.clone(),
                            number: pr.number,
                            title,
                            body,
                        },
                    )
                    .await
                    .and_then(|response| response.into_pull_request())
                    .context("edit pull request")?;
                apply_remote(&mut pr, &data);
                pr.head_sha = Some(head_sha);
                pr.updated_at = Some(data.updated_at.unwrap_or_else(Utc::now));
                // Published from the platform now; stop mirroring the remote.
                pr.importing = false;
                self.ctx
                    .store
                    .update_pull_request(&pr)
                    .context("update pull request")?;
                info!(number = pr.number.0, head = %pr.head, "updated pull request");
                pr
            }
            None => {
                let data = self
                    .ctx
                    .remote
                    .interpret(
                        &auth,
                        RemoteEffect::CreatePullRequest {
                            owner: installation.owner.clone(),
                            repo: repository.name.clone(),
                            title,
                            head: branch.clone(),
                            base: repository.tracked_branch.clone(),
                            body,
                        },
                    )
                    .await
                    .and_then(|response| response.into_pull_request())
                    .context("create pull request")?;
                let now = Utc::now();
                let pr = PullRequest {
                    id: RecordId::generate(),
                    workspace_id: workspace_id.clone(),
                    remote_pr_id: data.id,
                    remote_repo_id: repository.remote_repo_id,
                    created_by: workspace.user_id.clone(),
                    number: data.number,
                    head: branch,
                    head_sha: Some(head_sha),
                    base: repository.tracked_branch.clone(),
                    codebase_id: codebase.clone(),
                    state: PullRequestState::Open,
                    created_at: data.created_at.unwrap_or(now),
                    updated_at: data.updated_at,
                    closed_at: None,
                    merged_at: None,
                    fork: false,
                    importing: false,
                };
                self.ctx
                    .store
                    .insert_pull_request(&pr)
                    .context("insert pull request")?;
                info!(number = pr.number.0, "created pull request");
                if let Some(mut fork) = fork {
                    fork.importing = false;
                    self.ctx
                        .store
                        .update_pull_request(&fork)
                        .context("update fork pull request")?;
                }
                pr
            }
        };
        self.notify_updated(&pr);
        Ok(pr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{GitResponse, RemoteResponse};
    use crate::git::GitError;
    use crate::store::{InstallationStore, PullRequestStore, RepositoryStore};
    use crate::test_utils::{
        Harness, account, installation, pr_data, pull_request, repository, token, workspace,
    };
    use crate::types::{InstallationId, PrNumber, RemotePrId, RemoteRepoId};

    fn setup() -> Harness {
        let h = Harness::new();
        h.store.insert_installation(&installation(1)).unwrap();
        h.store.insert_repository(&repository(1, 10, "cb-1")).unwrap();
        h.platform.insert_workspace(workspace("ws-1", "cb-1", "u1"));
        h.platform.link_account(account("u1", "octocat"));
        h.remote.respond("create_installation_token", token("ghs_inst"));
        h
    }

    #[test]
    fn body_links_back_to_workspace() {
        let ws = workspace("ws-1", "cb-1", "u1");
        let body = pull_request_body(&ws, "https://platform.test/");
        assert!(body.starts_with("Fix the widgets\n\nThey were broken.\n\n---\n"));
        assert!(body.contains("(https://platform.test/cb-1/ws-1)"));
    }

    #[tokio::test]
    async fn creates_pull_request_as_workspace_owner() {
        let h = setup();
        let mut created = pr_data(99, 12);
        created.head_ref = "sync-pr-ws-1".into();
        h.remote
            .respond("create_pull_request", RemoteResponse::PullRequest(created));

        let pr = PullRequestService::new(h.ctx.clone())
            .create_or_update_pull_request(&WorkspaceId::new("ws-1"))
            .await
            .unwrap();

        assert_eq!(pr.remote_pr_id, RemotePrId(99));
        assert_eq!(pr.number, PrNumber(12));
        assert_eq!(pr.head, "sync-pr-ws-1");
        assert_eq!(h.store.pull_requests().len(), 1);

        let creates = h.remote.calls_named("create_pull_request");
        assert_eq!(creates[0].0, RemoteAuth::Personal("gho_u1".into()));
        match &creates[0].1 {
            RemoteEffect::CreatePullRequest {
                title, head, base, ..
            } => {
                assert_eq!(title, "Fix the widgets");
                assert_eq!(head, "sync-pr-ws-1");
                assert_eq!(base, "main");
            }
            other => panic!("unexpected effect {other:?}"),
        }

        // Tracked branch exists, so only the forced PR branch push happens.
        let pushes: Vec<_> = h
            .git
            .effects()
            .into_iter()
            .filter_map(|e| match e {
                GitEffect::Push { token, refspec, .. } => Some((token.0, refspec)),
                _ => None,
            })
            .collect();
        assert_eq!(
            pushes,
            vec![(
                "gho_u1".to_string(),
                "+refs/heads/sync-pr-ws-1:refs/heads/sync-pr-ws-1".to_string()
            )]
        );
        let row = h
            .store
            .get_repository(InstallationId(1), RemoteRepoId(10))
            .unwrap()
            .unwrap();
        assert!(row.last_push_at.is_some());
        assert_eq!(row.last_push_error, None);
    }

    #[tokio::test]
    async fn fresh_remote_gets_trunk_before_pull_request_branch() {
        let h = setup();
        h.git.respond("remote_branch_exists", GitResponse::Bool(false));
        h.remote
            .respond("create_pull_request", RemoteResponse::PullRequest(pr_data(99, 12)));

        PullRequestService::new(h.ctx.clone())
            .create_or_update_pull_request(&WorkspaceId::new("ws-1"))
            .await
            .unwrap();

        assert_eq!(
            pushed_refspecs(&h),
            vec![
                "refs/heads/trunk:refs/heads/main".to_string(),
                "+refs/heads/sync-pr-ws-1:refs/heads/sync-pr-ws-1".to_string(),
            ]
        );
    }

    fn pushed_refspecs(h: &Harness) -> Vec<String> {
        h.git
            .effects()
            .into_iter()
            .filter_map(|e| match e {
                GitEffect::Push { refspec, .. } => Some(refspec),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn existing_open_pull_request_is_edited() {
        let h = setup();
        let mut existing = pull_request(99, "cb-1", "ws-1");
        existing.importing = true;
        h.store.insert_pull_request(&existing).unwrap();
        h.remote
            .respond("edit_pull_request", RemoteResponse::PullRequest(pr_data(99, 99)));

        let pr = PullRequestService::new(h.ctx.clone())
            .create_or_update_pull_request(&WorkspaceId::new("ws-1"))
            .await
            .unwrap();

        assert_eq!(pr.id, existing.id);
        assert!(h.remote.calls_named("create_pull_request").is_empty());
        assert_eq!(h.remote.calls_named("edit_pull_request").len(), 1);
        let rows = h.store.pull_requests();
        assert_eq!(rows.len(), 1);
        assert_ne!(rows[0].head_sha, existing.head_sha);
        assert!(!rows[0].importing);
    }

    #[tokio::test]
    async fn update_pushes_to_the_existing_head_branch() {
        let h = setup();
        let mut existing = pull_request(99, "cb-1", "ws-1");
        existing.head = "feature-x".into();
        h.store.insert_pull_request(&existing).unwrap();
        h.remote
            .respond("edit_pull_request", RemoteResponse::PullRequest(pr_data(99, 99)));

        let pr = PullRequestService::new(h.ctx.clone())
            .create_or_update_pull_request(&WorkspaceId::new("ws-1"))
            .await
            .unwrap();

        assert_eq!(
            pushed_refspecs(&h),
            vec!["+refs/heads/sync-pr-ws-1:refs/heads/feature-x".to_string()]
        );
        assert_eq!(pr.head, "feature-x");
        assert_eq!(
            h.platform.workspace_commits(),
            vec![(WorkspaceId::new("ws-1"), "sync-pr-ws-1".to_string())]
        );
    }

    #[tokio::test]
    async fn fork_pull_request_gets_a_new_one_from_our_branch() {
        let h = setup();
        let mut fork = pull_request(99, "cb-1", "ws-1");
        fork.head = "patch-1".into();
        fork.fork = true;
        fork.importing = true;
        h.store.insert_pull_request(&fork).unwrap();
        h.remote
            .respond("create_pull_request", RemoteResponse::PullRequest(pr_data(100, 13)));

        let pr = PullRequestService::new(h.ctx.clone())
            .create_or_update_pull_request(&WorkspaceId::new("ws-1"))
            .await
            .unwrap();

        assert!(h.remote.calls_named("edit_pull_request").is_empty());
        assert_eq!(pr.remote_pr_id, RemotePrId(100));
        assert_eq!(pr.head, "sync-pr-ws-1");
        assert!(!pr.fork);
        assert_eq!(
            pushed_refspecs(&h),
            vec!["+refs/heads/sync-pr-ws-1:refs/heads/sync-pr-ws-1".to_string()]
        );
        let rows = h.store.pull_requests();
        assert_eq!(rows.len(), 2);
        let old = rows.iter().find(|row| row.id == fork.id).unwrap();
        assert!(!old.importing);
    }

    #[tokio::test]
    async fn platform_source_of_truth_is_rejected() {
        let h = Harness::new();
        h.store.insert_installation(&installation(1)).unwrap();
        let mut repo = repository(1, 10, "cb-1");
        repo.remote_is_source_of_truth = false;
        h.store.insert_repository(&repo).unwrap();
        h.platform.insert_workspace(workspace("ws-1", "cb-1", "u1"));

        let err = PullRequestService::new(h.ctx.clone())
            .create_or_update_pull_request(&WorkspaceId::new("ws-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::IntegrationNotEnabled));
        assert!(h.git.calls().is_empty());
        assert!(h.remote.calls().is_empty());
    }

    #[tokio::test]
    async fn disabled_integration_is_rejected() {
        let h = Harness::new();
        h.store.insert_installation(&installation(1)).unwrap();
        let mut repo = repository(1, 10, "cb-1");
        repo.integration_enabled = false;
        h.store.insert_repository(&repo).unwrap();
        h.platform.insert_workspace(workspace("ws-1", "cb-1", "u1"));

        let err = PullRequestService::new(h.ctx.clone())
            .create_or_update_pull_request(&WorkspaceId::new("ws-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::IntegrationNotEnabled));
    }

    #[tokio::test]
    async fn failed_push_is_recorded_on_repository() {
        let h = setup();
        h.git.fail(
            "push",
            GitError::PushFailed {
                refspec: "+refs/heads/sync-pr-ws-1:refs/heads/sync-pr-ws-1".into(),
                details: "protected branch hook declined".into(),
            },
        );

        let err = PullRequestService::new(h.ctx.clone())
            .create_or_update_pull_request(&WorkspaceId::new("ws-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Git { .. }));

        let row = h
            .store
            .get_repository(InstallationId(1), RemoteRepoId(10))
            .unwrap()
            .unwrap();
        assert!(
            row.last_push_error
                .unwrap()
                .contains("protected branch hook declined")
        );
        assert!(h.remote.calls_named("create_pull_request").is_empty());
    }
}
