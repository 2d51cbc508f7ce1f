use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::effects::{CommitData, GitEffect, GitInterpreter, GitToken, RemoteInterpreter, TRUNK};
use crate::error::{Context, Result, SyncError};
use crate::notify::Notification;
use crate::platform::{Change, Workspace};
use crate::types::{ChangeId, CodebaseId, InstallationId, RemoteRepoId, Repository};

use super::PushService;
use super::metadata::{first_line, parse_workspace_id};

/// How many trunk commits are inspected after a fetch.
///
/// Commits are imported only if they are among the newest `COMMIT_WINDOW`
/// reachable from the pushed ref; a single push introducing more than this
/// leaves the older ones unimported.
pub const COMMIT_WINDOW: usize = 50;

impl<R: RemoteInterpreter, G: GitInterpreter> PushService<R, G> {
    /// Absorbs a push to a remote branch.
    ///
    /// Only pushes to the tracked branch of an enabled repository where the
    /// remote host is the source of truth do anything. Replaying a delivery
    /// creates no new changes: commits that already have one are skipped.
    #[instrument(
        skip(self),
        fields(installation_id = %installation_id, repository_id = %remote_repo_id)
    )]
    pub async fn handle_push(
        &self,
        installation_id: InstallationId,
        remote_repo_id: RemoteRepoId,
        git_ref: &str,
    ) -> Result<()> {
        let Some(repository) = self
            .ctx
            .store
            .get_repository(installation_id, remote_repo_id)
            .context("get repository")?
        else {
            debug!("repository is not tracked");
            return Ok(());
        };
        if git_ref != repository.tracked_ref() {
            debug!(git_ref, tracked = %repository.tracked_ref(), "push is not to the tracked branch");
            return Ok(());
        }
        if !repository.integration_enabled || !repository.remote_is_source_of_truth {
            info!("remote is not the source of truth, ignoring push");
            return Ok(());
        }

        let token = match self
            .ctx
            .tokens
            .get_access_token(installation_id, remote_repo_id)
            .await
        {
            Ok(token) => token,
            Err(SyncError::PermissionDenied) => {
                warn!("installation has not granted the required permissions, skipping push");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        let installation = self
            .ctx
            .store
            .get_installation(installation_id)
            .context("get installation")?
            .ok_or_else(|| SyncError::not_tracked("installation", installation_id))?;

        let codebase = repository.codebase_id.clone();
        let git = &self.ctx.git;
        git.interpret(
            &codebase,
            GitEffect::Fetch {
                url: self
                    .ctx
                    .settings
                    .clone_url(&installation.owner, &repository.name),
                token: GitToken(token.token),
                refspec: format!("+{git_ref}:refs/heads/{TRUNK}"),
            },
        )
        .await
        .and_then(|response| response.into_ok())
        .context("fetch pushed ref")?;

        let commits = git
            .interpret(
                &codebase,
                GitEffect::Log {
                    rev: TRUNK.to_string(),
                    limit: COMMIT_WINDOW,
                },
            )
            .await
            .and_then(|response| response.into_commits())
            .context("list trunk commits")?;

        let mut imported = 0;
        // Oldest first, so changes are created in history order.
        for commit in commits.iter().rev() {
            if self.import_commit(&codebase, commit)? {
                imported += 1;
            }
        }
        if imported > 0 {
            info!(imported, "imported commits from the remote host");
            self.ctx.notifier.publish(Notification::CodebaseUpdated {
                codebase_id: codebase.clone(),
            });
        }

        self.ctx
            .platform
            .unset_up_to_date(&codebase)
            .context("unset up to date")?;

        let branch = git_ref.trim_start_matches("refs/heads/");
        let prs = self
            .ctx
            .store
            .list_pull_requests_by_head(&codebase, branch)
            .context("list pull requests by head")?;
        for pr in prs {
            self.ctx.notifier.publish(Notification::PullRequestUpdated {
                pull_request_id: pr.id,
                workspace_id: pr.workspace_id,
            });
        }

        self.mark_synced(&repository)
    }

    /// Creates a change for `commit` unless one exists. Returns whether it did.
    fn import_commit(&self, codebase: &CodebaseId, commit: &CommitData) -> Result<bool> {
        let platform = &self.ctx.platform;
        if platform
            .change_exists(codebase, &commit.sha)
            .context("check change exists")?
        {
            return Ok(false);
        }

        let workspace = match parse_workspace_id(&commit.message) {
            Some(id) => platform
                .get_workspace(&id)
                .context("get workspace")?
                .filter(|ws| &ws.codebase_id == codebase),
            None => None,
        };

        let change = match &workspace {
            Some(ws) => Change {
                id: ChangeId::generate(),
                codebase_id: codebase.clone(),
                commit_id: commit.sha.clone(),
                parent_commit_id: None,
                title: first_line(&ws.draft_description).to_string(),
                description: ws.draft_description.clone(),
                user_id: Some(ws.user_id.clone()),
                workspace_id: Some(ws.id.clone()),
                created_at: Utc::now(),
            },
            None => {
                let title = first_line(&commit.message);
                let description = commit
                    .message
                    .split_once('\n')
                    .map(|(_, rest)| rest.trim())
                    .unwrap_or("");
                Change {
                    id: ChangeId::generate(),
                    codebase_id: codebase.clone(),
                    commit_id: commit.sha.clone(),
                    parent_commit_id: None,
                    title: title.to_string(),
                    description: description.to_string(),
                    user_id: None,
                    workspace_id: None,
                    created_at: Utc::now(),
                }
            }
        };
        platform.create_change(&change).context("create change")?;
        debug!(commit = %commit.sha.short(), change_id = %change.id, "created change");

        if let Some(ws) = workspace {
            self.land_workspace(&ws, &change)?;
        }
        Ok(true)
    }

    /// Moves a workspace's in-flight state onto the change it landed as.
    fn land_workspace(&self, ws: &Workspace, change: &Change) -> Result<()> {
        let platform = &self.ctx.platform;
        platform.clear_draft(&ws.id).context("clear draft")?;

        if let Some(view) = &ws.view_id {
            match platform.has_conflicts(&ws.id) {
                Ok(true) => {
                    debug!(workspace_id = %ws.id, "workspace has conflicts, not syncing view");
                }
                Ok(false) => {
                    platform
                        .sync_view_on_trunk(view)
                        .context("sync view on trunk")?;
                    self.ctx.notifier.publish(Notification::ViewUpdated {
                        view_id: view.clone(),
                    });
                }
                Err(e) => {
                    warn!(workspace_id = %ws.id, error = %e, "conflict check failed, not syncing view");
                }
            }
        }
        self.ctx.notifier.publish(Notification::WorkspaceUpdated {
            workspace_id: ws.id.clone(),
        });

        platform
            .move_comments(&ws.id, &change.id)
            .context("move comments")?;
        platform
            .dismiss_reviews(&ws.id)
            .context("dismiss reviews")?;
        platform
            .enqueue_change_build(&change.id)
            .context("enqueue change build")?;
        Ok(())
    }

    fn mark_synced(&self, repository: &Repository) -> Result<()> {
        // Re-read: the token refresh above rewrote the row.
        let mut current = self
            .ctx
            .store
            .get_repository(repository.installation_id, repository.remote_repo_id)
            .context("get repository")?
            .ok_or_else(|| SyncError::not_tracked("repository", repository.remote_repo_id))?;
        current.synced_at = Some(Utc::now());
        self.ctx
            .store
            .update_repository(&current)
            .context("mark repository synced")
    }
}
