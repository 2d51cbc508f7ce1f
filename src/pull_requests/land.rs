use chrono::Utc;
use tracing::{debug, info, warn};

use crate::effects::{GitEffect, GitInterpreter, GitToken, PrData, RemoteInterpreter, TRUNK};
use crate::error::{Context, Result, SyncError};
use crate::git::GitError;
use crate::notify::Notification;
use crate::platform::{Change, Workspace};
use crate::push::first_line;
use crate::types::{ChangeId, PullRequest, Sha};

use super::PullRequestService;

impl<R: RemoteInterpreter, G: GitInterpreter> PullRequestService<R, G> {
    /// Records the merge commit of a merged pull request as a change and
    /// archives the workspace with it.
    ///
    /// A workspace that already landed, or a merge commit that already has a
    /// change, is left alone, so this is safe to repeat.
    pub(crate) async fn land_merged(
        &self,
        pr: &PullRequest,
        workspace: &Workspace,
        data: &PrData,
    ) -> Result<()> {
        if workspace.change_id.is_some() {
            debug!(workspace_id = %workspace.id, "workspace already landed");
            return Ok(());
        }
        let Some(merge_commit) = &data.merge_commit_sha else {
            warn!(number = pr.number.0, "merged pull request has no merge commit");
            return Ok(());
        };

        let mut wanted = vec![merge_commit];
        wanted.extend(data.base_sha.as_ref());
        self.fetch_if_missing(pr, &wanted).await?;

        let platform = &self.ctx.platform;
        let codebase = &pr.codebase_id;
        if platform
            .change_exists(codebase, merge_commit)
            .context("check change exists")?
        {
            debug!(commit = %merge_commit.short(), "merge commit already has a change");
            return Ok(());
        }

        let change = Change {
            id: ChangeId::generate(),
            codebase_id: codebase.clone(),
            commit_id: merge_commit.clone(),
            parent_commit_id: data.base_sha.clone(),
            title: first_line(&workspace.draft_description).to_string(),
            description: workspace.draft_description.clone(),
            user_id: Some(workspace.user_id.clone()),
            workspace_id: Some(workspace.id.clone()),
            created_at: data.merged_at.unwrap_or_else(Utc::now),
        };
        platform.create_change(&change).context("create change")?;

        if let Err(e) = platform.enqueue_change_build(&change.id) {
            warn!(change_id = %change.id, error = %e, "failed to enqueue change build");
        }
        platform
            .unset_up_to_date(codebase)
            .context("unset up to date")?;
        platform
            .move_comments(&workspace.id, &change.id)
            .context("move comments")?;
        platform
            .archive_workspace(&workspace.id, Some(&change.id))
            .context("archive workspace")?;
        info!(change_id = %change.id, commit = %merge_commit.short(), "landed merged pull request");

        self.ctx.notifier.publish(Notification::WorkspaceUpdated {
            workspace_id: workspace.id.clone(),
        });
        self.ctx.notifier.publish(Notification::CodebaseUpdated {
            codebase_id: codebase.clone(),
        });
        Ok(())
    }

    /// Fetches the tracked branch into trunk unless every commit in `shas`
    /// is already present locally.
    async fn fetch_if_missing(&self, pr: &PullRequest, shas: &[&Sha]) -> Result<()> {
        let git = &self.ctx.git;
        let mut missing = false;
        for sha in shas {
            match git
                .interpret(
                    &pr.codebase_id,
                    GitEffect::RevParse {
                        rev: sha.as_str().to_string(),
                    },
                )
                .await
            {
                Ok(_) => {}
                Err(GitError::RefNotFound { .. }) => {
                    missing = true;
                    break;
                }
                Err(source) => {
                    return Err(SyncError::Git {
                        operation: "look up commit",
                        source,
                    });
                }
            }
        }
        if !missing {
            return Ok(());
        }

        let (repository, installation) = self.repository_for(&pr.codebase_id)?;
        let token = self
            .ctx
            .tokens
            .get_access_token(installation.installation_id, repository.remote_repo_id)
            .await?;
        debug!(branch = %repository.tracked_branch, "merge commit not present, fetching tracked branch");
        git.interpret(
            &pr.codebase_id,
            GitEffect::Fetch {
                url: self
                    .ctx
                    .settings
                    .clone_url(&installation.owner, &repository.name),
                token: GitToken(token.token),
                refspec: format!("+{}:refs/heads/{TRUNK}", repository.tracked_ref()),
            },
        )
        .await
        .and_then(|response| response.into_ok())
        .context("fetch tracked branch")
    }
}
