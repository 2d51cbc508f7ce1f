use tracing::{debug, info, instrument};

use crate::effects::{GitEffect, GitInterpreter, GitToken, RemoteInterpreter, TRUNK};
use crate::error::{Context, Result, SyncError};
use crate::types::{ChangeId, CodebaseId, Repository, Sha};

use super::{PushService, push_and_record};

impl<R: RemoteInterpreter, G: GitInterpreter> PushService<R, G> {
    /// Pushes `commit` to `branch` on the remote host so its CI runs.
    ///
    /// Codebases without a repository, or with the integration disabled,
    /// succeed without doing anything.
    #[instrument(skip(self), fields(codebase_id = %codebase_id, commit = %commit.short()))]
    pub async fn create_build(
        &self,
        codebase_id: &CodebaseId,
        commit: &Sha,
        branch: &str,
    ) -> Result<()> {
        let Some(repository) = self
            .ctx
            .store
            .get_repository_by_codebase(codebase_id)
            .context("get repository by codebase")?
        else {
            debug!("codebase has no remote repository");
            return Ok(());
        };
        if !repository.integration_enabled {
            debug!("integration is disabled");
            return Ok(());
        }

        let (url, token) = self.remote_target(&repository).await?;
        let local = format!("push-{commit}");
        let git = self.ctx.git.as_ref();

        git.interpret(
            codebase_id,
            GitEffect::CreateBranch {
                name: local.clone(),
                at: commit.to_string(),
            },
        )
        .await
        .and_then(|response| response.into_ok())
        .context("create build branch")?;

        let pushed = push_and_record(
            self.ctx.store.as_ref(),
            git,
            codebase_id,
            GitEffect::Push {
                url,
                token,
                refspec: format!("+refs/heads/{local}:refs/heads/{branch}"),
            },
        )
        .await;

        let deleted = git
            .interpret(codebase_id, GitEffect::DeleteBranch { name: local })
            .await
            .and_then(|response| response.into_ok())
            .context("delete build branch");
        pushed?;
        deleted?;
        info!(branch, "pushed commit for build");
        Ok(())
    }

    /// Pushes trunk to the tracked branch. Used when the platform is the
    /// source of truth and `change` has just landed.
    #[instrument(skip(self, repository), fields(codebase_id = %repository.codebase_id, change_id = %change_id))]
    pub async fn push(&self, repository: &Repository, change_id: &ChangeId) -> Result<()> {
        let (url, token) = self.remote_target(repository).await?;

        // The token refresh may have rewritten the row.
        let repository = self
            .ctx
            .store
            .get_repository_by_codebase(&repository.codebase_id)
            .context("get repository by codebase")?
            .ok_or_else(|| SyncError::not_tracked("repository for codebase", &repository.codebase_id))?;

        push_and_record(
            self.ctx.store.as_ref(),
            self.ctx.git.as_ref(),
            &repository.codebase_id,
            GitEffect::Push {
                url,
                token,
                refspec: format!("+refs/heads/{TRUNK}:{}", repository.tracked_ref()),
            },
        )
        .await?;
        info!(branch = %repository.tracked_branch, "pushed trunk to remote");
        Ok(())
    }

    /// Clone URL and installation token for a repository.
    async fn remote_target(&self, repository: &Repository) -> Result<(String, GitToken)> {
        let installation = self
            .ctx
            .store
            .get_installation(repository.installation_id)
            .context("get installation")?
            .ok_or_else(|| SyncError::not_tracked("installation", repository.installation_id))?;
        let token = self
            .ctx
            .tokens
            .get_access_token(repository.installation_id, repository.remote_repo_id)
            .await?;
        let url = self
            .ctx
            .settings
            .clone_url(&installation.owner, &repository.name);
        Ok((url, GitToken(token.token)))
    }
}
