use tracing::{debug, info, instrument, warn};

use crate::effects::{InstallationData, RemoteAuth, RemoteEffect, RemoteInterpreter, RepoData};
use crate::error::{Context, Result, SyncError};
use crate::notify::Notification;
use crate::types::{InstallationId, UserId};

use super::ImporterService;

const INSTALLATIONS_PER_PAGE: u8 = 100;
const REPOSITORIES_PER_PAGE: u8 = 30;
/// Upper bound on repository pages fetched per installation.
const MAX_REPOSITORY_PAGES: u32 = 100;

impl<R: RemoteInterpreter, G> ImporterService<R, G> {
    /// Grants a user who just linked their remote account access to every
    /// tracked codebase they can see on the remote host.
    ///
    /// A failure for one installation is logged and the rest still run.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn add_user_to_codebases(&self, user_id: &UserId) -> Result<()> {
        let account = self
            .ctx
            .platform
            .linked_account(user_id)
            .context("get linked account")?
            .ok_or_else(|| SyncError::Invalid(format!("user {user_id} has no linked remote account")))?;
        let auth = RemoteAuth::Personal(account.access_token);

        let installations = self.list_user_installations(&auth).await?;
        debug!(count = installations.len(), "user installations");
        for installation in installations {
            if let Err(e) = self
                .add_user_to_installation_codebases(user_id, &auth, installation.id)
                .await
            {
                warn!(installation_id = %installation.id, error = %e, "failed to set codebase access for user");
            }
        }
        Ok(())
    }

    async fn add_user_to_installation_codebases(
        &self,
        user_id: &UserId,
        auth: &RemoteAuth,
        installation_id: InstallationId,
    ) -> Result<()> {
        for repo in self.accessible_repositories(auth, installation_id).await? {
            let Some(repository) = self
                .ctx
                .store
                .get_repository(installation_id, repo.id)
                .context("get repository")?
                .filter(|r| !r.is_uninstalled())
            else {
                continue;
            };
            let added = self
                .ctx
                .platform
                .add_member(&repository.codebase_id, user_id)
                .context("add member")?;
            if added {
                info!(codebase_id = %repository.codebase_id, "granted access from remote permissions");
                self.ctx.notifier.publish(Notification::CodebaseUpdated {
                    codebase_id: repository.codebase_id.clone(),
                });
            }
        }
        Ok(())
    }

    async fn list_user_installations(&self, auth: &RemoteAuth) -> Result<Vec<InstallationData>> {
        let mut installations = Vec::new();
        for page in 1.. {
            let batch = self
                .ctx
                .remote
                .interpret(
                    auth,
                    RemoteEffect::ListUserInstallations {
                        page,
                        per_page: INSTALLATIONS_PER_PAGE,
                    },
                )
                .await
                .and_then(|response| response.into_installations())
                .context("list user installations")?;
            let exhausted = batch.len() < usize::from(INSTALLATIONS_PER_PAGE);
            installations.extend(batch);
            if exhausted {
                break;
            }
        }
        Ok(installations)
    }

    /// Repositories of `installation_id` the authenticated user can access.
    async fn accessible_repositories(
        &self,
        auth: &RemoteAuth,
        installation_id: InstallationId,
    ) -> Result<Vec<RepoData>> {
        let mut repositories = Vec::new();
        for page in 1..=MAX_REPOSITORY_PAGES {
            let batch = self
                .ctx
                .remote
                .interpret(
                    auth,
                    RemoteEffect::ListInstallationRepositories {
                        installation_id,
                        page,
                        per_page: REPOSITORIES_PER_PAGE,
                    },
                )
                .await
                .and_then(|response| response.into_repo_page())
                .context("list installation repositories")?;
            if let Some(rate) = batch.rate_limit {
                info!(
                    installation_id = %installation_id,
                    limit = rate.limit,
                    remaining = rate.remaining,
                    reset = rate.reset,
                    "remote rate limit"
                );
            }
            let empty = batch.repositories.is_empty();
            repositories.extend(batch.repositories);
            if empty || repositories.len() as u64 >= batch.total_count {
                break;
            }
        }
        Ok(repositories)
    }
}
