use tracing::{debug, info, instrument, warn};

use crate::effects::{
    GitEffect, GitInterpreter, GitToken, RemoteAuth, RemoteEffect, RemoteInterpreter, RepoData,
};
use crate::error::{Context, Result};
use crate::notify::Notification;
use crate::platform::{CloneJob, Job};
use crate::types::{CachedToken, CodebaseId, UserId};

use super::ImporterService;

/// Collaborators requested per page.
const COLLABORATORS_PER_PAGE: u8 = 50;

impl<R: RemoteInterpreter, G: GitInterpreter> ImporterService<R, G> {
    /// Clones a freshly installed repository into its codebase and grants
    /// access to its collaborators.
    ///
    /// An installation that has not granted the permissions the token asks
    /// for cannot be cloned; the job succeeds without doing anything.
    #[instrument(skip(self, job), fields(codebase_id = %job.codebase_id, installation_id = %job.installation_id, repository_id = %job.remote_repo_id))]
    pub async fn clone_repository(&self, job: &CloneJob) -> Result<()> {
        let token = match self
            .ctx
            .tokens
            .get_first_access_token(job.installation_id, job.remote_repo_id)
            .await
        {
            Ok(token) => token,
            Err(e) if e.is_permission_denied() || e.is_not_tracked() => {
                warn!(error = %e, "cannot get a token for the repository, skipping clone");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let data = self
            .ctx
            .remote
            .interpret(
                &RemoteAuth::Installation(job.installation_id),
                RemoteEffect::GetRepository {
                    repository_id: job.remote_repo_id,
                },
            )
            .await
            .and_then(|response| response.into_repository())
            .context("get repository details")?;

        let Some(mut repository) = self
            .ctx
            .store
            .get_repository(job.installation_id, job.remote_repo_id)
            .context("get repository")?
        else {
            debug!("repository row is gone, nothing to clone");
            return Ok(());
        };
        repository.name.clone_from(&data.name);
        repository.tracked_branch.clone_from(&data.default_branch);
        repository.access_token = Some(CachedToken {
            token: token.token.clone(),
            expires_at: token.expires_at,
        });
        self.ctx
            .store
            .update_repository(&repository)
            .context("populate repository")?;

        info!(owner = %data.owner, name = %data.name, branch = %data.default_branch, "cloning repository");
        self.ctx
            .git
            .interpret(
                &job.codebase_id,
                GitEffect::Clone {
                    url: self.ctx.settings.clone_url(&data.owner, &data.name),
                    token: GitToken(token.token),
                    branch: data.default_branch.clone(),
                },
            )
            .await
            .and_then(|response| response.into_ok())
            .context("clone repository")?;

        self.ctx
            .platform
            .mark_codebase_ready(&job.codebase_id)
            .context("mark codebase ready")?;

        self.grant_collaborators_access(job, &data).await?;

        self.ctx.notifier.publish(Notification::CodebaseUpdated {
            codebase_id: job.codebase_id.clone(),
        });
        info!("repository cloned, codebase is ready");
        Ok(())
    }

    /// Adds every collaborator with a linked account to the codebase and
    /// queues an import of their open pull requests.
    ///
    /// Collaborators are listed as the sender when they have linked their
    /// account. The installation alone only sees public members.
    async fn grant_collaborators_access(&self, job: &CloneJob, data: &RepoData) -> Result<()> {
        let auth = match &job.sender {
            Some(sender) => self
                .ctx
                .platform
                .linked_account(sender)
                .context("get linked account")?
                .map(|account| RemoteAuth::Personal(account.access_token)),
            None => None,
        }
        .unwrap_or(RemoteAuth::Installation(job.installation_id));

        let mut added_any = false;
        for login in self.list_collaborators(&auth, data).await? {
            let Some(user) = self
                .ctx
                .platform
                .user_by_remote_login(&login)
                .context("find user by remote login")?
            else {
                continue;
            };

            match self.grant(&job.codebase_id, &user) {
                Ok(added) => added_any |= added,
                Err(e) => {
                    warn!(login = %login, error = %e, "failed to grant collaborator access");
                    continue;
                }
            }
        }

        if added_any {
            self.ctx.notifier.publish(Notification::CodebaseUpdated {
                codebase_id: job.codebase_id.clone(),
            });
        }
        Ok(())
    }

    /// Returns whether `user` was newly added.
    fn grant(&self, codebase_id: &CodebaseId, user: &UserId) -> Result<bool> {
        let added = self
            .ctx
            .platform
            .add_member(codebase_id, user)
            .context("add collaborator")?;
        if added {
            info!(user_id = %user, "granted collaborator access");
        }
        if let Err(e) = self
            .ctx
            .platform
            .enqueue(Job::ImportPullRequests {
                codebase_id: codebase_id.clone(),
                user_id: user.clone(),
            })
            .context("enqueue pull request import")
        {
            warn!(user_id = %user, error = %e, "failed to queue pull request import");
        }
        Ok(added)
    }

    async fn list_collaborators(&self, auth: &RemoteAuth, data: &RepoData) -> Result<Vec<String>> {
        let mut logins = Vec::new();
        for page in 1.. {
            let batch = self
                .ctx
                .remote
                .interpret(
                    auth,
                    RemoteEffect::ListCollaborators {
                        owner: data.owner.clone(),
                        repo: data.name.clone(),
                        page,
                        per_page: COLLABORATORS_PER_PAGE,
                    },
                )
                .await
                .and_then(|response| response.into_collaborators())
                .context("list collaborators")?;
            let exhausted = batch.len() < usize::from(COLLABORATORS_PER_PAGE);
            logins.extend(batch);
            if exhausted {
                break;
            }
        }
        Ok(logins)
    }
}
