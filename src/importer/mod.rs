//! Installation and repository importer.
//!
//! A repository granted to the app becomes a not-ready codebase plus a
//! partial [`Repository`] row, and a clone job is queued. The clone worker
//! ([`ImporterService::clone_repository`]) fills in the rest. Re-installing a
//! repository that is already tracked only reactivates it.

mod access;
mod clone;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};

use crate::context::SyncContext;
use crate::error::{Context, Result};
use crate::platform::{CloneJob, Job};
use crate::types::{
    Installation, InstallationId, InstallationStatus, Repository, RepositoryStatus, UserId,
};
use crate::webhooks::{
    InstallationAction, InstallationEvent, InstallationRepositoriesEvent, RepoRef,
    RepositorySelection,
};

pub struct ImporterService<R, G> {
    ctx: SyncContext<R, G>,
}

impl<R, G> Clone for ImporterService<R, G> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
        }
    }
}

impl<R, G> ImporterService<R, G> {
    pub fn new(ctx: SyncContext<R, G>) -> Self {
        Self { ctx }
    }

    // ─── Webhooks ───

    /// Upserts the installation and, for `created`, imports its repositories.
    #[instrument(skip(self, event), fields(installation_id = %event.installation_id, action = ?event.action))]
    pub fn handle_installation(&self, event: &InstallationEvent) -> Result<()> {
        if event.action == InstallationAction::Other {
            debug!("ignoring installation action");
            return Ok(());
        }

        let now = Utc::now();
        let existing = self
            .ctx
            .store
            .get_installation(event.installation_id)
            .context("get installation")?;
        let is_new = existing.is_none();
        let mut installation = existing
            .unwrap_or_else(|| Installation::new(event.installation_id, &event.account_login, now));
        installation.owner.clone_from(&event.account_login);
        installation.set_status(
            match event.action {
                InstallationAction::Deleted => InstallationStatus::Uninstalled,
                _ => InstallationStatus::Active,
            },
            now,
        );
        if matches!(
            event.action,
            InstallationAction::Created | InstallationAction::NewPermissionsAccepted
        ) {
            installation.has_workflows_permission = true;
        }

        if is_new {
            self.ctx
                .store
                .insert_installation(&installation)
                .context("insert installation")?;
        } else {
            self.ctx
                .store
                .update_installation(&installation)
                .context("update installation")?;
        }
        info!(status = ?installation.status, is_new, "installation saved");

        if event.action != InstallationAction::Created {
            return Ok(());
        }
        let sender = self.sender(event.sender_login.as_deref())?;
        for repo in &event.repositories {
            self.handle_installed_repository(&installation, repo, sender.as_ref())?;
        }
        Ok(())
    }

    /// Imports added repositories and marks removed ones uninstalled.
    #[instrument(skip(self, event), fields(installation_id = %event.installation_id))]
    pub fn handle_installation_repositories(
        &self,
        event: &InstallationRepositoriesEvent,
    ) -> Result<()> {
        let installation = self.ensure_installation(event.installation_id, &event.account_login)?;

        if event.repository_selection == RepositorySelection::Other {
            debug!("unknown repository selection, ignoring");
            return Ok(());
        }

        let sender = self.sender(event.sender_login.as_deref())?;
        for repo in &event.repositories_added {
            self.handle_installed_repository(&installation, repo, sender.as_ref())?;
        }

        for repo in &event.repositories_removed {
            if let Err(e) = self.mark_uninstalled(installation.installation_id, repo) {
                warn!(repository_id = %repo.id, error = %e, "failed to mark repository uninstalled");
            }
        }
        Ok(())
    }

    /// Tracks one repository the app was granted access to.
    ///
    /// Idempotent: a repository that is already tracked is only reactivated,
    /// and its clone is queued again if it never reached the job queue.
    #[instrument(skip(self, installation, sender), fields(installation_id = %installation.installation_id, repository_id = %repo.id))]
    pub fn handle_installed_repository(
        &self,
        installation: &Installation,
        repo: &RepoRef,
        sender: Option<&UserId>,
    ) -> Result<()> {
        let now = Utc::now();
        if let Some(mut existing) = self
            .ctx
            .store
            .get_repository(installation.installation_id, repo.id)
            .context("get repository")?
        {
            let codebase = self
                .ctx
                .platform
                .get_codebase(&existing.codebase_id)
                .context("get codebase")?;
            if codebase.as_ref().is_some_and(|codebase| codebase.archived) {
                self.ctx
                    .platform
                    .unarchive_codebase(&existing.codebase_id)
                    .context("unarchive codebase")?;
                info!(codebase_id = %existing.codebase_id, "unarchived codebase");
            }
            if existing.is_uninstalled() {
                existing.set_status(RepositoryStatus::Active, now);
                self.ctx
                    .store
                    .update_repository(&existing)
                    .context("reactivate repository")?;
                info!(codebase_id = %existing.codebase_id, "repository reinstalled");
            }
            let cloned = codebase.is_some_and(|codebase| codebase.is_ready);
            if !cloned && existing.clone_queued_at.is_none() {
                info!(codebase_id = %existing.codebase_id, "codebase was never cloned, queueing clone");
                self.queue_clone(&mut existing, sender)?;
            }
            return Ok(());
        }

        let codebase = self
            .ctx
            .platform
            .create_codebase(&repo.name)
            .context("create codebase")?;
        let mut repository = Repository::partial(
            installation.installation_id,
            repo.id,
            &repo.name,
            codebase.id.clone(),
            now,
        );
        self.ctx
            .store
            .insert_repository(&repository)
            .context("insert repository")?;

        if let Some(user) = sender {
            self.ctx
                .platform
                .add_member(&codebase.id, user)
                .context("add sender to codebase")?;
        }

        self.queue_clone(&mut repository, sender)?;
        info!(codebase_id = %codebase.id, name = %repo.name, "created codebase, clone queued");
        Ok(())
    }

    /// Queues the clone job, marking the row first so the clone worker never
    /// sees it unmarked. The mark is undone if the queue rejects the job.
    fn queue_clone(&self, repository: &mut Repository, sender: Option<&UserId>) -> Result<()> {
        repository.clone_queued_at = Some(Utc::now());
        self.ctx
            .store
            .update_repository(repository)
            .context("mark clone queued")?;

        let queued = self.ctx.platform.enqueue(Job::Clone(CloneJob {
            codebase_id: repository.codebase_id.clone(),
            installation_id: repository.installation_id,
            remote_repo_id: repository.remote_repo_id,
            sender: sender.cloned(),
        }));
        if queued.is_err() {
            repository.clone_queued_at = None;
            if let Err(e) = self.ctx.store.update_repository(repository) {
                warn!(error = %e, "failed to unmark clone after enqueue failure");
            }
        }
        queued.context("enqueue clone")
    }

    /// Forgets that a clone was queued, after it failed, so the next
    /// installation event for the repository queues it again.
    pub fn release_clone(&self, job: &CloneJob) -> Result<()> {
        let Some(mut repository) = self
            .ctx
            .store
            .get_repository(job.installation_id, job.remote_repo_id)
            .context("get repository")?
        else {
            return Ok(());
        };
        repository.clone_queued_at = None;
        self.ctx
            .store
            .update_repository(&repository)
            .context("release clone")
    }

    fn mark_uninstalled(&self, installation_id: InstallationId, repo: &RepoRef) -> Result<()> {
        let Some(mut repository) = self
            .ctx
            .store
            .get_repository(installation_id, repo.id)
            .context("get repository")?
        else {
            debug!(repository_id = %repo.id, "removed repository was not tracked");
            return Ok(());
        };
        repository.set_status(RepositoryStatus::Uninstalled, Utc::now());
        self.ctx
            .store
            .update_repository(&repository)
            .context("mark repository uninstalled")?;
        info!(codebase_id = %repository.codebase_id, "repository uninstalled");
        Ok(())
    }

    /// The installation row, created if the `installation` webhook was missed.
    fn ensure_installation(
        &self,
        installation_id: InstallationId,
        owner: &str,
    ) -> Result<Installation> {
        if let Some(installation) = self
            .ctx
            .store
            .get_installation(installation_id)
            .context("get installation")?
        {
            return Ok(installation);
        }
        let installation = Installation::new(installation_id, owner, Utc::now());
        self.ctx
            .store
            .insert_installation(&installation)
            .context("insert installation")?;
        info!(installation_id = %installation_id, "created missing installation");
        Ok(installation)
    }

    /// The platform user behind a remote login, if they have linked it.
    fn sender(&self, login: Option<&str>) -> Result<Option<UserId>> {
        let Some(login) = login else {
            return Ok(None);
        };
        self.ctx
            .platform
            .user_by_remote_login(login)
            .context("find user by remote login")
    }
}
