//! Installation access tokens.
//!
//! Tokens are scoped to exactly one repository and cached on its row. A
//! cached token is handed out while it has more than
//! [`CachedToken::FRESHNESS_MARGIN_SECS`] left; otherwise a new one is minted
//! and written back before it is returned. Concurrent refreshes for the same
//! repository are not coalesced: each mints its own token and the last write
//! wins, which is harmless because every minted token is valid.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, instrument};

use crate::effects::{
    InstallationToken, RemoteAuth, RemoteEffect, RemoteInterpreter, TokenPermissions,
};
use crate::error::{Context, Result, SyncError};
use crate::github::RemoteApiError;
use crate::store::SyncStore;
use crate::types::{CachedToken, Installation, InstallationId, RemoteRepoId};

pub struct TokenManager<R> {
    store: Arc<dyn SyncStore>,
    remote: Arc<R>,
}

impl<R> Clone for TokenManager<R> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            remote: Arc::clone(&self.remote),
        }
    }
}

impl<R: RemoteInterpreter> TokenManager<R> {
    pub fn new(store: Arc<dyn SyncStore>, remote: Arc<R>) -> Self {
        Self { store, remote }
    }

    /// A token for `remote_repo_id`, from the cache when fresh.
    #[instrument(skip(self), fields(installation_id = %installation_id, repository_id = %remote_repo_id))]
    pub async fn get_access_token(
        &self,
        installation_id: InstallationId,
        remote_repo_id: RemoteRepoId,
    ) -> Result<InstallationToken> {
        let installation = self.installation(installation_id)?;
        let repository = self
            .store
            .get_repository(installation_id, remote_repo_id)
            .context("get repository")?
            .ok_or_else(|| SyncError::not_tracked("repository", remote_repo_id))?;

        let now = Utc::now();
        if let Some(cached) = repository.access_token.as_ref().filter(|t| t.is_fresh(now)) {
            debug!("using cached access token");
            return Ok(InstallationToken {
                token: cached.token.clone(),
                expires_at: cached.expires_at,
            });
        }

        let token = self.create_token(&installation, remote_repo_id).await?;

        // Re-read so fields changed while the request was in flight survive.
        let mut repository = self
            .store
            .get_repository(installation_id, remote_repo_id)
            .context("get repository")?
            .ok_or_else(|| SyncError::not_tracked("repository", remote_repo_id))?;
        repository.access_token = Some(CachedToken {
            token: token.token.clone(),
            expires_at: token.expires_at,
        });
        self.store
            .update_repository(&repository)
            .context("store access token")?;
        debug!(expires_at = %token.expires_at, "refreshed access token");
        Ok(token)
    }

    /// A token for a repository that has no row yet. Bypasses the cache.
    #[instrument(skip(self), fields(installation_id = %installation_id, repository_id = %remote_repo_id))]
    pub async fn get_first_access_token(
        &self,
        installation_id: InstallationId,
        remote_repo_id: RemoteRepoId,
    ) -> Result<InstallationToken> {
        let installation = self.installation(installation_id)?;
        self.create_token(&installation, remote_repo_id).await
    }

    fn installation(&self, installation_id: InstallationId) -> Result<Installation> {
        self.store
            .get_installation(installation_id)
            .context("get installation")?
            .ok_or_else(|| SyncError::not_tracked("installation", installation_id))
    }

    async fn create_token(
        &self,
        installation: &Installation,
        remote_repo_id: RemoteRepoId,
    ) -> Result<InstallationToken> {
        let effect = RemoteEffect::CreateInstallationToken {
            installation_id: installation.installation_id,
            repository_id: remote_repo_id,
            permissions: TokenPermissions::sync(installation.has_workflows_permission),
        };
        self.remote
            .interpret(&RemoteAuth::App, effect)
            .await
            .and_then(|response| response.into_installation_token())
            .map_err(token_error)
    }
}

fn token_error(err: RemoteApiError) -> SyncError {
    if err.is_permission_denied() {
        SyncError::PermissionDenied
    } else {
        SyncError::Remote {
            operation: "create installation token",
            source: err,
        }
    }
}
