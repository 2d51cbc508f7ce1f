//! Octocrab clients for each identity the sync engine acts as.

use octocrab::Octocrab;
use octocrab::models::AppId;

use crate::effects::RemoteAuth;

use super::error::RemoteApiError;

/// Builds octocrab clients for the app, its installations and users.
#[derive(Clone)]
pub struct OctocrabRemote {
    /// Authenticated as the app (JWT).
    app: Octocrab,
}

impl OctocrabRemote {
    /// Creates a remote authenticated as the app with the given PEM key.
    pub fn from_app_key(app_id: u64, private_key_pem: &str) -> Result<Self, RemoteApiError> {
        let key = jsonwebtoken::EncodingKey::from_rsa_pem(private_key_pem.as_bytes()).map_err(
            |e| RemoteApiError::permanent_without_source(format!("invalid app private key: {e}")),
        )?;
        let app = Octocrab::builder()
            .app(AppId(app_id), key)
            .build()
            .map_err(RemoteApiError::from_octocrab)?;
        Ok(Self { app })
    }

    /// Creates a remote from a pre-configured app client.
    pub fn from_octocrab(app: Octocrab) -> Self {
        Self { app }
    }

    /// Returns a client acting as `auth`.
    pub fn client_for(&self, auth: &RemoteAuth) -> Result<Octocrab, RemoteApiError> {
        match auth {
            RemoteAuth::App => Ok(self.app.clone()),
            RemoteAuth::Installation(id) => self
                .app
                .installation(octocrab::models::InstallationId(id.0))
                .map_err(RemoteApiError::from_octocrab),
            RemoteAuth::Personal(token) => Octocrab::builder()
                .personal_token(token.clone())
                .build()
                .map_err(RemoteApiError::from_octocrab),
        }
    }
}

impl std::fmt::Debug for OctocrabRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OctocrabRemote").finish_non_exhaustive()
    }
}
