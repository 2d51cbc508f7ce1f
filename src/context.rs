//! Dependencies shared by the sync services.

use std::sync::Arc;

use crate::effects::RemoteInterpreter;
use crate::notify::Notifier;
use crate::platform::Platform;
use crate::store::SyncStore;
use crate::tokens::TokenManager;

/// Where the remote host and the platform live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Host serving git over HTTPS, e.g. `github.com`.
    pub git_host: String,
    /// Public URL of the platform, linked from pull request bodies.
    pub platform_url: String,
}

impl SyncSettings {
    /// `https://<host>/<owner>/<name>.git`
    pub fn clone_url(&self, owner: &str, name: &str) -> String {
        format!("https://{}/{}/{}.git", self.git_host, owner, name)
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            git_host: "github.com".to_string(),
            platform_url: "http://localhost:3000".to_string(),
        }
    }
}

/// Everything a sync service talks to. Cheap to clone.
pub struct SyncContext<R, G> {
    pub store: Arc<dyn SyncStore>,
    pub platform: Arc<dyn Platform>,
    pub remote: Arc<R>,
    pub git: Arc<G>,
    pub tokens: TokenManager<R>,
    pub notifier: Arc<Notifier>,
    pub settings: SyncSettings,
}

impl<R: RemoteInterpreter, G> SyncContext<R, G> {
    pub fn new(
        store: Arc<dyn SyncStore>,
        platform: Arc<dyn Platform>,
        remote: Arc<R>,
        git: Arc<G>,
        notifier: Arc<Notifier>,
        settings: SyncSettings,
    ) -> Self {
        let tokens = TokenManager::new(Arc::clone(&store), Arc::clone(&remote));
        Self {
            store,
            platform,
            remote,
            git,
            tokens,
            notifier,
            settings,
        }
    }
}

impl<R, G> Clone for SyncContext<R, G> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            platform: Arc::clone(&self.platform),
            remote: Arc::clone(&self.remote),
            git: Arc::clone(&self.git),
            tokens: self.tokens.clone(),
            notifier: Arc::clone(&self.notifier),
            settings: self.settings.clone(),
        }
    }
}
