//! Process configuration, read from `REPO_SYNC_*` environment variables.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::context::SyncSettings;
use crate::webhooks::WebhookSecret;
use crate::worker::DEFAULT_WORKER_COUNT;

const PREFIX: &str = "REPO_SYNC_";

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_GIT_HOST: &str = "github.com";
pub const DEFAULT_SPOOL_DIR: &str = "spool";
pub const DEFAULT_REPOS_DIR: &str = "repos";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required variable REPO_SYNC_{0}")]
    Missing(&'static str),

    #[error("invalid value for REPO_SYNC_{name}: {reason}")]
    Invalid { name: &'static str, reason: String },

    #[error("failed to read app private key from {path}: {source}")]
    KeyFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Clone)]
pub struct SyncConfig {
    pub app_id: u64,
    pub app_private_key: String,
    pub webhook_secret: String,
    pub listen_addr: SocketAddr,
    pub spool_dir: PathBuf,
    pub repos_dir: PathBuf,
    pub git_host: String,
    pub worker_count: usize,
    pub platform_url: String,
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("app_id", &self.app_id)
            .field("app_private_key", &"[REDACTED]")
            .field("webhook_secret", &"[REDACTED]")
            .field("listen_addr", &self.listen_addr)
            .field("spool_dir", &self.spool_dir)
            .field("repos_dir", &self.repos_dir)
            .field("git_host", &self.git_host)
            .field("worker_count", &self.worker_count)
            .field("platform_url", &self.platform_url)
            .finish()
    }
}

impl SyncConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the configuration through `lookup`, which is given full
    /// variable names (`REPO_SYNC_APP_ID`, ...).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| {
            lookup(&format!("{PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let app_id = parse(
            "APP_ID",
            &var("APP_ID").ok_or(ConfigError::Missing("APP_ID"))?,
        )?;

        let app_private_key = match (var("APP_PRIVATE_KEY"), var("APP_PRIVATE_KEY_FILE")) {
            (Some(pem), _) => pem,
            (None, Some(path)) => {
                let path = PathBuf::from(path);
                std::fs::read_to_string(&path)
                    .map_err(|source| ConfigError::KeyFile { path, source })?
            }
            (None, None) => return Err(ConfigError::Missing("APP_PRIVATE_KEY")),
        };

        let webhook_secret =
            var("WEBHOOK_SECRET").ok_or(ConfigError::Missing("WEBHOOK_SECRET"))?;

        let listen_addr = parse(
            "LISTEN_ADDR",
            &var("LISTEN_ADDR").unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
        )?;

        let worker_count = match var("WORKER_COUNT") {
            Some(raw) => parse::<usize>("WORKER_COUNT", &raw)?,
            None => DEFAULT_WORKER_COUNT,
        };
        if worker_count == 0 {
            return Err(ConfigError::Invalid {
                name: "WORKER_COUNT",
                reason: "must be at least 1".to_string(),
            });
        }

        let defaults = SyncSettings::default();

        Ok(SyncConfig {
            app_id,
            app_private_key,
            webhook_secret,
            listen_addr,
            spool_dir: var("SPOOL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SPOOL_DIR)),
            repos_dir: var("REPOS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_REPOS_DIR)),
            git_host: var("REMOTE_GIT_HOST").unwrap_or_else(|| DEFAULT_GIT_HOST.to_string()),
            worker_count,
            platform_url: var("PLATFORM_URL").unwrap_or(defaults.platform_url),
        })
    }

    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    pub fn with_spool_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spool_dir = dir.into();
        self
    }

    pub fn with_repos_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.repos_dir = dir.into();
        self
    }

    pub fn with_worker_count(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    pub fn settings(&self) -> SyncSettings {
        SyncSettings {
            git_host: self.git_host.clone(),
            platform_url: self.platform_url.clone(),
        }
    }

    pub fn webhook_secret(&self) -> WebhookSecret {
        WebhookSecret::new(self.webhook_secret.as_bytes())
    }
}

fn parse<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })
}
