//! Handler-level errors.
//!
//! Every sync operation returns [`SyncError`]. The lower layers keep their
//! own error types; they are wrapped here together with the operation that
//! was running, so a dispatcher log line says what failed and why.

use thiserror::Error;

use crate::git::GitError;
use crate::github::RemoteApiError;
use crate::platform::PlatformError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum SyncError {
    /// The entity is not tracked by the platform. Webhook handlers treat this
    /// as a silent no-op.
    #[error("{entity} is not tracked: {key}")]
    NotTracked { entity: &'static str, key: String },

    /// The remote pull request is already imported into the codebase.
    #[error("pull request already imported")]
    AlreadyImported,

    /// The repository's integration is disabled, or the platform is the
    /// source of truth and takes no pull requests.
    #[error("integration is not enabled for this repository")]
    IntegrationNotEnabled,

    /// The remote host refused the request for a reason the user can act on.
    /// `message` is shown verbatim.
    #[error("{message}")]
    RemoteRejected { message: String },

    /// A token was requested with permissions the installation has not
    /// granted.
    #[error("installation has not granted the requested permissions")]
    PermissionDenied,

    /// The platform side is missing something the operation needs.
    #[error("{0}")]
    Invalid(String),

    #[error("{operation}: {source}")]
    Store {
        operation: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("{operation}: {source}")]
    Platform {
        operation: &'static str,
        #[source]
        source: PlatformError,
    },

    #[error("{operation}: {source}")]
    Remote {
        operation: &'static str,
        #[source]
        source: RemoteApiError,
    },

    #[error("{operation}: {source}")]
    Git {
        operation: &'static str,
        #[source]
        source: GitError,
    },
}

impl SyncError {
    pub fn not_tracked(entity: &'static str, key: impl ToString) -> Self {
        SyncError::NotTracked {
            entity,
            key: key.to_string(),
        }
    }

    pub fn is_not_tracked(&self) -> bool {
        matches!(self, SyncError::NotTracked { .. })
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, SyncError::PermissionDenied)
    }

    /// The message to store or show for a failed push: the remote's own text
    /// for user-facing rejections, the full chain otherwise.
    pub fn user_message(&self) -> String {
        match self {
            SyncError::RemoteRejected { message } => message.clone(),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Attaches an operation name to lower-layer errors.
///
/// ```ignore
/// store.get_repository(id, repo).context("get repository")?;
/// ```
pub trait Context<T> {
    fn context(self, operation: &'static str) -> Result<T>;
}

impl<T> Context<T> for std::result::Result<T, StoreError> {
    fn context(self, operation: &'static str) -> Result<T> {
        self.map_err(|source| SyncError::Store { operation, source })
    }
}

impl<T> Context<T> for std::result::Result<T, PlatformError> {
    fn context(self, operation: &'static str) -> Result<T> {
        self.map_err(|source| SyncError::Platform { operation, source })
    }
}

impl<T> Context<T> for std::result::Result<T, RemoteApiError> {
    fn context(self, operation: &'static str) -> Result<T> {
        self.map_err(|source| SyncError::Remote { operation, source })
    }
}

impl<T> Context<T> for std::result::Result<T, GitError> {
    fn context(self, operation: &'static str) -> Result<T> {
        self.map_err(|source| SyncError::Git { operation, source })
    }
}
