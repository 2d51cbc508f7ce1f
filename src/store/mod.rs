//! Persistence for the three tables this subsystem owns: installations,
//! repositories and pull requests.
//!
//! The traits are synchronous and object-safe; handlers hold them as
//! `Arc<dyn SyncStore>`. [`MemoryStore`] is the in-process implementation.
//!
//! Rows are read-then-written without optimistic concurrency, with one
//! exception: [`PullRequestStore::transition_state`] is a conditional update
//! used to guard the `Merging` state.

mod memory;

pub use memory::MemoryStore;

use thiserror::Error;

use crate::types::{
    CodebaseId, Installation, InstallationId, PullRequest, PullRequestState, RecordId, RemotePrId,
    RemoteRepoId, Repository, WorkspaceId,
};

/// Errors from the persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    /// A uniqueness invariant would be violated.
    #[error("{entity} already exists: {key}")]
    Conflict { entity: &'static str, key: String },

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

pub trait InstallationStore: Send + Sync {
    fn get_installation(&self, installation_id: InstallationId) -> Result<Option<Installation>>;

    /// Inserts a new installation. `Conflict` if the remote ID is taken.
    fn insert_installation(&self, installation: &Installation) -> Result<()>;

    fn update_installation(&self, installation: &Installation) -> Result<()>;
}

/// Repository rows. Lookups never return `Deleted` rows.
pub trait RepositoryStore: Send + Sync {
    fn get_repository(
        &self,
        installation_id: InstallationId,
        remote_repo_id: RemoteRepoId,
    ) -> Result<Option<Repository>>;

    fn get_repository_by_codebase(&self, codebase_id: &CodebaseId) -> Result<Option<Repository>>;

    /// Inserts a new row.
    ///
    /// `Conflict` if a non-deleted row already exists for the same codebase
    /// or the same (installation, remote repository).
    fn insert_repository(&self, repository: &Repository) -> Result<()>;

    fn update_repository(&self, repository: &Repository) -> Result<()>;
}

pub trait PullRequestStore: Send + Sync {
    /// All rows tracking a remote pull request, one per codebase at most.
    fn list_pull_requests_by_remote_id(&self, remote_pr_id: RemotePrId) -> Result<Vec<PullRequest>>;

    fn get_pull_request(
        &self,
        remote_pr_id: RemotePrId,
        codebase_id: &CodebaseId,
    ) -> Result<Option<PullRequest>>;

    fn list_pull_requests_by_workspace(&self, workspace_id: &WorkspaceId)
    -> Result<Vec<PullRequest>>;

    /// Rows in the codebase whose head branch is `head`.
    fn list_pull_requests_by_head(
        &self,
        codebase_id: &CodebaseId,
        head: &str,
    ) -> Result<Vec<PullRequest>>;

    /// Inserts a new row. `Conflict` if (remote PR ID, codebase) is taken.
    fn insert_pull_request(&self, pull_request: &PullRequest) -> Result<()>;

    fn update_pull_request(&self, pull_request: &PullRequest) -> Result<()>;

    /// Sets `state = to` only if the current state is `from`.
    ///
    /// Returns `false` (and changes nothing) if the row was in another state.
    fn transition_state(
        &self,
        id: &RecordId,
        from: PullRequestState,
        to: PullRequestState,
    ) -> Result<bool>;
}

/// Everything the sync engine persists.
pub trait SyncStore: InstallationStore + RepositoryStore + PullRequestStore {}

impl<T: InstallationStore + RepositoryStore + PullRequestStore> SyncStore for T {}
