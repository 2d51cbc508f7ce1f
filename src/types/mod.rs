//! Core domain types for the sync engine.
//!
//! Identifiers, persisted records and their lifecycle enums.

pub mod ids;
pub mod pr;
pub mod repository;

pub use ids::{
    ChangeId, CodebaseId, DeliveryId, InstallationId, InvalidSha, PrNumber, RecordId, RemotePrId,
    RemoteRepoId, Sha, UserId, ViewId, WorkspaceId,
};
pub use pr::{PullRequest, PullRequestState, RemotePrState, primary_pull_request};
pub use repository::{
    CachedToken, Installation, InstallationStatus, Repository, RepositoryStatus,
};
