//! The platform's own domain, as seen by the sync engine.
//!
//! Codebases, workspaces, changes, comments, reviews, builds, commit
//! statuses, user links, snapshots and the background job queue are owned
//! elsewhere in the platform. The sync engine reaches them only through the
//! traits below; [`MemoryPlatform`] implements all of them in-process.

mod memory;

pub use memory::MemoryPlatform;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::types::{
    ChangeId, CodebaseId, InstallationId, RemoteRepoId, Sha, UserId, ViewId, WorkspaceId,
};

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("platform rejected the operation: {0}")]
    Rejected(String),

    #[error("platform backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, PlatformError>;

// ─── Records ───

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Codebase {
    pub id: CodebaseId,
    pub name: String,
    /// False until the initial clone has landed on trunk.
    pub is_ready: bool,
    pub archived: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: WorkspaceId,
    pub codebase_id: CodebaseId,
    pub user_id: UserId,
    pub name: Option<String>,
    pub draft_description: String,
    pub view_id: Option<ViewId>,
    pub up_to_date_with_trunk: bool,
    pub archived: bool,
    /// The change this workspace landed as.
    pub change_id: Option<ChangeId>,
}

/// Input for [`Workspaces::create_workspace`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewWorkspace {
    pub codebase_id: CodebaseId,
    pub user_id: UserId,
    pub name: String,
    /// Rich-text (HTML) description.
    pub draft_description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub id: ChangeId,
    pub codebase_id: CodebaseId,
    pub commit_id: Sha,
    /// The trunk commit the change landed on top of, when known.
    pub parent_commit_id: Option<Sha>,
    pub title: String,
    pub description: String,
    pub user_id: Option<UserId>,
    pub workspace_id: Option<WorkspaceId>,
    pub created_at: DateTime<Utc>,
}

/// A user's linked account on the remote host.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteAccount {
    pub user_id: UserId,
    pub login: String,
    /// Personal OAuth token, used where remote authorship matters.
    pub access_token: String,
}

impl fmt::Debug for RemoteAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteAccount")
            .field("user_id", &self.user_id)
            .field("login", &self.login)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusKind {
    Pending,
    Healthy,
    Failing,
}

/// A CI status reported for a commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStatus {
    pub codebase_id: CodebaseId,
    pub commit_id: Sha,
    /// The trunk commit the change landed on top of, when known.
    pub parent_commit_id: Option<Sha>,
    pub title: String,
    pub kind: StatusKind,
    pub detail_url: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Background jobs the sync engine schedules for itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Job {
    /// Clone a freshly installed repository into its codebase.
    Clone(CloneJob),
    /// Import a user's open pull requests into workspaces.
    ImportPullRequests {
        codebase_id: CodebaseId,
        user_id: UserId,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloneJob {
    pub codebase_id: CodebaseId,
    pub installation_id: InstallationId,
    pub remote_repo_id: RemoteRepoId,
    pub sender: Option<UserId>,
}

// ─── Collaborator traits ───

pub trait Codebases: Send + Sync {
    /// Creates a codebase that is not ready yet.
    fn create_codebase(&self, name: &str) -> Result<Codebase>;

    /// Includes archived codebases.
    fn get_codebase(&self, id: &CodebaseId) -> Result<Option<Codebase>>;

    fn unarchive_codebase(&self, id: &CodebaseId) -> Result<()>;

    fn mark_codebase_ready(&self, id: &CodebaseId) -> Result<()>;

    /// Grants `user` access. Returns `false` if they were already a member.
    fn add_member(&self, codebase: &CodebaseId, user: &UserId) -> Result<bool>;

    fn is_member(&self, codebase: &CodebaseId, user: &UserId) -> Result<bool>;
}

pub trait Workspaces: Send + Sync {
    fn get_workspace(&self, id: &WorkspaceId) -> Result<Option<Workspace>>;

    fn create_workspace(&self, new: NewWorkspace) -> Result<Workspace>;

    fn clear_draft(&self, id: &WorkspaceId) -> Result<()>;

    /// Replaces the rich-text draft description.
    fn set_draft_description(&self, id: &WorkspaceId, description: &str) -> Result<()>;

    /// Archives the workspace, recording the change it landed as, if any.
    fn archive_workspace(&self, id: &WorkspaceId, change: Option<&ChangeId>) -> Result<()>;

    fn unarchive_workspace(&self, id: &WorkspaceId) -> Result<()>;

    fn has_conflicts(&self, id: &WorkspaceId) -> Result<bool>;

    /// Rebases a working view onto the current trunk head.
    fn sync_view_on_trunk(&self, view: &ViewId) -> Result<()>;

    /// Clears the "up to date with trunk" flag on every workspace in the codebase.
    fn unset_up_to_date(&self, codebase: &CodebaseId) -> Result<()>;
}

pub trait Changes: Send + Sync {
    fn change_exists(&self, codebase: &CodebaseId, commit: &Sha) -> Result<bool>;

    fn create_change(&self, change: &Change) -> Result<()>;
}

pub trait Comments: Send + Sync {
    /// Moves the workspace's live comments onto the change.
    fn move_comments(&self, workspace: &WorkspaceId, change: &ChangeId) -> Result<()>;
}

pub trait Reviews: Send + Sync {
    fn dismiss_reviews(&self, workspace: &WorkspaceId) -> Result<()>;
}

pub trait Builds: Send + Sync {
    fn enqueue_change_build(&self, change: &ChangeId) -> Result<()>;
}

pub trait Statuses: Send + Sync {
    fn set_status(&self, status: &CommitStatus) -> Result<()>;
}

pub trait Users: Send + Sync {
    fn linked_account(&self, user: &UserId) -> Result<Option<RemoteAccount>>;

    fn user_by_remote_login(&self, login: &str) -> Result<Option<UserId>>;
}

pub trait Snapshots: Send + Sync {
    /// Captures the content of `branch` as the workspace's working snapshot,
    /// as uncommitted changes on top of the current trunk head.
    fn snapshot_branch(
        &self,
        codebase: &CodebaseId,
        workspace: &WorkspaceId,
        branch: &str,
    ) -> Result<()>;

    /// Writes the workspace's current content as a commit on top of trunk,
    /// pointing the local `branch` at it.
    fn commit_workspace(
        &self,
        codebase: &CodebaseId,
        workspace: &WorkspaceId,
        branch: &str,
    ) -> Result<Sha>;
}

pub trait JobQueue: Send + Sync {
    fn enqueue(&self, job: Job) -> Result<()>;
}

/// Every collaborator the sync engine talks to.
pub trait Platform:
    Codebases
    + Workspaces
    + Changes
    + Comments
    + Reviews
    + Builds
    + Statuses
    + Users
    + Snapshots
    + JobQueue
{
}

impl<T> Platform for T where
    T: Codebases
        + Workspaces
        + Changes
        + Comments
        + Reviews
        + Builds
        + Statuses
        + Users
        + Snapshots
        + JobQueue
{
}
