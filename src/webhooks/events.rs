//! Typed webhook events.
//!
//! Only the fields the sync engine consumes are modeled. Every event carries
//! the installation it was delivered for.
//!
//! # Event Types
//!
//! - `installation` - app installed, uninstalled or permissions accepted
//! - `installation_repositories` - repositories added to or removed from an installation
//! - `push` - a branch moved on the remote
//! - `pull_request` - PR lifecycle
//! - `status` - CI status (legacy Status API)
//! - `workflow_job` - CI job progress (Actions)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::effects::PrData;
use crate::types::{InstallationId, RemoteRepoId, Sha};

/// A parsed webhook event.
///
/// Serialized with an explicit discriminant so a spooled event can be read
/// back without the original headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum WebhookEvent {
    Installation(InstallationEvent),
    InstallationRepositories(InstallationRepositoriesEvent),
    Push(PushEvent),
    PullRequest(PullRequestEvent),
    Status(StatusEvent),
    WorkflowJob(WorkflowJobEvent),
}

impl WebhookEvent {
    /// The `X-GitHub-Event` name this event was parsed from.
    pub fn kind(&self) -> &'static str {
        match self {
            WebhookEvent::Installation(_) => "installation",
            WebhookEvent::InstallationRepositories(_) => "installation_repositories",
            WebhookEvent::Push(_) => "push",
            WebhookEvent::PullRequest(_) => "pull_request",
            WebhookEvent::Status(_) => "status",
            WebhookEvent::WorkflowJob(_) => "workflow_job",
        }
    }

    pub fn installation_id(&self) -> InstallationId {
        match self {
            WebhookEvent::Installation(e) => e.installation_id,
            WebhookEvent::InstallationRepositories(e) => e.installation_id,
            WebhookEvent::Push(e) => e.installation_id,
            WebhookEvent::PullRequest(e) => e.installation_id,
            WebhookEvent::Status(e) => e.installation_id,
            WebhookEvent::WorkflowJob(e) => e.installation_id,
        }
    }
}

/// A repository as listed in installation payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub id: RemoteRepoId,
    /// Bare name, without the owner.
    pub name: String,
}

// ─── installation ───

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallationAction {
    Created,
    Deleted,
    NewPermissionsAccepted,
    /// `suspend`, `unsuspend` and anything newer. Ignored.
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationEvent {
    pub action: InstallationAction,
    pub installation_id: InstallationId,
    /// Login of the account the app is installed on.
    pub account_login: String,
    /// Login of the user who triggered the event.
    pub sender_login: Option<String>,
    /// Repositories granted at install time. Only present on `created`.
    pub repositories: Vec<RepoRef>,
}

// ─── installation_repositories ───

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositorySelection {
    Selected,
    All,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationRepositoriesEvent {
    pub installation_id: InstallationId,
    pub account_login: String,
    pub sender_login: Option<String>,
    pub repository_selection: RepositorySelection,
    pub repositories_added: Vec<RepoRef>,
    pub repositories_removed: Vec<RepoRef>,
}

// ─── push ───

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    pub installation_id: InstallationId,
    pub repository_id: RemoteRepoId,
    /// Full ref that moved, e.g. `refs/heads/main`.
    pub git_ref: String,
    /// New head of the ref. `None` when the ref was deleted.
    pub after: Option<Sha>,
}

// ─── pull_request ───

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestEvent {
    pub installation_id: InstallationId,
    pub repository_id: RemoteRepoId,
    pub action: String,
    pub pull_request: PrData,
}

// ─── status ───

/// State of a commit status (legacy Status API).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitState {
    Pending,
    Success,
    Failure,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub installation_id: InstallationId,
    pub repository_id: RemoteRepoId,
    pub sha: Sha,
    pub state: CommitState,
    /// Status context, e.g. `ci/build`. Used as the status title.
    pub context: String,
    pub target_url: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

// ─── workflow_job ───

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowJobStatus {
    Queued,
    InProgress,
    Completed,
    Waiting,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowConclusion {
    Success,
    Failure,
    TimedOut,
    ActionRequired,
    Cancelled,
    Skipped,
    Neutral,
    Stale,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowJobEvent {
    pub installation_id: InstallationId,
    pub repository_id: RemoteRepoId,
    pub head_sha: Sha,
    /// Job name. Used as the status title.
    pub name: String,
    pub status: WorkflowJobStatus,
    pub conclusion: Option<WorkflowConclusion>,
    pub html_url: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}
