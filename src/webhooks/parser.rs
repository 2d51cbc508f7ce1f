//! Webhook payload parser.
//!
//! Parses raw webhook JSON into typed [`WebhookEvent`] values.
//!
//! # Parsing Strategy
//!
//! 1. The event type comes from the `X-GitHub-Event` header
//! 2. The payload is parsed according to the event type
//! 3. Unknown event types return `Ok(None)` (ignored, not error)
//! 4. Malformed payloads return `Err` with details
//!
//! Unknown JSON fields are ignored, so the remote host can add fields freely.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;

use crate::effects::PrData;
use crate::types::{InstallationId, PrNumber, RemotePrId, RemotePrState, RemoteRepoId, Sha};

use super::events::{
    CommitState, InstallationAction, InstallationEvent, InstallationRepositoriesEvent,
    PullRequestEvent, PushEvent, RepoRef, RepositorySelection, StatusEvent, WebhookEvent,
    WorkflowConclusion, WorkflowJobEvent, WorkflowJobStatus,
};

/// Event types this parser understands.
pub const SUPPORTED_EVENTS: [&str; 6] = [
    "installation",
    "installation_repositories",
    "push",
    "pull_request",
    "status",
    "workflow_job",
];

#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON deserialization failed (includes missing required fields).
    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Field has invalid value (e.g., malformed SHA, unknown state).
    #[error("invalid field value for {field}: {value}")]
    InvalidField { field: &'static str, value: String },
}

/// Parses a webhook payload into a typed event.
///
/// * `Ok(Some(event))` - a supported event type
/// * `Ok(None)` - unsupported event type, to be ignored
/// * `Err(e)` - malformed payload or missing required fields
pub fn parse_webhook(event_type: &str, payload: &[u8]) -> Result<Option<WebhookEvent>, ParseError> {
    let event = match event_type {
        "installation" => WebhookEvent::Installation(parse_installation(payload)?),
        "installation_repositories" => {
            WebhookEvent::InstallationRepositories(parse_installation_repositories(payload)?)
        }
        "push" => WebhookEvent::Push(parse_push(payload)?),
        "pull_request" => WebhookEvent::PullRequest(parse_pull_request(payload)?),
        "status" => WebhookEvent::Status(parse_status(payload)?),
        "workflow_job" => WebhookEvent::WorkflowJob(parse_workflow_job(payload)?),
        _ => return Ok(None),
    };
    Ok(Some(event))
}

// ─── Shared raw structures ───

#[derive(Debug, Deserialize)]
struct RawInstallation {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RawInstallationWithAccount {
    id: u64,
    account: RawAccount,
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RawRepository {
    id: u64,
}

#[derive(Debug, Deserialize)]
struct RawRepoRef {
    id: u64,
    name: String,
}

impl From<RawRepoRef> for RepoRef {
    fn from(raw: RawRepoRef) -> Self {
        RepoRef {
            id: RemoteRepoId(raw.id),
            name: raw.name,
        }
    }
}

fn parse_sha(field: &'static str, value: &str) -> Result<Sha, ParseError> {
    Sha::parse(value).map_err(|_| ParseError::InvalidField {
        field,
        value: value.to_string(),
    })
}

// ─── installation ───

#[derive(Debug, Deserialize)]
struct RawInstallationPayload {
    action: String,
    installation: RawInstallationWithAccount,
    #[serde(default)]
    repositories: Vec<RawRepoRef>,
    sender: Option<RawAccount>,
}

fn parse_installation(payload: &[u8]) -> Result<InstallationEvent, ParseError> {
    let raw: RawInstallationPayload = serde_json::from_slice(payload)?;
    let action = match raw.action.as_str() {
        "created" => InstallationAction::Created,
        "deleted" => InstallationAction::Deleted,
        "new_permissions_accepted" => InstallationAction::NewPermissionsAccepted,
        _ => InstallationAction::Other,
    };
    Ok(InstallationEvent {
        action,
        installation_id: InstallationId(raw.installation.id),
        account_login: raw.installation.account.login,
        sender_login: raw.sender.map(|s| s.login),
        repositories: raw.repositories.into_iter().map(RepoRef::from).collect(),
    })
}

// ─── installation_repositories ───

#[derive(Debug, Deserialize)]
struct RawInstallationRepositoriesPayload {
    installation: RawInstallationWithAccount,
    repository_selection: String,
    #[serde(default)]
    repositories_added: Vec<RawRepoRef>,
    #[serde(default)]
    repositories_removed: Vec<RawRepoRef>,
    sender: Option<RawAccount>,
}

fn parse_installation_repositories(
    payload: &[u8],
) -> Result<InstallationRepositoriesEvent, ParseError> {
    let raw: RawInstallationRepositoriesPayload = serde_json::from_slice(payload)?;
    let repository_selection = match raw.repository_selection.as_str() {
        "selected" => RepositorySelection::Selected,
        "all" => RepositorySelection::All,
        _ => RepositorySelection::Other,
    };
    Ok(InstallationRepositoriesEvent {
        installation_id: InstallationId(raw.installation.id),
        account_login: raw.installation.account.login,
        sender_login: raw.sender.map(|s| s.login),
        repository_selection,
        repositories_added: raw.repositories_added.into_iter().map(RepoRef::from).collect(),
        repositories_removed: raw
            .repositories_removed
            .into_iter()
            .map(RepoRef::from)
            .collect(),
    })
}

// ─── push ───

#[derive(Debug, Deserialize)]
struct RawPushPayload {
    #[serde(rename = "ref")]
    git_ref: String,
    after: String,
    #[serde(default)]
    deleted: bool,
    repository: RawRepository,
    installation: RawInstallation,
}

fn parse_push(payload: &[u8]) -> Result<PushEvent, ParseError> {
    let raw: RawPushPayload = serde_json::from_slice(payload)?;
    let after = if raw.deleted || raw.after.bytes().all(|b| b == b'0') {
        None
    } else {
        Some(parse_sha("after", &raw.after)?)
    };
    Ok(PushEvent {
        installation_id: InstallationId(raw.installation.id),
        repository_id: RemoteRepoId(raw.repository.id),
        git_ref: raw.git_ref,
        after,
    })
}

// ─── pull_request ───

#[derive(Debug, Deserialize)]
struct RawPullRequestPayload {
    action: String,
    pull_request: RawPullRequest,
    repository: RawRepository,
    installation: RawInstallation,
}

#[derive(Debug, Deserialize)]
struct RawPullRequest {
    id: u64,
    number: u64,
    state: String,
    merged: Option<bool>,
    title: Option<String>,
    body: Option<String>,
    user: Option<RawAccount>,
    head: RawHead,
    base: RawBase,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    merged_at: Option<DateTime<Utc>>,
    merge_commit_sha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawHead {
    #[serde(rename = "ref")]
    ref_name: String,
    sha: String,
    /// `null` when the head repository was deleted.
    repo: Option<RawHeadRepo>,
}

#[derive(Debug, Deserialize)]
struct RawHeadRepo {
    owner: RawAccount,
}

#[derive(Debug, Deserialize)]
struct RawBase {
    #[serde(rename = "ref")]
    ref_name: String,
    sha: Option<String>,
}

fn parse_pull_request(payload: &[u8]) -> Result<PullRequestEvent, ParseError> {
    let raw: RawPullRequestPayload = serde_json::from_slice(payload)?;
    let pr = raw.pull_request;

    let state = match pr.state.as_str() {
        "open" => RemotePrState::Open,
        "closed" => RemotePrState::Closed,
        other => {
            return Err(ParseError::InvalidField {
                field: "pull_request.state",
                value: other.to_string(),
            });
        }
    };
    let head_sha = parse_sha("pull_request.head.sha", &pr.head.sha)?;

    Ok(PullRequestEvent {
        installation_id: InstallationId(raw.installation.id),
        repository_id: RemoteRepoId(raw.repository.id),
        action: raw.action,
        pull_request: PrData {
            id: RemotePrId(pr.id),
            number: PrNumber(pr.number),
            state,
            merged: pr.merged.unwrap_or(pr.merged_at.is_some()),
            title: pr.title.unwrap_or_default(),
            body: pr.body,
            author_login: pr.user.map(|u| u.login),
            head_ref: pr.head.ref_name,
            head_sha,
            head_owner: pr.head.repo.map(|r| r.owner.login),
            base_ref: pr.base.ref_name,
            created_at: pr.created_at,
            updated_at: pr.updated_at,
            closed_at: pr.closed_at,
            merged_at: pr.merged_at,
            merge_commit_sha: pr
                .merge_commit_sha
                .map(|sha| parse_sha("pull_request.merge_commit_sha", &sha))
                .transpose()?,
            base_sha: pr.base.sha.and_then(|sha| Sha::parse(sha).ok()),
        },
    })
}

// ─── status ───

#[derive(Debug, Deserialize)]
struct RawStatusPayload {
    sha: String,
    state: String,
    context: String,
    target_url: Option<String>,
    updated_at: Option<DateTime<Utc>>,
    repository: RawRepository,
    installation: RawInstallation,
}

fn parse_status(payload: &[u8]) -> Result<StatusEvent, ParseError> {
    let raw: RawStatusPayload = serde_json::from_slice(payload)?;

    let state = match raw.state.as_str() {
        "pending" => CommitState::Pending,
        "success" => CommitState::Success,
        "failure" => CommitState::Failure,
        "error" => CommitState::Error,
        other => {
            return Err(ParseError::InvalidField {
                field: "state",
                value: other.to_string(),
            });
        }
    };

    Ok(StatusEvent {
        installation_id: InstallationId(raw.installation.id),
        repository_id: RemoteRepoId(raw.repository.id),
        sha: parse_sha("sha", &raw.sha)?,
        state,
        context: raw.context,
        target_url: raw.target_url,
        updated_at: raw.updated_at,
    })
}

// ─── workflow_job ───

#[derive(Debug, Deserialize)]
struct RawWorkflowJobPayload {
    workflow_job: RawWorkflowJob,
    repository: RawRepository,
    installation: RawInstallation,
}

#[derive(Debug, Deserialize)]
struct RawWorkflowJob {
    head_sha: String,
    name: String,
    status: WorkflowJobStatus,
    conclusion: Option<WorkflowConclusion>,
    html_url: Option<String>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

fn parse_workflow_job(payload: &[u8]) -> Result<WorkflowJobEvent, ParseError> {
    let raw: RawWorkflowJobPayload = serde_json::from_slice(payload)?;
    let job = raw.workflow_job;
    Ok(WorkflowJobEvent {
        installation_id: InstallationId(raw.installation.id),
        repository_id: RemoteRepoId(raw.repository.id),
        head_sha: parse_sha("workflow_job.head_sha", &job.head_sha)?,
        name: job.name,
        status: job.status,
        conclusion: job.conclusion,
        html_url: job.html_url,
        started_at: job.started_at,
        completed_at: job.completed_at,
    })
}
