//! Pull request tracking records and the pull request state machine.
//!
//! The platform tracks a remote pull request with one of four states:
//!
//! ```text
//!            merge attempt             confirmed merged
//!   Open ─────────────────► Merging ───────────────────► Merged (terminal)
//!    ▲ │ ◄───────────────── rollback                        ▲
//!    │ │ closed & !merged                                   │ closed & merged
//!    │ ▼                                                    │
//!   Closed ─────────────────────────────────────────────────┘
//! ```
//!
//! Webhooks and direct fetches only ever report `open`, `closed` or
//! `closed & merged`; `Merging` exists purely on the platform side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{
    CodebaseId, PrNumber, RecordId, RemotePrId, RemoteRepoId, Sha, UserId, WorkspaceId,
};

/// Platform-side state of a tracked pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestState {
    /// Open on the remote host.
    Open,
    /// Closed without merging.
    Closed,
    /// A platform-initiated merge is in flight.
    Merging,
    /// Merged on the remote host. Terminal.
    Merged,
}

impl PullRequestState {
    /// Derives the state the remote host reports for a pull request.
    ///
    /// `open` maps to `Open`; `closed` maps to `Merged` when the merged flag
    /// is set and to `Closed` otherwise.
    pub fn from_remote(remote_state: RemotePrState, merged: bool) -> Self {
        match (remote_state, merged) {
            (RemotePrState::Open, _) => PullRequestState::Open,
            (RemotePrState::Closed, true) => PullRequestState::Merged,
            (RemotePrState::Closed, false) => PullRequestState::Closed,
        }
    }

    /// Applies a state observed on the remote host to the current state.
    ///
    /// `Merged` never changes. An `Open` observation while a merge is in
    /// flight keeps `Merging`, so the guard survives unrelated webhooks
    /// (edits, pushes) that arrive mid-merge.
    pub fn apply_observed(self, observed: PullRequestState) -> PullRequestState {
        match (self, observed) {
            (PullRequestState::Merged, _) => PullRequestState::Merged,
            (_, PullRequestState::Merged) => PullRequestState::Merged,
            (PullRequestState::Merging, PullRequestState::Open) => PullRequestState::Merging,
            (_, observed) => observed,
        }
    }

    /// True for states that count as "open" for a workspace.
    pub fn is_open_like(&self) -> bool {
        matches!(self, PullRequestState::Open | PullRequestState::Merging)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PullRequestState::Merged)
    }
}

/// Raw `state` field reported by the remote host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemotePrState {
    Open,
    Closed,
}

/// The platform's tracking record for a remote pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: RecordId,
    pub workspace_id: WorkspaceId,
    pub remote_pr_id: RemotePrId,
    pub remote_repo_id: RemoteRepoId,
    pub created_by: UserId,
    pub number: PrNumber,
    /// Head branch name.
    pub head: String,
    pub head_sha: Option<Sha>,
    /// Base branch name.
    pub base: String,
    pub codebase_id: CodebaseId,
    pub state: PullRequestState,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
    /// The head branch lives in another owner's repository.
    #[serde(default)]
    pub fork: bool,
    /// Imported from the remote host and not yet published from the platform.
    /// While set, the remote side drives the workspace's description and
    /// archival.
    #[serde(default)]
    pub importing: bool,
}

impl PullRequest {
    /// Orders pull requests so the one that best represents a workspace comes
    /// first: open before closed, then non-forks, then newest first.
    pub fn primary_order(a: &PullRequest, b: &PullRequest) -> std::cmp::Ordering {
        b.state
            .is_open_like()
            .cmp(&a.state.is_open_like())
            .then_with(|| a.fork.cmp(&b.fork))
            .then_with(|| b.created_at.cmp(&a.created_at))
    }
}

/// Picks the pull request that represents a workspace.
///
/// Returns `None` for an empty slice.
pub fn primary_pull_request(prs: &[PullRequest]) -> Option<&PullRequest> {
    let mut sorted: Vec<&PullRequest> = prs.iter().collect();
    sorted.sort_by(|a, b| PullRequest::primary_order(a, b));
    sorted.into_iter().next()
}
