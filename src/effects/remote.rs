//! Remote host API effect types.
//!
//! Each variant describes one call to the remote host's REST API. The
//! credentials to use travel separately as a [`RemoteAuth`], because the same
//! call (e.g. creating a pull request) must be made as the app, as an
//! installation or as a user depending on who should appear as the author.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::github::RemoteApiError;
use crate::types::{InstallationId, PrNumber, RemotePrId, RemotePrState, RemoteRepoId, Sha};

/// Which identity a remote call is made as.
#[derive(Clone, PartialEq, Eq)]
pub enum RemoteAuth {
    /// The app itself (JWT). Only used to mint installation tokens.
    App,
    /// An installation of the app.
    Installation(InstallationId),
    /// A user's personal token, so the remote host shows them as the author.
    Personal(String),
}

impl fmt::Debug for RemoteAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteAuth::App => f.write_str("App"),
            RemoteAuth::Installation(id) => f.debug_tuple("Installation").field(id).finish(),
            RemoteAuth::Personal(_) => f.write_str("Personal(<redacted>)"),
        }
    }
}

/// Access level for a token permission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Read,
    Write,
}

/// Permissions requested for an installation token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenPermissions {
    pub contents: Access,
    pub pull_requests: Access,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflows: Option<Access>,
}

impl TokenPermissions {
    /// Write access to contents and pull requests, plus workflows when the
    /// installation has granted it.
    pub fn sync(has_workflows_permission: bool) -> Self {
        TokenPermissions {
            contents: Access::Write,
            pull_requests: Access::Write,
            workflows: has_workflows_permission.then_some(Access::Write),
        }
    }
}

/// A remote host API effect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RemoteEffect {
    // ─── Installations ───
    /// Mint an installation token scoped to exactly one repository.
    CreateInstallationToken {
        installation_id: InstallationId,
        repository_id: RemoteRepoId,
        permissions: TokenPermissions,
    },

    /// Installations the authenticated user can access.
    ListUserInstallations { page: u32, per_page: u8 },

    /// Repositories the authenticated user can access through an installation.
    ListInstallationRepositories {
        installation_id: InstallationId,
        page: u32,
        per_page: u8,
    },

    // ─── Repositories ───
    GetRepository { repository_id: RemoteRepoId },

    ListCollaborators {
        owner: String,
        repo: String,
        page: u32,
        per_page: u8,
    },

    // ─── Pull requests ───
    ListOpenPullRequests {
        owner: String,
        repo: String,
        page: u32,
        per_page: u8,
    },

    GetPullRequest {
        owner: String,
        repo: String,
        number: PrNumber,
    },

    CreatePullRequest {
        owner: String,
        repo: String,
        title: String,
        head: String,
        base: String,
        body: String,
    },

    EditPullRequest {
        owner: String,
        repo: String,
        number: PrNumber,
        title: String,
        body: String,
    },

    /// Merge with a merge commit titled `commit_title`.
    MergePullRequest {
        owner: String,
        repo: String,
        number: PrNumber,
        commit_title: String,
    },
}

impl RemoteEffect {
    /// Short operation name for logs and error context.
    pub fn name(&self) -> &'static str {
        match self {
            RemoteEffect::CreateInstallationToken { .. } => "create_installation_token",
            RemoteEffect::ListUserInstallations { .. } => "list_user_installations",
            RemoteEffect::ListInstallationRepositories { .. } => "list_installation_repositories",
            RemoteEffect::GetRepository { .. } => "get_repository",
            RemoteEffect::ListCollaborators { .. } => "list_collaborators",
            RemoteEffect::ListOpenPullRequests { .. } => "list_open_pull_requests",
            RemoteEffect::GetPullRequest { .. } => "get_pull_request",
            RemoteEffect::CreatePullRequest { .. } => "create_pull_request",
            RemoteEffect::EditPullRequest { .. } => "edit_pull_request",
            RemoteEffect::MergePullRequest { .. } => "merge_pull_request",
        }
    }
}

// ─── Response Types ───

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for InstallationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstallationToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoData {
    pub id: RemoteRepoId,
    pub owner: String,
    pub name: String,
    pub default_branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallationData {
    pub id: InstallationId,
    pub account_login: String,
}

/// Pull request fields the sync engine consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrData {
    pub id: RemotePrId,
    pub number: PrNumber,
    pub state: RemotePrState,
    pub merged: bool,
    pub title: String,
    pub body: Option<String>,
    pub author_login: Option<String>,
    pub head_ref: String,
    pub head_sha: Sha,
    /// Owner login of the head repository. Differs from the base owner for forks.
    pub head_owner: Option<String>,
    pub base_ref: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
    /// The commit the remote host landed on the base branch, once merged.
    #[serde(default)]
    pub merge_commit_sha: Option<Sha>,
    /// Tip of the base branch as last seen by the pull request.
    #[serde(default)]
    pub base_sha: Option<Sha>,
}

/// Outcome of a merge call that the remote host accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeData {
    pub merged: bool,
    pub message: Option<String>,
}

/// Core rate-limit state reported by the remote host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
    pub limit: u64,
    pub remaining: u64,
    pub reset: i64,
}

/// One page of repositories, with the rate-limit state after the call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoPage {
    pub repositories: Vec<RepoData>,
    pub total_count: u64,
    pub rate_limit: Option<RateLimit>,
}

/// Response from a remote effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RemoteResponse {
    /// Response to `CreateInstallationToken`.
    InstallationToken(InstallationToken),
    /// Response to `ListUserInstallations`.
    Installations(Vec<InstallationData>),
    /// Response to `ListInstallationRepositories`.
    RepoPage(RepoPage),
    /// Response to `GetRepository`.
    Repository(RepoData),
    /// Response to `ListCollaborators`: logins.
    Collaborators(Vec<String>),
    /// Response to `ListOpenPullRequests`.
    PullRequests(Vec<PrData>),
    /// Response to `GetPullRequest`, `CreatePullRequest` and `EditPullRequest`.
    PullRequest(PrData),
    /// Response to `MergePullRequest`.
    Merge(MergeData),
}

/// Generates typed accessors that unwrap one [`RemoteResponse`] variant.
macro_rules! response_accessors {
    ($($fn_name:ident => $variant:ident($ty:ty)),* $(,)?) => {
        impl RemoteResponse {
            $(
                pub fn $fn_name(self) -> Result<$ty, RemoteApiError> {
                    match self {
                        RemoteResponse::$variant(data) => Ok(data),
                        other => Err(RemoteApiError::unexpected_response(
                            stringify!($variant),
                            other,
                        )),
                    }
                }
            )*
        }
    };
}

response_accessors! {
    into_installation_token => InstallationToken(InstallationToken),
    into_installations => Installations(Vec<InstallationData>),
    into_repo_page => RepoPage(RepoPage),
    into_repository => Repository(RepoData),
    into_collaborators => Collaborators(Vec<String>),
    into_pull_requests => PullRequests(Vec<PrData>),
    into_pull_request => PullRequest(PrData),
    into_merge => Merge(MergeData),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permissions_omit_workflows_when_not_granted() {
        let json = serde_json::to_value(TokenPermissions::sync(false)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"contents": "write", "pull_requests": "write"})
        );
    }

    #[test]
    fn permissions_include_workflows_when_granted() {
        let json = serde_json::to_value(TokenPermissions::sync(true)).unwrap();
        assert_eq!(json["workflows"], "write");
    }

    #[test]
    fn personal_auth_debug_is_redacted() {
        let debug = format!("{:?}", RemoteAuth::Personal("gho_secret".into()));
        assert!(!debug.contains("gho_secret"));
    }

    #[test]
    fn accessor_rejects_wrong_variant() {
        let response = RemoteResponse::Collaborators(vec!["octocat".into()]);
        assert!(response.clone().into_pull_request().is_err());
        assert_eq!(response.into_collaborators().unwrap(), vec!["octocat"]);
    }

    #[test]
    fn effect_serializes_with_type_tag() {
        let effect = RemoteEffect::GetRepository {
            repository_id: RemoteRepoId(42),
        };
        let json = serde_json::to_value(&effect).unwrap();
        assert_eq!(json["type"], "get_repository");
        assert_eq!(json["repository_id"], 42);
    }
}
