//! Remote effect interpreter using octocrab.
//!
//! Calls go through octocrab's generic REST helpers and are decoded into
//! private `Raw*` structs holding only the fields the sync engine reads, then
//! converted into the effect response types.

use chrono::{DateTime, Utc};
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::effects::{
    InstallationData, InstallationToken, MergeData, PrData, RateLimit, RemoteAuth, RemoteEffect,
    RemoteInterpreter, RemoteResponse, RepoData, RepoPage, TokenPermissions,
};
use crate::types::{InstallationId, PrNumber, RemotePrId, RemotePrState, RemoteRepoId, Sha};

use super::client::OctocrabRemote;
use super::error::RemoteApiError;
use super::retry::{RetryConfig, RetryPolicy, retry_with_backoff};

impl RemoteInterpreter for OctocrabRemote {
    async fn interpret(
        &self,
        auth: &RemoteAuth,
        effect: RemoteEffect,
    ) -> Result<RemoteResponse, RemoteApiError> {
        let policy = retry_policy_for(&effect);
        interpret_remote_effect(self, auth, effect, RetryConfig::DEFAULT, policy).await
    }
}

/// Creating and merging pull requests are not idempotent; everything else is.
pub fn retry_policy_for(effect: &RemoteEffect) -> RetryPolicy {
    match effect {
        RemoteEffect::CreatePullRequest { .. } | RemoteEffect::MergePullRequest { .. } => {
            RetryPolicy::NoRetry
        }
        _ => RetryPolicy::RetryTransient,
    }
}

/// Interprets a remote effect, retrying transient failures per `retry_policy`.
pub async fn interpret_remote_effect(
    remote: &OctocrabRemote,
    auth: &RemoteAuth,
    effect: RemoteEffect,
    retry_config: RetryConfig,
    retry_policy: RetryPolicy,
) -> Result<RemoteResponse, RemoteApiError> {
    let client = remote.client_for(auth)?;
    debug!(effect = effect.name(), ?auth, "interpreting remote effect");
    retry_with_backoff(retry_config, retry_policy, || {
        execute_effect(&client, effect.clone())
    })
    .await
    .into_result()
}

async fn execute_effect(
    client: &Octocrab,
    effect: RemoteEffect,
) -> Result<RemoteResponse, RemoteApiError> {
    match effect {
        RemoteEffect::CreateInstallationToken {
            installation_id,
            repository_id,
            permissions,
        } => create_installation_token(client, installation_id, repository_id, permissions).await,
        RemoteEffect::ListUserInstallations { page, per_page } => {
            list_user_installations(client, page, per_page).await
        }
        RemoteEffect::ListInstallationRepositories {
            installation_id,
            page,
            per_page,
        } => list_installation_repositories(client, installation_id, page, per_page).await,
        RemoteEffect::GetRepository { repository_id } => {
            get_repository(client, repository_id).await
        }
        RemoteEffect::ListCollaborators {
            owner,
            repo,
            page,
            per_page,
        } => list_collaborators(client, &owner, &repo, page, per_page).await,
        RemoteEffect::ListOpenPullRequests {
            owner,
            repo,
            page,
            per_page,
        } => list_open_pull_requests(client, &owner, &repo, page, per_page).await,
        RemoteEffect::GetPullRequest {
            owner,
            repo,
            number,
        } => get_pull_request(client, &owner, &repo, number).await,
        RemoteEffect::CreatePullRequest {
            owner,
            repo,
            title,
            head,
            base,
            body,
        } => create_pull_request(client, &owner, &repo, title, head, base, body).await,
        RemoteEffect::EditPullRequest {
            owner,
            repo,
            number,
            title,
            body,
        } => edit_pull_request(client, &owner, &repo, number, title, body).await,
        RemoteEffect::MergePullRequest {
            owner,
            repo,
            number,
            commit_title,
        } => merge_pull_request(client, &owner, &repo, number, commit_title).await,
    }
}

// ─── Raw API shapes ───

#[derive(Debug, Serialize)]
struct PageParams {
    per_page: u8,
    page: u32,
}

#[derive(Debug, Deserialize)]
struct RawAccount {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RawToken {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct RawInstallation {
    id: u64,
    account: Option<RawAccount>,
}

#[derive(Debug, Deserialize)]
struct RawInstallationList {
    installations: Vec<RawInstallation>,
}

#[derive(Debug, Deserialize)]
struct RawRepo {
    id: u64,
    name: String,
    owner: RawAccount,
    default_branch: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawRepoList {
    total_count: u64,
    repositories: Vec<RawRepo>,
}

#[derive(Debug, Deserialize)]
struct RawRate {
    limit: u64,
    remaining: u64,
    reset: i64,
}

#[derive(Debug, Deserialize)]
struct RawRateResources {
    core: RawRate,
}

#[derive(Debug, Deserialize)]
struct RawRateLimit {
    resources: RawRateResources,
}

#[derive(Debug, Deserialize)]
struct RawBranchRef {
    #[serde(rename = "ref")]
    ref_field: String,
    sha: String,
    user: Option<RawAccount>,
}

#[derive(Debug, Deserialize)]
struct RawPull {
    id: u64,
    number: u64,
    state: String,
    /// Only present on single-PR responses.
    merged: Option<bool>,
    title: Option<String>,
    body: Option<String>,
    user: Option<RawAccount>,
    head: RawBranchRef,
    base: RawBranchRef,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    merged_at: Option<DateTime<Utc>>,
    /// Test merge commit while open, the landed commit once merged.
    merge_commit_sha: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawMergeResult {
    merged: bool,
    message: Option<String>,
}

impl RawRepo {
    fn into_data(self) -> RepoData {
        RepoData {
            id: RemoteRepoId(self.id),
            owner: self.owner.login,
            name: self.name,
            default_branch: self.default_branch.unwrap_or_else(|| "main".to_string()),
        }
    }
}

impl RawPull {
    fn into_data(self) -> Result<PrData, RemoteApiError> {
        let state = match self.state.as_str() {
            "open" => RemotePrState::Open,
            "closed" => RemotePrState::Closed,
            other => {
                return Err(RemoteApiError::permanent_without_source(format!(
                    "pull request {} has unknown state {:?}",
                    self.number, other
                )));
            }
        };
        let head_sha = Sha::parse(&self.head.sha).map_err(|e| {
            RemoteApiError::permanent_without_source(format!("invalid head SHA: {}", e))
        })?;
        Ok(PrData {
            id: RemotePrId(self.id),
            number: PrNumber(self.number),
            state,
            merged: self.merged.unwrap_or(self.merged_at.is_some()),
            title: self.title.unwrap_or_default(),
            body: self.body,
            author_login: self.user.map(|u| u.login),
            head_ref: self.head.ref_field,
            head_sha,
            head_owner: self.head.user.map(|u| u.login),
            base_ref: self.base.ref_field,
            created_at: self.created_at,
            updated_at: self.updated_at,
            closed_at: self.closed_at,
            merged_at: self.merged_at,
            merge_commit_sha: self
                .merge_commit_sha
                .and_then(|sha| Sha::parse(sha).ok()),
            base_sha: Sha::parse(&self.base.sha).ok(),
        })
    }
}

// ─── Installations ───

async fn create_installation_token(
    client: &Octocrab,
    installation_id: InstallationId,
    repository_id: RemoteRepoId,
    permissions: TokenPermissions,
) -> Result<RemoteResponse, RemoteApiError> {
    #[derive(Serialize)]
    struct TokenRequest {
        repository_ids: Vec<u64>,
        permissions: TokenPermissions,
    }

    let url = format!("/app/installations/{}/access_tokens", installation_id.0);
    let request = TokenRequest {
        repository_ids: vec![repository_id.0],
        permissions,
    };
    let raw: RawToken = client
        .post(&url, Some(&request))
        .await
        .map_err(RemoteApiError::from_octocrab)?;

    Ok(RemoteResponse::InstallationToken(InstallationToken {
        token: raw.token,
        expires_at: raw.expires_at,
    }))
}

async fn list_user_installations(
    client: &Octocrab,
    page: u32,
    per_page: u8,
) -> Result<RemoteResponse, RemoteApiError> {
    let raw: RawInstallationList = client
        .get("/user/installations", Some(&PageParams { per_page, page }))
        .await
        .map_err(RemoteApiError::from_octocrab)?;

    Ok(RemoteResponse::Installations(
        raw.installations
            .into_iter()
            .map(|i| InstallationData {
                id: InstallationId(i.id),
                account_login: i.account.map(|a| a.login).unwrap_or_default(),
            })
            .collect(),
    ))
}

async fn list_installation_repositories(
    client: &Octocrab,
    installation_id: InstallationId,
    page: u32,
    per_page: u8,
) -> Result<RemoteResponse, RemoteApiError> {
    let url = format!("/user/installations/{}/repositories", installation_id.0);
    let raw: RawRepoList = client
        .get(&url, Some(&PageParams { per_page, page }))
        .await
        .map_err(RemoteApiError::from_octocrab)?;

    // Rate-limit state is informational; a failure to read it is not an error.
    let rate_limit = match client.get::<RawRateLimit, _, ()>("/rate_limit", None).await {
        Ok(raw) => Some(RateLimit {
            limit: raw.resources.core.limit,
            remaining: raw.resources.core.remaining,
            reset: raw.resources.core.reset,
        }),
        Err(e) => {
            debug!(error = %e, "could not read rate limit");
            None
        }
    };

    Ok(RemoteResponse::RepoPage(RepoPage {
        repositories: raw.repositories.into_iter().map(RawRepo::into_data).collect(),
        total_count: raw.total_count,
        rate_limit,
    }))
}

// ─── Repositories ───

async fn get_repository(
    client: &Octocrab,
    repository_id: RemoteRepoId,
) -> Result<RemoteResponse, RemoteApiError> {
    let url = format!("/repositories/{}", repository_id.0);
    let raw: RawRepo = client
        .get(&url, None::<&()>)
        .await
        .map_err(RemoteApiError::from_octocrab)?;
    Ok(RemoteResponse::Repository(raw.into_data()))
}

async fn list_collaborators(
    client: &Octocrab,
    owner: &str,
    repo: &str,
    page: u32,
    per_page: u8,
) -> Result<RemoteResponse, RemoteApiError> {
    let url = format!("/repos/{}/{}/collaborators", owner, repo);
    let raw: Vec<RawAccount> = client
        .get(&url, Some(&PageParams { per_page, page }))
        .await
        .map_err(RemoteApiError::from_octocrab)?;
    Ok(RemoteResponse::Collaborators(
        raw.into_iter().map(|a| a.login).collect(),
    ))
}

// ─── Pull requests ───

async fn list_open_pull_requests(
    client: &Octocrab,
    owner: &str,
    repo: &str,
    page: u32,
    per_page: u8,
) -> Result<RemoteResponse, RemoteApiError> {
    #[derive(Serialize)]
    struct ListParams {
        state: &'static str,
        per_page: u8,
        page: u32,
    }

    let url = format!("/repos/{}/{}/pulls", owner, repo);
    let raw: Vec<RawPull> = client
        .get(
            &url,
            Some(&ListParams {
                state: "open",
                per_page,
                page,
            }),
        )
        .await
        .map_err(RemoteApiError::from_octocrab)?;

    let mut prs = Vec::with_capacity(raw.len());
    for pull in raw {
        match pull.into_data() {
            Ok(pr) => prs.push(pr),
            Err(e) => tracing::warn!(error = %e, "skipping malformed pull request"),
        }
    }
    Ok(RemoteResponse::PullRequests(prs))
}

async fn get_pull_request(
    client: &Octocrab,
    owner: &str,
    repo: &str,
    number: PrNumber,
) -> Result<RemoteResponse, RemoteApiError> {
    let url = format!("/repos/{}/{}/pulls/{}", owner, repo, number.0);
    let raw: RawPull = client
        .get(&url, None::<&()>)
        .await
        .map_err(RemoteApiError::from_octocrab)?;
    Ok(RemoteResponse::PullRequest(raw.into_data()?))
}

async fn create_pull_request(
    client: &Octocrab,
    owner: &str,
    repo: &str,
    title: String,
    head: String,
    base: String,
    body: String,
) -> Result<RemoteResponse, RemoteApiError> {
    #[derive(Serialize)]
    struct CreateRequest {
        title: String,
        head: String,
        base: String,
        body: String,
    }

    let url = format!("/repos/{}/{}/pulls", owner, repo);
    let raw: RawPull = client
        .post(
            &url,
            Some(&CreateRequest {
                title,
                head,
                base,
                body,
            }),
        )
        .await
        .map_err(RemoteApiError::from_octocrab)?;
    Ok(RemoteResponse::PullRequest(raw.into_data()?))
}

async fn edit_pull_request(
    client: &Octocrab,
    owner: &str,
    repo: &str,
    number: PrNumber,
    title: String,
    body: String,
) -> Result<RemoteResponse, RemoteApiError> {
    #[derive(Serialize)]
    struct EditRequest {
        title: String,
        body: String,
    }

    let url = format!("/repos/{}/{}/pulls/{}", owner, repo, number.0);
    let raw: RawPull = client
        .patch(&url, Some(&EditRequest { title, body }))
        .await
        .map_err(RemoteApiError::from_octocrab)?;
    Ok(RemoteResponse::PullRequest(raw.into_data()?))
}

async fn merge_pull_request(
    client: &Octocrab,
    owner: &str,
    repo: &str,
    number: PrNumber,
    commit_title: String,
) -> Result<RemoteResponse, RemoteApiError> {
    #[derive(Serialize)]
    struct MergeRequest {
        commit_title: String,
        merge_method: &'static str,
    }

    let url = format!("/repos/{}/{}/pulls/{}/merge", owner, repo, number.0);
    let raw: RawMergeResult = client
        .put(
            &url,
            Some(&MergeRequest {
                commit_title,
                merge_method: "merge",
            }),
        )
        .await
        .map_err(RemoteApiError::from_merge_octocrab)?;

    Ok(RemoteResponse::Merge(MergeData {
        merged: raw.merged,
        message: raw.message,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_pull(state: &str, merged: Option<bool>, merged_at: Option<&str>) -> RawPull {
        let json = serde_json::json!({
            "id": 900,
            "number": 12,
            "state": state,
            "merged": merged,
            "title": "Add widgets",
            "body": null,
            "user": {"login": "octocat"},
            "head": {"ref": "feature", "sha": "a".repeat(40), "user": {"login": "acme"}},
            "base": {"ref": "main", "sha": "b".repeat(40), "user": {"login": "acme"}},
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": null,
            "closed_at": null,
            "merged_at": merged_at,
            "merge_commit_sha": merged_at.map(|_| "c".repeat(40)),
        });
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn raw_pull_conversion() {
        let pr = raw_pull("open", None, None).into_data().unwrap();
        assert_eq!(pr.id, RemotePrId(900));
        assert_eq!(pr.number, PrNumber(12));
        assert_eq!(pr.state, RemotePrState::Open);
        assert!(!pr.merged);
        assert_eq!(pr.author_login.as_deref(), Some("octocat"));
        assert_eq!(pr.head_owner.as_deref(), Some("acme"));
    }

    #[test]
    fn merged_falls_back_to_merged_at() {
        let pr = raw_pull("closed", None, Some("2024-01-02T00:00:00Z"))
            .into_data()
            .unwrap();
        assert!(pr.merged);
        assert_eq!(pr.merge_commit_sha, Some(Sha::parse("c".repeat(40)).unwrap()));
        assert_eq!(pr.base_sha, Some(Sha::parse("b".repeat(40)).unwrap()));
        let pr = raw_pull("closed", Some(false), None).into_data().unwrap();
        assert_eq!(pr.merge_commit_sha, None);
        assert!(!pr.merged);
    }

    #[test]
    fn unknown_state_is_rejected() {
        assert!(raw_pull("draft", None, None).into_data().is_err());
    }

    #[test]
    fn merge_and_create_are_not_retried() {
        let merge = RemoteEffect::MergePullRequest {
            owner: "o".into(),
            repo: "r".into(),
            number: PrNumber(1),
            commit_title: "t".into(),
        };
        assert_eq!(retry_policy_for(&merge), RetryPolicy::NoRetry);
        let get = RemoteEffect::GetRepository {
            repository_id: RemoteRepoId(1),
        };
        assert_eq!(retry_policy_for(&get), RetryPolicy::RetryTransient);
    }
}
