//! Shared test utilities: scripted interpreters and record fixtures.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

use crate::context::{SyncContext, SyncSettings};
use crate::effects::{
    CommitData, GitEffect, GitInterpreter, GitResponse, InstallationToken, PrData, RemoteAuth,
    RemoteEffect, RemoteInterpreter, RemoteResponse,
};
use crate::git::GitError;
use crate::github::RemoteApiError;
use crate::notify::Notifier;
use crate::platform::{Codebase, MemoryPlatform, RemoteAccount, Workspace};
use crate::store::MemoryStore;
use crate::types::{
    CodebaseId, Installation, InstallationId, PrNumber, PullRequest, PullRequestState, RecordId,
    RemotePrId, RemotePrState, RemoteRepoId, Repository, Sha, UserId, WorkspaceId,
};

pub fn arb_sha() -> impl Strategy<Value = Sha> {
    "[0-9a-f]{40}".prop_map(|s| Sha::parse(s).unwrap())
}

pub fn sha(c: char) -> Sha {
    Sha::parse(c.to_string().repeat(40)).unwrap()
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

// ─── MockRemote ───

/// A remote interpreter that answers from per-effect scripts and records
/// every call. An unscripted call fails permanently.
#[derive(Default)]
pub struct MockRemote {
    scripts: Mutex<HashMap<&'static str, VecDeque<Result<RemoteResponse, RemoteApiError>>>>,
    calls: Mutex<Vec<(RemoteAuth, RemoteEffect)>>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful response for the next call to `effect`.
    pub fn respond(&self, effect: &'static str, response: RemoteResponse) {
        self.push(effect, Ok(response));
    }

    pub fn fail(&self, effect: &'static str, error: RemoteApiError) {
        self.push(effect, Err(error));
    }

    fn push(&self, effect: &'static str, result: Result<RemoteResponse, RemoteApiError>) {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(effect)
            .or_default()
            .push_back(result);
    }

    pub fn calls(&self) -> Vec<(RemoteAuth, RemoteEffect)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn calls_named(&self, effect: &str) -> Vec<(RemoteAuth, RemoteEffect)> {
        self.calls()
            .into_iter()
            .filter(|(_, e)| e.name() == effect)
            .collect()
    }
}

impl RemoteInterpreter for MockRemote {
    async fn interpret(
        &self,
        auth: &RemoteAuth,
        effect: RemoteEffect,
    ) -> Result<RemoteResponse, RemoteApiError> {
        let name = effect.name();
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((auth.clone(), effect));
        // Let concurrently joined futures interleave at every remote call.
        tokio::task::yield_now().await;
        let next = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(name)
            .and_then(VecDeque::pop_front);
        next.unwrap_or_else(|| {
            Err(RemoteApiError::permanent_without_source(format!(
                "no scripted response for {name}"
            )))
        })
    }
}

// ─── MockGit ───

/// A git interpreter that records every effect. Unscripted effects succeed
/// with a neutral response.
#[derive(Default)]
pub struct MockGit {
    scripts: Mutex<HashMap<&'static str, VecDeque<Result<GitResponse, GitError>>>>,
    calls: Mutex<Vec<(CodebaseId, GitEffect)>>,
}

impl MockGit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, effect: &'static str, response: GitResponse) {
        self.push(effect, Ok(response));
    }

    pub fn fail(&self, effect: &'static str, error: GitError) {
        self.push(effect, Err(error));
    }

    /// Scripts the next `Log` to return `commits`.
    pub fn log(&self, commits: Vec<CommitData>) {
        self.respond("log", GitResponse::Commits(commits));
    }

    fn push(&self, effect: &'static str, result: Result<GitResponse, GitError>) {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(effect)
            .or_default()
            .push_back(result);
    }

    pub fn calls(&self) -> Vec<(CodebaseId, GitEffect)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn effects(&self) -> Vec<GitEffect> {
        self.calls().into_iter().map(|(_, e)| e).collect()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.calls().iter().map(|(_, e)| e.name()).collect()
    }
}

impl GitInterpreter for MockGit {
    async fn interpret(
        &self,
        codebase: &CodebaseId,
        effect: GitEffect,
    ) -> Result<GitResponse, GitError> {
        let name = effect.name();
        let default = match &effect {
            GitEffect::Log { .. } => GitResponse::Commits(vec![]),
            GitEffect::RevParse { .. } => GitResponse::Sha(sha('f')),
            GitEffect::RemoteBranchExists { .. } => GitResponse::Bool(true),
            _ => GitResponse::Ok,
        };
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((codebase.clone(), effect));
        tokio::task::yield_now().await;
        let next = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(name)
            .and_then(VecDeque::pop_front);
        next.unwrap_or(Ok(default))
    }
}

// ─── Fixtures ───

pub fn installation(id: u64) -> Installation {
    Installation::new(InstallationId(id), "acme", at(0))
}

/// A cloned, enabled repository tracking `main`, remote is source of truth.
pub fn repository(installation_id: u64, remote_repo_id: u64, codebase: &str) -> Repository {
    let mut repo = Repository::partial(
        InstallationId(installation_id),
        RemoteRepoId(remote_repo_id),
        "widgets",
        CodebaseId::new(codebase),
        at(0),
    );
    repo.tracked_branch = "main".to_string();
    repo
}

pub fn codebase(id: &str) -> Codebase {
    Codebase {
        id: CodebaseId::new(id),
        name: "widgets".to_string(),
        is_ready: true,
        archived: false,
    }
}

pub fn workspace(id: &str, codebase: &str, user: &str) -> Workspace {
    Workspace {
        id: WorkspaceId::new(id),
        codebase_id: CodebaseId::new(codebase),
        user_id: UserId::new(user),
        name: Some("Fix the widgets".to_string()),
        draft_description: "Fix the widgets\n\nThey were broken.".to_string(),
        view_id: None,
        up_to_date_with_trunk: true,
        archived: false,
        change_id: None,
    }
}

pub fn account(user: &str, login: &str) -> RemoteAccount {
    RemoteAccount {
        user_id: UserId::new(user),
        login: login.to_string(),
        access_token: format!("gho_{user}"),
    }
}

pub fn token(value: &str) -> RemoteResponse {
    RemoteResponse::InstallationToken(InstallationToken {
        token: value.to_string(),
        expires_at: Utc::now() + chrono::Duration::hours(1),
    })
}

pub fn pr_data(id: u64, number: u64) -> PrData {
    PrData {
        id: RemotePrId(id),
        number: PrNumber(number),
        state: RemotePrState::Open,
        merged: false,
        title: "Fix the widgets".to_string(),
        body: Some("They were **broken**.".to_string()),
        author_login: Some("octocat".to_string()),
        head_ref: format!("sync-pr-ws-{number}"),
        head_sha: sha('a'),
        head_owner: Some("acme".to_string()),
        base_ref: "main".to_string(),
        created_at: Some(at(10)),
        updated_at: Some(at(20)),
        closed_at: None,
        merged_at: None,
        merge_commit_sha: None,
        base_sha: Some(sha('b')),
    }
}

pub fn pull_request(remote_id: u64, codebase: &str, workspace: &str) -> PullRequest {
    PullRequest {
        id: RecordId::generate(),
        workspace_id: WorkspaceId::new(workspace),
        remote_pr_id: RemotePrId(remote_id),
        remote_repo_id: RemoteRepoId(10),
        created_by: UserId::new("u1"),
        number: PrNumber(remote_id),
        head: format!("sync-pr-{workspace}"),
        head_sha: Some(sha('a')),
        base: "main".to_string(),
        codebase_id: CodebaseId::new(codebase),
        state: PullRequestState::Open,
        created_at: at(0),
        updated_at: None,
        closed_at: None,
        merged_at: None,
        fork: false,
        importing: false,
    }
}

/// In-memory collaborators wired into a [`SyncContext`].
pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub platform: Arc<MemoryPlatform>,
    pub remote: Arc<MockRemote>,
    pub git: Arc<MockGit>,
    pub notifier: Arc<Notifier>,
    pub ctx: SyncContext<MockRemote, MockGit>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_platform(MemoryPlatform::new())
    }

    pub fn with_platform(platform: MemoryPlatform) -> Self {
        let store = Arc::new(MemoryStore::new());
        let platform = Arc::new(platform);
        let remote = Arc::new(MockRemote::new());
        let git = Arc::new(MockGit::new());
        let notifier = Arc::new(Notifier::new());
        let ctx = SyncContext::new(
            store.clone(),
            platform.clone(),
            remote.clone(),
            git.clone(),
            notifier.clone(),
            SyncSettings {
                git_host: "github.com".to_string(),
                platform_url: "https://platform.test".to_string(),
            },
        );
        Self {
            store,
            platform,
            remote,
            git,
            notifier,
            ctx,
        }
    }
}
