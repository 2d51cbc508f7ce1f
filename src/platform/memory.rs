use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;
use tracing::debug;

use super::{
    Builds, Change, Changes, Codebase, Codebases, Comments, CommitStatus, Job, JobQueue,
    NewWorkspace, PlatformError, RemoteAccount, Result, Reviews, Snapshots, Statuses, Users,
    Workspace, Workspaces,
};
use crate::types::{ChangeId, CodebaseId, Sha, UserId, ViewId, WorkspaceId};

#[derive(Debug, Default)]
struct State {
    codebases: HashMap<CodebaseId, Codebase>,
    members: HashMap<CodebaseId, HashSet<UserId>>,
    workspaces: HashMap<WorkspaceId, Workspace>,
    conflicted: HashSet<WorkspaceId>,
    synced_views: Vec<ViewId>,
    changes: Vec<Change>,
    moved_comments: Vec<(WorkspaceId, ChangeId)>,
    dismissed_reviews: Vec<WorkspaceId>,
    builds: Vec<ChangeId>,
    statuses: Vec<CommitStatus>,
    accounts: HashMap<UserId, RemoteAccount>,
    snapshots: Vec<(CodebaseId, WorkspaceId, String)>,
    workspace_commits: Vec<(WorkspaceId, String)>,
    jobs: Vec<Job>,
    rejected_enqueues: usize,
    broken_conflict_checks: bool,
}

/// In-process platform. Jobs are recorded and, when a sender is attached,
/// forwarded to the background job consumer.
#[derive(Debug, Default)]
pub struct MemoryPlatform {
    state: Mutex<State>,
    jobs_tx: Option<mpsc::UnboundedSender<Job>>,
}

impl MemoryPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forwards every enqueued job to `tx`.
    pub fn with_job_sender(mut self, tx: mpsc::UnboundedSender<Job>) -> Self {
        self.jobs_tx = Some(tx);
        self
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ─── Seeding ───

    pub fn insert_codebase(&self, codebase: Codebase) {
        self.lock().codebases.insert(codebase.id.clone(), codebase);
    }

    pub fn insert_workspace(&self, workspace: Workspace) {
        self.lock()
            .workspaces
            .insert(workspace.id.clone(), workspace);
    }

    pub fn link_account(&self, account: RemoteAccount) {
        self.lock()
            .accounts
            .insert(account.user_id.clone(), account);
    }

    pub fn mark_conflicted(&self, workspace: &WorkspaceId) {
        self.lock().conflicted.insert(workspace.clone());
    }

    /// Makes every conflict check fail.
    pub fn break_conflict_checks(&self) {
        self.lock().broken_conflict_checks = true;
    }

    /// Makes the next `count` enqueues fail as if the queue were down.
    pub fn reject_enqueues(&self, count: usize) {
        self.lock().rejected_enqueues = count;
    }

    // ─── Inspection ───

    pub fn codebases(&self) -> Vec<Codebase> {
        self.lock().codebases.values().cloned().collect()
    }

    pub fn members(&self, codebase: &CodebaseId) -> HashSet<UserId> {
        self.lock()
            .members
            .get(codebase)
            .cloned()
            .unwrap_or_default()
    }

    pub fn changes(&self) -> Vec<Change> {
        self.lock().changes.clone()
    }

    pub fn synced_views(&self) -> Vec<ViewId> {
        self.lock().synced_views.clone()
    }

    pub fn moved_comments(&self) -> Vec<(WorkspaceId, ChangeId)> {
        self.lock().moved_comments.clone()
    }

    pub fn dismissed_reviews(&self) -> Vec<WorkspaceId> {
        self.lock().dismissed_reviews.clone()
    }

    pub fn builds(&self) -> Vec<ChangeId> {
        self.lock().builds.clone()
    }

    pub fn statuses(&self) -> Vec<CommitStatus> {
        self.lock().statuses.clone()
    }

    pub fn snapshots(&self) -> Vec<(CodebaseId, WorkspaceId, String)> {
        self.lock().snapshots.clone()
    }

    /// Workspaces committed for publishing, with the branch they landed on.
    pub fn workspace_commits(&self) -> Vec<(WorkspaceId, String)> {
        self.lock().workspace_commits.clone()
    }

    pub fn jobs(&self) -> Vec<Job> {
        self.lock().jobs.clone()
    }

    pub fn workspaces(&self) -> Vec<Workspace> {
        self.lock().workspaces.values().cloned().collect()
    }
}

fn not_found(entity: &'static str, key: impl ToString) -> PlatformError {
    PlatformError::NotFound {
        entity,
        key: key.to_string(),
    }
}

impl Codebases for MemoryPlatform {
    fn create_codebase(&self, name: &str) -> Result<Codebase> {
        let codebase = Codebase {
            id: CodebaseId::generate(),
            name: name.to_string(),
            is_ready: false,
            archived: false,
        };
        self.lock()
            .codebases
            .insert(codebase.id.clone(), codebase.clone());
        Ok(codebase)
    }

    fn get_codebase(&self, id: &CodebaseId) -> Result<Option<Codebase>> {
        Ok(self.lock().codebases.get(id).cloned())
    }

    fn unarchive_codebase(&self, id: &CodebaseId) -> Result<()> {
        let mut state = self.lock();
        let codebase = state
            .codebases
            .get_mut(id)
            .ok_or_else(|| not_found("codebase", id))?;
        codebase.archived = false;
        Ok(())
    }

    fn mark_codebase_ready(&self, id: &CodebaseId) -> Result<()> {
        let mut state = self.lock();
        let codebase = state
            .codebases
            .get_mut(id)
            .ok_or_else(|| not_found("codebase", id))?;
        codebase.is_ready = true;
        Ok(())
    }

    fn add_member(&self, codebase: &CodebaseId, user: &UserId) -> Result<bool> {
        let mut state = self.lock();
        if !state.codebases.contains_key(codebase) {
            return Err(not_found("codebase", codebase));
        }
        Ok(state
            .members
            .entry(codebase.clone())
            .or_default()
            .insert(user.clone()))
    }

    fn is_member(&self, codebase: &CodebaseId, user: &UserId) -> Result<bool> {
        Ok(self
            .lock()
            .members
            .get(codebase)
            .is_some_and(|m| m.contains(user)))
    }
}

impl Workspaces for MemoryPlatform {
    fn get_workspace(&self, id: &WorkspaceId) -> Result<Option<Workspace>> {
        Ok(self.lock().workspaces.get(id).cloned())
    }

    fn create_workspace(&self, new: NewWorkspace) -> Result<Workspace> {
        let workspace = Workspace {
            id: WorkspaceId::generate(),
            codebase_id: new.codebase_id,
            user_id: new.user_id,
            name: Some(new.name),
            draft_description: new.draft_description,
            view_id: None,
            up_to_date_with_trunk: true,
            archived: false,
            change_id: None,
        };
        self.lock()
            .workspaces
            .insert(workspace.id.clone(), workspace.clone());
        Ok(workspace)
    }

    fn clear_draft(&self, id: &WorkspaceId) -> Result<()> {
        let mut state = self.lock();
        let workspace = state
            .workspaces
            .get_mut(id)
            .ok_or_else(|| not_found("workspace", id))?;
        workspace.draft_description.clear();
        Ok(())
    }

    fn set_draft_description(&self, id: &WorkspaceId, description: &str) -> Result<()> {
        let mut state = self.lock();
        let workspace = state
            .workspaces
            .get_mut(id)
            .ok_or_else(|| not_found("workspace", id))?;
        workspace.draft_description = description.to_string();
        Ok(())
    }

    fn archive_workspace(&self, id: &WorkspaceId, change: Option<&ChangeId>) -> Result<()> {
        let mut state = self.lock();
        let workspace = state
            .workspaces
            .get_mut(id)
            .ok_or_else(|| not_found("workspace", id))?;
        workspace.archived = true;
        if let Some(change) = change {
            workspace.change_id = Some(change.clone());
        }
        Ok(())
    }

    fn unarchive_workspace(&self, id: &WorkspaceId) -> Result<()> {
        let mut state = self.lock();
        let workspace = state
            .workspaces
            .get_mut(id)
            .ok_or_else(|| not_found("workspace", id))?;
        workspace.archived = false;
        Ok(())
    }

    fn has_conflicts(&self, id: &WorkspaceId) -> Result<bool> {
        let state = self.lock();
        if state.broken_conflict_checks {
            return Err(PlatformError::Backend("conflict check unavailable".into()));
        }
        Ok(state.conflicted.contains(id))
    }

    fn sync_view_on_trunk(&self, view: &ViewId) -> Result<()> {
        self.lock().synced_views.push(view.clone());
        Ok(())
    }

    fn unset_up_to_date(&self, codebase: &CodebaseId) -> Result<()> {
        let mut state = self.lock();
        for workspace in state.workspaces.values_mut() {
            if &workspace.codebase_id == codebase {
                workspace.up_to_date_with_trunk = false;
            }
        }
        Ok(())
    }
}

impl Changes for MemoryPlatform {
    fn change_exists(&self, codebase: &CodebaseId, commit: &Sha) -> Result<bool> {
        Ok(self
            .lock()
            .changes
            .iter()
            .any(|c| &c.codebase_id == codebase && &c.commit_id == commit))
    }

    fn create_change(&self, change: &Change) -> Result<()> {
        let mut state = self.lock();
        let duplicate = state
            .changes
            .iter()
            .any(|c| c.codebase_id == change.codebase_id && c.commit_id == change.commit_id);
        if duplicate {
            return Err(PlatformError::Rejected(format!(
                "change for {} already exists in {}",
                change.commit_id, change.codebase_id
            )));
        }
        state.changes.push(change.clone());
        Ok(())
    }
}

impl Comments for MemoryPlatform {
    fn move_comments(&self, workspace: &WorkspaceId, change: &ChangeId) -> Result<()> {
        self.lock()
            .moved_comments
            .push((workspace.clone(), change.clone()));
        Ok(())
    }
}

impl Reviews for MemoryPlatform {
    fn dismiss_reviews(&self, workspace: &WorkspaceId) -> Result<()> {
        self.lock().dismissed_reviews.push(workspace.clone());
        Ok(())
    }
}

impl Builds for MemoryPlatform {
    fn enqueue_change_build(&self, change: &ChangeId) -> Result<()> {
        self.lock().builds.push(change.clone());
        Ok(())
    }
}

impl Statuses for MemoryPlatform {
    fn set_status(&self, status: &CommitStatus) -> Result<()> {
        let mut state = self.lock();
        // One status per (commit, title); later reports replace earlier ones.
        state.statuses.retain(|s| {
            !(s.codebase_id == status.codebase_id
                && s.commit_id == status.commit_id
                && s.title == status.title)
        });
        state.statuses.push(status.clone());
        Ok(())
    }
}

impl Users for MemoryPlatform {
    fn linked_account(&self, user: &UserId) -> Result<Option<RemoteAccount>> {
        Ok(self.lock().accounts.get(user).cloned())
    }

    fn user_by_remote_login(&self, login: &str) -> Result<Option<UserId>> {
        Ok(self
            .lock()
            .accounts
            .values()
            .find(|a| a.login.eq_ignore_ascii_case(login))
            .map(|a| a.user_id.clone()))
    }
}

impl Snapshots for MemoryPlatform {
    fn snapshot_branch(
        &self,
        codebase: &CodebaseId,
        workspace: &WorkspaceId,
        branch: &str,
    ) -> Result<()> {
        self.lock()
            .snapshots
            .push((codebase.clone(), workspace.clone(), branch.to_string()));
        Ok(())
    }

    fn commit_workspace(
        &self,
        codebase: &CodebaseId,
        workspace: &WorkspaceId,
        branch: &str,
    ) -> Result<Sha> {
        let mut state = self.lock();
        let found = state
            .workspaces
            .get(workspace)
            .is_some_and(|w| &w.codebase_id == codebase);
        if !found {
            return Err(not_found("workspace", workspace));
        }
        state
            .workspace_commits
            .push((workspace.clone(), branch.to_string()));
        // Deterministic stand-in for the commit the platform would write.
        let digit = state.workspace_commits.len() % 10;
        Ok(Sha::new(digit.to_string().repeat(40)))
    }
}

impl JobQueue for MemoryPlatform {
    fn enqueue(&self, job: Job) -> Result<()> {
        {
            let mut state = self.lock();
            if state.rejected_enqueues > 0 {
                state.rejected_enqueues -= 1;
                return Err(PlatformError::Backend("job queue unavailable".into()));
            }
        }
        if let Some(tx) = &self.jobs_tx {
            tx.send(job.clone())
                .map_err(|_| PlatformError::Backend("job consumer has shut down".into()))?;
        } else {
            debug!(?job, "job recorded without a consumer");
        }
        self.lock().jobs.push(job);
        Ok(())
    }
}
