use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{InstallationStore, PullRequestStore, RepositoryStore, Result, StoreError};
use crate::types::{
    CodebaseId, Installation, InstallationId, PullRequest, PullRequestState, RecordId, RemotePrId,
    RemoteRepoId, Repository, WorkspaceId,
};

#[derive(Debug, Default)]
struct Tables {
    installations: HashMap<InstallationId, Installation>,
    repositories: HashMap<RecordId, Repository>,
    pull_requests: HashMap<RecordId, PullRequest>,
}

/// In-memory store. All three tables sit behind one lock, so every call is
/// atomic with respect to every other.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn installation_count(&self) -> usize {
        self.lock().installations.len()
    }

    /// Non-deleted repositories.
    pub fn repositories(&self) -> Vec<Repository> {
        self.lock()
            .repositories
            .values()
            .filter(|r| !r.is_deleted())
            .cloned()
            .collect()
    }

    pub fn pull_requests(&self) -> Vec<PullRequest> {
        self.lock().pull_requests.values().cloned().collect()
    }
}

impl InstallationStore for MemoryStore {
    fn get_installation(&self, installation_id: InstallationId) -> Result<Option<Installation>> {
        Ok(self.lock().installations.get(&installation_id).cloned())
    }

    fn insert_installation(&self, installation: &Installation) -> Result<()> {
        let mut tables = self.lock();
        if tables
            .installations
            .contains_key(&installation.installation_id)
        {
            return Err(StoreError::Conflict {
                entity: "installation",
                key: installation.installation_id.to_string(),
            });
        }
        tables
            .installations
            .insert(installation.installation_id, installation.clone());
        Ok(())
    }

    fn update_installation(&self, installation: &Installation) -> Result<()> {
        let mut tables = self.lock();
        match tables.installations.get_mut(&installation.installation_id) {
            Some(row) => {
                *row = installation.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "installation",
                key: installation.installation_id.to_string(),
            }),
        }
    }
}

impl RepositoryStore for MemoryStore {
    fn get_repository(
        &self,
        installation_id: InstallationId,
        remote_repo_id: RemoteRepoId,
    ) -> Result<Option<Repository>> {
        Ok(self
            .lock()
            .repositories
            .values()
            .find(|r| {
                !r.is_deleted()
                    && r.installation_id == installation_id
                    && r.remote_repo_id == remote_repo_id
            })
            .cloned())
    }

    fn get_repository_by_codebase(&self, codebase_id: &CodebaseId) -> Result<Option<Repository>> {
        Ok(self
            .lock()
            .repositories
            .values()
            .find(|r| !r.is_deleted() && &r.codebase_id == codebase_id)
            .cloned())
    }

    fn insert_repository(&self, repository: &Repository) -> Result<()> {
        let mut tables = self.lock();
        let clash = tables.repositories.values().any(|r| {
            !r.is_deleted()
                && (r.codebase_id == repository.codebase_id
                    || (r.installation_id == repository.installation_id
                        && r.remote_repo_id == repository.remote_repo_id))
        });
        if clash || tables.repositories.contains_key(&repository.id) {
            return Err(StoreError::Conflict {
                entity: "repository",
                key: format!(
                    "{}/{} ({})",
                    repository.installation_id, repository.remote_repo_id, repository.codebase_id
                ),
            });
        }
        tables
            .repositories
            .insert(repository.id.clone(), repository.clone());
        Ok(())
    }

    fn update_repository(&self, repository: &Repository) -> Result<()> {
        let mut tables = self.lock();
        match tables.repositories.get_mut(&repository.id) {
            Some(row) => {
                *row = repository.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "repository",
                key: repository.id.to_string(),
            }),
        }
    }
}

impl PullRequestStore for MemoryStore {
    fn list_pull_requests_by_remote_id(&self, remote_pr_id: RemotePrId) -> Result<Vec<PullRequest>> {
        Ok(self
            .lock()
            .pull_requests
            .values()
            .filter(|pr| pr.remote_pr_id == remote_pr_id)
            .cloned()
            .collect())
    }

    fn get_pull_request(
        &self,
        remote_pr_id: RemotePrId,
        codebase_id: &CodebaseId,
    ) -> Result<Option<PullRequest>> {
        Ok(self
            .lock()
            .pull_requests
            .values()
            .find(|pr| pr.remote_pr_id == remote_pr_id && &pr.codebase_id == codebase_id)
            .cloned())
    }

    fn list_pull_requests_by_workspace(
        &self,
        workspace_id: &WorkspaceId,
    ) -> Result<Vec<PullRequest>> {
        Ok(self
            .lock()
            .pull_requests
            .values()
            .filter(|pr| &pr.workspace_id == workspace_id)
            .cloned()
            .collect())
    }

    fn list_pull_requests_by_head(
        &self,
        codebase_id: &CodebaseId,
        head: &str,
    ) -> Result<Vec<PullRequest>> {
        Ok(self
            .lock()
            .pull_requests
            .values()
            .filter(|pr| &pr.codebase_id == codebase_id && pr.head == head)
            .cloned()
            .collect())
    }

    fn insert_pull_request(&self, pull_request: &PullRequest) -> Result<()> {
        let mut tables = self.lock();
        let clash = tables.pull_requests.values().any(|pr| {
            pr.remote_pr_id == pull_request.remote_pr_id
                && pr.codebase_id == pull_request.codebase_id
        });
        if clash {
            return Err(StoreError::Conflict {
                entity: "pull request",
                key: format!("{} in {}", pull_request.remote_pr_id, pull_request.codebase_id),
            });
        }
        tables
            .pull_requests
            .insert(pull_request.id.clone(), pull_request.clone());
        Ok(())
    }

    fn update_pull_request(&self, pull_request: &PullRequest) -> Result<()> {
        let mut tables = self.lock();
        match tables.pull_requests.get_mut(&pull_request.id) {
            Some(row) => {
                *row = pull_request.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound {
                entity: "pull request",
                key: pull_request.id.to_string(),
            }),
        }
    }

    fn transition_state(
        &self,
        id: &RecordId,
        from: PullRequestState,
        to: PullRequestState,
    ) -> Result<bool> {
        let mut tables = self.lock();
        let row = tables
            .pull_requests
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound {
                entity: "pull request",
                key: id.to_string(),
            })?;
        if row.state != from {
            return Ok(false);
        }
        row.state = to;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PrNumber, RepositoryStatus, UserId};
    use chrono::{DateTime, Utc};

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn repo(installation: u64, remote: u64, codebase: &str) -> Repository {
        Repository::partial(
            InstallationId(installation),
            RemoteRepoId(remote),
            "widgets",
            CodebaseId::new(codebase),
            now(),
        )
    }

    fn pr(remote: u64, codebase: &str) -> PullRequest {
        PullRequest {
            id: RecordId::generate(),
            workspace_id: WorkspaceId::new("ws"),
            remote_pr_id: RemotePrId(remote),
            remote_repo_id: RemoteRepoId(1),
            created_by: UserId::new("u"),
            number: PrNumber(7),
            head: "feature".into(),
            head_sha: None,
            base: "main".into(),
            codebase_id: CodebaseId::new(codebase),
            state: PullRequestState::Open,
            created_at: now(),
            updated_at: None,
            closed_at: None,
            merged_at: None,
            fork: false,
            importing: false,
        }
    }

    // ─── Repository invariants ───

    #[test]
    fn one_repository_per_codebase() {
        let store = MemoryStore::new();
        store.insert_repository(&repo(1, 10, "cb")).unwrap();
        let err = store.insert_repository(&repo(1, 11, "cb")).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn one_repository_per_installation_and_remote_id() {
        let store = MemoryStore::new();
        store.insert_repository(&repo(1, 10, "a")).unwrap();
        let err = store.insert_repository(&repo(1, 10, "b")).unwrap_err();
        assert!(err.is_conflict());
        // Same remote repo under another installation is fine.
        store.insert_repository(&repo(2, 10, "c")).unwrap();
    }

    #[test]
    fn deleted_rows_free_their_slot() {
        let store = MemoryStore::new();
        let mut first = repo(1, 10, "cb");
        store.insert_repository(&first).unwrap();
        first.set_status(RepositoryStatus::Deleted, now());
        store.update_repository(&first).unwrap();

        assert!(
            store
                .get_repository(InstallationId(1), RemoteRepoId(10))
                .unwrap()
                .is_none()
        );
        store.insert_repository(&repo(1, 10, "cb")).unwrap();
    }

    #[test]
    fn update_unknown_repository_is_not_found() {
        let store = MemoryStore::new();
        let err = store.update_repository(&repo(1, 1, "x")).unwrap_err();
        assert!(err.is_not_found());
    }

    // ─── Pull requests ───

    #[test]
    fn pull_request_unique_per_codebase() {
        let store = MemoryStore::new();
        store.insert_pull_request(&pr(5, "a")).unwrap();
        assert!(store.insert_pull_request(&pr(5, "a")).unwrap_err().is_conflict());
        store.insert_pull_request(&pr(5, "b")).unwrap();
        assert_eq!(
            store
                .list_pull_requests_by_remote_id(RemotePrId(5))
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn transition_state_is_conditional() {
        let store = MemoryStore::new();
        let row = pr(5, "a");
        store.insert_pull_request(&row).unwrap();

        assert!(
            store
                .transition_state(&row.id, PullRequestState::Open, PullRequestState::Merging)
                .unwrap()
        );
        assert!(
            !store
                .transition_state(&row.id, PullRequestState::Open, PullRequestState::Merging)
                .unwrap()
        );
        let stored = store
            .get_pull_request(RemotePrId(5), &CodebaseId::new("a"))
            .unwrap()
            .unwrap();
        assert_eq!(stored.state, PullRequestState::Merging);
    }

    #[test]
    fn installation_insert_conflicts_on_remote_id() {
        let store = MemoryStore::new();
        let inst = Installation::new(InstallationId(3), "acme", now());
        store.insert_installation(&inst).unwrap();
        let again = Installation::new(InstallationId(3), "acme", now());
        assert!(store.insert_installation(&again).unwrap_err().is_conflict());
        assert_eq!(store.installation_count(), 1);
    }
}
