//! Installation and repository records.
//!
//! Lifecycle is an explicit enum plus a single `status_changed_at` audit
//! timestamp on each record, rather than a set of nullable timestamps.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{CodebaseId, InstallationId, RecordId, RemoteRepoId};

/// Lifecycle of an app installation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallationStatus {
    Active,
    Uninstalled,
}

/// One remote-host app installation. Never hard-deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installation {
    pub id: RecordId,
    pub installation_id: InstallationId,
    /// Login of the account the app is installed on.
    pub owner: String,
    pub created_at: DateTime<Utc>,
    pub status: InstallationStatus,
    pub status_changed_at: DateTime<Utc>,
    /// Whether the installation has accepted the `workflows: write` permission.
    pub has_workflows_permission: bool,
}

impl Installation {
    pub fn new(installation_id: InstallationId, owner: impl Into<String>, now: DateTime<Utc>) -> Self {
        Installation {
            id: RecordId::generate(),
            installation_id,
            owner: owner.into(),
            created_at: now,
            status: InstallationStatus::Active,
            status_changed_at: now,
            has_workflows_permission: true,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == InstallationStatus::Active
    }

    /// Moves to `status`, stamping the audit timestamp only on a real change.
    pub fn set_status(&mut self, status: InstallationStatus, now: DateTime<Utc>) {
        if self.status != status {
            self.status = status;
            self.status_changed_at = now;
        }
    }
}

/// Lifecycle of a repository mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepositoryStatus {
    /// Mapped and in use.
    Active,
    /// The app lost access to the repository. History is kept.
    Uninstalled,
    /// Soft-deleted; excluded from uniqueness checks and lookups.
    Deleted,
}

/// A short-lived installation access token cached on a repository row.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl CachedToken {
    /// Minimum remaining lifetime, in seconds, for a cached token to be handed out.
    pub const FRESHNESS_MARGIN_SECS: i64 = 10 * 60;

    /// True if the token is valid for more than [`Self::FRESHNESS_MARGIN_SECS`].
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now + Duration::seconds(Self::FRESHNESS_MARGIN_SECS)
    }
}

impl fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// 1:1 mapping between a remote repository and a platform codebase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: RecordId,
    pub installation_id: InstallationId,
    pub remote_repo_id: RemoteRepoId,
    /// Bare repository name, without the owner.
    pub name: String,
    pub codebase_id: CodebaseId,
    /// Empty until the clone worker has fetched repository metadata.
    pub tracked_branch: String,
    #[serde(skip_serializing)]
    pub access_token: Option<CachedToken>,
    pub integration_enabled: bool,
    pub remote_is_source_of_truth: bool,
    pub last_push_at: Option<DateTime<Utc>>,
    pub last_push_error: Option<String>,
    pub synced_at: Option<DateTime<Utc>>,
    /// When the job queue accepted the clone. Cleared if the clone fails, so
    /// a replayed installation event queues it again.
    #[serde(default)]
    pub clone_queued_at: Option<DateTime<Utc>>,
    pub status: RepositoryStatus,
    pub status_changed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Repository {
    /// A partial row, created before the clone worker fills in metadata.
    pub fn partial(
        installation_id: InstallationId,
        remote_repo_id: RemoteRepoId,
        name: impl Into<String>,
        codebase_id: CodebaseId,
        now: DateTime<Utc>,
    ) -> Self {
        Repository {
            id: RecordId::generate(),
            installation_id,
            remote_repo_id,
            name: name.into(),
            codebase_id,
            tracked_branch: String::new(),
            access_token: None,
            integration_enabled: true,
            remote_is_source_of_truth: true,
            last_push_at: None,
            last_push_error: None,
            synced_at: None,
            clone_queued_at: None,
            status: RepositoryStatus::Active,
            status_changed_at: now,
            created_at: now,
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.status == RepositoryStatus::Deleted
    }

    pub fn is_uninstalled(&self) -> bool {
        self.status == RepositoryStatus::Uninstalled
    }

    /// `refs/heads/<tracked branch>`.
    pub fn tracked_ref(&self) -> String {
        format!("refs/heads/{}", self.tracked_branch)
    }

    pub fn set_status(&mut self, status: RepositoryStatus, now: DateTime<Utc>) {
        if self.status != status {
            self.status = status;
            self.status_changed_at = now;
        }
    }

    /// Records the outcome of a push to the remote host.
    pub fn record_push(&mut self, error: Option<String>, now: DateTime<Utc>) {
        self.last_push_at = Some(now);
        self.last_push_error = error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    proptest! {
        #[test]
        fn token_freshness_boundary(offset_secs in -3600i64..3600) {
            let now = at(1_700_000_000);
            let token = CachedToken {
                token: "t".into(),
                expires_at: now + Duration::seconds(offset_secs),
            };
            prop_assert_eq!(token.is_fresh(now), offset_secs > 600);
        }
    }

    #[test]
    fn token_debug_is_redacted() {
        let token = CachedToken {
            token: "ghs_secret".into(),
            expires_at: at(0),
        };
        let debug = format!("{:?}", token);
        assert!(!debug.contains("ghs_secret"));
    }

    #[test]
    fn status_change_stamps_time_once() {
        let mut inst = Installation::new(InstallationId(1), "acme", at(10));
        inst.set_status(InstallationStatus::Uninstalled, at(20));
        inst.set_status(InstallationStatus::Uninstalled, at(30));
        assert_eq!(inst.status_changed_at, at(20));
        assert!(!inst.is_active());
    }

    #[test]
    fn tracked_ref_format() {
        let mut repo = Repository::partial(
            InstallationId(1),
            RemoteRepoId(2),
            "widgets",
            CodebaseId::new("cb"),
            at(0),
        );
        repo.tracked_branch = "main".into();
        assert_eq!(repo.tracked_ref(), "refs/heads/main");
    }

    #[test]
    fn serialized_repository_omits_token() {
        let mut repo = Repository::partial(
            InstallationId(1),
            RemoteRepoId(2),
            "widgets",
            CodebaseId::new("cb"),
            at(0),
        );
        repo.access_token = Some(CachedToken {
            token: "ghs_secret".into(),
            expires_at: at(100),
        });
        let json = serde_json::to_string(&repo).unwrap();
        assert!(!json.contains("ghs_secret"));
    }
}
