//! CI results reported by the remote host, recorded as platform commit
//! statuses.
//!
//! | Event | Remote value | Status |
//! |-------|--------------|--------|
//! | `status` | `pending` | Pending |
//! | `status` | `success` | Healthy |
//! | `status` | `failure` / `error` | Failing |
//! | `workflow_job` | `queued` / `in_progress` | Pending |
//! | `workflow_job` | completed, `action_required` | Pending |
//! | `workflow_job` | completed, `failure` / `timed_out` | Failing |
//! | `workflow_job` | completed, `success` | Healthy |
//!
//! Any other workflow job outcome has no status and is only logged.

use chrono::Utc;
use tracing::{debug, instrument, warn};

use crate::context::SyncContext;
use crate::error::{Context, Result};
use crate::platform::{CommitStatus, StatusKind};
use crate::types::{CodebaseId, InstallationId, RemoteRepoId};
use crate::webhooks::{
    CommitState, StatusEvent, WorkflowConclusion, WorkflowJobEvent, WorkflowJobStatus,
};

pub fn commit_status_kind(state: CommitState) -> StatusKind {
    match state {
        CommitState::Pending => StatusKind::Pending,
        CommitState::Success => StatusKind::Healthy,
        CommitState::Failure | CommitState::Error => StatusKind::Failing,
    }
}

/// `None` for outcomes with no meaningful status (cancelled, skipped, ...).
pub fn workflow_job_kind(
    status: WorkflowJobStatus,
    conclusion: Option<WorkflowConclusion>,
) -> Option<StatusKind> {
    match (status, conclusion) {
        (WorkflowJobStatus::Queued | WorkflowJobStatus::InProgress, _) => Some(StatusKind::Pending),
        (WorkflowJobStatus::Completed, Some(WorkflowConclusion::ActionRequired)) => {
            Some(StatusKind::Pending)
        }
        (
            WorkflowJobStatus::Completed,
            Some(WorkflowConclusion::Failure | WorkflowConclusion::TimedOut),
        ) => Some(StatusKind::Failing),
        (WorkflowJobStatus::Completed, Some(WorkflowConclusion::Success)) => {
            Some(StatusKind::Healthy)
        }
        _ => None,
    }
}

pub struct StatusService<R, G> {
    ctx: SyncContext<R, G>,
}

impl<R, G> Clone for StatusService<R, G> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
        }
    }
}

impl<R, G> StatusService<R, G> {
    pub fn new(ctx: SyncContext<R, G>) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self, event), fields(installation_id = %event.installation_id, repository_id = %event.repository_id, sha = %event.sha.short()))]
    pub fn handle_status(&self, event: &StatusEvent) -> Result<()> {
        let Some(codebase_id) = self.tracked_codebase(event.installation_id, event.repository_id)?
        else {
            return Ok(());
        };
        let status = CommitStatus {
            codebase_id,
            commit_id: event.sha.clone(),
            parent_commit_id: None,
            title: event.context.clone(),
            kind: commit_status_kind(event.state),
            detail_url: event.target_url.clone(),
            timestamp: event.updated_at.unwrap_or_else(Utc::now),
        };
        self.ctx
            .platform
            .set_status(&status)
            .context("set commit status")?;
        debug!(title = %status.title, kind = ?status.kind, "recorded status");
        Ok(())
    }

    #[instrument(skip(self, event), fields(installation_id = %event.installation_id, repository_id = %event.repository_id, sha = %event.head_sha.short()))]
    pub fn handle_workflow_job(&self, event: &WorkflowJobEvent) -> Result<()> {
        let Some(codebase_id) = self.tracked_codebase(event.installation_id, event.repository_id)?
        else {
            return Ok(());
        };
        let Some(kind) = workflow_job_kind(event.status, event.conclusion) else {
            warn!(
                job = %event.name,
                status = ?event.status,
                conclusion = ?event.conclusion,
                "workflow job outcome has no status, ignoring"
            );
            return Ok(());
        };
        let status = CommitStatus {
            codebase_id,
            commit_id: event.head_sha.clone(),
            parent_commit_id: None,
            title: event.name.clone(),
            kind,
            detail_url: event.html_url.clone(),
            timestamp: event
                .completed_at
                .or(event.started_at)
                .unwrap_or_else(Utc::now),
        };
        self.ctx
            .platform
            .set_status(&status)
            .context("set commit status")?;
        debug!(title = %status.title, kind = ?status.kind, "recorded workflow job status");
        Ok(())
    }

    fn tracked_codebase(
        &self,
        installation_id: InstallationId,
        repository_id: RemoteRepoId,
    ) -> Result<Option<CodebaseId>> {
        let repository = self
            .ctx
            .store
            .get_repository(installation_id, repository_id)
            .context("get repository")?;
        if repository.is_none() {
            debug!("repository is not tracked");
        }
        Ok(repository.map(|r| r.codebase_id))
    }
}
