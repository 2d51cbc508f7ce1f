//! Trunk synchronization with the remote host.
//!
//! Inbound: a push to the tracked branch is fetched into trunk and every new
//! commit becomes a platform change ([`PushService::handle_push`]).
//! Outbound: trunk is pushed to the tracked branch when the platform is the
//! source of truth ([`PushService::push`]), and commits are pushed to CI
//! branches ([`PushService::create_build`]).

mod metadata;
mod outbound;
mod reconcile;

pub use metadata::{first_line, parse_workspace_id};
pub use reconcile::COMMIT_WINDOW;

use chrono::Utc;

use crate::context::SyncContext;
use crate::effects::{GitEffect, GitInterpreter};
use crate::error::{Context, Result, SyncError};
use crate::store::SyncStore;
use crate::types::CodebaseId;

pub struct PushService<R, G> {
    ctx: SyncContext<R, G>,
}

impl<R, G> Clone for PushService<R, G> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
        }
    }
}

impl<R, G> PushService<R, G> {
    pub fn new(ctx: SyncContext<R, G>) -> Self {
        Self { ctx }
    }
}

/// Runs a push to the remote host and records the outcome on the codebase's
/// repository row, clearing the error on success.
pub(crate) async fn push_and_record<G: GitInterpreter>(
    store: &dyn SyncStore,
    git: &G,
    codebase: &CodebaseId,
    push: GitEffect,
) -> Result<()> {
    let outcome = git
        .interpret(codebase, push)
        .await
        .and_then(|response| response.into_ok())
        .context("push to remote");

    let mut repository = store
        .get_repository_by_codebase(codebase)
        .context("get repository by codebase")?
        .ok_or_else(|| SyncError::not_tracked("repository for codebase", codebase))?;
    repository.record_push(outcome.as_ref().err().map(SyncError::user_message), Utc::now());
    store
        .update_repository(&repository)
        .context("record push")?;
    outcome
}
