//! Effect interpreter traits.
//!
//! These traits define how effects are executed. The production
//! implementations are [`OctocrabRemote`](crate::github::OctocrabRemote) and
//! [`CommandGit`](crate::git::CommandGit); tests use scripted mocks.

use std::future::Future;

use crate::git::GitError;
use crate::github::RemoteApiError;
use crate::types::CodebaseId;

use super::git::{GitEffect, GitResponse};
use super::remote::{RemoteAuth, RemoteEffect, RemoteResponse};

/// Interprets remote effects against the remote host's API.
pub trait RemoteInterpreter: Send + Sync {
    /// Execute `effect` acting as `auth`.
    fn interpret(
        &self,
        auth: &RemoteAuth,
        effect: RemoteEffect,
    ) -> impl Future<Output = Result<RemoteResponse, RemoteApiError>> + Send;
}

/// Interprets git effects against a codebase's repository.
///
/// Implementations must serialize writes to the same codebase and may run
/// reads concurrently.
pub trait GitInterpreter: Send + Sync {
    fn interpret(
        &self,
        codebase: &CodebaseId,
        effect: GitEffect,
    ) -> impl Future<Output = Result<GitResponse, GitError>> + Send;
}
