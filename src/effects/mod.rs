//! Effects-as-data for remote API and git operations.
//!
//! Handlers describe what they want done as [`RemoteEffect`]s and
//! [`GitEffect`]s and hand them to an interpreter. This keeps handler logic
//! testable against scripted interpreters and makes every outbound call
//! loggable as data.

pub mod git;
pub mod interpreter;
pub mod remote;

pub use git::{CommitData, GitEffect, GitResponse, GitToken, TRUNK};
pub use interpreter::{GitInterpreter, RemoteInterpreter};
pub use remote::{
    Access, InstallationData, InstallationToken, MergeData, PrData, RateLimit, RemoteAuth,
    RemoteEffect, RemoteResponse, RepoData, RepoPage, TokenPermissions,
};
