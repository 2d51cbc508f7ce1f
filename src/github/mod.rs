//! Remote host API client and effect interpreter.
//!
//! This module executes [`RemoteEffect`](crate::effects::RemoteEffect)s via
//! octocrab. Key features:
//! - One client per identity: the app (JWT), an installation, or a user
//! - Exponential backoff retry for transient failures
//! - Distinguishes transient, permanent and user-facing errors

mod client;
mod error;
mod interpreter;
mod retry;

pub use client::OctocrabRemote;
pub use error::{RemoteApiError, RemoteErrorKind};
pub use interpreter::{interpret_remote_effect, retry_policy_for};
pub use retry::{RetryConfig, RetryPolicy, RetryResult, retry_with_backoff};
