//! Local git operations for codebase repositories.
//!
//! Every codebase owns one bare repository under the configured repos
//! directory, named after the codebase ID. The platform trunk lives at
//! `refs/heads/trunk` in that repository. [`CommandGit`] interprets
//! [`GitEffect`](crate::effects::GitEffect)s by shelling out to the git CLI:
//! - Writes to the same codebase are serialized; reads run concurrently
//! - Credentials are passed per command as an HTTP header, never persisted
//! - System and user git config are ignored

mod command;

pub use command::CommandGit;

use std::fmt;
use std::path::Path;
use std::process::Output;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("{command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("not a commit SHA: {0}")]
    InvalidSha(String),

    #[error("git I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("fetching {refspec} failed: {details}")]
    FetchFailed { refspec: String, details: String },

    #[error("pushing {refspec} failed: {details}")]
    PushFailed { refspec: String, details: String },

    /// Missing locally or on the remote.
    #[error("no such ref: {refspec}")]
    RefNotFound { refspec: String },

    /// The codebase has no repository on disk yet.
    #[error("no repository for codebase {0}")]
    MissingRepository(String),

    /// An interpreter returned the wrong response shape for an effect.
    #[error("unexpected git response, expected {expected}: {actual}")]
    UnexpectedResponse {
        expected: &'static str,
        actual: String,
    },
}

impl GitError {
    pub(crate) fn unexpected(expected: &'static str, actual: impl fmt::Debug) -> Self {
        GitError::UnexpectedResponse {
            expected,
            actual: format!("{:?}", actual),
        }
    }
}

pub type GitResult<T> = Result<T, GitError>;

/// A `git` invocation in `workdir` that ignores system and user config
/// (credential helpers, hooks, aliases) and never prompts.
pub(crate) fn git_command(workdir: &Path) -> std::process::Command {
    let mut cmd = std::process::Command::new("git");
    cmd.current_dir(workdir)
        .env("GIT_CONFIG_NOSYSTEM", "1")
        .env("GIT_CONFIG_GLOBAL", "/dev/null")
        .env("GIT_TERMINAL_PROMPT", "0");
    cmd
}

/// Runs `git <args>` in `workdir`, failing on a non-zero exit.
pub fn run_git_sync(workdir: &Path, args: &[&str]) -> GitResult<Output> {
    let output = git_command(workdir).args(args).output()?;
    if !output.status.success() {
        return Err(GitError::CommandFailed {
            command: format!("git {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(output)
}

/// Like [`run_git_sync`], returning trimmed stdout.
pub fn run_git_stdout(workdir: &Path, args: &[&str]) -> GitResult<String> {
    let output = run_git_sync(workdir, args)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
