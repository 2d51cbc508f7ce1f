//! Git CLI interpreter for codebase repositories.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use tokio::sync::RwLock;
use tracing::debug;

use crate::effects::{CommitData, GitEffect, GitInterpreter, GitResponse, GitToken, TRUNK};
use crate::types::{CodebaseId, Sha};

use super::{GitError, GitResult, git_command, run_git_stdout, run_git_sync};

/// Separates the SHA from the message within one `git log` record.
const FIELD_SEP: char = '\u{1f}';
/// Terminates one `git log` record.
const RECORD_SEP: char = '\u{1e}';

/// Runs git effects with the git CLI, one bare repository per codebase.
#[derive(Debug, Clone)]
pub struct CommandGit {
    repos_dir: PathBuf,
    locks: Arc<Mutex<HashMap<CodebaseId, Arc<RwLock<()>>>>>,
}

impl CommandGit {
    pub fn new(repos_dir: impl Into<PathBuf>) -> Self {
        Self {
            repos_dir: repos_dir.into(),
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Path to a codebase's bare repository.
    pub fn repo_dir(&self, codebase: &CodebaseId) -> GitResult<PathBuf> {
        let name = codebase.as_str();
        let safe = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !safe {
            return Err(GitError::MissingRepository(name.to_string()));
        }
        Ok(self.repos_dir.join(format!("{name}.git")))
    }

    fn lock_for(&self, codebase: &CodebaseId) -> Arc<RwLock<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        locks
            .entry(codebase.clone())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }
}

impl GitInterpreter for CommandGit {
    async fn interpret(
        &self,
        codebase: &CodebaseId,
        effect: GitEffect,
    ) -> Result<GitResponse, GitError> {
        let repo = self.repo_dir(codebase)?;
        let lock = self.lock_for(codebase);
        debug!(codebase_id = %codebase, effect = effect.name(), "interpreting git effect");

        let joined = if effect.is_read_only() {
            let _guard = lock.read().await;
            tokio::task::spawn_blocking(move || execute_effect(&repo, effect)).await
        } else {
            let _guard = lock.write().await;
            tokio::task::spawn_blocking(move || execute_effect(&repo, effect)).await
        };
        joined.map_err(|e| GitError::Io(std::io::Error::other(e)))?
    }
}

fn execute_effect(repo: &Path, effect: GitEffect) -> GitResult<GitResponse> {
    if !matches!(effect, GitEffect::Clone { .. }) && !repo.exists() {
        return Err(GitError::MissingRepository(repo.display().to_string()));
    }

    match effect {
        GitEffect::Clone { url, token, branch } => {
            clone(repo, &url, &token, &branch)?;
            Ok(GitResponse::Ok)
        }
        GitEffect::Fetch {
            url,
            token,
            refspec,
        } => {
            fetch(repo, &url, &token, &refspec)?;
            Ok(GitResponse::Ok)
        }
        GitEffect::Push {
            url,
            token,
            refspec,
        } => {
            push(repo, &url, &token, &refspec)?;
            Ok(GitResponse::Ok)
        }
        GitEffect::RemoteBranchExists { url, token, branch } => {
            let refname = format!("refs/heads/{branch}");
            let output = authenticated(repo, &token)
                .args(["ls-remote", "--heads", &url, &refname])
                .output()?;
            if !output.status.success() {
                return Err(GitError::CommandFailed {
                    command: format!("git ls-remote --heads <remote> {refname}"),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                });
            }
            Ok(GitResponse::Bool(!output.stdout.is_empty()))
        }
        GitEffect::Log { rev, limit } => {
            let output = run_git_sync(
                repo,
                &[
                    "log",
                    "--format=%H%x1f%B%x1e",
                    &format!("--max-count={limit}"),
                    &rev,
                    "--",
                ],
            )?;
            parse_log(&String::from_utf8_lossy(&output.stdout)).map(GitResponse::Commits)
        }
        GitEffect::RevParse { rev } => rev_parse(repo, &rev).map(GitResponse::Sha),
        GitEffect::CreateBranch { name, at } => {
            let target = rev_parse(repo, &at)?;
            run_git_sync(repo, &["branch", "-f", &name, target.as_str()])?;
            Ok(GitResponse::Ok)
        }
        GitEffect::DeleteBranch { name } => {
            run_git_sync(repo, &["branch", "-D", &name])?;
            Ok(GitResponse::Ok)
        }
    }
}

/// A git command carrying `token` as basic auth for HTTPS remotes.
///
/// The header is passed with `-c` so it never lands in the repository config.
fn authenticated(repo: &Path, token: &GitToken) -> std::process::Command {
    let credentials = STANDARD.encode(format!("x-access-token:{}", token.0));
    let mut cmd = git_command(repo);
    cmd.arg("-c");
    cmd.arg(format!("http.extraheader=AUTHORIZATION: basic {credentials}"));
    cmd
}

fn clone(repo: &Path, url: &str, token: &GitToken, branch: &str) -> GitResult<()> {
    std::fs::create_dir_all(repo)?;
    run_git_sync(repo, &["init", "--bare", "--quiet"])?;
    fetch(
        repo,
        url,
        token,
        &format!("+refs/heads/{branch}:refs/heads/{TRUNK}"),
    )?;
    run_git_sync(repo, &["symbolic-ref", "HEAD", &format!("refs/heads/{TRUNK}")])?;
    Ok(())
}

fn fetch(repo: &Path, url: &str, token: &GitToken, refspec: &str) -> GitResult<()> {
    let output = authenticated(repo, token)
        .args(["fetch", "--quiet", "--no-tags", url, refspec])
        .output()?;
    if output.status.success() {
        return Ok(());
    }

    let details = String::from_utf8_lossy(&output.stderr).to_string();
    if details.contains("couldn't find remote ref") {
        Err(GitError::RefNotFound {
            refspec: refspec.to_string(),
        })
    } else {
        Err(GitError::FetchFailed {
            refspec: refspec.to_string(),
            details,
        })
    }
}

fn push(repo: &Path, url: &str, token: &GitToken, refspec: &str) -> GitResult<()> {
    let output = authenticated(repo, token)
        .args(["push", "--quiet", url, refspec])
        .output()?;
    if output.status.success() {
        Ok(())
    } else {
        Err(GitError::PushFailed {
            refspec: refspec.to_string(),
            details: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

fn rev_parse(repo: &Path, rev: &str) -> GitResult<Sha> {
    let spec = format!("{rev}^{{commit}}");
    let sha = run_git_stdout(repo, &["rev-parse", "--verify", "--quiet", &spec]).map_err(
        |_| GitError::RefNotFound {
            refspec: rev.to_string(),
        },
    )?;
    Sha::parse(&sha).map_err(|_| GitError::InvalidSha(sha))
}

/// Parses `git log --format=%H%x1f%B%x1e` output.
fn parse_log(output: &str) -> GitResult<Vec<CommitData>> {
    output
        .split(RECORD_SEP)
        .map(|record| record.trim_start_matches('\n'))
        .filter(|record| !record.trim().is_empty())
        .map(|record| {
            let (sha, message) = record.split_once(FIELD_SEP).unwrap_or((record, ""));
            let sha = Sha::parse(sha.trim()).map_err(|e| GitError::InvalidSha(e.0))?;
            Ok(CommitData {
                sha,
                message: message.trim_end().to_string(),
            })
        })
        .collect()
}
