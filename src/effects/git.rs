//! Git operation effect types.
//!
//! These types describe git operations as data, without executing them.
//! Effects are codebase-scoped: the interpreter is told which codebase's
//! repository to operate on, and the platform trunk is always
//! `refs/heads/trunk` in that repository.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::git::GitError;
use crate::types::Sha;

/// The platform's mainline branch in every codebase repository.
pub const TRUNK: &str = "trunk";

/// A credential for git-over-HTTPS, sent as basic auth.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GitToken(pub String);

impl fmt::Debug for GitToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("GitToken(<redacted>)")
    }
}

/// A git operation effect.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GitEffect {
    /// Create the codebase repository from `branch` of the remote, landing it
    /// on trunk.
    Clone {
        url: String,
        token: GitToken,
        branch: String,
    },

    /// Fetch one refspec from the remote (e.g. `+refs/heads/main:refs/heads/trunk`).
    Fetch {
        url: String,
        token: GitToken,
        refspec: String,
    },

    /// Push one refspec. A leading `+` forces the update.
    Push {
        url: String,
        token: GitToken,
        refspec: String,
    },

    /// Whether the remote has `refs/heads/<branch>`.
    RemoteBranchExists {
        url: String,
        token: GitToken,
        branch: String,
    },

    /// The newest `limit` commits reachable from `rev`, newest first.
    Log { rev: String, limit: usize },

    /// Resolve a revision to a commit SHA.
    RevParse { rev: String },

    /// Create (or move) a local branch to point at `at`.
    CreateBranch { name: String, at: String },

    /// Delete a local branch.
    DeleteBranch { name: String },
}

impl GitEffect {
    /// True for effects that only read the repository.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            GitEffect::RemoteBranchExists { .. } | GitEffect::Log { .. } | GitEffect::RevParse { .. }
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            GitEffect::Clone { .. } => "clone",
            GitEffect::Fetch { .. } => "fetch",
            GitEffect::Push { .. } => "push",
            GitEffect::RemoteBranchExists { .. } => "remote_branch_exists",
            GitEffect::Log { .. } => "log",
            GitEffect::RevParse { .. } => "rev_parse",
            GitEffect::CreateBranch { .. } => "create_branch",
            GitEffect::DeleteBranch { .. } => "delete_branch",
        }
    }
}

/// A commit as listed by [`GitEffect::Log`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitData {
    pub sha: Sha,
    /// Full commit message.
    pub message: String,
}

/// Response from a git effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GitResponse {
    /// Operation completed successfully with no specific return value.
    Ok,
    /// Operation returned a SHA (e.g., from RevParse).
    Sha(Sha),
    /// Operation returned a boolean (e.g., from RemoteBranchExists).
    Bool(bool),
    /// Response to `Log`.
    Commits(Vec<CommitData>),
}

impl GitResponse {
    pub fn into_ok(self) -> Result<(), GitError> {
        match self {
            GitResponse::Ok => Ok(()),
            other => Err(GitError::unexpected("Ok", other)),
        }
    }

    pub fn into_sha(self) -> Result<Sha, GitError> {
        match self {
            GitResponse::Sha(sha) => Ok(sha),
            other => Err(GitError::unexpected("Sha", other)),
        }
    }

    pub fn into_bool(self) -> Result<bool, GitError> {
        match self {
            GitResponse::Bool(b) => Ok(b),
            other => Err(GitError::unexpected("Bool", other)),
        }
    }

    pub fn into_commits(self) -> Result<Vec<CommitData>, GitError> {
        match self {
            GitResponse::Commits(commits) => Ok(commits),
            other => Err(GitError::unexpected("Commits", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_token() -> impl Strategy<Value = GitToken> {
        "ghs_[a-zA-Z0-9]{20}".prop_map(GitToken)
    }

    fn arb_git_effect() -> impl Strategy<Value = GitEffect> {
        let url = "https://github\\.com/[a-z]{1,8}/[a-z]{1,8}\\.git";
        let branch = "[a-z][a-z0-9/-]{0,20}";
        prop_oneof![
            (url, arb_token(), branch)
                .prop_map(|(url, token, branch)| GitEffect::Clone { url, token, branch }),
            (url, arb_token(), branch).prop_map(|(url, token, b)| GitEffect::Fetch {
                url,
                token,
                refspec: format!("+refs/heads/{b}:refs/heads/{TRUNK}"),
            }),
            (url, arb_token(), branch).prop_map(|(url, token, b)| GitEffect::Push {
                url,
                token,
                refspec: format!("{b}:{b}"),
            }),
            (url, arb_token(), branch).prop_map(|(url, token, branch)| {
                GitEffect::RemoteBranchExists { url, token, branch }
            }),
            (branch, 1usize..100).prop_map(|(rev, limit)| GitEffect::Log { rev, limit }),
            branch.prop_map(|rev| GitEffect::RevParse { rev }),
            (branch, branch).prop_map(|(name, at)| GitEffect::CreateBranch { name, at }),
            branch.prop_map(|name| GitEffect::DeleteBranch { name }),
        ]
    }

    proptest! {
        #[test]
        fn debug_never_leaks_tokens(effect in arb_git_effect()) {
            let debug = format!("{:?}", effect);
            match &effect {
                GitEffect::Clone { token, .. }
                | GitEffect::Fetch { token, .. }
                | GitEffect::Push { token, .. }
                | GitEffect::RemoteBranchExists { token, .. } => {
                    prop_assert!(!debug.contains(&token.0));
                }
                _ => {}
            }
        }

        #[test]
        fn serde_tag_matches_name(effect in arb_git_effect()) {
            let json = serde_json::to_value(&effect).unwrap();
            prop_assert_eq!(json["type"].as_str(), Some(effect.name()));
        }
    }

    #[test]
    fn accessors_reject_wrong_variant() {
        assert!(GitResponse::Bool(true).into_sha().is_err());
        assert!(GitResponse::Ok.into_ok().is_ok());
        assert_eq!(GitResponse::Commits(vec![]).into_commits().unwrap(), vec![]);
    }

    #[test]
    fn read_only_classification() {
        assert!(GitEffect::RevParse { rev: TRUNK.into() }.is_read_only());
        assert!(
            !GitEffect::DeleteBranch {
                name: "x".into()
            }
            .is_read_only()
        );
    }
}
