//! Imports a user's open remote pull requests as platform workspaces.
//!
//! Each pull request's head is fetched into a temporary branch, captured as
//! the snapshot of a new workspace and the branch is deleted again. The
//! tracking row starts out `importing`, so remote edits keep flowing into the
//! workspace until it is published from the platform. Pull requests whose
//! head lives outside the installation owner's repository are marked as
//! forks: the app cannot push to them, so publishing opens a new one.

use chrono::Utc;
use pulldown_cmark::{Options, Parser, html};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::context::SyncContext;
use crate::effects::{
    GitEffect, GitInterpreter, GitToken, PrData, RemoteAuth, RemoteEffect, RemoteInterpreter,
};
use crate::error::{Context, Result, SyncError};
use crate::notify::Notification;
use crate::platform::NewWorkspace;
use crate::types::{
    CodebaseId, Installation, PullRequest, PullRequestState, RecordId, Repository, UserId,
    WorkspaceId,
};

/// Open pull requests listed per import.
const PULL_REQUESTS_PER_PAGE: u8 = 100;

/// Renders remote markdown to the platform's rich-text HTML.
pub fn markdown_to_html(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len() * 3 / 2);
    html::push_html(&mut out, Parser::new_ext(markdown, Options::all()));
    out
}

pub struct PullRequestImporter<R, G> {
    ctx: SyncContext<R, G>,
}

impl<R, G> Clone for PullRequestImporter<R, G> {
    fn clone(&self) -> Self {
        Self {
            ctx: self.ctx.clone(),
        }
    }
}

impl<R: RemoteInterpreter, G: GitInterpreter> PullRequestImporter<R, G> {
    pub fn new(ctx: SyncContext<R, G>) -> Self {
        Self { ctx }
    }

    /// Imports every open pull request `user_id` authored in the codebase's
    /// repository. Already imported ones are skipped.
    ///
    /// Returns the workspaces created.
    #[instrument(skip(self), fields(codebase_id = %codebase_id, user_id = %user_id))]
    pub async fn import_open_pull_requests_by_user(
        &self,
        codebase_id: &CodebaseId,
        user_id: &UserId,
    ) -> Result<Vec<WorkspaceId>> {
        let repository = self
            .ctx
            .store
            .get_repository_by_codebase(codebase_id)
            .context("get repository by codebase")?
            .ok_or_else(|| SyncError::not_tracked("repository for codebase", codebase_id))?;
        let installation = self
            .ctx
            .store
            .get_installation(repository.installation_id)
            .context("get installation")?
            .ok_or_else(|| SyncError::not_tracked("installation", repository.installation_id))?;
        let account = self
            .ctx
            .platform
            .linked_account(user_id)
            .context("get linked account")?
            .ok_or_else(|| SyncError::Invalid(format!("user {user_id} has no linked remote account")))?;

        let token = self
            .ctx
            .tokens
            .get_access_token(repository.installation_id, repository.remote_repo_id)
            .await?;

        let pull_requests = self
            .ctx
            .remote
            .interpret(
                &RemoteAuth::Installation(installation.installation_id),
                RemoteEffect::ListOpenPullRequests {
                    owner: installation.owner.clone(),
                    repo: repository.name.clone(),
                    page: 1,
                    per_page: PULL_REQUESTS_PER_PAGE,
                },
            )
            .await
            .and_then(|response| response.into_pull_requests())
            .context("list open pull requests")?;

        let mut imported = Vec::new();
        for pr in pull_requests
            .iter()
            .filter(|pr| pr.author_login.as_deref() == Some(account.login.as_str()))
        {
            info!(number = pr.number.0, "importing pull request");
            match self
                .import_pull_request(user_id, pr, &repository, &installation, GitToken(token.token.clone()))
                .await
            {
                Ok(workspace_id) => imported.push(workspace_id),
                Err(SyncError::AlreadyImported) => {
                    debug!(number = pr.number.0, "pull request already imported");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(imported)
    }

    /// Imports one pull request into a new workspace owned by `user_id`.
    ///
    /// Fails with [`SyncError::AlreadyImported`] if the codebase already
    /// tracks it.
    #[instrument(skip_all, fields(codebase_id = %repository.codebase_id, number = pr.number.0))]
    pub async fn import_pull_request(
        &self,
        user_id: &UserId,
        pr: &PrData,
        repository: &Repository,
        installation: &Installation,
        token: GitToken,
    ) -> Result<WorkspaceId> {
        let codebase_id = &repository.codebase_id;
        if self
            .ctx
            .store
            .get_pull_request(pr.id, codebase_id)
            .context("get pull request")?
            .is_some()
        {
            return Err(SyncError::AlreadyImported);
        }

        let name = if pr.title.trim().is_empty() {
            format!("PR {}", pr.number.0)
        } else {
            pr.title.clone()
        };
        let description = markdown_to_html(pr.body.as_deref().unwrap_or_default());

        let branch = format!("import-pull-request-{}-{}", pr.number.0, Uuid::new_v4());
        self.ctx
            .git
            .interpret(
                codebase_id,
                GitEffect::Fetch {
                    url: self
                        .ctx
                        .settings
                        .clone_url(&installation.owner, &repository.name),
                    token,
                    refspec: format!("+refs/pull/{}/head:refs/heads/{branch}", pr.number.0),
                },
            )
            .await
            .and_then(|response| response.into_ok())
            .context("fetch pull request head")?;

        let workspace = self
            .ctx
            .platform
            .create_workspace(NewWorkspace {
                codebase_id: codebase_id.clone(),
                user_id: user_id.clone(),
                name,
                draft_description: description,
            })
            .context("create workspace")?;

        let snapshot = self
            .ctx
            .platform
            .snapshot_branch(codebase_id, &workspace.id, &branch)
            .context("snapshot imported branch");
        let cleanup = self
            .ctx
            .git
            .interpret(codebase_id, GitEffect::DeleteBranch { name: branch })
            .await
            .and_then(|response| response.into_ok())
            .context("delete import branch");
        snapshot?;
        if let Err(e) = cleanup {
            warn!(error = %e, "failed to delete import branch");
        }

        let fork = pr.head_owner.as_deref() != Some(installation.owner.as_str());
        if fork {
            debug!(head_owner = ?pr.head_owner, "pull request is from a fork");
        }
        let row = PullRequest {
            id: RecordId::generate(),
            workspace_id: workspace.id.clone(),
            remote_pr_id: pr.id,
            remote_repo_id: repository.remote_repo_id,
            created_by: user_id.clone(),
            number: pr.number,
            head: pr.head_ref.clone(),
            head_sha: Some(pr.head_sha.clone()),
            base: pr.base_ref.clone(),
            codebase_id: codebase_id.clone(),
            state: PullRequestState::Open,
            created_at: pr.created_at.unwrap_or_else(Utc::now),
            updated_at: None,
            closed_at: None,
            merged_at: None,
            fork,
            importing: true,
        };
        self.ctx
            .store
            .insert_pull_request(&row)
            .context("insert pull request")?;

        self.ctx.notifier.publish(Notification::WorkspaceUpdated {
            workspace_id: workspace.id.clone(),
        });
        info!(workspace_id = %workspace.id, "imported pull request");
        Ok(workspace.id)
    }
}
