//! Background jobs the sync engine queues for itself: repository clones and
//! pull request imports.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::context::SyncContext;
use crate::effects::{GitInterpreter, RemoteInterpreter};
use crate::error::Result;
use crate::importer::ImporterService;
use crate::platform::Job;
use crate::pr_import::PullRequestImporter;

pub struct JobRunner<R, G> {
    importer: ImporterService<R, G>,
    pull_requests: PullRequestImporter<R, G>,
}

impl<R: RemoteInterpreter, G: GitInterpreter> JobRunner<R, G> {
    pub fn new(ctx: SyncContext<R, G>) -> Self {
        Self {
            importer: ImporterService::new(ctx.clone()),
            pull_requests: PullRequestImporter::new(ctx),
        }
    }

    /// Runs jobs one at a time until the queue closes or `shutdown` fires.
    ///
    /// A job interrupted by shutdown is not resumed.
    pub async fn run(self, mut jobs: mpsc::UnboundedReceiver<Job>, shutdown: CancellationToken) {
        info!("job runner started");
        loop {
            let job = tokio::select! {
                _ = shutdown.cancelled() => break,
                job = jobs.recv() => match job {
                    Some(job) => job,
                    None => break,
                },
            };
            tokio::select! {
                _ = shutdown.cancelled() => {
                    warn!(?job, "shutting down, job interrupted");
                    break;
                }
                result = self.run_job(&job) => {
                    if let Err(e) = result {
                        error!(?job, error = %e, "job failed");
                    }
                }
            }
        }
        info!("job runner stopped");
    }

    #[instrument(skip(self))]
    pub async fn run_job(&self, job: &Job) -> Result<()> {
        match job {
            Job::Clone(clone) => {
                let result = self.importer.clone_repository(clone).await;
                if result.is_err() {
                    if let Err(e) = self.importer.release_clone(clone) {
                        warn!(error = %e, "failed to release clone after failure");
                    }
                }
                result
            }
            Job::ImportPullRequests {
                codebase_id,
                user_id,
            } => {
                let imported = self
                    .pull_requests
                    .import_open_pull_requests_by_user(codebase_id, user_id)
                    .await?;
                info!(count = imported.len(), "imported open pull requests");
                Ok(())
            }
        }
    }
}
