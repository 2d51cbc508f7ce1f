//! Read-only view of a tracked repository, for checking on an integration.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use super::AppState;
use crate::store::StoreError;
use crate::types::{InstallationId, RemoteRepoId, Repository};

#[derive(Debug, Error)]
pub enum RepositoryViewError {
    #[error("repository {repository_id} of installation {installation_id} is not tracked")]
    NotFound {
        installation_id: InstallationId,
        repository_id: RemoteRepoId,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for RepositoryViewError {
    fn into_response(self) -> Response {
        let status = match &self {
            RepositoryViewError::NotFound { .. } => StatusCode::NOT_FOUND,
            RepositoryViewError::Store(e) => {
                error!(error = %e, "failed to load repository");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.to_string()).into_response()
    }
}

/// `GET /api/v1/installations/{installation_id}/repositories/{repository_id}`
///
/// The cached access token is never serialized.
pub async fn repository_handler(
    State(app_state): State<AppState>,
    Path((installation_id, repository_id)): Path<(u64, u64)>,
) -> Result<Json<Repository>, RepositoryViewError> {
    let installation_id = InstallationId(installation_id);
    let repository_id = RemoteRepoId(repository_id);
    app_state
        .store()
        .get_repository(installation_id, repository_id)?
        .map(Json)
        .ok_or(RepositoryViewError::NotFound {
            installation_id,
            repository_id,
        })
}
