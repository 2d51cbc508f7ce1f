//! Webhook endpoint.
//!
//! Verifies the signature, parses the payload into a [`WebhookEvent`] and
//! spools it before answering `202 Accepted`. Handling happens later in the
//! worker pool.
//!
//! [`WebhookEvent`]: crate::webhooks::WebhookEvent

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::AppState;
use crate::spool::{SpoolError, SpooledEvent, spool_delivery};
use crate::types::DeliveryId;
use crate::webhooks::{ParseError, SignatureError, parse_webhook};

const HEADER_EVENT: &str = "x-github-event";
const HEADER_DELIVERY: &str = "x-github-delivery";
const HEADER_SIGNATURE: &str = "x-hub-signature-256";

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("invalid signature: {0}")]
    InvalidSignature(SignatureError),

    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] ParseError),

    #[error("spool error: {0}")]
    Spool(#[from] SpoolError),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::MissingHeader(_)
            | WebhookError::InvalidPayload(_)
            | WebhookError::InvalidSignature(SignatureError::Missing)
            | WebhookError::Spool(SpoolError::InvalidDeliveryId(_)) => StatusCode::BAD_REQUEST,
            WebhookError::InvalidSignature(SignatureError::InvalidKey) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            WebhookError::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
            WebhookError::Spool(SpoolError::DuplicateDelivery(_)) => {
                return (StatusCode::ACCEPTED, "Accepted (duplicate)").into_response();
            }
            WebhookError::Spool(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// `POST /webhook`
///
/// - 202 `Accepted`: spooled
/// - 202 `Accepted (duplicate)`: this delivery ID is already spooled
/// - 202 `Ignored`: event type the engine does not handle
/// - 400: missing header or malformed payload
/// - 401: signature does not match
/// - 500: spool failure
pub async fn webhook_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), WebhookError> {
    let event_type = get_header(&headers, HEADER_EVENT)?;
    let delivery_id = DeliveryId::new(get_header(&headers, HEADER_DELIVERY)?);
    let signature = headers
        .get(HEADER_SIGNATURE)
        .and_then(|v| v.to_str().ok());

    debug!(delivery_id = %delivery_id, event_type = %event_type, "received webhook");

    // Nothing is parsed or written before the signature checks out.
    if let Err(e) = app_state.webhook_secret().verify(&body, signature) {
        warn!(delivery_id = %delivery_id, error = %e, "rejected webhook signature");
        return Err(WebhookError::InvalidSignature(e));
    }

    let Some(event) = parse_webhook(&event_type, &body)? else {
        debug!(delivery_id = %delivery_id, event_type = %event_type, "ignoring unsupported event");
        return Ok((StatusCode::ACCEPTED, "Ignored"));
    };

    let spooled = SpooledEvent {
        delivery_id: delivery_id.clone(),
        received_at: Utc::now(),
        event,
    };
    match spool_delivery(app_state.spool_dir(), &spooled) {
        Ok(_) => {
            info!(
                delivery_id = %delivery_id,
                kind = spooled.event.kind(),
                installation_id = %spooled.event.installation_id(),
                "webhook spooled"
            );
            app_state.notify_spooled();
            Ok((StatusCode::ACCEPTED, "Accepted"))
        }
        Err(SpoolError::DuplicateDelivery(_)) => {
            debug!(delivery_id = %delivery_id, "duplicate delivery");
            Ok((StatusCode::ACCEPTED, "Accepted (duplicate)"))
        }
        Err(e) => {
            error!(delivery_id = %delivery_id, error = %e, "failed to spool webhook");
            Err(WebhookError::Spool(e))
        }
    }
}

fn get_header(headers: &HeaderMap, name: &'static str) -> Result<String, WebhookError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or(WebhookError::MissingHeader(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_statuses() {
        let cases = [
            (WebhookError::MissingHeader(HEADER_EVENT), StatusCode::BAD_REQUEST),
            (
                WebhookError::InvalidSignature(SignatureError::Missing),
                StatusCode::BAD_REQUEST,
            ),
            (
                WebhookError::InvalidSignature(SignatureError::Mismatch),
                StatusCode::UNAUTHORIZED,
            ),
            (
                WebhookError::InvalidSignature(SignatureError::Malformed),
                StatusCode::UNAUTHORIZED,
            ),
            (
                WebhookError::Spool(SpoolError::DuplicateDelivery(DeliveryId::new("d"))),
                StatusCode::ACCEPTED,
            ),
            (
                WebhookError::Spool(SpoolError::InvalidDeliveryId(DeliveryId::new("../d"))),
                StatusCode::BAD_REQUEST,
            ),
            (
                WebhookError::Spool(SpoolError::Io(std::io::Error::other("disk full"))),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, expected) in cases {
            let label = error.to_string();
            assert_eq!(error.into_response().status(), expected, "{label}");
        }
    }
}
