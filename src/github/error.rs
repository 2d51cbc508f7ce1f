//! Remote host API error types.
//!
//! Errors are categorized so that callers can decide what to do with them:
//!
//! - **Transient** errors are retriable (5xx, rate limits, network failures)
//! - **Permanent** errors will fail again if retried (most 4xx)
//! - **UserFacing** errors carry a message from the remote host that should be
//!   shown verbatim to the end user, e.g. a merge refused by branch protection

use std::fmt;
use thiserror::Error;

/// Message the remote host returns when a token asks for permissions that the
/// installation has not granted.
const PERMISSIONS_NOT_GRANTED: &str = "the permissions requested are not granted to this installation";

/// The kind of remote API error, categorized for retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Safe to retry with backoff.
    Transient,

    /// Requires human intervention or a different request.
    Permanent,

    /// Rejected for a reason the end user can act on (HTTP 405 on merge).
    ///
    /// `message` holds the remote host's own explanation.
    UserFacing,
}

impl RemoteErrorKind {
    pub fn is_retriable(&self) -> bool {
        matches!(self, RemoteErrorKind::Transient)
    }
}

/// A remote API error with categorization for retry decisions.
#[derive(Debug, Error)]
pub struct RemoteApiError {
    pub kind: RemoteErrorKind,

    /// The HTTP status code, if available.
    pub status_code: Option<u16>,

    /// A human-readable description of the error.
    pub message: String,

    /// The underlying octocrab error, if available.
    #[source]
    pub source: Option<octocrab::Error>,
}

impl fmt::Display for RemoteApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "remote API error (HTTP {}): {}", code, self.message),
            None => write!(f, "remote API error: {}", self.message),
        }
    }
}

impl RemoteApiError {
    pub fn permanent_without_source(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Permanent,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    pub fn transient_without_source(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Transient,
            status_code: None,
            message: message.into(),
            source: None,
        }
    }

    /// An error whose message should reach the end user unchanged.
    pub fn user_facing(status_code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::UserFacing,
            status_code,
            message: message.into(),
            source: None,
        }
    }

    /// A response of the wrong shape for the effect that produced it.
    pub fn unexpected_response(effect: &str, response: impl fmt::Debug) -> Self {
        Self::permanent_without_source(format!(
            "unexpected response to {}: {:?}",
            effect, response
        ))
    }

    /// Categorizes an octocrab error.
    pub fn from_octocrab(err: octocrab::Error) -> Self {
        let status_code = Self::extract_status_code(&err);
        let message = Self::extract_message(&err);

        if is_transient_message(&message) {
            return Self {
                kind: RemoteErrorKind::Transient,
                status_code,
                message,
                source: Some(err),
            };
        }

        let kind = match status_code {
            Some(429) => RemoteErrorKind::Transient,
            Some(403) if is_rate_limit_error(&message) => RemoteErrorKind::Transient,
            Some(code) if (500..600).contains(&code) => RemoteErrorKind::Transient,
            Some(_) => RemoteErrorKind::Permanent,
            None => {
                if is_network_error(&message) {
                    RemoteErrorKind::Transient
                } else {
                    RemoteErrorKind::Permanent
                }
            }
        };

        Self {
            kind,
            status_code,
            message,
            source: Some(err),
        }
    }

    /// Like [`Self::from_octocrab`], but an HTTP 405 becomes
    /// [`RemoteErrorKind::UserFacing`]. Used for merges, where 405 means the
    /// remote host refused (branch protection, required reviews, ...).
    pub fn from_merge_octocrab(err: octocrab::Error) -> Self {
        let mut error = Self::from_octocrab(err);
        if error.status_code == Some(405) {
            error.kind = RemoteErrorKind::UserFacing;
        }
        error
    }

    pub fn is_retriable(&self) -> bool {
        self.kind.is_retriable()
    }

    pub fn is_user_facing(&self) -> bool {
        self.kind == RemoteErrorKind::UserFacing
    }

    /// True if a token request asked for permissions the installation has
    /// not granted. The owner has to accept the new permissions first.
    pub fn is_permission_denied(&self) -> bool {
        self.message.to_lowercase().contains(PERMISSIONS_NOT_GRANTED)
    }

    fn extract_message(err: &octocrab::Error) -> String {
        match err {
            octocrab::Error::GitHub { source, .. } => source.message.clone(),
            other => other.to_string(),
        }
    }

    /// Extracts the HTTP status code from an octocrab error, if present.
    ///
    /// API errors carry a structured status. Transport errors only have a
    /// message, so fall back to scanning it for well-known codes.
    fn extract_status_code(err: &octocrab::Error) -> Option<u16> {
        if let octocrab::Error::GitHub { source, .. } = err {
            return Some(source.status_code.as_u16());
        }

        let err_str = err.to_string();
        if let Some(idx) = err_str.find("status: ") {
            let digits: String = err_str[idx + 8..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if let Ok(code) = digits.parse() {
                return Some(code);
            }
        }

        [429u16, 500, 502, 503]
            .into_iter()
            .find(|code| err_str.contains(&code.to_string()))
    }
}

/// Checks if an error message indicates a transient condition.
fn is_transient_message(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("base branch was modified") || message_lower.contains("try again")
}

/// Checks if an error message indicates a rate limit.
fn is_rate_limit_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("rate limit")
        || message_lower.contains("api rate")
        || message_lower.contains("secondary rate")
        || message_lower.contains("abuse detection")
}

/// Checks if an error message indicates a network-level error.
fn is_network_error(message: &str) -> bool {
    let message_lower = message.to_lowercase();
    message_lower.contains("timeout")
        || message_lower.contains("connection")
        || message_lower.contains("network")
        || message_lower.contains("dns")
        || message_lower.contains("timed out")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_message_detection() {
        assert!(is_transient_message("Base branch was modified"));
        assert!(is_transient_message("Please try again later"));
        assert!(!is_transient_message("Pull request is not mergeable"));
    }

    #[test]
    fn rate_limit_detection() {
        assert!(is_rate_limit_error("API rate limit exceeded"));
        assert!(is_rate_limit_error("secondary rate limit"));
        assert!(!is_rate_limit_error("Permission denied"));
    }

    #[test]
    fn network_error_detection() {
        assert!(is_network_error("connection reset"));
        assert!(is_network_error("request timed out"));
        assert!(!is_network_error("Not found"));
    }

    #[test]
    fn permission_denied_detection() {
        let err = RemoteApiError::permanent_without_source(
            "The permissions requested are not granted to this installation.",
        );
        assert!(err.is_permission_denied());
        assert!(!RemoteApiError::permanent_without_source("Not Found").is_permission_denied());
    }

    #[test]
    fn user_facing_is_not_retriable() {
        let err = RemoteApiError::user_facing(Some(405), "Required status check is failing");
        assert!(err.is_user_facing());
        assert!(!err.is_retriable());
        assert_eq!(
            err.to_string(),
            "remote API error (HTTP 405): Required status check is failing"
        );
    }

    #[test]
    fn error_kind_retriable() {
        assert!(RemoteErrorKind::Transient.is_retriable());
        assert!(!RemoteErrorKind::Permanent.is_retriable());
        assert!(!RemoteErrorKind::UserFacing.is_retriable());
    }
}
