//! Error taxonomy for the auth flows.
//!
//! Validation, policy, and conflict errors are returned inline with the
//! offending rule in the message. Upstream (OAuth provider) and internal
//! failures are logged with full detail server-side and reported to the user
//! in a reduced, non-sensitive form.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::error;

use super::types::ApiMessage;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Malformed or missing input; the message names the offending field/rule.
    #[error("{0}")]
    Validation(String),

    /// Bad credentials or a failed OAuth handshake.
    #[error("{0}")]
    Authentication(String),

    /// The account state refuses the action (suspended, deactivated, unverified).
    #[error("{0}")]
    Policy(String),

    /// Duplicate email at registration.
    #[error("{0}")]
    Conflict(String),

    /// An OAuth provider was unreachable or returned malformed data. The
    /// source error never reaches the user.
    #[error("Authentication failed. Please try again.")]
    Upstream(#[source] anyhow::Error),

    #[error("{0}")]
    RateLimited(String),

    #[error("Something went wrong. Please try again later.")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::Policy(_) | Self::Conflict(_) => StatusCode::BAD_REQUEST,
            Self::Authentication(_) | Self::Upstream(_) => StatusCode::UNAUTHORIZED,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        match &self {
            Self::Upstream(source) => error!("Upstream provider failure: {source:#}"),
            Self::Internal(source) => error!("Internal error: {source:#}"),
            _ => {}
        }

        let status = self.status();
        (status, Json(ApiMessage::failure(self.to_string()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn statuses_follow_the_taxonomy() {
        assert_eq!(
            AuthError::Validation("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AuthError::Policy("suspended".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AuthError::Conflict("dup".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AuthError::Authentication("nope".into()).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::Upstream(anyhow!("boom")).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AuthError::RateLimited("slow down".into()).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AuthError::Internal(anyhow!("boom")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn upstream_message_is_opaque() {
        let err = AuthError::Upstream(anyhow!("token endpoint returned 500"));
        assert_eq!(err.to_string(), "Authentication failed. Please try again.");
    }
}
