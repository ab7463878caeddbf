//! Password reset endpoints: the forgot request and the reset itself.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

use crate::api::email::{enqueue_email, password_reset_email};

use super::error::AuthError;
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::state::AuthState;
use super::store::{
    delete_sessions_for, find_by_email, set_password_and_rotate, set_reset_token,
};
use super::token::PASSWORD_RESET_PURPOSE;
use super::types::{ApiMessage, ForgotPasswordRequest, ResetPasswordRequest};
use super::utils::{
    extract_client_ip, hash_password, normalize_email, valid_email, validate_password,
};

const FORGOT_RESPONSE: &str =
    "If an account exists for that email, a password reset link has been sent.";
const BAD_RESET_LINK: &str =
    "Your password reset link is invalid or has expired. Please request a new one.";

#[utoipa::path(
    post,
    path = "/forgot-password",
    request_body = ForgotPasswordRequest,
    responses(
        (status = 200, description = "Reset email queued if the account exists", body = ApiMessage),
        (status = 400, description = "Validation error", body = ApiMessage),
        (status = 429, description = "Too many requests", body = ApiMessage)
    ),
    tag = "auth"
)]
pub async fn forgot_password(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ForgotPasswordRequest>>,
) -> Result<Response, AuthError> {
    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::ForgotPassword)
        == RateLimitDecision::Limited
    {
        return Err(AuthError::RateLimited(
            RateLimitAction::ForgotPassword.message().to_string(),
        ));
    }

    let Some(Json(request)) = payload else {
        return Err(AuthError::Validation("Missing payload".to_string()));
    };
    let Some(email) = request.email else {
        return Err(AuthError::Validation("Email is required.".to_string()));
    };

    let email_normalized = normalize_email(&email);
    if !valid_email(&email_normalized) {
        return Err(AuthError::Validation("Invalid email address.".to_string()));
    }

    if auth_state
        .rate_limiter()
        .check_email(&email_normalized, RateLimitAction::ForgotPassword)
        == RateLimitDecision::Limited
    {
        return Err(AuthError::RateLimited(
            RateLimitAction::ForgotPassword.message().to_string(),
        ));
    }

    // The response never says whether the account exists. Failures past this
    // point are logged and swallowed for the same reason.
    if let Err(err) = queue_reset_email(&pool, &auth_state, &email_normalized).await {
        error!("Failed to queue password reset: {err:#}");
    }

    Ok((StatusCode::OK, Json(ApiMessage::ok(FORGOT_RESPONSE))).into_response())
}

async fn queue_reset_email(
    pool: &PgPool,
    auth_state: &AuthState,
    email_normalized: &str,
) -> anyhow::Result<()> {
    let Some(_user) = find_by_email(pool, email_normalized).await? else {
        return Ok(());
    };

    let token = auth_state
        .signer()
        .issue(PASSWORD_RESET_PURPOSE, email_normalized);
    let ttl = auth_state.config().email_token_ttl_seconds();
    let reset_url = build_reset_url(auth_state.config().frontend_base_url(), &token);

    let mut tx = pool.begin().await?;
    set_reset_token(&mut tx, email_normalized, &token, ttl).await?;
    enqueue_email(&mut tx, &password_reset_email(email_normalized, &reset_url)).await?;
    tx.commit().await?;

    Ok(())
}

#[utoipa::path(
    post,
    path = "/reset-password",
    request_body = ResetPasswordRequest,
    responses(
        (status = 200, description = "Password changed, all sessions revoked", body = ApiMessage),
        (status = 400, description = "Validation error or bad token", body = ApiMessage),
        (status = 429, description = "Too many requests", body = ApiMessage)
    ),
    tag = "auth"
)]
pub async fn reset_password(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResetPasswordRequest>>,
) -> Result<Response, AuthError> {
    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::ResetPassword)
        == RateLimitDecision::Limited
    {
        return Err(AuthError::RateLimited(
            RateLimitAction::ResetPassword.message().to_string(),
        ));
    }

    let Some(Json(request)) = payload else {
        return Err(AuthError::Validation("Missing payload".to_string()));
    };
    let Some(token) = request.token else {
        return Err(AuthError::Validation("Reset token is required.".to_string()));
    };
    let (Some(password), Some(confirm_password)) = (request.password, request.confirm_password)
    else {
        return Err(AuthError::Validation(
            "Password and confirmation are required.".to_string(),
        ));
    };
    if password != confirm_password {
        return Err(AuthError::Validation("Passwords do not match.".to_string()));
    }
    if let Some(violation) = validate_password(&password) {
        return Err(AuthError::Validation(violation.to_string()));
    }

    let max_age = auth_state.config().email_token_ttl_seconds();
    let email = auth_state
        .signer()
        .verify(PASSWORD_RESET_PURPOSE, &token, max_age)
        .map_err(|_| AuthError::Validation(BAD_RESET_LINK.to_string()))?;

    if auth_state
        .rate_limiter()
        .check_email(&email, RateLimitAction::ResetPassword)
        == RateLimitDecision::Limited
    {
        return Err(AuthError::RateLimited(
            RateLimitAction::ResetPassword.message().to_string(),
        ));
    }

    let Some(user) = find_by_email(&pool, &email).await? else {
        return Err(AuthError::Validation(BAD_RESET_LINK.to_string()));
    };

    let new_hash = hash_password(&password)?;
    let new_alternative_id = Uuid::new_v4();

    // The stored copy is the revocation handle: a newer request or a finished
    // reset clears it, killing every previously emailed link. The match,
    // expiry check and rotation are one conditional UPDATE, so a concurrent
    // replay of the same token consumes zero rows and fails here.
    if !set_password_and_rotate(&pool, &email, &token, &new_hash, new_alternative_id).await? {
        return Err(AuthError::Validation(BAD_RESET_LINK.to_string()));
    }
    delete_sessions_for(&pool, user.alternative_id).await?;

    Ok((
        StatusCode::OK,
        Json(ApiMessage::ok(
            "Password reset successfully! Please log in with your new password.",
        )),
    )
        .into_response())
}

/// Build the frontend reset link included in outbound emails.
fn build_reset_url(frontend_base_url: &str, token: &str) -> String {
    let base = frontend_base_url.trim_end_matches('/');
    format!("{base}/reset-password#token={token}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_reset_url_trims_trailing_slash() {
        let url = build_reset_url("https://konto.dev/", "tok");
        assert_eq!(url, "https://konto.dev/reset-password#token=tok");
    }
}
