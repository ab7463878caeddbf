//! Email verification endpoints: the link target and the resend request.

use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;

use crate::api::email::{enqueue_email, verification_email};

use super::error::AuthError;
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::register::build_verify_url;
use super::state::AuthState;
use super::store::{find_by_email, increment_verification_emails_sent, set_verified};
use super::token::EMAIL_VERIFY_PURPOSE;
use super::types::{ApiMessage, ResendVerificationRequest};
use super::utils::{extract_client_ip, normalize_email, valid_email};

const BAD_LINK: &str = "Your verification link is invalid or has expired. Please request a new one.";

#[utoipa::path(
    get,
    path = "/verify-email/{token}",
    params(
        ("token" = String, Path, description = "Signed verification token from the email link")
    ),
    responses(
        (status = 200, description = "Email verified", body = ApiMessage),
        (status = 400, description = "Invalid or expired link", body = ApiMessage),
        (status = 429, description = "Too many requests", body = ApiMessage)
    ),
    tag = "auth"
)]
pub async fn verify_email(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Path(token): Path<String>,
) -> Result<Response, AuthError> {
    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::VerifyEmail)
        == RateLimitDecision::Limited
    {
        return Err(AuthError::RateLimited(
            RateLimitAction::VerifyEmail.message().to_string(),
        ));
    }

    let max_age = auth_state.config().email_token_ttl_seconds();
    let email = auth_state
        .signer()
        .verify(EMAIL_VERIFY_PURPOSE, &token, max_age)
        .map_err(|_| AuthError::Validation(BAD_LINK.to_string()))?;

    // Re-verifying an already verified account is a success; only a missing
    // account turns the link invalid.
    if !set_verified(&pool, &email).await? {
        return Err(AuthError::Validation(BAD_LINK.to_string()));
    }

    Ok((
        StatusCode::OK,
        Json(ApiMessage::ok("Email verified successfully!")),
    )
        .into_response())
}

#[utoipa::path(
    post,
    path = "/resend-verification-email",
    request_body = ResendVerificationRequest,
    responses(
        (status = 200, description = "Verification email queued", body = ApiMessage),
        (status = 400, description = "Unknown email or already verified", body = ApiMessage),
        (status = 429, description = "Too many requests", body = ApiMessage)
    ),
    tag = "auth"
)]
pub async fn resend_verification_email(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ResendVerificationRequest>>,
) -> Result<Response, AuthError> {
    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::ResendVerification)
        == RateLimitDecision::Limited
    {
        return Err(AuthError::RateLimited(
            RateLimitAction::ResendVerification.message().to_string(),
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
        .check_email(&email_normalized, RateLimitAction::ResendVerification)
        == RateLimitDecision::Limited
    {
        return Err(AuthError::RateLimited(
            RateLimitAction::ResendVerification.message().to_string(),
        ));
    }

    let Some(user) = find_by_email(&pool, &email_normalized).await? else {
        return Err(AuthError::Validation(
            "User with that email does not exist.".to_string(),
        ));
    };
    if user.email_verified {
        return Err(AuthError::Validation(
            "This email address is already verified.".to_string(),
        ));
    }

    let token = auth_state
        .signer()
        .issue(EMAIL_VERIFY_PURPOSE, &email_normalized);
    let verify_url = build_verify_url(auth_state.config().frontend_base_url(), &token);

    // Email and counter bump stay consistent.
    let mut tx = pool
        .begin()
        .await
        .map_err(|err| AuthError::Internal(err.into()))?;
    enqueue_email(&mut tx, &verification_email(&email_normalized, &verify_url)).await?;
    increment_verification_emails_sent(&mut tx, &email_normalized).await?;
    tx.commit()
        .await
        .map_err(|err| AuthError::Internal(err.into()))?;

    Ok((
        StatusCode::OK,
        Json(ApiMessage::ok(
            "Verification email sent. Please check your inbox.",
        )),
    )
        .into_response())
}
