//! Registration endpoint for local (email + password) accounts.

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::api::email::{enqueue_email, verification_email};

use super::error::AuthError;
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::session::authenticate_session;
use super::state::AuthState;
use super::store::{insert_user, InsertOutcome, NewUser};
use super::token::EMAIL_VERIFY_PURPOSE;
use super::types::{ApiMessage, RegisterRequest};
use super::utils::{
    extract_client_ip, extract_user_agent, hash_password, normalize_email, valid_email,
    validate_password,
};

#[utoipa::path(
    post,
    path = "/register",
    request_body = RegisterRequest,
    responses(
        (status = 200, description = "Account created, verification email queued", body = ApiMessage),
        (status = 400, description = "Validation error or duplicate email", body = ApiMessage),
        (status = 429, description = "Too many requests", body = ApiMessage)
    ),
    tag = "auth"
)]
pub async fn register(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<RegisterRequest>>,
) -> Result<Response, AuthError> {
    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Register)
        == RateLimitDecision::Limited
    {
        return Err(AuthError::RateLimited(
            RateLimitAction::Register.message().to_string(),
        ));
    }

    if authenticate_session(&headers, &pool)
        .await
        .map_err(|_| AuthError::Internal(anyhow::anyhow!("session lookup failed")))?
        .is_some()
    {
        return Err(AuthError::Validation(
            "You are already logged in.".to_string(),
        ));
    }

    let Some(Json(request)) = payload else {
        return Err(AuthError::Validation("Missing payload".to_string()));
    };

    let (Some(email), Some(password)) = (request.email, request.password) else {
        return Err(AuthError::Validation(
            "Email and password are required.".to_string(),
        ));
    };
    if request.terms != Some(true) {
        return Err(AuthError::Validation(
            "You must agree to the Terms and Conditions and Privacy Policy.".to_string(),
        ));
    }

    let email_normalized = normalize_email(&email);
    if !valid_email(&email_normalized) {
        return Err(AuthError::Validation("Invalid email address.".to_string()));
    }
    if let Some(violation) = validate_password(&password) {
        return Err(AuthError::Validation(violation.to_string()));
    }

    if auth_state
        .rate_limiter()
        .check_email(&email_normalized, RateLimitAction::Register)
        == RateLimitDecision::Limited
    {
        return Err(AuthError::RateLimited(
            RateLimitAction::Register.message().to_string(),
        ));
    }

    let password_hash = hash_password(&password)?;
    let user_agent = extract_user_agent(&headers);

    let token = auth_state.signer().issue(EMAIL_VERIFY_PURPOSE, &email_normalized);
    let verify_url = build_verify_url(auth_state.config().frontend_base_url(), &token);

    // Account row and verification email commit or roll back together.
    let mut tx = pool
        .begin()
        .await
        .map_err(|err| AuthError::Internal(err.into()))?;

    let new_user = NewUser {
        email: &email_normalized,
        password_hash: Some(&password_hash),
        alternative_id: Uuid::new_v4(),
        email_verified: false,
        auth_provider: "local",
        profile: json!({}),
        preferences: json!({}),
        connections: json!({}),
        registration_ip: client_ip.as_deref(),
        user_agent: user_agent.as_deref(),
        via_provider_login: false,
    };

    match insert_user(&mut tx, &new_user).await? {
        InsertOutcome::Created => {}
        InsertOutcome::Conflict => {
            let _ = tx.rollback().await;
            return Err(AuthError::Conflict(
                "User with that email already exists.".to_string(),
            ));
        }
    }

    enqueue_email(&mut tx, &verification_email(&email_normalized, &verify_url)).await?;

    tx.commit()
        .await
        .map_err(|err| AuthError::Internal(err.into()))?;

    Ok((
        StatusCode::OK,
        Json(ApiMessage::ok(
            "User registered successfully! Please check your email to verify your account.",
        )),
    )
        .into_response())
}

/// Build the frontend verification link included in outbound emails.
pub(super) fn build_verify_url(frontend_base_url: &str, token: &str) -> String {
    let base = frontend_base_url.trim_end_matches('/');
    format!("{base}/verify-email/{token}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_verify_url_trims_trailing_slash() {
        let url = build_verify_url("https://konto.dev/", "token");
        assert_eq!(url, "https://konto.dev/verify-email/token");
    }
}
