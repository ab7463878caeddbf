//! Password login endpoint.

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;

use super::error::AuthError;
use super::policy::{account_gate, credential_gate};
use super::rate_limit::{RateLimitAction, RateLimitDecision};
use super::session::{authenticate_session, extract_session_token, session_cookie};
use super::state::AuthState;
use super::store::{
    delete_session, find_by_email, insert_session, record_login_failure, record_login_success,
};
use super::types::{ApiMessage, LoginRequest};
use super::utils::{
    extract_client_ip, extract_user_agent, hash_session_token, normalize_email, valid_email,
    verify_password,
};

const BAD_CREDENTIALS: &str = "Incorrect email or password.";

#[utoipa::path(
    post,
    path = "/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in, session cookie set", body = ApiMessage),
        (status = 400, description = "Validation or policy error", body = ApiMessage),
        (status = 401, description = "Bad credentials", body = ApiMessage),
        (status = 429, description = "Too many requests", body = ApiMessage)
    ),
    tag = "auth"
)]
pub async fn login(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LoginRequest>>,
) -> Result<Response, AuthError> {
    let client_ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(client_ip.as_deref(), RateLimitAction::Login)
        == RateLimitDecision::Limited
    {
        return Err(AuthError::RateLimited(
            RateLimitAction::Login.message().to_string(),
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
    let remember = request.remember.unwrap_or(false);

    let email_normalized = normalize_email(&email);
    if !valid_email(&email_normalized) {
        return Err(AuthError::Validation("Invalid email address.".to_string()));
    }

    if auth_state
        .rate_limiter()
        .check_email(&email_normalized, RateLimitAction::Login)
        == RateLimitDecision::Limited
    {
        return Err(AuthError::RateLimited(
            RateLimitAction::Login.message().to_string(),
        ));
    }

    // An unknown email reads exactly like a wrong password.
    let Some(user) = find_by_email(&pool, &email_normalized).await? else {
        return Err(AuthError::Authentication(BAD_CREDENTIALS.to_string()));
    };

    let stored_hash = match credential_gate(&user) {
        Ok(hash) => hash,
        Err(denied) => return Err(AuthError::Policy(denied.message())),
    };

    if !verify_password(&password, stored_hash)? {
        // Failure counters only move for active accounts; the store guards that.
        record_login_failure(&pool, &email_normalized).await?;
        return Err(AuthError::Authentication(BAD_CREDENTIALS.to_string()));
    }

    // Status and verification gates run after the password proof so their
    // messages never leak to a caller without the credential.
    account_gate(user.account_status, user.email_verified)
        .map_err(|denied| AuthError::Policy(denied.message()))?;

    // Drop any presented (stale) session before issuing a new one.
    if let Some(token) = extract_session_token(&headers) {
        delete_session(&pool, &hash_session_token(&token)).await?;
    }

    record_login_success(
        &pool,
        user.alternative_id,
        client_ip.as_deref(),
        extract_user_agent(&headers).as_deref(),
    )
    .await?;

    let ttl_seconds = if remember {
        auth_state.config().remember_session_ttl_seconds()
    } else {
        auth_state.config().session_ttl_seconds()
    };
    let token = insert_session(&pool, user.alternative_id, ttl_seconds).await?;

    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = session_cookie(&auth_state, &token, remember) {
        response_headers.insert(SET_COOKIE, cookie);
    }

    Ok((
        StatusCode::OK,
        response_headers,
        Json(ApiMessage::ok("User logged in successfully!")),
    )
        .into_response())
}
