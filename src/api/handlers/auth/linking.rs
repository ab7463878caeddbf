//! Account linking: attach a provider identity to an existing account after
//! the user proves ownership.
//!
//! Ownership proof is the account's password when it has one, or an
//! authenticated session for the same account otherwise (obtained by signing
//! in with the originally linked provider).

use axum::{
    extract::Extension,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;

use super::error::AuthError;
use super::policy::account_gate;
use super::session::{
    authenticate_session, clear_link_cookie, extract_link_token, session_cookie,
};
use super::state::AuthState;
use super::store::{
    find_by_email, insert_session, record_login_failure, record_login_success,
    upsert_connection,
};
use super::types::{ApiMessage, LinkAccountRequest, LinkingStatusResponse};
use super::utils::{extract_client_ip, extract_user_agent, verify_password};

const LINK_EXPIRED: &str =
    "Your linking request has expired. Please sign in with the provider again.";

#[utoipa::path(
    get,
    path = "/linking-status",
    responses(
        (status = 200, description = "Pending link details, if any", body = LinkingStatusResponse)
    ),
    tag = "oauth"
)]
pub async fn linking_status(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Result<Response, AuthError> {
    let none = LinkingStatusResponse {
        pending: false,
        provider: None,
        email: None,
        requires_password: false,
    };

    let Some(token) = extract_link_token(&headers) else {
        return Ok((StatusCode::OK, Json(none)).into_response());
    };
    let Some(link) = auth_state.oauth().peek_pending_link(&token).await else {
        return Ok((StatusCode::OK, Json(none)).into_response());
    };

    let requires_password = find_by_email(&pool, &link.email)
        .await?
        .is_some_and(|user| user.password_hash.is_some());

    Ok((
        StatusCode::OK,
        Json(LinkingStatusResponse {
            pending: true,
            provider: Some(link.provider),
            email: Some(link.email),
            requires_password,
        }),
    )
        .into_response())
}

#[utoipa::path(
    post,
    path = "/link-account",
    request_body = LinkAccountRequest,
    responses(
        (status = 200, description = "Provider linked, session issued", body = ApiMessage),
        (status = 400, description = "No pending link or policy error", body = ApiMessage),
        (status = 401, description = "Ownership proof failed", body = ApiMessage)
    ),
    tag = "oauth"
)]
pub async fn link_account(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LinkAccountRequest>>,
) -> Result<Response, AuthError> {
    let Some(token) = extract_link_token(&headers) else {
        return Err(AuthError::Validation(LINK_EXPIRED.to_string()));
    };
    // Single use: a failed proof requires a fresh provider round trip.
    let Some(link) = auth_state.oauth().take_pending_link(&token).await else {
        return Err(AuthError::Validation(LINK_EXPIRED.to_string()));
    };

    let Some(user) = find_by_email(&pool, &link.email).await? else {
        return Err(AuthError::Validation(LINK_EXPIRED.to_string()));
    };

    // The account may have changed state while the link was pending, and an
    // unverified account must verify before it can link or log in.
    account_gate(user.account_status, user.email_verified)
        .map_err(|denied| AuthError::Policy(denied.message()))?;

    let client_ip = extract_client_ip(&headers);
    let user_agent = extract_user_agent(&headers);

    match user.password_hash.as_deref() {
        Some(stored_hash) => {
            let password = payload
                .and_then(|Json(request)| request.password)
                .ok_or_else(|| {
                    AuthError::Validation(
                        "Your password is required to link this provider.".to_string(),
                    )
                })?;
            if !verify_password(&password, stored_hash)? {
                record_login_failure(&pool, &link.email).await?;
                return Err(AuthError::Authentication("Incorrect password.".to_string()));
            }
        }
        None => {
            // Provider-method account: an authenticated session for the same
            // account stands in for the missing password.
            let principal = authenticate_session(&headers, &pool)
                .await
                .map_err(|_| AuthError::Internal(anyhow::anyhow!("session lookup failed")))?;
            let owns_account = principal
                .is_some_and(|session| session.alternative_id == user.alternative_id);
            if !owns_account {
                return Err(AuthError::Authentication(
                    "Sign in with your original provider first to confirm ownership.".to_string(),
                ));
            }
        }
    }

    upsert_connection(
        &pool,
        &link.email,
        &link.provider,
        &link.oauth_id,
        &link.access_token,
    )
    .await?;
    record_login_success(
        &pool,
        user.alternative_id,
        client_ip.as_deref(),
        user_agent.as_deref(),
    )
    .await?;

    let ttl_seconds = auth_state.config().remember_session_ttl_seconds();
    let session_token = insert_session(&pool, user.alternative_id, ttl_seconds).await?;

    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = session_cookie(&auth_state, &session_token, true) {
        response_headers.append(SET_COOKIE, cookie);
    }
    if let Ok(cookie) = clear_link_cookie(auth_state.config()) {
        response_headers.append(SET_COOKIE, cookie);
    }

    Ok((
        StatusCode::OK,
        response_headers,
        Json(ApiMessage::ok("Account linked successfully!")),
    )
        .into_response())
}
