//! Session endpoints and cookie plumbing for cookie/bearer auth.

use axum::{
    extract::Extension,
    http::{
        header::{InvalidHeaderValue, AUTHORIZATION, SET_COOKIE},
        HeaderMap, HeaderValue, StatusCode,
    },
    response::IntoResponse,
    Json,
};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::error;

use super::{
    rate_limit::{RateLimitAction, RateLimitDecision},
    state::{AuthConfig, AuthState},
    store::{delete_session, lookup_session, SessionRecord},
    types::{ApiMessage, SessionResponse},
    utils::{extract_client_ip, hash_session_token},
};

pub(super) const SESSION_COOKIE_NAME: &str = "konto_session";
pub(super) const LINK_COOKIE_NAME: &str = "konto_link";

#[utoipa::path(
    get,
    path = "/session",
    responses(
        (status = 200, description = "Session is active", body = SessionResponse),
        (status = 204, description = "No active session")
    ),
    tag = "auth"
)]
pub async fn session(headers: HeaderMap, pool: Extension<PgPool>) -> impl IntoResponse {
    // Missing cookies are treated as "no session" to avoid leaking auth state.
    let Some(token) = extract_session_token(&headers) else {
        return StatusCode::NO_CONTENT.into_response();
    };
    // Only the hash is stored; never compare raw tokens against the database.
    let token_hash = hash_session_token(&token);
    match lookup_session(&pool, &token_hash).await {
        Ok(Some(record)) => {
            let response = SessionResponse {
                alternative_id: record.alternative_id,
                email: record.email,
                is_active: record.is_active,
                display_name: record.display_name,
                roles: record.roles,
            };
            (StatusCode::OK, Json(response)).into_response()
        }
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            error!("Failed to lookup session: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Resolve a session cookie into the current principal, if present.
///
/// Returns `Ok(None)` when the cookie is missing or invalid.
pub(crate) async fn authenticate_session(
    headers: &HeaderMap,
    pool: &PgPool,
) -> Result<Option<SessionRecord>, StatusCode> {
    let Some(token) = extract_session_token(headers) else {
        return Ok(None);
    };
    let token_hash = hash_session_token(&token);
    match lookup_session(pool, &token_hash).await {
        Ok(record) => Ok(record),
        Err(err) => {
            error!("Failed to lookup session: {err}");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

#[utoipa::path(
    get,
    path = "/logout",
    responses(
        (status = 200, description = "Session cleared", body = ApiMessage),
        (status = 429, description = "Too many requests", body = ApiMessage)
    ),
    tag = "auth"
)]
pub async fn logout(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> impl IntoResponse {
    let ip = extract_client_ip(&headers);
    if auth_state
        .rate_limiter()
        .check_ip(ip.as_deref(), RateLimitAction::Logout)
        == RateLimitDecision::Limited
    {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(ApiMessage::failure(RateLimitAction::Logout.message())),
        )
            .into_response();
    }

    if let Some(token) = extract_session_token(&headers) {
        let token_hash = hash_session_token(&token);
        if let Err(err) = delete_session(&pool, &token_hash).await {
            error!("Failed to delete session: {err}");
        }
    }

    // Always clear the cookie, even if the session record was missing.
    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = clear_session_cookie(auth_state.config()) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    (
        StatusCode::OK,
        response_headers,
        Json(ApiMessage::ok("User logged out successfully!")),
    )
        .into_response()
}

/// Build a secure `HttpOnly` cookie for the session token.
pub(super) fn session_cookie(
    auth_state: &AuthState,
    token: &str,
    remember: bool,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let ttl_seconds = if remember {
        auth_state.config().remember_session_ttl_seconds()
    } else {
        auth_state.config().session_ttl_seconds()
    };
    // Only mark cookies secure when the frontend is served over HTTPS.
    let secure = auth_state.config().session_cookie_secure();
    let mut cookie = format!(
        "{SESSION_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(super) fn clear_session_cookie(
    auth_config: &AuthConfig,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let secure = auth_config.session_cookie_secure();
    let mut cookie = format!("{SESSION_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

/// Short-lived cookie carrying the opaque pending-link handle.
pub(super) fn link_cookie(
    auth_config: &AuthConfig,
    token: &str,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let ttl_seconds = auth_config.pending_link_ttl().as_secs();
    let secure = auth_config.session_cookie_secure();
    let mut cookie =
        format!("{LINK_COOKIE_NAME}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={ttl_seconds}");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(super) fn clear_link_cookie(
    auth_config: &AuthConfig,
) -> Result<HeaderValue, InvalidHeaderValue> {
    let secure = auth_config.session_cookie_secure();
    let mut cookie = format!("{LINK_COOKIE_NAME}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub(super) fn extract_session_token(headers: &HeaderMap) -> Option<String> {
    if let Some(token) = extract_bearer_token(headers) {
        return Some(token);
    }
    extract_cookie(headers, SESSION_COOKIE_NAME)
}

pub(super) fn extract_link_token(headers: &HeaderMap) -> Option<String> {
    extract_cookie(headers, LINK_COOKIE_NAME)
}

fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    let header = headers.get(axum::http::header::COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == name {
            return Some(val.to_string());
        }
    }
    None
}

fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::super::rate_limit::NoopRateLimiter;
    use super::*;
    use secrecy::SecretString;

    fn auth_state(frontend: &str) -> AuthState {
        let config = AuthConfig::new(
            SecretString::from("test-secret".to_string()),
            frontend.to_string(),
        );
        AuthState::new(config, Arc::new(NoopRateLimiter)).unwrap()
    }

    #[test]
    fn extract_session_token_prefers_bearer() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer raw-token"));
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("konto_session=cookie-token"),
        );
        assert_eq!(
            extract_session_token(&headers),
            Some("raw-token".to_string())
        );
    }

    #[test]
    fn extract_session_token_reads_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("other=x; konto_session=cookie-token; more=y"),
        );
        assert_eq!(
            extract_session_token(&headers),
            Some("cookie-token".to_string())
        );
    }

    #[test]
    fn extract_link_token_ignores_session_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::COOKIE,
            HeaderValue::from_static("konto_session=a; konto_link=b"),
        );
        assert_eq!(extract_link_token(&headers), Some("b".to_string()));
    }

    #[test]
    fn empty_bearer_token_is_none() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_session_token(&headers), None);
    }

    #[test]
    fn session_cookie_honors_remember_ttl() {
        let state = auth_state("https://konto.dev");
        let short = session_cookie(&state, "token", false).unwrap();
        let long = session_cookie(&state, "token", true).unwrap();

        let short = short.to_str().unwrap();
        let long = long.to_str().unwrap();
        assert!(short.contains("Max-Age=43200"), "{short}");
        assert!(long.contains("Max-Age=2592000"), "{long}");
        assert!(short.contains("Secure"));
        assert!(short.contains("HttpOnly"));
    }

    #[test]
    fn cookies_drop_secure_for_plain_http() {
        let state = auth_state("http://localhost:8080");
        let cookie = session_cookie(&state, "token", false).unwrap();
        assert!(!cookie.to_str().unwrap().contains("Secure"));

        let cleared = clear_session_cookie(state.config()).unwrap();
        assert!(cleared.to_str().unwrap().contains("Max-Age=0"));
    }

    #[test]
    fn link_cookie_carries_one_hour_ttl() {
        let state = auth_state("https://konto.dev");
        let cookie = link_cookie(state.config(), "handle").unwrap();
        let cookie = cookie.to_str().unwrap();
        assert!(cookie.contains("konto_link=handle"));
        assert!(cookie.contains("Max-Age=3600"));
    }
}
