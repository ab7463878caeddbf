//! OAuth2 login: authorize redirects, callback handling and provider
//! profile extraction.
//!
//! The callback resolves to one of three outcomes: a brand new account (the
//! callback is also its first login), a returning linked account, or a
//! pending link when the email already belongs to an unlinked account.

use anyhow::{anyhow, Context};
use axum::{
    extract::{Extension, Path, Query},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;
use url::Url;
use uuid::Uuid;

use super::error::AuthError;
use super::policy::account_gate;
use super::session::{authenticate_session, link_cookie, session_cookie};
use super::state::{AuthState, PendingLink};
use super::store::{
    find_by_email, insert_session, insert_user, record_login_success, upsert_connection,
    InsertOutcome, NewUser,
};
use super::utils::{extract_client_ip, extract_user_agent, normalize_email};

/// Endpoints and credentials for one OAuth2 provider.
#[derive(Clone)]
pub struct ProviderConfig {
    name: String,
    client_id: String,
    client_secret: SecretString,
    authorize_url: String,
    token_url: String,
    userinfo_url: String,
    /// GitHub-style providers keep emails behind a separate endpoint.
    emails_url: Option<String>,
    scopes: Vec<String>,
}

impl ProviderConfig {
    #[must_use]
    pub fn google(client_id: String, client_secret: SecretString) -> Self {
        Self {
            name: "google".to_string(),
            client_id,
            client_secret,
            authorize_url: "https://accounts.google.com/o/oauth2/auth".to_string(),
            token_url: "https://accounts.google.com/o/oauth2/token".to_string(),
            userinfo_url: "https://www.googleapis.com/oauth2/v3/userinfo".to_string(),
            emails_url: None,
            scopes: vec![
                "openid".to_string(),
                "email".to_string(),
                "profile".to_string(),
            ],
        }
    }

    #[must_use]
    pub fn github(client_id: String, client_secret: SecretString) -> Self {
        Self {
            name: "github".to_string(),
            client_id,
            client_secret,
            authorize_url: "https://github.com/login/oauth/authorize".to_string(),
            token_url: "https://github.com/login/oauth/access_token".to_string(),
            userinfo_url: "https://api.github.com/user".to_string(),
            emails_url: Some("https://api.github.com/user/emails".to_string()),
            scopes: vec!["user:email".to_string()],
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Identity claims extracted from a provider's userinfo response.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct ExternalProfile {
    pub(super) id: String,
    pub(super) email: Option<String>,
    pub(super) email_verified: bool,
    pub(super) name: Option<String>,
    pub(super) picture: Option<String>,
    pub(super) bio: Option<String>,
}

/// Pull the claims out of a userinfo document. Providers with a separate
/// emails endpoint (GitHub) report the primary address there.
pub(super) fn extract_profile(
    provider: &ProviderConfig,
    userinfo: &serde_json::Value,
    emails: Option<&serde_json::Value>,
) -> Result<ExternalProfile, anyhow::Error> {
    if provider.emails_url.is_some() {
        let id = userinfo
            .get("id")
            .and_then(serde_json::Value::as_i64)
            .map(|id| id.to_string())
            .or_else(|| {
                userinfo
                    .get("id")
                    .and_then(serde_json::Value::as_str)
                    .map(str::to_string)
            })
            .ok_or_else(|| anyhow!("userinfo is missing the account id"))?;

        let primary = emails
            .and_then(serde_json::Value::as_array)
            .and_then(|entries| {
                entries
                    .iter()
                    .find(|entry| {
                        entry.get("primary").and_then(serde_json::Value::as_bool) == Some(true)
                    })
                    .or_else(|| entries.first())
            });
        let email = primary
            .and_then(|entry| entry.get("email"))
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        let email_verified = primary
            .and_then(|entry| entry.get("verified"))
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);

        Ok(ExternalProfile {
            id,
            email,
            email_verified,
            name: string_claim(userinfo, "name"),
            picture: string_claim(userinfo, "avatar_url"),
            bio: string_claim(userinfo, "bio"),
        })
    } else {
        let id = userinfo
            .get("sub")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| anyhow!("userinfo is missing the subject claim"))?;

        Ok(ExternalProfile {
            id,
            email: string_claim(userinfo, "email"),
            email_verified: userinfo
                .get("email_verified")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false),
            name: string_claim(userinfo, "name"),
            picture: string_claim(userinfo, "picture"),
            bio: None,
        })
    }
}

fn string_claim(value: &serde_json::Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(serde_json::Value::as_str)
        .filter(|claim| !claim.is_empty())
        .map(str::to_string)
}

pub(super) fn callback_redirect_uri(frontend_base_url: &str, provider: &str) -> String {
    let base = frontend_base_url.trim_end_matches('/');
    format!("{base}/callback/{provider}")
}

/// Build the authorize URL the user agent is redirected to.
fn build_authorize_url(
    provider: &ProviderConfig,
    redirect_uri: &str,
    state: &str,
) -> Result<String, anyhow::Error> {
    let mut url = Url::parse(&provider.authorize_url).context("bad authorize URL")?;
    url.query_pairs_mut()
        .append_pair("client_id", &provider.client_id)
        .append_pair("redirect_uri", redirect_uri)
        .append_pair("response_type", "code")
        .append_pair("scope", &provider.scopes.join(" "))
        .append_pair("state", state);
    Ok(url.into())
}

/// Frontend login page with an error banner.
fn login_error_redirect(frontend_base_url: &str, message: &str) -> Response {
    let base = frontend_base_url.trim_end_matches('/');
    match Url::parse(&format!("{base}/login")) {
        Ok(mut url) => {
            url.query_pairs_mut().append_pair("error", message);
            Redirect::to(url.as_str()).into_response()
        }
        Err(_) => Redirect::to(&format!("{base}/login")).into_response(),
    }
}

fn frontend_home_redirect(frontend_base_url: &str) -> Redirect {
    let base = frontend_base_url.trim_end_matches('/');
    Redirect::to(&format!("{base}/"))
}

#[utoipa::path(
    get,
    path = "/authorize/{provider}",
    params(
        ("provider" = String, Path, description = "Configured provider name")
    ),
    responses(
        (status = 307, description = "Redirect to the provider's consent screen"),
        (status = 404, description = "Unknown provider")
    ),
    tag = "oauth"
)]
pub async fn authorize(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Path(provider): Path<String>,
) -> Result<Response, AuthError> {
    let Some(provider_config) = auth_state.config().provider(&provider) else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };

    if authenticate_session(&headers, &pool)
        .await
        .map_err(|_| AuthError::Internal(anyhow!("session lookup failed")))?
        .is_some()
    {
        return Err(AuthError::Validation(
            "You are already logged in.".to_string(),
        ));
    }

    let state = auth_state.oauth().store_authorize_state(&provider).await?;
    let redirect_uri =
        callback_redirect_uri(auth_state.config().frontend_base_url(), &provider);
    let url = build_authorize_url(provider_config, &redirect_uri, &state)?;

    Ok(Redirect::temporary(&url).into_response())
}

#[utoipa::path(
    get,
    path = "/callback/{provider}",
    params(
        ("provider" = String, Path, description = "Configured provider name"),
        ("code" = Option<String>, Query, description = "Authorization code"),
        ("state" = Option<String>, Query, description = "Opaque state issued at authorize time")
    ),
    responses(
        (status = 303, description = "Redirect to the frontend"),
        (status = 401, description = "Handshake failed"),
        (status = 404, description = "Unknown provider")
    ),
    tag = "oauth"
)]
pub async fn callback(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Path(provider): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, AuthError> {
    let Some(provider_config) = auth_state.config().provider(&provider) else {
        return Ok(StatusCode::NOT_FOUND.into_response());
    };
    let frontend = auth_state.config().frontend_base_url();

    // The provider reports consent denial via an error parameter.
    if let Some(provider_error) = params.get("error") {
        error!("Provider {provider} returned an error: {provider_error}");
        return Ok(login_error_redirect(
            frontend,
            "Authentication was cancelled or failed. Please try again.",
        ));
    }

    // The state must consume an outstanding handshake for this provider.
    let state_matches = match params.get("state") {
        Some(state) => {
            auth_state.oauth().take_authorize_state(state).await.as_deref()
                == Some(provider.as_str())
        }
        None => false,
    };
    if !state_matches {
        return Err(AuthError::Authentication(
            "Invalid OAuth state. Please try signing in again.".to_string(),
        ));
    }

    let Some(code) = params.get("code") else {
        return Err(AuthError::Authentication(
            "Missing authorization code. Please try signing in again.".to_string(),
        ));
    };

    let redirect_uri = callback_redirect_uri(frontend, &provider);
    let access_token = exchange_code(&auth_state, provider_config, code, &redirect_uri)
        .await
        .map_err(AuthError::Upstream)?;
    let profile = fetch_profile(&auth_state, provider_config, &access_token)
        .await
        .map_err(AuthError::Upstream)?;

    // Without a verified email there is nothing to key the account on.
    let Some(email) = profile.email.as_deref() else {
        return Ok(login_error_redirect(
            frontend,
            "Your provider did not share an email address.",
        ));
    };
    if !profile.email_verified {
        return Ok(login_error_redirect(
            frontend,
            "Your provider email address is not verified.",
        ));
    }

    let email_normalized = normalize_email(email);
    let client_ip = extract_client_ip(&headers);
    let user_agent = extract_user_agent(&headers);

    let existing = match find_by_email(&pool, &email_normalized).await? {
        Some(user) => Some(user),
        None => {
            match create_provider_account(
                &pool,
                &provider,
                &profile,
                &access_token,
                &email_normalized,
                client_ip.as_deref(),
                user_agent.as_deref(),
            )
            .await?
            {
                Some(response) => {
                    return finish_login(&pool, &auth_state, response).await;
                }
                // Lost a creation race; fall through to the existing-account path.
                None => find_by_email(&pool, &email_normalized).await?,
            }
        }
    };

    let Some(user) = existing else {
        return Err(AuthError::Internal(anyhow!(
            "account vanished during provider callback"
        )));
    };

    // Same gate as local login: an unverified or non-active account never
    // acquires a session, provider identity or not.
    if let Err(denied) = account_gate(user.account_status, user.email_verified) {
        return Ok(login_error_redirect(frontend, &denied.message()));
    }

    if user.connections.contains_key(&provider) {
        // Returning linked account: refresh the connection and log in.
        upsert_connection(&pool, &email_normalized, &provider, &profile.id, &access_token).await?;
        record_login_success(
            &pool,
            user.alternative_id,
            client_ip.as_deref(),
            user_agent.as_deref(),
        )
        .await?;
        return finish_login(&pool, &auth_state, user.alternative_id).await;
    }

    // Same email, different method: park the identity and ask the user to
    // prove ownership before linking.
    let link_token = auth_state
        .oauth()
        .store_pending_link(PendingLink {
            provider: provider.clone(),
            oauth_id: profile.id.clone(),
            access_token,
            email: email_normalized,
        })
        .await?;

    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = link_cookie(auth_state.config(), &link_token) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    let base = frontend.trim_end_matches('/');
    Ok((response_headers, Redirect::to(&format!("{base}/link-account"))).into_response())
}

/// Create the account row for a first-time provider login. Returns the new
/// `alternative_id`, or None when a concurrent callback won the insert.
async fn create_provider_account(
    pool: &PgPool,
    provider: &str,
    profile: &ExternalProfile,
    access_token: &str,
    email_normalized: &str,
    client_ip: Option<&str>,
    user_agent: Option<&str>,
) -> Result<Option<Uuid>, AuthError> {
    let alternative_id = Uuid::new_v4();
    let connection = json!({
        provider: {
            "oauth_id": profile.id,
            "token": access_token,
            "connected_at": chrono::Utc::now(),
            "last_updated": chrono::Utc::now(),
        }
    });
    let profile_doc = json!({
        "display_name": profile.name,
        "profile_picture": profile.picture,
        "bio": profile.bio,
    });

    let mut tx = pool
        .begin()
        .await
        .map_err(|err| AuthError::Internal(err.into()))?;
    let new_user = NewUser {
        email: email_normalized,
        password_hash: None,
        alternative_id,
        email_verified: true,
        auth_provider: provider,
        profile: profile_doc,
        preferences: json!({}),
        connections: connection,
        registration_ip: client_ip,
        user_agent,
        via_provider_login: true,
    };
    let outcome = insert_user(&mut tx, &new_user).await?;
    tx.commit()
        .await
        .map_err(|err| AuthError::Internal(err.into()))?;

    match outcome {
        InsertOutcome::Created => Ok(Some(alternative_id)),
        InsertOutcome::Conflict => Ok(None),
    }
}

/// Issue a remember-length session and send the user agent home.
async fn finish_login(
    pool: &PgPool,
    auth_state: &AuthState,
    alternative_id: Uuid,
) -> Result<Response, AuthError> {
    let ttl_seconds = auth_state.config().remember_session_ttl_seconds();
    let token = insert_session(pool, alternative_id, ttl_seconds).await?;

    let mut response_headers = HeaderMap::new();
    if let Ok(cookie) = session_cookie(auth_state, &token, true) {
        response_headers.insert(SET_COOKIE, cookie);
    }
    Ok((
        response_headers,
        frontend_home_redirect(auth_state.config().frontend_base_url()),
    )
        .into_response())
}

/// Exchange the authorization code for an access token.
async fn exchange_code(
    auth_state: &AuthState,
    provider: &ProviderConfig,
    code: &str,
    redirect_uri: &str,
) -> Result<String, anyhow::Error> {
    let response = auth_state
        .http()
        .post(&provider.token_url)
        .header(axum::http::header::ACCEPT, "application/json")
        .form(&[
            ("client_id", provider.client_id.as_str()),
            ("client_secret", provider.client_secret.expose_secret()),
            ("code", code),
            ("grant_type", "authorization_code"),
            ("redirect_uri", redirect_uri),
        ])
        .send()
        .await
        .context("token exchange request failed")?;

    if !response.status().is_success() {
        return Err(anyhow!(
            "token endpoint returned {status}",
            status = response.status()
        ));
    }

    let body: serde_json::Value = response
        .json()
        .await
        .context("token endpoint returned malformed JSON")?;
    body.get("access_token")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("token endpoint response is missing access_token"))
}

/// Fetch the userinfo (and emails, when split out) and extract the claims.
async fn fetch_profile(
    auth_state: &AuthState,
    provider: &ProviderConfig,
    access_token: &str,
) -> Result<ExternalProfile, anyhow::Error> {
    let userinfo: serde_json::Value = auth_state
        .http()
        .get(&provider.userinfo_url)
        .bearer_auth(access_token)
        .send()
        .await
        .context("userinfo request failed")?
        .error_for_status()
        .context("userinfo endpoint rejected the token")?
        .json()
        .await
        .context("userinfo endpoint returned malformed JSON")?;

    let emails = match &provider.emails_url {
        Some(emails_url) => Some(
            auth_state
                .http()
                .get(emails_url)
                .bearer_auth(access_token)
                .send()
                .await
                .context("emails request failed")?
                .error_for_status()
                .context("emails endpoint rejected the token")?
                .json::<serde_json::Value>()
                .await
                .context("emails endpoint returned malformed JSON")?,
        ),
        None => None,
    };

    extract_profile(provider, &userinfo, emails.as_ref())
}
