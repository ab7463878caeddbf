//! Auth state, configuration and the ephemeral OAuth handshake maps.

use anyhow::{Context, Result};
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::oauth::ProviderConfig;
use super::rate_limit::RateLimiter;
use super::token::{TokenSigner, TOKEN_MAX_AGE_SECONDS};
use super::utils::generate_opaque_token;

const DEFAULT_SESSION_TTL_SECONDS: i64 = 12 * 60 * 60;
const DEFAULT_REMEMBER_SESSION_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_AUTHORIZE_STATE_TTL: Duration = Duration::from_secs(10 * 60);
const DEFAULT_PENDING_LINK_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Clone)]
pub struct AuthConfig {
    secret_key: SecretString,
    frontend_base_url: String,
    session_ttl_seconds: i64,
    remember_session_ttl_seconds: i64,
    email_token_ttl_seconds: i64,
    authorize_state_ttl: Duration,
    pending_link_ttl: Duration,
    providers: HashMap<String, ProviderConfig>,
}

impl AuthConfig {
    #[must_use]
    pub fn new(secret_key: SecretString, frontend_base_url: String) -> Self {
        Self {
            secret_key,
            frontend_base_url,
            session_ttl_seconds: DEFAULT_SESSION_TTL_SECONDS,
            remember_session_ttl_seconds: DEFAULT_REMEMBER_SESSION_TTL_SECONDS,
            email_token_ttl_seconds: TOKEN_MAX_AGE_SECONDS,
            authorize_state_ttl: DEFAULT_AUTHORIZE_STATE_TTL,
            pending_link_ttl: DEFAULT_PENDING_LINK_TTL,
            providers: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_provider(mut self, provider: ProviderConfig) -> Self {
        self.providers.insert(provider.name().to_string(), provider);
        self
    }

    #[must_use]
    pub fn with_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_remember_session_ttl_seconds(mut self, seconds: i64) -> Self {
        self.remember_session_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_email_token_ttl_seconds(mut self, seconds: i64) -> Self {
        self.email_token_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_authorize_state_ttl(mut self, ttl: Duration) -> Self {
        self.authorize_state_ttl = ttl;
        self
    }

    #[must_use]
    pub fn with_pending_link_ttl(mut self, ttl: Duration) -> Self {
        self.pending_link_ttl = ttl;
        self
    }

    pub(crate) fn frontend_base_url(&self) -> &str {
        &self.frontend_base_url
    }

    pub(super) fn secret_key(&self) -> &SecretString {
        &self.secret_key
    }

    pub(super) fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.get(name)
    }

    pub(super) fn session_ttl_seconds(&self) -> i64 {
        self.session_ttl_seconds
    }

    pub(super) fn remember_session_ttl_seconds(&self) -> i64 {
        self.remember_session_ttl_seconds
    }

    pub(super) fn email_token_ttl_seconds(&self) -> i64 {
        self.email_token_ttl_seconds
    }

    pub(super) fn authorize_state_ttl(&self) -> Duration {
        self.authorize_state_ttl
    }

    pub(super) fn pending_link_ttl(&self) -> Duration {
        self.pending_link_ttl
    }

    pub(super) fn session_cookie_secure(&self) -> bool {
        self.frontend_base_url.starts_with("https://")
    }
}

/// One outstanding authorize redirect, keyed by the `state` parameter.
struct AuthorizeHandshake {
    provider: String,
    created_at: Instant,
}

/// A provider identity waiting for the user to confirm ownership of an
/// existing account with the same email.
#[derive(Debug, Clone)]
pub(super) struct PendingLink {
    pub(super) provider: String,
    pub(super) oauth_id: String,
    pub(super) access_token: String,
    pub(super) email: String,
}

struct PendingLinkEntry {
    link: PendingLink,
    created_at: Instant,
}

/// In-memory handshake state. Entries are single-use (`take_*`) and expire
/// after their TTL; expired entries are swept on each insert.
pub struct OauthState {
    authorize_ttl: Duration,
    link_ttl: Duration,
    authorize_states: Mutex<HashMap<String, AuthorizeHandshake>>,
    pending_links: Mutex<HashMap<String, PendingLinkEntry>>,
}

impl OauthState {
    pub(super) fn new(authorize_ttl: Duration, link_ttl: Duration) -> Self {
        Self {
            authorize_ttl,
            link_ttl,
            authorize_states: Mutex::new(HashMap::new()),
            pending_links: Mutex::new(HashMap::new()),
        }
    }

    pub(super) async fn store_authorize_state(&self, provider: &str) -> Result<String> {
        let state = generate_opaque_token()?;
        let mut states = self.authorize_states.lock().await;
        states.retain(|_, entry| entry.created_at.elapsed() < self.authorize_ttl);
        states.insert(
            state.clone(),
            AuthorizeHandshake {
                provider: provider.to_string(),
                created_at: Instant::now(),
            },
        );
        Ok(state)
    }

    /// Consume an authorize state, returning the provider it was issued for.
    pub(super) async fn take_authorize_state(&self, state: &str) -> Option<String> {
        let mut states = self.authorize_states.lock().await;
        match states.remove(state) {
            Some(entry) if entry.created_at.elapsed() < self.authorize_ttl => Some(entry.provider),
            _ => None,
        }
    }

    pub(super) async fn store_pending_link(&self, link: PendingLink) -> Result<String> {
        let token = generate_opaque_token()?;
        let mut links = self.pending_links.lock().await;
        links.retain(|_, entry| entry.created_at.elapsed() < self.link_ttl);
        links.insert(
            token.clone(),
            PendingLinkEntry {
                link,
                created_at: Instant::now(),
            },
        );
        Ok(token)
    }

    /// Consume a pending link. A second call with the same token returns None.
    pub(super) async fn take_pending_link(&self, token: &str) -> Option<PendingLink> {
        let mut links = self.pending_links.lock().await;
        match links.remove(token) {
            Some(entry) if entry.created_at.elapsed() < self.link_ttl => Some(entry.link),
            _ => None,
        }
    }

    /// Non-consuming read for the linking status endpoint.
    pub(super) async fn peek_pending_link(&self, token: &str) -> Option<PendingLink> {
        let links = self.pending_links.lock().await;
        match links.get(token) {
            Some(entry) if entry.created_at.elapsed() < self.link_ttl => Some(entry.link.clone()),
            _ => None,
        }
    }
}

pub struct AuthState {
    config: AuthConfig,
    signer: TokenSigner,
    rate_limiter: Arc<dyn RateLimiter>,
    oauth: OauthState,
    http: reqwest::Client,
}

impl AuthState {
    pub fn new(config: AuthConfig, rate_limiter: Arc<dyn RateLimiter>) -> Result<Self> {
        let signer = TokenSigner::new(config.secret_key().clone());
        let oauth = OauthState::new(config.authorize_state_ttl(), config.pending_link_ttl());
        let http = reqwest::Client::builder()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            config,
            signer,
            rate_limiter,
            oauth,
            http,
        })
    }

    #[must_use]
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(super) fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    pub(super) fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }

    pub(super) fn oauth(&self) -> &OauthState {
        &self.oauth
    }

    pub(super) fn http(&self) -> &reqwest::Client {
        &self.http
    }
}

#[cfg(test)]
mod tests {
    use super::super::rate_limit::{NoopRateLimiter, RateLimiter};
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig::new(
            SecretString::from("test-secret".to_string()),
            "https://konto.dev".to_string(),
        )
    }

    #[test]
    fn auth_config_defaults_and_overrides() {
        let config = config();

        assert_eq!(config.frontend_base_url(), "https://konto.dev");
        assert_eq!(config.session_ttl_seconds(), DEFAULT_SESSION_TTL_SECONDS);
        assert_eq!(
            config.remember_session_ttl_seconds(),
            DEFAULT_REMEMBER_SESSION_TTL_SECONDS
        );
        assert_eq!(config.email_token_ttl_seconds(), TOKEN_MAX_AGE_SECONDS);
        assert!(config.session_cookie_secure());

        let config = config
            .with_session_ttl_seconds(60)
            .with_remember_session_ttl_seconds(120)
            .with_email_token_ttl_seconds(30);

        assert_eq!(config.session_ttl_seconds(), 60);
        assert_eq!(config.remember_session_ttl_seconds(), 120);
        assert_eq!(config.email_token_ttl_seconds(), 30);
    }

    #[test]
    fn plain_http_frontend_disables_secure_cookies() {
        let config = AuthConfig::new(
            SecretString::from("test-secret".to_string()),
            "http://localhost:8080".to_string(),
        );
        assert!(!config.session_cookie_secure());
    }

    #[test]
    fn providers_are_looked_up_by_name() {
        let config = config().with_provider(super::super::oauth::ProviderConfig::google(
            "id".to_string(),
            SecretString::from("secret".to_string()),
        ));
        assert!(config.provider("google").is_some());
        assert!(config.provider("github").is_none());
    }

    #[tokio::test]
    async fn authorize_state_is_single_use() {
        let oauth = OauthState::new(Duration::from_secs(600), Duration::from_secs(3600));
        let state = oauth.store_authorize_state("google").await.unwrap();

        assert_eq!(
            oauth.take_authorize_state(&state).await.as_deref(),
            Some("google")
        );
        assert!(oauth.take_authorize_state(&state).await.is_none());
    }

    #[tokio::test]
    async fn expired_authorize_state_is_rejected() {
        let oauth = OauthState::new(Duration::ZERO, Duration::from_secs(3600));
        let state = oauth.store_authorize_state("github").await.unwrap();
        assert!(oauth.take_authorize_state(&state).await.is_none());
    }

    #[tokio::test]
    async fn pending_link_peek_does_not_consume() {
        let oauth = OauthState::new(Duration::from_secs(600), Duration::from_secs(3600));
        let token = oauth
            .store_pending_link(PendingLink {
                provider: "google".to_string(),
                oauth_id: "123".to_string(),
                access_token: "ya29".to_string(),
                email: "alice@example.com".to_string(),
            })
            .await
            .unwrap();

        assert!(oauth.peek_pending_link(&token).await.is_some());
        assert!(oauth.peek_pending_link(&token).await.is_some());
        assert_eq!(
            oauth.take_pending_link(&token).await.map(|link| link.email),
            Some("alice@example.com".to_string())
        );
        assert!(oauth.take_pending_link(&token).await.is_none());
    }

    #[tokio::test]
    async fn expired_pending_link_is_rejected() {
        let oauth = OauthState::new(Duration::from_secs(600), Duration::ZERO);
        let token = oauth
            .store_pending_link(PendingLink {
                provider: "github".to_string(),
                oauth_id: "42".to_string(),
                access_token: "gho".to_string(),
                email: "bob@example.com".to_string(),
            })
            .await
            .unwrap();
        assert!(oauth.take_pending_link(&token).await.is_none());
    }

    #[test]
    fn auth_state_constructs_with_noop_rate_limiter() {
        let limiter: Arc<dyn RateLimiter> = Arc::new(NoopRateLimiter);
        let state = AuthState::new(config(), limiter).unwrap();
        assert_eq!(state.config().frontend_base_url(), "https://konto.dev");
    }
}
