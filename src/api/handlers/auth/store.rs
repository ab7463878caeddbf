//! Database operations for the account store.
//!
//! Every mutation here is a single SQL statement so concurrent flows never
//! observe a half-applied update. Counter bumps happen in SQL
//! (`total_logins = total_logins + 1`) rather than read-modify-write.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use tracing::Instrument;
use uuid::Uuid;

use super::policy::AccountStatus;
use super::utils::{generate_session_token, hash_session_token, is_unique_violation};

/// One linked OAuth2 provider, stored under `connections -> provider`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(super) struct ConnectionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) oauth_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) connected_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) last_updated: Option<DateTime<Utc>>,
}

/// Account fields the auth flows act on.
#[derive(Debug, Clone)]
pub(crate) struct UserRecord {
    pub(super) alternative_id: Uuid,
    pub(super) email: String,
    pub(super) password_hash: Option<String>,
    pub(super) email_verified: bool,
    pub(super) account_status: AccountStatus,
    pub(super) auth_provider: String,
    pub(super) connections: HashMap<String, ConnectionRecord>,
}

/// Outcome when attempting to create a new account.
#[derive(Debug, PartialEq, Eq)]
pub(super) enum InsertOutcome {
    Created,
    Conflict,
}

/// Fields for a new account row. Counters and lifecycle columns are seeded
/// by the database defaults, except where the first provider login counts as
/// a login.
pub(super) struct NewUser<'a> {
    pub(super) email: &'a str,
    pub(super) password_hash: Option<&'a str>,
    pub(super) alternative_id: Uuid,
    pub(super) email_verified: bool,
    pub(super) auth_provider: &'a str,
    pub(super) profile: serde_json::Value,
    pub(super) preferences: serde_json::Value,
    pub(super) connections: serde_json::Value,
    pub(super) registration_ip: Option<&'a str>,
    pub(super) user_agent: Option<&'a str>,
    /// True when the account is born from a provider callback: the signup is
    /// also its first login and no verification email is ever sent.
    pub(super) via_provider_login: bool,
}

/// (total_logins, total_verification_emails_sent) seeds for a new row.
pub(super) fn seed_counters(via_provider_login: bool) -> (i64, i64) {
    if via_provider_login {
        (1, 0)
    } else {
        (0, 1)
    }
}

pub(super) async fn insert_user(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    user: &NewUser<'_>,
) -> Result<InsertOutcome> {
    let (total_logins, total_verification_emails_sent) = seed_counters(user.via_provider_login);

    let query = r"
        INSERT INTO users
            (email, password_hash, alternative_id, email_verified, auth_provider,
             profile, preferences, connections, registration_ip,
             last_login, last_login_ip, last_login_user_agent,
             total_logins, total_verification_emails_sent)
        VALUES ($1, $2, $3, $4, $5, $6::jsonb, $7::jsonb, $8::jsonb, $9,
                CASE WHEN $10 THEN NOW() END, $11, $12, $13, $14)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user.email)
        .bind(user.password_hash)
        .bind(user.alternative_id)
        .bind(user.email_verified)
        .bind(user.auth_provider)
        .bind(user.profile.to_string())
        .bind(user.preferences.to_string())
        .bind(user.connections.to_string())
        .bind(user.registration_ip)
        .bind(user.via_provider_login)
        .bind(user.via_provider_login.then(|| user.registration_ip).flatten())
        .bind(user.via_provider_login.then(|| user.user_agent).flatten())
        .bind(total_logins)
        .bind(total_verification_emails_sent)
        .execute(&mut **tx)
        .instrument(span)
        .await;

    match result {
        Ok(_) => Ok(InsertOutcome::Created),
        Err(err) if is_unique_violation(&err) => Ok(InsertOutcome::Conflict),
        Err(err) => Err(err).context("failed to insert user"),
    }
}

pub(super) async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<UserRecord>> {
    let query = r"
        SELECT alternative_id, email, password_hash, email_verified,
               account_status, auth_provider, connections::text AS connections
        FROM users
        WHERE email = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(email)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup user by email")?;

    row.map(|row| {
        let status: String = row.get("account_status");
        let connections_text: String = row.get("connections");
        Ok(UserRecord {
            alternative_id: row.get("alternative_id"),
            email: row.get("email"),
            password_hash: row.get("password_hash"),
            email_verified: row.get("email_verified"),
            account_status: AccountStatus::parse(&status)?,
            auth_provider: row.get("auth_provider"),
            connections: serde_json::from_str(&connections_text)
                .context("malformed connections document")?,
        })
    })
    .transpose()
}

/// Mark an email verified. Returns false when no such account exists; a
/// second call for an already verified account is a no-op success.
pub(super) async fn set_verified(pool: &PgPool, email: &str) -> Result<bool> {
    let query = "UPDATE users SET email_verified = TRUE, updated_at = NOW() WHERE email = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(email)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to mark email verified")?;

    Ok(result.rows_affected() > 0)
}

pub(super) async fn record_login_success(
    pool: &PgPool,
    alternative_id: Uuid,
    ip: Option<&str>,
    user_agent: Option<&str>,
) -> Result<()> {
    let query = r"
        UPDATE users SET
            failed_login_attempts = 0,
            last_login = NOW(),
            last_login_ip = COALESCE($2, last_login_ip),
            last_login_user_agent = COALESCE($3, last_login_user_agent),
            total_logins = total_logins + 1,
            updated_at = NOW()
        WHERE alternative_id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(alternative_id)
        .bind(ip)
        .bind(user_agent)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to record login success")?;

    Ok(())
}

const RECORD_LOGIN_FAILURE_SQL: &str = r"
    UPDATE users SET
        failed_login_attempts = failed_login_attempts + 1,
        total_failed_logins = total_failed_logins + 1,
        updated_at = NOW()
    WHERE email = $1 AND account_status = 'active'
";

/// Counters only move for active accounts; suspended or deactivated rows are
/// excluded by the WHERE clause.
pub(super) async fn record_login_failure(pool: &PgPool, email: &str) -> Result<()> {
    let query = RECORD_LOGIN_FAILURE_SQL;
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(email)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to record login failure")?;

    Ok(())
}

pub(super) async fn set_reset_token(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    email: &str,
    token: &str,
    ttl_seconds: i64,
) -> Result<()> {
    let query = r"
        UPDATE users SET
            password_reset_token = $2,
            password_reset_token_expires = NOW() + ($3 * INTERVAL '1 second'),
            updated_at = NOW()
        WHERE email = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(email)
        .bind(token)
        .bind(ttl_seconds)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to store password reset token")?;

    Ok(())
}

const SET_PASSWORD_AND_ROTATE_SQL: &str = r"
    UPDATE users SET
        password_hash = $3,
        alternative_id = $4,
        password_reset_token = NULL,
        password_reset_token_expires = NULL,
        failed_login_attempts = 0,
        last_password_change = NOW(),
        total_password_resets = total_password_resets + 1,
        updated_at = NOW()
    WHERE email = $1
      AND password_reset_token = $2
      AND password_reset_token_expires > NOW()
";

/// Install a new password and rotate `alternative_id`, which orphans every
/// session row bound to the old value.
///
/// The stored reset token is both the guard and the casualty: the UPDATE only
/// applies while it matches and is unexpired, and clears it in the same
/// statement, so of two concurrent requests replaying one token exactly one
/// succeeds. Returns false when the token did not consume a row.
pub(super) async fn set_password_and_rotate(
    pool: &PgPool,
    email: &str,
    reset_token: &str,
    new_password_hash: &str,
    new_alternative_id: Uuid,
) -> Result<bool> {
    let query = SET_PASSWORD_AND_ROTATE_SQL;
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(email)
        .bind(reset_token)
        .bind(new_password_hash)
        .bind(new_alternative_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to set new password")?;

    Ok(result.rows_affected() > 0)
}

/// Insert or refresh one provider entry inside the `connections` document.
/// `connected_at` is preserved for an existing entry and stamped for a new
/// one; `oauth_id`, `token` and `last_updated` are always overwritten.
pub(super) async fn upsert_connection(
    pool: &PgPool,
    email: &str,
    provider: &str,
    oauth_id: &str,
    access_token: &str,
) -> Result<()> {
    let entry = json!({
        "oauth_id": oauth_id,
        "token": access_token,
        "last_updated": Utc::now(),
    });

    let query = r"
        UPDATE users SET
            connections = jsonb_set(
                connections,
                ARRAY[$2]::text[],
                COALESCE(connections->$2, jsonb_build_object('connected_at', to_jsonb(NOW()))) || $3::jsonb,
                TRUE),
            updated_at = NOW()
        WHERE email = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(email)
        .bind(provider)
        .bind(entry.to_string())
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to upsert provider connection")?;

    Ok(())
}

pub(super) async fn increment_verification_emails_sent(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    email: &str,
) -> Result<()> {
    let query = r"
        UPDATE users SET
            total_verification_emails_sent = total_verification_emails_sent + 1,
            updated_at = NOW()
        WHERE email = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(email)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to count verification email")?;

    Ok(())
}

/// Principal data returned for a valid session cookie.
#[derive(Debug, Clone)]
pub(crate) struct SessionRecord {
    pub(crate) alternative_id: Uuid,
    pub(crate) email: String,
    pub(crate) is_active: bool,
    pub(crate) display_name: Option<String>,
    pub(crate) roles: Vec<String>,
}

pub(super) async fn insert_session(
    pool: &PgPool,
    alternative_id: Uuid,
    ttl_seconds: i64,
) -> Result<String> {
    // Generate a random token, store only its hash, and return the raw value
    // so the caller can set the session cookie.
    let query = r"
        INSERT INTO user_sessions (alternative_id, session_hash, expires_at)
        VALUES ($1, $2, NOW() + ($3 * INTERVAL '1 second'))
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );

    for _ in 0..3 {
        let token = generate_session_token()?;
        let token_hash = hash_session_token(&token);
        let result = sqlx::query(query)
            .bind(alternative_id)
            .bind(token_hash)
            .bind(ttl_seconds)
            .execute(pool)
            .instrument(span.clone())
            .await;

        match result {
            Ok(_) => return Ok(token),
            Err(err) if is_unique_violation(&err) => {}
            Err(err) => return Err(err).context("failed to insert session"),
        }
    }

    Err(anyhow!("failed to generate unique session token"))
}

/// Resolve a session hash into the principal it belongs to. Suspended or
/// unverified accounts still resolve; `is_active` carries the distinction.
pub(super) async fn lookup_session(
    pool: &PgPool,
    token_hash: &[u8],
) -> Result<Option<SessionRecord>> {
    let query = r"
        SELECT users.alternative_id, users.email, users.roles,
               users.profile->>'display_name' AS display_name,
               (users.account_status = 'active' AND users.email_verified) AS is_active
        FROM user_sessions
        JOIN users ON users.alternative_id = user_sessions.alternative_id
        WHERE user_sessions.session_hash = $1
          AND user_sessions.expires_at > NOW()
        LIMIT 1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup session")?;

    let Some(row) = row else {
        return Ok(None);
    };

    // Record activity for audit/visibility without extending the session TTL.
    let query = r"
        UPDATE user_sessions
        SET last_seen_at = NOW()
        WHERE session_hash = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to touch session")?;

    Ok(Some(SessionRecord {
        alternative_id: row.get("alternative_id"),
        email: row.get("email"),
        is_active: row.get("is_active"),
        display_name: row.get("display_name"),
        roles: row.get("roles"),
    }))
}

pub(super) async fn delete_session(pool: &PgPool, token_hash: &[u8]) -> Result<()> {
    // Logout is idempotent; it's fine if no rows are deleted.
    let query = "DELETE FROM user_sessions WHERE session_hash = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete session")?;
    Ok(())
}

/// Drop every session bound to an `alternative_id`. Rotation already orphans
/// those rows; this keeps the table from accumulating them.
pub(super) async fn delete_sessions_for(pool: &PgPool, alternative_id: Uuid) -> Result<()> {
    let query = "DELETE FROM user_sessions WHERE alternative_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    sqlx::query(query)
        .bind(alternative_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to delete user sessions")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_counters_for_provider_signup() {
        // a provider signup is its own first login and never emails
        assert_eq!(seed_counters(true), (1, 0));
        assert_eq!(seed_counters(false), (0, 1));
    }

    #[test]
    fn connection_record_parses_partial_documents() {
        let parsed: HashMap<String, ConnectionRecord> =
            serde_json::from_str(r#"{"google":{"oauth_id":"123"}}"#).unwrap();
        let google = parsed.get("google").unwrap();
        assert_eq!(google.oauth_id.as_deref(), Some("123"));
        assert!(google.token.is_none());
        assert!(google.connected_at.is_none());
    }

    #[test]
    fn login_failure_counters_only_move_for_active_accounts() {
        // suspended and deactivated rows are excluded by the statement itself
        assert!(RECORD_LOGIN_FAILURE_SQL.contains("account_status = 'active'"));
        // single atomic statement, counters bumped in SQL
        assert_eq!(RECORD_LOGIN_FAILURE_SQL.matches("UPDATE").count(), 1);
        assert!(!RECORD_LOGIN_FAILURE_SQL.contains(';'));
        assert!(RECORD_LOGIN_FAILURE_SQL.contains("failed_login_attempts + 1"));
    }

    #[test]
    fn password_rotation_consumes_the_stored_reset_token() {
        // guard and mutation live in one statement: only the currently stored,
        // unexpired token applies, and it is cleared by the same UPDATE
        assert!(SET_PASSWORD_AND_ROTATE_SQL.contains("password_reset_token = $2"));
        assert!(SET_PASSWORD_AND_ROTATE_SQL.contains("password_reset_token_expires > NOW()"));
        assert!(SET_PASSWORD_AND_ROTATE_SQL.contains("password_reset_token = NULL"));
        assert!(SET_PASSWORD_AND_ROTATE_SQL.contains("alternative_id = $4"));
        assert_eq!(SET_PASSWORD_AND_ROTATE_SQL.matches("UPDATE").count(), 1);
        assert!(!SET_PASSWORD_AND_ROTATE_SQL.contains(';'));
    }

    #[test]
    fn connection_record_skips_empty_fields_on_write() {
        let record = ConnectionRecord {
            oauth_id: Some("123".to_string()),
            token: None,
            connected_at: None,
            last_updated: None,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"oauth_id":"123"}"#);
    }
}
