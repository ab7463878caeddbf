//! # Konto (user accounts & authentication)
//!
//! `konto` is a user-account and authentication service: credential-based
//! registration and login, email verification, password reset, "remember me"
//! session persistence, and OAuth2 login / account linking.
//!
//! ## Account model
//!
//! Accounts are keyed by normalized (lowercase) email. The session layer never
//! sees the storage key; it only sees a rotatable `alternative_id`, so rotating
//! that id (for example after a password reset) invalidates every session and
//! remember-me cookie at once.
//!
//! - **States:** an account is `active`, `suspended`, or `deactivated`, and
//!   separately verified or not. Login only completes for active, verified
//!   accounts; everything else is refused with a status-specific message.
//! - **Credentials:** a local password hash and any number of linked OAuth
//!   provider connections can attach to the same account. An OAuth callback
//!   for an email that already has an account never merges silently; it goes
//!   through an explicit linking confirmation step.
//! - **Tokens:** email-verification and password-reset links carry signed,
//!   purpose-scoped tokens (1 hour). Reset tokens are additionally bound to a
//!   copy stored on the account, so issuing a new one revokes the old.

pub mod api;
pub mod cli;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
        assert!(GIT_COMMIT_HASH.len() >= 7);
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
