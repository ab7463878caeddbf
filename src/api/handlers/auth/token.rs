//! Signed, time-limited tokens for email verification and password reset
//! links.
//!
//! Token layout: `b64url(email).issued_at.b64url(mac)` where the MAC is
//! HMAC-SHA256 over `purpose`, `issued_at` and `email`. Binding the purpose
//! into the MAC keeps a verification token from being replayed as a reset
//! token and vice versa.

use base64::Engine;
use chrono::Utc;
use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub(crate) const EMAIL_VERIFY_PURPOSE: &str = "email-verify";
pub(crate) const PASSWORD_RESET_PURPOSE: &str = "password-reset";

/// Tokens older than this are rejected as expired.
pub(crate) const TOKEN_MAX_AGE_SECONDS: i64 = 3600;

/// Tolerated clock skew for tokens stamped slightly in the future.
const MAX_CLOCK_SKEW_SECONDS: i64 = 60;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub(crate) enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("token invalid")]
    Invalid,
}

#[derive(Clone)]
pub(crate) struct TokenSigner {
    key: SecretString,
}

impl TokenSigner {
    pub(crate) fn new(key: SecretString) -> Self {
        Self { key }
    }

    /// Issue a token for `email`, valid for `purpose` only.
    pub(crate) fn issue(&self, purpose: &str, email: &str) -> String {
        self.issue_at(purpose, email, Utc::now().timestamp())
    }

    fn issue_at(&self, purpose: &str, email: &str, issued_at: i64) -> String {
        let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let mac = self.mac(purpose, issued_at, email);
        format!(
            "{}.{issued_at}.{}",
            engine.encode(email.as_bytes()),
            engine.encode(mac)
        )
    }

    /// Verify a token and return the email it was issued for.
    ///
    /// The signature is checked before the age so that a forged token is
    /// always reported as invalid, never as expired.
    pub(crate) fn verify(
        &self,
        purpose: &str,
        token: &str,
        max_age_seconds: i64,
    ) -> Result<String, TokenError> {
        self.verify_at(purpose, token, max_age_seconds, Utc::now().timestamp())
    }

    fn verify_at(
        &self,
        purpose: &str,
        token: &str,
        max_age_seconds: i64,
        now: i64,
    ) -> Result<String, TokenError> {
        let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;

        let mut parts = token.splitn(3, '.');
        let email_part = parts.next().ok_or(TokenError::Invalid)?;
        let issued_at_part = parts.next().ok_or(TokenError::Invalid)?;
        let mac_part = parts.next().ok_or(TokenError::Invalid)?;

        let email_bytes = engine
            .decode(email_part.as_bytes())
            .map_err(|_| TokenError::Invalid)?;
        let email = String::from_utf8(email_bytes).map_err(|_| TokenError::Invalid)?;
        let issued_at: i64 = issued_at_part.parse().map_err(|_| TokenError::Invalid)?;
        let presented_mac = engine
            .decode(mac_part.as_bytes())
            .map_err(|_| TokenError::Invalid)?;

        let expected_mac = self.mac(purpose, issued_at, &email);
        if !constant_time_eq(&presented_mac, &expected_mac) {
            return Err(TokenError::Invalid);
        }

        if issued_at > now + MAX_CLOCK_SKEW_SECONDS {
            return Err(TokenError::Invalid);
        }
        if now - issued_at > max_age_seconds {
            return Err(TokenError::Expired);
        }

        Ok(email)
    }

    fn mac(&self, purpose: &str, issued_at: i64, email: &str) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(self.key.expose_secret().as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(purpose.as_bytes());
        mac.update(b".");
        mac.update(issued_at.to_string().as_bytes());
        mac.update(b".");
        mac.update(email.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> TokenSigner {
        TokenSigner::new(SecretString::from("test-secret-key".to_string()))
    }

    #[test]
    fn issue_and_verify_round_trip() {
        let signer = signer();
        let token = signer.issue_at(EMAIL_VERIFY_PURPOSE, "alice@example.com", 1_000);
        let email = signer
            .verify_at(EMAIL_VERIFY_PURPOSE, &token, TOKEN_MAX_AGE_SECONDS, 1_500)
            .unwrap();
        assert_eq!(email, "alice@example.com");
    }

    #[test]
    fn purposes_are_not_interchangeable() {
        let signer = signer();
        let token = signer.issue_at(EMAIL_VERIFY_PURPOSE, "alice@example.com", 1_000);
        let result = signer.verify_at(PASSWORD_RESET_PURPOSE, &token, TOKEN_MAX_AGE_SECONDS, 1_500);
        assert_eq!(result, Err(TokenError::Invalid));
    }

    #[test]
    fn expired_token_is_rejected() {
        let signer = signer();
        let token = signer.issue_at(PASSWORD_RESET_PURPOSE, "alice@example.com", 1_000);
        let result = signer.verify_at(
            PASSWORD_RESET_PURPOSE,
            &token,
            TOKEN_MAX_AGE_SECONDS,
            1_000 + TOKEN_MAX_AGE_SECONDS + 1,
        );
        assert_eq!(result, Err(TokenError::Expired));
    }

    #[test]
    fn boundary_age_still_verifies() {
        let signer = signer();
        let token = signer.issue_at(EMAIL_VERIFY_PURPOSE, "alice@example.com", 1_000);
        let result = signer.verify_at(
            EMAIL_VERIFY_PURPOSE,
            &token,
            TOKEN_MAX_AGE_SECONDS,
            1_000 + TOKEN_MAX_AGE_SECONDS,
        );
        assert!(result.is_ok());
    }

    #[test]
    fn tampered_email_fails_signature_check() {
        let signer = signer();
        let token = signer.issue_at(EMAIL_VERIFY_PURPOSE, "alice@example.com", 1_000);
        let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
        let mut parts: Vec<String> = token.split('.').map(str::to_string).collect();
        parts[0] = engine.encode(b"mallory@example.com");
        let forged = parts.join(".");
        let result = signer.verify_at(EMAIL_VERIFY_PURPOSE, &forged, TOKEN_MAX_AGE_SECONDS, 1_500);
        assert_eq!(result, Err(TokenError::Invalid));
    }

    #[test]
    fn forged_expired_token_reports_invalid_not_expired() {
        let signer = signer();
        let other = TokenSigner::new(SecretString::from("other-key".to_string()));
        let token = other.issue_at(EMAIL_VERIFY_PURPOSE, "alice@example.com", 1_000);
        let result = signer.verify_at(
            EMAIL_VERIFY_PURPOSE,
            &token,
            TOKEN_MAX_AGE_SECONDS,
            1_000 + TOKEN_MAX_AGE_SECONDS + 500,
        );
        assert_eq!(result, Err(TokenError::Invalid));
    }

    #[test]
    fn future_dated_token_is_invalid() {
        let signer = signer();
        let token = signer.issue_at(EMAIL_VERIFY_PURPOSE, "alice@example.com", 10_000);
        let result = signer.verify_at(EMAIL_VERIFY_PURPOSE, &token, TOKEN_MAX_AGE_SECONDS, 1_000);
        assert_eq!(result, Err(TokenError::Invalid));
    }

    #[test]
    fn garbage_tokens_are_invalid() {
        let signer = signer();
        for garbage in ["", "a.b", "not-base64.123.mac", "YQ.not-a-number.YQ"] {
            let result = signer.verify_at(EMAIL_VERIFY_PURPOSE, garbage, TOKEN_MAX_AGE_SECONDS, 0);
            assert_eq!(result, Err(TokenError::Invalid), "token: {garbage:?}");
        }
    }
}
