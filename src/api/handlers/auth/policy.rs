//! Account state machine and login policy gates.

use anyhow::bail;

use super::store::UserRecord;

/// Lifecycle state of an account. Only `Active` accounts may log in; the
/// failed-login counters are frozen for the other two states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AccountStatus {
    Active,
    Suspended,
    Deactivated,
}

impl AccountStatus {
    pub(crate) fn parse(value: &str) -> anyhow::Result<Self> {
        match value {
            "active" => Ok(Self::Active),
            "suspended" => Ok(Self::Suspended),
            "deactivated" => Ok(Self::Deactivated),
            other => bail!("unknown account status: {other}"),
        }
    }
}

/// Reasons a login (or an equivalent credential proof) is refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LoginDenied {
    /// Account has no local credential; it was created through a provider.
    ProviderOnly { provider: String },
    Suspended,
    Deactivated,
    Unverified,
}

impl LoginDenied {
    pub(crate) fn message(&self) -> String {
        match self {
            Self::ProviderOnly { provider } => format!(
                "This account was created with {provider}. Please sign in with that provider instead."
            ),
            Self::Suspended => {
                "Your account has been suspended. Please contact support for assistance.".to_string()
            }
            Self::Deactivated => "Your account has been deactivated.".to_string(),
            Self::Unverified => {
                "Please verify your email address before logging in. You can request a new verification email."
                    .to_string()
            }
        }
    }
}

/// Gate a password login on the presence of a local credential. Returns the
/// stored hash so callers cannot forget to check it.
pub(crate) fn credential_gate(user: &UserRecord) -> Result<&str, LoginDenied> {
    user.password_hash
        .as_deref()
        .ok_or_else(|| LoginDenied::ProviderOnly {
            provider: user.auth_provider.clone(),
        })
}

/// Gate on account status and email verification. Every login path (local
/// password, provider callback, link confirmation) runs this after its
/// credential proof, so an unverified account can never acquire a session.
pub(crate) fn account_gate(status: AccountStatus, email_verified: bool) -> Result<(), LoginDenied> {
    match status {
        AccountStatus::Suspended => Err(LoginDenied::Suspended),
        AccountStatus::Deactivated => Err(LoginDenied::Deactivated),
        AccountStatus::Active if !email_verified => Err(LoginDenied::Unverified),
        AccountStatus::Active => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn user(password_hash: Option<&str>, provider: &str) -> UserRecord {
        UserRecord {
            alternative_id: Uuid::new_v4(),
            email: "alice@example.com".to_string(),
            password_hash: password_hash.map(str::to_string),
            email_verified: true,
            account_status: AccountStatus::Active,
            auth_provider: provider.to_string(),
            connections: HashMap::new(),
        }
    }

    #[test]
    fn parse_covers_all_states() {
        assert_eq!(AccountStatus::parse("active").unwrap(), AccountStatus::Active);
        assert_eq!(
            AccountStatus::parse("suspended").unwrap(),
            AccountStatus::Suspended
        );
        assert_eq!(
            AccountStatus::parse("deactivated").unwrap(),
            AccountStatus::Deactivated
        );
        assert!(AccountStatus::parse("banned").is_err());
    }

    #[test]
    fn credential_gate_names_the_provider() {
        let user = user(None, "google");
        let denied = credential_gate(&user).unwrap_err();
        assert_eq!(
            denied,
            LoginDenied::ProviderOnly {
                provider: "google".to_string()
            }
        );
        assert!(denied.message().contains("google"));
    }

    #[test]
    fn credential_gate_returns_hash() {
        let user = user(Some("$argon2id$stub"), "local");
        assert_eq!(credential_gate(&user).unwrap(), "$argon2id$stub");
    }

    #[test]
    fn account_gate_orders_status_before_verification() {
        // a suspended, unverified account reports the suspension
        assert_eq!(
            account_gate(AccountStatus::Suspended, false),
            Err(LoginDenied::Suspended)
        );
        assert_eq!(
            account_gate(AccountStatus::Deactivated, false),
            Err(LoginDenied::Deactivated)
        );
        assert_eq!(
            account_gate(AccountStatus::Active, false),
            Err(LoginDenied::Unverified)
        );
        assert_eq!(account_gate(AccountStatus::Active, true), Ok(()));
    }

    #[test]
    fn provider_logins_gate_on_verification_too() {
        // callback and link-confirmation paths share this gate, so an account
        // that local login refuses as unverified is refused there as well
        assert_eq!(
            account_gate(AccountStatus::Active, false),
            Err(LoginDenied::Unverified)
        );
        assert_eq!(account_gate(AccountStatus::Active, true), Ok(()));
    }
}
