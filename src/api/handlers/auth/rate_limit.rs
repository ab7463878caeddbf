//! Rate limiting primitives for auth flows.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RateLimitAction {
    Register,
    Login,
    Logout,
    VerifyEmail,
    ResendVerification,
    ForgotPassword,
    ResetPassword,
}

impl RateLimitAction {
    /// Maximum requests per window, per counted key.
    pub(crate) fn limit(self) -> (u32, Duration) {
        match self {
            Self::Register => (5, Duration::from_secs(60)),
            Self::Login => (10, Duration::from_secs(60)),
            Self::Logout => (20, Duration::from_secs(60)),
            Self::VerifyEmail => (25, Duration::from_secs(3600)),
            Self::ResendVerification => (15, Duration::from_secs(3600)),
            Self::ForgotPassword => (5, Duration::from_secs(3600)),
            Self::ResetPassword => (15, Duration::from_secs(3600)),
        }
    }

    pub(crate) fn message(self) -> &'static str {
        match self {
            Self::Login => "Too many login attempts. Please wait a moment before trying again.",
            Self::Register => {
                "We've received too many registration requests. Please try again in a few minutes."
            }
            Self::ResendVerification => {
                "You've requested too many verification emails. Please check your inbox and try again later."
            }
            Self::ForgotPassword | Self::ResetPassword => {
                "Too many password reset requests. For security reasons, please wait before trying again."
            }
            Self::VerifyEmail | Self::Logout => {
                "You've made too many requests in a short time. Please wait a moment and try again."
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed,
    Limited,
}

pub trait RateLimiter: Send + Sync {
    fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision;
    fn check_email(&self, email: &str, action: RateLimitAction) -> RateLimitDecision;
}

#[derive(Clone, Debug)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn check_ip(&self, _ip: Option<&str>, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }

    fn check_email(&self, _email: &str, _action: RateLimitAction) -> RateLimitDecision {
        RateLimitDecision::Allowed
    }
}

/// In-process fixed-window counter keyed by (action, ip|email).
///
/// Windows reset when the first request of a new window arrives; expired
/// entries for other keys are swept opportunistically on each check.
#[derive(Debug, Default)]
pub struct FixedWindowRateLimiter {
    windows: Mutex<HashMap<(RateLimitAction, String), (Instant, u32)>>,
}

impl FixedWindowRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self, key: String, action: RateLimitAction) -> RateLimitDecision {
        let (limit, window) = action.limit();
        let now = Instant::now();

        let Ok(mut windows) = self.windows.lock() else {
            // a poisoned counter map must not lock everyone out
            return RateLimitDecision::Allowed;
        };

        windows.retain(|(entry_action, _), (start, _)| {
            now.duration_since(*start) <= entry_action.limit().1
        });

        let entry = windows.entry((action, key)).or_insert((now, 0));
        if now.duration_since(entry.0) > window {
            *entry = (now, 0);
        }

        if entry.1 >= limit {
            return RateLimitDecision::Limited;
        }
        entry.1 += 1;
        RateLimitDecision::Allowed
    }
}

impl RateLimiter for FixedWindowRateLimiter {
    fn check_ip(&self, ip: Option<&str>, action: RateLimitAction) -> RateLimitDecision {
        match ip {
            Some(ip) => self.check(format!("ip:{ip}"), action),
            None => RateLimitDecision::Allowed,
        }
    }

    fn check_email(&self, email: &str, action: RateLimitAction) -> RateLimitDecision {
        self.check(format!("email:{email}"), action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_rate_limiter_allows() {
        let limiter = NoopRateLimiter;
        assert_eq!(
            limiter.check_ip(None, RateLimitAction::Register),
            RateLimitDecision::Allowed
        );
        assert_eq!(
            limiter.check_email("user@example.com", RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn fixed_window_limits_after_threshold() {
        let limiter = FixedWindowRateLimiter::new();
        let (limit, _) = RateLimitAction::Register.limit();

        for _ in 0..limit {
            assert_eq!(
                limiter.check_ip(Some("1.2.3.4"), RateLimitAction::Register),
                RateLimitDecision::Allowed
            );
        }
        assert_eq!(
            limiter.check_ip(Some("1.2.3.4"), RateLimitAction::Register),
            RateLimitDecision::Limited
        );
    }

    #[test]
    fn keys_are_independent() {
        let limiter = FixedWindowRateLimiter::new();
        let (limit, _) = RateLimitAction::ForgotPassword.limit();

        for _ in 0..limit {
            limiter.check_email("alice@example.com", RateLimitAction::ForgotPassword);
        }
        assert_eq!(
            limiter.check_email("alice@example.com", RateLimitAction::ForgotPassword),
            RateLimitDecision::Limited
        );
        assert_eq!(
            limiter.check_email("bob@example.com", RateLimitAction::ForgotPassword),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn actions_are_independent() {
        let limiter = FixedWindowRateLimiter::new();
        let (limit, _) = RateLimitAction::ForgotPassword.limit();

        for _ in 0..limit {
            limiter.check_ip(Some("1.2.3.4"), RateLimitAction::ForgotPassword);
        }
        assert_eq!(
            limiter.check_ip(Some("1.2.3.4"), RateLimitAction::ForgotPassword),
            RateLimitDecision::Limited
        );
        assert_eq!(
            limiter.check_ip(Some("1.2.3.4"), RateLimitAction::Login),
            RateLimitDecision::Allowed
        );
    }

    #[test]
    fn missing_ip_is_not_counted() {
        let limiter = FixedWindowRateLimiter::new();
        for _ in 0..100 {
            assert_eq!(
                limiter.check_ip(None, RateLimitAction::Login),
                RateLimitDecision::Allowed
            );
        }
    }

    #[test]
    fn messages_are_route_specific() {
        assert!(RateLimitAction::Login.message().contains("login"));
        assert!(RateLimitAction::Register.message().contains("registration"));
        assert!(RateLimitAction::ForgotPassword
            .message()
            .contains("password reset"));
    }
}
