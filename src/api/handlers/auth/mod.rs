//! Auth handlers and supporting modules.
//!
//! This module coordinates local (email + password) authentication, cookie
//! sessions, email verification, password reset, and OAuth2 login/linking.
//!
//! ## Session model
//!
//! Sessions are random tokens stored hashed and bound to the account's
//! `alternative_id`. Changing the password rotates that id, which revokes
//! every outstanding session in one statement.
//!
//! ## Rate limiting
//!
//! Every mutating endpoint is rate limited per client IP, and per email where
//! one is supplied, with per-route windows and messages.

mod error;
pub(crate) mod linking;
pub(crate) mod login;
pub mod oauth;
pub(crate) mod password_reset;
mod policy;
mod rate_limit;
pub(crate) mod register;
pub(crate) mod session;
mod state;
mod store;
mod token;
pub(crate) mod types;
mod utils;
pub(crate) mod verification;

pub use rate_limit::FixedWindowRateLimiter;
pub use state::{AuthConfig, AuthState};
