//! OpenAPI document for the HTTP surface.

use utoipa::OpenApi;

use super::handlers::{auth, health};

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        auth::register::register,
        auth::login::login,
        auth::session::session,
        auth::session::logout,
        auth::verification::verify_email,
        auth::verification::resend_verification_email,
        auth::password_reset::forgot_password,
        auth::password_reset::reset_password,
        auth::oauth::authorize,
        auth::oauth::callback,
        auth::linking::linking_status,
        auth::linking::link_account,
    ),
    components(schemas(
        health::Health,
        auth::types::ApiMessage,
        auth::types::RegisterRequest,
        auth::types::LoginRequest,
        auth::types::ResendVerificationRequest,
        auth::types::ForgotPasswordRequest,
        auth::types::ResetPasswordRequest,
        auth::types::LinkAccountRequest,
        auth::types::SessionResponse,
        auth::types::LinkingStatusResponse,
    )),
    tags(
        (name = "auth", description = "Account registration, login and recovery"),
        (name = "oauth", description = "OAuth2 login and account linking"),
        (name = "health", description = "Service health")
    )
)]
struct ApiDoc;

/// The generated document; served at `/openapi.json`.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_covers_the_routes() {
        let doc = openapi();
        let paths = &doc.paths.paths;

        for path in [
            "/health",
            "/register",
            "/login",
            "/logout",
            "/session",
            "/verify-email/{token}",
            "/resend-verification-email",
            "/forgot-password",
            "/reset-password",
            "/authorize/{provider}",
            "/callback/{provider}",
            "/linking-status",
            "/link-account",
        ] {
            assert!(paths.contains_key(path), "missing path: {path}");
        }
    }

    #[test]
    fn document_serializes() {
        let json = openapi().to_pretty_json().unwrap();
        assert!(json.contains("\"openapi\""));
    }
}
