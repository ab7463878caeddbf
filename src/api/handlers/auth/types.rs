use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Envelope shared by every JSON endpoint.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiMessage {
    pub success: bool,
    pub message: String,
}

impl ApiMessage {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Fields are optional so that a missing field reports its own message
/// instead of a generic deserialization error.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub terms: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub remember: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResendVerificationRequest {
    pub email: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ForgotPasswordRequest {
    pub email: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResetPasswordRequest {
    pub token: Option<String>,
    pub password: Option<String>,
    pub confirm_password: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LinkAccountRequest {
    pub password: Option<String>,
}

/// Current principal, as exposed by `GET /session`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionResponse {
    pub alternative_id: Uuid,
    pub email: String,
    pub is_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub roles: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LinkingStatusResponse {
    pub pending: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub requires_password: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_message_roundtrip() {
        let message = ApiMessage::ok("User registered successfully!");
        let json = serde_json::to_string(&message).unwrap();
        assert_eq!(
            json,
            r#"{"success":true,"message":"User registered successfully!"}"#
        );
    }

    #[test]
    fn register_request_tolerates_missing_fields() {
        let request: RegisterRequest = serde_json::from_str(r#"{"email":"a@b.co"}"#).unwrap();
        assert_eq!(request.email.as_deref(), Some("a@b.co"));
        assert!(request.password.is_none());
        assert!(request.terms.is_none());
    }

    #[test]
    fn linking_status_skips_empty_fields() {
        let status = LinkingStatusResponse {
            pending: false,
            provider: None,
            email: None,
            requires_password: false,
        };
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, r#"{"pending":false,"requires_password":false}"#);
    }
}
