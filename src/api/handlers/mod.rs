//! API handlers for the account service.

pub mod auth;
pub mod health;

use axum::response::IntoResponse;

/// Root banner, mostly useful to eyeball that the service is up.
pub async fn root() -> impl IntoResponse {
    concat!(env!("CARGO_PKG_NAME"), " ", env!("CARGO_PKG_VERSION"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn root_banner_names_the_service() {
        let response = root().await.into_response();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
