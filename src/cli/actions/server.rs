use crate::api;
use crate::api::handlers::auth::{oauth::ProviderConfig, AuthConfig};
use crate::cli::actions::Action;
use anyhow::Result;

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Server {
            port,
            dsn,
            secret_key,
            frontend_base_url,
            google,
            github,
        } => {
            let mut auth_config = AuthConfig::new(secret_key, frontend_base_url);

            if let Some(credentials) = google {
                auth_config =
                    auth_config.with_provider(ProviderConfig::google(
                        credentials.client_id,
                        credentials.client_secret,
                    ));
            }

            if let Some(credentials) = github {
                auth_config =
                    auth_config.with_provider(ProviderConfig::github(
                        credentials.client_id,
                        credentials.client_secret,
                    ));
            }

            api::new(port, dsn, auth_config).await?;
        }
    }

    Ok(())
}
