use crate::cli::actions::{Action, ProviderCredentials};
use anyhow::Result;
use secrecy::SecretString;

fn provider_credentials(
    matches: &clap::ArgMatches,
    id_arg: &str,
    secret_arg: &str,
) -> Option<ProviderCredentials> {
    let client_id = matches.get_one::<String>(id_arg)?.clone();
    let client_secret = matches.get_one::<String>(secret_arg)?.clone();
    Some(ProviderCredentials {
        client_id,
        client_secret: SecretString::from(client_secret),
    })
}

pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    Ok(Action::Server {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        dsn: matches
            .get_one("dsn")
            .map(|s: &String| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --dsn"))?,
        secret_key: matches
            .get_one("secret-key")
            .map(|s: &String| SecretString::from(s.clone()))
            .ok_or_else(|| anyhow::anyhow!("missing required argument: --secret-key"))?,
        frontend_base_url: matches
            .get_one("frontend-base-url")
            .map(|s: &String| s.to_string())
            .unwrap_or_else(|| "http://localhost:8080".to_string()),
        google: provider_credentials(matches, "google-client-id", "google-client-secret"),
        github: provider_credentials(matches, "github-client-id", "github-client-secret"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    #[test]
    fn handler_builds_server_action() -> Result<()> {
        let matches = commands::new().get_matches_from(vec![
            "konto",
            "--dsn",
            "postgres://localhost/konto",
            "--secret-key",
            "super-secret",
            "--github-client-id",
            "abc",
            "--github-client-secret",
            "def",
        ]);

        let action = handler(&matches)?;
        let Action::Server {
            port,
            dsn,
            google,
            github,
            ..
        } = action;
        assert_eq!(port, 8080);
        assert_eq!(dsn, "postgres://localhost/konto");
        assert!(google.is_none());
        assert_eq!(github.map(|p| p.client_id), Some("abc".to_string()));
        Ok(())
    }
}
