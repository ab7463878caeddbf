pub mod server;

use secrecy::SecretString;

/// Credentials for one configured OAuth2 provider.
#[derive(Debug, Clone)]
pub struct ProviderCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
}

#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        dsn: String,
        secret_key: SecretString,
        frontend_base_url: String,
        google: Option<ProviderCredentials>,
        github: Option<ProviderCredentials>,
    },
}
