//! Request authentication for the HTTP API.

mod authenticators;
mod types;

pub use authenticators::*;
pub use types::*;

use crate::config::{AuthConfig, AuthMethod};

/// Build the authenticator selected in config.
pub fn create_authenticator(config: &AuthConfig) -> Result<Box<dyn Authenticator>, AuthError> {
    match config.method {
        AuthMethod::None => Ok(Box::new(NoneAuthenticator)),
        AuthMethod::ApiKey => {
            let mut authenticator = ApiKeyAuthenticator::new();
            if let Some(ref key) = config.api_key {
                authenticator = authenticator.with_key(SHARED_KEY_USER, key.clone());
            }
            for client in &config.clients {
                authenticator = authenticator.with_key(client.name.clone(), client.key.clone());
            }

            if config.api_key.is_none() && config.clients.is_empty() {
                return Err(AuthError::ConfigurationError(
                    "api_key or clients must be set when using the api_key auth method"
                        .to_string(),
                ));
            }
            Ok(Box::new(authenticator))
        }
    }
}
