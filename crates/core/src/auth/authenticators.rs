use async_trait::async_trait;

use super::{AuthError, AuthRequest, Authenticator, Identity};

/// Accepts every request as anonymous. Must be configured explicitly.
#[derive(Default)]
pub struct NoneAuthenticator;

#[async_trait]
impl Authenticator for NoneAuthenticator {
    async fn authenticate(&self, _request: &AuthRequest) -> Result<Identity, AuthError> {
        Ok(Identity::anonymous())
    }

    fn method_name(&self) -> &'static str {
        "none"
    }
}

/// Identity given to callers presenting the shared `auth.api_key`.
pub const SHARED_KEY_USER: &str = "api_key_user";

/// Validates requests against a set of named API keys.
///
/// Accepts the key in either:
/// - `Authorization: Bearer <key>` header
/// - `X-API-Key: <key>` header
pub struct ApiKeyAuthenticator {
    /// (user id, key)
    keys: Vec<(String, String)>,
}

impl ApiKeyAuthenticator {
    pub fn new() -> Self {
        Self { keys: Vec::new() }
    }

    /// Register a key that authenticates as `user_id`.
    pub fn with_key(mut self, user_id: impl Into<String>, key: impl Into<String>) -> Self {
        self.keys.push((user_id.into(), key.into()));
        self
    }

    fn extract_key(request: &AuthRequest) -> Option<&str> {
        if let Some(auth_header) = request.headers.get("authorization") {
            let key = auth_header
                .strip_prefix("Bearer ")
                .or_else(|| auth_header.strip_prefix("bearer "));
            if key.is_some() {
                return key;
            }
        }

        request.headers.get("x-api-key").map(String::as_str)
    }
}

impl Default for ApiKeyAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Authenticator for ApiKeyAuthenticator {
    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, AuthError> {
        let provided = Self::extract_key(request).ok_or(AuthError::NotAuthenticated)?;

        // Compare against every key so timing does not reveal which matched
        let mut matched = None;
        for (user_id, key) in &self.keys {
            if constant_time_eq(provided.as_bytes(), key.as_bytes()) && matched.is_none() {
                matched = Some(user_id);
            }
        }

        match matched {
            Some(user_id) => Ok(Identity {
                user_id: user_id.clone(),
                method: "api_key".to_string(),
            }),
            None => Err(AuthError::InvalidCredentials("Invalid API key".to_string())),
        }
    }

    fn method_name(&self) -> &'static str {
        "api_key"
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
