use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SocketHubError};
use crate::handlers::auth::{auth_handler, AuthHandler};

/// JWT Claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Expiration time (as UTC timestamp)
    pub exp: i64,
    /// Issued at (as UTC timestamp)
    pub iat: i64,
}

impl Claims {
    /// Creates claims valid for 24 hours
    pub fn new(subject: impl Into<String>) -> Self {
        Self::with_expiration(subject, Duration::hours(24))
    }

    pub fn with_expiration(subject: impl Into<String>, ttl: Duration) -> Self {
        let now = Utc::now();
        Self {
            sub: subject.into(),
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() > self.exp
    }
}

/// Manages JWT token operations
#[derive(Clone)]
pub struct TokenManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenManager {
    /// Creates a new token manager with a secret
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }

    /// Generates a JWT token for the given claims
    pub fn generate_token(&self, claims: &Claims) -> Result<String> {
        encode(&Header::default(), claims, &self.encoding_key).map_err(|e| {
            SocketHubError::AuthHandlerFailure(format!("Failed to generate token: {}", e))
        })
    }

    /// Validates and decodes a JWT token
    pub fn validate_token(&self, token: &str) -> Result<TokenData<Claims>> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| SocketHubError::AuthRejected(format!("invalid token: {}", e)))
    }

    /// Auth hook accepting upgrades that carry `Authorization: Bearer <valid jwt>`
    pub fn into_auth_handler(self) -> AuthHandler {
        auth_handler(move |request| {
            let Some(value) = request.headers.get("authorization") else {
                log::debug!("Upgrade request without Authorization header");
                return Ok(false);
            };
            let value = value.to_str().map_err(|e| {
                SocketHubError::AuthHandlerFailure(format!("unreadable Authorization header: {}", e))
            })?;
            let Some(token) = extract_bearer_token(value) else {
                return Ok(false);
            };
            match self.validate_token(token) {
                Ok(data) => Ok(!data.claims.is_expired()),
                Err(e) => {
                    log::debug!("Rejecting bearer token: {}", e);
                    Ok(false)
                }
            }
        })
    }
}

/// Extracts bearer token from Authorization header
pub fn extract_bearer_token(auth_header: &str) -> Option<&str> {
    auth_header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
