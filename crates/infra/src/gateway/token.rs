//! Short-lived RS256 bearer tokens for the gateway.

use std::fmt;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use super::GatewayError;

pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayClaims {
    pub iat: i64,
    pub exp: i64,
}

/// Mints a fresh token per call.
#[derive(Clone)]
pub struct TokenSigner {
    key: EncodingKey,
    lifetime: Duration,
}

impl fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSigner")
            .field("lifetime", &self.lifetime)
            .finish_non_exhaustive()
    }
}

impl TokenSigner {
    pub fn from_pem(pem: &[u8]) -> Result<Self, GatewayError> {
        let key = EncodingKey::from_rsa_pem(pem).map_err(|e| GatewayError::Token(e.to_string()))?;
        Ok(Self {
            key,
            lifetime: DEFAULT_TOKEN_LIFETIME,
        })
    }

    /// Key given as the base64 encoding of a PEM RSA private key.
    pub fn from_base64_pem(secret: &str) -> Result<Self, GatewayError> {
        let pem = STANDARD
            .decode(secret.trim())
            .map_err(|e| GatewayError::Token(format!("secret is not valid base64: {e}")))?;
        Self::from_pem(&pem)
    }

    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    pub fn sign(&self) -> Result<String, GatewayError> {
        let iat = Utc::now().timestamp();
        let claims = GatewayClaims {
            iat,
            exp: iat + self.lifetime.as_secs() as i64,
        };
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| GatewayError::Token(e.to_string()))
    }
}
