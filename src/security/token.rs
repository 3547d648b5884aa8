//! Access token signing and refresh token minting.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::AuthConfig;

const LEEWAY_SECONDS: u64 = 30;
const REFRESH_TOKEN_BYTES: usize = 64;

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Invalid token: {0}")]
    Invalid(String),

    #[error("Failed to sign token: {0}")]
    Signing(String),
}

/// Who an access token is issued to.
#[derive(Debug, Clone)]
pub struct AccessSubject {
    pub id: String,
    pub name: String,
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
    pub iss: String,
    pub aud: String,
    pub jti: String,
}

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RefreshToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    access_lifetime: Duration,
    refresh_lifetime: Duration,
}

impl TokenService {
    #[must_use]
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_lifetime: Duration::minutes(config.access_token_minutes),
            refresh_lifetime: Duration::days(config.refresh_token_days),
        }
    }

    pub fn create_access_token(
        &self,
        subject: &AccessSubject,
        lifetime: Option<Duration>,
    ) -> Result<AccessToken, TokenError> {
        let now = Utc::now();
        let expires_at = now + lifetime.unwrap_or(self.access_lifetime);

        let claims = Claims {
            sub: subject.id.clone(),
            name: subject.name.clone(),
            roles: subject.roles.clone(),
            iat: now.timestamp(),
            nbf: now.timestamp(),
            exp: expires_at.timestamp(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            jti: uuid::Uuid::new_v4().to_string(),
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok(AccessToken { token, expires_at })
    }

    #[must_use]
    pub fn create_refresh_token(&self) -> RefreshToken {
        let mut data = [0u8; REFRESH_TOKEN_BYTES];
        rand::rng().fill_bytes(&mut data);

        RefreshToken {
            token: URL_SAFE_NO_PAD.encode(data),
            expires_at: Utc::now() + self.refresh_lifetime,
        }
    }

    pub fn validate_access_token(
        &self,
        token: &str,
        validate_lifetime: bool,
    ) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = LEEWAY_SECONDS;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.validate_exp = validate_lifetime;
        validation.validate_nbf = validate_lifetime;

        jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| TokenError::Invalid(e.to_string()))
    }

    /// Uppercase hex SHA-256 of the raw token. Only this value is persisted.
    #[must_use]
    pub fn hash_refresh_token(&self, token: &str) -> String {
        format!("{:X}", Sha256::digest(token.as_bytes()))
    }

    #[must_use]
    pub const fn refresh_lifetime(&self) -> Duration {
        self.refresh_lifetime
    }
}
