use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use rand::Rng;
use rand::distributions::Alphanumeric;
use serde::{Deserialize, Serialize};

use hat_types::UserId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    pub id: UserId,
    pub exp: i64,
}

/// Issues and checks the signed opaque strings clients carry. The signing
/// secret is generated per process, so tokens die with the server.
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_minutes: i64,
}

impl TokenService {
    pub fn new(ttl_minutes: i64) -> Self {
        let secret: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(32)
            .map(char::from)
            .collect();
        Self::with_secret(secret.as_bytes(), ttl_minutes)
    }

    pub fn with_secret(secret: &[u8], ttl_minutes: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl_minutes,
        }
    }

    pub fn create_token(&self, id: UserId) -> Result<String, AuthError> {
        let exp = (chrono::Utc::now() + chrono::Duration::minutes(self.ttl_minutes)).timestamp();
        encode(&Header::default(), &TokenClaims { id, exp }, &self.encoding)
            .map_err(|_| AuthError::TokenCreation)
    }

    /// Validate the signature and expiry, returning the carried user id.
    pub fn verify_token(&self, token: &str) -> Result<UserId, AuthError> {
        let data = decode::<TokenClaims>(token, &self.decoding, &Validation::default())
            .map_err(|error| match error.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken,
            })?;
        Ok(data.claims.id)
    }
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|_| AuthError::PasswordHash)
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("token is invalid")]
    InvalidToken,
    #[error("token has expired")]
    TokenExpired,
    #[error("could not create authentication token")]
    TokenCreation,
    #[error("could not encode password")]
    PasswordHash,
}
