//! Identity verification collaborator
//!
//! The chat service never issues credentials. It only asks an [`IdentityVerifier`] to turn
//! the caller's credential into a stable user id, for every authenticated REST request and
//! for the live channel handshake.

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("missing credential")]
    Missing,

    #[error("invalid credential: {0}")]
    Invalid(String),

    #[error("credential subject is not a user id")]
    MalformedSubject,

    #[error("identity key error: {0}")]
    Key(String),
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Resolve a bearer credential to a user id
    async fn verify(&self, credential: &str) -> Result<Uuid, IdentityError>;
}

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
}

/// Validates JWTs locally; `sub` must hold the user UUID
#[derive(Clone)]
pub struct JwtIdentityVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtIdentityVerifier {
    /// Shared-secret (HS256) tokens
    pub fn hs256(secret: &[u8]) -> Self {
        Self::with_key(DecodingKey::from_secret(secret), Algorithm::HS256)
    }

    /// Public-key (RS256) tokens
    pub fn rs256_pem(public_key_pem: &[u8]) -> Result<Self, IdentityError> {
        let key = DecodingKey::from_rsa_pem(public_key_pem)
            .map_err(|e| IdentityError::Key(e.to_string()))?;
        Ok(Self::with_key(key, Algorithm::RS256))
    }

    fn with_key(key: DecodingKey, algorithm: Algorithm) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.validate_aud = false;
        Self { key, validation }
    }

    pub fn with_issuer(mut self, issuer: &str) -> Self {
        self.validation.set_issuer(&[issuer]);
        self
    }

    pub fn with_audience(mut self, audience: &str) -> Self {
        self.validation.set_audience(&[audience]);
        self.validation.validate_aud = true;
        self
    }

    fn verify_sync(&self, credential: &str) -> Result<Uuid, IdentityError> {
        if credential.is_empty() {
            return Err(IdentityError::Missing);
        }

        let data = decode::<Claims>(credential, &self.key, &self.validation)
            .map_err(|e| IdentityError::Invalid(e.to_string()))?;

        Uuid::parse_str(&data.claims.sub).map_err(|_| IdentityError::MalformedSubject)
    }
}

#[async_trait]
impl IdentityVerifier for JwtIdentityVerifier {
    async fn verify(&self, credential: &str) -> Result<Uuid, IdentityError> {
        self.verify_sync(credential)
    }
}
