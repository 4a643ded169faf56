//! Bearer credential verification for the socket handshake.

use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::types::IdentityClaim;

/// Close code sent when the handshake carries no credential
pub const CLOSE_AUTH_MISSING: u16 = 4001;
/// Close code sent when the credential fails verification
pub const CLOSE_AUTH_INVALID: u16 = 4002;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Authentication required")]
    Missing,

    #[error("Invalid token")]
    Invalid,
}

impl AuthError {
    /// WebSocket close code used when tearing down the rejected connection
    pub fn close_code(&self) -> u16 {
        match self {
            AuthError::Missing => CLOSE_AUTH_MISSING,
            AuthError::Invalid => CLOSE_AUTH_INVALID,
        }
    }
}

/// Claims carried by credentials from the external issuer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User identifier
    #[serde(rename = "_id")]
    pub id: String,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: Option<i64>,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

/// Validates HS256 credentials against the shared secret.
#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Verify the credential presented at connection time.
    ///
    /// `None` means the handshake carried nothing, which is reported
    /// separately from a credential that fails signature or expiry checks.
    pub fn verify(&self, credential: Option<&str>) -> Result<IdentityClaim, AuthError> {
        let token = credential.ok_or(AuthError::Missing)?;

        let data = decode::<Claims>(token, &self.key, &self.validation).map_err(|e| {
            tracing::debug!(error = %e, "Credential rejected");
            AuthError::Invalid
        })?;

        if data.claims.id.is_empty() {
            tracing::debug!("Credential has an empty identity claim");
            return Err(AuthError::Invalid);
        }

        Ok(IdentityClaim::new(data.claims.id))
    }
}

/// Pull the bearer credential out of handshake metadata.
///
/// The `Authorization: Bearer` header wins over the `token` query parameter,
/// which exists because browsers cannot set headers on a WebSocket handshake.
/// Blank values count as absent.
pub fn credential_from_handshake(
    headers: &HeaderMap,
    query_token: Option<&str>,
) -> Option<String> {
    let from_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty());

    from_header
        .or_else(|| query_token.map(str::trim).filter(|t| !t.is_empty()))
        .map(str::to_string)
}
