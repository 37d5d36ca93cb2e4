use std::collections::HashSet;

use anyhow::Result;
use chrono::Utc;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Seconds before expiry at which an access token is treated as stale.
pub const EXPIRY_LEEWAY_SECONDS: i64 = 30;

/// Claims carried by provider-issued access tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: Uuid,
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

impl AccessClaims {
    pub fn is_expired(&self) -> bool {
        self.exp <= Utc::now().timestamp() + EXPIRY_LEEWAY_SECONDS
    }
}

/// Reads the claims of an access token without checking its signature.
///
/// Only used to schedule refreshes and fill in expiry timestamps; the
/// provider stays the authority on whether a token is valid.
pub fn peek_claims(token: &str) -> Result<AccessClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims = HashSet::new();
    let data = decode::<AccessClaims>(token, &DecodingKey::from_secret(&[]), &validation)?;
    Ok(data.claims)
}
