//! Authentication: JWT validation for incoming import requests

use anyhow::{anyhow, Result};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{ImportContext, Request};

/// JWT claims issued by the CRM's auth service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// User role (admin, agent, ...)
    pub role: String,
    /// Issued at (unix timestamp)
    pub iat: usize,
    /// Expiration (unix timestamp)
    pub exp: usize,
}

/// Validate a JWT token and return claims
pub fn validate_token(token: &str, secret: &str) -> Result<Claims> {
    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| anyhow!("Invalid token: {}", e))?;

    Ok(token_data.claims)
}

/// Resolve the importing user from a NATS request.
///
/// A valid `token` is required. Role checks happen upstream.
pub fn extract_auth<T>(request: &Request<T>, jwt_secret: &str) -> Result<ImportContext> {
    let token = request
        .token
        .as_deref()
        .ok_or_else(|| anyhow!("No authentication provided, JWT token is required"))?;

    let claims = validate_token(token, jwt_secret)?;
    let user_id =
        Uuid::parse_str(&claims.sub).map_err(|e| anyhow!("Invalid user_id in token: {}", e))?;

    Ok(ImportContext::new(user_id, claims.role))
}

// =============================================================================
// Tests
// =============================================================================
