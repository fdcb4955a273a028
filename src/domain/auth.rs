use crate::error::{AppError, Result};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Bearer token claims. Tokens are minted by the dashboard's identity provider;
/// this service only verifies them.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub sub: Uuid,
    pub exp: usize,
}

impl Claims {
    #[must_use]
    pub fn new(user_id: Uuid, ttl_secs: u64) -> Self {
        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        let exp = usize::try_from(now.saturating_add(ttl_secs)).unwrap_or(usize::MAX);
        Self { sub: user_id, exp }
    }

    /// Signs the claims with HS256.
    ///
    /// # Errors
    /// Returns `AppError::Internal` if signing fails.
    pub fn encode(&self, secret: &str) -> Result<String> {
        encode(&Header::default(), self, &EncodingKey::from_secret(secret.as_bytes())).map_err(|_| AppError::Internal)
    }

    /// Verifies signature and expiry.
    ///
    /// # Errors
    /// Returns `AppError::AuthError` if the token is malformed, forged or expired.
    pub fn decode(token: &str, secret: &str) -> Result<Self> {
        let data = decode::<Self>(token, &DecodingKey::from_secret(secret.as_bytes()), &Validation::default())
            .map_err(|_| AppError::AuthError)?;
        Ok(data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_round_trip() {
        let user_id = Uuid::new_v4();
        let token = Claims::new(user_id, 60).encode("secret").expect("signing works");
        let claims = Claims::decode(&token, "secret").expect("valid token");
        assert_eq!(claims.sub, user_id);
    }

    #[test]
    fn test_claims_reject_wrong_secret_and_expiry() {
        let user_id = Uuid::new_v4();
        let token = Claims::new(user_id, 60).encode("secret").expect("signing works");
        assert!(matches!(Claims::decode(&token, "other"), Err(AppError::AuthError)));

        let expired = Claims { sub: user_id, exp: 1 }.encode("secret").expect("signing works");
        assert!(matches!(Claims::decode(&expired, "secret"), Err(AppError::AuthError)));
    }
}
