//! Session token validation. Tokens are issued by the external identity
//! service; the core only verifies them.

use jsonwebtoken::{decode, DecodingKey, TokenData, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id (UUID).
    pub sub: String,
    pub exp: i64,
    pub iat: i64,
}

pub fn validate_token(token: &str, secret: &str) -> anyhow::Result<Claims> {
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    let token_data: TokenData<Claims> = decode(token, &decoding_key, &Validation::default())?;
    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn issue(secret: &str, sub: &str, ttl_secs: i64) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: sub.to_string(),
            exp: now + ttl_secs,
            iat: now,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_validates_fresh_token() {
        let token = issue("test_secret", "4fe1d1b2-0000-0000-0000-000000000001", 3600);
        let claims = validate_token(&token, "test_secret").unwrap();
        assert_eq!(claims.sub, "4fe1d1b2-0000-0000-0000-000000000001");
    }

    #[test]
    fn test_rejects_wrong_secret() {
        let token = issue("test_secret", "user", 3600);
        assert!(validate_token(&token, "other_secret").is_err());
    }

    #[test]
    fn test_rejects_expired_token() {
        let token = issue("test_secret", "user", -3600);
        assert!(validate_token(&token, "test_secret").is_err());
    }
}
