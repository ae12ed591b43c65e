use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};

use herald_types::api::Claims;

/// How long an issued token, and the session backing it, stays valid.
pub const TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

/// Signs and checks HS256 session tokens.
pub struct TokenCodec {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl TokenCodec {
    pub fn new(secret: &str) -> Self {
        // Only HS256 is accepted; a token whose header names any other
        // algorithm fails before its signature is looked at.
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    pub fn issue(
        &self,
        user_id: i64,
        username: &str,
        is_moderator: bool,
    ) -> anyhow::Result<String> {
        let exp = Utc::now() + chrono::Duration::from_std(TOKEN_TTL)?;
        let claims = Claims {
            user_id,
            username: username.to_string(),
            is_moderator,
            exp: exp.timestamp() as usize,
        };
        self.sign(&claims)
    }

    fn sign(&self, claims: &Claims) -> anyhow::Result<String> {
        let token = encode(&Header::new(Algorithm::HS256), claims, &self.encoding)?;
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        decode::<Claims>(token, &self.decoding, &self.validation).map(|data| data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::errors::ErrorKind;

    const SECRET: &str = "unit-test-secret-with-some-length";

    fn claims(exp: i64) -> Claims {
        Claims {
            user_id: 7,
            username: "alice".into(),
            is_moderator: true,
            exp: exp as usize,
        }
    }

    #[test]
    fn issued_token_verifies_with_all_claims() {
        let codec = TokenCodec::new(SECRET);
        let token = codec.issue(7, "alice", true).unwrap();
        let got = codec.verify(&token).unwrap();

        assert_eq!(got.user_id, 7);
        assert_eq!(got.username, "alice");
        assert!(got.is_moderator);
        let ttl = got.exp as i64 - Utc::now().timestamp();
        assert!((3590..=3600).contains(&ttl), "ttl was {ttl}");
    }

    #[test]
    fn claims_use_the_wire_names() {
        let value = serde_json::to_value(claims(100)).unwrap();
        assert_eq!(value["userID"], 7);
        assert_eq!(value["isModerator"], true);
        assert_eq!(value["username"], "alice");
    }

    #[test]
    fn expired_token_is_rejected_without_leeway() {
        let codec = TokenCodec::new(SECRET);
        let token = codec.sign(&claims(Utc::now().timestamp() - 5)).unwrap();
        let err = codec.verify(&token).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ExpiredSignature));
    }

    #[test]
    fn other_algorithms_are_rejected() {
        let codec = TokenCodec::new(SECRET);
        let exp = Utc::now().timestamp() + 600;
        let token = encode(
            &Header::new(Algorithm::HS512),
            &claims(exp),
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();
        let err = codec.verify(&token).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidAlgorithm));
    }

    #[test]
    fn foreign_secret_is_rejected() {
        let ours = TokenCodec::new(SECRET);
        let theirs = TokenCodec::new("some-other-secret");
        let token = theirs.issue(7, "alice", false).unwrap();
        let err = ours.verify(&token).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::InvalidSignature));
    }

    #[test]
    fn garbage_is_rejected() {
        let codec = TokenCodec::new(SECRET);
        assert!(codec.verify("not.a.token").is_err());
        assert!(codec.verify("").is_err());
    }
}
