//! Locally cached session: the backend token plus the identity record
//!
//! Validity is judged from the token alone. The signing key belongs to the
//! backend, so only the payload shape and the `exp` claim are checked here.

use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::record::Record;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub record: Record,
}

/// Claims the backend puts into its auth tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub id: String,
    #[serde(rename = "collectionId", default)]
    pub collection_id: String,
    #[serde(rename = "type", default)]
    pub token_type: String,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

/// Decode token claims without verifying the signature
///
/// Returns `None` for anything that is not a well-formed, unexpired token.
pub fn decode_claims(token: &str) -> Option<SessionClaims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.leeway = 0;
    validation.validate_aud = false;
    validation.set_required_spec_claims(&["exp"]);

    jsonwebtoken::decode::<SessionClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .ok()
}

#[derive(Debug, Default)]
pub struct AuthStore {
    inner: RwLock<Option<Session>>,
}

impl AuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&self, token: impl Into<String>, record: Record) {
        *self.inner.write() = Some(Session {
            token: token.into(),
            record,
        });
    }

    /// Idempotent
    pub fn clear(&self) {
        *self.inner.write() = None;
    }

    pub fn token(&self) -> Option<String> {
        self.inner.read().as_ref().map(|s| s.token.clone())
    }

    pub fn record(&self) -> Option<Record> {
        self.inner.read().as_ref().map(|s| s.record.clone())
    }

    /// Structural, local-only validity check
    pub fn is_valid(&self) -> bool {
        self.inner
            .read()
            .as_ref()
            .is_some_and(|s| decode_claims(&s.token).is_some())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use jsonwebtoken::{EncodingKey, Header};
    use serde_json::json;

    pub(crate) fn token_expiring_in(seconds: i64) -> String {
        let claims = SessionClaims {
            id: "u1".to_string(),
            collection_id: "_pb_users_auth_".to_string(),
            token_type: "auth".to_string(),
            exp: chrono::Utc::now().timestamp() + seconds,
            jti: None,
        };
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"backend-secret"),
        )
        .unwrap()
    }

    fn user() -> Record {
        Record::from_value(json!({ "id": "u1", "email": "admin@example.com", "role": "admin" }))
            .unwrap()
    }

    #[test]
    fn unexpired_token_is_valid() {
        let store = AuthStore::new();
        store.save(token_expiring_in(3600), user());
        assert!(store.is_valid());
        assert_eq!(store.record().unwrap().get_str("role"), Some("admin"));
    }

    #[test]
    fn expired_or_garbage_tokens_are_invalid() {
        let store = AuthStore::new();
        store.save(token_expiring_in(-60), user());
        assert!(!store.is_valid());

        store.save("not-a-token", user());
        assert!(!store.is_valid());
    }

    #[test]
    fn clear_is_idempotent() {
        let store = AuthStore::new();
        store.clear();
        store.save(token_expiring_in(3600), user());
        store.clear();
        store.clear();
        assert!(!store.is_valid());
        assert!(store.token().is_none());
    }

    #[test]
    fn claims_are_readable_without_the_key() {
        let claims = decode_claims(&token_expiring_in(120)).unwrap();
        assert_eq!(claims.id, "u1");
        assert_eq!(claims.token_type, "auth");
    }
}
