use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, argon2::password_hash::Error> {
    let parsed = PasswordHash::new(hash)?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// In-memory admin sessions: bearer token -> expiry.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
}

impl SessionStore {
    /// Issue a new random token valid for `ttl`, or `None` if the expiry
    /// would fall outside the representable date range.
    pub fn create(&self, ttl: Duration) -> Option<(String, DateTime<Utc>)> {
        let expires_at = Utc::now().checked_add_signed(ttl)?;

        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);

        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        let now = Utc::now();
        sessions.retain(|_, expiry| *expiry > now);
        sessions.insert(token.clone(), expires_at);

        Some((token, expires_at))
    }

    pub fn is_valid(&self, token: &str) -> bool {
        let sessions = self.sessions.read().unwrap_or_else(PoisonError::into_inner);
        sessions
            .get(token)
            .is_some_and(|expiry| *expiry > Utc::now())
    }

    pub fn revoke(&self, token: &str) -> bool {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify_password() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("wrong horse", &hash).unwrap());
    }

    #[test]
    fn test_verify_rejects_malformed_hash() {
        assert!(verify_password("anything", "not-a-phc-string").is_err());
    }

    #[test]
    fn test_session_lifecycle() {
        let store = SessionStore::default();
        let (token, expires_at) = store.create(Duration::hours(1)).unwrap();

        assert!(expires_at > Utc::now());
        assert!(store.is_valid(&token));
        assert!(!store.is_valid("forged"));

        assert!(store.revoke(&token));
        assert!(!store.is_valid(&token));
        assert!(!store.revoke(&token));
    }

    #[test]
    fn test_expired_session_rejected() {
        let store = SessionStore::default();
        let (token, _) = store.create(Duration::seconds(-1)).unwrap();
        assert!(!store.is_valid(&token));
    }

    #[test]
    fn test_tokens_are_unique() {
        let store = SessionStore::default();
        let (a, _) = store.create(Duration::hours(1)).unwrap();
        let (b, _) = store.create(Duration::hours(1)).unwrap();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
    }

    #[test]
    fn test_create_rejects_overflowing_ttl() {
        let store = SessionStore::default();
        let ttl = Duration::try_hours(10_000_000_000).unwrap();
        assert!(store.create(ttl).is_none());
        assert!(store.sessions.read().unwrap().is_empty());
    }
}
