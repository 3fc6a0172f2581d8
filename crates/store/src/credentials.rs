//! Encrypted per-user credential storage.
//!
//! Values are AES-256-GCM encrypted with a process-wide key resolved at
//! startup and stored as `base64(nonce || ciphertext)`. Decryption
//! happens only at the point of use; plaintext never leaves this module
//! except through [`CredentialRepo::get`]/[`CredentialRepo::get_all`].

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use ma_domain::error::{Error, Result};

use crate::from_sqlx;
use crate::models::UserCredentialRow;

const NONCE_LEN: usize = 12;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cipher
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process-wide symmetric cipher for credential values.
#[derive(Clone)]
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCipher").finish_non_exhaustive()
    }
}

impl CredentialCipher {
    /// Build from a base64-encoded 32-byte key.
    pub fn from_base64_key(key_b64: &str) -> Result<Self> {
        let key_bytes = BASE64
            .decode(key_b64)
            .map_err(|e| Error::Config(format!("CREDENTIAL_ENCRYPTION_KEY is not base64: {e}")))?;
        if key_bytes.len() != 32 {
            return Err(Error::Config(format!(
                "CREDENTIAL_ENCRYPTION_KEY must decode to 32 bytes, got {}",
                key_bytes.len()
            )));
        }
        Ok(Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key_bytes)),
        })
    }

    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| Error::Internal("credential encryption failed".into()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    pub fn decrypt(&self, stored: &str) -> Result<String> {
        let raw = BASE64
            .decode(stored)
            .map_err(|_| Error::Internal("stored credential is not base64".into()))?;
        if raw.len() <= NONCE_LEN {
            return Err(Error::Internal("stored credential is truncated".into()));
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| Error::Internal("credential decryption failed".into()))?;
        String::from_utf8(plaintext)
            .map_err(|_| Error::Internal("decrypted credential is not UTF-8".into()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Repository
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Clone)]
pub struct CredentialRepo {
    pool: PgPool,
    cipher: CredentialCipher,
}

impl CredentialRepo {
    pub fn new(pool: PgPool, cipher: CredentialCipher) -> Self {
        Self { pool, cipher }
    }

    /// Encrypt and upsert one credential.
    pub async fn set(&self, user_id: Uuid, service: &str, key: &str, value: &str) -> Result<()> {
        let encrypted = self.cipher.encrypt(value)?;
        sqlx::query(
            "INSERT INTO user_credentials \
             (id, user_id, service, credential_key, encrypted_value, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $6) \
             ON CONFLICT (user_id, service, credential_key) \
             DO UPDATE SET encrypted_value = EXCLUDED.encrypted_value, \
                           updated_at = EXCLUDED.updated_at",
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(service)
        .bind(key)
        .bind(encrypted)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(from_sqlx)?;
        Ok(())
    }

    /// Decrypt and return one credential value, or `None`.
    pub async fn get(&self, user_id: Uuid, service: &str, key: &str) -> Result<Option<String>> {
        let row = sqlx::query_as::<_, UserCredentialRow>(
            "SELECT * FROM user_credentials \
             WHERE user_id = $1 AND service = $2 AND credential_key = $3",
        )
        .bind(user_id)
        .bind(service)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(from_sqlx)?;

        row.map(|r| self.cipher.decrypt(&r.encrypted_value)).transpose()
    }

    /// Decrypt all of a service's credentials as `key → value`.
    pub async fn get_all(
        &self,
        user_id: Uuid,
        service: &str,
    ) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query_as::<_, UserCredentialRow>(
            "SELECT * FROM user_credentials WHERE user_id = $1 AND service = $2",
        )
        .bind(user_id)
        .bind(service)
        .fetch_all(&self.pool)
        .await
        .map_err(from_sqlx)?;

        rows.into_iter()
            .map(|r| Ok((r.credential_key.clone(), self.cipher.decrypt(&r.encrypted_value)?)))
            .collect()
    }

    /// Delete one key, or every key for the service when `key` is `None`.
    pub async fn delete(&self, user_id: Uuid, service: &str, key: Option<&str>) -> Result<u64> {
        let result = match key {
            Some(k) => sqlx::query(
                "DELETE FROM user_credentials \
                 WHERE user_id = $1 AND service = $2 AND credential_key = $3",
            )
            .bind(user_id)
            .bind(service)
            .bind(k)
            .execute(&self.pool)
            .await
            .map_err(from_sqlx)?,
            None => sqlx::query(
                "DELETE FROM user_credentials WHERE user_id = $1 AND service = $2",
            )
            .bind(user_id)
            .bind(service)
            .execute(&self.pool)
            .await
            .map_err(from_sqlx)?,
        };
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> CredentialCipher {
        CredentialCipher::from_base64_key(&BASE64.encode([7u8; 32])).unwrap()
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let cipher = test_cipher();
        let stored = cipher.encrypt("garmin-password-123").unwrap();
        assert_ne!(stored, "garmin-password-123");
        assert_eq!(cipher.decrypt(&stored).unwrap(), "garmin-password-123");
    }

    #[test]
    fn fresh_nonce_per_encryption() {
        let cipher = test_cipher();
        let a = cipher.encrypt("same").unwrap();
        let b = cipher.encrypt("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn tampered_ciphertext_rejected() {
        let cipher = test_cipher();
        let stored = cipher.encrypt("secret").unwrap();
        let mut raw = BASE64.decode(&stored).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        assert!(cipher.decrypt(&BASE64.encode(raw)).is_err());
    }

    #[test]
    fn rejects_wrong_key_length() {
        let err = CredentialCipher::from_base64_key(&BASE64.encode([1u8; 16])).unwrap_err();
        assert!(err.to_string().contains("32 bytes"));
    }

    #[test]
    fn rejects_non_base64_key() {
        assert!(CredentialCipher::from_base64_key("not base64!!").is_err());
    }
}
