//! At-rest encryption for recorded credentials
//!
//! AES-256-GCM with a random nonce prefixed to the ciphertext, base64
//! encoded. The key comes from process configuration and never leaves it.

use crate::{CoreError, Result};
use aes_gcm::aead::{Aead, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, KeyInit, Nonce};
use base64::Engine;

const NONCE_LEN: usize = 12;

/// Seals and opens small secrets (credentials, root passwords)
#[derive(Clone)]
pub struct SecretBox {
    cipher: Aes256Gcm,
}

impl SecretBox {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Encrypt. Output is base64(nonce || ciphertext).
    pub fn seal(&self, plaintext: &[u8]) -> Result<String> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| CoreError::Crypto(e.to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(blob))
    }

    /// Decrypt a sealed blob back to the original bytes
    pub fn open(&self, sealed: &str) -> Result<Vec<u8>> {
        let blob = base64::engine::general_purpose::STANDARD
            .decode(sealed)
            .map_err(|e| CoreError::Crypto(format!("invalid base64: {}", e)))?;
        if blob.len() < NONCE_LEN {
            return Err(CoreError::Crypto("sealed blob too short".to_string()));
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| CoreError::Crypto(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret_box() -> SecretBox {
        SecretBox::new(&[42u8; 32])
    }

    #[test]
    fn test_round_trip() {
        let sealed = secret_box().seal(b"admin:hunter2").unwrap();
        let opened = secret_box().open(&sealed).unwrap();
        assert_eq!(opened, b"admin:hunter2");
    }

    #[test]
    fn test_round_trip_arbitrary_bytes() {
        let blob: Vec<u8> = (0..=255).collect();
        let sealed = secret_box().seal(&blob).unwrap();
        assert_eq!(secret_box().open(&sealed).unwrap(), blob);
    }

    #[test]
    fn test_nonce_makes_output_unique() {
        let a = secret_box().seal(b"same").unwrap();
        let b = secret_box().seal(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = secret_box().seal(b"secret").unwrap();
        let other = SecretBox::new(&[7u8; 32]);
        assert!(other.open(&sealed).is_err());
    }

    #[test]
    fn test_tampered_blob_fails() {
        let sealed = secret_box().seal(b"secret").unwrap();
        let mut blob = base64::engine::general_purpose::STANDARD
            .decode(&sealed)
            .unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0xff;
        let tampered = base64::engine::general_purpose::STANDARD.encode(blob);
        assert!(secret_box().open(&tampered).is_err());
    }

    #[test]
    fn test_truncated_blob_fails() {
        assert!(secret_box().open("AAAA").is_err());
    }
}
