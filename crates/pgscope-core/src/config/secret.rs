//! Credential-store decryption: password material in the configuration file
//! is base64(nonce || AES-256-GCM ciphertext), decrypted at load time with a
//! master key supplied out-of-band (never committed alongside the config).

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use zeroize::Zeroizing;

use super::error::ConfigError;

const NONCE_LEN: usize = 12;

/// The 32-byte AES-256 key, zeroized on drop so it doesn't linger in a core
/// dump past the decryption pass.
pub struct MasterKey(Zeroizing<[u8; 32]>);

impl MasterKey {
    /// Reads the key from `PGSCOPE_MASTER_KEY` (base64) if set, otherwise
    /// from the file at `path` (raw 32 bytes or base64 text).
    pub fn load(path: Option<&std::path::Path>) -> Result<MasterKey, ConfigError> {
        if let Ok(raw) = std::env::var("PGSCOPE_MASTER_KEY") {
            return Self::from_base64(&raw);
        }
        let path = path.ok_or_else(|| {
            ConfigError::Secret("no master key: set PGSCOPE_MASTER_KEY or pass --master-key-file".to_string())
        })?;
        let bytes = std::fs::read(path).map_err(|e| ConfigError::Secret(format!("reading master key file: {e}")))?;
        if bytes.len() == 32 {
            let mut key = [0u8; 32];
            key.copy_from_slice(&bytes);
            return Ok(MasterKey(Zeroizing::new(key)));
        }
        let text = String::from_utf8_lossy(&bytes);
        Self::from_base64(text.trim())
    }

    fn from_base64(raw: &str) -> Result<MasterKey, ConfigError> {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(raw.trim())
            .map_err(|e| ConfigError::Secret(format!("master key is not valid base64: {e}")))?;
        if decoded.len() != 32 {
            return Err(ConfigError::Secret(format!("master key must decode to 32 bytes, got {}", decoded.len())));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&decoded);
        Ok(MasterKey(Zeroizing::new(key)))
    }

    /// Decrypts one credential-store entry: `base64(nonce || ciphertext)`.
    pub fn decrypt(&self, encrypted: &str) -> Result<Zeroizing<String>, ConfigError> {
        let blob = base64::engine::general_purpose::STANDARD
            .decode(encrypted.trim())
            .map_err(|e| ConfigError::Secret(format!("credential is not valid base64: {e}")))?;
        if blob.len() < NONCE_LEN {
            return Err(ConfigError::Secret("credential shorter than the nonce prefix".to_string()));
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*self.0));
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| ConfigError::Secret("decryption failed: wrong master key or corrupt entry".to_string()))?;
        let text = String::from_utf8(plaintext).map_err(|e| ConfigError::Secret(format!("decrypted credential is not UTF-8: {e}")))?;
        Ok(Zeroizing::new(text))
    }

    /// Encrypts a password for writing into a credential store — used by the
    /// administration tooling that produces `pgscope.toml`, not by the core
    /// load path, but kept alongside `decrypt` since they share the key and
    /// framing.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, ConfigError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*self.0));
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = cipher.encrypt(&nonce, plaintext.as_bytes()).map_err(|e| ConfigError::Secret(format!("encryption failed: {e}")))?;
        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(nonce.as_slice());
        blob.extend_from_slice(&ciphertext);
        Ok(base64::engine::general_purpose::STANDARD.encode(blob))
    }

    /// Test-only: builds a deterministic key without touching the
    /// environment or filesystem, for exercising `config::mod` tests that
    /// need a known key.
    #[cfg(test)]
    pub(crate) fn for_test(bytes: [u8; 32]) -> MasterKey {
        MasterKey(Zeroizing::new(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> MasterKey {
        MasterKey(Zeroizing::new([7u8; 32]))
    }

    #[test]
    fn round_trips_through_encrypt_and_decrypt() {
        let key = test_key();
        let encrypted = key.encrypt("s3cret").unwrap();
        let decrypted = key.decrypt(&encrypted).unwrap();
        assert_eq!(decrypted.as_str(), "s3cret");
    }

    #[test]
    fn rejects_corrupt_ciphertext() {
        let key = test_key();
        let mut encrypted = key.encrypt("s3cret").unwrap();
        encrypted.push('A');
        assert!(key.decrypt(&encrypted).is_err());
    }

    #[test]
    fn rejects_wrong_key() {
        let key = test_key();
        let encrypted = key.encrypt("s3cret").unwrap();
        let other = MasterKey(Zeroizing::new([9u8; 32]));
        assert!(other.decrypt(&encrypted).is_err());
    }
}
