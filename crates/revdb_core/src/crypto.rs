//! Encryption at rest for the revision log.
//!
//! An encrypted datastore seals every log payload with AES-256-GCM. The
//! frame header stays in the clear and is authenticated as associated data,
//! so a payload cannot be moved to a frame of another type.
//!
//! Keys are zeroized on drop and never printed.

use crate::error::{CoreError, CoreResult};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

/// Encryption key for AES-256-GCM.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Generates a new random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns `Encryption` unless `bytes` is exactly 32 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CoreError::encryption(format!(
                "key must be {KEY_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { bytes: key })
    }

    /// Derives a key from a password with HKDF-SHA256.
    ///
    /// The salt should be unique per datastore. HKDF does no key
    /// stretching, so low-entropy passwords stay guessable.
    ///
    /// # Errors
    ///
    /// Returns `Encryption` if the expansion fails.
    pub fn derive_from_password(password: &[u8], salt: &[u8]) -> CoreResult<Self> {
        let hk = hkdf::Hkdf::<Sha256>::new(Some(salt), password);
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(b"revdb-encryption-key-v1", &mut bytes)
            .map_err(|_| CoreError::encryption("key derivation failed"))?;
        Ok(Self { bytes })
    }

    /// Returns the raw key bytes. Do not log or persist them.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Returns a short, one-way identifier of the key.
    ///
    /// Two handles on one datastore must use keys with equal fingerprints.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        Sha256::digest(self.bytes)
            .iter()
            .take(8)
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Seals and opens log payloads.
pub struct CryptoManager {
    cipher: Aes256Gcm,
}

impl CryptoManager {
    /// Creates a manager for `key`.
    #[must_use]
    pub fn new(key: &EncryptionKey) -> Self {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));
        Self { cipher }
    }

    /// Encrypts `plaintext`, authenticating `aad` alongside it.
    ///
    /// The output is `nonce (12) || ciphertext || tag (16)`.
    ///
    /// # Errors
    ///
    /// Returns `Encryption` if the cipher fails.
    pub fn encrypt_with_aad(&self, plaintext: &[u8], aad: &[u8]) -> CoreResult<Vec<u8>> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let sealed = self
            .cipher
            .encrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CoreError::encryption("encryption failed"))?;

        let mut out = Vec::with_capacity(NONCE_SIZE + sealed.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend(sealed);
        Ok(out)
    }

    /// Decrypts the output of [`encrypt_with_aad`](Self::encrypt_with_aad).
    ///
    /// # Errors
    ///
    /// Returns `Encryption` for a wrong key, a different `aad` or damaged
    /// data.
    pub fn decrypt_with_aad(&self, sealed: &[u8], aad: &[u8]) -> CoreResult<Vec<u8>> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CoreError::encryption("ciphertext too short"));
        }
        let (nonce, body) = sealed.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: body, aad })
            .map_err(|_| CoreError::encryption("wrong encryption key"))
    }
}

impl std::fmt::Debug for CryptoManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoManager")
            .field("cipher", &"Aes256Gcm")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_from_bytes_and_passwords() {
        assert!(EncryptionKey::from_bytes(&[0u8; 16]).is_err());
        let key = EncryptionKey::from_bytes(&[7u8; KEY_SIZE]).unwrap();
        assert_eq!(key.as_bytes(), &[7u8; KEY_SIZE]);

        let a = EncryptionKey::derive_from_password(b"hunter2", b"notes").unwrap();
        let b = EncryptionKey::derive_from_password(b"hunter2", b"notes").unwrap();
        let c = EncryptionKey::derive_from_password(b"hunter2", b"diary").unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 16);
        assert_eq!(format!("{a:?}"), r#"EncryptionKey { bytes: "[REDACTED]" }"#);
    }

    #[test]
    fn sealed_payloads_need_key_and_aad() {
        let key = EncryptionKey::generate();
        let crypto = CryptoManager::new(&key);

        let sealed = crypto.encrypt_with_aad(b"secret body", b"header").unwrap();
        assert_eq!(sealed.len(), NONCE_SIZE + b"secret body".len() + TAG_SIZE);
        assert_eq!(crypto.decrypt_with_aad(&sealed, b"header").unwrap(), b"secret body");
        assert_ne!(sealed, crypto.encrypt_with_aad(b"secret body", b"header").unwrap());

        assert!(crypto.decrypt_with_aad(&sealed, b"other").is_err());
        let other = CryptoManager::new(&EncryptionKey::generate());
        assert!(other.decrypt_with_aad(&sealed, b"header").is_err());
        assert!(crypto.decrypt_with_aad(&sealed[..10], b"header").is_err());
    }
}
