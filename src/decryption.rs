//! Decrypt-only helper for secrets addressed to a certificate
//!
//! A sender wraps a random AES-256 key with the recipient certificate's
//! public key (RSA-OAEP/SHA-256, see [`KeyCertEnvelope::encrypt_for`]) and
//! encrypts the payload itself with AES-256-CBC. This helper undoes both
//! layers with the recipient's private key. Unwrapped secret keys stay in a
//! [`SecretBox`] and are zeroed when dropped.

use crate::envelope::{EncryptedSecret, KeyCertEnvelope};
use crate::error::{PkiError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use openssl::symm::{decrypt, Cipher};
use secrecy::{ExposeSecret, SecretBox};

/// Size of AES-256 key (256 bits = 32 bytes)
pub const AES_256_KEY_SIZE: usize = 32;
/// Size of the AES block, and of the CBC IV
pub const AES_CBC_IV_SIZE: usize = 16;

pub struct DecryptionHelper {
    envelope: KeyCertEnvelope,
}

impl DecryptionHelper {
    pub fn new(envelope: KeyCertEnvelope) -> Self {
        Self { envelope }
    }

    /// Helper over a PEM private key, encrypted when `password` is given
    pub fn from_pem(key_pem: &[u8], password: Option<&str>) -> Result<Self> {
        Ok(Self::new(KeyCertEnvelope::load(Some(key_pem), None, password)?))
    }

    pub fn envelope(&self) -> &KeyCertEnvelope {
        &self.envelope
    }

    /// Unwrap a base64 RSA-OAEP ciphertext into the raw secret key
    pub fn decrypt_secret_key(&self, secret_key_b64: &str) -> Result<SecretBox<Vec<u8>>> {
        self.envelope.decrypt(secret_key_b64)
    }

    /// Unwrap a secret after checking it was addressed to this envelope's
    /// certificate
    pub fn decrypt_secret(&self, secret: &EncryptedSecret) -> Result<SecretBox<Vec<u8>>> {
        if self.envelope.certificate().is_some() {
            let fingerprint = self.envelope.fingerprint_sha1()?;
            if !fingerprint.eq_ignore_ascii_case(&secret.fingerprint) {
                return Err(PkiError::Decrypt(format!(
                    "Secret addressed to certificate {}, not {}",
                    secret.fingerprint, fingerprint
                )));
            }
        }
        self.decrypt_secret_key(&secret.ciphertext_b64)
    }

    /// AES-256-CBC (PKCS#7 padding) decryption of a base64 payload
    pub fn decrypt_payload(
        &self,
        secret_key: &SecretBox<Vec<u8>>,
        iv_b64: &str,
        ciphertext_b64: &str,
    ) -> Result<Vec<u8>> {
        let secret_key = secret_key.expose_secret().as_slice();
        if secret_key.len() != AES_256_KEY_SIZE {
            return Err(PkiError::Decrypt(format!(
                "Secret key must be {} bytes, got {}",
                AES_256_KEY_SIZE,
                secret_key.len()
            )));
        }
        let iv = BASE64
            .decode(iv_b64.trim())
            .map_err(|e| PkiError::Decrypt(format!("Invalid base64 IV: {}", e)))?;
        if iv.len() != AES_CBC_IV_SIZE {
            return Err(PkiError::Decrypt(format!(
                "IV must be {} bytes, got {}",
                AES_CBC_IV_SIZE,
                iv.len()
            )));
        }
        let ciphertext = BASE64
            .decode(ciphertext_b64.trim())
            .map_err(|e| PkiError::Decrypt(format!("Invalid base64 payload: {}", e)))?;

        decrypt(Cipher::aes_256_cbc(), secret_key, Some(iv.as_slice()), &ciphertext)
            .map_err(|e| PkiError::Decrypt(format!("AES-256-CBC decryption failed: {}", e)))
    }
}
