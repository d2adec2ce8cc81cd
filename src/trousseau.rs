//! Trousseau (keyring) bundle
//!
//! Everything a freshly provisioned hosted domain needs, flattened to PEM
//! strings for the persistence collaborator: root and intermediate
//! material, each private key encrypted under its own password, plus the
//! hosting relationship (the cross-signed intermediate and the hosting
//! authority's certificate).

use crate::envelope::KeyCertEnvelope;
use crate::error::{PkiError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Certificate, encrypted key and password of one tier
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TierMaterial {
    pub certificate_pem: String,
    /// PKCS#8 PEM, AES-256-CBC under `password`
    pub private_key_pem: String,
    pub password: String,
    /// Base64 SHA-1 fingerprint of the certificate
    pub fingerprint_base64: String,
}

impl TierMaterial {
    /// Export an envelope holding a key, a certificate and a password
    pub fn from_envelope(envelope: &KeyCertEnvelope) -> Result<Self> {
        let password = envelope.password().ok_or(PkiError::MissingPassword)?;
        let private_key_pem = String::from_utf8(envelope.export_private_key(true)?)
            .map_err(|e| PkiError::Format(format!("Key PEM is not UTF-8: {}", e)))?;

        Ok(Self {
            certificate_pem: envelope.cert_pem()?,
            private_key_pem,
            password: password.to_string(),
            fingerprint_base64: envelope.fingerprint_sha1_base64()?,
        })
    }

    /// Rebuild the envelope, decrypting the key with the stored password
    pub fn to_envelope(&self) -> Result<KeyCertEnvelope> {
        KeyCertEnvelope::load(
            Some(self.private_key_pem.as_bytes()),
            Some(self.certificate_pem.as_bytes()),
            Some(self.password.as_str()),
        )
    }
}

impl fmt::Debug for TierMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TierMaterial")
            .field("fingerprint_base64", &self.fingerprint_base64)
            .field("private_key_pem", &"[REDACTED]")
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Hebergement {
    /// Hosted intermediate re-issued by the hosting authority
    pub cross_signed_pem: String,
    /// The hosting authority's own certificate
    pub hosting_authority_pem: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Trousseau {
    pub idmg: String,
    pub root: TierMaterial,
    pub intermediate: TierMaterial,
    pub hebergement: Hebergement,
}

impl Trousseau {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| PkiError::Format(format!("Failed to serialize trousseau: {}", e)))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| PkiError::Format(format!("Failed to parse trousseau: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configs::PkiConfig;
    use crate::generate_root_ca::RootBootstrapper;

    fn tier() -> (TierMaterial, KeyCertEnvelope) {
        let mut config = PkiConfig::default();
        config.keys.root_bits = 2048;
        let domain = RootBootstrapper::new(config).bootstrap_new_domain().unwrap();
        (TierMaterial::from_envelope(&domain.intermediate).unwrap(), domain.intermediate)
    }

    #[test]
    fn test_tier_material_reloads() {
        let (material, original) = tier();
        let reloaded = material.to_envelope().unwrap();
        assert!(reloaded
            .private_key()
            .unwrap()
            .public_eq(original.private_key().unwrap()));
        assert_eq!(reloaded.cert_pem().unwrap(), material.certificate_pem);
        assert!(material.private_key_pem.contains("ENCRYPTED PRIVATE KEY"));
    }

    #[test]
    fn test_envelope_without_password() {
        let (_, original) = tier();
        let bare = KeyCertEnvelope::from_parts(
            original.private_key().cloned(),
            original.certificate().cloned(),
        );
        assert!(matches!(
            TierMaterial::from_envelope(&bare),
            Err(PkiError::MissingPassword)
        ));
    }

    #[test]
    fn test_json_round_trip_and_redacted_debug() {
        let (material, _) = tier();
        let trousseau = Trousseau {
            idmg: "idmgA".into(),
            root: material.clone(),
            intermediate: material.clone(),
            hebergement: Hebergement {
                cross_signed_pem: material.certificate_pem.clone(),
                hosting_authority_pem: material.certificate_pem.clone(),
            },
        };

        let json = trousseau.to_json().unwrap();
        assert!(json.contains("\"hebergement\""));
        assert_eq!(Trousseau::from_json(&json).unwrap(), trousseau);

        let debug = format!("{:?}", trousseau);
        assert!(!debug.contains(&material.password));
        assert!(!debug.contains("ENCRYPTED PRIVATE KEY"));
    }
}
