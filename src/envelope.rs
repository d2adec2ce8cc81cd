//! Key and certificate envelope
//!
//! [`KeyCertEnvelope`] is the unit of transfer between this crate and
//! whatever persists keys: it owns an RSA private key, a certificate, the
//! password protecting the key's exported form, an optional CSR and the
//! PEM chain (root excluded). Every field is optional so an envelope can be
//! built up step by step, from generation or from PEM import.
//!
//! The private key is never shared between envelopes and never appears in
//! `Debug` output.

use crate::error::{PkiError, Result};
use crate::extensions::{self, PolicyExtension};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use openssl::encrypt::{Decrypter, Encrypter};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private, Public};
use openssl::rsa::{Padding, Rsa};
use openssl::symm::Cipher;
use openssl::x509::{X509NameRef, X509Ref, X509Req, X509};
use secrecy::zeroize::Zeroize;
use secrecy::{ExposeSecret, ExposeSecretMut, SecretBox, SecretString};
use sha2::{Digest, Sha512_224};
use std::fmt;
use x509_parser::time::ASN1Time;

/// Default RSA modulus size for node and intermediate keys
pub const RSA_KEY_SIZE_DEFAULT: u32 = 2048;
/// Random bytes behind a generated key password, before base64
const PASSWORD_BYTES: usize = 32;

/// Subject or authority key identifier, as lowercase hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(String);

impl KeyId {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        KeyId(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Output of [`KeyCertEnvelope::encrypt_for`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedSecret {
    pub ciphertext_b64: String,
    /// SHA-1 fingerprint (hex) of the certificate the secret was encrypted for
    pub fingerprint: String,
}

#[derive(Default)]
pub struct KeyCertEnvelope {
    private_key: Option<PKey<Private>>,
    certificate: Option<X509>,
    password: Option<SecretString>,
    csr: Option<X509Req>,
    chain: Option<Vec<String>>,
}

impl fmt::Debug for KeyCertEnvelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyCertEnvelope")
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field(
                "certificate",
                &self.certificate.as_ref().and_then(|c| {
                    name_entry(c.subject_name(), Nid::COMMONNAME)
                }),
            )
            .field("csr", &self.csr.is_some())
            .field("chain_len", &self.chain.as_ref().map(Vec::len))
            .finish()
    }
}

/// Domain identifier of a root certificate: base58 of SHA-512/224 over its DER
pub fn idmg_of(cert: &X509Ref) -> Result<String> {
    let der = cert.to_der()?;
    let digest = Sha512_224::digest(&der);
    Ok(bs58::encode(digest).into_string())
}

/// First value of `nid` in a distinguished name, if present and valid UTF-8.
/// A value with an interior NUL is treated as absent.
pub(crate) fn name_entry(name: &X509NameRef, nid: Nid) -> Option<String> {
    let entry = name.entries_by_nid(nid).next()?;
    let value = std::str::from_utf8(entry.data().as_slice()).ok()?;
    if value.contains('\0') {
        return None;
    }
    Some(value.to_string())
}

pub(crate) fn generate_rsa_key(bits: u32) -> Result<PKey<Private>> {
    let rsa = Rsa::generate(bits)?;
    Ok(PKey::from_rsa(rsa)?)
}

/// Parse a PEM public key, accepting either SubjectPublicKeyInfo or PKCS#1
pub fn load_public_key(pem: &[u8]) -> Result<PKey<Public>> {
    PKey::public_key_from_pem(pem)
        .or_else(|_| Rsa::public_key_from_pem_pkcs1(pem).and_then(PKey::from_rsa))
        .map_err(|e| PkiError::Format(format!("Failed to parse public key PEM: {}", e)))
}

pub fn load_csr(pem: &[u8]) -> Result<X509Req> {
    X509Req::from_pem(pem).map_err(|e| PkiError::Format(format!("Failed to parse CSR PEM: {}", e)))
}

pub fn load_certificate(pem: &[u8]) -> Result<X509> {
    X509::from_pem(pem)
        .map_err(|e| PkiError::Format(format!("Failed to parse certificate PEM: {}", e)))
}

fn cert_to_pem(cert: &X509Ref) -> Result<String> {
    let pem = cert.to_pem()?;
    String::from_utf8(pem).map_err(|e| PkiError::Format(format!("PEM is not UTF-8: {}", e)))
}

impl KeyCertEnvelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(private_key: Option<PKey<Private>>, certificate: Option<X509>) -> Self {
        Self {
            private_key,
            certificate,
            ..Self::default()
        }
    }

    /// Generate a fresh RSA key, optionally with a random password for
    /// encrypted export.
    pub fn generate_key(&mut self, bits: u32, with_password: bool) -> Result<()> {
        self.private_key = Some(generate_rsa_key(bits)?);
        self.password = if with_password {
            let mut raw = [0u8; PASSWORD_BYTES];
            let seeded = openssl::rand::rand_bytes(&mut raw);
            let password = seeded.map(|()| SecretString::from(BASE64.encode(raw)));
            raw.zeroize();
            Some(password?)
        } else {
            None
        };
        Ok(())
    }

    /// Import PEM material. A password means the key is an encrypted PKCS#8
    /// PEM; it is kept in the envelope for later re-export.
    pub fn load(
        key_pem: Option<&[u8]>,
        cert_pem: Option<&[u8]>,
        password: Option<&str>,
    ) -> Result<Self> {
        let private_key = match key_pem {
            Some(pem) => {
                // An empty passphrase never prompts and still reads clear keys
                let passphrase = password.unwrap_or("").as_bytes();
                let key = PKey::private_key_from_pem_passphrase(pem, passphrase).map_err(|e| {
                    if password.is_some() {
                        PkiError::Decrypt(format!("Failed to decrypt private key: {}", e))
                    } else {
                        PkiError::Format(format!("Failed to parse private key PEM: {}", e))
                    }
                })?;
                Some(key)
            }
            None => None,
        };

        let certificate = cert_pem.map(load_certificate).transpose()?;

        let envelope = Self {
            private_key,
            certificate,
            password: password.map(|p| SecretString::from(p.to_string())),
            ..Self::default()
        };

        if envelope.private_key.is_some()
            && envelope.certificate.is_some()
            && !envelope.key_matches_certificate()?
        {
            return Err(PkiError::Mismatch);
        }

        Ok(envelope)
    }

    /// True when the held key's public half equals the certificate's key
    pub fn key_matches_certificate(&self) -> Result<bool> {
        let key = self.require_private_key()?;
        let cert = self.require_certificate()?;
        Ok(cert.public_key()?.public_eq(key))
    }

    pub fn private_key(&self) -> Option<&PKey<Private>> {
        self.private_key.as_ref()
    }

    pub fn certificate(&self) -> Option<&X509> {
        self.certificate.as_ref()
    }

    pub fn set_certificate(&mut self, certificate: X509) {
        self.certificate = Some(certificate);
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_ref().map(|p| p.expose_secret())
    }

    pub fn csr(&self) -> Option<&X509Req> {
        self.csr.as_ref()
    }

    pub fn set_csr(&mut self, csr: X509Req) {
        self.csr = Some(csr);
    }

    pub fn chain(&self) -> Option<&[String]> {
        self.chain.as_deref()
    }

    pub fn set_chain(&mut self, chain: Vec<String>) {
        self.chain = Some(chain);
    }

    pub(crate) fn require_private_key(&self) -> Result<&PKey<Private>> {
        self.private_key
            .as_ref()
            .ok_or_else(|| PkiError::MissingPrivateKey("envelope holds no private key".into()))
    }

    pub(crate) fn require_certificate(&self) -> Result<&X509> {
        self.certificate
            .as_ref()
            .ok_or_else(|| PkiError::MissingCertificate("envelope holds no certificate".into()))
    }

    pub fn cert_pem(&self) -> Result<String> {
        cert_to_pem(self.require_certificate()?)
    }

    /// Certificate followed by its chain, as one PEM bundle
    pub fn chain_pem(&self) -> Result<String> {
        match &self.chain {
            Some(chain) if !chain.is_empty() => Ok(chain.concat()),
            _ => self.cert_pem(),
        }
    }

    /// Public key PEM, from the certificate if present, otherwise the key
    pub fn public_key_pem(&self) -> Result<String> {
        let pem = match (&self.certificate, &self.private_key) {
            (Some(cert), _) => cert.public_key()?.public_key_to_pem()?,
            (None, Some(key)) => key.public_key_to_pem()?,
            (None, None) => {
                return Err(PkiError::MissingCertificate(
                    "envelope holds neither key nor certificate".into(),
                ))
            }
        };
        String::from_utf8(pem).map_err(|e| PkiError::Format(format!("PEM is not UTF-8: {}", e)))
    }

    /// PKCS#8 PEM of the private key, AES-256-CBC encrypted under the held
    /// password when `encrypted` is set.
    pub fn export_private_key(&self, encrypted: bool) -> Result<Vec<u8>> {
        let key = self.require_private_key()?;
        if encrypted {
            let password = self.password.as_ref().ok_or(PkiError::MissingPassword)?;
            Ok(key.private_key_to_pem_pkcs8_passphrase(
                Cipher::aes_256_cbc(),
                password.expose_secret().as_bytes(),
            )?)
        } else {
            Ok(key.private_key_to_pem_pkcs8()?)
        }
    }

    /// Encrypt for the certificate holder with RSA-OAEP/SHA-256. The returned
    /// fingerprint lets the recipient select the matching private key.
    pub fn encrypt_for(&self, plaintext: &[u8]) -> Result<EncryptedSecret> {
        let cert = self.require_certificate()?;
        let public_key = cert.public_key()?;

        let mut encrypter = Encrypter::new(&public_key)?;
        encrypter.set_rsa_padding(Padding::PKCS1_OAEP)?;
        encrypter.set_rsa_oaep_md(MessageDigest::sha256())?;
        encrypter.set_rsa_mgf1_md(MessageDigest::sha256())?;

        let mut ciphertext = vec![0u8; encrypter.encrypt_len(plaintext)?];
        let len = encrypter.encrypt(plaintext, &mut ciphertext)?;
        ciphertext.truncate(len);

        Ok(EncryptedSecret {
            ciphertext_b64: BASE64.encode(&ciphertext),
            fingerprint: self.fingerprint_sha1()?,
        })
    }

    /// RSA-OAEP/SHA-256 decryption with the envelope's private key. The
    /// plaintext is zeroed when the returned box is dropped.
    pub fn decrypt(&self, ciphertext_b64: &str) -> Result<SecretBox<Vec<u8>>> {
        let key = self.require_private_key()?;
        let ciphertext = BASE64
            .decode(ciphertext_b64.trim())
            .map_err(|e| PkiError::Decrypt(format!("Invalid base64 ciphertext: {}", e)))?;

        type Plaintext = SecretBox<Vec<u8>>;
        let decrypt = || -> std::result::Result<Plaintext, openssl::error::ErrorStack> {
            let mut decrypter = Decrypter::new(key)?;
            decrypter.set_rsa_padding(Padding::PKCS1_OAEP)?;
            decrypter.set_rsa_oaep_md(MessageDigest::sha256())?;
            decrypter.set_rsa_mgf1_md(MessageDigest::sha256())?;

            // Boxed before decryption so the buffer is zeroed on every path
            let buffer = vec![0u8; decrypter.decrypt_len(&ciphertext)?];
            let mut plaintext = SecretBox::new(Box::new(buffer));
            let len = decrypter.decrypt(&ciphertext, plaintext.expose_secret_mut())?;
            plaintext.expose_secret_mut().truncate(len);
            Ok(plaintext)
        };

        decrypt().map_err(|e| PkiError::Decrypt(format!("RSA-OAEP decryption failed: {}", e)))
    }

    /// SHA-1 fingerprint of the certificate, lowercase hex
    pub fn fingerprint_sha1(&self) -> Result<String> {
        let digest = self.require_certificate()?.digest(MessageDigest::sha1())?;
        Ok(hex::encode(digest))
    }

    pub fn fingerprint_sha1_base64(&self) -> Result<String> {
        let digest = self.require_certificate()?.digest(MessageDigest::sha1())?;
        Ok(BASE64.encode(digest))
    }

    /// The idmg when this envelope holds a root certificate
    pub fn fingerprint_sha512_224_base58(&self) -> Result<String> {
        idmg_of(self.require_certificate()?)
    }

    pub fn ski(&self) -> Result<KeyId> {
        let cert = self.require_certificate()?;
        ski_of(cert)
    }

    pub fn akid(&self) -> Result<KeyId> {
        let cert = self.require_certificate()?;
        akid_of(cert)
    }

    /// Tags carried by one of the policy extensions
    pub fn extension(&self, kind: PolicyExtension) -> Result<Vec<String>> {
        let der = self.require_certificate()?.to_der()?;
        extensions::read_tags(&der, kind)
    }

    pub fn subject_common_name(&self) -> Result<Option<String>> {
        Ok(name_entry(self.require_certificate()?.subject_name(), Nid::COMMONNAME))
    }

    pub fn subject_organization(&self) -> Result<Option<String>> {
        Ok(name_entry(self.require_certificate()?.subject_name(), Nid::ORGANIZATIONNAME))
    }

    pub fn subject_unit(&self) -> Result<Option<String>> {
        Ok(name_entry(
            self.require_certificate()?.subject_name(),
            Nid::ORGANIZATIONALUNITNAME,
        ))
    }

    pub fn issuer_organization(&self) -> Result<Option<String>> {
        Ok(name_entry(self.require_certificate()?.issuer_name(), Nid::ORGANIZATIONNAME))
    }

    /// CA flag and path length from BasicConstraints, `None` if absent
    pub fn basic_constraints(&self) -> Result<Option<(bool, Option<u32>)>> {
        let der = self.require_certificate()?.to_der()?;
        let cert = extensions::parse_certificate_der(&der)?;
        let constraints = cert
            .basic_constraints()
            .map_err(|e| PkiError::Format(format!("Invalid BasicConstraints: {}", e)))?;
        Ok(constraints.map(|bc| (bc.value.ca, bc.value.path_len_constraint)))
    }

    pub fn is_ca(&self) -> Result<bool> {
        Ok(matches!(self.basic_constraints()?, Some((true, _))))
    }

    pub fn path_length(&self) -> Result<Option<u32>> {
        Ok(self.basic_constraints()?.and_then(|(_, len)| len))
    }

    /// Whole days between not_before and not_after
    pub fn validity_days(&self) -> Result<i32> {
        let cert = self.require_certificate()?;
        Ok(cert.not_before().diff(cert.not_after())?.days)
    }

    pub fn not_before(&self) -> Result<ASN1Time> {
        let der = self.require_certificate()?.to_der()?;
        Ok(extensions::parse_certificate_der(&der)?.validity().not_before)
    }

    pub fn not_after(&self) -> Result<ASN1Time> {
        let der = self.require_certificate()?.to_der()?;
        Ok(extensions::parse_certificate_der(&der)?.validity().not_after)
    }

    /// DNS names of the SubjectAlternativeName extension, empty if absent
    pub fn dns_names(&self) -> Result<Vec<String>> {
        let cert = self.require_certificate()?;
        Ok(cert
            .subject_alt_names()
            .map(|names| {
                names
                    .iter()
                    .filter_map(|n| n.dnsname().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }
}

pub(crate) fn ski_of(cert: &X509Ref) -> Result<KeyId> {
    cert.subject_key_id()
        .map(|id| KeyId::from_bytes(id.as_slice()))
        .ok_or_else(|| PkiError::ExtensionMissing("subjectKeyIdentifier".into()))
}

pub(crate) fn akid_of(cert: &X509Ref) -> Result<KeyId> {
    cert.authority_key_id()
        .map(|id| KeyId::from_bytes(id.as_slice()))
        .ok_or_else(|| PkiError::ExtensionMissing("authorityKeyIdentifier".into()))
}
