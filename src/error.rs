//! Error taxonomy for certificate issuance, chaining and decryption.
//!
//! Every failure aborts the single operation that raised it. Nothing is
//! retried inside the crate and no partial certificate or key is returned.

use openssl::error::ErrorStack;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PkiError {
    /// Malformed PEM, DER or CSR input
    #[error("Format error: {0}")]
    Format(String),

    /// Private key and certificate public parts differ
    #[error("Private key does not match certificate public key")]
    Mismatch,

    /// A required X.509 extension is absent
    #[error("Extension missing: {0}")]
    ExtensionMissing(String),

    /// No policy strategy for the requested role and no domain list given
    #[error("Unknown role: {0}")]
    UnknownRole(String),

    /// Chain alignment could not find the issuer for an AKID
    #[error("Issuer not found for authority key identifier {0}")]
    IssuerNotFound(String),

    /// Chain alignment exceeded its hop bound
    #[error("Certificate chain exceeds {0} hops")]
    ChainTooDeep(usize),

    /// Wrong key, wrong password or corrupted ciphertext
    #[error("Decrypt error: {0}")]
    Decrypt(String),

    /// The CSR's self-signature does not verify against its public key
    #[error("Invalid CSR signature")]
    InvalidCsrSignature,

    /// Both a CSR and a bare public key were supplied to one issuance
    #[error("Subject key conflict: supply either a CSR or a public key, not both")]
    KeySourceConflict,

    /// Neither a CSR nor a public key was supplied
    #[error("No subject key supplied")]
    MissingSubjectKey,

    #[error("Private key missing: {0}")]
    MissingPrivateKey(String),

    /// Encrypted export requested from an envelope holding no password
    #[error("No password held for encrypted export")]
    MissingPassword,

    #[error("Certificate missing: {0}")]
    MissingCertificate(String),

    /// Activation requested while no rotated intermediate is staged
    #[error("No staged intermediate to activate")]
    NoStagedAuthority,

    /// A rotated intermediate is already staged and not yet activated
    #[error("Rotated intermediate {0} is staged and not yet activated")]
    RotationPending(String),

    /// `CertificateBuilder::build` called before a profile was chosen
    #[error("No certificate profile selected")]
    MissingProfile,

    /// Unexpected OpenSSL failure during key generation, building or signing
    #[error("Crypto error: {0}")]
    Crypto(#[from] ErrorStack),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, PkiError>;
