//! MilleGrille PKI - Multi-tier Certificate Authority Library
//!
//! Issues, renews, cross-signs and chains the X.509 certificates of a
//! MilleGrille, a federated set of cooperating nodes. Certificates both
//! authenticate a node and carry its authorization: message-bus exchanges,
//! functional roles and domains are embedded as custom extensions, so a
//! broker or database can decide access from the presented certificate
//! alone.
//!
//! # Overview
//!
//! ```text
//! Root CA (self-signed, pathlen=5, SHA-512)            idmg = base58(SHA-512/224(root DER))
//!   └── Intermediate CA (O=idmg, pathlen=4)            rotatable
//!       ├── Role certificates (O=idmg, CA=false)       exchanges / roles / domains extensions
//!       └── Hosted intermediate of another domain      cross-signed, pathlen=0
//! ```
//!
//! # Features
//!
//! - 🔐 **Policy extensions**: exchanges `1.2.3.4.0`, roles `1.2.3.4.1`,
//!   domains `1.2.3.4.2`, written only by the issuing authority
//! - 🔗 **Chain alignment**: AKID → SKI walk up to, but excluding, the root
//! - 🔄 **Staged rotation**: a new intermediate is issued and staged, then
//!   activated without restarting
//! - 🏠 **Hosting**: a new domain is bootstrapped and cross-signed in one call,
//!   returned as a trousseau (keyring) bundle
//!
//! # Quick Start
//!
//! ```no_run
//! use millegrille_pki::configs::PkiConfig;
//! use millegrille_pki::generate_root_ca::RootBootstrapper;
//! use millegrille_pki::orchestrator::CertificateOrchestrator;
//!
//! fn main() -> millegrille_pki::Result<()> {
//!     let config = PkiConfig::default();
//!
//!     // New domain: root and first intermediate
//!     let domain = RootBootstrapper::new(config.clone()).bootstrap_new_domain()?;
//!     println!("MilleGrille {}", domain.idmg);
//!
//!     let orchestrator = CertificateOrchestrator::from_bootstrap(domain, config)?;
//!
//!     // Key, CSR and certificate for a message broker node
//!     let mq = orchestrator.renew_by_role("mq", "mq1")?;
//!     println!("{}", mq.chain_pem()?);
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! ## [`envelope`]
//!
//! [`KeyCertEnvelope`] owns a key, a certificate, the key's export password,
//! a CSR and a chain. It is the unit handed to persistence.
//!
//! ## [`generate_csr`] and [`generate_certificate`]
//!
//! [`generate_csr::RequestBuilder`] produces CSRs; one
//! [`generate_certificate::CertificateBuilder`] signs every certificate, shaped
//! by a [`generate_certificate::CertificateProfile`] and, for leaves, an
//! [`policy::IssuancePolicy`] from the [`policy::PolicyTable`].
//!
//! ```no_run
//! use millegrille_pki::generate_certificate::{CertificateBuilder, CertificateProfile};
//! use millegrille_pki::generate_csr::CertificateRequest;
//! use millegrille_pki::policy::PolicyTable;
//! # fn example(intermediate: &millegrille_pki::KeyCertEnvelope, pem: &[u8]) -> millegrille_pki::Result<()> {
//!
//! let csr = CertificateRequest::from_pem(pem)?;
//! let policy = PolicyTable::standard().get("mongo")?.clone();
//! let cert = CertificateBuilder::new(intermediate)?
//!     .csr(&csr)
//!     .profile(CertificateProfile::Leaf(policy))
//!     .build()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## [`chain_alignment`]
//!
//! Issuer lookup keyed by SKI and the bounded AKID walk.
//!
//! ## [`generate_root_ca`] and [`cross_sign`]
//!
//! Domain bootstrap and the hosting cross-signature.
//!
//! ## [`orchestrator`]
//!
//! [`orchestrator::CertificateOrchestrator`] dispatches by role name and owns
//! the authorities, the policy table and the issuer lookup.
//!
//! ## [`decryption`]
//!
//! Unwraps secrets encrypted for a certificate (RSA-OAEP key, AES-256-CBC
//! payload).
//!
//! # Error Handling
//!
//! Every operation returns [`Result`] with a [`PkiError`]. Nothing is retried
//! and a failed operation leaves no partial certificate or key behind.
//! Configuration loading returns `anyhow::Result`:
//!
//! ```no_run
//! use millegrille_pki::configs::PkiConfig;
//! use anyhow::{Context, Result};
//!
//! fn example() -> Result<()> {
//!     let config = PkiConfig::from_file("/etc/millegrille/pki.toml")
//!         .context("PKI configuration unavailable")?;
//!     println!("Root validity: {} days", config.validity.root);
//!     Ok(())
//! }
//! ```
//!
//! # Logging
//!
//! Issuance, rotation, bootstrap and cross-signing are reported through
//! `tracing`. No subscriber is installed by this crate; private keys and
//! passwords are never logged.

pub mod chain_alignment;
pub mod configs;
pub mod cross_sign;
pub mod decryption;
pub mod envelope;
pub mod error;
pub mod extensions;
pub mod generate_certificate;
pub mod generate_csr;
pub mod generate_root_ca;
pub mod orchestrator;
pub mod policy;
pub mod trousseau;

pub use envelope::KeyCertEnvelope;
pub use error::{PkiError, Result};
