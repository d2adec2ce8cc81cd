//! Root CA Bootstrap Module
//!
//! Creates the trust anchor of a brand-new MilleGrille and its first
//! intermediate. The domain identifier (idmg) only exists once the root is
//! signed, so the root carries the generic MilleGrille subject while the
//! intermediate, and everything it later issues, carries the idmg as
//! organization.
//!
//! # PKI Hierarchy Position
//! ```text
//! Root CA (self-signed, pathlen=5, SHA-512)      ← this module
//!   └── Intermediate CA (O=idmg, pathlen=4)      ← this module
//!       └── Role certificates (O=idmg, CA=false)
//! ```
//!
//! # Example
//! ```rust,no_run
//! # use millegrille_pki::{configs::PkiConfig, generate_root_ca::RootBootstrapper};
//! # fn example() -> millegrille_pki::Result<()> {
//! let domain = RootBootstrapper::new(PkiConfig::default()).bootstrap_new_domain()?;
//! println!("New MilleGrille {}", domain.idmg);
//! # Ok(())
//! # }
//! ```

use crate::configs::PkiConfig;
use crate::envelope::{idmg_of, KeyCertEnvelope};
use crate::error::Result;
use crate::generate_certificate::{
    CertificateBuilder, CertificateProfile, INTERMEDIATE_CA_PATH_LENGTH, ROOT_CA_PATH_LENGTH,
};
use crate::generate_csr::{CertificateRequest, CsrSubject, RequestBuilder};
use openssl::hash::MessageDigest;
use tracing::info;

/// Root and first intermediate of a new domain
#[derive(Debug)]
pub struct BootstrappedDomain {
    pub idmg: String,
    pub root: KeyCertEnvelope,
    pub intermediate: KeyCertEnvelope,
}

pub struct RootBootstrapper {
    config: PkiConfig,
}

impl RootBootstrapper {
    pub fn new(config: PkiConfig) -> Self {
        Self { config }
    }

    /// Generate the self-signed root, derive the idmg from it, then issue the
    /// intermediate under it. Both keys get a random export password.
    pub fn bootstrap_new_domain(&self) -> Result<BootstrappedDomain> {
        let root = self.generate_root()?;
        let idmg = idmg_of(root.require_certificate()?)?;
        let intermediate = issue_intermediate(&self.config, &root, &idmg)?;

        info!(idmg = %idmg, "Bootstrapped new MilleGrille");
        Ok(BootstrappedDomain {
            idmg,
            root,
            intermediate,
        })
    }

    fn generate_root(&self) -> Result<KeyCertEnvelope> {
        let mut root = KeyCertEnvelope::new();
        root.generate_key(self.config.keys.root_bits, true)?;

        let subject = CsrSubject {
            common_name: self.config.subject.root_common_name.clone(),
            organization: Some(self.config.subject.root_organization.clone()),
            role: None,
        };
        let cert = CertificateBuilder::self_signed(root.require_private_key()?, subject)
            .profile(CertificateProfile::Authority {
                path_length: ROOT_CA_PATH_LENGTH,
            })
            .validity_days(self.config.validity.root)
            .backdate_days(self.config.validity.backdate)
            .digest(MessageDigest::sha512())
            .build()?;
        root.set_certificate(cert);
        Ok(root)
    }
}

/// Issue an intermediate (O=idmg, CN=idmg) under `root` with a fresh key.
/// Used at bootstrap and for intermediate rotation.
pub(crate) fn issue_intermediate(
    config: &PkiConfig,
    root: &KeyCertEnvelope,
    idmg: &str,
) -> Result<KeyCertEnvelope> {
    let mut intermediate = KeyCertEnvelope::new();
    intermediate.generate_key(config.keys.default_bits, true)?;

    let req = RequestBuilder::new(idmg, idmg)
        .role(&config.subject.intermediate_unit)
        .build_for_key(intermediate.require_private_key()?)?;
    let csr = CertificateRequest::from_req(req)?;

    let cert = CertificateBuilder::new(root)?
        .csr(&csr)
        .profile(CertificateProfile::Authority {
            path_length: INTERMEDIATE_CA_PATH_LENGTH,
        })
        .validity_days(config.validity.intermediate)
        .backdate_days(config.validity.backdate)
        .build()?;

    intermediate.set_certificate(cert);
    intermediate.set_csr(csr.into_req());
    Ok(intermediate)
}
