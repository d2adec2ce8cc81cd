//! Cross-signing of hosted intermediates
//!
//! A hosting domain B takes in domain A by signing A's intermediate under
//! B's own authority. The new certificate keeps A's subject and key, so A's
//! nodes keep their identity, but is capped at path length 0 and short
//! validity: the hosted intermediate can still sign leaves, never another CA,
//! and the hosting relationship has to be re-confirmed periodically.
//!
//! ```text
//! B authority ──signs──▶ A intermediate (O=idmg A, issuer O=idmg B, pathlen=0)
//! ```

use crate::configs::PkiConfig;
use crate::envelope::KeyCertEnvelope;
use crate::error::{PkiError, Result};
use crate::generate_certificate::{CertificateBuilder, CertificateProfile, HOSTING_CA_PATH_LENGTH};
use crate::generate_csr::{CertificateRequest, CsrSubject, RequestBuilder};
use openssl::x509::X509;
use tracing::info;

/// Re-issue `existing`'s certificate under `foreign_authority`.
///
/// Without a CSR, one is derived in-process from the existing certificate's
/// subject and signed with the envelope's private key. The issued
/// certificate is trusted as is; only key ownership and CA status are
/// checked before re-requesting.
pub fn cross_sign(
    existing: &KeyCertEnvelope,
    foreign_authority: &KeyCertEnvelope,
    csr: Option<&CertificateRequest>,
    config: &PkiConfig,
) -> Result<X509> {
    let existing_cert = existing.require_certificate()?;

    let self_request;
    let csr = match csr {
        Some(csr) => {
            let existing_key = existing_cert.public_key()?;
            if !csr.public_key()?.public_eq(&existing_key) {
                return Err(PkiError::Mismatch);
            }
            csr
        }
        None => {
            self_request = self_request_for(existing)?;
            &self_request
        }
    };

    let cert = CertificateBuilder::new(foreign_authority)?
        .csr(csr)
        .profile(CertificateProfile::Authority {
            path_length: HOSTING_CA_PATH_LENGTH,
        })
        .validity_days(config.validity.hosting)
        .backdate_days(config.validity.backdate)
        .build()?;

    info!(
        hosted = csr.subject().organization.as_deref().unwrap_or_default(),
        hosting = foreign_authority
            .subject_organization()?
            .as_deref()
            .unwrap_or_default(),
        "Cross-signed hosted intermediate"
    );
    Ok(cert)
}

fn self_request_for(existing: &KeyCertEnvelope) -> Result<CertificateRequest> {
    if !existing.key_matches_certificate()? {
        return Err(PkiError::Mismatch);
    }
    if !existing.is_ca()? {
        return Err(PkiError::Format(
            "Only a certificate authority can be cross-signed".into(),
        ));
    }

    let cert = existing.require_certificate()?;
    let subject = CsrSubject::from_name(cert.subject_name())?;
    let req = RequestBuilder::from_subject(subject).build_for_key(existing.require_private_key()?)?;
    CertificateRequest::from_req(req)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate_root_ca::{BootstrappedDomain, RootBootstrapper};
    use crate::policy::IssuancePolicy;

    fn config() -> PkiConfig {
        let mut config = PkiConfig::default();
        config.keys.root_bits = 2048;
        config
    }

    fn domain() -> BootstrappedDomain {
        RootBootstrapper::new(config()).bootstrap_new_domain().unwrap()
    }

    #[test]
    fn test_cross_sign_keeps_subject() {
        let hosted = domain();
        let hosting = domain();

        let cert = cross_sign(&hosted.intermediate, &hosting.intermediate, None, &config()).unwrap();
        let cross = KeyCertEnvelope::from_parts(None, Some(cert));

        assert_eq!(
            cross.subject_organization().unwrap().as_deref(),
            Some(hosted.idmg.as_str())
        );
        assert_eq!(
            cross.issuer_organization().unwrap().as_deref(),
            Some(hosting.idmg.as_str())
        );
        assert_eq!(cross.basic_constraints().unwrap(), Some((true, Some(0))));
        assert_eq!(cross.validity_days().unwrap(), 91);
        assert_eq!(cross.akid().unwrap(), hosting.intermediate.ski().unwrap());
        assert_eq!(cross.ski().unwrap(), hosted.intermediate.ski().unwrap());
        assert_eq!(
            cross.certificate().unwrap().subject_name().to_der().unwrap(),
            hosted
                .intermediate
                .certificate()
                .unwrap()
                .subject_name()
                .to_der()
                .unwrap()
        );
    }

    #[test]
    fn test_cross_sign_with_supplied_csr() {
        let hosted = domain();
        let hosting = domain();
        let req = RequestBuilder::new(&hosted.idmg, &hosted.idmg)
            .role("millegrille")
            .build_for_key(hosted.intermediate.private_key().unwrap())
            .unwrap();
        let csr = CertificateRequest::from_req(req).unwrap();

        let cert = cross_sign(&hosted.intermediate, &hosting.intermediate, Some(&csr), &config())
            .unwrap();
        let cross = KeyCertEnvelope::from_parts(None, Some(cert));
        assert_eq!(cross.path_length().unwrap(), Some(0));
    }

    #[test]
    fn test_csr_for_other_key_rejected() {
        let hosted = domain();
        let hosting = domain();
        let (req, _) = RequestBuilder::new(&hosted.idmg, &hosted.idmg).build().unwrap();
        let csr = CertificateRequest::from_req(req).unwrap();

        let result = cross_sign(&hosted.intermediate, &hosting.intermediate, Some(&csr), &config());
        assert!(matches!(result, Err(PkiError::Mismatch)));
    }

    #[test]
    fn test_self_request_requires_matching_key() {
        let hosted = domain();
        let hosting = domain();
        let mismatched = KeyCertEnvelope::from_parts(
            hosting.intermediate.private_key().cloned(),
            hosted.intermediate.certificate().cloned(),
        );
        let result = cross_sign(&mismatched, &hosting.intermediate, None, &config());
        assert!(matches!(result, Err(PkiError::Mismatch)));
    }

    #[test]
    fn test_leaf_cannot_be_cross_signed() {
        let hosted = domain();
        let hosting = domain();
        let (req, key) = RequestBuilder::new(&hosted.idmg, "node1").build().unwrap();
        let csr = CertificateRequest::from_req(req).unwrap();
        let cert = CertificateBuilder::new(&hosted.intermediate)
            .unwrap()
            .csr(&csr)
            .profile(CertificateProfile::Leaf(IssuancePolicy::backup()))
            .build()
            .unwrap();
        let leaf = KeyCertEnvelope::from_parts(Some(key), Some(cert));

        let result = cross_sign(&leaf, &hosting.intermediate, None, &config());
        assert!(matches!(result, Err(PkiError::Format(_))));
    }
}
