//! Certificate Generation Module
//!
//! One builder signs every certificate of the hierarchy. What differs between
//! a root, an intermediate, a cross-signed hosting intermediate and the many
//! leaf roles is captured by [`CertificateProfile`]:
//!
//! ```text
//! Root          self-signed  CA  pathlen=5  SHA-512
//! Intermediate  by root      CA  pathlen=4  SHA-256
//! Hosting       by foreign   CA  pathlen=0  SHA-256
//! Leaf          by interm.   -   pathlen=0  SHA-256  + policy extensions, SAN
//! ```
//!
//! Extensions are always appended in the same order: BasicConstraints,
//! KeyUsage, SubjectKeyIdentifier, AuthorityKeyIdentifier, the policy
//! extensions, then SubjectAlternativeName. Extensions requested inside a
//! CSR are never copied, with the single exception of its DNS names which
//! feed the SAN of service roles.
//!
//! # Example
//! ```rust,no_run
//! # use millegrille_pki::generate_certificate::{CertificateBuilder, CertificateProfile};
//! # use millegrille_pki::generate_csr::CertificateRequest;
//! # use millegrille_pki::policy::PolicyTable;
//! # fn example(issuer: &millegrille_pki::KeyCertEnvelope, csr_pem: &[u8]) -> millegrille_pki::Result<()> {
//! let csr = CertificateRequest::from_pem(csr_pem)?;
//! let policy = PolicyTable::standard().get("transaction")?.clone();
//! let cert = CertificateBuilder::new(issuer)?
//!     .csr(&csr)
//!     .profile(CertificateProfile::Leaf(policy))
//!     .validity_days(366)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use crate::envelope::{KeyCertEnvelope, ski_of};
use crate::error::{PkiError, Result};
use crate::extensions::{build_policy_extension, PolicyExtension};
use crate::generate_csr::{CertificateRequest, CsrSubject};
use crate::policy::{IssuancePolicy, SanTemplate};
use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, PKeyRef, Private, Public};
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, KeyUsage, SubjectAlternativeName,
    SubjectKeyIdentifier,
};
use openssl::x509::{X509Builder, X509Name, X509Ref, X509};
use std::time::{SystemTime, UNIX_EPOCH};

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
const SERIAL_BITS: i32 = 128;
const SECONDS_PER_DAY: i64 = 86_400;

pub const ROOT_CA_PATH_LENGTH: u32 = 5;
pub const INTERMEDIATE_CA_PATH_LENGTH: u32 = 4;
/// A cross-signed hosting intermediate may not delegate further
pub const HOSTING_CA_PATH_LENGTH: u32 = 0;

/// What kind of certificate is being issued
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CertificateProfile {
    /// CA=true with the given path length constraint
    Authority { path_length: u32 },
    /// CA=false, carrying the policy's extensions
    Leaf(IssuancePolicy),
}

/// Where the subject's name and public key come from
enum SubjectSource<'a> {
    Csr(&'a CertificateRequest),
    PublicKey(PKey<Public>, CsrSubject),
    SelfSigned(CsrSubject),
}

// ================= Certificate Builder =================

pub struct CertificateBuilder<'a> {
    signing_key: &'a PKeyRef<Private>,
    signing_cert: Option<&'a X509Ref>,
    csr: Option<&'a CertificateRequest>,
    public_key: Option<(PKey<Public>, CsrSubject)>,
    self_subject: Option<CsrSubject>,
    common_name: Option<String>,
    profile: Option<CertificateProfile>,
    idmg: Option<String>,
    validity_days: u32,
    backdate_days: u32,
    digest: MessageDigest,
    serial: Option<BigNum>,
}

impl<'a> CertificateBuilder<'a> {
    /// Builder signing with `issuer`'s private key under `issuer`'s certificate
    pub fn new(issuer: &'a KeyCertEnvelope) -> Result<Self> {
        let signing_key = issuer.require_private_key()?;
        let signing_cert = issuer.require_certificate()?;
        Ok(Self::with_issuer(signing_key, Some(signing_cert)))
    }

    /// Builder for a self-signed certificate over `key`
    pub fn self_signed(key: &'a PKeyRef<Private>, subject: CsrSubject) -> Self {
        let mut builder = Self::with_issuer(key, None);
        builder.self_subject = Some(subject);
        builder
    }

    fn with_issuer(signing_key: &'a PKeyRef<Private>, signing_cert: Option<&'a X509Ref>) -> Self {
        Self {
            signing_key,
            signing_cert,
            csr: None,
            public_key: None,
            self_subject: None,
            common_name: None,
            profile: None,
            idmg: None,
            validity_days: 366,
            backdate_days: 1,
            digest: MessageDigest::sha256(),
            serial: None,
        }
    }

    /// Issue for the key and subject of a verified CSR
    pub fn csr(mut self, csr: &'a CertificateRequest) -> Self {
        self.csr = Some(csr);
        self
    }

    /// Issue for a bare public key with a caller-built subject
    pub fn public_key(mut self, key: PKey<Public>, subject: CsrSubject) -> Self {
        self.public_key = Some((key, subject));
        self
    }

    /// Replace the common name taken from the CSR
    pub fn common_name(mut self, cn: &str) -> Self {
        self.common_name = Some(cn.to_string());
        self
    }

    pub fn profile(mut self, profile: CertificateProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Domain identifier used by SAN templates. Defaults to the subject's
    /// organization.
    pub fn idmg(mut self, idmg: &str) -> Self {
        self.idmg = Some(idmg.to_string());
        self
    }

    pub fn validity_days(mut self, days: u32) -> Self {
        self.validity_days = days;
        self
    }

    /// Days `not_before` is moved into the past
    pub fn backdate_days(mut self, days: u32) -> Self {
        self.backdate_days = days;
        self
    }

    pub fn digest(mut self, digest: MessageDigest) -> Self {
        self.digest = digest;
        self
    }

    /// Fixed serial number, for reproducible output in tests
    pub fn serial_number(mut self, serial: BigNum) -> Self {
        self.serial = Some(serial);
        self
    }

    fn subject_source(&mut self) -> Result<SubjectSource<'a>> {
        match (self.csr, self.public_key.take(), self.self_subject.take()) {
            (Some(_), Some(_), _) => Err(PkiError::KeySourceConflict),
            (Some(csr), None, _) => Ok(SubjectSource::Csr(csr)),
            (None, Some((key, subject)), _) => Ok(SubjectSource::PublicKey(key, subject)),
            (None, None, Some(subject)) => Ok(SubjectSource::SelfSigned(subject)),
            (None, None, None) => Err(PkiError::MissingSubjectKey),
        }
    }

    /// Sign the certificate
    pub fn build(mut self) -> Result<X509> {
        let source = self.subject_source()?;
        let profile = self
            .profile
            .take()
            .ok_or(PkiError::MissingProfile)?;

        // Subject prepared
        let (subject_name, subject_key, requested_dns): (X509Name, PKey<Public>, Vec<String>) =
            match &source {
                SubjectSource::Csr(csr) => {
                    let name = match &self.common_name {
                        Some(cn) => {
                            let mut subject = csr.subject().clone();
                            subject.common_name = cn.clone();
                            subject.to_name()?
                        }
                        None => csr.req().subject_name().to_owned()?,
                    };
                    (name, csr.public_key()?, csr.dns_names().to_vec())
                }
                SubjectSource::PublicKey(key, subject) => {
                    (self.named(subject)?, key.clone(), Vec::new())
                }
                SubjectSource::SelfSigned(subject) => {
                    let der = self.signing_key.public_key_to_der()?;
                    (self.named(subject)?, PKey::public_key_from_der(&der)?, Vec::new())
                }
            };
        let subject_cn = crate::envelope::name_entry(&subject_name, openssl::nid::Nid::COMMONNAME)
            .ok_or_else(|| PkiError::Format("Subject has no common name".into()))?;
        let subject_org =
            crate::envelope::name_entry(&subject_name, openssl::nid::Nid::ORGANIZATIONNAME);

        let mut builder = X509::builder()?;
        builder.set_version(X509_VERSION_3)?;

        let serial = match self.serial.take() {
            Some(serial) => serial,
            None => {
                let mut serial = BigNum::new()?;
                serial.rand(SERIAL_BITS, MsbOption::MAYBE_ZERO, false)?;
                serial
            }
        };
        let serial = serial.to_asn1_integer()?;
        builder.set_serial_number(&serial)?;

        builder.set_subject_name(&subject_name)?;
        match self.signing_cert {
            Some(issuer) => builder.set_issuer_name(issuer.subject_name())?,
            None => builder.set_issuer_name(&subject_name)?,
        }

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| PkiError::Format(format!("System clock before epoch: {}", e)))?
            .as_secs() as i64;
        let not_before =
            Asn1Time::from_unix((now - self.backdate_days as i64 * SECONDS_PER_DAY) as _)?;
        builder.set_not_before(&not_before)?;
        let not_after = Asn1Time::from_unix((now + self.validity_days as i64 * SECONDS_PER_DAY) as _)?;
        builder.set_not_after(&not_after)?;

        builder.set_pubkey(&subject_key)?;

        // Extensions applied
        append_constraints(&mut builder, &profile)?;
        self.append_key_identifiers(&mut builder)?;

        if let CertificateProfile::Leaf(policy) = &profile {
            append_policy(&mut builder, policy)?;
            if let Some(template) = &policy.san {
                let idmg = self.idmg.clone().or(subject_org).ok_or_else(|| {
                    PkiError::Format("Subject has no organization (idmg) for SAN".into())
                })?;
                let names = san_dns_names(template, &subject_cn, &idmg, &requested_dns);
                self.append_san(&mut builder, &names, template.localhost)?;
            }
        }

        // Signed
        builder.sign(self.signing_key, self.digest)?;
        Ok(builder.build())
    }

    fn named(&self, subject: &CsrSubject) -> Result<X509Name> {
        match &self.common_name {
            Some(cn) => {
                let mut subject = subject.clone();
                subject.common_name = cn.clone();
                subject.to_name()
            }
            None => subject.to_name(),
        }
    }

    fn append_key_identifiers(&self, builder: &mut X509Builder) -> Result<()> {
        let ski = SubjectKeyIdentifier::new().build(&builder.x509v3_context(self.signing_cert, None))?;
        builder.append_extension(ski)?;

        // keyid:always copies the issuer's SKI; a self-signed certificate
        // uses its own, which marks it as a root for chain alignment.
        if let Some(issuer) = self.signing_cert {
            ski_of(issuer)?;
        }
        let akid = AuthorityKeyIdentifier::new()
            .keyid(true)
            .build(&builder.x509v3_context(self.signing_cert, None))?;
        builder.append_extension(akid)?;
        Ok(())
    }

    fn append_san(&self, builder: &mut X509Builder, names: &[String], localhost: bool) -> Result<()> {
        let mut san = SubjectAlternativeName::new();
        for name in names {
            san.dns(name);
        }
        if localhost {
            san.ip("127.0.0.1");
            san.ip("::1");
        }
        let extension = san.build(&builder.x509v3_context(self.signing_cert, None))?;
        builder.append_extension(extension)?;
        Ok(())
    }
}

fn append_constraints(builder: &mut X509Builder, profile: &CertificateProfile) -> Result<()> {
    match profile {
        CertificateProfile::Authority { path_length } => {
            let bc = BasicConstraints::new().critical().ca().pathlen(*path_length).build()?;
            builder.append_extension(bc)?;

            let ku = KeyUsage::new()
                .critical()
                .digital_signature()
                .key_encipherment()
                .data_encipherment()
                .key_agreement()
                .key_cert_sign()
                .build()?;
            builder.append_extension(ku)?;
        }
        CertificateProfile::Leaf(_) => {
            // No .ca() call - this is an end-entity certificate
            let bc = BasicConstraints::new().critical().build()?;
            builder.append_extension(bc)?;

            let ku = KeyUsage::new()
                .critical()
                .digital_signature()
                .key_encipherment()
                .data_encipherment()
                .build()?;
            builder.append_extension(ku)?;
        }
    }
    Ok(())
}

fn append_policy(builder: &mut X509Builder, policy: &IssuancePolicy) -> Result<()> {
    for (kind, tags) in [
        (PolicyExtension::Exchanges, &policy.exchanges),
        (PolicyExtension::Roles, &policy.roles),
        (PolicyExtension::Domains, &policy.domains),
    ] {
        if !tags.is_empty() {
            builder.append_extension(build_policy_extension(kind, tags)?)?;
        }
    }
    Ok(())
}

/// Ordered, duplicate-free DNS names for a service certificate
pub(crate) fn san_dns_names(
    template: &SanTemplate,
    common_name: &str,
    idmg: &str,
    requested: &[String],
) -> Vec<String> {
    let mut names = vec![common_name.to_string(), format!("{}.{}", common_name, idmg)];
    names.extend(template.aliases.iter().cloned());
    names.extend(requested.iter().cloned());
    if template.localhost {
        names.push("localhost".to_string());
    }

    let mut unique: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        if !name.is_empty() && !unique.contains(&name) {
            unique.push(name);
        }
    }
    unique
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extensions::{read_tags, EXCHANGE_MIDDLEWARE};
    use crate::generate_csr::RequestBuilder;
    use crate::policy::{PolicyTable, ROLE_MQ, ROLE_TRANSACTION};
    use openssl::stack::Stack;
    use openssl::x509::X509ReqBuilder;

    fn authority() -> KeyCertEnvelope {
        let key = crate::envelope::generate_rsa_key(2048).unwrap();
        let cert = CertificateBuilder::self_signed(&key, CsrSubject::new("idmgA", "authority"))
            .profile(CertificateProfile::Authority { path_length: 4 })
            .validity_days(30)
            .build()
            .unwrap();
        KeyCertEnvelope::from_parts(Some(key), Some(cert))
    }

    fn leaf_policy(role: &str) -> CertificateProfile {
        CertificateProfile::Leaf(PolicyTable::standard().get(role).unwrap().clone())
    }

    #[test]
    fn test_leaf_from_csr() {
        let issuer = authority();
        let (req, key) = RequestBuilder::new("idmgA", "node1")
            .role("transaction")
            .build()
            .unwrap();
        let csr = CertificateRequest::from_req(req).unwrap();

        let cert = CertificateBuilder::new(&issuer)
            .unwrap()
            .csr(&csr)
            .profile(leaf_policy(ROLE_TRANSACTION))
            .build()
            .unwrap();
        let leaf = KeyCertEnvelope::from_parts(Some(key), Some(cert));

        assert!(leaf.key_matches_certificate().unwrap());
        assert!(!leaf.is_ca().unwrap());
        assert_eq!(leaf.akid().unwrap(), issuer.ski().unwrap());
        assert_eq!(leaf.subject_unit().unwrap().as_deref(), Some("transaction"));
        assert_eq!(leaf.extension(PolicyExtension::Roles).unwrap(), vec!["transaction"]);
        assert_eq!(
            leaf.extension(PolicyExtension::Exchanges).unwrap(),
            vec![EXCHANGE_MIDDLEWARE]
        );
        assert!(leaf.dns_names().unwrap().is_empty());
        assert_eq!(leaf.validity_days().unwrap(), 367);
    }

    #[test]
    fn test_self_signed_authority() {
        let root = authority();
        assert_eq!(root.akid().unwrap(), root.ski().unwrap());
        assert_eq!(root.basic_constraints().unwrap(), Some((true, Some(4))));
        assert_eq!(
            root.certificate().unwrap().issuer_name().to_der().unwrap(),
            root.certificate().unwrap().subject_name().to_der().unwrap()
        );
    }

    #[test]
    fn test_csr_and_public_key_conflict() {
        let issuer = authority();
        let (req, key) = RequestBuilder::new("idmgA", "node1").build().unwrap();
        let csr = CertificateRequest::from_req(req).unwrap();
        let public = PKey::public_key_from_pem(&key.public_key_to_pem().unwrap()).unwrap();

        let result = CertificateBuilder::new(&issuer)
            .unwrap()
            .csr(&csr)
            .public_key(public, CsrSubject::new("idmgA", "node1"))
            .build();
        assert!(matches!(result, Err(PkiError::KeySourceConflict)));
    }

    #[test]
    fn test_missing_subject_key() {
        let issuer = authority();
        let result = CertificateBuilder::new(&issuer).unwrap().build();
        assert!(matches!(result, Err(PkiError::MissingSubjectKey)));
    }

    #[test]
    fn test_common_name_override_keeps_rest_of_subject() {
        let issuer = authority();
        let (req, _) = RequestBuilder::new("idmgA", "node1").role("mq").build().unwrap();
        let csr = CertificateRequest::from_req(req).unwrap();
        let cert = CertificateBuilder::new(&issuer)
            .unwrap()
            .csr(&csr)
            .common_name("renamed")
            .profile(leaf_policy(ROLE_MQ))
            .build()
            .unwrap();
        let leaf = KeyCertEnvelope::from_parts(None, Some(cert));
        assert_eq!(leaf.subject_common_name().unwrap().as_deref(), Some("renamed"));
        assert_eq!(leaf.subject_organization().unwrap().as_deref(), Some("idmgA"));
        assert_eq!(leaf.subject_unit().unwrap().as_deref(), Some("mq"));
    }

    #[test]
    fn test_missing_profile() {
        let issuer = authority();
        let (req, _) = RequestBuilder::new("idmgA", "node1").build().unwrap();
        let csr = CertificateRequest::from_req(req).unwrap();
        let result = CertificateBuilder::new(&issuer).unwrap().csr(&csr).build();
        assert!(matches!(result, Err(PkiError::MissingProfile)));
    }

    #[test]
    fn test_key_usage_bits() {
        let issuer = authority();
        let der = issuer.certificate().unwrap().to_der().unwrap();
        let parsed = crate::extensions::parse_certificate_der(&der).unwrap();
        let ku = parsed.key_usage().unwrap().unwrap().value;
        assert!(ku.digital_signature() && ku.key_encipherment() && ku.data_encipherment());
        assert!(ku.key_agreement() && ku.key_cert_sign());
        assert!(!ku.crl_sign());
        assert!(!ku.non_repudiation());

        let (req, _) = RequestBuilder::new("idmgA", "node1").role("mq").build().unwrap();
        let csr = CertificateRequest::from_req(req).unwrap();
        let cert = CertificateBuilder::new(&issuer)
            .unwrap()
            .csr(&csr)
            .profile(leaf_policy(ROLE_MQ))
            .build()
            .unwrap();
        let der = cert.to_der().unwrap();
        let parsed = crate::extensions::parse_certificate_der(&der).unwrap();
        let ku = parsed.key_usage().unwrap().unwrap().value;
        assert!(ku.digital_signature() && ku.key_encipherment() && ku.data_encipherment());
        assert!(!ku.non_repudiation());
        assert!(!ku.key_cert_sign());
    }

    #[test]
    fn test_san_for_service_role() {
        let issuer = authority();
        let (req, _) = RequestBuilder::new("idmgA", "mq1")
            .role(ROLE_MQ)
            .dns_name("mq.example.com")
            .build()
            .unwrap();
        let csr = CertificateRequest::from_req(req).unwrap();
        let cert = CertificateBuilder::new(&issuer)
            .unwrap()
            .csr(&csr)
            .profile(leaf_policy(ROLE_MQ))
            .build()
            .unwrap();
        let leaf = KeyCertEnvelope::from_parts(None, Some(cert));
        assert_eq!(
            leaf.dns_names().unwrap(),
            vec!["mq1", "mq1.idmgA", "mq", "mq.example.com", "localhost"]
        );
    }

    #[test]
    fn test_requested_policy_extensions_are_ignored() {
        let issuer = authority();
        let key = crate::envelope::generate_rsa_key(2048).unwrap();
        let mut req_builder = X509ReqBuilder::new().unwrap();
        req_builder
            .set_subject_name(
                &CsrSubject {
                    common_name: "node1".into(),
                    organization: Some("idmgA".into()),
                    role: Some("transaction".into()),
                }
                .to_name()
                .unwrap(),
            )
            .unwrap();
        req_builder.set_pubkey(&key).unwrap();
        let mut forged = Stack::new().unwrap();
        forged
            .push(build_policy_extension(PolicyExtension::Roles, &["maitredescles", "mq"]).unwrap())
            .unwrap();
        req_builder.add_extensions(&forged).unwrap();
        req_builder.sign(&key, MessageDigest::sha256()).unwrap();
        let csr = CertificateRequest::from_req(req_builder.build()).unwrap();

        let cert = CertificateBuilder::new(&issuer)
            .unwrap()
            .csr(&csr)
            .profile(leaf_policy(ROLE_TRANSACTION))
            .build()
            .unwrap();
        let roles = read_tags(&cert.to_der().unwrap(), PolicyExtension::Roles).unwrap();
        assert_eq!(roles, vec!["transaction"]);
    }

    #[test]
    fn test_same_inputs_give_identical_extensions() {
        let issuer = authority();
        let (req, _) = RequestBuilder::new("idmgA", "mq1").role(ROLE_MQ).build().unwrap();
        let csr = CertificateRequest::from_req(req).unwrap();

        let issue = || {
            CertificateBuilder::new(&issuer)
                .unwrap()
                .csr(&csr)
                .profile(leaf_policy(ROLE_MQ))
                .serial_number(BigNum::from_u32(42).unwrap())
                .build()
                .unwrap()
                .to_der()
                .unwrap()
        };
        let (first, second) = (issue(), issue());

        let extensions = |der: &[u8]| -> Vec<(String, Vec<u8>)> {
            let cert = crate::extensions::parse_certificate_der(der).unwrap();
            cert.extensions()
                .iter()
                .map(|e| (e.oid.to_id_string(), e.value.to_vec()))
                .collect()
        };
        assert_eq!(extensions(&first), extensions(&second));
        assert_eq!(
            crate::extensions::parse_certificate_der(&first).unwrap().raw_serial(),
            crate::extensions::parse_certificate_der(&second).unwrap().raw_serial()
        );
    }

    #[test]
    fn test_random_serials_differ() {
        let a = authority();
        let b = authority();
        assert_ne!(
            a.certificate().unwrap().serial_number().to_bn().unwrap(),
            b.certificate().unwrap().serial_number().to_bn().unwrap()
        );
    }

    #[test]
    fn test_san_names_are_unique() {
        let template = SanTemplate {
            aliases: vec!["mq".into(), "node".into()],
            localhost: false,
        };
        let names = san_dns_names(&template, "node", "idmg", &["mq".into(), "extra".into()]);
        assert_eq!(names, vec!["node", "node.idmg", "mq", "extra"]);
    }
}
