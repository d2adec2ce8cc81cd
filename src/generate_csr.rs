//! Certificate Signing Request construction and intake
//!
//! [`RequestBuilder`] produces a CSR together with a freshly generated key.
//! [`CertificateRequest`] is the parsed, signature-checked form of a CSR
//! received from elsewhere. The subject is exposed as a typed
//! [`CsrSubject`]: the organizational unit is the requested role, so callers
//! never re-split subject strings.
//!
//! # Example
//! ```rust,no_run
//! # use millegrille_pki::generate_csr::RequestBuilder;
//! # fn example() -> millegrille_pki::Result<()> {
//! let (csr, key) = RequestBuilder::new("zQm...idmg", "node1")
//!     .role("transaction")
//!     .dns_name("node1.local")
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use crate::envelope::{generate_rsa_key, name_entry, RSA_KEY_SIZE_DEFAULT};
use crate::error::{PkiError, Result};
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, PKeyRef, Private, Public};
use openssl::stack::Stack;
use openssl::x509::extension::SubjectAlternativeName;
use openssl::x509::{X509Name, X509NameRef, X509Req, X509ReqBuilder};
use x509_parser::prelude::*;

/// Subject fields of a request, with the role as its own field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrSubject {
    pub common_name: String,
    /// The domain idmg
    pub organization: Option<String>,
    /// Carried in the organizational unit
    pub role: Option<String>,
}

impl CsrSubject {
    pub fn new(organization: &str, common_name: &str) -> Self {
        Self {
            common_name: common_name.to_string(),
            organization: Some(organization.to_string()),
            role: None,
        }
    }

    pub(crate) fn from_name(name: &X509NameRef) -> Result<Self> {
        let common_name = name_entry(name, Nid::COMMONNAME)
            .ok_or_else(|| PkiError::Format("Subject has no common name".into()))?;
        Ok(Self {
            common_name,
            organization: name_entry(name, Nid::ORGANIZATIONNAME),
            role: name_entry(name, Nid::ORGANIZATIONALUNITNAME),
        })
    }

    pub(crate) fn to_name(&self) -> Result<X509Name> {
        let mut name_builder = X509Name::builder()?;
        if let Some(organization) = &self.organization {
            name_builder.append_entry_by_nid(Nid::ORGANIZATIONNAME, organization)?;
        }
        if let Some(role) = &self.role {
            name_builder.append_entry_by_nid(Nid::ORGANIZATIONALUNITNAME, role)?;
        }
        name_builder.append_entry_by_nid(Nid::COMMONNAME, &self.common_name)?;
        Ok(name_builder.build())
    }
}

// ================= CSR Builder =================

pub struct RequestBuilder {
    subject: CsrSubject,
    dns_names: Vec<String>,
    key_bits: u32,
}

impl RequestBuilder {
    /// Create a builder for a subject in domain `idmg`
    pub fn new(idmg: &str, common_name: &str) -> Self {
        Self::from_subject(CsrSubject::new(idmg, common_name))
    }

    pub fn from_subject(subject: CsrSubject) -> Self {
        Self {
            subject,
            dns_names: Vec::new(),
            key_bits: RSA_KEY_SIZE_DEFAULT,
        }
    }

    /// Set the requested role (organizational unit)
    pub fn role(mut self, role: &str) -> Self {
        self.subject.role = Some(role.to_string());
        self
    }

    pub fn dns_name(mut self, name: &str) -> Self {
        self.dns_names.push(name.to_string());
        self
    }

    pub fn dns_names<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.dns_names
            .extend(names.iter().map(|n| n.as_ref().to_string()));
        self
    }

    pub fn key_bits(mut self, bits: u32) -> Self {
        self.key_bits = bits;
        self
    }

    /// Generate a key pair and a CSR signed with it
    pub fn build(self) -> Result<(X509Req, PKey<Private>)> {
        let private_key = generate_rsa_key(self.key_bits)?;
        let req = self.build_for_key(&private_key)?;
        Ok((req, private_key))
    }

    /// Build a CSR for an existing key. No key is generated.
    pub fn build_for_key(&self, private_key: &PKeyRef<Private>) -> Result<X509Req> {
        let mut builder = X509ReqBuilder::new()?;
        builder.set_version(0)?;
        let subject = self.subject.to_name()?;
        builder.set_subject_name(&subject)?;
        builder.set_pubkey(private_key)?;

        if !self.dns_names.is_empty() {
            let mut san = SubjectAlternativeName::new();
            for name in &self.dns_names {
                san.dns(name);
            }
            let extension = san.build(&builder.x509v3_context(None))?;
            let mut extensions = Stack::new()?;
            extensions.push(extension)?;
            builder.add_extensions(&extensions)?;
        }

        builder.sign(private_key, MessageDigest::sha256())?;
        Ok(builder.build())
    }
}

// ================= Received requests =================

/// A parsed CSR whose self-signature has been verified
pub struct CertificateRequest {
    req: X509Req,
    subject: CsrSubject,
    dns_names: Vec<String>,
}

impl CertificateRequest {
    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        Self::from_req(crate::envelope::load_csr(pem)?)
    }

    pub fn from_req(req: X509Req) -> Result<Self> {
        let public_key = req
            .public_key()
            .map_err(|e| PkiError::Format(format!("CSR has no usable public key: {}", e)))?;
        if !req.verify(&public_key).unwrap_or(false) {
            return Err(PkiError::InvalidCsrSignature);
        }

        let subject = CsrSubject::from_name(req.subject_name())?;
        let dns_names = requested_dns_names(&req.to_der()?)?;

        Ok(Self {
            req,
            subject,
            dns_names,
        })
    }

    pub fn subject(&self) -> &CsrSubject {
        &self.subject
    }

    /// DNS names from the CSR's requested SubjectAlternativeName
    pub fn dns_names(&self) -> &[String] {
        &self.dns_names
    }

    pub fn public_key(&self) -> Result<PKey<Public>> {
        Ok(self.req.public_key()?)
    }

    pub fn req(&self) -> &X509Req {
        &self.req
    }

    pub fn into_req(self) -> X509Req {
        self.req
    }
}

fn requested_dns_names(der: &[u8]) -> Result<Vec<String>> {
    let (_, csr) = X509CertificationRequest::from_der(der)
        .map_err(|e| PkiError::Format(format!("Failed to parse CSR DER: {}", e)))?;

    let mut names = Vec::new();
    if let Some(extensions) = csr.requested_extensions() {
        for extension in extensions {
            if let ParsedExtension::SubjectAlternativeName(san) = extension {
                for name in &san.general_names {
                    if let GeneralName::DNSName(dns) = name {
                        names.push(dns.to_string());
                    }
                }
            }
        }
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_and_parse() {
        let (req, key) = RequestBuilder::new("idmgA", "node1")
            .role("transaction")
            .dns_name("node1.local")
            .dns_name("node1")
            .build()
            .unwrap();
        assert!(req.public_key().unwrap().public_eq(&key));

        let pem = req.to_pem().unwrap();
        let parsed = CertificateRequest::from_pem(&pem).unwrap();
        assert_eq!(
            parsed.subject(),
            &CsrSubject {
                common_name: "node1".into(),
                organization: Some("idmgA".into()),
                role: Some("transaction".into()),
            }
        );
        assert_eq!(parsed.dns_names(), ["node1.local", "node1"]);
    }

    #[test]
    fn test_absent_role_is_none() {
        let (req, _) = RequestBuilder::new("idmgA", "node2").build().unwrap();
        let parsed = CertificateRequest::from_req(req).unwrap();
        assert_eq!(parsed.subject().role, None);
        assert!(parsed.dns_names().is_empty());
    }

    #[test]
    fn test_each_build_generates_new_key() {
        let (_, first) = RequestBuilder::new("idmgA", "node1").build().unwrap();
        let (_, second) = RequestBuilder::new("idmgA", "node1").build().unwrap();
        assert!(!first.public_eq(&second));
    }

    #[test]
    fn test_tampered_signature_rejected() {
        let (req, _) = RequestBuilder::new("idmgA", "node1").build().unwrap();
        let mut der = req.to_der().unwrap();
        // Last byte belongs to the signature value
        let last = der.len() - 1;
        der[last] ^= 0x01;
        let tampered = X509Req::from_der(&der).unwrap();
        assert!(matches!(
            CertificateRequest::from_req(tampered),
            Err(PkiError::InvalidCsrSignature)
        ));
    }

    #[test]
    fn test_malformed_pem() {
        assert!(matches!(
            CertificateRequest::from_pem(b"not a csr"),
            Err(PkiError::Format(_))
        ));
    }
}
