//! Custom policy extensions
//!
//! Authorization metadata travels inside leaf certificates as three private
//! extensions. Each value is the comma-joined UTF-8 tag list stored as the
//! raw extension payload:
//!
//! ```text
//! 1.2.3.4.0  exchanges   millegrilles.middleware,millegrilles.noeuds
//! 1.2.3.4.1  roles       transaction
//! 1.2.3.4.2  domains     SenseursPassifs,GrosFichiers
//! ```
//!
//! These OIDs are shared with every consumer of the certificates and must
//! not change.

use crate::error::{PkiError, Result};
use openssl::asn1::{Asn1Object, Asn1OctetString};
use openssl::x509::X509Extension;
use x509_parser::prelude::*;

pub const OID_EXCHANGES: &str = "1.2.3.4.0";
pub const OID_ROLES: &str = "1.2.3.4.1";
pub const OID_DOMAINS: &str = "1.2.3.4.2";

pub const EXCHANGE_MIDDLEWARE: &str = "millegrilles.middleware";
pub const EXCHANGE_NOEUDS: &str = "millegrilles.noeuds";
pub const EXCHANGE_INTER: &str = "millegrilles.inter";
pub const EXCHANGE_PUBLIC: &str = "millegrilles.public";

/// The three policy extensions written by the issuing authority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyExtension {
    Exchanges,
    Roles,
    Domains,
}

impl PolicyExtension {
    pub fn oid(&self) -> &'static str {
        match self {
            PolicyExtension::Exchanges => OID_EXCHANGES,
            PolicyExtension::Roles => OID_ROLES,
            PolicyExtension::Domains => OID_DOMAINS,
        }
    }

    pub fn from_oid(oid: &str) -> Option<Self> {
        match oid {
            OID_EXCHANGES => Some(PolicyExtension::Exchanges),
            OID_ROLES => Some(PolicyExtension::Roles),
            OID_DOMAINS => Some(PolicyExtension::Domains),
            _ => None,
        }
    }
}

/// Join tags into the extension payload, dropping duplicates and keeping
/// first-seen order.
pub fn encode_tags<S: AsRef<str>>(tags: &[S]) -> String {
    let mut unique: Vec<&str> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.as_ref().trim();
        if !tag.is_empty() && !unique.contains(&tag) {
            unique.push(tag);
        }
    }
    unique.join(",")
}

pub fn decode_tags(value: &[u8]) -> Result<Vec<String>> {
    let text = std::str::from_utf8(value)
        .map_err(|e| PkiError::Format(format!("Extension value is not UTF-8: {}", e)))?;
    Ok(text
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect())
}

/// Build a non-critical policy extension ready to append to an X509 builder
pub fn build_policy_extension<S: AsRef<str>>(
    kind: PolicyExtension,
    tags: &[S],
) -> Result<X509Extension> {
    let oid = Asn1Object::from_str(kind.oid())?;
    let value = Asn1OctetString::new_from_bytes(encode_tags(tags).as_bytes())?;
    Ok(X509Extension::new_from_der(&oid, false, &value)?)
}

pub(crate) fn parse_certificate_der(der: &[u8]) -> Result<X509Certificate<'_>> {
    let (_, cert) = X509Certificate::from_der(der)
        .map_err(|e| PkiError::Format(format!("Failed to parse certificate DER: {}", e)))?;
    Ok(cert)
}

/// Raw payload of the extension identified by `oid`
pub fn extension_value(der: &[u8], oid: &str) -> Result<Vec<u8>> {
    let cert = parse_certificate_der(der)?;
    cert.extensions()
        .iter()
        .find(|ext| ext.oid.to_id_string() == oid)
        .map(|ext| ext.value.to_vec())
        .ok_or_else(|| PkiError::ExtensionMissing(oid.to_string()))
}

/// Tag list of a policy extension, in the order it was written
pub fn read_tags(der: &[u8], kind: PolicyExtension) -> Result<Vec<String>> {
    decode_tags(&extension_value(der, kind.oid())?)
}
