//! Chain alignment
//!
//! Children are linked to their issuer through AKID → SKI. [`IssuerLookup`]
//! maps each known authority's SKI to its certificate; [`align_chain`] walks
//! those links from a freshly issued certificate up to the self-signed root
//! and returns the PEM chain, leaf first and root excluded.
//!
//! ```text
//! leaf.akid ──▶ intermediate (ski) ; intermediate.akid ──▶ root (ski == akid, stop)
//! ```
//!
//! The hop bound turns a corrupt or cyclic lookup table into an error
//! instead of an endless walk.

use crate::envelope::{akid_of, ski_of, KeyId};
use crate::error::{PkiError, Result};
use openssl::x509::{X509Ref, X509};
use std::collections::HashMap;
use tracing::debug;

/// Issuer SKI → issuer certificate
#[derive(Debug, Clone, Default)]
pub struct IssuerLookup {
    issuers: HashMap<KeyId, X509>,
}

impl IssuerLookup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an authority under its SKI, replacing any previous entry
    pub fn insert(&mut self, cert: X509) -> Result<KeyId> {
        let ski = ski_of(&cert)?;
        self.issuers.insert(ski.clone(), cert);
        Ok(ski)
    }

    pub fn get(&self, akid: &KeyId) -> Option<&X509> {
        self.issuers.get(akid)
    }

    pub fn contains(&self, ski: &KeyId) -> bool {
        self.issuers.contains_key(ski)
    }

    pub fn len(&self) -> usize {
        self.issuers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.issuers.is_empty()
    }
}

fn is_self_signed(cert: &X509Ref) -> Result<bool> {
    Ok(akid_of(cert)? == ski_of(cert)?)
}

fn to_pem(cert: &X509Ref) -> Result<String> {
    String::from_utf8(cert.to_pem()?)
        .map_err(|e| PkiError::Format(format!("PEM is not UTF-8: {}", e)))
}

/// PEM chain for `cert`: the certificate itself, then each ancestor below
/// the root. Fails with `IssuerNotFound` on a lookup miss and `ChainTooDeep`
/// after `max_hops` lookups without reaching a root.
pub fn align_chain(cert: &X509Ref, lookup: &IssuerLookup, max_hops: usize) -> Result<Vec<String>> {
    let mut chain = vec![to_pem(cert)?];
    if is_self_signed(cert)? {
        return Ok(chain);
    }

    let mut current: &X509Ref = cert;
    for hop in 0..max_hops {
        let akid = akid_of(current)?;
        let issuer = lookup
            .get(&akid)
            .ok_or_else(|| PkiError::IssuerNotFound(akid.to_string()))?;
        debug!(hop, akid = %akid, "Chain alignment found issuer");

        if is_self_signed(issuer)? {
            return Ok(chain);
        }
        chain.push(to_pem(issuer)?);
        current = &**issuer;
    }

    Err(PkiError::ChainTooDeep(max_hops))
}
