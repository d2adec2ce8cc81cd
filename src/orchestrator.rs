//! Certificate orchestrator (Renouvelleur)
//!
//! Façade over the builders for one MilleGrille. It owns the domain's
//! authorities, the role → policy table and the issuer lookup used for chain
//! alignment, and dispatches every signing request by role.
//!
//! # Concurrency
//!
//! Leaf issuance only reads the authority state and runs in parallel under a
//! shared lock. Intermediate rotation and activation take the lock
//! exclusively, so a certificate is never signed against a half-updated
//! authority. Key generation always happens outside the lock.
//!
//! # Rotation
//!
//! ```text
//! renew_domain_intermediate()  new intermediate issued, added to lookup, staged
//! staged_intermediate()        caller persists it
//! activate_staged()            staged becomes active, previous is returned
//! ```

use crate::chain_alignment::{align_chain, IssuerLookup};
use crate::configs::PkiConfig;
use crate::cross_sign::cross_sign;
use crate::envelope::{idmg_of, load_public_key, KeyCertEnvelope, KeyId};
use crate::error::{PkiError, Result};
use crate::generate_certificate::{CertificateBuilder, CertificateProfile};
use crate::generate_csr::{CertificateRequest, CsrSubject, RequestBuilder};
use crate::generate_root_ca::{issue_intermediate, BootstrappedDomain, RootBootstrapper};
use crate::policy::{
    canonical_role, IssuancePolicy, PolicyTable, ROLE_BACKUP, ROLE_NAVIGATEUR, ROLE_TIERS,
};
use crate::trousseau::{Hebergement, TierMaterial, Trousseau};
use openssl::pkey::{PKey, Public};
use openssl::x509::X509;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{info, warn};

struct AuthorityState {
    root: Arc<KeyCertEnvelope>,
    active: Arc<KeyCertEnvelope>,
    staged: Option<Arc<KeyCertEnvelope>>,
    lookup: IssuerLookup,
}

/// Where the subject key of a leaf comes from
enum LeafSource<'a> {
    Csr(&'a CertificateRequest),
    PublicKey(PKey<Public>, CsrSubject),
}

pub struct CertificateOrchestrator {
    idmg: String,
    config: PkiConfig,
    policies: PolicyTable,
    state: RwLock<AuthorityState>,
}

impl CertificateOrchestrator {
    /// Start from persisted CA material. The root needs its private key only
    /// for intermediate rotation; the intermediate must hold a matching key
    /// and chain to the root.
    pub fn new(
        root: KeyCertEnvelope,
        mut intermediate: KeyCertEnvelope,
        config: PkiConfig,
    ) -> Result<Self> {
        let idmg = idmg_of(root.require_certificate()?)?;
        if !intermediate.key_matches_certificate()? {
            return Err(PkiError::Mismatch);
        }

        let mut lookup = IssuerLookup::new();
        lookup.insert(root.require_certificate()?.clone())?;
        let chain = align_chain(
            intermediate.require_certificate()?,
            &lookup,
            config.chain.rotation_max_hops,
        )?;
        intermediate.set_chain(chain);
        lookup.insert(intermediate.require_certificate()?.clone())?;

        info!(idmg = %idmg, issuers = lookup.len(), "Certificate orchestrator ready");
        Ok(Self {
            idmg,
            config,
            policies: PolicyTable::standard(),
            state: RwLock::new(AuthorityState {
                root: Arc::new(root),
                active: Arc::new(intermediate),
                staged: None,
                lookup,
            }),
        })
    }

    pub fn from_bootstrap(domain: BootstrappedDomain, config: PkiConfig) -> Result<Self> {
        Self::new(domain.root, domain.intermediate, config)
    }

    /// Replace the role → policy table
    pub fn with_policies(mut self, policies: PolicyTable) -> Self {
        self.policies = policies;
        self
    }

    pub fn idmg(&self) -> &str {
        &self.idmg
    }

    pub fn policies(&self) -> &PolicyTable {
        &self.policies
    }

    pub fn root(&self) -> Arc<KeyCertEnvelope> {
        Arc::clone(&self.read_state().root)
    }

    /// The intermediate currently signing leaves
    pub fn active_intermediate(&self) -> Arc<KeyCertEnvelope> {
        Arc::clone(&self.read_state().active)
    }

    /// Rotated intermediate waiting for activation
    pub fn staged_intermediate(&self) -> Option<Arc<KeyCertEnvelope>> {
        self.read_state().staged.clone()
    }

    /// Make an extra authority (e.g. a hosting authority) known to chain
    /// alignment
    pub fn register_authority(&self, cert: X509) -> Result<KeyId> {
        let mut state = self.write_state();
        let ski = state.lookup.insert(cert)?;
        info!(ski = %ski, "Registered issuing authority");
        Ok(ski)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, AuthorityState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, AuthorityState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ================= Leaf issuance =================

    /// Sign a CSR for the role named in its organizational unit
    pub fn sign_csr(&self, csr_pem: &[u8]) -> Result<KeyCertEnvelope> {
        let csr = self.accept_csr(csr_pem)?;
        let policy = self.policy_for(&csr)?;
        self.issue_from_csr(csr, &policy)
    }

    /// Sign a node CSR. With a non-empty domain list the certificate is a
    /// generic domain node; otherwise the CSR's role is used.
    pub fn sign_node<S: AsRef<str>>(
        &self,
        csr_pem: &[u8],
        domains: Option<&[S]>,
    ) -> Result<KeyCertEnvelope> {
        let csr = self.accept_csr(csr_pem)?;
        let policy = match domains {
            Some(domains) if !domains.is_empty() => IssuancePolicy::domain_node(domains),
            _ => self.policy_for(&csr)?,
        };
        self.issue_from_csr(csr, &policy)
    }

    /// Generate key, CSR and certificate for `role` in one call
    pub fn renew_by_role(&self, role: &str, common_name: &str) -> Result<KeyCertEnvelope> {
        let policy = self.policies.get(role)?.clone();

        let mut envelope = KeyCertEnvelope::new();
        envelope.generate_key(self.config.keys.default_bits, true)?;
        let req = RequestBuilder::new(&self.idmg, common_name)
            .role(canonical_role(role))
            .build_for_key(envelope.require_private_key()?)?;
        let csr = CertificateRequest::from_req(req)?;

        let (cert, chain) = self.issue(LeafSource::Csr(&csr), &policy)?;
        envelope.set_certificate(cert);
        envelope.set_chain(chain);
        envelope.set_csr(csr.into_req());
        Ok(envelope)
    }

    /// Short-lived browser session certificate for a bare public key
    pub fn sign_browser_cert(
        &self,
        public_key_pem: &[u8],
        common_name: &str,
    ) -> Result<KeyCertEnvelope> {
        let policy = IssuancePolicy::browser();
        self.issue_for_public_key(public_key_pem, common_name, ROLE_NAVIGATEUR, policy)
    }

    /// Backup certificate for a bare public key
    pub fn sign_backup_cert(
        &self,
        public_key_pem: &[u8],
        common_name: &str,
    ) -> Result<KeyCertEnvelope> {
        let policy = IssuancePolicy::backup();
        self.issue_for_public_key(public_key_pem, common_name, ROLE_BACKUP, policy)
    }

    /// Authorize a foreign domain's connector. The CSR must come from the
    /// foreign domain (organization = `foreign_idmg`). The issued subject is
    /// `O=foreign_idmg, OU=tiers, CN=foreign_idmg` whatever else the CSR says.
    pub fn sign_federation_cert(
        &self,
        foreign_idmg: &str,
        csr_pem: &[u8],
    ) -> Result<KeyCertEnvelope> {
        let csr = CertificateRequest::from_pem(csr_pem).map_err(|e| {
            warn!(foreign_idmg, error = %e, "Rejected federation CSR");
            e
        })?;

        let organization = csr.subject().organization.as_deref();
        if organization != Some(foreign_idmg) {
            warn!(
                foreign_idmg,
                organization = organization.unwrap_or_default(),
                "Rejected federation CSR from another domain"
            );
            return Err(PkiError::Format(format!(
                "Federation CSR organization {:?} is not domain {}",
                organization, foreign_idmg
            )));
        }

        let subject = CsrSubject {
            common_name: foreign_idmg.to_string(),
            organization: Some(foreign_idmg.to_string()),
            role: Some(ROLE_TIERS.to_string()),
        };
        let source = LeafSource::PublicKey(csr.public_key()?, subject);
        let (cert, chain) = self.issue(source, &IssuancePolicy::federation())?;
        let mut envelope = KeyCertEnvelope::from_parts(None, Some(cert));
        envelope.set_chain(chain);
        envelope.set_csr(csr.into_req());
        Ok(envelope)
    }

    fn accept_csr(&self, csr_pem: &[u8]) -> Result<CertificateRequest> {
        let csr = CertificateRequest::from_pem(csr_pem).map_err(|e| {
            warn!(idmg = %self.idmg, error = %e, "Rejected CSR");
            e
        })?;

        let organization = csr.subject().organization.as_deref();
        if organization != Some(self.idmg.as_str()) {
            warn!(
                idmg = %self.idmg,
                organization = organization.unwrap_or_default(),
                "Rejected CSR for another domain"
            );
            return Err(PkiError::Format(format!(
                "CSR organization {:?} is not domain {}",
                organization, self.idmg
            )));
        }
        Ok(csr)
    }

    fn policy_for(&self, csr: &CertificateRequest) -> Result<IssuancePolicy> {
        let role = csr.subject().role.as_deref().ok_or_else(|| {
            warn!(common_name = %csr.subject().common_name, "Rejected CSR without role");
            PkiError::UnknownRole("CSR has no organizational unit".into())
        })?;
        self.policies.get(role).cloned().map_err(|e| {
            warn!(role, common_name = %csr.subject().common_name, "Rejected CSR for unknown role");
            e
        })
    }

    fn issue_from_csr(
        &self,
        csr: CertificateRequest,
        policy: &IssuancePolicy,
    ) -> Result<KeyCertEnvelope> {
        let (cert, chain) = self.issue(LeafSource::Csr(&csr), policy)?;
        let mut envelope = KeyCertEnvelope::from_parts(None, Some(cert));
        envelope.set_chain(chain);
        envelope.set_csr(csr.into_req());
        Ok(envelope)
    }

    fn issue_for_public_key(
        &self,
        public_key_pem: &[u8],
        common_name: &str,
        role: &str,
        policy: IssuancePolicy,
    ) -> Result<KeyCertEnvelope> {
        let public_key = load_public_key(public_key_pem)?;
        let subject = CsrSubject {
            common_name: common_name.to_string(),
            organization: Some(self.idmg.clone()),
            role: Some(role.to_string()),
        };
        let (cert, chain) = self.issue(LeafSource::PublicKey(public_key, subject), &policy)?;
        let mut envelope = KeyCertEnvelope::from_parts(None, Some(cert));
        envelope.set_chain(chain);
        Ok(envelope)
    }

    /// Sign under the active intermediate and align the chain, all under one
    /// read lock
    fn issue(
        &self,
        source: LeafSource<'_>,
        policy: &IssuancePolicy,
    ) -> Result<(X509, Vec<String>)> {
        let state = self.read_state();

        let mut builder = CertificateBuilder::new(&state.active)?
            .profile(CertificateProfile::Leaf(policy.clone()))
            .idmg(&self.idmg)
            .validity_days(policy.validity.days(&self.config.validity))
            .backdate_days(self.config.validity.backdate);
        let common_name = match source {
            LeafSource::Csr(csr) => {
                builder = builder.csr(csr);
                csr.subject().common_name.clone()
            }
            LeafSource::PublicKey(key, subject) => {
                let cn = subject.common_name.clone();
                builder = builder.public_key(key, subject);
                cn
            }
        };

        let cert = builder.build()?;
        let chain = align_chain(&cert, &state.lookup, self.config.chain.role_max_hops)?;

        info!(
            idmg = %self.idmg,
            roles = ?policy.roles,
            common_name = %common_name,
            "Issued certificate"
        );
        Ok((cert, chain))
    }

    // ================= Authorities =================

    /// Issue a new intermediate under the root and stage it. The active
    /// intermediate keeps signing until [`Self::activate_staged`]. Fails with
    /// `RotationPending` while an earlier rotation is still staged.
    pub fn renew_domain_intermediate(&self) -> Result<Arc<KeyCertEnvelope>> {
        self.ensure_nothing_staged(&self.read_state())?;
        let root = self.root();
        let mut intermediate = issue_intermediate(&self.config, &root, &self.idmg)?;

        let mut state = self.write_state();
        // Another rotation may have been staged while the key was generated
        self.ensure_nothing_staged(&state)?;
        let chain = align_chain(
            intermediate.require_certificate()?,
            &state.lookup,
            self.config.chain.rotation_max_hops,
        )?;
        intermediate.set_chain(chain);
        let ski = state.lookup.insert(intermediate.require_certificate()?.clone())?;

        let staged = Arc::new(intermediate);
        state.staged = Some(Arc::clone(&staged));
        info!(idmg = %self.idmg, ski = %ski, "Staged rotated intermediate");
        Ok(staged)
    }

    fn ensure_nothing_staged(&self, state: &AuthorityState) -> Result<()> {
        match &state.staged {
            Some(staged) => {
                let ski = staged.ski().map(|ski| ski.to_string()).unwrap_or_default();
                warn!(idmg = %self.idmg, ski = %ski, "Rotation refused, intermediate already staged");
                Err(PkiError::RotationPending(ski))
            }
            None => Ok(()),
        }
    }

    /// Promote the staged intermediate and hand back the one it replaces
    pub fn activate_staged(&self) -> Result<Arc<KeyCertEnvelope>> {
        let mut state = self.write_state();
        let staged = state.staged.take().ok_or(PkiError::NoStagedAuthority)?;
        let previous = std::mem::replace(&mut state.active, staged);
        info!(idmg = %self.idmg, "Activated rotated intermediate");
        Ok(previous)
    }

    /// Bootstrap a brand-new domain and cross-sign its intermediate under
    /// this domain's active intermediate
    pub fn provision_new_hosted_domain(&self) -> Result<Trousseau> {
        let domain = RootBootstrapper::new(self.config.clone()).bootstrap_new_domain()?;
        let hosting = self.active_intermediate();

        let cross_signed = cross_sign(&domain.intermediate, &hosting, None, &self.config)?;
        let cross_signed_pem = String::from_utf8(cross_signed.to_pem()?)
            .map_err(|e| PkiError::Format(format!("PEM is not UTF-8: {}", e)))?;

        info!(hosting = %self.idmg, hosted = %domain.idmg, "Provisioned hosted domain");
        Ok(Trousseau {
            root: TierMaterial::from_envelope(&domain.root)?,
            intermediate: TierMaterial::from_envelope(&domain.intermediate)?,
            hebergement: Hebergement {
                cross_signed_pem,
                hosting_authority_pem: hosting.cert_pem()?,
            },
            idmg: domain.idmg,
        })
    }
}
