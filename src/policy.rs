//! Role policies
//!
//! Every certificate role differs only in what the authority embeds at
//! signing time: exchange tags, role tags, domain tags, the SAN template and
//! the validity class. Those are described here as data and consumed by the
//! single [`CertificateBuilder`](crate::generate_certificate::CertificateBuilder).
//!
//! Nothing in a policy ever comes from the requester. The CSR only selects
//! which policy applies, through its organizational unit.

use crate::configs::ValidityPeriods;
use crate::error::{PkiError, Result};
use crate::extensions::{EXCHANGE_INTER, EXCHANGE_MIDDLEWARE, EXCHANGE_NOEUDS, EXCHANGE_PUBLIC};
use std::collections::HashMap;

pub const ROLE_MQ: &str = "mq";
pub const ROLE_MONGO: &str = "mongo";
pub const ROLE_MAITREDESCLES: &str = "maitredescles";
pub const ROLE_TRANSACTION: &str = "transaction";
pub const ROLE_DOMAINES: &str = "domaines";
pub const ROLE_CEDULEUR: &str = "ceduleur";
pub const ROLE_DEPLOYEUR: &str = "deployeur";
pub const ROLE_COUPDOEIL: &str = "coupdoeil";
pub const ROLE_FICHIERS: &str = "fichiers";
pub const ROLE_VITRINE: &str = "vitrine";
pub const ROLE_NGINX: &str = "nginx";
pub const ROLE_CONNECTEUR: &str = "connecteur";
pub const ROLE_MONITOR: &str = "monitor";
pub const ROLE_MONITOR_DEPENDANT: &str = "monitor_dependant";
pub const ROLE_HEBERGEMENT: &str = "hebergement";
pub const ROLE_HEB_TRANSACTION: &str = "heb_transaction";
pub const ROLE_HEB_DOMAINES: &str = "heb_domaines";
pub const ROLE_HEB_MAITREDESCLES: &str = "heb_maitredescles";
pub const ROLE_HEB_FICHIERS: &str = "heb_fichiers";
pub const ROLE_HEB_COUPDOEIL: &str = "heb_coupdoeil";

// Issued only through dedicated operations, never selectable from a CSR
pub const ROLE_NAVIGATEUR: &str = "coupdoeil.navigateur";
pub const ROLE_BACKUP: &str = "backup";
pub const ROLE_TIERS: &str = "tiers";
pub const ROLE_NOEUD: &str = "noeud";

/// Which configured validity period applies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidityClass {
    Node,
    Browser,
    Backup,
    Federation,
}

impl ValidityClass {
    pub fn days(&self, periods: &ValidityPeriods) -> u32 {
        match self {
            ValidityClass::Node => periods.node,
            ValidityClass::Browser => periods.browser,
            ValidityClass::Backup => periods.backup,
            ValidityClass::Federation => periods.federation,
        }
    }
}

/// DNS reachability for service roles. The builder always emits the common
/// name and `<common name>.<idmg>`; aliases and loopback entries are added
/// on top.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanTemplate {
    pub aliases: Vec<String>,
    pub localhost: bool,
}

impl SanTemplate {
    fn new(aliases: &[&str], localhost: bool) -> Self {
        Self {
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            localhost,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuancePolicy {
    pub exchanges: Vec<String>,
    pub roles: Vec<String>,
    pub domains: Vec<String>,
    pub san: Option<SanTemplate>,
    pub validity: ValidityClass,
}

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl IssuancePolicy {
    fn node(exchanges: &[&str], roles: &[&str], san: Option<SanTemplate>) -> Self {
        Self {
            exchanges: owned(exchanges),
            roles: owned(roles),
            domains: Vec::new(),
            san,
            validity: ValidityClass::Node,
        }
    }

    /// Browser session certificate, issued from a bare public key
    pub fn browser() -> Self {
        Self {
            exchanges: Vec::new(),
            roles: owned(&[ROLE_NAVIGATEUR]),
            domains: Vec::new(),
            san: None,
            validity: ValidityClass::Browser,
        }
    }

    pub fn backup() -> Self {
        Self {
            exchanges: Vec::new(),
            roles: owned(&[ROLE_BACKUP]),
            domains: Vec::new(),
            san: None,
            validity: ValidityClass::Backup,
        }
    }

    /// Connector of a foreign domain, allowed on the inter-domain exchange
    pub fn federation() -> Self {
        Self {
            exchanges: owned(&[EXCHANGE_INTER]),
            roles: owned(&[ROLE_TIERS]),
            domains: Vec::new(),
            san: None,
            validity: ValidityClass::Federation,
        }
    }

    /// Generic node authorized on an explicit list of domains
    pub fn domain_node<S: AsRef<str>>(domains: &[S]) -> Self {
        Self {
            exchanges: owned(&[EXCHANGE_NOEUDS]),
            roles: owned(&[ROLE_NOEUD]),
            domains: domains.iter().map(|d| d.as_ref().to_string()).collect(),
            san: None,
            validity: ValidityClass::Node,
        }
    }
}

/// Role name to policy, for roles a CSR may request
#[derive(Debug, Clone)]
pub struct PolicyTable {
    policies: HashMap<String, IssuancePolicy>,
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl PolicyTable {
    pub fn empty() -> Self {
        Self {
            policies: HashMap::new(),
        }
    }

    /// Every node role of a MilleGrille and its hosted counterparts
    pub fn standard() -> Self {
        let mut table = Self::empty();
        let all_exchanges = [
            EXCHANGE_MIDDLEWARE,
            EXCHANGE_NOEUDS,
            EXCHANGE_INTER,
            EXCHANGE_PUBLIC,
        ];

        table.insert(
            ROLE_MQ,
            IssuancePolicy::node(&all_exchanges, &[ROLE_MQ], Some(SanTemplate::new(&["mq"], true))),
        );
        table.insert(
            ROLE_MONGO,
            IssuancePolicy::node(
                &[EXCHANGE_MIDDLEWARE],
                &[ROLE_MONGO],
                Some(SanTemplate::new(&["mongo"], true)),
            ),
        );
        for role in [
            ROLE_MAITREDESCLES,
            ROLE_TRANSACTION,
            ROLE_DOMAINES,
            ROLE_CEDULEUR,
            ROLE_DEPLOYEUR,
        ] {
            table.insert(role, IssuancePolicy::node(&[EXCHANGE_MIDDLEWARE], &[role], None));
        }
        table.insert(
            ROLE_COUPDOEIL,
            IssuancePolicy::node(
                &[EXCHANGE_NOEUDS],
                &[ROLE_COUPDOEIL],
                Some(SanTemplate::new(&["coupdoeil"], false)),
            ),
        );
        table.insert(
            ROLE_FICHIERS,
            IssuancePolicy::node(
                &[EXCHANGE_NOEUDS],
                &[ROLE_FICHIERS],
                Some(SanTemplate::new(&["fichiers"], false)),
            ),
        );
        table.insert(
            ROLE_VITRINE,
            IssuancePolicy::node(
                &[EXCHANGE_PUBLIC],
                &[ROLE_VITRINE],
                Some(SanTemplate::new(&["vitrine"], false)),
            ),
        );
        table.insert(
            ROLE_NGINX,
            IssuancePolicy::node(
                &[EXCHANGE_NOEUDS],
                &[ROLE_NGINX],
                Some(SanTemplate::new(&["nginx"], true)),
            ),
        );
        table.insert(
            ROLE_CONNECTEUR,
            IssuancePolicy::node(&[EXCHANGE_INTER], &[ROLE_CONNECTEUR], None),
        );
        table.insert(
            ROLE_MONITOR,
            IssuancePolicy::node(
                &[EXCHANGE_MIDDLEWARE, EXCHANGE_NOEUDS],
                &[ROLE_MONITOR],
                Some(SanTemplate::new(&["monitor"], true)),
            ),
        );
        table.insert(
            ROLE_MONITOR_DEPENDANT,
            IssuancePolicy::node(
                &[EXCHANGE_NOEUDS],
                &[ROLE_MONITOR_DEPENDANT],
                Some(SanTemplate::new(&["monitor"], true)),
            ),
        );

        // Hosted counterparts carry the base role plus the hosting marker
        for (hosted, base) in [
            (ROLE_HEB_TRANSACTION, ROLE_TRANSACTION),
            (ROLE_HEB_DOMAINES, ROLE_DOMAINES),
            (ROLE_HEB_MAITREDESCLES, ROLE_MAITREDESCLES),
        ] {
            table.insert(
                hosted,
                IssuancePolicy::node(&[EXCHANGE_MIDDLEWARE], &[base, ROLE_HEBERGEMENT], None),
            );
        }
        for (hosted, base) in [
            (ROLE_HEB_FICHIERS, ROLE_FICHIERS),
            (ROLE_HEB_COUPDOEIL, ROLE_COUPDOEIL),
        ] {
            table.insert(
                hosted,
                IssuancePolicy::node(
                    &[EXCHANGE_NOEUDS],
                    &[base, ROLE_HEBERGEMENT],
                    Some(SanTemplate::new(&[base], false)),
                ),
            );
        }

        table
    }

    pub fn insert(&mut self, role: &str, policy: IssuancePolicy) {
        self.policies.insert(role.to_string(), policy);
    }

    /// Policy for a requested role. Accepts the plural `transactions`.
    pub fn get(&self, role: &str) -> Result<&IssuancePolicy> {
        let role = canonical_role(role);
        self.policies
            .get(role)
            .ok_or_else(|| PkiError::UnknownRole(role.to_string()))
    }

    pub fn contains(&self, role: &str) -> bool {
        self.policies.contains_key(canonical_role(role))
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.policies.keys().map(String::as_str)
    }
}

pub fn canonical_role(role: &str) -> &str {
    match role.trim() {
        "transactions" => ROLE_TRANSACTION,
        other => other,
    }
}
