use millegrille_pki::chain_alignment::{align_chain, IssuerLookup};
use millegrille_pki::configs::PkiConfig;
use millegrille_pki::cross_sign::cross_sign;
use millegrille_pki::extensions::{PolicyExtension, EXCHANGE_MIDDLEWARE};
use millegrille_pki::generate_csr::RequestBuilder;
use millegrille_pki::generate_root_ca::{BootstrappedDomain, RootBootstrapper};
use millegrille_pki::orchestrator::CertificateOrchestrator;
use millegrille_pki::policy::ROLE_NAVIGATEUR;
use millegrille_pki::{KeyCertEnvelope, PkiError};
use openssl::pkey::PKey;
use openssl::rsa::Rsa;

fn config() -> PkiConfig {
    let mut config = PkiConfig::default();
    config.keys.root_bits = 2048;
    config
}

fn bootstrap() -> BootstrappedDomain {
    RootBootstrapper::new(config()).bootstrap_new_domain().unwrap()
}

#[test]
fn bootstrap_new_domain() {
    let domain = bootstrap();

    assert!(domain.root.is_ca().unwrap());
    assert_eq!(domain.root.path_length().unwrap(), Some(5));
    assert!(domain.intermediate.is_ca().unwrap());
    assert_eq!(domain.intermediate.path_length().unwrap(), Some(4));
    assert_eq!(domain.intermediate.akid().unwrap(), domain.root.ski().unwrap());
    assert_eq!(
        domain.intermediate.certificate().unwrap().issuer_name().to_der().unwrap(),
        domain.root.certificate().unwrap().subject_name().to_der().unwrap()
    );

    // The idmg never changes for a given root
    assert_eq!(domain.root.fingerprint_sha512_224_base58().unwrap(), domain.idmg);
    assert_eq!(domain.root.fingerprint_sha512_224_base58().unwrap(), domain.idmg);
}

#[test]
fn sign_transactions_csr() {
    let orchestrator = CertificateOrchestrator::from_bootstrap(bootstrap(), config()).unwrap();
    let (req, key) = RequestBuilder::new(orchestrator.idmg(), "node1")
        .role("transactions")
        .build()
        .unwrap();

    let leaf = orchestrator.sign_csr(&req.to_pem().unwrap()).unwrap();

    assert!(!leaf.is_ca().unwrap());
    assert!(leaf
        .extension(PolicyExtension::Roles)
        .unwrap()
        .contains(&"transaction".to_string()));
    assert!(leaf
        .extension(PolicyExtension::Exchanges)
        .unwrap()
        .contains(&EXCHANGE_MIDDLEWARE.to_string()));
    assert_eq!(
        leaf.akid().unwrap(),
        orchestrator.active_intermediate().ski().unwrap()
    );
    assert_eq!(leaf.subject_common_name().unwrap().as_deref(), Some("node1"));

    let envelope = KeyCertEnvelope::from_parts(Some(key), leaf.certificate().cloned());
    assert!(envelope.key_matches_certificate().unwrap());
}

#[test]
fn sign_browser_certificate() {
    let orchestrator = CertificateOrchestrator::from_bootstrap(bootstrap(), config()).unwrap();
    let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();

    let browser = orchestrator
        .sign_browser_cert(&key.public_key_to_pem().unwrap(), "alice")
        .unwrap();

    // 42 days plus the one day of backdating
    assert_eq!(browser.validity_days().unwrap(), 43);
    assert_eq!(
        browser.extension(PolicyExtension::Roles).unwrap(),
        vec![ROLE_NAVIGATEUR]
    );
    assert!(browser.dns_names().unwrap().is_empty());
    assert!(browser.certificate().unwrap().subject_alt_names().is_none());
    assert_eq!(browser.subject_common_name().unwrap().as_deref(), Some("alice"));
    assert!(browser.not_before().unwrap().timestamp() < browser.not_after().unwrap().timestamp());
}

#[test]
fn cross_sign_under_foreign_authority() {
    let a = bootstrap();
    let b = bootstrap();

    let cert = cross_sign(&a.intermediate, &b.intermediate, None, &config()).unwrap();
    let cross = KeyCertEnvelope::from_parts(None, Some(cert));

    assert_eq!(cross.subject_organization().unwrap().as_deref(), Some(a.idmg.as_str()));
    assert_eq!(cross.issuer_organization().unwrap().as_deref(), Some(b.idmg.as_str()));
    assert_eq!(cross.path_length().unwrap(), Some(0));
    let days = cross.validity_days().unwrap();
    assert!((90..=91).contains(&days), "validity {} days", days);
}

#[test]
fn every_leaf_chains_to_its_root() {
    let domain = bootstrap();
    let root_cert = domain.root.certificate().unwrap().clone();
    let orchestrator = CertificateOrchestrator::from_bootstrap(domain, config()).unwrap();

    let mut lookup = IssuerLookup::new();
    lookup.insert(root_cert).unwrap();
    lookup
        .insert(orchestrator.active_intermediate().certificate().unwrap().clone())
        .unwrap();

    for (role, cn) in [("mq", "mq1"), ("mongo", "db1"), ("heb_fichiers", "hf1"), ("monitor", "m1")] {
        let leaf = orchestrator.renew_by_role(role, cn).unwrap();
        let cert = leaf.certificate().unwrap();

        let chain = align_chain(cert, &lookup, config().chain.role_max_hops).unwrap();
        assert_eq!(chain.len(), 2, "role {}", role);
        assert_eq!(leaf.chain().unwrap(), chain.as_slice());
        assert_eq!(
            leaf.akid().unwrap(),
            orchestrator.active_intermediate().ski().unwrap()
        );
    }
}

#[test]
fn exported_key_round_trip() {
    let domain = bootstrap();
    let pem = domain.intermediate.export_private_key(true).unwrap();
    let cert_pem = domain.intermediate.cert_pem().unwrap();

    let reloaded = KeyCertEnvelope::load(
        Some(pem.as_slice()),
        Some(cert_pem.as_bytes()),
        domain.intermediate.password(),
    )
    .unwrap();
    assert!(reloaded
        .private_key()
        .unwrap()
        .public_eq(domain.intermediate.private_key().unwrap()));

    let wrong = KeyCertEnvelope::load(Some(pem.as_slice()), None, Some("wrong password"));
    assert!(matches!(wrong, Err(PkiError::Decrypt(_)) | Err(PkiError::Format(_))));
}

#[test]
fn hosted_domain_trousseau() {
    let orchestrator = CertificateOrchestrator::from_bootstrap(bootstrap(), config()).unwrap();
    let trousseau = orchestrator.provision_new_hosted_domain().unwrap();

    let json = trousseau.to_json().unwrap();
    assert!(json.contains(&trousseau.idmg));
    assert!(json.contains("cross_signed_pem"));

    let root = trousseau.root.to_envelope().unwrap();
    assert_eq!(root.fingerprint_sha512_224_base58().unwrap(), trousseau.idmg);
    assert_eq!(root.fingerprint_sha1_base64().unwrap(), trousseau.root.fingerprint_base64);
}
