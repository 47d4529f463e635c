#![allow(dead_code)]

use std::path::Path;

use certsteward::access::FileAccess;
use certsteward::authority::{Authority, AuthorityStorage};
use certsteward::cert::CertificateRequest;
use certsteward::cert::builder::CsrBuilder;
use certsteward::cert::extensions::{BasicConstraints, KeyUsage, KeyUsages};
use certsteward::cert::params::ExtensionParam;
use certsteward::cert::subject::Subject;
use certsteward::cert::template::CertificateTemplate;
use certsteward::key::{Cipher, KeyAlgorithm, KeyPolicy, PrivateKey};
use certsteward::provider::{CryptoProvider, RustCryptoProvider};
use time::Duration;

pub const PASSWORD: &str = "test passphrase";

pub fn access() -> FileAccess {
    FileAccess::current_user(0o640).unwrap()
}

pub fn subject(common_name: &str) -> Subject {
    Subject::builder()
        .country("FR".to_string())
        .organization("Example".to_string())
        .common_name(common_name.to_string())
        .build()
}

/// CA template with `basicConstraints(CA, pathlen 0)` and certificate
/// signing key usage.
pub fn ca_template(common_name: &str) -> CertificateTemplate {
    let mut template = CertificateTemplate::new(subject(common_name), Duration::days(365)).unwrap();
    template
        .add(
            &BasicConstraints {
                is_ca: true,
                max_path_length: Some(0),
            },
            true,
        )
        .unwrap();
    template
        .add(&KeyUsage(KeyUsages::KeyCertSign | KeyUsages::CRLSign), true)
        .unwrap();
    template
}

pub fn authority(root: &Path, name: &str, algorithm: KeyAlgorithm) -> Authority {
    let authority = Authority::builder()
        .name(name)
        .provider(RustCryptoProvider)
        .sign_key_policy(
            KeyPolicy::builder()
                .duration(Duration::days(365))
                .algorithm(algorithm)
                .cipher(Cipher::Aes256Cbc)
                .build()
                .unwrap(),
        )
        .template(ca_template(&format!("{name} CA")))
        .storage(AuthorityStorage::under(root, &access()).unwrap())
        .build()
        .unwrap();
    authority.init_storage().unwrap();
    authority
}

/// An authority with a promoted and loaded signing key.
pub fn loaded_authority(root: &Path, name: &str, algorithm: KeyAlgorithm) -> Authority {
    let mut authority = authority(root, name, algorithm);
    let id = authority.renew_sign_key(PASSWORD).unwrap();
    authority.promote_sign_key(&id).unwrap();
    authority.read_sign_key(Some(PASSWORD), None).unwrap();
    authority
}

pub fn csr(common_name: &str, extensions: Vec<ExtensionParam>) -> (PrivateKey, CertificateRequest) {
    let key = RustCryptoProvider
        .generate_key_pair(KeyAlgorithm::Secp256r1)
        .unwrap();
    let csr = CsrBuilder::new(subject(common_name), extensions)
        .sign(&RustCryptoProvider, &key)
        .unwrap();
    (key, csr)
}
