//! # CertSteward - A Private Certificate Authority in Pure Rust
//!
//! CertSteward runs a small private certificate authority on top of the
//! rustcrypto libraries. It rotates the authority's signing key, issues
//! certificates and certificate signing requests from declarative templates,
//! reconciles incoming requests against those templates, and keeps every
//! credential it writes under a fixed owner, group and permission mode.
//!
//! ## Supported Key Types
//!
//! - **RSA**: 1024, 2048 and 4096-bit keys
//! - **DSA**: 1024, 2048 and 3072-bit keys
//! - **ECDSA**: P-224, P-256, P-384, P-521 and secp256k1 curves
//! - **Ed25519**: Edwards curve digital signature algorithm
//!
//! Private keys are stored as PKCS#8, encrypted with AES-128, AES-192 or
//! AES-256 in CBC mode (PBES2).
//!
//! ## Quick Start
//!
//! ### Creating a Root Authority
//!
//! ```rust,no_run
//! use certsteward::{
//!     access::FileAccess,
//!     authority::{Authority, AuthorityStorage},
//!     cert::{extensions::{BasicConstraints, KeyUsage, KeyUsages}, subject::Subject, template::CertificateTemplate},
//!     key::{Cipher, KeyAlgorithm, KeyPolicy},
//!     provider::RustCryptoProvider,
//! };
//! use time::{Duration, OffsetDateTime};
//!
//! # fn main() -> Result<(), certsteward::error::StewardError> {
//! let subject = Subject::builder()
//!     .country("FR".to_string())
//!     .organization("Example Corp".to_string())
//!     .common_name("Example Root CA".to_string())
//!     .build();
//!
//! let mut template = CertificateTemplate::new(subject, Duration::days(3650))?;
//! template.add(&BasicConstraints { is_ca: true, max_path_length: Some(0) }, true)?;
//! template.add(&KeyUsage(KeyUsages::KeyCertSign | KeyUsages::CRLSign), true)?;
//!
//! let policy = KeyPolicy::builder()
//!     .duration(Duration::days(3650))
//!     .algorithm(KeyAlgorithm::Rsa4096)
//!     .cipher(Cipher::Aes256Cbc)
//!     .build()?;
//!
//! let access = FileAccess::new("pki", "pki", 0o640)?;
//! let mut authority = Authority::builder()
//!     .name("example_root")
//!     .provider(RustCryptoProvider)
//!     .sign_key_policy(policy)
//!     .template(template)
//!     .storage(AuthorityStorage::under("/srv/pki/root", &access)?)
//!     .build()?;
//!
//! authority.init_storage()?;
//!
//! // Rotation never promotes on its own.
//! let key_id = authority.renew_sign_key("passphrase")?;
//! authority.promote_sign_key(&key_id)?;
//! authority.read_sign_key(Some("passphrase"), None)?;
//!
//! let cert_id = authority.generate_self_signed_cert(OffsetDateTime::now_utc())?;
//! println!("root certificate stored as {cert_id}");
//!
//! authority.save(std::path::Path::new("/srv/pki/root/authority.json"))?;
//! # Ok(())
//! # }
//! ```
//!
//! ### Signing a Request
//!
//! ```rust,no_run
//! use certsteward::{
//!     authority::{Authority, SignCsrOutcome},
//!     cert::CertificateRequest,
//!     provider::RustCryptoProvider,
//! };
//!
//! # fn main() -> Result<(), certsteward::error::StewardError> {
//! let mut authority = Authority::load(
//!     std::path::Path::new("/srv/pki/root/authority.json"),
//!     RustCryptoProvider,
//! )?;
//! authority.read_sign_key(Some("passphrase"), None)?;
//!
//! let csr = CertificateRequest::from_pem(&std::fs::read_to_string("server.csr").unwrap())?;
//! match authority.sign_csr(&csr, "server")? {
//!     SignCsrOutcome::Issued { id } => println!("issued {id}"),
//!     SignCsrOutcome::Rejected { findings } => {
//!         for finding in findings {
//!             println!("rejected: {finding}");
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Every fallible operation returns [`error::StewardError`]. Request
//! mismatches are not errors: [`authority::Authority::sign_csr`] returns them
//! as a list of findings.
//!
//! ```rust
//! use certsteward::{error::StewardError, key::Key};
//!
//! match Key::from_pem("invalid pem data", None) {
//!     Ok(_) => println!("Key imported successfully"),
//!     Err(StewardError::DecodingError(msg)) => println!("Failed to decode key: {}", msg),
//!     Err(e) => println!("Other error: {}", e),
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`authority`]: Signing-key lifecycle, issuance and request reconciliation
//! - [`cert`]: Certificates, requests, extensions, subjects and templates
//! - [`key`]: Key material, algorithms, ciphers and key policies
//! - [`provider`]: The cryptographic capability everything signs through
//! - [`storage`]: Identifier-addressed artifact folders
//! - [`access`]: Ownership and permission checking and repair
//! - [`error`]: Error type shared by every module
//! - [`pem_utils`]: PEM helpers

pub mod access;
pub mod authority;
pub mod cert;
pub mod error;
pub mod key;
pub mod pem_utils;
pub mod provider;
pub mod storage;
