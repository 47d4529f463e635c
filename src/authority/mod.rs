//! The certificate authority: signing-key rotation, issuance and request
//! handling on top of the storage, key and template modules.
//!
//! An [`Authority`] owns its [`CryptoProvider`]; nothing is looked up
//! globally. Signing keys live encrypted in the sign-key storage and are
//! addressed by an identifier derived from their public key, so the
//! authority only records which one is current.

pub mod reconcile;
pub mod state;

use std::borrow::Cow;
use std::fmt;
use std::fs;
use std::path::Path;

use bon::bon;
use rand::Rng;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

pub use reconcile::{Finding, SignCsrOutcome};
pub use state::{AuthorityState, AuthorityStorage};

use crate::access::AccessReport;
use crate::cert::extensions::{AuthorityKeyIdentifier, SubjectKeyIdentifier};
use crate::cert::params::{ExtensionParam, Validity};
use crate::cert::subject::Subject;
use crate::cert::template::CertificateTemplate;
use crate::cert::{Certificate, CertificateRequest, to_hex_upper};
use crate::error::{Result, StewardError};
use crate::key::{Key, KeyPolicy, PrivateKey, PublicKey};
use crate::provider::{CryptoProvider, RustCryptoProvider};

const NAME_PATTERN: &str = r"^[A-Za-z0-9_]+$";

/// Length in bytes of generated serial numbers (RFC 5280 maximum).
pub const SERIAL_NUMBER_LEN: usize = 20;

/// Hex digits of a digest or serial kept in an identifier.
const ID_DIGEST_LEN: usize = 8;

/// What the authority currently holds of its signing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignKeyState {
    /// No key material cached.
    Unloaded,
    /// Only a public key is cached; verification only.
    PublicOnly,
    /// The private key is cached and issuance is possible.
    Loaded,
}

/// The template a request is reconciled against.
#[derive(Debug, Clone, Copy)]
pub enum TemplateRef<'a> {
    /// A template stored in the child template storage under this name.
    Child(&'a str),
    Literal(&'a CertificateTemplate),
}

impl<'a> From<&'a CertificateTemplate> for TemplateRef<'a> {
    fn from(template: &'a CertificateTemplate) -> Self {
        TemplateRef::Literal(template)
    }
}

impl<'a> From<&'a str> for TemplateRef<'a> {
    fn from(name: &'a str) -> Self {
        TemplateRef::Child(name)
    }
}

/// Fails unless `name` is made of ASCII letters, digits and underscores.
pub fn validate_name(name: &str) -> Result<()> {
    let pattern = Regex::new(NAME_PATTERN)
        .map_err(|e| StewardError::InvalidConfig(format!("name pattern: {e}")))?;
    if !pattern.is_match(name) {
        return Err(StewardError::InvalidConfig(format!(
            "invalid authority name {name:?}: only letters, digits and '_' are allowed"
        )));
    }
    Ok(())
}

/// A private certificate authority.
///
/// # Example
/// ```no_run
/// use certsteward::access::FileAccess;
/// use certsteward::authority::{Authority, AuthorityStorage};
/// use certsteward::cert::extensions::BasicConstraints;
/// use certsteward::cert::subject::Subject;
/// use certsteward::cert::template::CertificateTemplate;
/// use certsteward::key::{Cipher, KeyAlgorithm, KeyPolicy};
/// use certsteward::provider::RustCryptoProvider;
/// use time::{Duration, OffsetDateTime};
///
/// # fn main() -> certsteward::error::Result<()> {
/// let access = FileAccess::current_user(0o640)?;
/// let mut template = CertificateTemplate::new(
///     Subject::builder().common_name("Example Root".to_string()).build(),
///     Duration::days(3650),
/// )?;
/// template.add(&BasicConstraints { is_ca: true, max_path_length: Some(0) }, true)?;
///
/// let mut authority = Authority::builder()
///     .name("root")
///     .provider(RustCryptoProvider)
///     .sign_key_policy(
///         KeyPolicy::builder()
///             .duration(Duration::days(3650))
///             .algorithm(KeyAlgorithm::Secp384r1)
///             .cipher(Cipher::Aes256Cbc)
///             .build()?,
///     )
///     .template(template)
///     .storage(AuthorityStorage::under("/var/lib/ca", &access)?)
///     .build()?;
///
/// authority.init_storage()?;
/// let key_id = authority.renew_sign_key("passphrase")?;
/// authority.read_sign_key(Some("passphrase"), Some(&key_id))?;
/// let cert_id = authority.generate_self_signed_cert(OffsetDateTime::now_utc())?;
/// println!("{}", authority.storage().cacert_storage.get_string(&cert_id)?);
/// # Ok(())
/// # }
/// ```
pub struct Authority<P: CryptoProvider = RustCryptoProvider> {
    name: String,
    provider: P,
    sign_key_policy: KeyPolicy,
    template: CertificateTemplate,
    storage: AuthorityStorage,
    current_sign_key_id: Option<String>,
    sign_key: Option<Key>,
}

#[bon]
impl<P: CryptoProvider> Authority<P> {
    #[builder]
    pub fn new(
        #[builder(into)] name: String,
        provider: P,
        sign_key_policy: KeyPolicy,
        template: CertificateTemplate,
        storage: AuthorityStorage,
    ) -> Result<Self> {
        validate_name(&name)?;
        Ok(Self {
            name,
            provider,
            sign_key_policy,
            template,
            storage,
            current_sign_key_id: None,
            sign_key: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn sign_key_policy(&self) -> &KeyPolicy {
        &self.sign_key_policy
    }

    pub fn set_sign_key_policy(&mut self, policy: KeyPolicy) {
        self.sign_key_policy = policy;
    }

    /// Template of the authority's own certificate.
    pub fn template(&self) -> &CertificateTemplate {
        &self.template
    }

    pub fn set_template(&mut self, template: CertificateTemplate) {
        self.template = template;
    }

    /// Subject of the authority, also the issuer of what it signs.
    pub fn subject(&self) -> &Subject {
        self.template.subject()
    }

    pub fn set_subject(&mut self, subject: Subject) {
        self.template.set_subject(subject);
    }

    pub fn storage(&self) -> &AuthorityStorage {
        &self.storage
    }

    /// Creates every storage folder and stamps its permissions.
    pub fn init_storage(&self) -> Result<AccessReport> {
        let report = self.storage.create()?;
        info!(authority = %self.name, repaired = report.errors().len(), "storage initialized");
        Ok(report)
    }

    pub fn check_storage(&self) -> Result<AccessReport> {
        self.storage.check()
    }

    pub fn update_storage(&self) -> Result<AccessReport> {
        self.storage.update()
    }

    // ---------------------------------------------------------------
    // Identifiers

    /// Storage identifier of a key: leading hex digits of its key identifier
    /// digest, then the authority name.
    pub fn key_id(&self, public_key: &PublicKey) -> Result<String> {
        let digest = to_hex_upper(&self.provider.key_identifier(public_key)?);
        Ok(self.scoped_id(&digest))
    }

    /// Storage identifier of a certificate: leading hex digits of its serial
    /// number, then the authority name.
    pub fn cert_id(&self, cert: &Certificate) -> String {
        self.scoped_id(&cert.serial_hex())
    }

    fn scoped_id(&self, hex: &str) -> String {
        let prefix = hex.get(..ID_DIGEST_LEN).unwrap_or(hex);
        format!("{prefix}-{}", self.name)
    }

    /// A random positive serial number of [`SERIAL_NUMBER_LEN`] bytes.
    ///
    /// The top bit is cleared so the DER integer stays positive without
    /// padding, and the next bit is set so the hex form never starts with a
    /// zero digit.
    pub fn generate_serial_number() -> Vec<u8> {
        let mut serial = [0u8; SERIAL_NUMBER_LEN];
        rand::rng().fill(&mut serial[..]);
        serial[0] = (serial[0] & 0x7F) | 0x40;
        serial.to_vec()
    }

    // ---------------------------------------------------------------
    // Signing keys

    pub fn current_sign_key_id(&self) -> Option<&str> {
        self.current_sign_key_id.as_deref()
    }

    /// The cached signing key, if any.
    pub fn current_sign_key(&self) -> Option<&Key> {
        self.sign_key.as_ref()
    }

    pub fn sign_key_state(&self) -> SignKeyState {
        match &self.sign_key {
            None => SignKeyState::Unloaded,
            Some(key) if key.is_public_only() => SignKeyState::PublicOnly,
            Some(_) => SignKeyState::Loaded,
        }
    }

    pub fn sign_key_ids(&self) -> Result<Vec<String>> {
        self.storage.sign_key_storage.ids()
    }

    /// Loads a stored signing key and makes it current.
    ///
    /// Without `id` the current key is reloaded. The key is decoded before
    /// anything changes, so a wrong passphrase leaves the previous key in
    /// place.
    pub fn read_sign_key(&mut self, password: Option<&str>, id: Option<&str>) -> Result<String> {
        let id = id
            .or(self.current_sign_key_id.as_deref())
            .ok_or_else(|| {
                StewardError::InvalidState(
                    "no signing key identifier given and no current signing key".to_string(),
                )
            })?
            .to_string();

        let key = self.load_stored_key(&id, password)?;

        self.current_sign_key_id = Some(id.clone());
        self.sign_key = Some(key);
        info!(authority = %self.name, key = %id, state = ?self.sign_key_state(), "signing key loaded");
        Ok(id)
    }

    fn load_stored_key(&self, id: &str, password: Option<&str>) -> Result<Key> {
        let pem = self.storage.sign_key_storage.get_string(id)?;
        let key = self
            .provider
            .load_private_key(&pem, password)
            .map_err(|e| with_key_context(id, e))?;

        let derived = self.key_id(&key.public_key())?;
        if derived != id {
            return Err(StewardError::Storage {
                path: self.storage.sign_key_storage.path_of(id)?,
                message: format!("entry holds the key identified as {derived}"),
            });
        }
        Ok(key)
    }

    /// Generates a key under the signing policy and stores it encrypted.
    ///
    /// The new key is not made current; see [`Self::promote_sign_key`].
    pub fn renew_sign_key(&self, password: &str) -> Result<String> {
        let key = self.sign_key_policy.generate_key(&self.provider)?;
        let id = self.key_id(&key.public_key())?;
        let pem = key.get_pem(Some(self.sign_key_policy.cipher()), Some(password))?;
        self.storage.sign_key_storage.set(&id, pem.as_bytes())?;
        info!(
            authority = %self.name,
            key = %id,
            algorithm = %key.algorithm(),
            "signing key generated"
        );
        Ok(id)
    }

    /// Stores an existing key in the sign-key storage.
    ///
    /// Private keys are encrypted with the policy cipher and require a
    /// password; a public-only key is stored as-is and can only ever be
    /// loaded for verification.
    pub fn import_sign_key(&self, key: &Key, password: Option<&str>) -> Result<String> {
        let pem = match (key.is_public_only(), password) {
            (true, _) => key.public_pem()?,
            (false, Some(password)) => {
                key.get_pem(Some(self.sign_key_policy.cipher()), Some(password))?
            }
            (false, None) => {
                return Err(StewardError::InvalidInput(
                    "a password is required to store a private signing key".to_string(),
                ));
            }
        };
        let id = self.key_id(&key.public_key())?;
        self.storage.sign_key_storage.set(&id, pem.as_bytes())?;
        info!(authority = %self.name, key = %id, public_only = key.is_public_only(), "signing key imported");
        Ok(id)
    }

    /// Makes a stored key current without loading it.
    ///
    /// A cached key that is not `id` is dropped.
    pub fn promote_sign_key(&mut self, id: &str) -> Result<()> {
        let storage = &self.storage.sign_key_storage;
        if !storage.contains(id)? {
            return Err(StewardError::MissingEntry {
                id: id.to_string(),
                folder: storage.folder().to_path_buf(),
            });
        }

        let cache_matches = match &self.sign_key {
            Some(key) => self.key_id(&key.public_key())? == id,
            None => true,
        };
        if !cache_matches {
            self.sign_key = None;
        }
        let previous = self.current_sign_key_id.replace(id.to_string());
        info!(authority = %self.name, key = %id, previous = ?previous, "signing key promoted");
        Ok(())
    }

    /// Deletes a stored key; the current key cannot be deleted.
    pub fn delete_sign_key(&self, id: &str) -> Result<()> {
        if self.current_sign_key_id.as_deref() == Some(id) {
            return Err(StewardError::InvalidState(format!(
                "signing key {id} is current and cannot be deleted"
            )));
        }
        self.storage.sign_key_storage.delete(id)?;
        info!(authority = %self.name, key = %id, "signing key deleted");
        Ok(())
    }

    fn private_sign_key(&self) -> Result<&PrivateKey> {
        self.sign_key
            .as_ref()
            .and_then(Key::private_key)
            .ok_or_else(|| {
                StewardError::InvalidState("no private signing key is loaded".to_string())
            })
    }

    // ---------------------------------------------------------------
    // Issuance

    fn sign_certificate(
        &self,
        public_key: &PublicKey,
        begin: OffsetDateTime,
        template: &CertificateTemplate,
    ) -> Result<Certificate> {
        let signer = self.private_sign_key()?;

        let ski = SubjectKeyIdentifier {
            key_identifier: self.provider.key_identifier(public_key)?,
        };
        let aki = AuthorityKeyIdentifier {
            key_identifier: self.provider.key_identifier(&signer.public_key())?,
        };

        template
            .cert_builder()
            .extension(ExtensionParam::from_extension(&ski, false)?)?
            .extension(ExtensionParam::from_extension(&aki, false)?)?
            .issuer(self.template.subject().clone())
            .validity(Validity::starting_at(begin, template.duration()))
            .serial_number(Self::generate_serial_number())
            .public_key(public_key.clone())
            .sign(&self.provider, signer)
    }

    /// Issues a certificate for `public_key` shaped by `template`.
    ///
    /// The certificate is valid from `begin` for the template duration and
    /// is stored in the certificate storage; its identifier is returned.
    pub fn generate_cert(
        &self,
        public_key: &PublicKey,
        begin: OffsetDateTime,
        template: &CertificateTemplate,
    ) -> Result<String> {
        let cert = self.sign_certificate(public_key, begin, template)?;
        let id = self.cert_id(&cert);
        self.storage.cert_storage.set(&id, cert.to_pem()?.as_bytes())?;
        info!(
            authority = %self.name,
            cert = %id,
            subject = %template.subject(),
            "certificate issued"
        );
        Ok(id)
    }

    /// Issues the authority's own certificate with its current key.
    pub fn generate_self_signed_cert(&self, begin: OffsetDateTime) -> Result<String> {
        let public_key = self.private_sign_key()?.public_key();
        let cert = self.sign_certificate(&public_key, begin, &self.template)?;
        let id = self.cert_id(&cert);
        self.storage.cacert_storage.set(&id, cert.to_pem()?.as_bytes())?;
        info!(authority = %self.name, cert = %id, "self-signed certificate issued");
        Ok(id)
    }

    /// Builds a request for the authority's own certificate.
    ///
    /// Signs with the stored key `id` (decrypted with `password`) or, when
    /// `id` is `None`, with the current key. The request is stored in the
    /// CA request storage under the key's identifier.
    pub fn generate_ca_csr(&self, id: Option<&str>, password: Option<&str>) -> Result<String> {
        let stored;
        let signer = match id {
            Some(id) => {
                stored = self.load_stored_key(id, password)?;
                stored.private_key().ok_or_else(|| {
                    StewardError::InvalidState(format!("signing key {id} is public only"))
                })?
            }
            None => self.private_sign_key()?,
        };

        let csr = self.template.csr_builder().sign(&self.provider, signer)?;
        let csr_id = self.key_id(&signer.public_key())?;
        self.storage.ca_csr_storage.set(&csr_id, csr.to_pem()?.as_bytes())?;
        info!(authority = %self.name, csr = %csr_id, "CA request generated");
        Ok(csr_id)
    }

    // ---------------------------------------------------------------
    // Child templates

    pub fn child_template_names(&self) -> Result<Vec<String>> {
        self.storage.child_template_storage.ids()
    }

    pub fn child_template(&self, name: &str) -> Result<CertificateTemplate> {
        let json = self.storage.child_template_storage.get_string(name)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn set_child_template(&self, name: &str, template: &CertificateTemplate) -> Result<()> {
        let json = serde_json::to_string_pretty(template)?;
        self.storage
            .child_template_storage
            .set(name, json.as_bytes())?;
        debug!(authority = %self.name, template = %name, "child template saved");
        Ok(())
    }

    pub fn delete_child_template(&self, name: &str) -> Result<()> {
        self.storage.child_template_storage.delete(name)?;
        debug!(authority = %self.name, template = %name, "child template deleted");
        Ok(())
    }

    // ---------------------------------------------------------------
    // Received requests

    /// Stores a received request under its public key identifier.
    pub fn receive_csr(&self, csr: &CertificateRequest) -> Result<String> {
        let id = self.key_id(&csr.public_key()?)?;
        self.storage.csr_storage.set(&id, csr.to_pem()?.as_bytes())?;
        info!(authority = %self.name, csr = %id, "request received");
        Ok(id)
    }

    pub fn received_csr(&self, id: &str) -> Result<CertificateRequest> {
        CertificateRequest::from_pem(&self.storage.csr_storage.get_string(id)?)
    }

    /// Reconciles a stored request with `template` and issues it.
    pub fn sign_stored_csr<'a>(
        &self,
        id: &str,
        template: impl Into<TemplateRef<'a>>,
    ) -> Result<SignCsrOutcome> {
        let csr = self.received_csr(id)?;
        self.sign_csr(&csr, template)
    }

    /// Reconciles `csr` with `template` and, if nothing is found, issues a
    /// certificate valid from now.
    ///
    /// Mismatches are returned as [`SignCsrOutcome::Rejected`] with every
    /// finding; errors are reserved for failures of the authority itself.
    pub fn sign_csr<'a>(
        &self,
        csr: &CertificateRequest,
        template: impl Into<TemplateRef<'a>>,
    ) -> Result<SignCsrOutcome> {
        let template = match template.into() {
            TemplateRef::Child(name) => Cow::Owned(self.child_template(name)?),
            TemplateRef::Literal(template) => Cow::Borrowed(template),
        };

        let mut findings = Vec::new();
        match csr.verify_signature(&self.provider) {
            Ok(()) => {}
            Err(StewardError::SignatureError(reason)) => {
                debug!(%reason, "request signature does not verify");
                findings.push(Finding::InvalidSignature);
            }
            Err(e) => return Err(e),
        }
        findings.extend(reconcile::reconcile(
            &csr.extensions()?,
            template.extensions(),
        ));

        if !findings.is_empty() {
            warn!(
                authority = %self.name,
                findings = findings.len(),
                "request rejected"
            );
            return Ok(SignCsrOutcome::Rejected { findings });
        }

        let id = self.generate_cert(&csr.public_key()?, OffsetDateTime::now_utc(), &template)?;
        Ok(SignCsrOutcome::Issued { id })
    }

    // ---------------------------------------------------------------
    // Persistence

    pub fn to_state(&self) -> AuthorityState {
        AuthorityState {
            name: self.name.clone(),
            sign_key_policy: self.sign_key_policy.clone(),
            authority_template: self.template.clone(),
            current_sign_key_id: self.current_sign_key_id.clone(),
            storage: self.storage.clone(),
        }
    }

    /// Rebuilds an authority; the signing key starts unloaded.
    pub fn from_state(state: AuthorityState, provider: P) -> Result<Self> {
        let mut authority = Self::builder()
            .name(state.name)
            .provider(provider)
            .sign_key_policy(state.sign_key_policy)
            .template(state.authority_template)
            .storage(state.storage)
            .build()?;

        if let Some(id) = state.current_sign_key_id {
            if !authority.storage.sign_key_storage.contains(&id)? {
                return Err(StewardError::InvalidState(format!(
                    "current signing key {id} is not in {}",
                    authority.storage.sign_key_storage.folder().display()
                )));
            }
            authority.current_sign_key_id = Some(id);
        }
        Ok(authority)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.to_state())?;
        fs::write(path, json).map_err(|e| StewardError::io(path, e))?;
        info!(authority = %self.name, path = %path.display(), "state saved");
        Ok(())
    }

    pub fn load(path: &Path, provider: P) -> Result<Self> {
        let json = fs::read_to_string(path).map_err(|e| StewardError::io(path, e))?;
        let authority = Self::from_state(serde_json::from_str(&json)?, provider)?;
        debug!(authority = %authority.name, path = %path.display(), "state loaded");
        Ok(authority)
    }
}

impl<P: CryptoProvider> fmt::Debug for Authority<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authority")
            .field("name", &self.name)
            .field("current_sign_key_id", &self.current_sign_key_id)
            .field("sign_key_state", &self.sign_key_state())
            .finish_non_exhaustive()
    }
}

fn with_key_context(id: &str, err: StewardError) -> StewardError {
    match err {
        StewardError::DecodingError(msg) => {
            StewardError::DecodingError(format!("signing key {id}: {msg}"))
        }
        StewardError::InvalidInput(msg) => {
            StewardError::InvalidInput(format!("signing key {id}: {msg}"))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::FileAccess;
    use crate::cert::extensions::{BasicConstraints, ToAndFromX509Extension};
    use crate::key::{Cipher, KeyAlgorithm};
    use test_case::test_case;
    use time::Duration;

    const PASSWORD: &str = "correct horse";

    fn authority(root: &Path) -> Authority {
        let access = FileAccess::current_user(0o640).unwrap();
        let mut template = CertificateTemplate::new(
            Subject::builder()
                .organization("Example".to_string())
                .common_name("Unit Root".to_string())
                .build(),
            Duration::days(30),
        )
        .unwrap();
        template
            .add(
                &BasicConstraints {
                    is_ca: true,
                    max_path_length: None,
                },
                true,
            )
            .unwrap();
        let authority = Authority::builder()
            .name("unit")
            .provider(RustCryptoProvider)
            .sign_key_policy(
                KeyPolicy::builder()
                    .duration(Duration::days(30))
                    .algorithm(KeyAlgorithm::Ed25519)
                    .cipher(Cipher::Aes128Cbc)
                    .build()
                    .unwrap(),
            )
            .template(template)
            .storage(AuthorityStorage::under(root, &access).unwrap())
            .build()
            .unwrap();
        authority.init_storage().unwrap();
        authority
    }

    #[test_case("root" ; "lowercase")]
    #[test_case("Root_CA_2" ; "mixed")]
    fn test_valid_names(name: &str) {
        validate_name(name).unwrap();
    }

    #[test_case("" ; "empty")]
    #[test_case("root ca" ; "space")]
    #[test_case("root-ca" ; "dash")]
    #[test_case("../root" ; "path")]
    fn test_invalid_names(name: &str) {
        assert!(matches!(
            validate_name(name),
            Err(StewardError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_serial_number_shape() {
        for _ in 0..100 {
            let serial = Authority::<RustCryptoProvider>::generate_serial_number();
            assert_eq!(serial.len(), SERIAL_NUMBER_LEN);
            assert_eq!(serial[0] & 0xC0, 0x40);
        }
    }

    #[test]
    fn test_read_without_any_id_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut authority = authority(dir.path());
        assert!(matches!(
            authority.read_sign_key(Some(PASSWORD), None),
            Err(StewardError::InvalidState(_))
        ));
        assert_eq!(authority.sign_key_state(), SignKeyState::Unloaded);
    }

    #[test]
    fn test_renew_does_not_promote() {
        let dir = tempfile::tempdir().unwrap();
        let authority = authority(dir.path());
        let id = authority.renew_sign_key(PASSWORD).unwrap();

        assert!(id.ends_with("-unit"));
        assert_eq!(id.len(), 8 + "-unit".len());
        assert_eq!(authority.current_sign_key_id(), None);
        assert_eq!(authority.sign_key_ids().unwrap(), vec![id.clone()]);

        let pem = authority.storage().sign_key_storage.get_string(&id).unwrap();
        assert_eq!(Key::pem_cipher(&pem).unwrap(), Some(Cipher::Aes128Cbc));
    }

    #[test]
    fn test_wrong_password_keeps_previous_key() {
        let dir = tempfile::tempdir().unwrap();
        let mut authority = authority(dir.path());
        let first = authority.renew_sign_key(PASSWORD).unwrap();
        let second = authority.renew_sign_key("other").unwrap();

        authority.read_sign_key(Some(PASSWORD), Some(&first)).unwrap();
        assert!(authority.read_sign_key(Some(PASSWORD), Some(&second)).is_err());

        assert_eq!(authority.current_sign_key_id(), Some(first.as_str()));
        assert_eq!(authority.sign_key_state(), SignKeyState::Loaded);
    }

    #[test]
    fn test_promote_clears_mismatched_cache() {
        let dir = tempfile::tempdir().unwrap();
        let mut authority = authority(dir.path());
        let first = authority.renew_sign_key(PASSWORD).unwrap();
        let second = authority.renew_sign_key(PASSWORD).unwrap();

        authority.read_sign_key(Some(PASSWORD), Some(&first)).unwrap();
        authority.promote_sign_key(&first).unwrap();
        assert_eq!(authority.sign_key_state(), SignKeyState::Loaded);

        authority.promote_sign_key(&second).unwrap();
        assert_eq!(authority.current_sign_key_id(), Some(second.as_str()));
        assert_eq!(authority.sign_key_state(), SignKeyState::Unloaded);

        authority.read_sign_key(Some(PASSWORD), None).unwrap();
        assert_eq!(authority.sign_key_state(), SignKeyState::Loaded);

        assert!(matches!(
            authority.promote_sign_key("00000000-unit"),
            Err(StewardError::MissingEntry { .. })
        ));
    }

    #[test]
    fn test_delete_current_key_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut authority = authority(dir.path());
        let current = authority.renew_sign_key(PASSWORD).unwrap();
        let old = authority.renew_sign_key(PASSWORD).unwrap();
        authority.promote_sign_key(&current).unwrap();

        assert!(matches!(
            authority.delete_sign_key(&current),
            Err(StewardError::InvalidState(_))
        ));
        authority.delete_sign_key(&old).unwrap();
        assert_eq!(authority.sign_key_ids().unwrap(), vec![current]);
    }

    #[test]
    fn test_public_only_key_cannot_issue() {
        let dir = tempfile::tempdir().unwrap();
        let mut authority = authority(dir.path());
        let private = RustCryptoProvider
            .generate_key_pair(KeyAlgorithm::Secp256r1)
            .unwrap();
        let public = Key::from_public(private.public_key()).unwrap();

        assert!(
            authority
                .import_sign_key(&Key::from_private(private).unwrap(), None)
                .is_err()
        );
        let id = authority.import_sign_key(&public, None).unwrap();
        authority.read_sign_key(None, Some(&id)).unwrap();
        assert_eq!(authority.sign_key_state(), SignKeyState::PublicOnly);

        let err = authority
            .generate_self_signed_cert(OffsetDateTime::now_utc())
            .unwrap_err();
        assert!(matches!(err, StewardError::InvalidState(_)));
    }

    #[test]
    fn test_misfiled_key_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let mut authority = authority(dir.path());
        let id = authority.renew_sign_key(PASSWORD).unwrap();
        let pem = authority.storage().sign_key_storage.get(&id).unwrap();
        authority
            .storage()
            .sign_key_storage
            .set("ABCDEF01-unit", &pem)
            .unwrap();

        assert!(matches!(
            authority.read_sign_key(Some(PASSWORD), Some("ABCDEF01-unit")),
            Err(StewardError::Storage { .. })
        ));
    }

    #[test]
    fn test_issued_certificate_carries_key_identifiers() {
        let dir = tempfile::tempdir().unwrap();
        let mut authority = authority(dir.path());
        let id = authority.renew_sign_key(PASSWORD).unwrap();
        authority.read_sign_key(Some(PASSWORD), Some(&id)).unwrap();

        let leaf = RustCryptoProvider
            .generate_key_pair(KeyAlgorithm::Secp256r1)
            .unwrap()
            .public_key();
        let template = CertificateTemplate::new(
            Subject::builder().common_name("leaf".to_string()).build(),
            Duration::days(1),
        )
        .unwrap();
        let begin = OffsetDateTime::now_utc();
        let cert_id = authority.generate_cert(&leaf, begin, &template).unwrap();

        let pem = authority.storage().cert_storage.get_string(&cert_id).unwrap();
        let cert = Certificate::from_pem(&pem).unwrap();
        assert_eq!(authority.cert_id(&cert), cert_id);
        assert_eq!(cert.issuer().unwrap(), *authority.subject());
        assert_eq!(cert.subject().unwrap(), *template.subject());

        let signer = authority.current_sign_key().unwrap().public_key();
        cert.verify_signed_by(&RustCryptoProvider, &signer).unwrap();

        let ski: SubjectKeyIdentifier = cert
            .extension(SubjectKeyIdentifier::OID)
            .unwrap()
            .to_extension()
            .unwrap();
        let aki: AuthorityKeyIdentifier = cert
            .extension(AuthorityKeyIdentifier::OID)
            .unwrap()
            .to_extension()
            .unwrap();
        assert_eq!(ski.key_identifier, RustCryptoProvider.key_identifier(&leaf).unwrap());
        assert_eq!(aki.key_identifier, RustCryptoProvider.key_identifier(&signer).unwrap());

        let validity = cert.validity();
        assert_eq!(validity.not_after - validity.not_before, Duration::days(1));
    }

    #[test]
    fn test_ca_csr_with_named_key() {
        let dir = tempfile::tempdir().unwrap();
        let authority = authority(dir.path());
        let id = authority.renew_sign_key(PASSWORD).unwrap();

        assert!(matches!(
            authority.generate_ca_csr(None, None),
            Err(StewardError::InvalidState(_))
        ));
        let csr_id = authority.generate_ca_csr(Some(&id), Some(PASSWORD)).unwrap();
        assert_eq!(csr_id, id);

        let pem = authority.storage().ca_csr_storage.get_string(&csr_id).unwrap();
        let csr = CertificateRequest::from_pem(&pem).unwrap();
        csr.verify_signature(&RustCryptoProvider).unwrap();
        assert_eq!(csr.subject().unwrap(), *authority.subject());
        assert_eq!(csr.extensions().unwrap(), authority.template().extensions());
        assert_eq!(authority.sign_key_state(), SignKeyState::Unloaded);
    }

    #[test]
    fn test_child_templates() {
        let dir = tempfile::tempdir().unwrap();
        let authority = authority(dir.path());
        let template = authority.template().clone();

        authority.set_child_template("server", &template).unwrap();
        authority.set_child_template("client", &template).unwrap();
        assert_eq!(
            authority.child_template_names().unwrap(),
            vec!["client".to_string(), "server".to_string()]
        );
        assert_eq!(authority.child_template("server").unwrap(), template);

        authority.delete_child_template("client").unwrap();
        assert!(matches!(
            authority.child_template("client"),
            Err(StewardError::MissingEntry { .. })
        ));
    }

    #[test]
    fn test_state_requires_existing_current_key() {
        let dir = tempfile::tempdir().unwrap();
        let authority = authority(dir.path());
        let mut state = authority.to_state();
        state.current_sign_key_id = Some("DEADBEEF-unit".to_string());
        assert!(matches!(
            Authority::from_state(state, RustCryptoProvider),
            Err(StewardError::InvalidState(_))
        ));
    }
}
