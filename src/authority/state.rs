//! Persisted form of an [`Authority`](super::Authority).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::access::{AccessReport, FileAccess};
use crate::cert::template::CertificateTemplate;
use crate::error::{Result, StewardError};
use crate::key::KeyPolicy;
use crate::storage::FileStorage;

const CA_CSR_FOLDER: (&str, &str) = ("cacsr", "{id}.cacsr");
const CSR_FOLDER: (&str, &str) = ("csr", "{id}.csr");

/// The six folders an authority works with.
///
/// Documents without `caCsrStorage` or `csrStorage` load with those folders
/// placed next to the signing key folder, sharing the certificate folder's
/// access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "AuthorityStorageRepr")]
pub struct AuthorityStorage {
    /// Signing keys, encrypted with the key policy's cipher.
    pub sign_key_storage: FileStorage,
    /// Certificates for the authority's own keys.
    pub cacert_storage: FileStorage,
    /// Certificates issued to others.
    pub cert_storage: FileStorage,
    /// Requests the authority submits to a parent.
    pub ca_csr_storage: FileStorage,
    /// Requests received for signature.
    pub csr_storage: FileStorage,
    /// Named templates for issued certificates, as JSON.
    pub child_template_storage: FileStorage,
}

impl AuthorityStorage {
    /// Conventional layout below `root`, every folder sharing `access`.
    ///
    /// ```
    /// use certsteward::access::FileAccess;
    /// use certsteward::authority::AuthorityStorage;
    ///
    /// let access = FileAccess::current_user(0o640).unwrap();
    /// let storage = AuthorityStorage::under("/var/lib/ca", &access).unwrap();
    /// assert_eq!(
    ///     storage.sign_key_storage.path_of("0A1B2C3D-root").unwrap(),
    ///     std::path::Path::new("/var/lib/ca/private/0A1B2C3D-root.key")
    /// );
    /// ```
    pub fn under(root: impl AsRef<Path>, access: &FileAccess) -> Result<Self> {
        let root = root.as_ref();
        let store = |folder: &str, template: &str| {
            FileStorage::new(root.join(folder), template, access.clone())
        };
        Ok(Self {
            sign_key_storage: store("private", "{id}.key")?,
            cacert_storage: store("cacert", "{id}.cacert")?,
            cert_storage: store("cert", "{id}.crt")?,
            ca_csr_storage: store(CA_CSR_FOLDER.0, CA_CSR_FOLDER.1)?,
            csr_storage: store(CSR_FOLDER.0, CSR_FOLDER.1)?,
            child_template_storage: store("template", "{id}.template.json")?,
        })
    }

    pub fn all(&self) -> [&FileStorage; 6] {
        [
            &self.sign_key_storage,
            &self.cacert_storage,
            &self.cert_storage,
            &self.ca_csr_storage,
            &self.csr_storage,
            &self.child_template_storage,
        ]
    }

    /// Creates every folder; returns what had to be repaired.
    pub fn create(&self) -> Result<AccessReport> {
        self.merged(FileStorage::create)
    }

    pub fn check(&self) -> Result<AccessReport> {
        self.merged(FileStorage::check_folder)
    }

    pub fn update(&self) -> Result<AccessReport> {
        self.merged(FileStorage::update_folder)
    }

    fn merged<F>(&self, apply: F) -> Result<AccessReport>
    where
        F: Fn(&FileStorage) -> Result<AccessReport>,
    {
        let mut report = AccessReport::default();
        for storage in self.all() {
            report.merge(apply(storage)?);
        }
        Ok(report)
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthorityStorageRepr {
    sign_key_storage: FileStorage,
    cacert_storage: FileStorage,
    cert_storage: FileStorage,
    #[serde(default)]
    ca_csr_storage: Option<FileStorage>,
    #[serde(default)]
    csr_storage: Option<FileStorage>,
    child_template_storage: FileStorage,
}

impl TryFrom<AuthorityStorageRepr> for AuthorityStorage {
    type Error = StewardError;

    fn try_from(repr: AuthorityStorageRepr) -> Result<Self> {
        let key_folder = repr.sign_key_storage.folder();
        let root = key_folder.parent().unwrap_or(key_folder).to_path_buf();
        let access = repr.cert_storage.access().clone();
        let or_default = |storage: Option<FileStorage>, (folder, template): (&str, &str)| {
            match storage {
                Some(storage) => Ok(storage),
                None => FileStorage::new(root.join(folder), template, access.clone()),
            }
        };

        Ok(Self {
            ca_csr_storage: or_default(repr.ca_csr_storage, CA_CSR_FOLDER)?,
            csr_storage: or_default(repr.csr_storage, CSR_FOLDER)?,
            sign_key_storage: repr.sign_key_storage,
            cacert_storage: repr.cacert_storage,
            cert_storage: repr.cert_storage,
            child_template_storage: repr.child_template_storage,
        })
    }
}

/// JSON document describing an authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorityState {
    pub name: String,
    pub sign_key_policy: KeyPolicy,
    pub authority_template: CertificateTemplate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_sign_key_id: Option<String>,
    #[serde(flatten)]
    pub storage: AuthorityStorage,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::subject::Subject;
    use crate::key::{Cipher, KeyAlgorithm};
    use time::Duration;

    fn state(root: &Path) -> AuthorityState {
        let access = FileAccess::current_user(0o640).unwrap();
        AuthorityState {
            name: "root".to_string(),
            sign_key_policy: KeyPolicy::builder()
                .duration(Duration::days(365))
                .algorithm(KeyAlgorithm::Secp256r1)
                .cipher(Cipher::Aes256Cbc)
                .build()
                .unwrap(),
            authority_template: CertificateTemplate::new(
                Subject::builder().common_name("Root".to_string()).build(),
                Duration::days(3650),
            )
            .unwrap(),
            current_sign_key_id: None,
            storage: AuthorityStorage::under(root, &access).unwrap(),
        }
    }

    #[test]
    fn test_json_field_names() {
        let state = state(Path::new("/srv/ca"));
        let json = serde_json::to_value(&state).unwrap();
        let object = json.as_object().unwrap();
        let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "authorityTemplate",
                "caCsrStorage",
                "cacertStorage",
                "certStorage",
                "childTemplateStorage",
                "csrStorage",
                "name",
                "signKeyPolicy",
                "signKeyStorage",
            ]
        );
        assert_eq!(json["certStorage"]["folder"], "/srv/ca/cert");
        assert_eq!(json["certStorage"]["nameTemplate"], "{id}.crt");
        assert_eq!(json["certStorage"]["access"]["mode"], "0o640");

        let back: AuthorityState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn test_request_storages_default_next_to_keys() {
        let state = state(Path::new("/srv/ca"));
        let mut json = serde_json::to_value(&state).unwrap();
        let object = json.as_object_mut().unwrap();
        object.remove("caCsrStorage");
        object.remove("csrStorage");

        let back: AuthorityState = serde_json::from_value(json).unwrap();
        assert_eq!(back.storage.ca_csr_storage.folder(), Path::new("/srv/ca/cacsr"));
        assert_eq!(back.storage.csr_storage.folder(), Path::new("/srv/ca/csr"));
        assert_eq!(back, state);
    }

    #[test]
    fn test_create_all_folders() {
        let dir = tempfile::tempdir().unwrap();
        let storage = state(dir.path()).storage;
        storage.create().unwrap();
        for store in storage.all() {
            assert!(store.folder().is_dir());
        }
        assert!(storage.check().unwrap().is_valid());
    }
}
