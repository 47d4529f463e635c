//! Identifier-addressed artifact storage.
//!
//! A [`FileStorage`] maps identifiers to files inside one folder through a
//! [`NameTemplate`] such as `{id}.key.pem`. Every file whose name matches the
//! template is an entry; anything else in the folder is ignored. Permission
//! upkeep is delegated to the storage's [`FileAccess`].

use std::fmt;
use std::fs::{self, DirBuilder, OpenOptions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::access::{AccessReport, FileAccess};
use crate::error::{Result, StewardError};

const PLACEHOLDER: &str = "{id}";

/// File naming scheme with exactly one `{id}` placeholder.
#[derive(Debug, Clone)]
pub struct NameTemplate {
    template: String,
    prefix: String,
    suffix: String,
    pattern: Regex,
}

impl NameTemplate {
    pub fn new(template: &str) -> Result<Self> {
        if template.matches(PLACEHOLDER).count() != 1 {
            return Err(StewardError::InvalidConfig(format!(
                "name template {template:?} must contain exactly one {PLACEHOLDER} placeholder"
            )));
        }
        if template.contains('/') {
            return Err(StewardError::InvalidConfig(format!(
                "name template {template:?} must not contain a path separator"
            )));
        }
        let (prefix, suffix) = template
            .split_once(PLACEHOLDER)
            .ok_or_else(|| StewardError::InvalidConfig(format!("bad name template {template:?}")))?;
        let pattern = Regex::new(&format!(
            "^{}(.+){}$",
            regex::escape(prefix),
            regex::escape(suffix)
        ))
        .map_err(|e| StewardError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            template: template.to_string(),
            prefix: prefix.to_string(),
            suffix: suffix.to_string(),
            pattern,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.template
    }

    /// File name for `id`.
    pub fn file_name(&self, id: &str) -> Result<String> {
        if id.is_empty() || id.contains('/') || id == "." || id == ".." {
            return Err(StewardError::InvalidInput(format!(
                "{id:?} is not a valid storage identifier"
            )));
        }
        Ok(format!("{}{id}{}", self.prefix, self.suffix))
    }

    /// Extracts the identifier from a matching file name.
    pub fn identifier<'a>(&self, file_name: &'a str) -> Option<&'a str> {
        self.pattern
            .captures(file_name)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }
}

impl PartialEq for NameTemplate {
    fn eq(&self, other: &Self) -> bool {
        self.template == other.template
    }
}

impl Eq for NameTemplate {}

impl fmt::Display for NameTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.template)
    }
}

impl Serialize for NameTemplate {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.template)
    }
}

impl<'de> Deserialize<'de> for NameTemplate {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        NameTemplate::new(&text).map_err(serde::de::Error::custom)
    }
}

/// A folder of artifacts addressed by identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStorage {
    folder: PathBuf,
    name_template: NameTemplate,
    access: FileAccess,
}

impl FileStorage {
    pub fn new(folder: impl Into<PathBuf>, name_template: &str, access: FileAccess) -> Result<Self> {
        Ok(Self {
            folder: folder.into(),
            name_template: NameTemplate::new(name_template)?,
            access,
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn name_template(&self) -> &NameTemplate {
        &self.name_template
    }

    pub fn access(&self) -> &FileAccess {
        &self.access
    }

    /// Path of the file backing `id`, whether or not it exists.
    pub fn path_of(&self, id: &str) -> Result<PathBuf> {
        Ok(self.folder.join(self.name_template.file_name(id)?))
    }

    /// Identifiers of every matching entry, sorted.
    pub fn ids(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.folder).map_err(|e| StewardError::io(&self.folder, e))?;
        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StewardError::io(&self.folder, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(id) = self.name_template.identifier(name) {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    pub fn contains(&self, id: &str) -> Result<bool> {
        Ok(self.path_of(id)?.is_file())
    }

    pub fn get(&self, id: &str) -> Result<Vec<u8>> {
        let path = self.path_of(id)?;
        if !path.is_file() {
            return Err(self.missing(id));
        }
        fs::read(&path).map_err(|e| StewardError::io(&path, e))
    }

    /// Reads an entry as UTF-8 text.
    pub fn get_string(&self, id: &str) -> Result<String> {
        let bytes = self.get(id)?;
        String::from_utf8(bytes).map_err(|e| StewardError::Storage {
            path: self.folder.join(self.name_template.as_str().replace(PLACEHOLDER, id)),
            message: format!("entry is not UTF-8: {e}"),
        })
    }

    /// Creates or replaces the entry for `id`.
    ///
    /// The file is first truncated to zero bytes and stamped with the
    /// storage's ownership and mode; content is written only afterwards.
    pub fn set(&self, id: &str, content: &[u8]) -> Result<()> {
        let path = self.path_of(id)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(self.access.mode())
            .open(&path)
            .map_err(|e| StewardError::io(&path, e))?;

        self.access.update_access(&path, Some(0))?;

        file.write_all(content)
            .map_err(|e| StewardError::io(&path, e))?;
        file.sync_all().map_err(|e| StewardError::io(&path, e))?;

        debug!(path = %path.display(), bytes = content.len(), "entry written");
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let path = self.path_of(id)?;
        if !path.is_file() {
            return Err(self.missing(id));
        }
        fs::remove_file(&path).map_err(|e| StewardError::io(&path, e))?;
        debug!(path = %path.display(), "entry deleted");
        Ok(())
    }

    /// Creates the folder with the directory mode and stamps it and every
    /// existing entry.
    pub fn create(&self) -> Result<AccessReport> {
        if !self.folder.exists() {
            DirBuilder::new()
                .recursive(true)
                .mode(self.access.dir_mode())
                .create(&self.folder)
                .map_err(|e| StewardError::io(&self.folder, e))?;
            info!(folder = %self.folder.display(), "storage folder created");
        } else if !self.folder.is_dir() {
            return Err(StewardError::Storage {
                path: self.folder.clone(),
                message: "storage folder exists and is not a directory".to_string(),
            });
        }
        self.update_folder()
    }

    /// Checks the folder and each entry at depth 0.
    pub fn check_folder(&self) -> Result<AccessReport> {
        self.for_folder_and_entries(|path| self.access.check_access(path, Some(0)))
    }

    /// Repairs the folder and each entry at depth 0; returns what was wrong.
    pub fn update_folder(&self) -> Result<AccessReport> {
        self.for_folder_and_entries(|path| self.access.update_access(path, Some(0)))
    }

    fn for_folder_and_entries<F>(&self, mut apply: F) -> Result<AccessReport>
    where
        F: FnMut(&Path) -> Result<AccessReport>,
    {
        let mut report = apply(&self.folder)?;
        for id in self.ids()? {
            report.merge(apply(&self.path_of(&id)?)?);
        }
        Ok(report)
    }

    fn missing(&self, id: &str) -> StewardError {
        StewardError::MissingEntry {
            id: id.to_string(),
            folder: self.folder.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use test_case::test_case;

    fn storage(dir: &Path, template: &str, mode: u32) -> FileStorage {
        let access = FileAccess::current_user(mode).unwrap();
        FileStorage::new(dir.join("store"), template, access).unwrap()
    }

    fn mode_of(path: &Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    #[test_case("{id}.pem" ; "suffix only")]
    #[test_case("key-{id}.pem" ; "prefix and suffix")]
    #[test_case("{id}" ; "bare")]
    fn test_valid_name_templates(template: &str) {
        let t = NameTemplate::new(template).unwrap();
        let name = t.file_name("ABCD1234-root").unwrap();
        assert_eq!(t.identifier(&name), Some("ABCD1234-root"));
    }

    #[test_case("static.pem" ; "no placeholder")]
    #[test_case("{id}-{id}.pem" ; "two placeholders")]
    #[test_case("sub/{id}.pem" ; "path separator")]
    fn test_invalid_name_templates(template: &str) {
        assert!(matches!(
            NameTemplate::new(template),
            Err(StewardError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_identifier_ignores_other_files() {
        let t = NameTemplate::new("{id}.key.pem").unwrap();
        assert_eq!(t.identifier("A-root.key.pem"), Some("A-root"));
        assert_eq!(t.identifier("A-root.crt.pem"), None);
        assert_eq!(t.identifier(".key.pem"), None);
        assert_eq!(t.identifier("A-root.KEY.PEM"), None);
        assert!(t.file_name("../escape").is_err());
        assert!(t.file_name("").is_err());
    }

    #[test]
    fn test_set_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(dir.path(), "{id}.pem", 0o600);
        store.create().unwrap();

        store.set("b", b"second").unwrap();
        store.set("a", b"first").unwrap();
        fs::write(store.folder().join("notes.txt"), b"ignored").unwrap();

        assert_eq!(store.ids().unwrap(), vec!["a", "b"]);
        assert_eq!(store.get("a").unwrap(), b"first");
        assert_eq!(mode_of(&store.path_of("a").unwrap()), 0o600);

        store.set("a", b"1").unwrap();
        assert_eq!(store.get_string("a").unwrap(), "1");

        store.delete("a").unwrap();
        assert!(matches!(
            store.get("a"),
            Err(StewardError::MissingEntry { .. })
        ));
        assert!(matches!(
            store.delete("a"),
            Err(StewardError::MissingEntry { .. })
        ));
        assert_eq!(store.ids().unwrap(), vec!["b"]);
    }

    #[test]
    fn test_set_restamps_loose_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(dir.path(), "{id}.key", 0o600);
        store.create().unwrap();
        let path = store.path_of("k").unwrap();
        fs::write(&path, b"old").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o666)).unwrap();

        store.set("k", b"secret").unwrap();
        assert_eq!(mode_of(&path), 0o600);
        assert_eq!(store.get("k").unwrap(), b"secret");
    }

    #[test]
    fn test_create_uses_directory_mode() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(dir.path(), "{id}.crt", 0o640);
        store.create().unwrap();
        assert_eq!(mode_of(store.folder()), 0o750);
        assert!(store.check_folder().unwrap().is_valid());
    }

    #[test]
    fn test_update_folder_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(dir.path(), "{id}.crt", 0o640);
        store.create().unwrap();
        store.set("x", b"x").unwrap();
        let entry = store.path_of("x").unwrap();
        fs::set_permissions(&entry, fs::Permissions::from_mode(0o606)).unwrap();
        fs::set_permissions(store.folder(), fs::Permissions::from_mode(0o777)).unwrap();

        assert!(!store.check_folder().unwrap().is_valid());
        let first = store.update_folder().unwrap();
        assert!(first.errors_for(&entry).is_some());
        assert!(first.errors_for(store.folder()).is_some());

        let second = store.update_folder().unwrap();
        assert!(second.is_valid());
    }

    #[test]
    fn test_check_folder_skips_non_matching_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(dir.path(), "{id}.crt", 0o600);
        store.create().unwrap();
        let stray = store.folder().join("README");
        fs::write(&stray, b"hello").unwrap();
        fs::set_permissions(&stray, fs::Permissions::from_mode(0o644)).unwrap();

        assert!(store.check_folder().unwrap().is_valid());
    }

    #[test]
    fn test_create_rejects_file_in_place_of_folder() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(dir.path(), "{id}.crt", 0o600);
        fs::write(store.folder(), b"").unwrap();
        assert!(matches!(
            store.create(),
            Err(StewardError::Storage { .. })
        ));
    }

    #[test]
    fn test_serde_shape() {
        let dir = tempfile::tempdir().unwrap();
        let store = storage(dir.path(), "{id}.csr.pem", 0o640);
        let json = serde_json::to_value(&store).unwrap();
        assert_eq!(json["nameTemplate"], "{id}.csr.pem");
        assert_eq!(json["access"]["mode"], "0o640");
        let back: FileStorage = serde_json::from_value(json).unwrap();
        assert_eq!(back, store);

        let bad = serde_json::json!({
            "folder": "/tmp/x",
            "nameTemplate": "fixed.pem",
            "access": {"user": "root", "group": "root", "mode": "0o600"},
        });
        assert!(serde_json::from_value::<FileStorage>(bad).is_err());
    }
}
