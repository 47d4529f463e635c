//! Ownership and permission policy for credential artifacts.
//!
//! A [`FileAccess`] describes who must own an artifact and which of the nine
//! Unix permission bits it must carry. Directories get the same policy with
//! the execute bit added wherever the read bit is granted, so that a readable
//! directory can also be traversed.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use nix::unistd::{Gid, Group, Uid, User};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, StewardError};

/// Recursion depth used when the caller does not bound it.
pub const UNBOUNDED_DEPTH: u32 = 255;

/// One of the nine permission bits of a Unix mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModeBit {
    OtherExecute,
    OtherWrite,
    OtherRead,
    GroupExecute,
    GroupWrite,
    GroupRead,
    OwnerExecute,
    OwnerWrite,
    OwnerRead,
}

impl ModeBit {
    /// All bits, lowest first.
    pub const ALL: [ModeBit; 9] = [
        ModeBit::OtherExecute,
        ModeBit::OtherWrite,
        ModeBit::OtherRead,
        ModeBit::GroupExecute,
        ModeBit::GroupWrite,
        ModeBit::GroupRead,
        ModeBit::OwnerExecute,
        ModeBit::OwnerWrite,
        ModeBit::OwnerRead,
    ];

    /// The bit as a mode mask.
    pub fn mask(self) -> u32 {
        1 << (self as u32)
    }
}

/// A single way in which a path deviates from its [`FileAccess`] policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AccessMismatch {
    /// The owning user is wrong.
    User,
    /// The owning group is wrong.
    Group,
    /// This permission bit differs from the expected mode.
    Mode(ModeBit),
}

/// Outcome of checking (or repairing) a path against a [`FileAccess`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessReport {
    errors: BTreeMap<PathBuf, Vec<AccessMismatch>>,
}

impl AccessReport {
    /// Whether every checked path matched the policy.
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Mismatches per offending path.
    pub fn errors(&self) -> &BTreeMap<PathBuf, Vec<AccessMismatch>> {
        &self.errors
    }

    /// Mismatches for one path, if any.
    pub fn errors_for(&self, path: &Path) -> Option<&[AccessMismatch]> {
        self.errors.get(path).map(Vec::as_slice)
    }

    pub(crate) fn merge(&mut self, other: AccessReport) {
        for (path, mismatches) in other.errors {
            self.errors.entry(path).or_default().extend(mismatches);
        }
    }

    fn record(&mut self, path: &Path, mismatches: Vec<AccessMismatch>) {
        if !mismatches.is_empty() {
            self.errors
                .entry(path.to_path_buf())
                .or_default()
                .extend(mismatches);
        }
    }
}

/// Returns the bits on which `actual` and `expected` differ.
pub fn mode_mismatches(actual: u32, expected: u32) -> Vec<AccessMismatch> {
    let diff = (actual ^ expected) & 0o777;
    ModeBit::ALL
        .into_iter()
        .filter(|bit| diff & bit.mask() != 0)
        .map(AccessMismatch::Mode)
        .collect()
}

/// Derives the directory mode from a file mode: read implies traverse.
pub fn directory_mode(mode: u32) -> u32 {
    let mut exec = 0;
    if mode & 0o004 != 0 {
        exec |= 0o001;
    }
    if mode & 0o040 != 0 {
        exec |= 0o010;
    }
    if mode & 0o400 != 0 {
        exec |= 0o100;
    }
    (mode | exec) & 0o777
}

/// Ownership and permission descriptor applied to every stored artifact.
///
/// The user and group names are resolved to numeric ids once, at
/// construction; an unknown name is a configuration error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "FileAccessRepr", into = "FileAccessRepr")]
pub struct FileAccess {
    user: String,
    group: String,
    uid: u32,
    gid: u32,
    mode: u32,
}

impl FileAccess {
    /// Builds a policy for the named user and group with a 9-bit `mode`.
    pub fn new(user: &str, group: &str, mode: u32) -> Result<Self> {
        check_mode(mode)?;
        let resolved_user = User::from_name(user)
            .map_err(|e| StewardError::InvalidConfig(format!("cannot look up user {user}: {e}")))?
            .ok_or_else(|| StewardError::InvalidConfig(format!("unknown user {user}")))?;
        let resolved_group = Group::from_name(group)
            .map_err(|e| {
                StewardError::InvalidConfig(format!("cannot look up group {group}: {e}"))
            })?
            .ok_or_else(|| StewardError::InvalidConfig(format!("unknown group {group}")))?;
        Ok(Self {
            user: resolved_user.name,
            group: resolved_group.name,
            uid: resolved_user.uid.as_raw(),
            gid: resolved_group.gid.as_raw(),
            mode,
        })
    }

    /// Builds a policy owned by the user and primary group of this process.
    pub fn current_user(mode: u32) -> Result<Self> {
        check_mode(mode)?;
        let uid = Uid::effective();
        let gid = Gid::effective();
        let user = User::from_uid(uid)
            .map_err(|e| StewardError::InvalidConfig(format!("cannot look up uid {uid}: {e}")))?
            .ok_or_else(|| StewardError::InvalidConfig(format!("no user for uid {uid}")))?;
        let group = Group::from_gid(gid)
            .map_err(|e| StewardError::InvalidConfig(format!("cannot look up gid {gid}: {e}")))?
            .ok_or_else(|| StewardError::InvalidConfig(format!("no group for gid {gid}")))?;
        Ok(Self {
            user: user.name,
            group: group.name,
            uid: uid.as_raw(),
            gid: gid.as_raw(),
            mode,
        })
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    /// Mode applied to files.
    pub fn mode(&self) -> u32 {
        self.mode
    }

    /// Mode applied to directories.
    pub fn dir_mode(&self) -> u32 {
        directory_mode(self.mode)
    }

    /// Checks `path` against the policy.
    ///
    /// `max_depth` bounds the recursion into directories: `Some(0)` checks
    /// only `path`, `None` recurses up to [`UNBOUNDED_DEPTH`] levels.
    /// Fails if `path` does not exist.
    pub fn check_access(&self, path: &Path, max_depth: Option<u32>) -> Result<AccessReport> {
        let depth = max_depth.unwrap_or(UNBOUNDED_DEPTH).min(UNBOUNDED_DEPTH);
        let mut report = AccessReport::default();
        self.check_path(path, depth, &mut report)?;
        Ok(report)
    }

    fn check_path(&self, path: &Path, depth: u32, report: &mut AccessReport) -> Result<()> {
        let metadata = fs::metadata(path).map_err(|e| StewardError::io(path, e))?;

        let mut mismatches = Vec::new();
        if metadata.uid() != self.uid {
            mismatches.push(AccessMismatch::User);
        }
        if metadata.gid() != self.gid {
            mismatches.push(AccessMismatch::Group);
        }

        let actual = metadata.permissions().mode() & 0o777;
        if metadata.is_dir() {
            mismatches.extend(mode_mismatches(actual, self.dir_mode()));
            report.record(path, mismatches);

            if depth > 0 {
                let entries = fs::read_dir(path).map_err(|e| StewardError::io(path, e))?;
                for entry in entries {
                    let entry = entry.map_err(|e| StewardError::io(path, e))?;
                    self.check_path(&entry.path(), depth - 1, report)?;
                }
            }
        } else {
            mismatches.extend(mode_mismatches(actual, self.mode));
            report.record(path, mismatches);
        }
        Ok(())
    }

    /// Repairs every path that [`check_access`](Self::check_access) reports.
    ///
    /// Returns the report of what was wrong before the repair. A failed
    /// `chown` or `chmod` is an error.
    pub fn update_access(&self, path: &Path, max_depth: Option<u32>) -> Result<AccessReport> {
        let report = self.check_access(path, max_depth)?;

        for (target, mismatches) in report.errors() {
            let wrong_owner = mismatches
                .iter()
                .any(|m| matches!(m, AccessMismatch::User | AccessMismatch::Group));
            let wrong_mode = mismatches
                .iter()
                .any(|m| matches!(m, AccessMismatch::Mode(_)));

            warn!(path = %target.display(), ?mismatches, "repairing access");

            if wrong_owner {
                std::os::unix::fs::chown(target, Some(self.uid), Some(self.gid))
                    .map_err(|e| StewardError::io(target, e))?;
            }
            if wrong_mode {
                let mode = if target.is_dir() {
                    self.dir_mode()
                } else {
                    self.mode
                };
                fs::set_permissions(target, fs::Permissions::from_mode(mode))
                    .map_err(|e| StewardError::io(target, e))?;
                debug!(path = %target.display(), mode = format!("{mode:o}"), "mode applied");
            }
        }
        Ok(report)
    }
}

impl fmt::Display for FileAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},0o{:o}", self.user, self.group, self.mode)
    }
}

fn check_mode(mode: u32) -> Result<()> {
    if mode > 0o777 {
        return Err(StewardError::InvalidConfig(format!(
            "mode 0o{mode:o} is not a 9-bit permission mask"
        )));
    }
    Ok(())
}

/// Parses an octal mode written as `0o640`, `0640` or `640`.
pub fn parse_octal_mode(text: &str) -> Result<u32> {
    let digits = text.strip_prefix("0o").unwrap_or(text);
    let mode = u32::from_str_radix(digits, 8)
        .map_err(|e| StewardError::InvalidConfig(format!("invalid mode {text}: {e}")))?;
    check_mode(mode)?;
    Ok(mode)
}

#[derive(Serialize, Deserialize)]
struct FileAccessRepr {
    user: String,
    group: String,
    mode: String,
}

impl TryFrom<FileAccessRepr> for FileAccess {
    type Error = StewardError;

    fn try_from(repr: FileAccessRepr) -> Result<Self> {
        FileAccess::new(&repr.user, &repr.group, parse_octal_mode(&repr.mode)?)
    }
}

impl From<FileAccess> for FileAccessRepr {
    fn from(access: FileAccess) -> Self {
        FileAccessRepr {
            user: access.user,
            group: access.group,
            mode: format!("0o{:o}", access.mode),
        }
    }
}
