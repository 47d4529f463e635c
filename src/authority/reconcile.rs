//! Comparison of the extensions a CSR requests with those a template
//! requires.

use std::collections::BTreeMap;
use std::fmt;

use const_oid::ObjectIdentifier;

use crate::cert::params::ExtensionParam;

/// One reason a certificate request cannot be issued as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    /// The request's self-signature does not verify.
    InvalidSignature,
    /// The request carries this extension more than once.
    DuplicateExtension(ObjectIdentifier),
    /// Both sides carry the extension with different values.
    ExtensionDiffers(ObjectIdentifier),
    /// The request carries an extension the template does not have.
    ExtensionNotPermitted(ObjectIdentifier),
    /// The template requires an extension the request does not carry.
    ExtensionMissing(ObjectIdentifier),
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::InvalidSignature => write!(f, "request signature does not verify"),
            Finding::DuplicateExtension(oid) => write!(f, "extension {oid} is requested twice"),
            Finding::ExtensionDiffers(oid) => {
                write!(f, "extension {oid} differs from the template")
            }
            Finding::ExtensionNotPermitted(oid) => {
                write!(f, "extension {oid} is not permitted by the template")
            }
            Finding::ExtensionMissing(oid) => {
                write!(f, "extension {oid} is required by the template but missing")
            }
        }
    }
}

/// Result of submitting a request for signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignCsrOutcome {
    /// A certificate was issued and stored under `id`.
    Issued { id: String },
    /// Nothing was issued; every problem found is listed.
    Rejected { findings: Vec<Finding> },
}

impl SignCsrOutcome {
    pub fn is_issued(&self) -> bool {
        matches!(self, SignCsrOutcome::Issued { .. })
    }
}

/// Diffs `requested` against `required`, keyed by OID.
///
/// Only the encoded values are compared; criticality is taken from the
/// template at issuance. Findings come grouped as duplicates, differing,
/// not permitted and missing, each group in OID order. An empty result means
/// the request matches.
pub fn reconcile(requested: &[ExtensionParam], required: &[ExtensionParam]) -> Vec<Finding> {
    let mut findings = Vec::new();

    let mut by_oid: BTreeMap<ObjectIdentifier, &ExtensionParam> = BTreeMap::new();
    let mut duplicated = Vec::new();
    for extension in requested {
        if by_oid.contains_key(&extension.oid) {
            if !duplicated.contains(&extension.oid) {
                duplicated.push(extension.oid);
            }
        } else {
            by_oid.insert(extension.oid, extension);
        }
    }
    duplicated.sort();
    findings.extend(duplicated.into_iter().map(Finding::DuplicateExtension));

    let expected: BTreeMap<ObjectIdentifier, &ExtensionParam> =
        required.iter().map(|e| (e.oid, e)).collect();

    let mut differs = Vec::new();
    let mut not_permitted = Vec::new();
    for (oid, extension) in &by_oid {
        match expected.get(oid) {
            Some(template) if template.value != extension.value => {
                differs.push(Finding::ExtensionDiffers(*oid))
            }
            Some(_) => {}
            None => not_permitted.push(Finding::ExtensionNotPermitted(*oid)),
        }
    }
    let missing = expected
        .keys()
        .filter(|oid| !by_oid.contains_key(*oid))
        .map(|oid| Finding::ExtensionMissing(*oid));

    findings.extend(differs);
    findings.extend(not_permitted);
    findings.extend(missing);
    findings
}
