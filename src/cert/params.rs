use const_oid::ObjectIdentifier;
use der::asn1::OctetString;
use time::Duration;
use time::OffsetDateTime;

use super::extensions::ToAndFromX509Extension;
use crate::error::StewardError;

/// Certificate validity period.
///
/// This struct represents the `notBefore` and `notAfter` fields in a certificate.
///
/// # Fields
/// * `not_before` - The start of the validity period.
/// * `not_after` - The end of the validity period.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validity {
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

impl Validity {
    /// Creates a validity period of `duration` starting at `begin`.
    ///
    /// Both ends are truncated to whole seconds, the resolution X.509 times
    /// carry.
    pub fn starting_at(begin: OffsetDateTime, duration: Duration) -> Self {
        let not_before = truncate_to_seconds(begin);
        Self {
            not_before,
            not_after: not_before + Duration::seconds(duration.whole_seconds()),
        }
    }
}

fn truncate_to_seconds(t: OffsetDateTime) -> OffsetDateTime {
    t.replace_nanosecond(0).unwrap_or(t)
}

/// Represents an X.509 extension.
///
/// This struct contains the OID, criticality, and value of an extension.
///
/// # Fields
/// * `oid` - The object identifier of the extension.
/// * `critical` - Indicates if the extension is critical.
/// * `value` - The DER-encoded value of the extension.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExtensionParam {
    pub oid: ObjectIdentifier,
    pub critical: bool,
    /// DER-encoded extension value
    pub value: Vec<u8>,
}

impl ExtensionParam {
    /// Creates an `ExtensionParam` from a specific extension.
    ///
    /// # Arguments
    /// * `extension` - The extension to encode.
    /// * `critical` - Indicates if the extension is critical.
    pub fn from_extension<E: ToAndFromX509Extension>(
        extension: &E,
        critical: bool,
    ) -> Result<Self, StewardError> {
        Ok(Self {
            oid: E::OID,
            critical,
            value: extension.to_x509_extension_value()?,
        })
    }

    /// Decodes an `ExtensionParam` into a specific extension.
    pub fn to_extension<E: ToAndFromX509Extension>(&self) -> Result<E, StewardError> {
        if self.oid != E::OID {
            return Err(StewardError::InvalidInput(format!(
                "extension {} is not {}",
                self.oid,
                E::OID
            )));
        }
        E::from_x509_extension_value(&self.value)
    }

    pub fn to_x509(&self) -> Result<x509_cert::ext::Extension, StewardError> {
        Ok(x509_cert::ext::Extension {
            extn_id: self.oid,
            critical: self.critical,
            extn_value: OctetString::new(self.value.clone())?,
        })
    }

    pub fn from_x509(ext: &x509_cert::ext::Extension) -> Self {
        Self {
            oid: ext.extn_id,
            critical: ext.critical,
            value: ext.extn_value.as_bytes().to_vec(),
        }
    }
}
