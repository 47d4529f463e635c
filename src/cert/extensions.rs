use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use const_oid::AssociatedOid;
use der::{
    Decode, Encode,
    asn1::{Ia5String, OctetString},
    oid::ObjectIdentifier,
};
use x509_cert::ext::pkix::name::GeneralName;

use crate::error::StewardError;

/// Trait for converting to and from X.509 extensions.
///
/// This trait provides methods to encode and decode X.509 extension values.
///
/// # Example
/// ```
/// use certsteward::cert::extensions::{AltName, SubjectAltName, ToAndFromX509Extension};
/// let san = SubjectAltName { names: vec![AltName::Dns("example.com".to_string())] };
/// let encoded = san.to_x509_extension_value().unwrap();
/// let decoded = SubjectAltName::from_x509_extension_value(&encoded).unwrap();
/// assert_eq!(san.names, decoded.names);
/// ```
pub trait ToAndFromX509Extension {
    /// The Object Identifier (OID) for the extension.
    const OID: ObjectIdentifier;

    /// Encodes the extension into a DER-encoded byte vector.
    fn to_x509_extension_value(&self) -> Result<Vec<u8>, StewardError>;

    /// Decodes the extension from a DER-encoded byte slice.
    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, StewardError>
    where
        Self: Sized;
}

/// One entry of a Subject Alternative Name.
///
/// The textual form is `DNS:<name>`, `EMAIL:<address>`, `URI:<uri>` or
/// `IP:<address>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AltName {
    Dns(String),
    Email(String),
    Uri(String),
    Ip(IpAddr),
}

impl AltName {
    fn to_general_name(&self) -> Result<GeneralName, StewardError> {
        let ia5 = |s: &str| {
            Ia5String::new(s).map_err(|e| StewardError::InvalidInput(format!("{s}: {e}")))
        };
        Ok(match self {
            AltName::Dns(name) => GeneralName::DnsName(ia5(name)?),
            AltName::Email(address) => GeneralName::Rfc822Name(ia5(address)?),
            AltName::Uri(uri) => GeneralName::UniformResourceIdentifier(ia5(uri)?),
            AltName::Ip(ip) => {
                let octets = match ip {
                    IpAddr::V4(v4) => v4.octets().to_vec(),
                    IpAddr::V6(v6) => v6.octets().to_vec(),
                };
                GeneralName::IpAddress(OctetString::new(octets)?)
            }
        })
    }

    fn from_general_name(name: &GeneralName) -> Result<Self, StewardError> {
        match name {
            GeneralName::DnsName(dns) => Ok(AltName::Dns(dns.to_string())),
            GeneralName::Rfc822Name(email) => Ok(AltName::Email(email.to_string())),
            GeneralName::UniformResourceIdentifier(uri) => Ok(AltName::Uri(uri.to_string())),
            GeneralName::IpAddress(octets) => {
                let bytes = octets.as_bytes();
                let ip = match bytes.len() {
                    4 => {
                        let mut v4 = [0u8; 4];
                        v4.copy_from_slice(bytes);
                        IpAddr::from(v4)
                    }
                    16 => {
                        let mut v6 = [0u8; 16];
                        v6.copy_from_slice(bytes);
                        IpAddr::from(v6)
                    }
                    n => {
                        return Err(StewardError::DecodingError(format!(
                            "IP address of {n} bytes"
                        )));
                    }
                };
                Ok(AltName::Ip(ip))
            }
            _ => Err(StewardError::InvalidInput(
                "Unsupported general name type".to_string(),
            )),
        }
    }
}

impl fmt::Display for AltName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AltName::Dns(name) => write!(f, "DNS:{name}"),
            AltName::Email(address) => write!(f, "EMAIL:{address}"),
            AltName::Uri(uri) => write!(f, "URI:{uri}"),
            AltName::Ip(ip) => write!(f, "IP:{ip}"),
        }
    }
}

impl FromStr for AltName {
    type Err = StewardError;

    fn from_str(s: &str) -> Result<Self, StewardError> {
        let (kind, value) = s.split_once(':').ok_or_else(|| {
            StewardError::InvalidConfig(format!("alternative name {s:?} has no type prefix"))
        })?;
        match kind.to_ascii_uppercase().as_str() {
            "DNS" => Ok(AltName::Dns(value.to_string())),
            "EMAIL" => Ok(AltName::Email(value.to_string())),
            "URI" => Ok(AltName::Uri(value.to_string())),
            "IP" => value
                .parse()
                .map(AltName::Ip)
                .map_err(|e| StewardError::InvalidConfig(format!("{value}: {e}"))),
            other => Err(StewardError::InvalidConfig(format!(
                "unsupported alternative name type {other}"
            ))),
        }
    }
}

/// Represents the Subject Alternative Name (SAN) extension.
///
/// This extension specifies additional identities for the subject of the certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectAltName {
    pub names: Vec<AltName>,
}

impl ToAndFromX509Extension for SubjectAltName {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::SubjectAltName::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, StewardError> {
        let san = x509_cert::ext::pkix::SubjectAltName(
            self.names
                .iter()
                .map(AltName::to_general_name)
                .collect::<Result<Vec<_>, _>>()?,
        );

        Ok(san.to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, StewardError> {
        let san = x509_cert::ext::pkix::SubjectAltName::from_der(extension)?;
        let names = san
            .0
            .iter()
            .map(AltName::from_general_name)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { names })
    }
}

/// Represents the Basic Constraints extension.
///
/// This extension indicates whether the certificate is a CA certificate and its path length.
///
/// # Fields
/// * `is_ca` - Indicates if the certificate is a CA.
/// * `max_path_length` - The maximum number of intermediate CAs allowed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BasicConstraints {
    pub is_ca: bool,
    pub max_path_length: Option<u8>,
}

impl ToAndFromX509Extension for BasicConstraints {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::BasicConstraints::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, StewardError> {
        let bc = x509_cert::ext::pkix::BasicConstraints {
            ca: self.is_ca,
            path_len_constraint: self.max_path_length,
        };

        Ok(bc.to_der()?)
    }

    fn from_x509_extension_value(der_bytes: &[u8]) -> Result<Self, StewardError> {
        let bc = x509_cert::ext::pkix::BasicConstraints::from_der(der_bytes)?;
        Ok(Self {
            is_ca: bc.ca,
            max_path_length: bc.path_len_constraint,
        })
    }
}

pub use der::flagset::FlagSet;
use x509_cert::ext::pkix::KeyUsage as X509KeyUsage;
pub use x509_cert::ext::pkix::KeyUsages;

const KEY_USAGE_NAMES: [(KeyUsages, &str); 9] = [
    (KeyUsages::DigitalSignature, "digitalSignature"),
    (KeyUsages::NonRepudiation, "nonRepudiation"),
    (KeyUsages::KeyEncipherment, "keyEncipherment"),
    (KeyUsages::DataEncipherment, "dataEncipherment"),
    (KeyUsages::KeyAgreement, "keyAgreement"),
    (KeyUsages::KeyCertSign, "keyCertSign"),
    (KeyUsages::CRLSign, "cRLSign"),
    (KeyUsages::EncipherOnly, "encipherOnly"),
    (KeyUsages::DecipherOnly, "decipherOnly"),
];

/// Represents the Key Usage extension.
///
/// This extension defines the purpose of the key contained in the certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyUsage(pub FlagSet<KeyUsages>);

impl KeyUsage {
    /// Names of the set flags, in bit order.
    pub fn names(&self) -> Vec<&'static str> {
        KEY_USAGE_NAMES
            .iter()
            .filter(|(flag, _)| self.0.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }

    /// Builds the flag set from usage names such as `keyCertSign`.
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, StewardError> {
        let mut flags: FlagSet<KeyUsages> = FlagSet::empty();
        for name in names {
            let name = name.as_ref();
            let (flag, _) = KEY_USAGE_NAMES
                .iter()
                .find(|(_, known)| known.eq_ignore_ascii_case(name))
                .ok_or_else(|| StewardError::InvalidConfig(format!("unknown key usage {name}")))?;
            flags |= *flag;
        }
        Ok(Self(flags))
    }
}

impl ToAndFromX509Extension for KeyUsage {
    const OID: ObjectIdentifier = <X509KeyUsage as AssociatedOid>::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, StewardError> {
        let ku = X509KeyUsage::from(self.0);
        Ok(ku.to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, StewardError> {
        let ku = X509KeyUsage::from_der(extension)?;
        Ok(Self(ku.0))
    }
}

/// Represents the Extended Key Usage extension.
///
/// This extension indicates purposes for which the public key may be used.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendedKeyUsage {
    pub usage: Vec<ExtendedKeyUsageOption>,
}

impl ToAndFromX509Extension for ExtendedKeyUsage {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::ExtendedKeyUsage::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, StewardError> {
        let oids: Vec<ObjectIdentifier> = self.usage.iter().map(|v| (*v).into()).collect();
        let eku = x509_cert::ext::pkix::ExtendedKeyUsage(oids);
        Ok(eku.to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, StewardError> {
        let eku = x509_cert::ext::pkix::ExtendedKeyUsage::from_der(extension)?;
        let usage = eku
            .0
            .iter()
            .map(|v| {
                ExtendedKeyUsageOption::ALL
                    .into_iter()
                    .find(|option| ObjectIdentifier::from(*option) == *v)
                    .ok_or_else(|| {
                        StewardError::InvalidInput(format!(
                            "Unsupported extended key usage option {v}"
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { usage })
    }
}

/// Represents an option for the Extended Key Usage extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExtendedKeyUsageOption {
    ServerAuth,
    ClientAuth,
    CodeSigning,
    EmailProtection,
    TimeStamping,
    OcspSigning,
}

impl ExtendedKeyUsageOption {
    pub const ALL: [ExtendedKeyUsageOption; 6] = [
        ExtendedKeyUsageOption::ServerAuth,
        ExtendedKeyUsageOption::ClientAuth,
        ExtendedKeyUsageOption::CodeSigning,
        ExtendedKeyUsageOption::EmailProtection,
        ExtendedKeyUsageOption::TimeStamping,
        ExtendedKeyUsageOption::OcspSigning,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExtendedKeyUsageOption::ServerAuth => "serverAuth",
            ExtendedKeyUsageOption::ClientAuth => "clientAuth",
            ExtendedKeyUsageOption::CodeSigning => "codeSigning",
            ExtendedKeyUsageOption::EmailProtection => "emailProtection",
            ExtendedKeyUsageOption::TimeStamping => "timeStamping",
            ExtendedKeyUsageOption::OcspSigning => "OCSPSigning",
        }
    }
}

impl FromStr for ExtendedKeyUsageOption {
    type Err = StewardError;

    fn from_str(s: &str) -> Result<Self, StewardError> {
        ExtendedKeyUsageOption::ALL
            .into_iter()
            .find(|option| option.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| StewardError::InvalidConfig(format!("unknown extended key usage {s}")))
    }
}

impl From<ExtendedKeyUsageOption> for ObjectIdentifier {
    fn from(value: ExtendedKeyUsageOption) -> Self {
        match value {
            ExtendedKeyUsageOption::OcspSigning => const_oid::db::rfc5912::ID_KP_OCSP_SIGNING,
            ExtendedKeyUsageOption::ServerAuth => const_oid::db::rfc5912::ID_KP_SERVER_AUTH,
            ExtendedKeyUsageOption::ClientAuth => const_oid::db::rfc5912::ID_KP_CLIENT_AUTH,
            ExtendedKeyUsageOption::CodeSigning => const_oid::db::rfc5912::ID_KP_CODE_SIGNING,
            ExtendedKeyUsageOption::EmailProtection => {
                const_oid::db::rfc5912::ID_KP_EMAIL_PROTECTION
            }
            ExtendedKeyUsageOption::TimeStamping => const_oid::db::rfc5912::ID_KP_TIME_STAMPING,
        }
    }
}

/// Represents the Subject Key Identifier (SKI) extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectKeyIdentifier {
    pub key_identifier: Vec<u8>,
}

impl ToAndFromX509Extension for SubjectKeyIdentifier {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::SubjectKeyIdentifier::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, StewardError> {
        let ski = x509_cert::ext::pkix::SubjectKeyIdentifier(OctetString::new(
            self.key_identifier.as_slice(),
        )?);
        Ok(ski.to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, StewardError> {
        let ski = x509_cert::ext::pkix::SubjectKeyIdentifier::from_der(extension)?;
        Ok(Self {
            key_identifier: ski.0.as_bytes().to_vec(),
        })
    }
}

/// Represents the Authority Key Identifier (AKI) extension.
///
/// This extension identifies the public key corresponding to the private key
/// used to sign the certificate. Only the key identifier form is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityKeyIdentifier {
    pub key_identifier: Vec<u8>,
}

impl ToAndFromX509Extension for AuthorityKeyIdentifier {
    const OID: ObjectIdentifier = x509_cert::ext::pkix::AuthorityKeyIdentifier::OID;

    fn to_x509_extension_value(&self) -> Result<Vec<u8>, StewardError> {
        let aki = x509_cert::ext::pkix::AuthorityKeyIdentifier {
            key_identifier: Some(OctetString::new(self.key_identifier.as_slice())?),
            authority_cert_issuer: None,
            authority_cert_serial_number: None,
        };

        Ok(aki.to_der()?)
    }

    fn from_x509_extension_value(extension: &[u8]) -> Result<Self, StewardError> {
        let aki = x509_cert::ext::pkix::AuthorityKeyIdentifier::from_der(extension)?;
        Ok(Self {
            key_identifier: aki
                .key_identifier
                .map(|id| id.as_bytes().to_vec())
                .unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_basic_constraints_encoding_decoding() {
        let original = BasicConstraints {
            is_ca: true,
            max_path_length: Some(0),
        };
        let encoded = original.to_x509_extension_value().unwrap();
        let decoded = BasicConstraints::from_x509_extension_value(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_authority_key_identifier_carries_only_key_id() {
        let original = AuthorityKeyIdentifier {
            key_identifier: vec![1, 2, 3, 4, 5],
        };
        let encoded = original.to_x509_extension_value().unwrap();
        let raw = x509_cert::ext::pkix::AuthorityKeyIdentifier::from_der(&encoded).unwrap();
        assert!(raw.authority_cert_issuer.is_none());
        assert!(raw.authority_cert_serial_number.is_none());
        let decoded = AuthorityKeyIdentifier::from_x509_extension_value(&encoded).unwrap();
        assert_eq!(original, decoded);
    }

    #[test]
    fn test_key_usage_names() {
        let original = KeyUsage(KeyUsages::KeyCertSign | KeyUsages::CRLSign);
        assert_eq!(original.names(), vec!["keyCertSign", "cRLSign"]);
        assert_eq!(KeyUsage::from_names(&original.names()).unwrap(), original);
        assert!(KeyUsage::from_names(&["signEverything"]).is_err());

        let encoded = original.to_x509_extension_value().unwrap();
        assert_eq!(KeyUsage::from_x509_extension_value(&encoded).unwrap(), original);
    }

    #[test]
    fn test_extended_key_usage_encoding_decoding() {
        let original = ExtendedKeyUsage {
            usage: vec![
                ExtendedKeyUsageOption::ServerAuth,
                ExtendedKeyUsageOption::ClientAuth,
            ],
        };
        let encoded = original.to_x509_extension_value().unwrap();
        let decoded = ExtendedKeyUsage::from_x509_extension_value(&encoded).unwrap();
        assert_eq!(original.usage, decoded.usage);
        assert_eq!(
            "ocspsigning".parse::<ExtendedKeyUsageOption>().unwrap(),
            ExtendedKeyUsageOption::OcspSigning
        );
    }

    #[test_case("DNS:example.com", AltName::Dns("example.com".into()) ; "dns")]
    #[test_case("EMAIL:ca@example.com", AltName::Email("ca@example.com".into()) ; "email")]
    #[test_case("URI:https://example.com/ca", AltName::Uri("https://example.com/ca".into()) ; "uri")]
    #[test_case("IP:10.0.0.1", AltName::Ip("10.0.0.1".parse().unwrap()) ; "ipv4")]
    #[test_case("IP:::1", AltName::Ip("::1".parse().unwrap()) ; "ipv6")]
    fn test_alt_name_text_form(text: &str, expected: AltName) {
        let parsed: AltName = text.parse().unwrap();
        assert_eq!(parsed, expected);
        assert_eq!(parsed.to_string(), text);

        let san = SubjectAltName {
            names: vec![parsed],
        };
        let encoded = san.to_x509_extension_value().unwrap();
        assert_eq!(SubjectAltName::from_x509_extension_value(&encoded).unwrap(), san);
    }

    #[test]
    fn test_alt_name_without_prefix_is_rejected() {
        assert!("example.com".parse::<AltName>().is_err());
        assert!("X400:foo".parse::<AltName>().is_err());
        assert!("IP:not-an-ip".parse::<AltName>().is_err());
    }
}
