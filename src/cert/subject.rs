//! Distinguished names with a canonical attribute order.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use bon::bon;
use const_oid::ObjectIdentifier;
use der::asn1::{Any, Ia5String, PrintableString, SetOfVec, Utf8StringRef};
use der::{Tag, Tagged};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use x509_cert::attr::AttributeTypeAndValue;
use x509_cert::name::{Name, RdnSequence, RelativeDistinguishedName};

use crate::error::{Result, StewardError};

/// Type of a distinguished-name attribute.
///
/// The derived ordering is the canonical serialization order: the six
/// well-known attributes first (C, ST, L, O, OU, CN), then any other type by
/// OID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AttributeType {
    Country,
    State,
    Locality,
    Organization,
    OrganizationalUnit,
    CommonName,
    Other(ObjectIdentifier),
}

impl AttributeType {
    pub const CANONICAL: [AttributeType; 6] = [
        AttributeType::Country,
        AttributeType::State,
        AttributeType::Locality,
        AttributeType::Organization,
        AttributeType::OrganizationalUnit,
        AttributeType::CommonName,
    ];

    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            AttributeType::Country => const_oid::db::rfc4519::C,
            AttributeType::State => const_oid::db::rfc4519::ST,
            AttributeType::Locality => const_oid::db::rfc4519::L,
            AttributeType::Organization => const_oid::db::rfc4519::O,
            AttributeType::OrganizationalUnit => const_oid::db::rfc4519::OU,
            AttributeType::CommonName => const_oid::db::rfc4519::CN,
            AttributeType::Other(oid) => *oid,
        }
    }

    pub fn from_oid(oid: ObjectIdentifier) -> Self {
        AttributeType::CANONICAL
            .into_iter()
            .find(|t| t.oid() == oid)
            .unwrap_or(AttributeType::Other(oid))
    }

    /// Long name used in JSON, or `None` for non-canonical types.
    pub fn long_name(&self) -> Option<&'static str> {
        match self {
            AttributeType::Country => Some("countryName"),
            AttributeType::State => Some("stateOrProvinceName"),
            AttributeType::Locality => Some("localityName"),
            AttributeType::Organization => Some("organizationName"),
            AttributeType::OrganizationalUnit => Some("organizationalUnitName"),
            AttributeType::CommonName => Some("commonName"),
            AttributeType::Other(_) => None,
        }
    }

    pub fn short_name(&self) -> Option<&'static str> {
        match self {
            AttributeType::Country => Some("C"),
            AttributeType::State => Some("ST"),
            AttributeType::Locality => Some("L"),
            AttributeType::Organization => Some("O"),
            AttributeType::OrganizationalUnit => Some("OU"),
            AttributeType::CommonName => Some("CN"),
            AttributeType::Other(_) => None,
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.long_name() {
            Some(name) => f.write_str(name),
            None => write!(f, "{}", self.oid()),
        }
    }
}

impl FromStr for AttributeType {
    type Err = StewardError;

    /// Accepts long names, short names and dotted OIDs.
    fn from_str(s: &str) -> Result<Self> {
        if let Some(t) = AttributeType::CANONICAL
            .into_iter()
            .find(|t| t.long_name() == Some(s) || t.short_name() == Some(s))
        {
            return Ok(t);
        }
        ObjectIdentifier::new(s)
            .map(AttributeType::from_oid)
            .map_err(|_| StewardError::InvalidConfig(format!("unknown subject attribute {s}")))
    }
}

/// An ordered set of distinguished-name attributes.
///
/// # Example
/// ```
/// use certsteward::cert::subject::Subject;
///
/// let subject = Subject::builder()
///     .common_name("Example Root".to_string())
///     .organization("Example".to_string())
///     .country("FR".to_string())
///     .build();
/// assert_eq!(subject.to_string(), "C=FR, O=Example, CN=Example Root");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subject {
    attributes: BTreeMap<AttributeType, String>,
}

#[bon]
impl Subject {
    #[builder]
    pub fn new(
        country: Option<String>,
        state: Option<String>,
        locality: Option<String>,
        organization: Option<String>,
        organizational_unit: Option<String>,
        common_name: Option<String>,
    ) -> Self {
        let mut subject = Subject::default();
        for (kind, value) in AttributeType::CANONICAL.into_iter().zip([
            country,
            state,
            locality,
            organization,
            organizational_unit,
            common_name,
        ]) {
            if let Some(value) = value {
                subject.set(kind, value);
            }
        }
        subject
    }
}

impl Subject {
    pub fn get(&self, kind: AttributeType) -> Option<&str> {
        self.attributes.get(&kind).map(String::as_str)
    }

    pub fn set(&mut self, kind: AttributeType, value: impl Into<String>) {
        self.attributes.insert(kind, value.into());
    }

    pub fn remove(&mut self, kind: AttributeType) -> Option<String> {
        self.attributes.remove(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn country(&self) -> Option<&str> {
        self.get(AttributeType::Country)
    }

    pub fn state(&self) -> Option<&str> {
        self.get(AttributeType::State)
    }

    pub fn locality(&self) -> Option<&str> {
        self.get(AttributeType::Locality)
    }

    pub fn organization(&self) -> Option<&str> {
        self.get(AttributeType::Organization)
    }

    pub fn organizational_unit(&self) -> Option<&str> {
        self.get(AttributeType::OrganizationalUnit)
    }

    pub fn common_name(&self) -> Option<&str> {
        self.get(AttributeType::CommonName)
    }

    /// Attributes in canonical order.
    pub fn to_canonical_form(&self) -> Vec<(AttributeType, &str)> {
        self.attributes
            .iter()
            .map(|(kind, value)| (*kind, value.as_str()))
            .collect()
    }

    /// Encodes the subject as an X.509 name, one attribute per RDN.
    ///
    /// The country is a PrintableString; every other value is UTF-8.
    pub fn to_x509_name(&self) -> Result<Name> {
        let mut rdns = Vec::with_capacity(self.attributes.len());
        for (kind, value) in &self.attributes {
            let encoded = match kind {
                AttributeType::Country => Any::encode_from(&PrintableString::new(value)?)?,
                _ => Any::encode_from(&Utf8StringRef::new(value)?)?,
            };
            let atv = AttributeTypeAndValue {
                oid: kind.oid(),
                value: encoded,
            };
            rdns.push(RelativeDistinguishedName(SetOfVec::try_from(vec![atv])?));
        }
        Ok(RdnSequence(rdns))
    }

    /// Decodes an X.509 name.
    ///
    /// Values must be UTF8String, PrintableString or IA5String.
    pub fn from_x509_name(name: &Name) -> Result<Self> {
        let mut subject = Subject::default();
        for rdn in name.0.iter() {
            for attr in rdn.0.iter() {
                let value = match attr.value.tag() {
                    Tag::Utf8String => attr.value.decode_as::<String>()?,
                    Tag::PrintableString => attr.value.decode_as::<PrintableString>()?.to_string(),
                    Tag::Ia5String => attr.value.decode_as::<Ia5String>()?.to_string(),
                    other => {
                        return Err(StewardError::DecodingError(format!(
                            "unsupported string type {other} for attribute {}",
                            attr.oid
                        )));
                    }
                };
                let kind = AttributeType::from_oid(attr.oid);
                if subject.get(kind).is_some() {
                    return Err(StewardError::DecodingError(format!(
                        "attribute {} appears more than once",
                        attr.oid
                    )));
                }
                subject.set(kind, value);
            }
        }
        Ok(subject)
    }
}

impl fmt::Display for Subject {
    /// Short-name form in canonical order, e.g. `C=FR, O=Example, CN=Root`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (kind, value) in &self.attributes {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            match kind.short_name() {
                Some(short) => write!(f, "{short}={value}")?,
                None => write!(f, "{}={value}", kind.oid())?,
            }
        }
        Ok(())
    }
}

impl Serialize for Subject {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.attributes.len()))?;
        for (kind, value) in &self.attributes {
            map.serialize_entry(&kind.to_string(), value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Subject {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct SubjectVisitor;

        impl<'de> Visitor<'de> for SubjectVisitor {
            type Value = Subject;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of subject attribute names to values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Subject, A::Error> {
                let mut subject = Subject::default();
                while let Some((name, value)) = access.next_entry::<String, String>()? {
                    let kind = name.parse().map_err(serde::de::Error::custom)?;
                    subject.set(kind, value);
                }
                Ok(subject)
            }
        }

        deserializer.deserialize_map(SubjectVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use der::{Decode, Encode};

    fn full_subject() -> Subject {
        let mut subject = Subject::default();
        subject.set(AttributeType::CommonName, "Root CA");
        subject.set(
            AttributeType::Other(const_oid::db::rfc4519::DC),
            "example",
        );
        subject.set(AttributeType::OrganizationalUnit, "PKI");
        subject.set(AttributeType::Country, "FR");
        subject.set(AttributeType::Organization, "Example");
        subject.set(AttributeType::Locality, "Paris");
        subject.set(AttributeType::State, "IDF");
        subject
    }

    #[test]
    fn test_canonical_order_regardless_of_insertion() {
        let kinds: Vec<AttributeType> = full_subject()
            .to_canonical_form()
            .into_iter()
            .map(|(kind, _)| kind)
            .collect();
        assert_eq!(&kinds[..6], &AttributeType::CANONICAL);
        assert_eq!(kinds[6], AttributeType::Other(const_oid::db::rfc4519::DC));
    }

    #[test]
    fn test_json_uses_long_names_in_order() {
        let json = serde_json::to_string(&full_subject()).unwrap();
        assert_eq!(
            json,
            r#"{"countryName":"FR","stateOrProvinceName":"IDF","localityName":"Paris","organizationName":"Example","organizationalUnitName":"PKI","commonName":"Root CA","0.9.2342.19200300.100.1.25":"example"}"#
        );
        let back: Subject = serde_json::from_str(&json).unwrap();
        assert_eq!(back, full_subject());
    }

    #[test]
    fn test_json_accepts_short_names() {
        let subject: Subject = serde_json::from_str(r#"{"CN": "leaf", "C": "DE"}"#).unwrap();
        assert_eq!(subject.common_name(), Some("leaf"));
        assert_eq!(subject.country(), Some("DE"));
        assert!(serde_json::from_str::<Subject>(r#"{"bogus": "x"}"#).is_err());
    }

    #[test]
    fn test_x509_name_round_trip() {
        let subject = full_subject();
        let name = subject.to_x509_name().unwrap();
        assert_eq!(name.0.len(), 7);
        assert_eq!(name.0[0].0.get(0).unwrap().oid, const_oid::db::rfc4519::C);

        let der = name.to_der().unwrap();
        let decoded = Subject::from_x509_name(&Name::from_der(&der).unwrap()).unwrap();
        assert_eq!(decoded, subject);
    }

    #[test]
    fn test_repeated_attribute_is_rejected() {
        let name: Name = "CN=leaf,OU=ops,OU=pki".parse().unwrap();
        assert!(matches!(
            Subject::from_x509_name(&name),
            Err(StewardError::DecodingError(_))
        ));

        let name: Name = "CN=leaf,OU=ops".parse().unwrap();
        let subject = Subject::from_x509_name(&name).unwrap();
        assert_eq!(subject.get(AttributeType::OrganizationalUnit), Some("ops"));
    }

    #[test]
    fn test_country_must_be_printable() {
        let mut subject = Subject::default();
        subject.set(AttributeType::Country, "F@");
        assert!(subject.to_x509_name().is_err());
    }

    #[test]
    fn test_builder_sets_only_given_fields() {
        let subject = Subject::builder()
            .common_name("leaf".to_string())
            .build();
        assert_eq!(subject.common_name(), Some("leaf"));
        assert_eq!(subject.organization(), None);
        assert_eq!(subject.to_string(), "CN=leaf");
    }
}
