//! Declarative description of what a certificate or CSR must contain.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use const_oid::ObjectIdentifier;
use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use super::builder::{CertificateBuilder, CsrBuilder};
use super::extensions::{
    AltName, AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage,
    SubjectAltName, SubjectKeyIdentifier, ToAndFromX509Extension,
};
use super::params::ExtensionParam;
use super::subject::Subject;
use crate::error::{Result, StewardError};

/// Subject, validity duration and extension set of a certificate.
///
/// At most one extension per OID. Subject and Authority Key Identifiers are
/// never part of a template: they are computed at issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TemplateRepr", into = "TemplateRepr")]
pub struct CertificateTemplate {
    subject: Subject,
    duration: Duration,
    extensions: Vec<ExtensionParam>,
}

impl CertificateTemplate {
    pub fn new(subject: Subject, duration: Duration) -> Result<Self> {
        check_duration(duration)?;
        Ok(Self {
            subject,
            duration,
            extensions: Vec::new(),
        })
    }

    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    pub fn set_subject(&mut self, subject: Subject) {
        self.subject = subject;
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn set_duration(&mut self, duration: Duration) -> Result<()> {
        check_duration(duration)?;
        self.duration = duration;
        Ok(())
    }

    /// End of a validity window beginning at `begin`.
    pub fn end_date(&self, begin: OffsetDateTime) -> OffsetDateTime {
        begin + self.duration
    }

    /// Adds an already-encoded extension.
    ///
    /// Fails if the OID is present already or names an identifier extension
    /// the authority manages itself.
    pub fn add_extension(&mut self, extension: ExtensionParam) -> Result<()> {
        if extension.oid == SubjectKeyIdentifier::OID
            || extension.oid == AuthorityKeyIdentifier::OID
        {
            return Err(StewardError::InvalidConfig(format!(
                "extension {} is computed at issuance and cannot be templated",
                extension.oid
            )));
        }
        if self.extension(extension.oid).is_some() {
            return Err(StewardError::InvalidConfig(format!(
                "extension {} has already been set",
                extension.oid
            )));
        }
        self.extensions.push(extension);
        Ok(())
    }

    /// Encodes and adds a typed extension.
    pub fn add<E: ToAndFromX509Extension>(&mut self, extension: &E, critical: bool) -> Result<()> {
        self.add_extension(ExtensionParam::from_extension(extension, critical)?)
    }

    pub fn remove_extension(&mut self, oid: ObjectIdentifier) -> Option<ExtensionParam> {
        let index = self.extensions.iter().position(|e| e.oid == oid)?;
        Some(self.extensions.remove(index))
    }

    pub fn extension(&self, oid: ObjectIdentifier) -> Option<&ExtensionParam> {
        self.extensions.iter().find(|e| e.oid == oid)
    }

    /// All extensions with their criticality, in insertion order.
    pub fn extensions(&self) -> &[ExtensionParam] {
        &self.extensions
    }

    /// Certificate builder pre-populated with the subject and extensions.
    pub fn cert_builder(&self) -> CertificateBuilder {
        CertificateBuilder::new(self.subject.clone(), self.extensions.clone())
    }

    /// CSR builder pre-populated with the subject and extensions.
    pub fn csr_builder(&self) -> CsrBuilder {
        CsrBuilder::new(self.subject.clone(), self.extensions.clone())
    }
}

fn check_duration(duration: Duration) -> Result<()> {
    if !duration.is_positive() {
        return Err(StewardError::InvalidConfig(
            "template duration must be positive".to_string(),
        ));
    }
    Ok(())
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
enum ExtensionValue {
    BasicConstraints {
        ca: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pathlen: Option<u8>,
    },
    KeyUsage(Vec<String>),
    ExtendedKeyUsage(Vec<String>),
    SubjectAltName(Vec<String>),
    Raw {
        oid: String,
        value: String,
    },
}

impl ExtensionValue {
    fn from_param(param: &ExtensionParam) -> Self {
        Self::decode(param).unwrap_or_else(|_| ExtensionValue::Raw {
            oid: param.oid.to_string(),
            value: STANDARD.encode(&param.value),
        })
    }

    fn decode(param: &ExtensionParam) -> Result<Self> {
        let value = match param.oid {
            oid if oid == BasicConstraints::OID => {
                let bc: BasicConstraints = param.to_extension()?;
                ExtensionValue::BasicConstraints {
                    ca: bc.is_ca,
                    pathlen: bc.max_path_length,
                }
            }
            oid if oid == KeyUsage::OID => {
                let ku: KeyUsage = param.to_extension()?;
                ExtensionValue::KeyUsage(ku.names().into_iter().map(str::to_string).collect())
            }
            oid if oid == ExtendedKeyUsage::OID => {
                let eku: ExtendedKeyUsage = param.to_extension()?;
                ExtensionValue::ExtendedKeyUsage(
                    eku.usage.iter().map(|u| u.as_str().to_string()).collect(),
                )
            }
            oid if oid == SubjectAltName::OID => {
                let san: SubjectAltName = param.to_extension()?;
                ExtensionValue::SubjectAltName(san.names.iter().map(AltName::to_string).collect())
            }
            oid => {
                return Err(StewardError::InvalidInput(format!(
                    "no named form for extension {oid}"
                )));
            }
        };
        Ok(value)
    }

    fn into_param(self, critical: bool) -> Result<ExtensionParam> {
        match self {
            ExtensionValue::BasicConstraints { ca, pathlen } => ExtensionParam::from_extension(
                &BasicConstraints {
                    is_ca: ca,
                    max_path_length: pathlen,
                },
                critical,
            ),
            ExtensionValue::KeyUsage(names) => {
                ExtensionParam::from_extension(&KeyUsage::from_names(&names)?, critical)
            }
            ExtensionValue::ExtendedKeyUsage(names) => {
                let usage = names
                    .iter()
                    .map(|n| n.parse())
                    .collect::<Result<Vec<_>>>()?;
                ExtensionParam::from_extension(&ExtendedKeyUsage { usage }, critical)
            }
            ExtensionValue::SubjectAltName(names) => {
                let names = names
                    .iter()
                    .map(|n| n.parse())
                    .collect::<Result<Vec<_>>>()?;
                ExtensionParam::from_extension(&SubjectAltName { names }, critical)
            }
            ExtensionValue::Raw { oid, value } => Ok(ExtensionParam {
                oid: ObjectIdentifier::new(&oid)
                    .map_err(|e| StewardError::InvalidConfig(format!("bad OID {oid}: {e}")))?,
                critical,
                value: STANDARD
                    .decode(value)
                    .map_err(|e| StewardError::InvalidConfig(format!("bad extension value: {e}")))?,
            }),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ExtensionEntry {
    critical: bool,
    extension: ExtensionValue,
}

#[derive(Serialize, Deserialize)]
struct TemplateRepr {
    subject: Subject,
    duration: i64,
    extensions: Vec<ExtensionEntry>,
}

impl TryFrom<TemplateRepr> for CertificateTemplate {
    type Error = StewardError;

    fn try_from(repr: TemplateRepr) -> Result<Self> {
        let mut template = CertificateTemplate::new(repr.subject, Duration::seconds(repr.duration))?;
        for entry in repr.extensions {
            template.add_extension(entry.extension.into_param(entry.critical)?)?;
        }
        Ok(template)
    }
}

impl From<CertificateTemplate> for TemplateRepr {
    fn from(template: CertificateTemplate) -> Self {
        TemplateRepr {
            extensions: template
                .extensions
                .iter()
                .map(|param| ExtensionEntry {
                    critical: param.critical,
                    extension: ExtensionValue::from_param(param),
                })
                .collect(),
            subject: template.subject,
            duration: template.duration.whole_seconds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::extensions::{ExtendedKeyUsageOption, KeyUsages};
    use test_case::test_case;

    fn template() -> CertificateTemplate {
        CertificateTemplate::new(
            Subject::builder().common_name("Root".to_string()).build(),
            Duration::days(365),
        )
        .unwrap()
    }

    fn bc() -> BasicConstraints {
        BasicConstraints {
            is_ca: true,
            max_path_length: Some(0),
        }
    }

    fn ku() -> KeyUsage {
        KeyUsage(KeyUsages::KeyCertSign | KeyUsages::CRLSign)
    }

    #[test_case(true ; "basic constraints first")]
    #[test_case(false ; "key usage first")]
    fn test_duplicate_oid_fails_on_second_insert(bc_first: bool) {
        let mut t = template();
        let other_bc = BasicConstraints {
            is_ca: false,
            max_path_length: None,
        };
        if bc_first {
            t.add(&bc(), true).unwrap();
            t.add(&ku(), true).unwrap();
            assert!(matches!(
                t.add(&other_bc, false),
                Err(StewardError::InvalidConfig(_))
            ));
        } else {
            t.add(&ku(), true).unwrap();
            t.add(&other_bc, false).unwrap();
            assert!(t.add(&bc(), true).is_err());
        }
        assert_eq!(t.extensions().len(), 2);
    }

    #[test]
    fn test_identifier_extensions_are_forbidden() {
        let mut t = template();
        let ski = SubjectKeyIdentifier {
            key_identifier: vec![1; 20],
        };
        let aki = AuthorityKeyIdentifier {
            key_identifier: vec![2; 20],
        };
        assert!(matches!(t.add(&ski, false), Err(StewardError::InvalidConfig(_))));
        assert!(matches!(t.add(&aki, false), Err(StewardError::InvalidConfig(_))));
        assert!(t.extensions().is_empty());
    }

    #[test]
    fn test_duration_must_be_positive() {
        assert!(CertificateTemplate::new(Subject::default(), Duration::ZERO).is_err());
        let mut t = template();
        assert!(t.set_duration(Duration::seconds(-5)).is_err());
        assert_eq!(t.duration(), Duration::days(365));
    }

    #[test]
    fn test_end_date() {
        let begin = OffsetDateTime::from_unix_timestamp(1_000_000).unwrap();
        assert_eq!(
            template().end_date(begin).unix_timestamp(),
            1_000_000 + 365 * 86_400
        );
    }

    #[test]
    fn test_remove_extension() {
        let mut t = template();
        t.add(&bc(), true).unwrap();
        assert!(t.remove_extension(BasicConstraints::OID).is_some());
        assert!(t.remove_extension(BasicConstraints::OID).is_none());
        t.add(&bc(), false).unwrap();
    }

    #[test]
    fn test_builders_carry_subject_and_extensions() {
        let mut t = template();
        t.add(&bc(), true).unwrap();
        assert_eq!(t.cert_builder().extensions(), t.extensions());
        assert_eq!(t.csr_builder().extensions(), t.extensions());
    }

    #[test]
    fn test_json_round_trip() {
        let mut t = template();
        t.add(&bc(), true).unwrap();
        t.add(&ku(), true).unwrap();
        t.add(
            &ExtendedKeyUsage {
                usage: vec![ExtendedKeyUsageOption::ServerAuth],
            },
            false,
        )
        .unwrap();
        t.add(
            &SubjectAltName {
                names: vec!["DNS:ca.example.com".parse().unwrap()],
            },
            false,
        )
        .unwrap();
        t.add_extension(ExtensionParam {
            oid: ObjectIdentifier::new_unwrap("1.3.6.1.4.1.99999.1"),
            critical: false,
            value: vec![0x05, 0x00],
        })
        .unwrap();

        let json = serde_json::to_value(&t).unwrap();
        assert_eq!(json["duration"], 365 * 86_400);
        assert_eq!(json["subject"]["commonName"], "Root");
        assert_eq!(
            json["extensions"][0],
            serde_json::json!({"critical": true, "extension": {"basicConstraints": {"ca": true, "pathlen": 0}}})
        );
        assert_eq!(
            json["extensions"][1]["extension"]["keyUsage"],
            serde_json::json!(["keyCertSign", "cRLSign"])
        );
        assert_eq!(
            json["extensions"][3]["extension"]["subjectAltName"],
            serde_json::json!(["DNS:ca.example.com"])
        );
        assert_eq!(
            json["extensions"][4]["extension"]["raw"],
            serde_json::json!({"oid": "1.3.6.1.4.1.99999.1", "value": "BQA="})
        );

        let back: CertificateTemplate = serde_json::from_value(json).unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn test_json_loading_reapplies_invariants() {
        let duplicate = serde_json::json!({
            "subject": {"CN": "x"},
            "duration": 60,
            "extensions": [
                {"critical": true, "extension": {"basicConstraints": {"ca": true}}},
                {"critical": false, "extension": {"basicConstraints": {"ca": false}}},
            ],
        });
        assert!(serde_json::from_value::<CertificateTemplate>(duplicate).is_err());

        let zero = serde_json::json!({"subject": {}, "duration": 0, "extensions": []});
        assert!(serde_json::from_value::<CertificateTemplate>(zero).is_err());
    }
}
