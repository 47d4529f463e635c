use der::Encode;
use der::asn1::{Any, BitString, GeneralizedTime, SetOfVec, UtcTime};
use x509_cert::Version;
use x509_cert::attr::Attribute;
use x509_cert::certificate::{CertificateInner, TbsCertificateInner};
use x509_cert::request::{CertReq, CertReqInfo};
use x509_cert::serial_number::SerialNumber;
use x509_cert::spki::AlgorithmIdentifierOwned;
use x509_cert::time::Time;

use super::params::{ExtensionParam, Validity};
use super::subject::Subject;
use super::{Certificate, CertificateRequest, EXTENSION_REQUEST, Result};
use crate::error::StewardError;
use crate::key::{PrivateKey, PublicKey};
use crate::provider::CryptoProvider;

/// First year that must be encoded as GeneralizedTime (RFC 5280, 4.1.2.5).
const GENERALIZED_TIME_YEAR: i32 = 2050;

fn push_unique(extensions: &mut Vec<ExtensionParam>, extension: ExtensionParam) -> Result<()> {
    if extensions.iter().any(|e| e.oid == extension.oid) {
        return Err(StewardError::InvalidInput(format!(
            "extension {} is already present",
            extension.oid
        )));
    }
    extensions.push(extension);
    Ok(())
}

fn encode_extensions(extensions: &[ExtensionParam]) -> Result<Vec<x509_cert::ext::Extension>> {
    extensions.iter().map(ExtensionParam::to_x509).collect()
}

fn to_x509_time(t: time::OffsetDateTime) -> Result<Time> {
    let seconds = u64::try_from(t.unix_timestamp()).map_err(|_| {
        StewardError::InvalidInput(format!("{t} precedes the Unix epoch"))
    })?;
    let since_epoch = std::time::Duration::from_secs(seconds);
    if t.year() < GENERALIZED_TIME_YEAR {
        Ok(Time::UtcTime(UtcTime::from_unix_duration(since_epoch)?))
    } else {
        Ok(Time::GeneralTime(GeneralizedTime::from_unix_duration(
            since_epoch,
        )?))
    }
}

/// Builds and signs the "To Be Signed" portion of an X.509 certificate.
///
/// A builder starts from a subject and an extension list (usually from a
/// [`CertificateTemplate`](super::template::CertificateTemplate)); the issuer,
/// validity, serial number and public key must be set before signing.
#[derive(Debug, Clone)]
pub struct CertificateBuilder {
    subject: Subject,
    extensions: Vec<ExtensionParam>,
    issuer: Option<Subject>,
    validity: Option<Validity>,
    serial_number: Option<Vec<u8>>,
    public_key: Option<PublicKey>,
}

impl CertificateBuilder {
    pub fn new(subject: Subject, extensions: Vec<ExtensionParam>) -> Self {
        Self {
            subject,
            extensions,
            issuer: None,
            validity: None,
            serial_number: None,
            public_key: None,
        }
    }

    pub fn subject(mut self, subject: Subject) -> Self {
        self.subject = subject;
        self
    }

    pub fn issuer(mut self, issuer: Subject) -> Self {
        self.issuer = Some(issuer);
        self
    }

    pub fn validity(mut self, validity: Validity) -> Self {
        self.validity = Some(validity);
        self
    }

    /// Big-endian serial number; must be positive and at most 20 bytes.
    pub fn serial_number(mut self, serial_number: Vec<u8>) -> Self {
        self.serial_number = Some(serial_number);
        self
    }

    pub fn public_key(mut self, public_key: PublicKey) -> Self {
        self.public_key = Some(public_key);
        self
    }

    /// Adds an extension; its OID must not be present yet.
    pub fn extension(mut self, extension: ExtensionParam) -> Result<Self> {
        push_unique(&mut self.extensions, extension)?;
        Ok(self)
    }

    pub fn extensions(&self) -> &[ExtensionParam] {
        &self.extensions
    }

    /// Converts the builder into a `TbsCertificateInner` for DER encoding.
    pub fn to_tbs_certificate_inner(
        &self,
        signature: AlgorithmIdentifierOwned,
    ) -> Result<TbsCertificateInner> {
        let missing = |field: &str| StewardError::InvalidInput(format!("certificate {field} is not set"));
        let issuer = self.issuer.as_ref().ok_or_else(|| missing("issuer"))?;
        let validity = self.validity.as_ref().ok_or_else(|| missing("validity"))?;
        let serial = self
            .serial_number
            .as_ref()
            .ok_or_else(|| missing("serial number"))?;
        let public_key = self.public_key.as_ref().ok_or_else(|| missing("public key"))?;

        let extensions = encode_extensions(&self.extensions)?;

        Ok(TbsCertificateInner {
            version: Version::V3,
            serial_number: SerialNumber::new(serial)?,
            signature,
            issuer: issuer.to_x509_name()?,
            validity: x509_cert::time::Validity {
                not_before: to_x509_time(validity.not_before)?,
                not_after: to_x509_time(validity.not_after)?,
            },
            subject: self.subject.to_x509_name()?,
            subject_public_key_info: public_key.to_spki()?,
            issuer_unique_id: None,
            subject_unique_id: None,
            extensions: if extensions.is_empty() {
                None
            } else {
                Some(extensions)
            },
        })
    }

    /// Signs the certificate with `key` through `provider`.
    pub fn sign<P: CryptoProvider>(&self, provider: &P, key: &PrivateKey) -> Result<Certificate> {
        let algorithm: AlgorithmIdentifierOwned = provider.signature_algorithm(key).into();
        let tbs_certificate = self.to_tbs_certificate_inner(algorithm.clone())?;
        let signature = provider.sign(key, &tbs_certificate.to_der()?)?;

        Ok(Certificate {
            inner: CertificateInner {
                tbs_certificate,
                signature_algorithm: algorithm,
                signature: BitString::from_bytes(&signature)?,
            },
        })
    }
}

/// Builds and signs a PKCS#10 certificate signing request.
#[derive(Debug, Clone)]
pub struct CsrBuilder {
    subject: Subject,
    extensions: Vec<ExtensionParam>,
}

impl CsrBuilder {
    pub fn new(subject: Subject, extensions: Vec<ExtensionParam>) -> Self {
        Self {
            subject,
            extensions,
        }
    }

    pub fn extension(mut self, extension: ExtensionParam) -> Result<Self> {
        push_unique(&mut self.extensions, extension)?;
        Ok(self)
    }

    pub fn extensions(&self) -> &[ExtensionParam] {
        &self.extensions
    }

    /// Signs the request with `key`; the request carries its public half.
    pub fn sign<P: CryptoProvider>(
        &self,
        provider: &P,
        key: &PrivateKey,
    ) -> Result<CertificateRequest> {
        let attributes = if self.extensions.is_empty() {
            SetOfVec::new()
        } else {
            let requested = encode_extensions(&self.extensions)?;
            let attribute = Attribute {
                oid: EXTENSION_REQUEST,
                values: SetOfVec::try_from(vec![Any::encode_from(&requested)?])?,
            };
            SetOfVec::try_from(vec![attribute])?
        };

        let info = CertReqInfo {
            version: x509_cert::request::Version::V1,
            subject: self.subject.to_x509_name()?,
            public_key: key.public_key().to_spki()?,
            attributes,
        };

        let algorithm: AlgorithmIdentifierOwned = provider.signature_algorithm(key).into();
        let signature = provider.sign(key, &info.to_der()?)?;

        Ok(CertificateRequest {
            inner: CertReq {
                info,
                algorithm,
                signature: BitString::from_bytes(&signature)?,
            },
        })
    }
}
