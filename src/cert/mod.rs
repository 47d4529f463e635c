pub mod builder;
pub mod extensions;
pub mod params;
pub mod subject;
pub mod template;

use crate::error::StewardError;
pub type Result<T> = std::result::Result<T, StewardError>;
use const_oid::ObjectIdentifier;
use der::{Decode, DecodePem, Encode, EncodePem};
use params::{ExtensionParam, Validity};
use subject::Subject;
use time::OffsetDateTime;
use x509_cert::certificate::CertificateInner;
use x509_cert::ext::Extension;
use x509_cert::request::CertReq;

use crate::key::PublicKey;
use crate::pem_utils;
use crate::provider::{CryptoProvider, SignatureAlgorithm};

pub(crate) const CERTIFICATE_REQUEST_LABEL: &str = "CERTIFICATE REQUEST";

/// PKCS#9 extensionRequest attribute carried by CSRs.
pub(crate) const EXTENSION_REQUEST: ObjectIdentifier =
    ObjectIdentifier::new_unwrap("1.2.840.113549.1.9.14");

/// Upper-case hexadecimal rendering used for identifiers.
pub fn to_hex_upper(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect()
}

/// Represents an X.509 certificate.
///
/// This struct provides methods to encode the certificate into DER or PEM formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    /// The inner representation of the certificate.
    pub inner: CertificateInner,
}

impl Certificate {
    /// Encodes the certificate into DER format.
    ///
    /// # Returns
    /// A byte vector containing the DER-encoded certificate.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.inner
            .to_der()
            .map_err(|e| StewardError::EncodingError(e.to_string()))
    }

    /// Encodes the certificate into PEM format.
    ///
    /// # Returns
    /// A string containing the PEM-encoded certificate.
    pub fn to_pem(&self) -> Result<String> {
        self.inner
            .to_pem(pkcs8::LineEnding::LF)
            .map_err(|e| StewardError::EncodingError(e.to_string()))
    }

    pub fn from_der(der: &[u8]) -> Result<Self> {
        Ok(Self {
            inner: CertificateInner::from_der(der)?,
        })
    }

    pub fn from_pem(pem: &str) -> Result<Self> {
        Ok(Self {
            inner: CertificateInner::from_pem(pem)?,
        })
    }

    /// Serial number bytes, without a sign-padding zero.
    pub fn serial_number(&self) -> Vec<u8> {
        let bytes = self.inner.tbs_certificate.serial_number.as_bytes();
        match bytes {
            [0, rest @ ..] if !rest.is_empty() => rest.to_vec(),
            _ => bytes.to_vec(),
        }
    }

    pub fn serial_hex(&self) -> String {
        to_hex_upper(&self.serial_number())
    }

    pub fn subject(&self) -> Result<Subject> {
        Subject::from_x509_name(&self.inner.tbs_certificate.subject)
    }

    pub fn issuer(&self) -> Result<Subject> {
        Subject::from_x509_name(&self.inner.tbs_certificate.issuer)
    }

    pub fn public_key(&self) -> Result<PublicKey> {
        PublicKey::from_spki(&self.inner.tbs_certificate.subject_public_key_info)
    }

    pub fn validity(&self) -> Validity {
        let validity = &self.inner.tbs_certificate.validity;
        Validity {
            not_before: OffsetDateTime::from(validity.not_before.to_system_time()),
            not_after: OffsetDateTime::from(validity.not_after.to_system_time()),
        }
    }

    pub fn extensions(&self) -> Vec<ExtensionParam> {
        self.inner
            .tbs_certificate
            .extensions
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(ExtensionParam::from_x509)
            .collect()
    }

    pub fn extension(&self, oid: ObjectIdentifier) -> Option<ExtensionParam> {
        self.extensions().into_iter().find(|ext| ext.oid == oid)
    }

    /// Checks that `issuer_key` produced this certificate's signature.
    pub fn verify_signed_by<P: CryptoProvider>(
        &self,
        provider: &P,
        issuer_key: &PublicKey,
    ) -> Result<()> {
        let tbs = self.inner.tbs_certificate.to_der()?;
        let algorithm = verification_algorithm(&self.inner.signature_algorithm)?;
        provider.verify(issuer_key, algorithm, &tbs, self.inner.signature.raw_bytes())
    }
}

/// A signature made with an algorithm we cannot check is treated like one
/// that does not verify.
fn verification_algorithm(
    algorithm: &x509_cert::spki::AlgorithmIdentifierOwned,
) -> Result<SignatureAlgorithm> {
    SignatureAlgorithm::try_from(algorithm)
        .map_err(|e| StewardError::SignatureError(e.to_string()))
}

/// Represents a PKCS#10 certificate signing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateRequest {
    pub inner: CertReq,
}

impl CertificateRequest {
    pub fn to_der(&self) -> Result<Vec<u8>> {
        self.inner
            .to_der()
            .map_err(|e| StewardError::EncodingError(e.to_string()))
    }

    pub fn to_pem(&self) -> Result<String> {
        Ok(pem_utils::der_to_pem(&self.to_der()?, CERTIFICATE_REQUEST_LABEL))
    }

    pub fn from_der(der: &[u8]) -> Result<Self> {
        Ok(Self {
            inner: CertReq::from_der(der)?,
        })
    }

    pub fn from_pem(pem: &str) -> Result<Self> {
        let der = pem_utils::pem_to_der_expecting(pem, CERTIFICATE_REQUEST_LABEL)?;
        Self::from_der(&der)
    }

    pub fn subject(&self) -> Result<Subject> {
        Subject::from_x509_name(&self.inner.info.subject)
    }

    pub fn public_key(&self) -> Result<PublicKey> {
        PublicKey::from_spki(&self.inner.info.public_key)
    }

    /// Requested extensions in request order, duplicates included.
    pub fn extensions(&self) -> Result<Vec<ExtensionParam>> {
        let mut found = Vec::new();
        for attribute in self.inner.info.attributes.iter() {
            if attribute.oid != EXTENSION_REQUEST {
                continue;
            }
            for value in attribute.values.iter() {
                let extensions = Vec::<Extension>::from_der(&value.to_der()?)?;
                found.extend(extensions.iter().map(ExtensionParam::from_x509));
            }
        }
        Ok(found)
    }

    /// Checks the request's self-signature.
    pub fn verify_signature<P: CryptoProvider>(&self, provider: &P) -> Result<()> {
        let info = self.inner.info.to_der()?;
        let algorithm = verification_algorithm(&self.inner.algorithm)?;
        provider.verify(
            &self.public_key()?,
            algorithm,
            &info,
            self.inner.signature.raw_bytes(),
        )
    }
}
