//! The cryptographic capability the rest of the crate calls into.
//!
//! Nothing outside this module touches a signature scheme directly: key
//! generation, signing, verification and key identifiers all go through a
//! [`CryptoProvider`] that the caller passes in. [`RustCryptoProvider`] is the
//! implementation built on the RustCrypto crates.

use const_oid::db::{rfc5912, rfc8410};
use const_oid::{AssociatedOid, ObjectIdentifier};
use der::{Decode, Encode};
use rsa::signature::hazmat::PrehashVerifier;
use rsa::signature::{DigestSigner, SignatureEncoding, Signer, Verifier};
use sha1::Sha1;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use x509_cert::spki::AlgorithmIdentifierOwned;

use crate::error::{Result, StewardError};
use crate::key::{Key, KeyAlgorithm, PrivateKey, PublicKey};

/// Represents the supported signature algorithms for certificates and CSRs.
///
/// This enum provides a mapping to the corresponding OIDs for each algorithm.
/// Signing uses one algorithm per key type; verification accepts all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    /// SHA-256 with RSA encryption (PKCS#1 v1.5).
    Sha256WithRSA,
    /// SHA-384 with RSA encryption (PKCS#1 v1.5).
    Sha384WithRSA,
    /// SHA-512 with RSA encryption (PKCS#1 v1.5).
    Sha512WithRSA,
    /// SHA-1 with DSA.
    Sha1WithDSA,
    /// SHA-256 with DSA.
    Sha256WithDSA,
    /// SHA-224 with ECDSA.
    Sha224WithECDSA,
    /// SHA-256 with ECDSA.
    Sha256WithECDSA,
    /// SHA-384 with ECDSA.
    Sha384WithECDSA,
    /// SHA-512 with ECDSA.
    Sha512WithECDSA,
    /// Pure Ed25519.
    Ed25519,
}

impl SignatureAlgorithm {
    pub const ALL: [SignatureAlgorithm; 10] = [
        SignatureAlgorithm::Sha256WithRSA,
        SignatureAlgorithm::Sha384WithRSA,
        SignatureAlgorithm::Sha512WithRSA,
        SignatureAlgorithm::Sha1WithDSA,
        SignatureAlgorithm::Sha256WithDSA,
        SignatureAlgorithm::Sha224WithECDSA,
        SignatureAlgorithm::Sha256WithECDSA,
        SignatureAlgorithm::Sha384WithECDSA,
        SignatureAlgorithm::Sha512WithECDSA,
        SignatureAlgorithm::Ed25519,
    ];

    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            SignatureAlgorithm::Sha256WithRSA => rfc5912::SHA_256_WITH_RSA_ENCRYPTION,
            SignatureAlgorithm::Sha384WithRSA => rfc5912::SHA_384_WITH_RSA_ENCRYPTION,
            SignatureAlgorithm::Sha512WithRSA => rfc5912::SHA_512_WITH_RSA_ENCRYPTION,
            SignatureAlgorithm::Sha1WithDSA => rfc5912::DSA_WITH_SHA_1,
            SignatureAlgorithm::Sha256WithDSA => rfc5912::DSA_WITH_SHA_256,
            SignatureAlgorithm::Sha224WithECDSA => rfc5912::ECDSA_WITH_SHA_224,
            SignatureAlgorithm::Sha256WithECDSA => rfc5912::ECDSA_WITH_SHA_256,
            SignatureAlgorithm::Sha384WithECDSA => rfc5912::ECDSA_WITH_SHA_384,
            SignatureAlgorithm::Sha512WithECDSA => rfc5912::ECDSA_WITH_SHA_512,
            SignatureAlgorithm::Ed25519 => rfc8410::ID_ED_25519,
        }
    }

    fn is_rsa(&self) -> bool {
        matches!(
            self,
            SignatureAlgorithm::Sha256WithRSA
                | SignatureAlgorithm::Sha384WithRSA
                | SignatureAlgorithm::Sha512WithRSA
        )
    }

    fn is_dsa(&self) -> bool {
        matches!(
            self,
            SignatureAlgorithm::Sha1WithDSA | SignatureAlgorithm::Sha256WithDSA
        )
    }

    fn is_ecdsa(&self) -> bool {
        matches!(
            self,
            SignatureAlgorithm::Sha224WithECDSA
                | SignatureAlgorithm::Sha256WithECDSA
                | SignatureAlgorithm::Sha384WithECDSA
                | SignatureAlgorithm::Sha512WithECDSA
        )
    }

    /// Message digest named by the algorithm; `None` for Ed25519.
    fn digest(&self, message: &[u8]) -> Option<Vec<u8>> {
        let digest = match self {
            SignatureAlgorithm::Sha1WithDSA => Sha1::digest(message).to_vec(),
            SignatureAlgorithm::Sha224WithECDSA => Sha224::digest(message).to_vec(),
            SignatureAlgorithm::Sha256WithRSA
            | SignatureAlgorithm::Sha256WithDSA
            | SignatureAlgorithm::Sha256WithECDSA => Sha256::digest(message).to_vec(),
            SignatureAlgorithm::Sha384WithRSA | SignatureAlgorithm::Sha384WithECDSA => {
                Sha384::digest(message).to_vec()
            }
            SignatureAlgorithm::Sha512WithRSA | SignatureAlgorithm::Sha512WithECDSA => {
                Sha512::digest(message).to_vec()
            }
            SignatureAlgorithm::Ed25519 => return None,
        };
        Some(digest)
    }
}

impl From<SignatureAlgorithm> for AlgorithmIdentifierOwned {
    /// Converts a `SignatureAlgorithm` into an `AlgorithmIdentifierOwned`.
    ///
    /// RSA carries an explicit NULL parameter; every other algorithm omits it.
    fn from(value: SignatureAlgorithm) -> Self {
        let parameters = value.is_rsa().then(der::asn1::Any::null);
        AlgorithmIdentifierOwned {
            oid: value.oid(),
            parameters,
        }
    }
}

impl TryFrom<&AlgorithmIdentifierOwned> for SignatureAlgorithm {
    type Error = StewardError;

    fn try_from(value: &AlgorithmIdentifierOwned) -> Result<Self> {
        SignatureAlgorithm::ALL
            .into_iter()
            .find(|alg| alg.oid() == value.oid)
            .ok_or_else(|| {
                StewardError::DecodingError(format!("Unsupported signature algorithm {}", value.oid))
            })
    }
}

fn signature_error(e: rsa::signature::Error) -> StewardError {
    StewardError::SignatureError(e.to_string())
}

fn verify_pkcs1v15<D>(key: &rsa::RsaPublicKey, message: &[u8], signature: &[u8]) -> Result<()>
where
    D: Digest + AssociatedOid,
{
    let verifier = rsa::pkcs1v15::VerifyingKey::<D>::new(key.clone());
    let sig = rsa::pkcs1v15::Signature::try_from(signature).map_err(signature_error)?;
    verifier.verify(message, &sig).map_err(signature_error)
}

/// Left-pads a digest shorter than the curve's field so that it keeps its
/// integer value; longer digests are truncated by the verifier.
fn ecdsa_prehash(digest: Vec<u8>, field_len: usize) -> Vec<u8> {
    if digest.len() >= field_len {
        return digest;
    }
    let mut padded = vec![0u8; field_len - digest.len()];
    padded.extend_from_slice(&digest);
    padded
}

/// Key generation, signing and key identifiers.
pub trait CryptoProvider {
    /// Generates a fresh private key of `algorithm`.
    fn generate_key_pair(&self, algorithm: KeyAlgorithm) -> Result<PrivateKey>;

    /// Loads a PEM-encoded key, decrypting it with `password` when needed.
    fn load_private_key(&self, pem: &str, password: Option<&str>) -> Result<Key> {
        Key::from_pem(pem, password)
    }

    /// Subject key identifier of `public_key`.
    fn key_identifier(&self, public_key: &PublicKey) -> Result<Vec<u8>>;

    /// The algorithm `sign` uses for `key`.
    fn signature_algorithm(&self, key: &PrivateKey) -> SignatureAlgorithm;

    /// Signs `message` with `key`, returning the encoded signature.
    fn sign(&self, key: &PrivateKey, message: &[u8]) -> Result<Vec<u8>>;

    /// Verifies `signature` over `message`; any failure is an error.
    fn verify(
        &self,
        key: &PublicKey,
        algorithm: SignatureAlgorithm,
        message: &[u8],
        signature: &[u8],
    ) -> Result<()>;
}

/// [`CryptoProvider`] backed by the RustCrypto crates.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustCryptoProvider;

impl CryptoProvider for RustCryptoProvider {
    fn generate_key_pair(&self, algorithm: KeyAlgorithm) -> Result<PrivateKey> {
        let mut rng = rand_core::OsRng;
        let key = match algorithm {
            KeyAlgorithm::Rsa1024 | KeyAlgorithm::Rsa2048 | KeyAlgorithm::Rsa4096 => {
                let bits = match algorithm {
                    KeyAlgorithm::Rsa1024 => 1024,
                    KeyAlgorithm::Rsa2048 => 2048,
                    _ => 4096,
                };
                PrivateKey::Rsa(Box::new(rsa::RsaPrivateKey::new(&mut rng, bits)?))
            }
            KeyAlgorithm::Dsa1024 | KeyAlgorithm::Dsa2048 | KeyAlgorithm::Dsa3072 => {
                #[allow(deprecated)]
                let size = match algorithm {
                    KeyAlgorithm::Dsa1024 => dsa::KeySize::DSA_1024_160,
                    KeyAlgorithm::Dsa2048 => dsa::KeySize::DSA_2048_256,
                    _ => dsa::KeySize::DSA_3072_256,
                };
                let components = dsa::Components::generate(&mut rng, size);
                PrivateKey::Dsa(Box::new(dsa::SigningKey::generate(&mut rng, components)))
            }
            KeyAlgorithm::Secp224r1 => PrivateKey::P224(p224::SecretKey::random(&mut rng)),
            KeyAlgorithm::Secp256r1 => PrivateKey::P256(p256::SecretKey::random(&mut rng)),
            KeyAlgorithm::Secp256k1 => {
                PrivateKey::Secp256k1(k256::SecretKey::random(&mut rng))
            }
            KeyAlgorithm::Secp384r1 => PrivateKey::P384(p384::SecretKey::random(&mut rng)),
            KeyAlgorithm::Secp521r1 => PrivateKey::P521(p521::SecretKey::random(&mut rng)),
            KeyAlgorithm::Ed25519 => {
                PrivateKey::Ed25519(ed25519_dalek::SigningKey::generate(&mut rng))
            }
        };
        Ok(key)
    }

    fn key_identifier(&self, public_key: &PublicKey) -> Result<Vec<u8>> {
        let spki = public_key.to_spki()?;
        Ok(<Sha1 as sha1::Digest>::digest(spki.subject_public_key.raw_bytes()).to_vec())
    }

    fn signature_algorithm(&self, key: &PrivateKey) -> SignatureAlgorithm {
        match key {
            PrivateKey::Rsa(_) => SignatureAlgorithm::Sha256WithRSA,
            PrivateKey::Dsa(_) => SignatureAlgorithm::Sha256WithDSA,
            PrivateKey::P224(_) => SignatureAlgorithm::Sha224WithECDSA,
            PrivateKey::P256(_) | PrivateKey::Secp256k1(_) => SignatureAlgorithm::Sha256WithECDSA,
            PrivateKey::P384(_) => SignatureAlgorithm::Sha384WithECDSA,
            PrivateKey::P521(_) => SignatureAlgorithm::Sha512WithECDSA,
            PrivateKey::Ed25519(_) => SignatureAlgorithm::Ed25519,
        }
    }

    fn sign(&self, key: &PrivateKey, message: &[u8]) -> Result<Vec<u8>> {
        let signature = match key {
            PrivateKey::Rsa(k) => {
                let signer = rsa::pkcs1v15::SigningKey::<Sha256>::new((**k).clone());
                signer.sign(message).to_vec()
            }
            PrivateKey::Dsa(k) => {
                let sig: dsa::Signature = k
                    .try_sign_digest(Sha256::new_with_prefix(message))
                    .map_err(|e| StewardError::SignatureError(e.to_string()))?;
                sig.to_der()
                    .map_err(|e| StewardError::EncodingError(e.to_string()))?
            }
            PrivateKey::P224(k) => {
                let signer = p224::ecdsa::SigningKey::from(k);
                let sig: p224::ecdsa::Signature = signer.sign(message);
                sig.to_der().as_bytes().to_vec()
            }
            PrivateKey::P256(k) => {
                let signer = p256::ecdsa::SigningKey::from(k);
                let sig: p256::ecdsa::Signature = signer.sign(message);
                sig.to_der().as_bytes().to_vec()
            }
            PrivateKey::Secp256k1(k) => {
                let signer = k256::ecdsa::SigningKey::from(k);
                let sig: k256::ecdsa::Signature = signer.sign(message);
                sig.to_der().as_bytes().to_vec()
            }
            PrivateKey::P384(k) => {
                let signer = p384::ecdsa::SigningKey::from(k);
                let sig: p384::ecdsa::Signature = signer.sign(message);
                sig.to_der().as_bytes().to_vec()
            }
            PrivateKey::P521(k) => {
                let signer = p521::ecdsa::SigningKey::from_bytes(&k.to_bytes())
                    .map_err(|e| StewardError::SignatureError(e.to_string()))?;
                let sig: p521::ecdsa::Signature = signer.sign(message);
                sig.to_der().as_bytes().to_vec()
            }
            PrivateKey::Ed25519(k) => {
                let sig: ed25519_dalek::Signature = k.sign(message);
                sig.to_bytes().to_vec()
            }
        };
        Ok(signature)
    }

    fn verify(
        &self,
        key: &PublicKey,
        algorithm: SignatureAlgorithm,
        message: &[u8],
        signature: &[u8],
    ) -> Result<()> {
        let prehash = algorithm.digest(message);
        match (key, prehash) {
            (PublicKey::Rsa(k), Some(_)) if algorithm.is_rsa() => match algorithm {
                SignatureAlgorithm::Sha384WithRSA => verify_pkcs1v15::<Sha384>(k, message, signature),
                SignatureAlgorithm::Sha512WithRSA => verify_pkcs1v15::<Sha512>(k, message, signature),
                _ => verify_pkcs1v15::<Sha256>(k, message, signature),
            },
            (PublicKey::Dsa(k), Some(prehash)) if algorithm.is_dsa() => {
                let sig = dsa::Signature::from_der(signature)
                    .map_err(|e| StewardError::SignatureError(e.to_string()))?;
                k.verify_prehash(&prehash, &sig).map_err(signature_error)
            }
            (PublicKey::P224(k), Some(prehash)) if algorithm.is_ecdsa() => {
                let sig = p224::ecdsa::Signature::from_der(signature).map_err(signature_error)?;
                p224::ecdsa::VerifyingKey::from(k)
                    .verify_prehash(&ecdsa_prehash(prehash, 28), &sig)
                    .map_err(signature_error)
            }
            (PublicKey::P256(k), Some(prehash)) if algorithm.is_ecdsa() => {
                let sig = p256::ecdsa::Signature::from_der(signature).map_err(signature_error)?;
                p256::ecdsa::VerifyingKey::from(k)
                    .verify_prehash(&ecdsa_prehash(prehash, 32), &sig)
                    .map_err(signature_error)
            }
            (PublicKey::Secp256k1(k), Some(prehash)) if algorithm.is_ecdsa() => {
                let sig = k256::ecdsa::Signature::from_der(signature).map_err(signature_error)?;
                let sig = sig.normalize_s().unwrap_or(sig);
                k256::ecdsa::VerifyingKey::from(k)
                    .verify_prehash(&ecdsa_prehash(prehash, 32), &sig)
                    .map_err(signature_error)
            }
            (PublicKey::P384(k), Some(prehash)) if algorithm.is_ecdsa() => {
                let sig = p384::ecdsa::Signature::from_der(signature).map_err(signature_error)?;
                p384::ecdsa::VerifyingKey::from(k)
                    .verify_prehash(&ecdsa_prehash(prehash, 48), &sig)
                    .map_err(signature_error)
            }
            (PublicKey::P521(k), Some(prehash)) if algorithm.is_ecdsa() => {
                let verifier = p521::ecdsa::VerifyingKey::from_sec1_bytes(&k.to_sec1_bytes())
                    .map_err(signature_error)?;
                let sig = p521::ecdsa::Signature::from_der(signature).map_err(signature_error)?;
                verifier
                    .verify_prehash(&ecdsa_prehash(prehash, 66), &sig)
                    .map_err(signature_error)
            }
            (PublicKey::Ed25519(k), None) => {
                let sig = ed25519_dalek::Signature::from_slice(signature).map_err(signature_error)?;
                k.verify(message, &sig).map_err(signature_error)
            }
            (key, _) => Err(StewardError::SignatureError(format!(
                "{algorithm:?} cannot be verified with a {key:?}"
            ))),
        }
    }
}
