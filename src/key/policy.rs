use std::fmt;
use std::str::FromStr;

use bon::bon;
use const_oid::ObjectIdentifier;
use pkcs8::PrivateKeyInfo;
use pkcs8::pkcs5::pbes2;
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use time::Duration;
use tracing::debug;

use super::{Key, KeyAlgorithm};
use crate::error::{Result, StewardError};
use crate::provider::CryptoProvider;

const PBKDF2_ITERATIONS: u32 = 600_000;

const AES_128_CBC: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.1.2");
const AES_192_CBC: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.1.22");
const AES_256_CBC: ObjectIdentifier = ObjectIdentifier::new_unwrap("2.16.840.1.101.3.4.1.42");

/// Symmetric cipher protecting a private key at rest.
///
/// Keys are wrapped in PKCS#8 PBES2 with a PBKDF2-HMAC-SHA256 derived key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cipher {
    Aes128Cbc,
    Aes192Cbc,
    Aes256Cbc,
}

impl Cipher {
    pub const ALL: [Cipher; 3] = [Cipher::Aes128Cbc, Cipher::Aes192Cbc, Cipher::Aes256Cbc];

    pub fn as_str(&self) -> &'static str {
        match self {
            Cipher::Aes128Cbc => "aes-128-cbc",
            Cipher::Aes192Cbc => "aes-192-cbc",
            Cipher::Aes256Cbc => "aes-256-cbc",
        }
    }

    pub fn oid(&self) -> ObjectIdentifier {
        match self {
            Cipher::Aes128Cbc => AES_128_CBC,
            Cipher::Aes192Cbc => AES_192_CBC,
            Cipher::Aes256Cbc => AES_256_CBC,
        }
    }

    pub(crate) fn from_oid(oid: ObjectIdentifier) -> Result<Self> {
        Cipher::ALL
            .into_iter()
            .find(|c| c.oid() == oid)
            .ok_or_else(|| StewardError::InvalidInput(format!("unsupported key cipher {oid}")))
    }

    /// Encrypts an unencrypted PKCS#8 document with `password`.
    pub(crate) fn encrypt(&self, pkcs8_der: &[u8], password: &str) -> Result<pkcs8::SecretDocument> {
        let mut salt = [0u8; 16];
        let mut iv = [0u8; 16];
        OsRng.fill_bytes(&mut salt);
        OsRng.fill_bytes(&mut iv);

        let params = match self {
            Cipher::Aes128Cbc => {
                pbes2::Parameters::pbkdf2_sha256_aes128cbc(PBKDF2_ITERATIONS, &salt, &iv)
            }
            Cipher::Aes192Cbc => {
                pbes2::Parameters::pbkdf2_sha256_aes256cbc(PBKDF2_ITERATIONS, &salt, &iv).map(
                    |mut params| {
                        params.encryption = pbes2::EncryptionScheme::Aes192Cbc { iv: &iv };
                        params
                    },
                )
            }
            Cipher::Aes256Cbc => {
                pbes2::Parameters::pbkdf2_sha256_aes256cbc(PBKDF2_ITERATIONS, &salt, &iv)
            }
        }
        .map_err(|e| StewardError::EncodingError(format!("invalid {self} parameters: {e}")))?;

        let info = PrivateKeyInfo::try_from(pkcs8_der)?;
        info.encrypt_with_params(params, password)
            .map_err(|e| StewardError::EncodingError(format!("{self} encryption failed: {e}")))
    }
}

impl fmt::Display for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cipher {
    type Err = StewardError;

    fn from_str(s: &str) -> Result<Self> {
        Cipher::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| StewardError::InvalidConfig(format!("unsupported key cipher {s}")))
    }
}

/// Validity, algorithm and at-rest cipher for the keys an authority signs
/// with.
///
/// # Example
/// ```
/// use certsteward::key::{Cipher, KeyAlgorithm, KeyPolicy};
///
/// let policy = KeyPolicy::builder()
///     .duration(time::Duration::days(365))
///     .algorithm(KeyAlgorithm::Secp256r1)
///     .cipher(Cipher::Aes256Cbc)
///     .build()
///     .unwrap();
/// assert_eq!(policy.duration().whole_days(), 365);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "KeyPolicyRepr", into = "KeyPolicyRepr")]
pub struct KeyPolicy {
    duration: Duration,
    algorithm: KeyAlgorithm,
    cipher: Cipher,
}

#[bon]
impl KeyPolicy {
    /// Creates a policy; the duration must be positive.
    #[builder]
    pub fn new(duration: Duration, algorithm: KeyAlgorithm, cipher: Cipher) -> Result<Self> {
        if !duration.is_positive() {
            return Err(StewardError::InvalidConfig(
                "key duration must be positive".to_string(),
            ));
        }
        Ok(Self {
            duration,
            algorithm,
            cipher,
        })
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    pub fn cipher(&self) -> Cipher {
        self.cipher
    }

    /// Generates a fresh key of the configured algorithm.
    pub fn generate_key<P: CryptoProvider>(&self, provider: &P) -> Result<Key> {
        debug!(algorithm = %self.algorithm, "generating key");
        Key::from_private(provider.generate_key_pair(self.algorithm)?)
    }

    /// Generates a fresh key and returns it encrypted with the configured
    /// cipher as PEM.
    pub fn generate_ciphered_key<P: CryptoProvider>(
        &self,
        provider: &P,
        passphrase: &str,
    ) -> Result<String> {
        let key = self.generate_key(provider)?;
        key.get_pem(Some(self.cipher), Some(passphrase))
    }
}

#[derive(Serialize, Deserialize)]
struct KeyPolicyRepr {
    duration: i64,
    algorithm: KeyAlgorithm,
    encryption: String,
}

impl TryFrom<KeyPolicyRepr> for KeyPolicy {
    type Error = StewardError;

    fn try_from(repr: KeyPolicyRepr) -> Result<Self> {
        KeyPolicy::builder()
            .duration(Duration::seconds(repr.duration))
            .algorithm(repr.algorithm)
            .cipher(repr.encryption.parse()?)
            .build()
    }
}

impl From<KeyPolicy> for KeyPolicyRepr {
    fn from(policy: KeyPolicy) -> Self {
        KeyPolicyRepr {
            duration: policy.duration.whole_seconds(),
            algorithm: policy.algorithm,
            encryption: policy.cipher.as_str().to_string(),
        }
    }
}
