//! Cryptographic algorithm registry.
//!
//! Every algorithm the protocol needs is reached through a [`CryptoRegistry`], which holds
//! one [`CryptoBackend`] chosen by probing the host once. Callers ask the registry for an
//! algorithm object by kind or by encryption type and get back a stateless `&'static dyn`
//! trait object, or an error explaining why it is not available here.

mod aes_cts;
mod key;
mod key_agreement;
mod nfold;
mod primitives;
mod rc4_hmac;

pub use self::key::CryptoKey;
pub use self::nfold::nfold;

use crate::asn1::constants::{ChecksumType, EncryptionType};
use crate::error::KrbError;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info};
use zeroize::Zeroizing;

pub(crate) const AES_BLOCK_SIZE: usize = 16;
pub(crate) const AES_128_KEY_LEN: usize = 16;
pub(crate) const AES_256_KEY_LEN: usize = 32;
pub(crate) const SHA1_HMAC_LEN: usize = 12;
pub(crate) const RC4_KEY_LEN: usize = 16;

/// The RFC 3962 iteration count used when a KDC sends no s2kparams.
pub const RFC_PBKDF2_SHA1_ITER: u32 = 4096;

/// Kernels that refuse legacy algorithms advertise it here.
const FIPS_ENABLED_PATH: &str = "/proc/sys/crypto/fips_enabled";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashKind {
    Md4,
    Md5,
    Sha1,
    Sha256,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HmacKind {
    HmacMd5,
    HmacSha1,
    HmacSha256,
}

/// Finite field Diffie-Hellman groups from RFC 2409 and RFC 3526.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAgreementKind {
    ModpGroup2,
    ModpGroup14,
}

pub trait DigestAlgorithm: Send + Sync {
    fn name(&self) -> &'static str;

    fn output_len(&self) -> usize;

    fn digest(&self, data: &[u8]) -> Vec<u8>;
}

pub trait MacAlgorithm: Send + Sync {
    fn name(&self) -> &'static str;

    fn mac(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, KrbError>;
}

/// A Kerberos encryption type: the authenticated cipher plus its keyed checksum
/// (RFC 3961 section 3).
pub trait KerberosCipher: Send + Sync {
    fn etype(&self) -> EncryptionType;

    fn key_len(&self) -> usize;

    fn checksum_type(&self) -> ChecksumType;

    fn encrypt(&self, key: &CryptoKey, usage: i32, plaintext: &[u8]) -> Result<Vec<u8>, KrbError>;

    /// Integrity failure is reported as [`KrbError::MessageAuthenticationFailed`].
    fn decrypt(
        &self,
        key: &CryptoKey,
        usage: i32,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KrbError>;

    fn checksum(&self, key: &CryptoKey, usage: i32, data: &[u8]) -> Result<Vec<u8>, KrbError>;

    fn verify_checksum(
        &self,
        key: &CryptoKey,
        usage: i32,
        data: &[u8],
        checksum: &[u8],
    ) -> Result<(), KrbError> {
        let expected = self.checksum(key, usage, data)?;
        if primitives::constant_time_eq(&expected, checksum) {
            Ok(())
        } else {
            Err(KrbError::ChecksumMismatch)
        }
    }
}

pub trait StringToKey: Send + Sync {
    fn etype(&self) -> EncryptionType;

    /// Derive the long term key for `password`. `params` is the s2kparams octet string
    /// from ETYPE-INFO2, if the KDC sent one.
    fn string_to_key(
        &self,
        password: &str,
        salt: &str,
        params: Option<&[u8]>,
    ) -> Result<CryptoKey, KrbError>;

    fn random_key(&self) -> CryptoKey;
}

pub trait KeyAgreement: Send + Sync {
    fn name(&self) -> &'static str;

    /// Returns the private exponent and the public value, both big endian.
    fn generate(&self) -> (Zeroizing<Vec<u8>>, Vec<u8>);

    fn agree(&self, private: &[u8], peer_public: &[u8]) -> Result<Zeroizing<Vec<u8>>, KrbError>;
}

/// A source of algorithm implementations.
pub trait CryptoBackend: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    fn hash(&self, kind: HashKind) -> Result<&'static dyn DigestAlgorithm, KrbError>;

    fn hmac(&self, kind: HmacKind) -> Result<&'static dyn MacAlgorithm, KrbError>;

    fn symmetric(&self, etype: EncryptionType) -> Result<&'static dyn KerberosCipher, KrbError>;

    fn key_derivation(&self, etype: EncryptionType) -> Result<&'static dyn StringToKey, KrbError>;

    fn key_agreement(&self, kind: KeyAgreementKind)
        -> Result<&'static dyn KeyAgreement, KrbError>;
}

/// Pure Rust implementations of every supported algorithm.
#[derive(Debug, Default, Clone, Copy)]
pub struct RustCryptoBackend;

impl CryptoBackend for RustCryptoBackend {
    fn name(&self) -> &'static str {
        "rust-crypto"
    }

    fn hash(&self, kind: HashKind) -> Result<&'static dyn DigestAlgorithm, KrbError> {
        Ok(match kind {
            HashKind::Md4 => &primitives::Md4Digest,
            HashKind::Md5 => &primitives::Md5Digest,
            HashKind::Sha1 => &primitives::Sha1Digest,
            HashKind::Sha256 => &primitives::Sha256Digest,
        })
    }

    fn hmac(&self, kind: HmacKind) -> Result<&'static dyn MacAlgorithm, KrbError> {
        Ok(match kind {
            HmacKind::HmacMd5 => &primitives::HmacMd5,
            HmacKind::HmacSha1 => &primitives::HmacSha1,
            HmacKind::HmacSha256 => &primitives::HmacSha256,
        })
    }

    fn symmetric(&self, etype: EncryptionType) -> Result<&'static dyn KerberosCipher, KrbError> {
        match etype {
            EncryptionType::AES128_CTS_HMAC_SHA1_96 => Ok(&aes_cts::Aes128CtsHmacSha196),
            EncryptionType::AES256_CTS_HMAC_SHA1_96 => Ok(&aes_cts::Aes256CtsHmacSha196),
            EncryptionType::RC4_HMAC => Ok(&rc4_hmac::Rc4Hmac),
            other => Err(KrbError::UnsupportedEncryption(other.into())),
        }
    }

    fn key_derivation(&self, etype: EncryptionType) -> Result<&'static dyn StringToKey, KrbError> {
        match etype {
            EncryptionType::AES128_CTS_HMAC_SHA1_96 => Ok(&aes_cts::Aes128CtsHmacSha196),
            EncryptionType::AES256_CTS_HMAC_SHA1_96 => Ok(&aes_cts::Aes256CtsHmacSha196),
            EncryptionType::RC4_HMAC => Ok(&rc4_hmac::Rc4Hmac),
            other => Err(KrbError::UnsupportedEncryption(other.into())),
        }
    }

    fn key_agreement(
        &self,
        kind: KeyAgreementKind,
    ) -> Result<&'static dyn KeyAgreement, KrbError> {
        Ok(match kind {
            KeyAgreementKind::ModpGroup2 => &key_agreement::MODP_GROUP_2,
            KeyAgreementKind::ModpGroup14 => &key_agreement::MODP_GROUP_14,
        })
    }
}

/// A backend for hosts running in FIPS mode. Legacy primitives are refused outright and
/// never substituted with something else.
#[derive(Debug, Default, Clone, Copy)]
pub struct RestrictedBackend {
    inner: RustCryptoBackend,
}

impl CryptoBackend for RestrictedBackend {
    fn name(&self) -> &'static str {
        "restricted"
    }

    fn hash(&self, kind: HashKind) -> Result<&'static dyn DigestAlgorithm, KrbError> {
        match kind {
            HashKind::Md4 => Err(KrbError::PlatformNotSupported("MD4")),
            HashKind::Md5 => Err(KrbError::PlatformNotSupported("MD5")),
            other => self.inner.hash(other),
        }
    }

    fn hmac(&self, kind: HmacKind) -> Result<&'static dyn MacAlgorithm, KrbError> {
        match kind {
            HmacKind::HmacMd5 => Err(KrbError::PlatformNotSupported("HMAC-MD5")),
            other => self.inner.hmac(other),
        }
    }

    fn symmetric(&self, etype: EncryptionType) -> Result<&'static dyn KerberosCipher, KrbError> {
        match etype {
            EncryptionType::RC4_HMAC | EncryptionType::RC4_HMAC_EXP => {
                Err(KrbError::PlatformNotSupported("RC4"))
            }
            other => self.inner.symmetric(other),
        }
    }

    fn key_derivation(&self, etype: EncryptionType) -> Result<&'static dyn StringToKey, KrbError> {
        match etype {
            // The RC4 string to key is an MD4 digest.
            EncryptionType::RC4_HMAC | EncryptionType::RC4_HMAC_EXP => {
                Err(KrbError::PlatformNotSupported("MD4"))
            }
            other => self.inner.key_derivation(other),
        }
    }

    fn key_agreement(
        &self,
        kind: KeyAgreementKind,
    ) -> Result<&'static dyn KeyAgreement, KrbError> {
        match kind {
            KeyAgreementKind::ModpGroup2 => Err(KrbError::PlatformNotSupported("MODP group 2")),
            other => self.inner.key_agreement(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CryptoRegistry {
    backend: Arc<dyn CryptoBackend>,
}

static GLOBAL_REGISTRY: OnceLock<CryptoRegistry> = OnceLock::new();

impl CryptoRegistry {
    pub fn new(backend: Arc<dyn CryptoBackend>) -> Self {
        CryptoRegistry { backend }
    }

    /// The process wide registry, detected on first use.
    pub fn global() -> &'static CryptoRegistry {
        GLOBAL_REGISTRY.get_or_init(CryptoRegistry::detect)
    }

    /// Select a backend for this host.
    pub fn detect() -> Self {
        let restricted = match std::fs::read_to_string(FIPS_ENABLED_PATH) {
            Ok(value) => value.trim() == "1",
            Err(err) => {
                debug!(?err, "unable to read fips mode, assuming unrestricted");
                false
            }
        };

        let backend: Arc<dyn CryptoBackend> = if restricted {
            Arc::new(RestrictedBackend::default())
        } else {
            Arc::new(RustCryptoBackend)
        };
        info!(backend = backend.name(), "selected crypto backend");
        CryptoRegistry { backend }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn hash(&self, kind: HashKind) -> Result<&'static dyn DigestAlgorithm, KrbError> {
        self.backend.hash(kind).inspect_err(|err| {
            error!(?err, ?kind, "hash algorithm unavailable");
        })
    }

    pub fn hmac(&self, kind: HmacKind) -> Result<&'static dyn MacAlgorithm, KrbError> {
        self.backend.hmac(kind).inspect_err(|err| {
            error!(?err, ?kind, "hmac algorithm unavailable");
        })
    }

    /// Look up a cipher by its wire etype number. Unknown numbers fail closed.
    pub fn symmetric(&self, etype: i32) -> Result<&'static dyn KerberosCipher, KrbError> {
        let etype = EncryptionType::try_from(etype).map_err(|_| {
            error!(?etype, "unknown encryption type");
            KrbError::UnsupportedEncryption(etype)
        })?;
        self.backend.symmetric(etype).inspect_err(|err| {
            error!(?err, %etype, "cipher unavailable");
        })
    }

    pub fn key_derivation(&self, etype: i32) -> Result<&'static dyn StringToKey, KrbError> {
        let etype = EncryptionType::try_from(etype).map_err(|_| {
            error!(?etype, "unknown encryption type");
            KrbError::UnsupportedEncryption(etype)
        })?;
        self.backend.key_derivation(etype).inspect_err(|err| {
            error!(?err, %etype, "string to key unavailable");
        })
    }

    pub fn key_agreement(
        &self,
        kind: KeyAgreementKind,
    ) -> Result<&'static dyn KeyAgreement, KrbError> {
        self.backend.key_agreement(kind).inspect_err(|err| {
            error!(?err, ?kind, "key agreement unavailable");
        })
    }

    /// The cipher matching a key's own etype.
    pub fn cipher_for(&self, key: &CryptoKey) -> Result<&'static dyn KerberosCipher, KrbError> {
        self.symmetric(key.etype().into())
    }

    pub fn string_to_key(
        &self,
        etype: i32,
        password: &str,
        salt: &str,
        params: Option<&[u8]>,
    ) -> Result<CryptoKey, KrbError> {
        self.key_derivation(etype)?
            .string_to_key(password, salt, params)
    }
}

impl Default for CryptoRegistry {
    fn default() -> Self {
        CryptoRegistry::global().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asn1::constants::key_usage;
    use crate::asn1::pa_enc_ts_enc::PaEncTsEnc;
    use crate::asn1::encrypted_data::EncryptedData;
    use crate::asn1::Asn1Entity;
    use assert_hex::assert_eq_hex;
    use std::time::{Duration, SystemTime};

    fn rust_registry() -> CryptoRegistry {
        CryptoRegistry::new(Arc::new(RustCryptoBackend))
    }

    fn restricted_registry() -> CryptoRegistry {
        CryptoRegistry::new(Arc::new(RestrictedBackend::default()))
    }

    #[test]
    fn unknown_etype_fails_closed() {
        let registry = rust_registry();
        let err = registry.symmetric(99).err().expect("must fail");
        assert_eq!(err.to_string(), "unsupported encryption type 99");

        let err = registry.symmetric(1).err().expect("must fail");
        assert!(matches!(err, KrbError::UnsupportedEncryption(1)));
    }

    #[test]
    fn restricted_backend_names_the_primitive() {
        let registry = restricted_registry();

        let err = registry.hash(HashKind::Md4).err().expect("must fail");
        assert!(matches!(err, KrbError::PlatformNotSupported("MD4")));
        assert!(err.to_string().contains("MD4"));

        let err = registry.symmetric(23).err().expect("must fail");
        assert!(err.to_string().contains("RC4"));

        let err = registry.key_derivation(23).err().expect("must fail");
        assert!(err.to_string().contains("MD4"));

        let err = registry.hmac(HmacKind::HmacMd5).err().expect("must fail");
        assert!(err.to_string().contains("HMAC-MD5"));

        let err = registry
            .key_agreement(KeyAgreementKind::ModpGroup2)
            .err()
            .expect("must fail");
        assert!(err.to_string().contains("MODP group 2"));

        // Modern algorithms are still served.
        assert!(registry.symmetric(18).is_ok());
        assert!(registry.hash(HashKind::Sha256).is_ok());
        assert!(registry.key_agreement(KeyAgreementKind::ModpGroup14).is_ok());
    }

    #[test]
    fn global_registry_is_stable() {
        let a = CryptoRegistry::global() as *const CryptoRegistry;
        let b = CryptoRegistry::global() as *const CryptoRegistry;
        assert_eq!(a, b);
    }

    #[test]
    fn aes256_pa_enc_timestamp_from_active_directory() {
        let _ = tracing_subscriber::fmt::try_init();
        let registry = rust_registry();

        let blob = hex::decode("3041a003020112a23a0438a708af058781f75eb72d318ecae2f2830aa8ad4c659faeb477e29e131f923db70a33247ed25aa9d7dda218bcdbdf2203e2125fce1465265e")
            .expect("hex");
        let enc = EncryptedData::from_der(&blob).expect("encrypted data");
        assert_eq!(enc.etype, 18);

        let key = registry
            .string_to_key(enc.etype, "Suse1234", "AFOREST.ADuser1", None)
            .expect("string to key");
        let plain = registry
            .symmetric(enc.etype)
            .and_then(|c| c.decrypt(&key, key_usage::AS_REQ_PA_ENC_TIMESTAMP, &enc.cipher))
            .expect("decrypt");

        let ts = PaEncTsEnc::from_der(&plain).expect("timestamp");
        assert_eq!(
            ts.patimestamp,
            SystemTime::UNIX_EPOCH + Duration::from_secs(1_718_192_887)
        );
        assert_eq!(ts.pausec, Some(751259));
    }

    #[test]
    fn wrong_password_is_authentication_failure() {
        let registry = rust_registry();
        let blob = hex::decode("3041a003020112a23a0438a708af058781f75eb72d318ecae2f2830aa8ad4c659faeb477e29e131f923db70a33247ed25aa9d7dda218bcdbdf2203e2125fce1465265e")
            .expect("hex");
        let enc = EncryptedData::from_der(&blob).expect("encrypted data");
        let key = registry
            .string_to_key(enc.etype, "wrong", "AFOREST.ADuser1", None)
            .expect("string to key");
        let err = registry
            .symmetric(enc.etype)
            .and_then(|c| c.decrypt(&key, 1, &enc.cipher))
            .err()
            .expect("must fail");
        assert!(matches!(err, KrbError::MessageAuthenticationFailed));
        assert!(err.is_crypto_failure());
    }

    #[test]
    fn key_etype_must_match_cipher() {
        let registry = rust_registry();
        let key = registry
            .string_to_key(17, "password", "EXAMPLE.COMuser", None)
            .expect("string to key");
        let aes256 = registry.symmetric(18).expect("aes256");
        assert!(matches!(
            aes256.encrypt(&key, 1, b"data"),
            Err(KrbError::InvalidEncryptionKey)
        ));
        assert_eq_hex!(registry.cipher_for(&key).expect("cipher").key_len(), 16);
    }
}
