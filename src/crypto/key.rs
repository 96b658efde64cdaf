use crate::asn1::constants::EncryptionType;
use crate::asn1::encryption_key::EncryptionKey;
use crate::error::KrbError;
use std::fmt;
use zeroize::Zeroizing;

/// Key material bound to the encryption type it belongs to. The bytes are cleared when
/// the key is dropped and never appear in `Debug` output.
#[derive(Clone, PartialEq, Eq)]
pub struct CryptoKey {
    etype: EncryptionType,
    kvno: Option<u32>,
    value: Zeroizing<Vec<u8>>,
    salt: Option<String>,
}

impl fmt::Debug for CryptoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoKey")
            .field("etype", &self.etype)
            .field("kvno", &self.kvno)
            .field("value", &"<redacted>")
            .field("salt", &self.salt)
            .finish()
    }
}

impl CryptoKey {
    pub fn new(etype: EncryptionType, value: Vec<u8>) -> Self {
        CryptoKey {
            etype,
            kvno: None,
            value: Zeroizing::new(value),
            salt: None,
        }
    }

    pub fn with_kvno(mut self, kvno: u32) -> Self {
        self.kvno = Some(kvno);
        self
    }

    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    pub fn etype(&self) -> EncryptionType {
        self.etype
    }

    pub fn kvno(&self) -> Option<u32> {
        self.kvno
    }

    pub fn salt(&self) -> Option<&str> {
        self.salt.as_deref()
    }

    pub(crate) fn value(&self) -> &[u8] {
        &self.value
    }

    /// Check the key is for `etype` and has `len` bytes, then return the bytes.
    pub(crate) fn material(&self, etype: EncryptionType, len: usize) -> Result<&[u8], KrbError> {
        if self.etype != etype || self.value.len() != len {
            return Err(KrbError::InvalidEncryptionKey);
        }
        Ok(&self.value)
    }

    pub fn from_encryption_key(key: &EncryptionKey) -> Result<Self, KrbError> {
        let etype = EncryptionType::try_from(key.keytype)
            .map_err(|_| KrbError::UnsupportedEncryption(key.keytype))?;
        Ok(CryptoKey::new(etype, key.keyvalue.to_vec()))
    }

    pub fn to_encryption_key(&self) -> EncryptionKey {
        EncryptionKey {
            keytype: self.etype.into(),
            keyvalue: self.value.clone(),
        }
    }
}
