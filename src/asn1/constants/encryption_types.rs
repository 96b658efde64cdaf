use num_enum::{IntoPrimitive, TryFromPrimitive};
use std::fmt;

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum EncryptionType {
    DES_CBC_CRC = 1,
    DES_CBC_MD4 = 2,
    DES_CBC_MD5 = 3,
    DES3_CBC_MD5 = 5,
    DES3_CBC_SHA1 = 7,
    DES3_CBC_SHA1_KD = 16,
    AES128_CTS_HMAC_SHA1_96 = 17,
    AES256_CTS_HMAC_SHA1_96 = 18,
    AES128_CTS_HMAC_SHA256_128 = 19,
    AES256_CTS_HMAC_SHA384_192 = 20,
    RC4_HMAC = 23,
    RC4_HMAC_EXP = 24,
    CAMELLIA128_CTS_CMAC = 25,
    CAMELLIA256_CTS_CMAC = 26,
}

impl EncryptionType {
    /// Higher is stronger. Used to order what we offer and what we pick from a peer.
    pub fn strength(self) -> u8 {
        match self {
            EncryptionType::AES256_CTS_HMAC_SHA384_192 => 9,
            EncryptionType::AES256_CTS_HMAC_SHA1_96 => 8,
            EncryptionType::CAMELLIA256_CTS_CMAC => 7,
            EncryptionType::AES128_CTS_HMAC_SHA256_128 => 6,
            EncryptionType::AES128_CTS_HMAC_SHA1_96 => 5,
            EncryptionType::CAMELLIA128_CTS_CMAC => 4,
            EncryptionType::DES3_CBC_SHA1_KD => 3,
            EncryptionType::RC4_HMAC => 2,
            EncryptionType::RC4_HMAC_EXP => 1,
            _ => 0,
        }
    }
}

impl fmt::Display for EncryptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EncryptionType::AES128_CTS_HMAC_SHA1_96 => "aes128-cts-hmac-sha1-96",
            EncryptionType::AES256_CTS_HMAC_SHA1_96 => "aes256-cts-hmac-sha1-96",
            EncryptionType::AES128_CTS_HMAC_SHA256_128 => "aes128-cts-hmac-sha256-128",
            EncryptionType::AES256_CTS_HMAC_SHA384_192 => "aes256-cts-hmac-sha384-192",
            EncryptionType::RC4_HMAC => "rc4-hmac",
            EncryptionType::RC4_HMAC_EXP => "rc4-hmac-exp",
            other => return write!(f, "etype-{}", i32::from(*other)),
        };
        f.write_str(name)
    }
}
