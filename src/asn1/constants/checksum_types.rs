use num_enum::{IntoPrimitive, TryFromPrimitive};

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(i32)]
pub enum ChecksumType {
    RSA_MD5 = 7,
    HMAC_SHA1_DES3_KD = 12,
    HMAC_SHA1_96_AES128 = 15,
    HMAC_SHA1_96_AES256 = 16,
    HMAC_SHA256_128_AES128 = 19,
    HMAC_SHA384_192_AES256 = 20,
    GSSAPI = 0x8003,
    HMAC_MD5 = -138,
}
