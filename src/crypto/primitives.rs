use super::{DigestAlgorithm, MacAlgorithm};
use crate::error::KrbError;
use hmac::{Hmac, Mac};
use sha1::Digest;

macro_rules! digest_algorithm {
    ($name:ident, $hasher:ty, $label:expr) => {
        pub(crate) struct $name;

        impl DigestAlgorithm for $name {
            fn name(&self) -> &'static str {
                $label
            }

            fn output_len(&self) -> usize {
                <$hasher as Digest>::output_size()
            }

            fn digest(&self, data: &[u8]) -> Vec<u8> {
                <$hasher as Digest>::digest(data).to_vec()
            }
        }
    };
}

macro_rules! mac_algorithm {
    ($name:ident, $hasher:ty, $label:expr) => {
        pub(crate) struct $name;

        impl MacAlgorithm for $name {
            fn name(&self) -> &'static str {
                $label
            }

            fn mac(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, KrbError> {
                let mut mac = <Hmac<$hasher> as Mac>::new_from_slice(key)
                    .map_err(|_| KrbError::InvalidHmacKey)?;
                mac.update(data);
                Ok(mac.finalize().into_bytes().to_vec())
            }
        }
    };
}

digest_algorithm!(Md4Digest, md4::Md4, "MD4");
digest_algorithm!(Md5Digest, md5::Md5, "MD5");
digest_algorithm!(Sha1Digest, sha1::Sha1, "SHA-1");
digest_algorithm!(Sha256Digest, sha2::Sha256, "SHA-256");

mac_algorithm!(HmacMd5, md5::Md5, "HMAC-MD5");
mac_algorithm!(HmacSha1, sha1::Sha1, "HMAC-SHA1");
mac_algorithm!(HmacSha256, sha2::Sha256, "HMAC-SHA256");

/// Compare two MACs without an early exit on the first differing byte.
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_hex::assert_eq_hex;

    #[test]
    fn md4_rfc1320() {
        assert_eq_hex!(
            Md4Digest.digest(b""),
            hex::decode("31d6cfe0d16ae931b73c59d7e0c089c0").expect("hex")
        );
        assert_eq_hex!(
            Md4Digest.digest(b"message digest"),
            hex::decode("d9130a8164549fe818874806e1c7014b").expect("hex")
        );
    }

    #[test]
    fn hmac_md5_rfc2104() {
        let out = HmacMd5
            .mac(b"Jefe", b"what do ya want for nothing?")
            .expect("hmac");
        assert_eq_hex!(
            out,
            hex::decode("750c783e6ab0b503eaa86e310a5db738").expect("hex")
        );
    }

    #[test]
    fn hmac_sha1_checksum() {
        let input = hex::decode("3067a00703050000810000a20d1b0b4558414d504c452e434f4da3253023a003020103a11c301a1b04686f73741b127065707065722e6578616d706c652e636f6da511180f32303234313031303230333832335aa7060204769220c1a80b3009020112020113020114")
            .expect("hex");
        let key = hex::decode("14AD9322E8134937815FB995067F8C1859A8237C599E450F2BC1E99330C94232")
            .expect("hex");
        let out = HmacSha1.mac(&key, &input).expect("hmac");
        assert_eq_hex!(
            &out[..12],
            hex::decode("351E56F9FA207CDCA62A0BDC").expect("hex").as_slice()
        );
    }

    #[test]
    fn constant_time_compare() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"ab"));
    }
}
