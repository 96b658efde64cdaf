//! rc4-hmac (RFC 4757), the Windows legacy encryption type.

use super::primitives::constant_time_eq;
use super::{CryptoKey, KerberosCipher, StringToKey, RC4_KEY_LEN};
use crate::asn1::constants::{key_usage, ChecksumType, EncryptionType};
use crate::error::KrbError;
use hmac::{Hmac, Mac};
use md4::{Digest, Md4};
use md5::Md5;
use rand::RngCore;
use rc4::consts::U16;
use rc4::{KeyInit, Rc4, StreamCipher};
use tracing::error;
use zeroize::Zeroizing;

type HmacMd5 = Hmac<Md5>;

const CONFOUNDER_LEN: usize = 8;
const CHECKSUM_LEN: usize = 16;

/// RFC 4757 section 3 reuses the TGS-REP usage for AS-REP encrypted parts.
fn ms_usage(usage: i32) -> i32 {
    match usage {
        key_usage::AS_REP_ENC_PART => key_usage::TGS_REP_ENC_PART_SESSION_KEY,
        other => other,
    }
}

fn hmac_md5(key: &[u8], data: &[&[u8]]) -> Result<Zeroizing<[u8; CHECKSUM_LEN]>, KrbError> {
    let mut mac = <HmacMd5 as Mac>::new_from_slice(key).map_err(|_| KrbError::InvalidHmacKey)?;
    for part in data {
        mac.update(part);
    }
    let mut out = Zeroizing::new([0u8; CHECKSUM_LEN]);
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

fn apply_rc4(key: &[u8], data: &mut [u8]) -> Result<(), KrbError> {
    let mut cipher =
        Rc4::<U16>::new_from_slice(key).map_err(|_| KrbError::InvalidEncryptionKey)?;
    cipher.apply_keystream(data);
    Ok(())
}

fn encrypt_with_confounder(
    key: &[u8],
    usage: i32,
    confounder: &[u8; CONFOUNDER_LEN],
    plaintext: &[u8],
) -> Result<Vec<u8>, KrbError> {
    let k1 = hmac_md5(key, &[&ms_usage(usage).to_le_bytes()[..]])?;
    let checksum = hmac_md5(&*k1, &[&confounder[..], plaintext])?;
    let k3 = hmac_md5(&*k1, &[&checksum[..]])?;

    let mut out = Vec::with_capacity(CHECKSUM_LEN + CONFOUNDER_LEN + plaintext.len());
    out.extend_from_slice(&*checksum);
    out.extend_from_slice(confounder);
    out.extend_from_slice(plaintext);
    apply_rc4(&*k3, &mut out[CHECKSUM_LEN..])?;
    Ok(out)
}

fn decrypt(key: &[u8], usage: i32, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>, KrbError> {
    if ciphertext.len() < CHECKSUM_LEN + CONFOUNDER_LEN {
        return Err(KrbError::InsufficientData);
    }
    let (msg_checksum, body) = ciphertext.split_at(CHECKSUM_LEN);

    let k1 = hmac_md5(key, &[&ms_usage(usage).to_le_bytes()[..]])?;
    let k3 = hmac_md5(&*k1, &[msg_checksum])?;

    let mut plaintext = Zeroizing::new(body.to_vec());
    apply_rc4(&*k3, &mut plaintext)?;

    let checksum = hmac_md5(&*k1, &[&plaintext[..]])?;
    if !constant_time_eq(&*checksum, msg_checksum) {
        error!(?usage, "rc4 message authentication failed");
        return Err(KrbError::MessageAuthenticationFailed);
    }

    Ok(Zeroizing::new(plaintext.split_off(CONFOUNDER_LEN)))
}

/// The keyed HMAC-MD5 checksum (-138) used for PAC signatures and GSS tokens.
fn checksum(key: &[u8], usage: i32, data: &[u8]) -> Result<Vec<u8>, KrbError> {
    let ksign = hmac_md5(key, &[&b"signaturekey\0"[..]])?;
    let mut md5 = Md5::new();
    md5.update(ms_usage(usage).to_le_bytes());
    md5.update(data);
    let tmp = md5.finalize();
    hmac_md5(&*ksign, &[&tmp[..]]).map(|out| out.to_vec())
}

pub(crate) struct Rc4Hmac;

impl KerberosCipher for Rc4Hmac {
    fn etype(&self) -> EncryptionType {
        EncryptionType::RC4_HMAC
    }

    fn key_len(&self) -> usize {
        RC4_KEY_LEN
    }

    fn checksum_type(&self) -> ChecksumType {
        ChecksumType::HMAC_MD5
    }

    fn encrypt(&self, key: &CryptoKey, usage: i32, plaintext: &[u8]) -> Result<Vec<u8>, KrbError> {
        let key = key.material(EncryptionType::RC4_HMAC, RC4_KEY_LEN)?;
        let mut confounder = [0u8; CONFOUNDER_LEN];
        rand::rng().fill_bytes(&mut confounder);
        encrypt_with_confounder(key, usage, &confounder, plaintext)
    }

    fn decrypt(
        &self,
        key: &CryptoKey,
        usage: i32,
        ciphertext: &[u8],
    ) -> Result<Zeroizing<Vec<u8>>, KrbError> {
        let key = key.material(EncryptionType::RC4_HMAC, RC4_KEY_LEN)?;
        decrypt(key, usage, ciphertext)
    }

    fn checksum(&self, key: &CryptoKey, usage: i32, data: &[u8]) -> Result<Vec<u8>, KrbError> {
        let key = key.material(EncryptionType::RC4_HMAC, RC4_KEY_LEN)?;
        checksum(key, usage, data)
    }
}

impl StringToKey for Rc4Hmac {
    fn etype(&self) -> EncryptionType {
        EncryptionType::RC4_HMAC
    }

    /// The NT hash: MD4 over the UTF-16LE password. Salt and params are unused.
    fn string_to_key(
        &self,
        password: &str,
        _salt: &str,
        _params: Option<&[u8]>,
    ) -> Result<CryptoKey, KrbError> {
        let utf16: Zeroizing<Vec<u8>> = Zeroizing::new(
            password
                .encode_utf16()
                .flat_map(|unit| unit.to_le_bytes())
                .collect(),
        );
        let digest = Md4::digest(&*utf16);
        Ok(CryptoKey::new(EncryptionType::RC4_HMAC, digest.to_vec()))
    }

    fn random_key(&self) -> CryptoKey {
        let mut value = vec![0u8; RC4_KEY_LEN];
        rand::rng().fill_bytes(&mut value);
        CryptoKey::new(EncryptionType::RC4_HMAC, value)
    }
}
