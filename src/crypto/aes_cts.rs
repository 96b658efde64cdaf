//! aes128-cts-hmac-sha1-96 and aes256-cts-hmac-sha1-96 (RFC 3962).

use super::nfold::nfold;
use super::primitives::constant_time_eq;
use super::{
    CryptoKey, KerberosCipher, StringToKey, AES_128_KEY_LEN, AES_256_KEY_LEN, AES_BLOCK_SIZE,
    RFC_PBKDF2_SHA1_ITER, SHA1_HMAC_LEN,
};
use crate::asn1::constants::{ChecksumType, EncryptionType};
use crate::error::KrbError;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::typenum::U16;
use aes::cipher::{
    BlockCipher, BlockDecrypt, BlockDecryptMut, BlockEncrypt, BlockEncryptMut, BlockSizeUser,
    KeyInit, KeyIvInit,
};
use aes::{Aes128, Aes256};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha1::Sha1;
use tracing::{debug, error};
use zeroize::Zeroizing;

type HmacSha1 = Hmac<Sha1>;

const IV_ZERO: [u8; AES_BLOCK_SIZE] = [0u8; AES_BLOCK_SIZE];

const USAGE_KC: u8 = 0x99;
const USAGE_KE: u8 = 0xaa;
const USAGE_KI: u8 = 0x55;

pub(crate) trait AesBlockCipher:
    BlockCipher + BlockEncrypt + BlockDecrypt + KeyInit + BlockSizeUser<BlockSize = U16>
{
}

impl AesBlockCipher for Aes128 {}
impl AesBlockCipher for Aes256 {}

fn usage_constant(usage: i32, kind: u8) -> [u8; 5] {
    let mut constant = [0u8; 5];
    constant[..4].copy_from_slice(&usage.to_be_bytes());
    constant[4] = kind;
    constant
}

/// DK(base, constant) from RFC 3961 section 5.1. For AES random-to-key is the identity,
/// so this is DR truncated to the key length.
fn derive_key<C: AesBlockCipher>(
    base: &[u8],
    constant: &[u8],
) -> Result<Zeroizing<Vec<u8>>, KrbError> {
    let key_len = base.len();
    let mut out = Zeroizing::new(Vec::with_capacity(key_len + AES_BLOCK_SIZE));

    let mut block = [0u8; AES_BLOCK_SIZE];
    block.copy_from_slice(&nfold(constant, AES_BLOCK_SIZE));

    while out.len() < key_len {
        // A single block of CBC under a zero IV is the raw block encryption.
        let mut cipher = cbc::Encryptor::<C>::new_from_slices(base, &IV_ZERO)
            .map_err(|_| KrbError::InvalidEncryptionKey)?;
        cipher.encrypt_block_mut(GenericArray::from_mut_slice(&mut block));
        out.extend_from_slice(&block);
    }

    out.truncate(key_len);
    Ok(out)
}

fn hmac_sha1_96(key: &[u8], data: &[u8]) -> Result<[u8; SHA1_HMAC_LEN], KrbError> {
    let mut mac = <HmacSha1 as Mac>::new_from_slice(key).map_err(|_| KrbError::InvalidHmacKey)?;
    mac.update(data);
    let full = mac.finalize().into_bytes();

    // Truncate to 96 bits.
    let mut out = [0u8; SHA1_HMAC_LEN];
    out.copy_from_slice(&full[..SHA1_HMAC_LEN]);
    Ok(out)
}

/// CBC with ciphertext stealing, in the CS3 arrangement where the last two blocks are
/// always swapped. Inputs of exactly one block are plain ECB.
fn cts_encrypt<C: AesBlockCipher>(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, KrbError> {
    if plaintext.len() < AES_BLOCK_SIZE {
        return Err(KrbError::InsufficientData);
    }

    let tail_len = match plaintext.len() % AES_BLOCK_SIZE {
        0 => AES_BLOCK_SIZE,
        n => n,
    };
    let padded_len = plaintext.len() + (AES_BLOCK_SIZE - tail_len);

    let mut buf = Vec::with_capacity(padded_len);
    buf.extend_from_slice(plaintext);
    buf.resize(padded_len, 0);

    let mut cipher = cbc::Encryptor::<C>::new_from_slices(key, &IV_ZERO)
        .map_err(|_| KrbError::InvalidEncryptionKey)?;
    for block in buf.chunks_mut(AES_BLOCK_SIZE) {
        cipher.encrypt_block_mut(GenericArray::from_mut_slice(block));
    }

    let block_count = padded_len / AES_BLOCK_SIZE;
    if block_count == 1 {
        return Ok(buf);
    }

    // Swap Cn-1 and Cn, then keep only the leading bytes of what is now last.
    let (head, last) = buf.split_at_mut((block_count - 1) * AES_BLOCK_SIZE);
    let penultimate = &mut head[(block_count - 2) * AES_BLOCK_SIZE..];
    penultimate.swap_with_slice(last);
    buf.truncate(plaintext.len());
    Ok(buf)
}

fn cts_decrypt<C: AesBlockCipher>(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, KrbError> {
    if ciphertext.len() < AES_BLOCK_SIZE {
        // Impossible in krb because the first block is always the confounder.
        return Err(KrbError::CtsCiphertextInvalid);
    }

    let raw = C::new_from_slice(key).map_err(|_| KrbError::InvalidEncryptionKey)?;

    if ciphertext.len() == AES_BLOCK_SIZE {
        let mut block = [0u8; AES_BLOCK_SIZE];
        block.copy_from_slice(ciphertext);
        raw.decrypt_block(GenericArray::from_mut_slice(&mut block));
        return Ok(block.to_vec());
    }

    let block_count = ciphertext.len().div_ceil(AES_BLOCK_SIZE);
    let tail_len = ciphertext.len() - (block_count - 1) * AES_BLOCK_SIZE;
    let prefix_len = (block_count - 2) * AES_BLOCK_SIZE;

    let mut plaintext = Vec::with_capacity(ciphertext.len());

    // Everything before the stolen pair is ordinary CBC.
    let mut cipher = cbc::Decryptor::<C>::new_from_slices(key, &IV_ZERO)
        .map_err(|_| KrbError::InvalidEncryptionKey)?;
    for chunk in ciphertext[..prefix_len].chunks(AES_BLOCK_SIZE) {
        let mut block = [0u8; AES_BLOCK_SIZE];
        block.copy_from_slice(chunk);
        cipher.decrypt_block_mut(GenericArray::from_mut_slice(&mut block));
        plaintext.extend_from_slice(&block);
    }

    let previous: &[u8] = if prefix_len == 0 {
        &IV_ZERO
    } else {
        &ciphertext[prefix_len - AES_BLOCK_SIZE..prefix_len]
    };

    // On the wire the real Cn comes first, followed by the truncated Cn-1.
    let c_n = &ciphertext[prefix_len..prefix_len + AES_BLOCK_SIZE];
    let c_n1_star = &ciphertext[prefix_len + AES_BLOCK_SIZE..];
    debug_assert_eq!(c_n1_star.len(), tail_len);

    let mut z = [0u8; AES_BLOCK_SIZE];
    z.copy_from_slice(c_n);
    raw.decrypt_block(GenericArray::from_mut_slice(&mut z));

    let p_n: Vec<u8> = z[..tail_len]
        .iter()
        .zip(c_n1_star.iter())
        .map(|(a, b)| a ^ b)
        .collect();

    let mut c_n1 = [0u8; AES_BLOCK_SIZE];
    c_n1[..tail_len].copy_from_slice(c_n1_star);
    c_n1[tail_len..].copy_from_slice(&z[tail_len..]);
    raw.decrypt_block(GenericArray::from_mut_slice(&mut c_n1));

    plaintext.extend(c_n1.iter().zip(previous.iter()).map(|(a, b)| a ^ b));
    plaintext.extend_from_slice(&p_n);
    Ok(plaintext)
}

fn encrypt_with_confounder<C: AesBlockCipher>(
    key: &[u8],
    usage: i32,
    confounder: &[u8; AES_BLOCK_SIZE],
    plaintext: &[u8],
) -> Result<Vec<u8>, KrbError> {
    let ke = derive_key::<C>(key, &usage_constant(usage, USAGE_KE))?;
    let ki = derive_key::<C>(key, &usage_constant(usage, USAGE_KI))?;

    let mut data = Zeroizing::new(Vec::with_capacity(AES_BLOCK_SIZE + plaintext.len()));
    data.extend_from_slice(confounder);
    data.extend_from_slice(plaintext);

    let mac = hmac_sha1_96(&ki, &data)?;
    let mut ciphertext = cts_encrypt::<C>(&ke, &data)?;
    ciphertext.extend_from_slice(&mac);
    Ok(ciphertext)
}

fn decrypt<C: AesBlockCipher>(
    key: &[u8],
    usage: i32,
    ciphertext: &[u8],
) -> Result<Zeroizing<Vec<u8>>, KrbError> {
    if ciphertext.len() < AES_BLOCK_SIZE + SHA1_HMAC_LEN {
        debug!(len = ciphertext.len(), "aes ciphertext too short");
        return Err(KrbError::InsufficientData);
    }
    let (ciphertext, msg_hmac) = ciphertext.split_at(ciphertext.len() - SHA1_HMAC_LEN);

    let ke = derive_key::<C>(key, &usage_constant(usage, USAGE_KE))?;
    let ki = derive_key::<C>(key, &usage_constant(usage, USAGE_KI))?;

    let mut plaintext = Zeroizing::new(cts_decrypt::<C>(&ke, ciphertext)?);
    let my_hmac = hmac_sha1_96(&ki, &plaintext)?;

    if !constant_time_eq(&my_hmac, msg_hmac) {
        error!(?usage, "aes message authentication failed");
        return Err(KrbError::MessageAuthenticationFailed);
    }

    // The first block is the confounder.
    Ok(Zeroizing::new(plaintext.split_off(AES_BLOCK_SIZE)))
}

fn checksum<C: AesBlockCipher>(key: &[u8], usage: i32, data: &[u8]) -> Result<Vec<u8>, KrbError> {
    let kc = derive_key::<C>(key, &usage_constant(usage, USAGE_KC))?;
    hmac_sha1_96(&kc, data).map(|mac| mac.to_vec())
}

fn iteration_count(params: Option<&[u8]>) -> Result<u32, KrbError> {
    match params {
        None => Ok(RFC_PBKDF2_SHA1_ITER),
        Some(bytes) => {
            let bytes: [u8; 4] = bytes
                .try_into()
                .map_err(|_| KrbError::PreauthInvalidS2KParams)?;
            match u32::from_be_bytes(bytes) {
                // Zero means 2^32 iterations, which no KDC should ask for.
                0 => Err(KrbError::PreauthInvalidS2KParams),
                n => Ok(n),
            }
        }
    }
}

/// Derive the base key: PBKDF2-HMAC-SHA1 over the password and salt, then
/// DK(tkey, "kerberos").
fn string_to_key<C: AesBlockCipher>(
    password: &str,
    salt: &str,
    params: Option<&[u8]>,
    key_len: usize,
) -> Result<Zeroizing<Vec<u8>>, KrbError> {
    let iter_count = iteration_count(params)?;
    let mut tkey = Zeroizing::new(vec![0u8; key_len]);
    pbkdf2_hmac::<Sha1>(password.as_bytes(), salt.as_bytes(), iter_count, &mut tkey);
    derive_key::<C>(&tkey, b"kerberos")
}

macro_rules! aes_enctype {
    ($name:ident, $cipher:ty, $etype:expr, $key_len:expr, $cksum:expr) => {
        pub(crate) struct $name;

        impl KerberosCipher for $name {
            fn etype(&self) -> EncryptionType {
                $etype
            }

            fn key_len(&self) -> usize {
                $key_len
            }

            fn checksum_type(&self) -> ChecksumType {
                $cksum
            }

            fn encrypt(
                &self,
                key: &CryptoKey,
                usage: i32,
                plaintext: &[u8],
            ) -> Result<Vec<u8>, KrbError> {
                let key = key.material($etype, $key_len)?;
                let mut confounder = [0u8; AES_BLOCK_SIZE];
                rand::rng().fill_bytes(&mut confounder);
                encrypt_with_confounder::<$cipher>(key, usage, &confounder, plaintext)
            }

            fn decrypt(
                &self,
                key: &CryptoKey,
                usage: i32,
                ciphertext: &[u8],
            ) -> Result<Zeroizing<Vec<u8>>, KrbError> {
                let key = key.material($etype, $key_len)?;
                decrypt::<$cipher>(key, usage, ciphertext)
            }

            fn checksum(
                &self,
                key: &CryptoKey,
                usage: i32,
                data: &[u8],
            ) -> Result<Vec<u8>, KrbError> {
                let key = key.material($etype, $key_len)?;
                checksum::<$cipher>(key, usage, data)
            }
        }

        impl StringToKey for $name {
            fn etype(&self) -> EncryptionType {
                $etype
            }

            fn string_to_key(
                &self,
                password: &str,
                salt: &str,
                params: Option<&[u8]>,
            ) -> Result<CryptoKey, KrbError> {
                let value = string_to_key::<$cipher>(password, salt, params, $key_len)?;
                Ok(CryptoKey::new($etype, value.to_vec()).with_salt(salt))
            }

            fn random_key(&self) -> CryptoKey {
                let mut value = vec![0u8; $key_len];
                rand::rng().fill_bytes(&mut value);
                CryptoKey::new($etype, value)
            }
        }
    };
}

aes_enctype!(
    Aes128CtsHmacSha196,
    Aes128,
    EncryptionType::AES128_CTS_HMAC_SHA1_96,
    AES_128_KEY_LEN,
    ChecksumType::HMAC_SHA1_96_AES128
);

aes_enctype!(
    Aes256CtsHmacSha196,
    Aes256,
    EncryptionType::AES256_CTS_HMAC_SHA1_96,
    AES_256_KEY_LEN,
    ChecksumType::HMAC_SHA1_96_AES256
);
