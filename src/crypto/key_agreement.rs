//! Finite field Diffie-Hellman over the MODP groups used by PKINIT.

use super::KeyAgreement;
use crate::error::KrbError;
use num_bigint::BigUint;
use rand::RngCore;
use tracing::error;
use zeroize::Zeroizing;

pub(crate) struct ModpGroup {
    name: &'static str,
    prime_hex: &'static str,
}

/// RFC 2409 section 6.2, 1024 bits.
pub(crate) static MODP_GROUP_2: ModpGroup = ModpGroup {
    name: "MODP group 2",
    prime_hex: concat!(
        "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
        "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
        "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
        "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
        "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE65381",
        "FFFFFFFFFFFFFFFF"
    ),
};

/// RFC 3526 section 3, 2048 bits.
pub(crate) static MODP_GROUP_14: ModpGroup = ModpGroup {
    name: "MODP group 14",
    prime_hex: concat!(
        "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD1",
        "29024E088A67CC74020BBEA63B139B22514A08798E3404DD",
        "EF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245",
        "E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7ED",
        "EE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3D",
        "C2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F",
        "83655D23DCA3AD961C62F356208552BB9ED529077096966D",
        "670C354E4ABC9804F1746C08CA18217C32905E462E36CE3B",
        "E39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9",
        "DE2BCBF6955817183995497CEA956AE515D2261898FA0510",
        "15728E5A8AACAA68FFFFFFFFFFFFFFFF"
    ),
};

const GENERATOR: u32 = 2;

impl ModpGroup {
    fn prime(&self) -> BigUint {
        // The constants above are valid hex, parsing cannot fail.
        BigUint::parse_bytes(self.prime_hex.as_bytes(), 16).unwrap_or_default()
    }

    fn prime_len(&self) -> usize {
        self.prime_hex.len() / 2
    }

    /// Big endian, left padded to the length of the prime.
    fn to_fixed_bytes(&self, value: &BigUint) -> Vec<u8> {
        let bytes = value.to_bytes_be();
        let mut out = vec![0u8; self.prime_len().saturating_sub(bytes.len())];
        out.extend_from_slice(&bytes);
        out
    }
}

impl KeyAgreement for ModpGroup {
    fn name(&self) -> &'static str {
        self.name
    }

    fn generate(&self) -> (Zeroizing<Vec<u8>>, Vec<u8>) {
        let p = self.prime();
        let two = BigUint::from(2u32);

        let mut seed = Zeroizing::new(vec![0u8; self.prime_len()]);
        rand::rng().fill_bytes(&mut seed);

        // 2 <= x <= p - 2
        let x = BigUint::from_bytes_be(&seed) % (&p - 3u32) + &two;
        let y = BigUint::from(GENERATOR).modpow(&x, &p);

        (Zeroizing::new(x.to_bytes_be()), self.to_fixed_bytes(&y))
    }

    fn agree(&self, private: &[u8], peer_public: &[u8]) -> Result<Zeroizing<Vec<u8>>, KrbError> {
        let p = self.prime();
        let y_peer = BigUint::from_bytes_be(peer_public);

        // 1 < y < p - 1
        if y_peer <= BigUint::from(1u32) || y_peer >= &p - 1u32 {
            error!(group = self.name, "peer public value out of range");
            return Err(KrbError::KeyAgreementInvalid);
        }

        let x = BigUint::from_bytes_be(private);
        let k = y_peer.modpow(&x, &p);
        Ok(Zeroizing::new(self.to_fixed_bytes(&k)))
    }
}
