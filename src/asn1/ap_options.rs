use super::element::Element;
use crate::error::KrbError;
use bitmask_enum::bitmask;

/// ```text
/// APOptions       ::= KerberosFlags
///         -- reserved(0),
///         -- use-session-key(1),
///         -- mutual-required(2)
/// ```
#[bitmask(u32)]
pub enum ApOptions {
    Reserved = 1 << 0,
    // The ticket is encrypted in the session key from the server's TGT rather than
    // the server's secret key.
    UseSessionKey = 1 << 1,
    // The client requires a KRB_AP_REP in response.
    MutualRequired = 1 << 2,
}

impl ApOptions {
    fn from_bits(val: u32) -> Self {
        let mut opts = ApOptions::none();
        opts.bits = val;
        opts
    }

    pub fn to_element(self) -> Element {
        Element::bit_string(self.bits().reverse_bits())
    }

    pub fn from_element(element: &Element) -> Result<Self, KrbError> {
        element
            .as_bit_string()
            .map(|wire| ApOptions::from_bits(wire.reverse_bits()))
    }
}
