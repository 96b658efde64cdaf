use super::element::Element;
use crate::error::KrbError;
use bitmask_enum::bitmask;

/// ```text
/// KDCOptions      ::= KerberosFlags
///         -- reserved(0),
///         -- forwardable(1),
///         -- forwarded(2),
///         -- proxiable(3),
///         -- proxy(4),
///         -- allow-postdate(5),
///         -- postdated(6),
///         -- unused7(7),
///         -- renewable(8),
///         -- unused9(9),
///         -- unused10(10),
///         -- opt-hardware-auth(11),
///         -- unused12(12),
///         -- unused13(13),
/// -- 15 is reserved for canonicalize
///         -- unused15(15),
/// -- 26 was unused in 1510
///         -- disable-transited-check(26),
/// --
///         -- renewable-ok(27),
///         -- enc-tkt-in-skey(28),
///         -- renew(30),
///         -- validate(31)
/// ```
#[bitmask(u32)]
pub enum KdcOptions {
    Reserved = 1 << 0,
    Forwardable = 1 << 1,
    Forwarded = 1 << 2,
    Proxiable = 1 << 3,
    Proxy = 1 << 4,
    AllowPostdate = 1 << 5,
    Postdated = 1 << 6,
    Renewable = 1 << 8,
    OptHardwareAuth = 1 << 11,
    Canonicalize = 1 << 15,
    DisableTransitedCheck = 1 << 26,
    RenewableOk = 1 << 27,
    EncTktInSkey = 1 << 28,
    Renew = 1 << 30,
    Validate = 1 << 31,
}

impl KdcOptions {
    fn from_bits(val: u32) -> Self {
        let mut opts = KdcOptions::none();
        opts.bits = val;
        opts
    }

    pub fn to_element(self) -> Element {
        Element::bit_string(self.bits().reverse_bits())
    }

    pub fn from_element(element: &Element) -> Result<Self, KrbError> {
        element
            .as_bit_string()
            .map(|wire| KdcOptions::from_bits(wire.reverse_bits()))
    }
}

#[cfg(test)]
mod tests {
    use super::KdcOptions;
    use crate::asn1::element::Element;

    #[test]
    fn kdc_options_wire_order() {
        // forwardable, renewable, canonicalize, renewable-ok as sent by MIT kinit
        let der = hex::decode("03050040810010").expect("hex");
        let opts = KdcOptions::from_element(&Element::from_der(&der).expect("der"))
            .expect("options");
        assert_eq!(
            opts,
            KdcOptions::Forwardable
                | KdcOptions::Renewable
                | KdcOptions::Canonicalize
                | KdcOptions::RenewableOk
        );
        assert_eq!(opts.to_element().to_der().expect("encode"), der);
    }
}
