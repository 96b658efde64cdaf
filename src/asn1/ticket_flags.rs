use super::element::Element;
use crate::error::KrbError;
use bitmask_enum::bitmask;

/// ```text
/// TicketFlags     ::= KerberosFlags
///         -- reserved(0),
///         -- forwardable(1),
///         -- forwarded(2),
///         -- proxiable(3),
///         -- proxy(4),
///         -- may-postdate(5),
///         -- postdated(6),
///         -- invalid(7),
///         -- renewable(8),
///         -- initial(9),
///         -- pre-authent(10),
///         -- hw-authent(11),
///         -- transited-policy-checked(12),
///         -- ok-as-delegate(13)
/// ````
// KerberosFlags number bits from the most significant bit of the first octet, and
// RFC4120 section 5.2.8 requires at least 32 bits on the wire. Bit n of the mask is
// Kerberos flag n, so the value is reversed on the way in and out.
#[bitmask(u32)]
pub enum TicketFlags {
    Reserved = 1 << 0,
    Forwardable = 1 << 1,
    Forwarded = 1 << 2,
    Proxiable = 1 << 3,
    Proxy = 1 << 4,
    MayPostdate = 1 << 5,
    Postdated = 1 << 6,
    Invalid = 1 << 7,
    Renewable = 1 << 8,
    Initial = 1 << 9,
    PreAuthent = 1 << 10,
    HwAuthent = 1 << 11,
    TransitedPolicyChecked = 1 << 12,
    OkAsDelegate = 1 << 13,
    NameCanonicalize = 1 << 15,
}

impl TicketFlags {
    fn from_bits(val: u32) -> Self {
        let mut tf = TicketFlags::none();
        tf.bits = val;
        tf
    }

    pub fn to_element(self) -> Element {
        Element::bit_string(self.bits().reverse_bits())
    }

    pub fn from_element(element: &Element) -> Result<Self, KrbError> {
        element
            .as_bit_string()
            .map(|wire| TicketFlags::from_bits(wire.reverse_bits()))
    }
}

#[cfg(test)]
mod tests {
    use super::TicketFlags;
    use crate::asn1::element::Element;

    #[test]
    fn ticket_flags_min_encoded_length() {
        let der_bytes = TicketFlags::none().to_element().to_der().expect("encode");
        assert_eq!(der_bytes, [0x03, 0x05, 0x00, 0x00, 0x00, 0x00, 0x00]);

        let der_bytes = TicketFlags::Renewable.to_element().to_der().expect("encode");
        assert_eq!(der_bytes, [0x03, 0x05, 0x00, 0x00, 0x80, 0x00, 0x00]);

        let mut flags = TicketFlags::none();
        flags |= TicketFlags::OkAsDelegate;
        flags |= TicketFlags::Renewable;
        flags |= TicketFlags::Forwardable;
        let der_bytes = flags.to_element().to_der().expect("encode");
        assert_eq!(der_bytes, [0x03, 0x05, 0x00, 0x40, 0x84, 0x00, 0x00]);

        let element = Element::from_der(&der_bytes).expect("Failed to decode");
        let flags = TicketFlags::from_element(&element).expect("Failed to decode flags");
        assert_eq!(
            flags,
            TicketFlags::OkAsDelegate | TicketFlags::Renewable | TicketFlags::Forwardable
        );
        assert!(flags.contains(TicketFlags::Renewable));
        assert!(!flags.contains(TicketFlags::Invalid));
    }
}
