use super::element::Element;
use super::{Asn1Entity, Fields, SequenceBuilder};
use crate::error::KrbError;

/// ```text
/// HostAddress     ::= SEQUENCE  {
///         addr-type       [0] Int32,
///         address         [1] OCTET STRING
/// }
///
/// HostAddresses   ::= SEQUENCE OF HostAddress
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAddress {
    pub addr_type: i32,
    pub address: Vec<u8>,
}

pub type HostAddresses = Vec<HostAddress>;

impl Asn1Entity for HostAddress {
    fn decode(element: &Element) -> Result<Self, KrbError> {
        let fields = Fields::decode("HostAddress", element)?;
        Ok(HostAddress {
            addr_type: fields.required(0, "addr-type")?.as_i32()?,
            address: fields.required(1, "address")?.as_octets()?.to_vec(),
        })
    }

    fn encode(&self) -> Result<Element, KrbError> {
        Ok(SequenceBuilder::new()
            .field(0, Element::integer(self.addr_type.into()))
            .field(1, Element::octet_string(&self.address))
            .build())
    }
}
