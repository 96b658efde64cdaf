use super::element::Element;
use super::{Asn1Entity, Fields, SequenceBuilder};
use crate::error::KrbError;

/// ```text
/// Checksum        ::= SEQUENCE {
///         cksumtype       [0] Int32,
///         checksum        [1] OCTET STRING
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    pub cksumtype: i32,
    pub checksum: Vec<u8>,
}

impl Asn1Entity for Checksum {
    fn decode(element: &Element) -> Result<Self, KrbError> {
        let fields = Fields::decode("Checksum", element)?;
        Ok(Checksum {
            cksumtype: fields.required(0, "cksumtype")?.as_i32()?,
            checksum: fields.required(1, "checksum")?.as_octets()?.to_vec(),
        })
    }

    fn encode(&self) -> Result<Element, KrbError> {
        Ok(SequenceBuilder::new()
            .field(0, Element::integer(self.cksumtype.into()))
            .field(1, Element::octet_string(&self.checksum))
            .build())
    }
}
