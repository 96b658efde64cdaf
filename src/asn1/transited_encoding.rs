use super::element::Element;
use super::{Asn1Entity, Fields, SequenceBuilder};
use crate::error::KrbError;

/// ```text
/// TransitedEncoding       ::= SEQUENCE {
///         tr-type         [0] Int32 -- must be registered --,
///         contents        [1] OCTET STRING
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransitedEncoding {
    pub tr_type: i32,
    pub contents: Vec<u8>,
}

impl TransitedEncoding {
    /// DOMAIN-X500-COMPRESS with no realms transited.
    pub fn empty() -> Self {
        TransitedEncoding {
            tr_type: 1,
            contents: Vec::new(),
        }
    }
}

impl Asn1Entity for TransitedEncoding {
    fn decode(element: &Element) -> Result<Self, KrbError> {
        let fields = Fields::decode("TransitedEncoding", element)?;
        Ok(TransitedEncoding {
            tr_type: fields.required(0, "tr-type")?.as_i32()?,
            contents: fields.required(1, "contents")?.as_octets()?.to_vec(),
        })
    }

    fn encode(&self) -> Result<Element, KrbError> {
        Ok(SequenceBuilder::new()
            .field(0, Element::integer(self.tr_type.into()))
            .field(1, Element::octet_string(&self.contents))
            .build())
    }
}
