use super::constants::PaDataType;
use super::element::Element;
use super::{Asn1Entity, Fields, SequenceBuilder};
use crate::error::KrbError;

/// ```text
/// PA-DATA         ::= SEQUENCE {
///         -- NOTE: first tag is [1], not [0]
///         padata-type     [1] Int32,
///         padata-value    [2] OCTET STRING -- might be encoded AP-REQ
/// }
///
/// METHOD-DATA     ::= SEQUENCE OF PA-DATA
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaData {
    pub padata_type: i32,
    pub padata_value: Vec<u8>,
}

pub type MethodData = Vec<PaData>;

impl PaData {
    pub fn new(padata_type: PaDataType, padata_value: Vec<u8>) -> Self {
        PaData {
            padata_type: padata_type.into(),
            padata_value,
        }
    }

    pub fn is(&self, padata_type: PaDataType) -> bool {
        self.padata_type == i32::from(padata_type)
    }
}

impl Asn1Entity for PaData {
    fn decode(element: &Element) -> Result<Self, KrbError> {
        let fields = Fields::decode("PA-DATA", element)?;
        Ok(PaData {
            padata_type: fields.required(1, "padata-type")?.as_i32()?,
            padata_value: fields.required(2, "padata-value")?.as_octets()?.to_vec(),
        })
    }

    fn encode(&self) -> Result<Element, KrbError> {
        Ok(SequenceBuilder::new()
            .field(1, Element::integer(self.padata_type.into()))
            .field(2, Element::octet_string(&self.padata_value))
            .build())
    }
}
