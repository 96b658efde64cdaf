use super::element::Element;
use super::{Asn1Entity, Fields, SequenceBuilder};
use crate::error::KrbError;
use std::time::SystemTime;

/// ```text
/// LastReq         ::=     SEQUENCE OF SEQUENCE {
///         lr-type         [0] Int32,
///         lr-value        [1] KerberosTime
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastReqEntry {
    pub lr_type: i32,
    pub lr_value: SystemTime,
}

pub type LastReq = Vec<LastReqEntry>;

impl Asn1Entity for LastReqEntry {
    fn decode(element: &Element) -> Result<Self, KrbError> {
        let fields = Fields::decode("LastReq", element)?;
        Ok(LastReqEntry {
            lr_type: fields.required(0, "lr-type")?.as_i32()?,
            lr_value: fields.required(1, "lr-value")?.as_generalized_time()?,
        })
    }

    fn encode(&self) -> Result<Element, KrbError> {
        Ok(SequenceBuilder::new()
            .field(0, Element::integer(self.lr_type.into()))
            .field(1, Element::generalized_time(self.lr_value)?)
            .build())
    }
}
