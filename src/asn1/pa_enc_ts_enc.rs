use super::element::Element;
use super::{Asn1Entity, Fields, SequenceBuilder};
use crate::error::KrbError;
use std::time::SystemTime;

/// ```text
/// PA-ENC-TS-ENC           ::= SEQUENCE {
///         patimestamp     [0] KerberosTime -- client's time --,
///         pausec          [1] Microseconds OPTIONAL
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaEncTsEnc {
    pub patimestamp: SystemTime,
    pub pausec: Option<u32>,
}

impl Asn1Entity for PaEncTsEnc {
    fn decode(element: &Element) -> Result<Self, KrbError> {
        let fields = Fields::decode("PA-ENC-TS-ENC", element)?;
        Ok(PaEncTsEnc {
            patimestamp: fields
                .required(0, "patimestamp")?
                .as_generalized_time()?,
            pausec: fields.map_optional(1, Element::as_u32)?,
        })
    }

    fn encode(&self) -> Result<Element, KrbError> {
        Ok(SequenceBuilder::new()
            .field(0, Element::generalized_time(self.patimestamp)?)
            .optional(1, self.pausec.map(|us| Element::integer(us.into())))
            .build())
    }
}
