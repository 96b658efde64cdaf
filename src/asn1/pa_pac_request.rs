use super::element::Element;
use super::{Asn1Entity, Fields, SequenceBuilder};
use crate::error::KrbError;

/// ```text
/// KERB-PA-PAC-REQUEST ::= SEQUENCE {
///         include-pac[0] BOOLEAN --If TRUE, and no pac present, include PAC.
///                                --If FALSE, and PAC present, remove PAC
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaPacRequest {
    pub include_pac: bool,
}

impl Asn1Entity for PaPacRequest {
    fn decode(element: &Element) -> Result<Self, KrbError> {
        let fields = Fields::decode("KERB-PA-PAC-REQUEST", element)?;
        Ok(PaPacRequest {
            include_pac: fields.required(0, "include-pac")?.as_bool()?,
        })
    }

    fn encode(&self) -> Result<Element, KrbError> {
        Ok(SequenceBuilder::new()
            .field(0, Element::boolean(self.include_pac))
            .build())
    }
}

#[cfg(test)]
mod tests {
    use super::PaPacRequest;
    use crate::asn1::Asn1Entity;

    #[test]
    fn include_pac_true() {
        let blob = hex::decode("3005a0030101ff").expect("hex");
        let req = PaPacRequest::from_der(&blob).expect("decode");
        assert!(req.include_pac);
        assert_eq!(req.to_der().expect("encode"), blob);
    }
}
