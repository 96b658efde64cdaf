use super::constants::KrbMessageType;
use super::element::{Element, Tag};
use super::kdc_req_body::KdcReqBody;
use super::pa_data::PaData;
use super::{check_header, Asn1Entity, Fields, SequenceBuilder};
use crate::error::KrbError;

/// ```text
/// AS-REQ          ::= [APPLICATION 10] KDC-REQ
///
/// TGS-REQ         ::= [APPLICATION 12] KDC-REQ
///
/// KDC-REQ         ::= SEQUENCE {
///         -- NOTE: first tag is [1], not [0]
///         pvno            [1] INTEGER (5) ,
///         msg-type        [2] INTEGER (10 -- AS -- | 12 -- TGS --),
///         padata          [3] SEQUENCE OF PA-DATA OPTIONAL
///                             -- NOTE: not empty --,
///         req-body        [4] KDC-REQ-BODY
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdcReq {
    pub msg_type: KrbMessageType,
    pub padata: Option<Vec<PaData>>,
    pub req_body: KdcReqBody,
}

impl Asn1Entity for KdcReq {
    fn decode(element: &Element) -> Result<Self, KrbError> {
        let msg_type = match element.tag() {
            t if t == Tag::application(10) => KrbMessageType::KrbAsReq,
            t if t == Tag::application(12) => KrbMessageType::KrbTgsReq,
            actual => {
                return Err(KrbError::UnexpectedTag {
                    expected: Tag::application(10),
                    actual,
                })
            }
        };
        let fields = Fields::decode("KDC-REQ", element.inner()?)?;
        check_header(&fields, 1, 2, msg_type)?;

        Ok(KdcReq {
            msg_type,
            padata: fields.map_optional(3, Vec::<PaData>::decode)?,
            req_body: KdcReqBody::decode(fields.required(4, "req-body")?)?,
        })
    }

    fn encode(&self) -> Result<Element, KrbError> {
        let inner = SequenceBuilder::new()
            .field(1, Element::integer(super::constants::KRB5_PVNO))
            .field(2, Element::integer(i32::from(self.msg_type).into()))
            .optional(3, self.padata.as_ref().map(|p| p.encode()).transpose()?)
            .field(4, self.req_body.encode()?)
            .build();
        Ok(Element::application(self.msg_type.application_tag(), inner))
    }
}
