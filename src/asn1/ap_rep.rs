use super::constants::KrbMessageType;
use super::element::Element;
use super::encrypted_data::EncryptedData;
use super::encryption_key::EncryptionKey;
use super::{check_header, Asn1Entity, Fields, SequenceBuilder};
use crate::error::KrbError;
use std::time::SystemTime;

/// ```text
/// AP-REP          ::= [APPLICATION 15] SEQUENCE {
///         pvno            [0] INTEGER (5),
///         msg-type        [1] INTEGER (15),
///         enc-part        [2] EncryptedData -- EncAPRepPart
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApRep {
    pub enc_part: EncryptedData,
}

impl Asn1Entity for ApRep {
    fn decode(element: &Element) -> Result<Self, KrbError> {
        let inner = element.expect_application(KrbMessageType::KrbApRep.application_tag())?;
        let fields = Fields::decode("AP-REP", inner)?;
        check_header(&fields, 0, 1, KrbMessageType::KrbApRep)?;
        Ok(ApRep {
            enc_part: EncryptedData::decode(fields.required(2, "enc-part")?)?,
        })
    }

    fn encode(&self) -> Result<Element, KrbError> {
        let inner = SequenceBuilder::new()
            .field(0, Element::integer(super::constants::KRB5_PVNO))
            .field(1, Element::integer(i32::from(KrbMessageType::KrbApRep).into()))
            .field(2, self.enc_part.encode()?)
            .build();
        Ok(Element::application(
            KrbMessageType::KrbApRep.application_tag(),
            inner,
        ))
    }
}

/// ```text
/// EncAPRepPart    ::= [APPLICATION 27] SEQUENCE {
///         ctime           [0] KerberosTime,
///         cusec           [1] Microseconds,
///         subkey          [2] EncryptionKey OPTIONAL,
///         seq-number      [3] UInt32 OPTIONAL
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncApRepPart {
    pub ctime: SystemTime,
    pub cusec: u32,
    pub subkey: Option<EncryptionKey>,
    pub seq_number: Option<u32>,
}

const ENC_AP_REP_PART_TAG: u32 = 27;

impl Asn1Entity for EncApRepPart {
    fn decode(element: &Element) -> Result<Self, KrbError> {
        let inner = element.expect_application(ENC_AP_REP_PART_TAG)?;
        let fields = Fields::decode("EncAPRepPart", inner)?;
        Ok(EncApRepPart {
            ctime: fields.required(0, "ctime")?.as_generalized_time()?,
            cusec: fields.required(1, "cusec")?.as_u32()?,
            subkey: fields.map_optional(2, EncryptionKey::decode)?,
            seq_number: fields.map_optional(3, Element::as_u32)?,
        })
    }

    fn encode(&self) -> Result<Element, KrbError> {
        let inner = SequenceBuilder::new()
            .field(0, Element::generalized_time(self.ctime)?)
            .field(1, Element::integer(self.cusec.into()))
            .optional(2, self.subkey.as_ref().map(|k| k.encode()).transpose()?)
            .optional(3, self.seq_number.map(|s| Element::integer(s.into())))
            .build();
        Ok(Element::application(ENC_AP_REP_PART_TAG, inner))
    }
}
