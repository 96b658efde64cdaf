use super::encrypted_data::EncryptedData;
use super::element::Element;
use super::principal_name::PrincipalName;
use super::{Asn1Entity, Fields, SequenceBuilder};
use crate::error::KrbError;
use tracing::trace;

/// ```text
/// Ticket          ::= [APPLICATION 1] SEQUENCE {
///         tkt-vno         [0] INTEGER (5),
///         realm           [1] Realm,
///         sname           [2] PrincipalName,
///         enc-part        [3] EncryptedData -- EncTicketPart
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ticket {
    pub realm: String,
    pub sname: PrincipalName,
    pub enc_part: EncryptedData,
}

const TICKET_TAG: u32 = 1;

impl Asn1Entity for Ticket {
    fn decode(element: &Element) -> Result<Self, KrbError> {
        let inner = element.expect_application(TICKET_TAG)?;
        let fields = Fields::decode("Ticket", inner)?;
        let tkt_vno = fields.required(0, "tkt-vno")?.as_integer()?;
        if tkt_vno != super::constants::KRB5_PVNO {
            trace!(?tkt_vno, "invalid ticket version");
            return Err(KrbError::InvalidPvno);
        }
        Ok(Ticket {
            realm: fields.required(1, "realm")?.as_kerberos_string()?,
            sname: PrincipalName::decode(fields.required(2, "sname")?)?,
            enc_part: EncryptedData::decode(fields.required(3, "enc-part")?)?,
        })
    }

    fn encode(&self) -> Result<Element, KrbError> {
        let inner = SequenceBuilder::new()
            .field(0, Element::integer(super::constants::KRB5_PVNO))
            .field(1, Element::kerberos_string(&self.realm))
            .field(2, self.sname.encode()?)
            .field(3, self.enc_part.encode()?)
            .build();
        Ok(Element::application(TICKET_TAG, inner))
    }
}
