use super::authorization_data::AuthorizationData;
use super::element::Element;
use super::encryption_key::EncryptionKey;
use super::host_address::HostAddresses;
use super::principal_name::PrincipalName;
use super::ticket_flags::TicketFlags;
use super::transited_encoding::TransitedEncoding;
use super::{Asn1Entity, Fields, SequenceBuilder};
use crate::error::KrbError;
use std::time::SystemTime;

/// ```text
/// EncTicketPart   ::= [APPLICATION 3] SEQUENCE {
///         flags                   [0] TicketFlags,
///         key                     [1] EncryptionKey,
///         crealm                  [2] Realm,
///         cname                   [3] PrincipalName,
///         transited               [4] TransitedEncoding,
///         authtime                [5] KerberosTime,
///         starttime               [6] KerberosTime OPTIONAL,
///         endtime                 [7] KerberosTime,
///         renew-till              [8] KerberosTime OPTIONAL,
///         caddr                   [9] HostAddresses OPTIONAL,
///         authorization-data      [10] AuthorizationData OPTIONAL
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncTicketPart {
    pub flags: TicketFlags,
    pub key: EncryptionKey,
    pub crealm: String,
    pub cname: PrincipalName,
    pub transited: TransitedEncoding,
    pub authtime: SystemTime,
    pub starttime: Option<SystemTime>,
    pub endtime: SystemTime,
    pub renew_till: Option<SystemTime>,
    pub caddr: Option<HostAddresses>,
    pub authorization_data: Option<AuthorizationData>,
}

const ENC_TICKET_PART_TAG: u32 = 3;

impl Asn1Entity for EncTicketPart {
    fn decode(element: &Element) -> Result<Self, KrbError> {
        let inner = element.expect_application(ENC_TICKET_PART_TAG)?;
        let fields = Fields::decode("EncTicketPart", inner)?;
        Ok(EncTicketPart {
            flags: TicketFlags::from_element(fields.required(0, "flags")?)?,
            key: EncryptionKey::decode(fields.required(1, "key")?)?,
            crealm: fields.required(2, "crealm")?.as_kerberos_string()?,
            cname: PrincipalName::decode(fields.required(3, "cname")?)?,
            transited: TransitedEncoding::decode(fields.required(4, "transited")?)?,
            authtime: fields.required(5, "authtime")?.as_generalized_time()?,
            starttime: fields.map_optional(6, Element::as_generalized_time)?,
            endtime: fields.required(7, "endtime")?.as_generalized_time()?,
            renew_till: fields.map_optional(8, Element::as_generalized_time)?,
            caddr: fields.map_optional(9, HostAddresses::decode)?,
            authorization_data: fields.map_optional(10, AuthorizationData::decode)?,
        })
    }

    fn encode(&self) -> Result<Element, KrbError> {
        let inner = SequenceBuilder::new()
            .field(0, self.flags.to_element())
            .field(1, self.key.encode()?)
            .field(2, Element::kerberos_string(&self.crealm))
            .field(3, self.cname.encode()?)
            .field(4, self.transited.encode()?)
            .field(5, Element::generalized_time(self.authtime)?)
            .optional(6, self.starttime.map(Element::generalized_time).transpose()?)
            .field(7, Element::generalized_time(self.endtime)?)
            .optional(8, self.renew_till.map(Element::generalized_time).transpose()?)
            .optional(9, self.caddr.as_ref().map(|a| a.encode()).transpose()?)
            .optional(
                10,
                self.authorization_data
                    .as_ref()
                    .map(|a| a.encode())
                    .transpose()?,
            )
            .build();
        Ok(Element::application(ENC_TICKET_PART_TAG, inner))
    }
}
