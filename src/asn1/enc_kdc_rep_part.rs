use super::constants::KrbMessageType;
use super::element::{Element, Tag};
use super::encryption_key::EncryptionKey;
use super::host_address::HostAddresses;
use super::last_req::LastReq;
use super::pa_data::PaData;
use super::principal_name::PrincipalName;
use super::ticket_flags::TicketFlags;
use super::{Asn1Entity, Fields, SequenceBuilder};
use crate::error::KrbError;
use std::time::SystemTime;

const ENC_AS_REP_PART_TAG: u32 = 25;
const ENC_TGS_REP_PART_TAG: u32 = 26;

/// ```text
/// EncASRepPart    ::= [APPLICATION 25] EncKDCRepPart
///
/// EncTGSRepPart   ::= [APPLICATION 26] EncKDCRepPart
///
/// EncKDCRepPart   ::= SEQUENCE {
///         key             [0] EncryptionKey,
///         last-req        [1] LastReq,
///         nonce           [2] UInt32,
///         key-expiration  [3] KerberosTime OPTIONAL,
///         flags           [4] TicketFlags,
///         authtime        [5] KerberosTime,
///         starttime       [6] KerberosTime OPTIONAL,
///         endtime         [7] KerberosTime,
///         renew-till      [8] KerberosTime OPTIONAL,
///         srealm          [9] Realm,
///         sname           [10] PrincipalName,
///         caddr           [11] HostAddresses OPTIONAL,
///         encrypted-pa-data [12] SEQUENCE OF PA-DATA OPTIONAL
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncKdcRepPart {
    /// Either `KrbAsRep` or `KrbTgsRep`, selecting the application tag. Active Directory
    /// answers AS requests with an EncTGSRepPart, so both are accepted in either reply.
    pub msg_type: KrbMessageType,
    pub key: EncryptionKey,
    pub last_req: LastReq,
    pub nonce: u32,
    pub key_expiration: Option<SystemTime>,
    pub flags: TicketFlags,
    pub authtime: SystemTime,
    pub starttime: Option<SystemTime>,
    pub endtime: SystemTime,
    pub renew_till: Option<SystemTime>,
    pub srealm: String,
    pub sname: PrincipalName,
    pub caddr: Option<HostAddresses>,
    pub encrypted_pa_data: Option<Vec<PaData>>,
}

impl Asn1Entity for EncKdcRepPart {
    fn decode(element: &Element) -> Result<Self, KrbError> {
        let msg_type = match element.tag() {
            t if t == Tag::application(ENC_AS_REP_PART_TAG) => KrbMessageType::KrbAsRep,
            t if t == Tag::application(ENC_TGS_REP_PART_TAG) => KrbMessageType::KrbTgsRep,
            actual => {
                return Err(KrbError::UnexpectedTag {
                    expected: Tag::application(ENC_AS_REP_PART_TAG),
                    actual,
                })
            }
        };
        let fields = Fields::decode("EncKDCRepPart", element.inner()?)?;

        Ok(EncKdcRepPart {
            msg_type,
            key: EncryptionKey::decode(fields.required(0, "key")?)?,
            last_req: LastReq::decode(fields.required(1, "last-req")?)?,
            nonce: fields.required(2, "nonce")?.as_u32()?,
            key_expiration: fields.map_optional(3, Element::as_generalized_time)?,
            flags: TicketFlags::from_element(fields.required(4, "flags")?)?,
            authtime: fields.required(5, "authtime")?.as_generalized_time()?,
            starttime: fields.map_optional(6, Element::as_generalized_time)?,
            endtime: fields.required(7, "endtime")?.as_generalized_time()?,
            renew_till: fields.map_optional(8, Element::as_generalized_time)?,
            srealm: fields.required(9, "srealm")?.as_kerberos_string()?,
            sname: PrincipalName::decode(fields.required(10, "sname")?)?,
            caddr: fields.map_optional(11, HostAddresses::decode)?,
            encrypted_pa_data: fields.map_optional(12, Vec::<PaData>::decode)?,
        })
    }

    fn encode(&self) -> Result<Element, KrbError> {
        let tag = match self.msg_type {
            KrbMessageType::KrbTgsRep => ENC_TGS_REP_PART_TAG,
            _ => ENC_AS_REP_PART_TAG,
        };
        let inner = SequenceBuilder::new()
            .field(0, self.key.encode()?)
            .field(1, self.last_req.encode()?)
            .field(2, Element::integer(self.nonce.into()))
            .optional(
                3,
                self.key_expiration
                    .map(Element::generalized_time)
                    .transpose()?,
            )
            .field(4, self.flags.to_element())
            .field(5, Element::generalized_time(self.authtime)?)
            .optional(6, self.starttime.map(Element::generalized_time).transpose()?)
            .field(7, Element::generalized_time(self.endtime)?)
            .optional(8, self.renew_till.map(Element::generalized_time).transpose()?)
            .field(9, Element::kerberos_string(&self.srealm))
            .field(10, self.sname.encode()?)
            .optional(11, self.caddr.as_ref().map(|a| a.encode()).transpose()?)
            .optional(
                12,
                self.encrypted_pa_data
                    .as_ref()
                    .map(|p| p.encode())
                    .transpose()?,
            )
            .build();
        Ok(Element::application(tag, inner))
    }
}
