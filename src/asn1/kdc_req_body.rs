use super::element::Element;
use super::encrypted_data::EncryptedData;
use super::host_address::HostAddresses;
use super::kdc_options::KdcOptions;
use super::principal_name::PrincipalName;
use super::tagged_ticket::Ticket;
use super::{Asn1Entity, Fields, SequenceBuilder};
use crate::error::KrbError;
use std::time::SystemTime;

/// ```text
/// KDC-REQ-BODY    ::= SEQUENCE {
///         kdc-options             [0] KDCOptions,
///         cname                   [1] PrincipalName OPTIONAL
///                                     -- Used only in AS-REQ --,
///         realm                   [2] Realm
///                                     -- Server's realm
///                                     -- Also client's in AS-REQ --,
///         sname                   [3] PrincipalName OPTIONAL,
///         from                    [4] KerberosTime OPTIONAL,
///         till                    [5] KerberosTime,
///         rtime                   [6] KerberosTime OPTIONAL,
///         nonce                   [7] UInt32,
///         etype                   [8] SEQUENCE OF Int32 -- EncryptionType
///                                     -- in preference order --,
///         addresses               [9] HostAddresses OPTIONAL,
///         enc-authorization-data  [10] EncryptedData OPTIONAL
///                                     -- AuthorizationData --,
///         additional-tickets      [11] SEQUENCE OF Ticket OPTIONAL
///                                        -- NOTE: not empty
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdcReqBody {
    pub kdc_options: KdcOptions,
    pub cname: Option<PrincipalName>,
    pub realm: String,
    pub sname: Option<PrincipalName>,
    pub from: Option<SystemTime>,
    pub till: SystemTime,
    pub rtime: Option<SystemTime>,
    pub nonce: u32,
    pub etype: Vec<i32>,
    pub addresses: Option<HostAddresses>,
    pub enc_authorization_data: Option<EncryptedData>,
    pub additional_tickets: Option<Vec<Ticket>>,
}

impl Asn1Entity for KdcReqBody {
    fn decode(element: &Element) -> Result<Self, KrbError> {
        let fields = Fields::decode("KDC-REQ-BODY", element)?;
        let etype = fields
            .required(8, "etype")?
            .as_sequence()?
            .iter()
            .map(Element::as_i32)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(KdcReqBody {
            kdc_options: KdcOptions::from_element(fields.required(0, "kdc-options")?)?,
            cname: fields.map_optional(1, PrincipalName::decode)?,
            realm: fields.required(2, "realm")?.as_kerberos_string()?,
            sname: fields.map_optional(3, PrincipalName::decode)?,
            from: fields.map_optional(4, Element::as_generalized_time)?,
            till: fields.required(5, "till")?.as_generalized_time()?,
            rtime: fields.map_optional(6, Element::as_generalized_time)?,
            nonce: fields.required(7, "nonce")?.as_u32()?,
            etype,
            addresses: fields.map_optional(9, HostAddresses::decode)?,
            enc_authorization_data: fields.map_optional(10, EncryptedData::decode)?,
            additional_tickets: fields.map_optional(11, Vec::<Ticket>::decode)?,
        })
    }

    fn encode(&self) -> Result<Element, KrbError> {
        let etype = Element::sequence(
            self.etype
                .iter()
                .map(|e| Element::integer((*e).into()))
                .collect(),
        );
        Ok(SequenceBuilder::new()
            .field(0, self.kdc_options.to_element())
            .optional(1, self.cname.as_ref().map(|n| n.encode()).transpose()?)
            .field(2, Element::kerberos_string(&self.realm))
            .optional(3, self.sname.as_ref().map(|n| n.encode()).transpose()?)
            .optional(4, self.from.map(Element::generalized_time).transpose()?)
            .field(5, Element::generalized_time(self.till)?)
            .optional(6, self.rtime.map(Element::generalized_time).transpose()?)
            .field(7, Element::integer(self.nonce.into()))
            .field(8, etype)
            .optional(9, self.addresses.as_ref().map(|a| a.encode()).transpose()?)
            .optional(
                10,
                self.enc_authorization_data
                    .as_ref()
                    .map(|e| e.encode())
                    .transpose()?,
            )
            .optional(
                11,
                self.additional_tickets
                    .as_ref()
                    .map(|t| t.encode())
                    .transpose()?,
            )
            .build())
    }
}
