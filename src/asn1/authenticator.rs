use super::authorization_data::AuthorizationData;
use super::checksum::Checksum;
use super::element::Element;
use super::encryption_key::EncryptionKey;
use super::principal_name::PrincipalName;
use super::{Asn1Entity, Fields, SequenceBuilder};
use crate::error::KrbError;
use std::time::SystemTime;
use tracing::trace;

/// ```text
/// Authenticator   ::= [APPLICATION 2] SEQUENCE  {
///         authenticator-vno       [0] INTEGER (5),
///         crealm                  [1] Realm,
///         cname                   [2] PrincipalName,
///         cksum                   [3] Checksum OPTIONAL,
///         cusec                   [4] Microseconds,
///         ctime                   [5] KerberosTime,
///         subkey                  [6] EncryptionKey OPTIONAL,
///         seq-number              [7] UInt32 OPTIONAL,
///         authorization-data      [8] AuthorizationData OPTIONAL
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticator {
    pub crealm: String,
    pub cname: PrincipalName,
    pub cksum: Option<Checksum>,
    pub cusec: u32,
    pub ctime: SystemTime,
    pub subkey: Option<EncryptionKey>,
    pub seq_number: Option<u32>,
    pub authorization_data: Option<AuthorizationData>,
}

const AUTHENTICATOR_TAG: u32 = 2;

impl Asn1Entity for Authenticator {
    fn decode(element: &Element) -> Result<Self, KrbError> {
        let inner = element.expect_application(AUTHENTICATOR_TAG)?;
        let fields = Fields::decode("Authenticator", inner)?;
        let vno = fields.required(0, "authenticator-vno")?.as_integer()?;
        if vno != super::constants::KRB5_PVNO {
            trace!(?vno, "invalid authenticator version");
            return Err(KrbError::InvalidPvno);
        }
        Ok(Authenticator {
            crealm: fields.required(1, "crealm")?.as_kerberos_string()?,
            cname: PrincipalName::decode(fields.required(2, "cname")?)?,
            cksum: fields.map_optional(3, Checksum::decode)?,
            cusec: fields.required(4, "cusec")?.as_u32()?,
            ctime: fields.required(5, "ctime")?.as_generalized_time()?,
            subkey: fields.map_optional(6, EncryptionKey::decode)?,
            seq_number: fields.map_optional(7, Element::as_u32)?,
            authorization_data: fields.map_optional(8, AuthorizationData::decode)?,
        })
    }

    fn encode(&self) -> Result<Element, KrbError> {
        let inner = SequenceBuilder::new()
            .field(0, Element::integer(super::constants::KRB5_PVNO))
            .field(1, Element::kerberos_string(&self.crealm))
            .field(2, self.cname.encode()?)
            .optional(3, self.cksum.as_ref().map(|c| c.encode()).transpose()?)
            .field(4, Element::integer(self.cusec.into()))
            .field(5, Element::generalized_time(self.ctime)?)
            .optional(6, self.subkey.as_ref().map(|k| k.encode()).transpose()?)
            .optional(7, self.seq_number.map(|s| Element::integer(s.into())))
            .optional(
                8,
                self.authorization_data
                    .as_ref()
                    .map(|a| a.encode())
                    .transpose()?,
            )
            .build();
        Ok(Element::application(AUTHENTICATOR_TAG, inner))
    }
}
