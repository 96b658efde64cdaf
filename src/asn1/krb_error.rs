use super::constants::{KrbErrorCode, KrbMessageType, PaDataType};
use super::element::Element;
use super::etype_info2::EtypeInfo2;
use super::pa_data::MethodData;
use super::principal_name::PrincipalName;
use super::{check_header, Asn1Entity, Fields, SequenceBuilder};
use crate::error::KrbError;
use std::time::SystemTime;
use tracing::trace;

/// ```text
/// KRB-ERROR       ::= [APPLICATION 30] SEQUENCE {
///         pvno            [0] INTEGER (5),
///         msg-type        [1] INTEGER (30),
///         ctime           [2] KerberosTime OPTIONAL,
///         cusec           [3] Microseconds OPTIONAL,
///         stime           [4] KerberosTime,
///         susec           [5] Microseconds,
///         error-code      [6] Int32,
///         crealm          [7] Realm OPTIONAL,
///         cname           [8] PrincipalName OPTIONAL,
///         realm           [9] Realm -- service realm --,
///         sname           [10] PrincipalName -- service name --,
///         e-text          [11] KerberosString OPTIONAL,
///         e-data          [12] OCTET STRING OPTIONAL
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KrbErrorMessage {
    pub ctime: Option<SystemTime>,
    pub cusec: Option<u32>,
    pub stime: SystemTime,
    pub susec: u32,
    /// Kept as the raw number, KDCs send vendor codes outside the registered range.
    pub error_code: i32,
    pub crealm: Option<String>,
    pub cname: Option<PrincipalName>,
    pub realm: String,
    pub sname: PrincipalName,
    pub e_text: Option<String>,
    pub e_data: Option<Vec<u8>>,
}

impl KrbErrorMessage {
    pub fn code(&self) -> Option<KrbErrorCode> {
        KrbErrorCode::try_from(self.error_code).ok()
    }

    /// The e-data as a METHOD-DATA sequence. KDCs send this with
    /// KDC_ERR_PREAUTH_REQUIRED to list acceptable pre-authentication methods.
    pub fn method_data(&self) -> Result<Option<MethodData>, KrbError> {
        match self.e_data.as_deref() {
            Some(e_data) if !e_data.is_empty() => MethodData::from_der(e_data).map(Some),
            _ => Ok(None),
        }
    }

    /// The ETYPE-INFO2 entries carried in the method data, if any.
    pub fn etype_info2(&self) -> Result<Option<EtypeInfo2>, KrbError> {
        let Some(method_data) = self.method_data()? else {
            return Ok(None);
        };
        method_data
            .iter()
            .find(|pa| pa.is(PaDataType::PaEtypeInfo2))
            .map(|pa| EtypeInfo2::from_der(&pa.padata_value))
            .transpose()
    }
}

impl Asn1Entity for KrbErrorMessage {
    fn decode(element: &Element) -> Result<Self, KrbError> {
        let inner = element.expect_application(KrbMessageType::KrbError.application_tag())?;
        let fields = Fields::decode("KRB-ERROR", inner)?;
        check_header(&fields, 0, 1, KrbMessageType::KrbError)?;

        let msg = KrbErrorMessage {
            ctime: fields.map_optional(2, Element::as_generalized_time)?,
            cusec: fields.map_optional(3, Element::as_u32)?,
            stime: fields.required(4, "stime")?.as_generalized_time()?,
            susec: fields.required(5, "susec")?.as_u32()?,
            error_code: fields.required(6, "error-code")?.as_i32()?,
            crealm: fields.map_optional(7, Element::as_kerberos_string)?,
            cname: fields.map_optional(8, PrincipalName::decode)?,
            realm: fields.required(9, "realm")?.as_kerberos_string()?,
            sname: PrincipalName::decode(fields.required(10, "sname")?)?,
            e_text: fields.map_optional(11, Element::as_kerberos_string)?,
            e_data: fields.map_optional(12, |e| e.as_octets().map(|b| b.to_vec()))?,
        };
        trace!(error_code = msg.error_code, "decoded krb-error");
        Ok(msg)
    }

    fn encode(&self) -> Result<Element, KrbError> {
        let inner = SequenceBuilder::new()
            .field(0, Element::integer(super::constants::KRB5_PVNO))
            .field(1, Element::integer(i32::from(KrbMessageType::KrbError).into()))
            .optional(2, self.ctime.map(Element::generalized_time).transpose()?)
            .optional(3, self.cusec.map(|c| Element::integer(c.into())))
            .field(4, Element::generalized_time(self.stime)?)
            .field(5, Element::integer(self.susec.into()))
            .field(6, Element::integer(self.error_code.into()))
            .optional(7, self.crealm.as_deref().map(Element::kerberos_string))
            .optional(8, self.cname.as_ref().map(|c| c.encode()).transpose()?)
            .field(9, Element::kerberos_string(&self.realm))
            .field(10, self.sname.encode()?)
            .optional(11, self.e_text.as_deref().map(Element::kerberos_string))
            .optional(12, self.e_data.as_deref().map(Element::octet_string))
            .build();
        Ok(Element::application(
            KrbMessageType::KrbError.application_tag(),
            inner,
        ))
    }
}
