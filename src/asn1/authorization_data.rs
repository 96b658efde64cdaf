use super::constants::AuthorizationDataType;
use super::element::Element;
use super::{Asn1Entity, Fields, SequenceBuilder};
use crate::error::KrbError;

/// ```text
/// AuthorizationData       ::= SEQUENCE OF SEQUENCE {
///         ad-type         [0] Int32,
///         ad-data         [1] OCTET STRING
/// }
///
/// AD-IF-RELEVANT          ::= AuthorizationData
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizationDataEntry {
    pub ad_type: i32,
    pub ad_data: Vec<u8>,
}

pub type AuthorizationData = Vec<AuthorizationDataEntry>;

impl AuthorizationDataEntry {
    pub fn new(ad_type: AuthorizationDataType, ad_data: Vec<u8>) -> Self {
        AuthorizationDataEntry {
            ad_type: ad_type.into(),
            ad_data,
        }
    }

    pub fn is(&self, ad_type: AuthorizationDataType) -> bool {
        self.ad_type == i32::from(ad_type)
    }

    /// Wrap entries in an AD-IF-RELEVANT container.
    pub fn if_relevant(inner: &[AuthorizationDataEntry]) -> Result<Self, KrbError> {
        let ad_data = inner.to_vec().to_der()?;
        Ok(AuthorizationDataEntry::new(
            AuthorizationDataType::AdIfRelevant,
            ad_data,
        ))
    }
}

/// Find the data of the first entry of `ad_type`, descending into AD-IF-RELEVANT
/// containers.
pub fn find_authorization_data(
    entries: &[AuthorizationDataEntry],
    ad_type: AuthorizationDataType,
) -> Result<Option<Vec<u8>>, KrbError> {
    for entry in entries {
        if entry.is(ad_type) {
            return Ok(Some(entry.ad_data.clone()));
        }
        if entry.is(AuthorizationDataType::AdIfRelevant) {
            let inner = AuthorizationData::from_der(&entry.ad_data)?;
            if let Some(found) = find_authorization_data(&inner, ad_type)? {
                return Ok(Some(found));
            }
        }
    }
    Ok(None)
}

impl Asn1Entity for AuthorizationDataEntry {
    fn decode(element: &Element) -> Result<Self, KrbError> {
        let fields = Fields::decode("AuthorizationData", element)?;
        Ok(AuthorizationDataEntry {
            ad_type: fields.required(0, "ad-type")?.as_i32()?,
            ad_data: fields.required(1, "ad-data")?.as_octets()?.to_vec(),
        })
    }

    fn encode(&self) -> Result<Element, KrbError> {
        Ok(SequenceBuilder::new()
            .field(0, Element::integer(self.ad_type.into()))
            .field(1, Element::octet_string(&self.ad_data))
            .build())
    }
}
