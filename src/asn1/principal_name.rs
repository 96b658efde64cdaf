use super::constants::PrincipalNameType;
use super::element::Element;
use super::{decode_strings, encode_strings, Asn1Entity, Fields, SequenceBuilder};
use crate::error::KrbError;

/// ```text
/// PrincipalName   ::= SEQUENCE {
///         name-type       [0] Int32,
///         name-string     [1] SEQUENCE OF KerberosString
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrincipalName {
    pub name_type: i32,
    pub name_string: Vec<String>,
}

impl PrincipalName {
    pub fn new(name_type: PrincipalNameType, components: &[&str]) -> Self {
        PrincipalName {
            name_type: name_type.into(),
            name_string: components.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Components joined with `/`, without the realm.
    pub fn joined(&self) -> String {
        self.name_string.join("/")
    }
}

impl Asn1Entity for PrincipalName {
    fn decode(element: &Element) -> Result<Self, KrbError> {
        let fields = Fields::decode("PrincipalName", element)?;
        Ok(PrincipalName {
            name_type: fields.required(0, "name-type")?.as_i32()?,
            name_string: decode_strings(fields.required(1, "name-string")?)?,
        })
    }

    fn encode(&self) -> Result<Element, KrbError> {
        Ok(SequenceBuilder::new()
            .field(0, Element::integer(self.name_type.into()))
            .field(1, encode_strings(&self.name_string))
            .build())
    }
}
