use super::element::Element;
use super::{Asn1Entity, Fields, SequenceBuilder};
use crate::error::KrbError;

/// ```text
/// ETYPE-INFO2-ENTRY       ::= SEQUENCE {
///         etype           [0] Int32,
///         salt            [1] KerberosString OPTIONAL,
///         s2kparams       [2] OCTET STRING OPTIONAL
/// }
///
/// ETYPE-INFO2             ::= SEQUENCE SIZE (1..MAX) OF ETYPE-INFO2-ENTRY
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtypeInfo2Entry {
    pub etype: i32,
    pub salt: Option<String>,
    pub s2kparams: Option<Vec<u8>>,
}

pub type EtypeInfo2 = Vec<EtypeInfo2Entry>;

impl Asn1Entity for EtypeInfo2Entry {
    fn decode(element: &Element) -> Result<Self, KrbError> {
        let fields = Fields::decode("ETYPE-INFO2-ENTRY", element)?;
        Ok(EtypeInfo2Entry {
            etype: fields.required(0, "etype")?.as_i32()?,
            salt: fields.map_optional(1, Element::as_kerberos_string)?,
            s2kparams: fields.map_optional(2, |e| e.as_octets().map(|b| b.to_vec()))?,
        })
    }

    fn encode(&self) -> Result<Element, KrbError> {
        Ok(SequenceBuilder::new()
            .field(0, Element::integer(self.etype.into()))
            .optional(1, self.salt.as_deref().map(Element::kerberos_string))
            .optional(2, self.s2kparams.as_deref().map(Element::octet_string))
            .build())
    }
}

#[cfg(test)]
mod tests {
    use super::{EtypeInfo2, EtypeInfo2Entry};
    use crate::asn1::constants::EncryptionType;
    use crate::asn1::Asn1Entity;

    #[test]
    fn etype_info2_entry() {
        let blob = hex::decode("3018a003020112a1111b0f41464f524553542e41447573657231")
            .expect("hex");
        let entry = EtypeInfo2Entry::from_der(&blob).expect("decode");
        assert_eq!(entry.etype, EncryptionType::AES256_CTS_HMAC_SHA1_96 as i32);
        assert_eq!(entry.salt.as_deref(), Some("AFOREST.ADuser1"));
        assert_eq!(entry.s2kparams, None);
        assert_eq!(entry.to_der().expect("encode"), blob);
    }

    #[test]
    fn etype_info2_sequence() {
        let blob = hex::decode("301a3018a003020112a1111b0f41464f524553542e41447573657231")
            .expect("hex");
        let info: EtypeInfo2 = Asn1Entity::from_der(&blob).expect("decode");
        assert_eq!(info.len(), 1);
        assert_eq!(info[0].salt.as_deref(), Some("AFOREST.ADuser1"));
    }
}
