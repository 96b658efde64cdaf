use super::element::Element;
use super::{Asn1Entity, Fields, SequenceBuilder};
use crate::error::KrbError;
use std::fmt;
use zeroize::Zeroizing;

/// ```text
/// EncryptionKey   ::= SEQUENCE {
///         keytype         [0] Int32 -- actually encryption type --,
///         keyvalue        [1] OCTET STRING
/// }
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey {
    pub keytype: i32,
    pub keyvalue: Zeroizing<Vec<u8>>,
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("keytype", &self.keytype)
            .field("keyvalue", &"<redacted>")
            .finish()
    }
}

impl Asn1Entity for EncryptionKey {
    fn decode(element: &Element) -> Result<Self, KrbError> {
        let fields = Fields::decode("EncryptionKey", element)?;
        Ok(EncryptionKey {
            keytype: fields.required(0, "keytype")?.as_i32()?,
            keyvalue: Zeroizing::new(fields.required(1, "keyvalue")?.as_octets()?.to_vec()),
        })
    }

    fn encode(&self) -> Result<Element, KrbError> {
        Ok(SequenceBuilder::new()
            .field(0, Element::integer(self.keytype.into()))
            .field(1, Element::octet_string(&self.keyvalue))
            .build())
    }
}
