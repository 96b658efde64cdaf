use super::element::Element;
use super::{Asn1Entity, Fields, SequenceBuilder};
use crate::error::KrbError;

/// ```text
/// EncryptedData   ::= SEQUENCE {
///         etype   [0] Int32 -- EncryptionType --,
///         kvno    [1] UInt32 OPTIONAL,
///         cipher  [2] OCTET STRING -- ciphertext
/// }
/// ````
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedData {
    pub etype: i32,
    pub kvno: Option<u32>,
    pub cipher: Vec<u8>,
}

impl Asn1Entity for EncryptedData {
    fn decode(element: &Element) -> Result<Self, KrbError> {
        let fields = Fields::decode("EncryptedData", element)?;
        Ok(EncryptedData {
            etype: fields.required(0, "etype")?.as_i32()?,
            kvno: fields.map_optional(1, Element::as_u32)?,
            cipher: fields.required(2, "cipher")?.as_octets()?.to_vec(),
        })
    }

    fn encode(&self) -> Result<Element, KrbError> {
        Ok(SequenceBuilder::new()
            .field(0, Element::integer(self.etype.into()))
            .optional(1, self.kvno.map(|k| Element::integer(k.into())))
            .field(2, Element::octet_string(&self.cipher))
            .build())
    }
}

#[cfg(test)]
mod tests {
    use super::EncryptedData;
    use crate::asn1::constants::EncryptionType;
    use crate::asn1::Asn1Entity;

    #[test]
    fn encrypted_data_parse() {
        let blob = "3041a003020112a23a0438a708af058781f75eb72d318ecae2f2830aa8ad4c659faeb477e29e131f923db70a33247ed25aa9d7dda218bcdbdf2203e2125fce1465265e";
        let blob = hex::decode(blob).expect("Failed to decode sample");
        let edata = EncryptedData::from_der(&blob).expect("Failed to decode");
        assert_eq!(edata.etype, EncryptionType::AES256_CTS_HMAC_SHA1_96 as i32);
        assert_eq!(edata.kvno, None);
        assert_eq!(edata.cipher.len(), 56);
        assert_eq!(edata.to_der().expect("Failed to encode"), blob);
    }
}
