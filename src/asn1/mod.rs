pub mod ap_options;
pub mod ap_rep;
pub mod ap_req;
pub mod authenticator;
pub mod authorization_data;
pub mod checksum;
pub mod constants;
pub mod element;
pub mod enc_kdc_rep_part;
pub mod enc_ticket_part;
pub mod encrypted_data;
pub mod encryption_key;
pub mod etype_info2;
pub mod gssapi;
pub mod host_address;
pub mod kdc_options;
pub mod kdc_rep;
pub mod kdc_req;
pub mod kdc_req_body;
pub mod krb_error;
pub mod last_req;
pub mod pa_data;
pub mod pa_enc_ts_enc;
pub mod pa_pac_request;
pub mod principal_name;
pub mod tagged_ticket;
pub mod ticket_flags;
pub mod transited_encoding;

use self::element::Element;
use der::Class;
use crate::error::KrbError;
use tracing::trace;

/// A Kerberos structure that maps onto a DER [`Element`] tree.
pub trait Asn1Entity: Sized {
    fn decode(element: &Element) -> Result<Self, KrbError>;

    fn encode(&self) -> Result<Element, KrbError>;

    fn from_der(bytes: &[u8]) -> Result<Self, KrbError> {
        let element = Element::from_der(bytes)?;
        Self::decode(&element)
    }

    fn to_der(&self) -> Result<Vec<u8>, KrbError> {
        self.encode()?.to_der()
    }
}

/// `SEQUENCE OF T`
impl<T: Asn1Entity> Asn1Entity for Vec<T> {
    fn decode(element: &Element) -> Result<Self, KrbError> {
        element.as_sequence()?.iter().map(T::decode).collect()
    }

    fn encode(&self) -> Result<Element, KrbError> {
        self.iter()
            .map(T::encode)
            .collect::<Result<Vec<_>, _>>()
            .map(Element::sequence)
    }
}

/// The context tagged fields of a SEQUENCE, looked up by tag number rather than by
/// position. Children that are not context tagged are skipped, as are tag numbers the
/// structure does not know about. A field's explicit tag is only unwrapped when it is
/// looked up, so unknown fields may use any encoding.
pub(crate) struct Fields<'a> {
    structure: &'static str,
    slots: Vec<(u32, &'a Element)>,
}

impl<'a> Fields<'a> {
    pub(crate) fn decode(structure: &'static str, element: &'a Element) -> Result<Self, KrbError> {
        let children = element.as_sequence()?;
        let mut slots = Vec::with_capacity(children.len());

        for child in children {
            let tag = child.tag();
            if tag.class() != Class::ContextSpecific {
                trace!(%structure, %tag, "ignoring untagged member");
                continue;
            }
            if slots.iter().any(|(n, _)| *n == tag.number()) {
                return Err(KrbError::Asn1InvalidValue("duplicate field"));
            }
            slots.push((tag.number(), child));
        }

        Ok(Fields { structure, slots })
    }

    pub(crate) fn optional(&self, number: u32) -> Result<Option<&'a Element>, KrbError> {
        self.slots
            .iter()
            .find(|(n, _)| *n == number)
            .map(|(_, el)| el.inner())
            .transpose()
    }

    pub(crate) fn required(&self, number: u32, field: &'static str) -> Result<&'a Element, KrbError> {
        self.optional(number)?.ok_or(KrbError::MissingField {
            structure: self.structure,
            field,
        })
    }

    pub(crate) fn map_optional<T, F>(&self, number: u32, f: F) -> Result<Option<T>, KrbError>
    where
        F: FnOnce(&'a Element) -> Result<T, KrbError>,
    {
        self.optional(number)?.map(f).transpose()
    }
}

/// Builds a SEQUENCE of explicitly tagged fields. Fields must be added in tag order.
#[derive(Default)]
pub(crate) struct SequenceBuilder {
    children: Vec<Element>,
}

impl SequenceBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn field(mut self, number: u32, value: Element) -> Self {
        self.children.push(Element::explicit(number, value));
        self
    }

    pub(crate) fn optional(self, number: u32, value: Option<Element>) -> Self {
        match value {
            Some(value) => self.field(number, value),
            None => self,
        }
    }

    pub(crate) fn build(self) -> Element {
        Element::sequence(self.children)
    }
}

pub(crate) fn encode_strings(values: &[String]) -> Element {
    Element::sequence(values.iter().map(|s| Element::kerberos_string(s)).collect())
}

pub(crate) fn decode_strings(element: &Element) -> Result<Vec<String>, KrbError> {
    element
        .as_sequence()?
        .iter()
        .map(Element::as_kerberos_string)
        .collect()
}

/// Check the pvno and msg-type fields every top level message carries.
pub(crate) fn check_header(
    fields: &Fields<'_>,
    pvno_tag: u32,
    msg_type_tag: u32,
    expected: constants::KrbMessageType,
) -> Result<(), KrbError> {
    let pvno = fields.required(pvno_tag, "pvno")?.as_integer()?;
    if pvno != constants::KRB5_PVNO {
        trace!(?pvno, "invalid pvno");
        return Err(KrbError::InvalidPvno);
    }
    let msg_type = fields.required(msg_type_tag, "msg-type")?.as_i32()?;
    if msg_type != i32::from(expected) {
        trace!(?msg_type, ?expected, "invalid msg-type");
        return Err(KrbError::InvalidMessageType);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::element::Element;
    use super::{Fields, SequenceBuilder};
    use crate::error::KrbError;

    #[test]
    fn fields_are_tag_driven() {
        // Out of order and with an unknown tag [7] plus an untagged member.
        let seq = Element::sequence(vec![
            Element::explicit(2, Element::integer(22)),
            Element::integer(99),
            Element::explicit(7, Element::integer(77)),
            Element::explicit(0, Element::integer(0)),
        ]);
        let fields = Fields::decode("Test", &seq).expect("fields");
        assert_eq!(
            fields.required(2, "two").and_then(|e| e.as_i32()).expect("two"),
            22
        );
        assert_eq!(
            fields.required(0, "zero").and_then(|e| e.as_i32()).expect("zero"),
            0
        );
        assert!(fields.optional(1).expect("lookup").is_none());

        match fields.required(1, "one") {
            Err(KrbError::MissingField { structure, field }) => {
                assert_eq!(structure, "Test");
                assert_eq!(field, "one");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn duplicate_fields_rejected() {
        let seq = Element::sequence(vec![
            Element::explicit(0, Element::integer(1)),
            Element::explicit(0, Element::integer(2)),
        ]);
        assert!(Fields::decode("Test", &seq).is_err());
    }

    #[test]
    fn builder_skips_absent_optionals() {
        let seq = SequenceBuilder::new()
            .field(0, Element::integer(5))
            .optional(1, None)
            .optional(2, Some(Element::octet_string(b"x")))
            .build();
        assert_eq!(
            seq.to_der().expect("encode"),
            hex::decode("300aa003020105a203040178").expect("hex")
        );
    }

    #[test]
    fn unknown_fields_may_use_any_encoding() {
        use super::encrypted_data::EncryptedData;
        use super::Asn1Entity;

        // etype [0] and cipher [2], then an implicitly tagged (primitive) [5] and a [6]
        // wrapping two values.
        let wire = hex::decode(concat!(
            "301a",
            "a003020112",
            "a2080406636970686572",
            "850101",
            "a606020101020102",
        ))
        .expect("hex");

        let enc = EncryptedData::from_der(&wire).expect("decode");
        assert_eq!(enc.etype, 18);
        assert_eq!(enc.kvno, None);
        assert_eq!(enc.cipher, b"cipher".to_vec());

        // Looking up a malformed field still fails.
        let seq = Element::from_der(&wire).expect("element");
        let fields = Fields::decode("Test", &seq).expect("fields");
        assert!(fields.optional(6).is_err());
        assert!(fields.required(5, "five").is_err());
    }
}
