//! A strict DER tag/length/value codec covering the subset of ASN.1 that Kerberos,
//! GSS-API and SPNEGO put on the wire.
//!
//! Decoding builds an [`Element`] tree. Primitive nodes keep their raw content octets,
//! constructed nodes keep their children. Any input that is not canonical DER is rejected:
//! indefinite lengths, non-minimal lengths, non-minimal integers and trailing bytes.

use crate::error::KrbError;
use der::asn1::{BitStringRef, GeneralizedTime, ObjectIdentifier};
use der::{
    Class, Decode, DecodeValue, Encode, EncodeValue, ErrorKind, Header, Length, Reader,
    SliceReader, TagNumber,
};
use std::fmt;
use std::time::{Duration, SystemTime};
use tracing::trace;

/// Nesting deeper than this is never produced by a sane peer.
const MAX_DEPTH: usize = 32;

const CONSTRUCTED: u8 = 0x20;
const TAG_NUMBER_MASK: u8 = 0x1f;

/// A single identifier octet. Kerberos never needs the multi-byte tag number form, so
/// numbers are limited to 0..=30 like [`der::TagNumber`].
///
/// The identifier octet is parsed here rather than with [`der::Tag`] because that type
/// has no GeneralString, which is what every KerberosString is sent as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tag {
    class: Class,
    constructed: bool,
    number: TagNumber,
}

const fn tag_number(number: u32) -> TagNumber {
    // Out of range numbers are a programming error and fail in der's const constructor.
    TagNumber::new(if number > 30 { u8::MAX } else { number as u8 })
}

impl Tag {
    pub const BOOLEAN: Tag = Tag::universal(1, false);
    pub const INTEGER: Tag = Tag::universal(2, false);
    pub const BIT_STRING: Tag = Tag::universal(3, false);
    pub const OCTET_STRING: Tag = Tag::universal(4, false);
    pub const OBJECT_IDENTIFIER: Tag = Tag::universal(6, false);
    pub const ENUMERATED: Tag = Tag::universal(10, false);
    pub const UTF8_STRING: Tag = Tag::universal(12, false);
    pub const SEQUENCE: Tag = Tag::universal(16, true);
    pub const PRINTABLE_STRING: Tag = Tag::universal(19, false);
    pub const IA5_STRING: Tag = Tag::universal(22, false);
    pub const GENERALIZED_TIME: Tag = Tag::universal(24, false);
    pub const VISIBLE_STRING: Tag = Tag::universal(26, false);
    pub const GENERAL_STRING: Tag = Tag::universal(27, false);

    pub const fn universal(number: u32, constructed: bool) -> Self {
        Tag {
            class: Class::Universal,
            constructed,
            number: tag_number(number),
        }
    }

    /// Kerberos only uses explicit application tags, so these are always constructed.
    pub const fn application(number: u32) -> Self {
        Tag {
            class: Class::Application,
            constructed: true,
            number: tag_number(number),
        }
    }

    pub const fn context(number: u32) -> Self {
        Tag {
            class: Class::ContextSpecific,
            constructed: true,
            number: tag_number(number),
        }
    }

    pub fn class(self) -> Class {
        self.class
    }

    pub fn is_constructed(self) -> bool {
        self.constructed
    }

    pub fn number(self) -> u32 {
        u32::from(self.number.value())
    }

    fn from_octet(octet: u8) -> Result<Self, KrbError> {
        let class = match octet & 0xc0 {
            0x00 => Class::Universal,
            0x40 => Class::Application,
            0x80 => Class::ContextSpecific,
            _ => Class::Private,
        };
        let number = TagNumber::try_from(octet & TAG_NUMBER_MASK)
            .map_err(|_| KrbError::Asn1InvalidValue("tag number"))?;
        Ok(Tag {
            class,
            constructed: octet & CONSTRUCTED != 0,
            number,
        })
    }

    fn octet(self) -> u8 {
        let constructed = if self.constructed { CONSTRUCTED } else { 0 };
        self.class as u8 | constructed | self.number.value()
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let class = match self.class {
            Class::Universal => "Universal",
            Class::Application => "Application",
            Class::ContextSpecific => "Context",
            Class::Private => "Private",
        };
        write!(f, "{}-{}", class, self.number.value())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    Primitive(Vec<u8>),
    Constructed(Vec<Element>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    tag: Tag,
    content: Content,
}

/// Map der's header and value errors onto the codec variants callers match on.
fn codec_error(err: der::Error) -> KrbError {
    match err.kind() {
        ErrorKind::IndefiniteLength => KrbError::Asn1IndefiniteLength,
        ErrorKind::Overlength | ErrorKind::Noncanonical { .. } => KrbError::Asn1NonCanonical,
        ErrorKind::Incomplete { .. } => KrbError::Asn1Truncated,
        _ => KrbError::DerError(err),
    }
}

/// Split one TLV off the front of `data`. Returns the tag, the content octets and the
/// remaining input.
pub(crate) fn read_tlv(data: &[u8]) -> Result<(Tag, &[u8], &[u8]), KrbError> {
    let mut reader = SliceReader::new(data)?;
    let tag = Tag::from_octet(reader.read_byte().map_err(codec_error)?)?;
    let length = Length::decode(&mut reader).map_err(codec_error)?;

    let declared = usize::try_from(length)?;
    let available = usize::try_from(reader.remaining_len())?;
    if declared > available {
        return Err(KrbError::Asn1LengthOverrun {
            declared,
            available,
        });
    }

    let content = reader.read_slice(length)?;
    let remaining = reader.remaining_len();
    let rest = reader.read_slice(remaining)?;
    Ok((tag, content, rest))
}

pub(crate) fn encode_header(tag: Tag, length: usize, out: &mut Vec<u8>) -> Result<(), KrbError> {
    out.push(tag.octet());
    Length::try_from(length)?.encode_to_vec(out)?;
    Ok(())
}

/// Minimal two's complement content octets, as der writes them for INTEGER.
fn integer_content(value: i64) -> Vec<u8> {
    let mut content = Vec::with_capacity(9);
    // A Vec writer never refuses bytes.
    let _ = value.encode_value(&mut content);
    content
}

fn decode_integer(tag: der::Tag, bytes: &[u8]) -> Result<i64, KrbError> {
    let header = Header::new(tag, bytes.len())?;
    let mut reader = SliceReader::new(bytes)?;
    i64::decode_value(&mut reader, header).map_err(codec_error)
}

impl Element {
    pub fn new_primitive(tag: Tag, content: Vec<u8>) -> Self {
        Element {
            tag,
            content: Content::Primitive(content),
        }
    }

    pub fn new_constructed(tag: Tag, children: Vec<Element>) -> Self {
        Element {
            tag,
            content: Content::Constructed(children),
        }
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn from_der(data: &[u8]) -> Result<Self, KrbError> {
        let (element, rest) = Self::decode_partial(data, 0)?;
        if !rest.is_empty() {
            trace!(trailing = rest.len(), "trailing der data");
            return Err(KrbError::Asn1TrailingData);
        }
        Ok(element)
    }

    /// Decode one element from the front of `data`, returning whatever follows it.
    pub fn from_der_partial(data: &[u8]) -> Result<(Self, &[u8]), KrbError> {
        Self::decode_partial(data, 0)
    }

    fn decode_partial(data: &[u8], depth: usize) -> Result<(Self, &[u8]), KrbError> {
        if depth > MAX_DEPTH {
            return Err(KrbError::Asn1DepthExceeded);
        }

        let (tag, content, rest) = read_tlv(data)?;

        let content = if tag.is_constructed() {
            let mut children = Vec::new();
            let mut remaining = content;
            while !remaining.is_empty() {
                let (child, r) = Self::decode_partial(remaining, depth + 1)?;
                children.push(child);
                remaining = r;
            }
            Content::Constructed(children)
        } else {
            Content::Primitive(content.to_vec())
        };

        Ok((Element { tag, content }, rest))
    }

    pub fn to_der(&self) -> Result<Vec<u8>, KrbError> {
        let mut out = Vec::new();
        self.encode_into(&mut out)?;
        Ok(out)
    }

    fn encode_into(&self, out: &mut Vec<u8>) -> Result<(), KrbError> {
        match &self.content {
            Content::Primitive(bytes) => {
                encode_header(self.tag, bytes.len(), out)?;
                out.extend_from_slice(bytes);
            }
            Content::Constructed(children) => {
                let mut inner = Vec::new();
                for child in children {
                    child.encode_into(&mut inner)?;
                }
                encode_header(self.tag, inner.len(), out)?;
                out.extend_from_slice(&inner);
            }
        }
        Ok(())
    }

    pub fn expect(&self, tag: Tag) -> Result<&Self, KrbError> {
        if self.tag == tag {
            Ok(self)
        } else {
            Err(KrbError::UnexpectedTag {
                expected: tag,
                actual: self.tag,
            })
        }
    }

    pub fn children(&self) -> Result<&[Element], KrbError> {
        match &self.content {
            Content::Constructed(children) => Ok(children),
            Content::Primitive(_) => Err(KrbError::Asn1InvalidValue("expected constructed")),
        }
    }

    pub fn bytes(&self) -> Result<&[u8], KrbError> {
        match &self.content {
            Content::Primitive(bytes) => Ok(bytes),
            Content::Constructed(_) => Err(KrbError::Asn1InvalidValue("expected primitive")),
        }
    }

    /// The single element wrapped by an explicit tag.
    pub fn inner(&self) -> Result<&Element, KrbError> {
        match self.children()? {
            [inner] => Ok(inner),
            _ => Err(KrbError::Asn1InvalidValue("explicit tag must wrap one value")),
        }
    }

    /// Check this is `[APPLICATION n]` and return the value it wraps.
    pub fn expect_application(&self, number: u32) -> Result<&Element, KrbError> {
        self.expect(Tag::application(number))?.inner()
    }

    pub fn sequence(children: Vec<Element>) -> Self {
        Element::new_constructed(Tag::SEQUENCE, children)
    }

    pub fn as_sequence(&self) -> Result<&[Element], KrbError> {
        self.expect(Tag::SEQUENCE)?.children()
    }

    pub fn explicit(number: u32, inner: Element) -> Self {
        Element::new_constructed(Tag::context(number), vec![inner])
    }

    pub fn application(number: u32, inner: Element) -> Self {
        Element::new_constructed(Tag::application(number), vec![inner])
    }

    pub fn integer(value: i64) -> Self {
        Element::new_primitive(Tag::INTEGER, integer_content(value))
    }

    pub fn as_integer(&self) -> Result<i64, KrbError> {
        decode_integer(der::Tag::Integer, self.expect(Tag::INTEGER)?.bytes()?)
    }

    pub fn as_i32(&self) -> Result<i32, KrbError> {
        i32::try_from(self.as_integer()?).map_err(|_| KrbError::Asn1InvalidValue("Int32"))
    }

    /// UInt32 fields are sometimes sent as negative numbers by peers that treat them as
    /// signed, so values in the Int32 range are wrapped rather than rejected.
    pub fn as_u32(&self) -> Result<u32, KrbError> {
        let v = self.as_integer()?;
        if let Ok(u) = u32::try_from(v) {
            Ok(u)
        } else if let Ok(i) = i32::try_from(v) {
            Ok(i as u32)
        } else {
            Err(KrbError::Asn1InvalidValue("UInt32"))
        }
    }

    pub fn boolean(value: bool) -> Self {
        Element::new_primitive(Tag::BOOLEAN, vec![if value { 0xff } else { 0x00 }])
    }

    pub fn as_bool(&self) -> Result<bool, KrbError> {
        match self.expect(Tag::BOOLEAN)?.bytes()? {
            [0x00] => Ok(false),
            [0xff] => Ok(true),
            _ => Err(KrbError::Asn1InvalidValue("BOOLEAN")),
        }
    }

    pub fn octet_string(value: &[u8]) -> Self {
        Element::new_primitive(Tag::OCTET_STRING, value.to_vec())
    }

    pub fn as_octets(&self) -> Result<&[u8], KrbError> {
        self.expect(Tag::OCTET_STRING)?.bytes()
    }

    pub fn kerberos_string(value: &str) -> Self {
        Element::new_primitive(Tag::GENERAL_STRING, value.as_bytes().to_vec())
    }

    /// KerberosString is a GeneralString, but several implementations send the other
    /// string types. Accept any of them as long as they hold UTF-8.
    pub fn as_kerberos_string(&self) -> Result<String, KrbError> {
        match self.tag {
            Tag::GENERAL_STRING
            | Tag::IA5_STRING
            | Tag::UTF8_STRING
            | Tag::VISIBLE_STRING
            | Tag::PRINTABLE_STRING => {}
            actual => {
                return Err(KrbError::UnexpectedTag {
                    expected: Tag::GENERAL_STRING,
                    actual,
                })
            }
        }
        String::from_utf8(self.bytes()?.to_vec())
            .map_err(|_| KrbError::Asn1InvalidValue("KerberosString"))
    }

    /// KerberosTime is a GeneralizedTime without fractional seconds, so sub-second
    /// precision is truncated.
    pub fn generalized_time(time: SystemTime) -> Result<Self, KrbError> {
        let since_epoch = time
            .duration_since(SystemTime::UNIX_EPOCH)
            .map_err(|_| KrbError::Asn1InvalidValue("KerberosTime before epoch"))?;
        let gt = GeneralizedTime::from_unix_duration(Duration::from_secs(since_epoch.as_secs()))?;
        let mut content = Vec::with_capacity(15);
        gt.encode_value(&mut content)?;
        Ok(Element::new_primitive(Tag::GENERALIZED_TIME, content))
    }

    pub fn as_generalized_time(&self) -> Result<SystemTime, KrbError> {
        let bytes = self.expect(Tag::GENERALIZED_TIME)?.bytes()?;
        let header = Header::new(der::Tag::GeneralizedTime, bytes.len())?;
        let gt = GeneralizedTime::decode_value(&mut SliceReader::new(bytes)?, header)?;
        Ok(SystemTime::UNIX_EPOCH + gt.to_unix_duration())
    }

    /// A 32 bit BIT STRING in wire order. The first bit on the wire is the high bit of
    /// the returned value.
    pub fn bit_string(bits: u32) -> Self {
        let mut content = Vec::with_capacity(5);
        content.push(0);
        content.extend_from_slice(&bits.to_be_bytes());
        Element::new_primitive(Tag::BIT_STRING, content)
    }

    pub fn as_bit_string(&self) -> Result<u32, KrbError> {
        let bytes = self.expect(Tag::BIT_STRING)?.bytes()?;
        let header = Header::new(der::Tag::BitString, bytes.len())?;
        let bits = BitStringRef::decode_value(&mut SliceReader::new(bytes)?, header)
            .map_err(|_| KrbError::Asn1InvalidValue("BIT STRING"))?;
        // Only the first 32 bits carry meaning, peers may send fewer.
        let mut buf = [0u8; 4];
        for (dst, src) in buf.iter_mut().zip(bits.raw_bytes()) {
            *dst = *src;
        }
        Ok(u32::from_be_bytes(buf))
    }

    pub fn oid(oid: &ObjectIdentifier) -> Self {
        Element::new_primitive(Tag::OBJECT_IDENTIFIER, oid.as_bytes().to_vec())
    }

    pub fn as_oid(&self) -> Result<ObjectIdentifier, KrbError> {
        let bytes = self.expect(Tag::OBJECT_IDENTIFIER)?.bytes()?;
        ObjectIdentifier::from_bytes(bytes).map_err(|_| KrbError::Asn1InvalidValue("OID"))
    }

    pub fn enumerated(value: i64) -> Self {
        Element::new_primitive(Tag::ENUMERATED, integer_content(value))
    }

    pub fn as_enumerated(&self) -> Result<i64, KrbError> {
        decode_integer(der::Tag::Enumerated, self.expect(Tag::ENUMERATED)?.bytes()?)
    }
}

#[cfg(test)]
mod tests {
    use super::{Content, Element, Tag};
    use crate::error::KrbError;
    use assert_hex::assert_eq_hex;
    use std::time::{Duration, SystemTime};

    #[test]
    fn integer_minimal_encoding() {
        let cases: [(i64, &str); 7] = [
            (0, "020100"),
            (5, "020105"),
            (127, "02017f"),
            (128, "02020080"),
            (-1, "0201ff"),
            (-128, "020180"),
            (-138, "0202ff76"),
        ];
        for (value, expect) in cases {
            let der = Element::integer(value).to_der().expect("encode");
            assert_eq_hex!(der, hex::decode(expect).expect("hex"));
            let back = Element::from_der(&der).expect("decode");
            assert_eq!(back.as_integer().expect("integer"), value);
        }
    }

    #[test]
    fn integer_non_minimal_rejected() {
        let der = hex::decode("02020005").expect("hex");
        let el = Element::from_der(&der).expect("decode");
        assert!(matches!(el.as_integer(), Err(KrbError::Asn1NonCanonical)));
    }

    #[test]
    fn uint32_accepts_negative_nonce() {
        // 0x8abcdef0 sent as a signed 4 byte integer
        let el = Element::from_der(&hex::decode("02048abcdef0").expect("hex")).expect("decode");
        assert_eq!(el.as_u32().expect("u32"), 0x8abcdef0);
        let el = Element::from_der(&hex::decode("0205008abcdef0").expect("hex")).expect("decode");
        assert_eq!(el.as_u32().expect("u32"), 0x8abcdef0);
    }

    #[test]
    fn zero_length_constructed_is_empty() {
        let el = Element::from_der(&[0x30, 0x00]).expect("decode");
        assert_eq!(el.content(), &Content::Constructed(vec![]));
    }

    #[test]
    fn indefinite_length_rejected() {
        let der = [0x30, 0x80, 0x02, 0x01, 0x05, 0x00, 0x00];
        assert!(matches!(
            Element::from_der(&der),
            Err(KrbError::Asn1IndefiniteLength)
        ));
    }

    #[test]
    fn long_form_length_must_be_minimal() {
        // 5 bytes encoded with a long form length
        let der = [0x04, 0x81, 0x05, 1, 2, 3, 4, 5];
        assert!(matches!(
            Element::from_der(&der),
            Err(KrbError::Asn1NonCanonical)
        ));
    }

    #[test]
    fn length_overrun_names_both_lengths() {
        let der = [0x04, 0x10, 1, 2, 3];
        match Element::from_der(&der) {
            Err(KrbError::Asn1LengthOverrun {
                declared,
                available,
            }) => {
                assert_eq!(declared, 16);
                assert_eq!(available, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn child_cannot_escape_parent() {
        // The sequence claims 3 bytes but the inner integer claims 4.
        let der = [0x30, 0x03, 0x02, 0x04, 0x01, 0x02, 0x03, 0x04];
        assert!(Element::from_der(&der).is_err());
    }

    #[test]
    fn trailing_data_rejected() {
        let der = [0x02, 0x01, 0x05, 0x00];
        assert!(matches!(
            Element::from_der(&der),
            Err(KrbError::Asn1TrailingData)
        ));
    }

    #[test]
    fn depth_is_bounded() {
        let mut der = vec![0x02, 0x01, 0x01];
        for _ in 0..40 {
            let mut outer = vec![0x30];
            let len = der.len();
            if len < 0x80 {
                outer.push(len as u8);
            } else {
                outer.push(0x81);
                outer.push(len as u8);
            }
            outer.extend_from_slice(&der);
            der = outer;
        }
        assert!(matches!(
            Element::from_der(&der),
            Err(KrbError::Asn1DepthExceeded)
        ));
    }

    #[test]
    fn long_content_round_trip() {
        let payload = vec![0xaa; 300];
        let der = Element::octet_string(&payload).to_der().expect("encode");
        assert_eq_hex!(&der[..4], &[0x04, 0x82, 0x01, 0x2c][..]);
        let back = Element::from_der(&der).expect("decode");
        assert_eq!(back.as_octets().expect("octets"), payload.as_slice());
    }

    #[test]
    fn application_tag_mismatch_names_both() {
        let der = Element::application(11, Element::sequence(vec![]))
            .to_der()
            .expect("encode");
        let el = Element::from_der(&der).expect("decode");
        let err = el.expect_application(30).expect_err("must fail");
        assert_eq!(err.to_string(), "Expected Application-30 but found Application-11");
    }

    #[test]
    fn multi_byte_tag_numbers_rejected() {
        // [200] in the high tag number form
        let der = [0x9f, 0x81, 0x48, 0x01, 0x01];
        assert!(matches!(
            Element::from_der(&der),
            Err(KrbError::Asn1InvalidValue("tag number"))
        ));
    }

    #[test]
    fn tags_keep_class_and_form() {
        let el = Element::from_der(&[0x85, 0x01, 0x01]).expect("decode");
        assert_eq!(el.tag().class(), der::Class::ContextSpecific);
        assert!(!el.tag().is_constructed());
        assert_eq!(el.tag().number(), 5);
        assert_eq!(el.tag().to_string(), "Context-5");
        assert_eq!(el.to_der().expect("encode"), vec![0x85, 0x01, 0x01]);
        assert_eq!(Tag::context(5).to_string(), "Context-5");
    }

    #[test]
    fn empty_integer_rejected() {
        let el = Element::from_der(&[0x02, 0x00]).expect("decode");
        assert!(el.as_integer().is_err());
    }

    #[test]
    fn kerberos_time() {
        let time = SystemTime::UNIX_EPOCH + Duration::from_secs(1_718_192_885);
        let el = Element::generalized_time(time).expect("time");
        let der = el.to_der().expect("encode");
        assert_eq!(&der[..2], &[0x18, 0x0f]);
        assert_eq!(&der[2..], b"20240612114805Z");
        let back = Element::from_der(&der).expect("decode");
        assert_eq!(back.as_generalized_time().expect("time"), time);
    }

    #[test]
    fn kerberos_string_variants() {
        let general = Element::from_der(&hex::decode("1b0461626364").expect("hex"))
            .expect("decode");
        assert_eq!(general.as_kerberos_string().expect("str"), "abcd");
        let ia5 = Element::from_der(&hex::decode("160461626364").expect("hex")).expect("decode");
        assert_eq!(ia5.as_kerberos_string().expect("str"), "abcd");
        let octets = Element::octet_string(b"abcd");
        assert!(octets.as_kerberos_string().is_err());
    }

    #[test]
    fn bit_string_flags() {
        let el = Element::bit_string(0x4081_0010);
        assert_eq_hex!(
            el.to_der().expect("encode"),
            hex::decode("03050040810010").expect("hex")
        );
        assert_eq!(el.as_bit_string().expect("bits"), 0x4081_0010);

        // Short strings are zero extended, unused bits above 7 are invalid.
        let short = Element::from_der(&[0x03, 0x02, 0x00, 0x40]).expect("decode");
        assert_eq!(short.as_bit_string().expect("bits"), 0x4000_0000);
        let bad = Element::from_der(&[0x03, 0x02, 0x08, 0x40]).expect("decode");
        assert!(bad.as_bit_string().is_err());
    }
}
