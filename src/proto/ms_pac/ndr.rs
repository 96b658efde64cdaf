//! A minimal NDR (MS-RPCE type serialization version 1) reader and writer, enough for
//! KERB_VALIDATION_INFO.
//!
//! Fixed size members are written in place. A pointer member is written as a referent id
//! (0x0002_0000, 0x0002_0004, ...) or zero for NULL, and the pointed-to data follows the
//! enclosing structure in the same order the pointers appeared. Conformant arrays carry
//! their element count ahead of the data, and varying arrays carry an offset and actual
//! count as well.

use super::Sid;
use crate::error::KrbError;
use binrw::io::Cursor;
use binrw::{binread, binwrite, BinRead, BinReaderExt, BinWrite, BinWriterExt};
use tracing::error;

const FIRST_REFERENT: u32 = 0x0002_0000;
const MAX_SUB_AUTHORITIES: usize = 15;

/// Common and private headers of type serialization version 1.
#[binread]
#[binwrite]
#[brw(little)]
struct SerializationHeader {
    #[br(assert(version == 1))]
    version: u8,
    #[br(assert(endianness == 0x10))]
    endianness: u8,
    #[br(assert(common_header_length == 8))]
    common_header_length: u16,
    filler: u32,
    object_buffer_length: u32,
    private_filler: u32,
}

/// The in-place part of an RPC_UNICODE_STRING. The characters follow later.
#[binread]
#[binwrite]
#[brw(little)]
pub(super) struct UnicodeStringHeader {
    #[br(align_before = 4)]
    length: u16,
    maximum_length: u16,
    pointer: u32,
}

/// Maximum count, offset and actual count of a conformant varying array.
#[binread]
#[binwrite]
#[brw(little)]
struct VaryingArrayHeader {
    #[br(align_before = 4)]
    max_count: u32,
    offset: u32,
    actual_count: u32,
}

#[binread]
#[binwrite]
#[brw(little)]
struct FileTimeParts {
    #[br(align_before = 4)]
    low: u32,
    high: u32,
}

/// The self-relative SID layout, shared by NDR and UPN_DNS_INFO.
#[binread]
#[binwrite]
#[brw(little)]
pub(super) struct SidRecord {
    revision: u8,
    #[br(temp, assert(usize::from(count) <= MAX_SUB_AUTHORITIES))]
    #[bw(try_calc(u8::try_from(sub_authorities.len())))]
    count: u8,
    identifier_authority: [u8; 6],
    #[br(count = count)]
    sub_authorities: Vec<u32>,
}

impl SidRecord {
    pub(super) fn from_sid(sid: &Sid) -> Result<Self, KrbError> {
        if sid.sub_authorities.len() > MAX_SUB_AUTHORITIES {
            return Err(KrbError::PacInvalid("sid sub authority count"));
        }
        Ok(SidRecord {
            revision: sid.revision,
            identifier_authority: sid.identifier_authority,
            sub_authorities: sid.sub_authorities.clone(),
        })
    }

    pub(super) fn into_sid(self) -> Sid {
        Sid {
            revision: self.revision,
            identifier_authority: self.identifier_authority,
            sub_authorities: self.sub_authorities,
        }
    }
}

/// An RPC_SID: the conformant sub authority count ahead of the self-relative form.
#[binread]
#[binwrite]
#[brw(little)]
struct NdrSid {
    #[br(temp, align_before = 4)]
    #[bw(try_calc(u32::try_from(sid.sub_authorities.len())))]
    conformance: u32,
    #[br(assert(u32::try_from(sid.sub_authorities.len()) == Ok(conformance)))]
    sid: SidRecord,
}

/// Assertion failures mean a value is out of range, anything else ran off the end.
fn read_error(what: &'static str) -> impl Fn(binrw::Error) -> KrbError {
    move |err| match err.root_cause() {
        binrw::Error::AssertFail { pos, message } => {
            error!(%pos, %message, what, "invalid ndr value");
            KrbError::PacInvalid(what)
        }
        _ => KrbError::PacInvalid("ndr data truncated"),
    }
}

pub(super) struct NdrReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> NdrReader<'a> {
    pub(super) fn new(data: &'a [u8]) -> Self {
        NdrReader {
            cursor: Cursor::new(data),
        }
    }

    fn position(&self) -> usize {
        usize::try_from(self.cursor.position()).unwrap_or(usize::MAX)
    }

    fn remaining(&self) -> usize {
        self.cursor.get_ref().len().saturating_sub(self.position())
    }

    pub(super) fn align(&mut self, n: usize) -> Result<(), KrbError> {
        let pad = (n - self.position() % n) % n;
        if pad > self.remaining() {
            return Err(KrbError::PacInvalid("ndr data truncated"));
        }
        self.cursor.set_position(self.cursor.position() + pad as u64);
        Ok(())
    }

    pub(super) fn u8(&mut self) -> Result<u8, KrbError> {
        self.cursor.read_le().map_err(read_error("ndr u8"))
    }

    pub(super) fn u16(&mut self) -> Result<u16, KrbError> {
        self.align(2)?;
        self.cursor.read_le().map_err(read_error("ndr u16"))
    }

    pub(super) fn u32(&mut self) -> Result<u32, KrbError> {
        self.align(4)?;
        self.cursor.read_le().map_err(read_error("ndr u32"))
    }

    /// FILETIME is a pair of DWORDs, so it is only 4 byte aligned.
    pub(super) fn filetime(&mut self) -> Result<u64, KrbError> {
        let parts: FileTimeParts = self.cursor.read_le().map_err(read_error("filetime"))?;
        Ok((u64::from(parts.high) << 32) | u64::from(parts.low))
    }

    pub(super) fn array<const N: usize>(&mut self) -> Result<[u8; N], KrbError> {
        self.cursor.read_le().map_err(read_error("ndr array"))
    }

    /// Returns whether the pointer is non-NULL.
    pub(super) fn pointer(&mut self) -> Result<bool, KrbError> {
        self.u32().map(|referent| referent != 0)
    }

    pub(super) fn type_serialization_header(&mut self) -> Result<(), KrbError> {
        let header = SerializationHeader::read(&mut self.cursor)
            .map_err(read_error("ndr serialization header"))?;
        if header.object_buffer_length as usize > self.remaining() {
            return Err(KrbError::PacInvalid("ndr object length"));
        }
        Ok(())
    }

    /// A conformant array's element count, checked against the bytes left so a hostile
    /// count cannot drive allocation.
    pub(super) fn conformant_count(&mut self, element_size: usize) -> Result<usize, KrbError> {
        let count = self.u32()? as usize;
        if count.saturating_mul(element_size) > self.remaining() {
            return Err(KrbError::PacInvalid("ndr array count"));
        }
        Ok(count)
    }

    pub(super) fn unicode_string_header(&mut self) -> Result<UnicodeStringHeader, KrbError> {
        UnicodeStringHeader::read(&mut self.cursor).map_err(read_error("ndr string header"))
    }

    pub(super) fn unicode_string(
        &mut self,
        header: &UnicodeStringHeader,
    ) -> Result<String, KrbError> {
        if header.pointer == 0 {
            return Ok(String::new());
        }
        let array = VaryingArrayHeader::read(&mut self.cursor)
            .map_err(read_error("ndr string bounds"))?;
        let actual = array.actual_count as usize;
        if array.offset != 0
            || array.actual_count > array.max_count
            || actual.saturating_mul(2) != usize::from(header.length)
            || actual.saturating_mul(2) > self.remaining()
        {
            return Err(KrbError::PacInvalid("ndr string bounds"));
        }
        let units = (0..actual)
            .map(|_| self.cursor.read_le::<u16>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(read_error("ndr string"))?;
        String::from_utf16(&units).map_err(|_| KrbError::PacInvalid("ndr string utf16"))
    }

    pub(super) fn sid(&mut self) -> Result<Sid, KrbError> {
        NdrSid::read(&mut self.cursor)
            .map(|ndr| ndr.sid.into_sid())
            .map_err(read_error("sid sub authority count"))
    }
}

pub(super) struct NdrWriter {
    cursor: Cursor<Vec<u8>>,
    next_referent: u32,
}

impl NdrWriter {
    pub(super) fn new() -> Self {
        NdrWriter {
            cursor: Cursor::new(Vec::with_capacity(512)),
            next_referent: FIRST_REFERENT,
        }
    }

    fn len(&self) -> usize {
        self.cursor.get_ref().len()
    }

    pub(super) fn align(&mut self, n: usize) -> Result<(), KrbError> {
        let pad = (n - self.len() % n) % n;
        for _ in 0..pad {
            self.cursor.write_le(&0u8)?;
        }
        Ok(())
    }

    pub(super) fn u8(&mut self, value: u8) -> Result<(), KrbError> {
        self.cursor.write_le(&value).map_err(KrbError::from)
    }

    pub(super) fn u16(&mut self, value: u16) -> Result<(), KrbError> {
        self.align(2)?;
        self.cursor.write_le(&value).map_err(KrbError::from)
    }

    pub(super) fn u32(&mut self, value: u32) -> Result<(), KrbError> {
        self.align(4)?;
        self.cursor.write_le(&value).map_err(KrbError::from)
    }

    pub(super) fn filetime(&mut self, value: u64) -> Result<(), KrbError> {
        self.align(4)?;
        let parts = FileTimeParts {
            low: value as u32,
            high: (value >> 32) as u32,
        };
        self.cursor.write_le(&parts).map_err(KrbError::from)
    }

    pub(super) fn bytes(&mut self, value: &[u8]) -> Result<(), KrbError> {
        self.cursor.write_le(&value.to_vec()).map_err(KrbError::from)
    }

    fn referent(&mut self, present: bool) -> u32 {
        if present {
            let referent = self.next_referent;
            self.next_referent += 4;
            referent
        } else {
            0
        }
    }

    pub(super) fn pointer(&mut self, present: bool) -> Result<(), KrbError> {
        let referent = self.referent(present);
        self.u32(referent)
    }

    pub(super) fn unicode_string_header(&mut self, value: &str) -> Result<(), KrbError> {
        let length = value
            .encode_utf16()
            .count()
            .checked_mul(2)
            .and_then(|len| u16::try_from(len).ok())
            .ok_or(KrbError::PacInvalid("ndr string too long"))?;
        self.align(4)?;
        let header = UnicodeStringHeader {
            length,
            maximum_length: length,
            pointer: self.referent(true),
        };
        self.cursor.write_le(&header).map_err(KrbError::from)
    }

    pub(super) fn unicode_string(&mut self, value: &str) -> Result<(), KrbError> {
        let units: Vec<u16> = value.encode_utf16().collect();
        let count =
            u32::try_from(units.len()).map_err(|_| KrbError::PacInvalid("ndr string too long"))?;
        self.align(4)?;
        let array = VaryingArrayHeader {
            max_count: count,
            offset: 0,
            actual_count: count,
        };
        self.cursor.write_le(&array)?;
        self.cursor.write_le(&units).map_err(KrbError::from)
    }

    pub(super) fn sid(&mut self, sid: &Sid) -> Result<(), KrbError> {
        let ndr = NdrSid {
            sid: SidRecord::from_sid(sid)?,
        };
        self.align(4)?;
        self.cursor.write_le(&ndr).map_err(KrbError::from)
    }

    /// Prefix the type serialization headers. The object is padded to 8 bytes.
    pub(super) fn finish(mut self) -> Result<Vec<u8>, KrbError> {
        self.align(8)?;
        let body = self.cursor.into_inner();
        let header = SerializationHeader {
            version: 1,
            endianness: 0x10,
            common_header_length: 8,
            filler: 0xcccc_cccc,
            object_buffer_length: u32::try_from(body.len())
                .map_err(|_| KrbError::PacInvalid("ndr object length"))?,
            private_filler: 0,
        };
        let mut out = Cursor::new(Vec::with_capacity(16 + body.len()));
        header.write(&mut out)?;
        let mut out = out.into_inner();
        out.extend_from_slice(&body);
        Ok(out)
    }
}
