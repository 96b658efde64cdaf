//! The Privilege Attribute Certificate (MS-PAC) carried in AD-WIN2K-PAC.
//!
//! A PAC is a little endian PACTYPE header followed by typed buffers on 8 byte boundaries.
//! Each buffer is decoded on its own: a buffer that fails to decode is kept as
//! [`PacBuffer::Failed`] and does not hide the others.

mod logon_info;
mod ndr;

pub use self::logon_info::{
    FileTime, GroupMembership, KerbValidationInfo, Sid, SidAndAttributes, LOGON_EXTRA_SIDS,
    LOGON_RESOURCE_GROUPS, RID_DOMAIN_USERS, SE_GROUP_DEFAULT, USER_DONT_EXPIRE_PASSWORD,
    USER_NORMAL_ACCOUNT,
};

use crate::asn1::constants::{key_usage, ChecksumType};
use crate::crypto::{CryptoKey, CryptoRegistry, KerberosCipher};
use crate::error::KrbError;
use binrw::helpers::until_eof;
use binrw::io::Cursor;
use binrw::{binread, binwrite, BinRead, BinWrite};
use tracing::{debug, error, trace, warn};

const PAC_LOGON_INFO: u32 = 1;
const PAC_SERVER_CHECKSUM: u32 = 6;
const PAC_PRIVSVR_CHECKSUM: u32 = 7;
const PAC_CLIENT_INFO: u32 = 10;
const PAC_UPN_DNS_INFO: u32 = 12;
const PAC_TICKET_CHECKSUM: u32 = 16;
const PAC_FULL_CHECKSUM: u32 = 19;

const MAX_PAC_BUFFERS: u32 = 64;
const PAC_ALIGNMENT: usize = 8;

/// UPN_DNS_INFO flag: the account has no UPN and one was synthesised.
pub const UPN_DNS_NO_UPN: u32 = 0x1;
/// UPN_DNS_INFO flag: the SAM name and SID follow the DNS domain name.
pub const UPN_DNS_EXTENDED: u32 = 0x2;

#[binread]
#[binwrite]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
struct PacHeader {
    #[br(temp, assert(count <= MAX_PAC_BUFFERS))]
    #[bw(try_calc(u32::try_from(buffers.len())))]
    count: u32,
    #[br(temp, assert(version == 0))]
    #[bw(calc = 0u32)]
    version: u32,
    #[br(count = count)]
    buffers: Vec<PacInfoBuffer>,
}

#[binread]
#[binwrite]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PacInfoBuffer {
    ul_type: u32,
    size: u32,
    offset: u64,
}

impl PacInfoBuffer {
    fn range(&self, total: usize) -> Option<std::ops::Range<usize>> {
        let start = usize::try_from(self.offset).ok()?;
        let end = start.checked_add(self.size as usize)?;
        (end <= total).then_some(start..end)
    }
}

#[binread]
#[binwrite]
#[brw(little)]
struct ClientInfoRaw {
    client_id: u64,
    #[br(temp)]
    #[bw(try_calc(u16::try_from(name.len() * 2)))]
    name_length: u16,
    #[br(count = name_length / 2)]
    name: Vec<u16>,
}

#[binread]
#[binwrite]
#[brw(little)]
struct UpnDnsInfoHeader {
    upn_length: u16,
    upn_offset: u16,
    dns_domain_name_length: u16,
    dns_domain_name_offset: u16,
    flags: u32,
    #[br(if(flags & UPN_DNS_EXTENDED != 0))]
    extension: Option<UpnDnsExtension>,
}

#[binread]
#[binwrite]
#[brw(little)]
struct UpnDnsExtension {
    sam_name_length: u16,
    sam_name_offset: u16,
    sid_length: u16,
    sid_offset: u16,
}

#[binread]
#[binwrite]
#[brw(little)]
struct SignatureRaw {
    signature_type: i32,
    #[br(parse_with = until_eof)]
    rest: Vec<u8>,
}

/// PAC_CLIENT_INFO: the ticket's auth time and the client name without its realm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacClientInfo {
    pub client_id: FileTime,
    pub name: String,
}

impl PacClientInfo {
    fn decode(data: &[u8]) -> Result<Self, KrbError> {
        let raw = ClientInfoRaw::read(&mut Cursor::new(data))?;
        Ok(PacClientInfo {
            client_id: FileTime(raw.client_id),
            name: String::from_utf16(&raw.name)
                .map_err(|_| KrbError::PacInvalid("client info name"))?,
        })
    }

    fn encode(&self) -> Result<Vec<u8>, KrbError> {
        let raw = ClientInfoRaw {
            client_id: self.client_id.0,
            name: self.name.encode_utf16().collect(),
        };
        let mut out = Cursor::new(Vec::new());
        raw.write(&mut out)?;
        Ok(out.into_inner())
    }
}

/// UPN_DNS_INFO, MS-PAC section 2.10.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpnDnsInfo {
    pub upn: String,
    pub dns_domain_name: String,
    pub flags: u32,
    pub sam_name: Option<String>,
    pub sid: Option<Sid>,
}

impl UpnDnsInfo {
    pub fn new(upn: &str, dns_domain_name: &str) -> Self {
        UpnDnsInfo {
            upn: upn.to_string(),
            dns_domain_name: dns_domain_name.to_string(),
            flags: 0,
            sam_name: None,
            sid: None,
        }
    }

    /// Carry the SAM account name and user SID as well.
    pub fn with_sam_name(mut self, sam_name: &str, sid: Sid) -> Self {
        self.flags |= UPN_DNS_EXTENDED;
        self.sam_name = Some(sam_name.to_string());
        self.sid = Some(sid);
        self
    }

    fn decode(data: &[u8]) -> Result<Self, KrbError> {
        let header = UpnDnsInfoHeader::read(&mut Cursor::new(data))?;
        let upn = utf16_at(data, header.upn_offset, header.upn_length)?;
        let dns_domain_name = utf16_at(
            data,
            header.dns_domain_name_offset,
            header.dns_domain_name_length,
        )?;
        let (sam_name, sid) = match &header.extension {
            Some(ext) => (
                Some(utf16_at(data, ext.sam_name_offset, ext.sam_name_length)?),
                Some(Sid::from_bytes(slice_at(data, ext.sid_offset, ext.sid_length)?)?),
            ),
            None => (None, None),
        };
        Ok(UpnDnsInfo {
            upn,
            dns_domain_name,
            flags: header.flags,
            sam_name,
            sid,
        })
    }

    fn encode(&self) -> Result<Vec<u8>, KrbError> {
        let upn = utf16_bytes(&self.upn);
        let dns = utf16_bytes(&self.dns_domain_name);
        let sam = self.sam_name.as_deref().map(utf16_bytes);
        let sid = self.sid.as_ref().map(Sid::to_bytes).transpose()?;
        let extended = sam.is_some() && sid.is_some();

        let header_len = if extended { 20 } else { 12 };
        let mut body = Vec::new();
        let mut place = |value: &[u8]| -> Result<(u16, u16), KrbError> {
            let offset = align_up(header_len + body.len(), PAC_ALIGNMENT);
            body.resize(offset - header_len, 0);
            body.extend_from_slice(value);
            let offset =
                u16::try_from(offset).map_err(|_| KrbError::PacInvalid("upn dns info size"))?;
            let len = u16::try_from(value.len())
                .map_err(|_| KrbError::PacInvalid("upn dns info size"))?;
            Ok((len, offset))
        };

        let (upn_length, upn_offset) = place(upn.as_slice())?;
        let (dns_domain_name_length, dns_domain_name_offset) = place(dns.as_slice())?;
        let extension = match (&sam, &sid) {
            (Some(sam), Some(sid)) => {
                let (sam_name_length, sam_name_offset) = place(sam.as_slice())?;
                let (sid_length, sid_offset) = place(sid.as_slice())?;
                Some(UpnDnsExtension {
                    sam_name_length,
                    sam_name_offset,
                    sid_length,
                    sid_offset,
                })
            }
            _ => None,
        };

        let flags = if extended {
            self.flags | UPN_DNS_EXTENDED
        } else {
            self.flags & !UPN_DNS_EXTENDED
        };
        let header = UpnDnsInfoHeader {
            upn_length,
            upn_offset,
            dns_domain_name_length,
            dns_domain_name_offset,
            flags,
            extension,
        };
        let mut out = Cursor::new(Vec::new());
        header.write(&mut out)?;
        let mut out = out.into_inner();
        out.extend_from_slice(&body);
        Ok(out)
    }
}

/// PAC_SIGNATURE_DATA. `signature` excludes any trailing RODC identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacSignature {
    pub signature_type: i32,
    pub signature: Vec<u8>,
}

impl PacSignature {
    fn decode(data: &[u8]) -> Result<Self, KrbError> {
        let raw = SignatureRaw::read(&mut Cursor::new(data))?;
        let len = signature_len(raw.signature_type).unwrap_or(raw.rest.len());
        let signature = raw
            .rest
            .get(..len)
            .ok_or(KrbError::PacInvalid("signature length"))?
            .to_vec();
        Ok(PacSignature {
            signature_type: raw.signature_type,
            signature,
        })
    }

    fn encode(&self) -> Result<Vec<u8>, KrbError> {
        let raw = SignatureRaw {
            signature_type: self.signature_type,
            rest: self.signature.clone(),
        };
        let mut out = Cursor::new(Vec::new());
        raw.write(&mut out)?;
        Ok(out.into_inner())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacBuffer {
    LogonInfo(Box<KerbValidationInfo>),
    ClientInfo(PacClientInfo),
    UpnDnsInfo(UpnDnsInfo),
    ServerChecksum(PacSignature),
    KdcChecksum(PacSignature),
    /// A buffer type this crate does not interpret.
    Other { ul_type: u32, data: Vec<u8> },
    /// A buffer that failed to decode, with the reason.
    Failed { ul_type: u32, reason: String },
}

impl PacBuffer {
    fn decode(ul_type: u32, data: &[u8]) -> Result<Self, KrbError> {
        match ul_type {
            PAC_LOGON_INFO => KerbValidationInfo::decode(data)
                .map(|info| PacBuffer::LogonInfo(Box::new(info))),
            PAC_CLIENT_INFO => PacClientInfo::decode(data).map(PacBuffer::ClientInfo),
            PAC_UPN_DNS_INFO => UpnDnsInfo::decode(data).map(PacBuffer::UpnDnsInfo),
            PAC_SERVER_CHECKSUM => PacSignature::decode(data).map(PacBuffer::ServerChecksum),
            PAC_PRIVSVR_CHECKSUM => PacSignature::decode(data).map(PacBuffer::KdcChecksum),
            ul_type => Ok(PacBuffer::Other {
                ul_type,
                data: data.to_vec(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pac {
    raw: Vec<u8>,
    entries: Vec<(PacInfoBuffer, PacBuffer)>,
}

impl Pac {
    /// Decode the PACTYPE header and every buffer. Only a broken header is an error.
    pub fn parse(data: &[u8]) -> Result<Self, KrbError> {
        let header = PacHeader::read(&mut Cursor::new(data)).map_err(|err| {
            error!(?err, "invalid pac header");
            KrbError::PacInvalid("pac header")
        })?;

        let entries = header
            .buffers
            .into_iter()
            .map(|info| {
                let decoded = info
                    .range(data.len())
                    .ok_or(KrbError::PacInvalid("pac buffer out of range"))
                    .and_then(|range| PacBuffer::decode(info.ul_type, &data[range]));
                let buffer = match decoded {
                    Ok(buffer) => buffer,
                    Err(err) => {
                        warn!(?err, ul_type = info.ul_type, "pac buffer failed to decode");
                        PacBuffer::Failed {
                            ul_type: info.ul_type,
                            reason: err.to_string(),
                        }
                    }
                };
                (info, buffer)
            })
            .collect();

        Ok(Pac {
            raw: data.to_vec(),
            entries,
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn buffers(&self) -> impl Iterator<Item = &PacBuffer> {
        self.entries.iter().map(|(_, buffer)| buffer)
    }

    pub fn logon_info(&self) -> Option<&KerbValidationInfo> {
        self.buffers().find_map(|b| match b {
            PacBuffer::LogonInfo(info) => Some(info.as_ref()),
            _ => None,
        })
    }

    pub fn client_info(&self) -> Option<&PacClientInfo> {
        self.buffers().find_map(|b| match b {
            PacBuffer::ClientInfo(info) => Some(info),
            _ => None,
        })
    }

    pub fn upn_dns_info(&self) -> Option<&UpnDnsInfo> {
        self.buffers().find_map(|b| match b {
            PacBuffer::UpnDnsInfo(info) => Some(info),
            _ => None,
        })
    }

    pub fn server_signature(&self) -> Option<&PacSignature> {
        self.buffers().find_map(|b| match b {
            PacBuffer::ServerChecksum(sig) => Some(sig),
            _ => None,
        })
    }

    pub fn kdc_signature(&self) -> Option<&PacSignature> {
        self.buffers().find_map(|b| match b {
            PacBuffer::KdcChecksum(sig) => Some(sig),
            _ => None,
        })
    }

    /// Buffer types that failed to decode, and why.
    pub fn failures(&self) -> Vec<(u32, &str)> {
        self.buffers()
            .filter_map(|b| match b {
                PacBuffer::Failed { ul_type, reason } => Some((*ul_type, reason.as_str())),
                _ => None,
            })
            .collect()
    }

    /// Check the server signature with the key of the service the ticket was issued for.
    pub fn verify_server_signature(
        &self,
        registry: &CryptoRegistry,
        service_key: &CryptoKey,
    ) -> Result<(), KrbError> {
        let signature = self.server_signature().ok_or(KrbError::PacSignatureInvalid)?;
        let zeroed = self.zeroed_signatures();
        verify_signature(registry, service_key, signature, &zeroed)
    }

    /// Check the KDC signature, which covers the server signature, with the krbtgt key.
    pub fn verify_kdc_signature(
        &self,
        registry: &CryptoRegistry,
        krbtgt_key: &CryptoKey,
    ) -> Result<(), KrbError> {
        let server = self.server_signature().ok_or(KrbError::PacSignatureInvalid)?;
        let signature = self.kdc_signature().ok_or(KrbError::PacSignatureInvalid)?;
        verify_signature(registry, krbtgt_key, signature, &server.signature)
    }

    /// The PAC with every signature value replaced by zeros, as it was when signed.
    fn zeroed_signatures(&self) -> Vec<u8> {
        let mut out = self.raw.clone();
        for (info, _) in &self.entries {
            if !matches!(
                info.ul_type,
                PAC_SERVER_CHECKSUM | PAC_PRIVSVR_CHECKSUM | PAC_TICKET_CHECKSUM | PAC_FULL_CHECKSUM
            ) {
                continue;
            }
            let Some(range) = info.range(out.len()) else {
                continue;
            };
            let buffer = &mut out[range];
            if buffer.len() < 4 {
                continue;
            }
            let signature_type = i32::from_le_bytes([buffer[0], buffer[1], buffer[2], buffer[3]]);
            let len = signature_len(signature_type).unwrap_or(buffer.len() - 4);
            let end = (4 + len).min(buffer.len());
            buffer[4..end].fill(0);
        }
        out
    }
}

/// Assembles and signs a PAC for a ticket.
pub struct PacBuilder {
    logon_info: KerbValidationInfo,
    client_info: PacClientInfo,
    upn_dns_info: Option<UpnDnsInfo>,
}

impl PacBuilder {
    pub fn new(logon_info: KerbValidationInfo, client_info: PacClientInfo) -> Self {
        PacBuilder {
            logon_info,
            client_info,
            upn_dns_info: None,
        }
    }

    pub fn upn_dns_info(mut self, upn_dns_info: UpnDnsInfo) -> Self {
        self.upn_dns_info = Some(upn_dns_info);
        self
    }

    /// Encode the PAC and sign it: the server signature with the service key over the
    /// whole PAC, then the KDC signature with the krbtgt key over the server signature.
    pub fn build(
        self,
        registry: &CryptoRegistry,
        service_key: &CryptoKey,
        krbtgt_key: &CryptoKey,
    ) -> Result<Vec<u8>, KrbError> {
        let server_cipher = registry.cipher_for(service_key)?;
        let kdc_cipher = registry.cipher_for(krbtgt_key)?;

        let mut buffers = vec![
            (PAC_LOGON_INFO, self.logon_info.encode()?),
            (PAC_CLIENT_INFO, self.client_info.encode()?),
        ];
        if let Some(upn_dns_info) = &self.upn_dns_info {
            buffers.push((PAC_UPN_DNS_INFO, upn_dns_info.encode()?));
        }
        buffers.push((PAC_SERVER_CHECKSUM, empty_signature(server_cipher)?));
        buffers.push((PAC_PRIVSVR_CHECKSUM, empty_signature(kdc_cipher)?));

        let header_len = 8 + 16 * buffers.len();
        let mut offset = align_up(header_len, PAC_ALIGNMENT);
        let mut infos = Vec::with_capacity(buffers.len());
        for (ul_type, data) in &buffers {
            let size =
                u32::try_from(data.len()).map_err(|_| KrbError::PacInvalid("pac buffer size"))?;
            infos.push(PacInfoBuffer {
                ul_type: *ul_type,
                size,
                offset: offset as u64,
            });
            offset = align_up(offset + data.len(), PAC_ALIGNMENT);
        }

        let mut out = Cursor::new(Vec::with_capacity(offset));
        PacHeader {
            buffers: infos.clone(),
        }
        .write(&mut out)?;
        let mut out = out.into_inner();
        for (info, (_, data)) in infos.iter().zip(&buffers) {
            out.resize(info.offset as usize, 0);
            out.extend_from_slice(data);
        }
        out.resize(offset, 0);

        let server_range = signature_value_range(&infos, PAC_SERVER_CHECKSUM)?;
        let server_sig = server_cipher.checksum(
            service_key,
            key_usage::KERB_NON_KERB_CKSUM_SALT,
            &out,
        )?;
        out[server_range].copy_from_slice(&server_sig);

        let kdc_range = signature_value_range(&infos, PAC_PRIVSVR_CHECKSUM)?;
        let kdc_sig =
            kdc_cipher.checksum(krbtgt_key, key_usage::KERB_NON_KERB_CKSUM_SALT, &server_sig)?;
        out[kdc_range].copy_from_slice(&kdc_sig);

        debug!(
            buffers = infos.len(),
            len = out.len(),
            user = %self.client_info.name,
            "built pac"
        );
        Ok(out)
    }
}

fn signature_len(signature_type: i32) -> Option<usize> {
    match ChecksumType::try_from(signature_type).ok()? {
        ChecksumType::HMAC_SHA1_96_AES128 | ChecksumType::HMAC_SHA1_96_AES256 => Some(12),
        ChecksumType::HMAC_MD5 | ChecksumType::HMAC_SHA256_128_AES128 => Some(16),
        ChecksumType::HMAC_SHA384_192_AES256 => Some(24),
        _ => None,
    }
}

fn empty_signature(cipher: &dyn KerberosCipher) -> Result<Vec<u8>, KrbError> {
    let signature_type = i32::from(cipher.checksum_type());
    let len = signature_len(signature_type)
        .ok_or(KrbError::UnsupportedChecksum(signature_type))?;
    PacSignature {
        signature_type,
        signature: vec![0; len],
    }
    .encode()
}

fn signature_value_range(
    infos: &[PacInfoBuffer],
    ul_type: u32,
) -> Result<std::ops::Range<usize>, KrbError> {
    let info = infos
        .iter()
        .find(|info| info.ul_type == ul_type)
        .ok_or(KrbError::PacInvalid("missing signature buffer"))?;
    let start = info.offset as usize + 4;
    Ok(start..info.offset as usize + info.size as usize)
}

fn verify_signature(
    registry: &CryptoRegistry,
    key: &CryptoKey,
    signature: &PacSignature,
    data: &[u8],
) -> Result<(), KrbError> {
    let cipher = registry.cipher_for(key)?;
    if i32::from(cipher.checksum_type()) != signature.signature_type {
        error!(
            signature_type = signature.signature_type,
            key_etype = %key.etype(),
            "pac signature type does not match the key"
        );
        return Err(KrbError::PacSignatureInvalid);
    }
    cipher
        .verify_checksum(
            key,
            key_usage::KERB_NON_KERB_CKSUM_SALT,
            data,
            &signature.signature,
        )
        .map_err(|err| match err {
            KrbError::ChecksumMismatch => {
                trace!("pac signature mismatch");
                KrbError::PacSignatureInvalid
            }
            other => other,
        })
}

fn align_up(value: usize, to: usize) -> usize {
    value.div_ceil(to) * to
}

fn slice_at(data: &[u8], offset: u16, len: u16) -> Result<&[u8], KrbError> {
    let start = usize::from(offset);
    data.get(start..start + usize::from(len))
        .ok_or(KrbError::PacInvalid("upn dns info bounds"))
}

fn utf16_at(data: &[u8], offset: u16, len: u16) -> Result<String, KrbError> {
    let units: Vec<u16> = slice_at(data, offset, len)?
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    String::from_utf16(&units).map_err(|_| KrbError::PacInvalid("upn dns info utf16"))
}

fn utf16_bytes(value: &str) -> Vec<u8> {
    value.encode_utf16().flat_map(u16::to_le_bytes).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::{
        FileTime, GroupMembership, KerbValidationInfo, Pac, PacBuffer, PacBuilder, PacClientInfo,
        Sid, UpnDnsInfo, PAC_CLIENT_INFO, PAC_LOGON_INFO,
    };
    use crate::asn1::constants::EncryptionType;
    use crate::crypto::{CryptoKey, CryptoRegistry};
    use crate::error::KrbError;

    // A PAC issued by a Windows domain controller. Its signing keys are not known.
    pub(crate) const WINDOWS_PAC: &str = "040000000000000001000000b004000048000000000000000a00000012000000f804000000000000060000001400000010050000000000000700000014000000280500000000000001100800cccccccca00400000000000000000200d186660f656ac601ffffffffffffff7fffffffffffffff7f17d439fe784ac6011794a328424bc601175424977a81c60108000800040002002400240008000200120012000c0002000000000010000200000000001400020000000000180002005410000097792c00010200001a0000001c000200200000000000000000000000000000000000000016001800200002000a000c002400020028000200000000000000000010000000000000000000000000000000000000000000000000000000000000000d0000002c0002000000000000000000000000000400000000000000040000006c007a00680075001200000000000000120000004c0069007100690061006e00670028004c006100720072007900290020005a00680075000900000000000000090000006e0074006400730032002e0062006100740000000000000000000000000000000000000000000000000000000000000000000000000000001a00000061c433000700000009c32d00070000005eb4320007000000010200000700000097b92c00070000002bf1320007000000ce30330007000000a72e2e00070000002af132000700000098b92c000700000062c4330007000000940133000700000076c4330007000000aefe2d000700000032d22c00070000001608320007000000425b2e00070000005fb4320007000000ca9c35000700000085442d0007000000c2f0320007000000e9ea310007000000ed8e2e0007000000b6eb310007000000ab2e2e0007000000720e2e00070000000c000000000000000b0000004e0054004400450056002d00440043002d003000350000000600000000000000050000004e0054004400450056000000040000000104000000000005150000005951b81766725d2564633b0b0d0000003000020007000000340002000700002038000200070000203c000200070000204000020007000020440002000700002048000200070000204c000200070000205000020007000020540002000700002058000200070000205c00020007000020600002000700002005000000010500000000000515000000b9301b2eb7414c6c8c3b351501020000050000000105000000000005150000005951b81766725d2564633b0b74542f00050000000105000000000005150000005951b81766725d2564633b0be8383200050000000105000000000005150000005951b81766725d2564633b0bcd383200050000000105000000000005150000005951b81766725d2564633b0b5db43200050000000105000000000005150000005951b81766725d2564633b0b41163500050000000105000000000005150000005951b81766725d2564633b0be8ea3100050000000105000000000005150000005951b81766725d2564633b0bc1193200050000000105000000000005150000005951b81766725d2564633b0b29f13200050000000105000000000005150000005951b81766725d2564633b0b0f5f2e00050000000105000000000005150000005951b81766725d2564633b0b2f5b2e00050000000105000000000005150000005951b81766725d2564633b0bef8f3100050000000105000000000005150000005951b81766725d2564633b0b075f2e00000000000049d90e656ac60108006c007a006800750000000000000076ffffff41edce9a34815d3aef7bc98874805d250000000076fffffff7a534dab2c02986efe0fbe5110a4f3200000000";

    fn sample_builder() -> PacBuilder {
        let domain: Sid = "S-1-5-21-1004336348-1177238915-682003330".parse().expect("sid");
        let info = KerbValidationInfo {
            logon_time: FileTime(133_626_664_870_000_000),
            logoff_time: FileTime::NEVER,
            effective_name: "testuser".to_string(),
            user_id: 1105,
            primary_group_id: 513,
            group_ids: vec![GroupMembership::new(513), GroupMembership::new(1110)],
            logon_domain_name: "EXAMPLE".to_string(),
            logon_domain_id: Some(domain.clone()),
            ..Default::default()
        };
        let client = PacClientInfo {
            client_id: FileTime(133_626_664_870_000_000),
            name: "testuser".to_string(),
        };
        PacBuilder::new(info, client).upn_dns_info(
            UpnDnsInfo::new("testuser@example.com", "EXAMPLE.COM")
                .with_sam_name("testuser", domain.with_rid(1105)),
        )
    }

    #[test]
    fn parse_windows_pac() {
        let _ = tracing_subscriber::fmt::try_init();
        let data = hex::decode(WINDOWS_PAC).expect("hex");
        let pac = Pac::parse(&data).expect("pac");
        assert!(pac.failures().is_empty());
        assert_eq!(pac.buffers().count(), 4);

        let info = pac.logon_info().expect("logon info");
        assert_eq!(info.effective_name, "lzhu");
        assert_eq!(info.full_name, "Liqiang(Larry) Zhu");
        assert_eq!(info.logon_script, "ntds2.bat");
        assert_eq!(info.logon_count, 4180);
        assert_eq!(info.user_id, 2_914_711);
        assert_eq!(info.primary_group_id, 513);
        assert_eq!(info.group_ids.len(), 26);
        assert_eq!(info.group_ids[0].relative_id, 3_392_609);
        assert_eq!(info.logon_server, "NTDEV-DC-05");
        assert_eq!(info.logon_domain_name, "NTDEV");
        assert_eq!(info.logoff_time, FileTime::NEVER);
        assert_eq!(
            info.user_sid().expect("user sid").to_string(),
            "S-1-5-21-397955417-626881126-188441444-2914711"
        );
        assert_eq!(info.extra_sids.len(), 13);
        assert_eq!(
            info.extra_sids[0].sid.to_string(),
            "S-1-5-21-773533881-1816936887-355810188-513"
        );
        assert_eq!(info.group_sids().len(), 39);

        let client = pac.client_info().expect("client info");
        assert_eq!(client.name, "lzhu");
        assert_eq!(client.client_id, FileTime(0x01c6_6a65_0ed9_4900));

        let server = pac.server_signature().expect("server signature");
        assert_eq!(server.signature_type, -138);
        assert_eq!(server.signature.len(), 16);
        assert_eq!(pac.kdc_signature().expect("kdc signature").signature_type, -138);
    }

    #[test]
    fn corrupt_buffer_is_isolated() {
        let mut data = hex::decode(WINDOWS_PAC).expect("hex");
        // Break the NDR header of the logon info buffer.
        data[72] = 0x02;
        let pac = Pac::parse(&data).expect("pac");

        assert!(pac.logon_info().is_none());
        let failures = pac.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, PAC_LOGON_INFO);
        assert_eq!(pac.client_info().expect("client info").name, "lzhu");
    }

    #[test]
    fn broken_header_rejected() {
        let mut data = hex::decode(WINDOWS_PAC).expect("hex");
        data[4] = 1;
        assert!(matches!(Pac::parse(&data), Err(KrbError::PacInvalid(_))));
        assert!(Pac::parse(&[0xff, 0xff, 0xff, 0xff, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn out_of_range_buffer_recorded() {
        let mut data = hex::decode(WINDOWS_PAC).expect("hex");
        // Client info buffer size field.
        data[28..32].copy_from_slice(&0xffffu32.to_le_bytes());
        let pac = Pac::parse(&data).expect("pac");
        assert_eq!(pac.failures()[0].0, PAC_CLIENT_INFO);
        assert!(pac.logon_info().is_some());
    }

    #[test]
    fn build_and_verify_aes() {
        let registry = CryptoRegistry::default();
        let service_key = CryptoKey::new(EncryptionType::AES256_CTS_HMAC_SHA1_96, vec![0x41; 32]);
        let krbtgt_key = CryptoKey::new(EncryptionType::AES128_CTS_HMAC_SHA1_96, vec![0x42; 16]);

        let data = sample_builder()
            .build(&registry, &service_key, &krbtgt_key)
            .expect("build");
        assert_eq!(data.len() % 8, 0);

        let pac = Pac::parse(&data).expect("parse");
        assert!(pac.failures().is_empty());
        assert_eq!(pac.server_signature().expect("sig").signature_type, 16);
        assert_eq!(pac.kdc_signature().expect("sig").signature_type, 15);
        pac.verify_server_signature(&registry, &service_key)
            .expect("server signature");
        pac.verify_kdc_signature(&registry, &krbtgt_key)
            .expect("kdc signature");

        let upn = pac.upn_dns_info().expect("upn dns info");
        assert_eq!(upn.upn, "testuser@example.com");
        assert_eq!(upn.sam_name.as_deref(), Some("testuser"));
        assert_eq!(
            upn.sid.as_ref().map(Sid::to_string).as_deref(),
            Some("S-1-5-21-1004336348-1177238915-682003330-1105")
        );
        assert!(matches!(pac.buffers().next(), Some(PacBuffer::LogonInfo(_))));

        let other = CryptoKey::new(EncryptionType::AES256_CTS_HMAC_SHA1_96, vec![0x43; 32]);
        assert!(matches!(
            pac.verify_server_signature(&registry, &other),
            Err(KrbError::PacSignatureInvalid)
        ));
        // A key of a different type cannot check this signature.
        let rc4 = CryptoKey::new(EncryptionType::RC4_HMAC, vec![0x41; 16]);
        assert!(matches!(
            pac.verify_server_signature(&registry, &rc4),
            Err(KrbError::PacSignatureInvalid)
        ));
    }

    #[test]
    fn tampering_breaks_rc4_signature() {
        let registry = CryptoRegistry::default();
        let key = CryptoKey::new(EncryptionType::RC4_HMAC, vec![0x51; 16]);

        let mut data = sample_builder().build(&registry, &key, &key).expect("build");
        let pac = Pac::parse(&data).expect("parse");
        assert_eq!(pac.server_signature().expect("sig").signature.len(), 16);
        pac.verify_server_signature(&registry, &key).expect("valid");

        let name = "testuser".encode_utf16().flat_map(u16::to_le_bytes).collect::<Vec<_>>();
        let at = data
            .windows(name.len())
            .position(|w| w == name.as_slice())
            .expect("name present");
        data[at] = b'T';
        let pac = Pac::parse(&data).expect("parse");
        assert!(matches!(
            pac.verify_server_signature(&registry, &key),
            Err(KrbError::PacSignatureInvalid)
        ));
    }
}
