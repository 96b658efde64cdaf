use super::ndr::{NdrReader, NdrWriter, SidRecord};
use binrw::io::Cursor;
use binrw::{BinRead, BinWrite};
use crate::error::KrbError;
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::trace;

/// UserFlags bit set when `extra_sids` is populated.
pub const LOGON_EXTRA_SIDS: u32 = 0x0000_0020;
/// UserFlags bit set when resource groups are populated.
pub const LOGON_RESOURCE_GROUPS: u32 = 0x0000_0200;

/// SE_GROUP_MANDATORY | SE_GROUP_ENABLED_BY_DEFAULT | SE_GROUP_ENABLED
pub const SE_GROUP_DEFAULT: u32 = 0x0000_0007;

pub const USER_NORMAL_ACCOUNT: u32 = 0x0000_0010;
pub const USER_DONT_EXPIRE_PASSWORD: u32 = 0x0000_0200;

/// RID of the "Domain Users" group.
pub const RID_DOMAIN_USERS: u32 = 513;

// Seconds between 1601-01-01 and 1970-01-01.
const FILETIME_EPOCH_OFFSET: u64 = 11_644_473_600;
const FILETIME_TICKS_PER_SEC: u64 = 10_000_000;

/// A Windows FILETIME: 100ns intervals since 1601-01-01 UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FileTime(pub u64);

impl FileTime {
    pub const NOT_SET: FileTime = FileTime(0);
    pub const NEVER: FileTime = FileTime(0x7fff_ffff_ffff_ffff);

    pub fn from_system_time(time: SystemTime) -> Self {
        let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        let ticks = (since_epoch.as_secs() + FILETIME_EPOCH_OFFSET)
            .saturating_mul(FILETIME_TICKS_PER_SEC)
            .saturating_add(u64::from(since_epoch.subsec_nanos() / 100));
        FileTime(ticks)
    }

    /// `None` for the "not set" and "never" markers, and for times before the unix epoch.
    pub fn to_system_time(self) -> Option<SystemTime> {
        if self == Self::NOT_SET || self == Self::NEVER {
            return None;
        }
        let secs = (self.0 / FILETIME_TICKS_PER_SEC).checked_sub(FILETIME_EPOCH_OFFSET)?;
        let nanos = (self.0 % FILETIME_TICKS_PER_SEC) * 100;
        Some(UNIX_EPOCH + Duration::from_secs(secs) + Duration::from_nanos(nanos))
    }
}

/// A Windows security identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sid {
    pub revision: u8,
    pub identifier_authority: [u8; 6],
    pub sub_authorities: Vec<u32>,
}

impl Sid {
    pub fn new(authority: u64, sub_authorities: &[u32]) -> Self {
        let mut identifier_authority = [0u8; 6];
        identifier_authority.copy_from_slice(&authority.to_be_bytes()[2..]);
        Sid {
            revision: 1,
            identifier_authority,
            sub_authorities: sub_authorities.to_vec(),
        }
    }

    /// The SID of an account in this domain.
    pub fn with_rid(&self, rid: u32) -> Sid {
        let mut sid = self.clone();
        sid.sub_authorities.push(rid);
        sid
    }

    pub fn rid(&self) -> Option<u32> {
        self.sub_authorities.last().copied()
    }

    fn authority(&self) -> u64 {
        let mut bytes = [0u8; 8];
        bytes[2..].copy_from_slice(&self.identifier_authority);
        u64::from_be_bytes(bytes)
    }

    /// The self-relative binary form used outside NDR.
    pub fn to_bytes(&self) -> Result<Vec<u8>, KrbError> {
        let mut out = Cursor::new(Vec::with_capacity(8 + 4 * self.sub_authorities.len()));
        SidRecord::from_sid(self)?.write(&mut out)?;
        Ok(out.into_inner())
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, KrbError> {
        SidRecord::read(&mut Cursor::new(data))
            .map(SidRecord::into_sid)
            .map_err(|err| match err.root_cause() {
                binrw::Error::AssertFail { .. } => KrbError::PacInvalid("sid sub authority count"),
                _ => KrbError::PacInvalid("sid truncated"),
            })
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let authority = self.authority();
        if authority >= 1 << 32 {
            write!(f, "S-{}-0x{:012X}", self.revision, authority)?;
        } else {
            write!(f, "S-{}-{}", self.revision, authority)?;
        }
        for sub in &self.sub_authorities {
            write!(f, "-{sub}")?;
        }
        Ok(())
    }
}

impl FromStr for Sid {
    type Err = KrbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || KrbError::PacInvalid("sid string");
        let mut parts = s.strip_prefix("S-").ok_or_else(invalid)?.split('-');

        let revision = parts
            .next()
            .and_then(|r| r.parse::<u8>().ok())
            .ok_or_else(invalid)?;
        let authority = parts
            .next()
            .and_then(|a| match a.strip_prefix("0x") {
                Some(hex) => u64::from_str_radix(hex, 16).ok(),
                None => a.parse::<u64>().ok(),
            })
            .filter(|a| *a < 1 << 48)
            .ok_or_else(invalid)?;
        let sub_authorities = parts
            .map(|p| p.parse::<u32>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;
        if sub_authorities.len() > 15 {
            return Err(invalid());
        }

        let mut sid = Sid::new(authority, &sub_authorities);
        sid.revision = revision;
        Ok(sid)
    }
}

/// A group in the logon domain, by relative id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupMembership {
    pub relative_id: u32,
    pub attributes: u32,
}

impl GroupMembership {
    pub fn new(relative_id: u32) -> Self {
        GroupMembership {
            relative_id,
            attributes: SE_GROUP_DEFAULT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidAndAttributes {
    pub sid: Sid,
    pub attributes: u32,
}

/// KERB_VALIDATION_INFO, MS-PAC section 2.5. The logon information of the user the
/// ticket was issued to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KerbValidationInfo {
    pub logon_time: FileTime,
    pub logoff_time: FileTime,
    pub kick_off_time: FileTime,
    pub password_last_set: FileTime,
    pub password_can_change: FileTime,
    pub password_must_change: FileTime,
    pub effective_name: String,
    pub full_name: String,
    pub logon_script: String,
    pub profile_path: String,
    pub home_directory: String,
    pub home_directory_drive: String,
    pub logon_count: u16,
    pub bad_password_count: u16,
    pub user_id: u32,
    pub primary_group_id: u32,
    pub group_ids: Vec<GroupMembership>,
    pub user_flags: u32,
    pub user_session_key: [u8; 16],
    pub logon_server: String,
    pub logon_domain_name: String,
    pub logon_domain_id: Option<Sid>,
    pub user_account_control: u32,
    pub sub_auth_status: u32,
    pub last_successful_ilogon: FileTime,
    pub last_failed_ilogon: FileTime,
    pub failed_ilogon_count: u32,
    pub extra_sids: Vec<SidAndAttributes>,
    pub resource_group_domain_sid: Option<Sid>,
    pub resource_group_ids: Vec<GroupMembership>,
}

impl KerbValidationInfo {
    pub fn user_sid(&self) -> Option<Sid> {
        self.logon_domain_id
            .as_ref()
            .map(|domain| domain.with_rid(self.user_id))
    }

    pub fn primary_group_sid(&self) -> Option<Sid> {
        self.logon_domain_id
            .as_ref()
            .map(|domain| domain.with_rid(self.primary_group_id))
    }

    /// Every group the user is a member of: domain groups, extra SIDs, then resource
    /// groups.
    pub fn group_sids(&self) -> Vec<Sid> {
        let mut sids = Vec::new();
        if let Some(domain) = &self.logon_domain_id {
            sids.extend(self.group_ids.iter().map(|g| domain.with_rid(g.relative_id)));
        }
        sids.extend(self.extra_sids.iter().map(|e| e.sid.clone()));
        if let Some(domain) = &self.resource_group_domain_sid {
            sids.extend(
                self.resource_group_ids
                    .iter()
                    .map(|g| domain.with_rid(g.relative_id)),
            );
        }
        sids
    }

    pub fn decode(data: &[u8]) -> Result<Self, KrbError> {
        let mut r = NdrReader::new(data);
        r.type_serialization_header()?;
        if !r.pointer()? {
            return Err(KrbError::PacInvalid("null logon info"));
        }

        let logon_time = FileTime(r.filetime()?);
        let logoff_time = FileTime(r.filetime()?);
        let kick_off_time = FileTime(r.filetime()?);
        let password_last_set = FileTime(r.filetime()?);
        let password_can_change = FileTime(r.filetime()?);
        let password_must_change = FileTime(r.filetime()?);
        let effective_name = r.unicode_string_header()?;
        let full_name = r.unicode_string_header()?;
        let logon_script = r.unicode_string_header()?;
        let profile_path = r.unicode_string_header()?;
        let home_directory = r.unicode_string_header()?;
        let home_directory_drive = r.unicode_string_header()?;
        let logon_count = r.u16()?;
        let bad_password_count = r.u16()?;
        let user_id = r.u32()?;
        let primary_group_id = r.u32()?;
        let group_count = r.u32()?;
        let group_ids_present = r.pointer()?;
        let user_flags = r.u32()?;
        let user_session_key = r.array::<16>()?;
        let logon_server = r.unicode_string_header()?;
        let logon_domain_name = r.unicode_string_header()?;
        let logon_domain_id_present = r.pointer()?;
        let _reserved1 = (r.u32()?, r.u32()?);
        let user_account_control = r.u32()?;
        let sub_auth_status = r.u32()?;
        let last_successful_ilogon = FileTime(r.filetime()?);
        let last_failed_ilogon = FileTime(r.filetime()?);
        let failed_ilogon_count = r.u32()?;
        let _reserved3 = r.u32()?;
        let sid_count = r.u32()?;
        let extra_sids_present = r.pointer()?;
        let resource_domain_present = r.pointer()?;
        let resource_group_count = r.u32()?;
        let resource_groups_present = r.pointer()?;

        trace!(user_id, group_count, sid_count, "decoding logon info");

        let effective_name = r.unicode_string(&effective_name)?;
        let full_name = r.unicode_string(&full_name)?;
        let logon_script = r.unicode_string(&logon_script)?;
        let profile_path = r.unicode_string(&profile_path)?;
        let home_directory = r.unicode_string(&home_directory)?;
        let home_directory_drive = r.unicode_string(&home_directory_drive)?;
        let group_ids = if group_ids_present {
            read_groups(&mut r, group_count)?
        } else {
            Vec::new()
        };
        let logon_server = r.unicode_string(&logon_server)?;
        let logon_domain_name = r.unicode_string(&logon_domain_name)?;
        let logon_domain_id = if logon_domain_id_present {
            Some(r.sid()?)
        } else {
            None
        };
        let extra_sids = if extra_sids_present {
            read_extra_sids(&mut r, sid_count)?
        } else {
            Vec::new()
        };
        let resource_group_domain_sid = if resource_domain_present {
            Some(r.sid()?)
        } else {
            None
        };
        let resource_group_ids = if resource_groups_present {
            read_groups(&mut r, resource_group_count)?
        } else {
            Vec::new()
        };

        Ok(KerbValidationInfo {
            logon_time,
            logoff_time,
            kick_off_time,
            password_last_set,
            password_can_change,
            password_must_change,
            effective_name,
            full_name,
            logon_script,
            profile_path,
            home_directory,
            home_directory_drive,
            logon_count,
            bad_password_count,
            user_id,
            primary_group_id,
            group_ids,
            user_flags,
            user_session_key,
            logon_server,
            logon_domain_name,
            logon_domain_id,
            user_account_control,
            sub_auth_status,
            last_successful_ilogon,
            last_failed_ilogon,
            failed_ilogon_count,
            extra_sids,
            resource_group_domain_sid,
            resource_group_ids,
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, KrbError> {
        let mut w = NdrWriter::new();
        w.pointer(true)?;

        for time in [
            self.logon_time,
            self.logoff_time,
            self.kick_off_time,
            self.password_last_set,
            self.password_can_change,
            self.password_must_change,
        ] {
            w.filetime(time.0)?;
        }
        for s in [
            &self.effective_name,
            &self.full_name,
            &self.logon_script,
            &self.profile_path,
            &self.home_directory,
            &self.home_directory_drive,
        ] {
            w.unicode_string_header(s)?;
        }
        w.u16(self.logon_count)?;
        w.u16(self.bad_password_count)?;
        w.u32(self.user_id)?;
        w.u32(self.primary_group_id)?;
        w.u32(count(&self.group_ids)?)?;
        w.pointer(!self.group_ids.is_empty())?;
        w.u32(self.user_flags)?;
        w.bytes(&self.user_session_key)?;
        w.unicode_string_header(&self.logon_server)?;
        w.unicode_string_header(&self.logon_domain_name)?;
        w.pointer(self.logon_domain_id.is_some())?;
        w.u32(0)?;
        w.u32(0)?;
        w.u32(self.user_account_control)?;
        w.u32(self.sub_auth_status)?;
        w.filetime(self.last_successful_ilogon.0)?;
        w.filetime(self.last_failed_ilogon.0)?;
        w.u32(self.failed_ilogon_count)?;
        w.u32(0)?;
        w.u32(count(&self.extra_sids)?)?;
        w.pointer(!self.extra_sids.is_empty())?;
        w.pointer(self.resource_group_domain_sid.is_some())?;
        w.u32(count(&self.resource_group_ids)?)?;
        w.pointer(!self.resource_group_ids.is_empty())?;

        for s in [
            &self.effective_name,
            &self.full_name,
            &self.logon_script,
            &self.profile_path,
            &self.home_directory,
            &self.home_directory_drive,
        ] {
            w.unicode_string(s)?;
        }
        write_groups(&mut w, &self.group_ids)?;
        w.unicode_string(&self.logon_server)?;
        w.unicode_string(&self.logon_domain_name)?;
        if let Some(sid) = &self.logon_domain_id {
            w.sid(sid)?;
        }
        if !self.extra_sids.is_empty() {
            w.u32(count(&self.extra_sids)?)?;
            for extra in &self.extra_sids {
                w.pointer(true)?;
                w.u32(extra.attributes)?;
            }
            for extra in &self.extra_sids {
                w.sid(&extra.sid)?;
            }
        }
        if let Some(sid) = &self.resource_group_domain_sid {
            w.sid(sid)?;
        }
        write_groups(&mut w, &self.resource_group_ids)?;

        w.finish()
    }
}

fn count<T>(items: &[T]) -> Result<u32, KrbError> {
    u32::try_from(items.len()).map_err(|_| KrbError::PacInvalid("too many entries"))
}

fn read_groups(r: &mut NdrReader<'_>, expected: u32) -> Result<Vec<GroupMembership>, KrbError> {
    let n = r.conformant_count(8)?;
    if n != expected as usize {
        return Err(KrbError::PacInvalid("group count"));
    }
    (0..n)
        .map(|_| {
            Ok(GroupMembership {
                relative_id: r.u32()?,
                attributes: r.u32()?,
            })
        })
        .collect()
}

fn write_groups(w: &mut NdrWriter, groups: &[GroupMembership]) -> Result<(), KrbError> {
    if groups.is_empty() {
        return Ok(());
    }
    w.u32(count(groups)?)?;
    for group in groups {
        w.u32(group.relative_id)?;
        w.u32(group.attributes)?;
    }
    Ok(())
}

fn read_extra_sids(
    r: &mut NdrReader<'_>,
    expected: u32,
) -> Result<Vec<SidAndAttributes>, KrbError> {
    let n = r.conformant_count(8)?;
    if n != expected as usize {
        return Err(KrbError::PacInvalid("extra sid count"));
    }
    let mut slots = Vec::with_capacity(n);
    for _ in 0..n {
        let present = r.pointer()?;
        let attributes = r.u32()?;
        slots.push((present, attributes));
    }
    let mut out = Vec::with_capacity(n);
    for (present, attributes) in slots {
        if present {
            out.push(SidAndAttributes {
                sid: r.sid()?,
                attributes,
            });
        }
    }
    Ok(out)
}
