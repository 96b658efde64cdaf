use super::RealmService;
use crate::asn1::authorization_data::AuthorizationDataEntry;
use crate::asn1::constants::{
    AuthorizationDataType, EncryptionType, KrbErrorCode, KrbMessageType,
};
use crate::asn1::etype_info2::EtypeInfo2Entry;
use crate::asn1::ticket_flags::TicketFlags;
use crate::crypto::{CryptoKey, CryptoRegistry};
use crate::error::KrbError;
use crate::proto::{
    time_distance, AuthenticationRequest, FileTime, GroupMembership, KerbValidationInfo,
    KerberosReply, KerberosRequest, Name, PacBuilder, PacClientInfo, ServiceTicketBuilder, Sid,
    TicketGrantRequest, UpnDnsInfo, DEFAULT_CLOCK_SKEW, RID_DOMAIN_USERS,
    USER_DONT_EXPIRE_PASSWORD, USER_NORMAL_ACCOUNT,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, instrument, trace};

const DEFAULT_TGT_LIFETIME: Duration = Duration::from_secs(10 * 60 * 60);
const DEFAULT_SERVICE_LIFETIME: Duration = Duration::from_secs(8 * 60 * 60);

/// A user or service known to the realm.
#[derive(Debug, Clone)]
pub struct PrincipalEntry {
    pub name: Name,
    /// Long term keys, most preferred first.
    pub keys: Vec<CryptoKey>,
    /// Services are exempt from pre-authentication and carry no PAC.
    pub service: bool,
    pub rid: u32,
    pub groups: Vec<u32>,
}

impl PrincipalEntry {
    /// The first key whose etype the client offered, honouring the client's order.
    fn key_for(&self, etypes: &[i32]) -> Option<&CryptoKey> {
        etypes.iter().find_map(|etype| {
            self.keys
                .iter()
                .find(|key| i32::from(key.etype()) == *etype)
        })
    }
}

/// A realm served from memory: users with passwords or keys, services with keys, and a
/// krbtgt key. Tickets for users carry a PAC describing their domain groups.
#[derive(Debug)]
pub struct InMemoryRealm {
    realm: String,
    registry: CryptoRegistry,
    krbtgt_key: CryptoKey,
    domain_sid: Sid,
    // Keyed by the display form so that NT-PRINCIPAL and NT-SRV-HST spellings agree.
    principals: HashMap<String, PrincipalEntry>,
    tgt_lifetime: Duration,
    service_lifetime: Duration,
    clock_skew: Duration,
}

impl InMemoryRealm {
    pub fn new(realm: &str, krbtgt_key: CryptoKey, domain_sid: Sid) -> Self {
        InMemoryRealm {
            realm: realm.to_string(),
            registry: CryptoRegistry::default(),
            krbtgt_key,
            domain_sid,
            principals: HashMap::new(),
            tgt_lifetime: DEFAULT_TGT_LIFETIME,
            service_lifetime: DEFAULT_SERVICE_LIFETIME,
            clock_skew: DEFAULT_CLOCK_SKEW,
        }
    }

    pub fn with_registry(mut self, registry: CryptoRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_lifetimes(mut self, tgt_lifetime: Duration, service_lifetime: Duration) -> Self {
        self.tgt_lifetime = tgt_lifetime;
        self.service_lifetime = service_lifetime;
        self
    }

    pub fn with_clock_skew(mut self, clock_skew: Duration) -> Self {
        self.clock_skew = clock_skew;
        self
    }

    /// Add a user whose AES256 key is derived from `password` with the default salt.
    pub fn with_user(
        self,
        name: &str,
        password: &str,
        rid: u32,
        groups: &[u32],
    ) -> Result<Self, KrbError> {
        let principal = Name::principal(name, &self.realm);
        let salt = principal.default_salt();
        let key = self
            .registry
            .string_to_key(
                EncryptionType::AES256_CTS_HMAC_SHA1_96.into(),
                password,
                &salt,
                None,
            )?
            .with_kvno(1)
            .with_salt(salt);
        Ok(self.with_user_key(name, key, rid, groups))
    }

    pub fn with_user_key(self, name: &str, key: CryptoKey, rid: u32, groups: &[u32]) -> Self {
        let principal = Name::principal(name, &self.realm);
        self.with_principal(PrincipalEntry {
            name: principal,
            keys: vec![key],
            service: false,
            rid,
            groups: groups.to_vec(),
        })
    }

    pub fn with_service(self, service: &str, host: &str, key: CryptoKey) -> Self {
        let name = Name::service(service, host, &self.realm);
        self.with_principal(PrincipalEntry {
            name,
            keys: vec![key],
            service: true,
            rid: 0,
            groups: Vec::new(),
        })
    }

    pub fn with_principal(mut self, entry: PrincipalEntry) -> Self {
        self.principals.insert(entry.name.to_string(), entry);
        self
    }

    fn find(&self, name: &Name) -> Option<&PrincipalEntry> {
        self.principals.get(&name.to_string())
    }

    fn krbtgt(&self) -> Name {
        Name::service_krbtgt(&self.realm)
    }

    /// A random session key of the first etype the client offered that we support.
    fn session_key(&self, etypes: &[i32]) -> Result<CryptoKey, KrbError> {
        etypes
            .iter()
            .find_map(|etype| self.registry.key_derivation(*etype).ok())
            .map(|kdf| kdf.random_key())
            .ok_or_else(|| {
                error!(?etypes, "no supported session key etype offered");
                KrbError::UnsupportedEncryption(etypes.first().copied().unwrap_or_default())
            })
    }

    fn pac_for(
        &self,
        client: &PrincipalEntry,
        auth_time: SystemTime,
        service_key: &CryptoKey,
    ) -> Result<AuthorizationDataEntry, KrbError> {
        let name = client.name.components().join("/");
        let netbios_domain = self
            .realm
            .split('.')
            .next()
            .unwrap_or(&self.realm)
            .to_string();

        let mut group_ids = vec![GroupMembership::new(RID_DOMAIN_USERS)];
        group_ids.extend(
            client
                .groups
                .iter()
                .filter(|rid| **rid != RID_DOMAIN_USERS)
                .map(|rid| GroupMembership::new(*rid)),
        );

        let logon_info = KerbValidationInfo {
            logon_time: FileTime::from_system_time(auth_time),
            logoff_time: FileTime::NEVER,
            kick_off_time: FileTime::NEVER,
            password_must_change: FileTime::NEVER,
            effective_name: name.clone(),
            user_id: client.rid,
            primary_group_id: RID_DOMAIN_USERS,
            group_ids,
            logon_domain_name: netbios_domain,
            logon_domain_id: Some(self.domain_sid.clone()),
            user_account_control: USER_NORMAL_ACCOUNT | USER_DONT_EXPIRE_PASSWORD,
            ..Default::default()
        };
        let client_info = PacClientInfo {
            client_id: FileTime::from_system_time(auth_time),
            name: name.clone(),
        };
        let upn = format!("{}@{}", name, self.realm.to_ascii_lowercase());

        let pac = PacBuilder::new(logon_info, client_info)
            .upn_dns_info(
                UpnDnsInfo::new(&upn, &self.realm)
                    .with_sam_name(&name, self.domain_sid.with_rid(client.rid)),
            )
            .build(&self.registry, service_key, &self.krbtgt_key)?;

        AuthorizationDataEntry::if_relevant(&[AuthorizationDataEntry::new(
            AuthorizationDataType::AdWin2kPac,
            pac,
        )])
    }

    #[instrument(level = "info", skip_all, fields(client = %auth_req.client_name))]
    fn process_authentication(
        &self,
        auth_req: &AuthenticationRequest,
        stime: SystemTime,
    ) -> Result<KerberosReply, KrbError> {
        let krbtgt = self.krbtgt();

        if auth_req.etypes.is_empty() {
            return Ok(KerberosReply::error(
                KrbErrorCode::KdcErrEtypeNosupp,
                &krbtgt,
                "no encryption types offered",
                stime,
            ));
        }

        if !auth_req.service_name.is_service_krbtgt(&self.realm) {
            error!(service = %auth_req.service_name, "as-req not for krbtgt");
            return Ok(KerberosReply::error(
                KrbErrorCode::KdcErrSPrincipalUnknown,
                &krbtgt,
                "as-req must request the krbtgt",
                stime,
            ));
        }

        let Some(principal) = self.find(&auth_req.client_name) else {
            error!("client not found");
            return Err(KrbError::PrincipalUnknown);
        };

        let Some(client_key) = principal.key_for(&auth_req.etypes) else {
            error!(etypes = ?auth_req.etypes, "no client key matches the offered etypes");
            return Ok(KerberosReply::error(
                KrbErrorCode::KdcErrEtypeNosupp,
                &krbtgt,
                "no key for the offered encryption types",
                stime,
            ));
        };

        if !principal.service {
            if auth_req.enc_timestamp()?.is_none() {
                info!("ENC-TS Preauth not present, returning pre-auth parameters.");
                let etype_info2 = vec![EtypeInfo2Entry {
                    etype: client_key.etype().into(),
                    salt: Some(
                        client_key
                            .salt()
                            .map(str::to_string)
                            .unwrap_or_else(|| principal.name.default_salt()),
                    ),
                    s2kparams: None,
                }];
                return KerberosReply::preauth_required(
                    &krbtgt,
                    &principal.name,
                    etype_info2,
                    stime,
                );
            }

            let pa_timestamp = auth_req
                .decrypt_enc_timestamp(&self.registry, client_key)
                .map_err(|err| {
                    error!(?err, "unable to decrypt pa-enc-timestamp");
                    KrbError::PreauthFailed
                })?
                .ok_or(KrbError::PreauthFailed)?;

            let abs_offset = time_distance(pa_timestamp.patimestamp, stime);
            trace!(?abs_offset);
            if abs_offset > self.clock_skew {
                error!(?abs_offset, "clock skew");
                return Err(KrbError::ClockSkew);
            }
            trace!("PREAUTH SUCCESS");
        }

        let end_time = auth_req.until.min(stime + self.tgt_lifetime);
        if end_time <= stime {
            return Ok(KerberosReply::error(
                KrbErrorCode::KdcErrNeverValid,
                &krbtgt,
                "requested end time has passed",
                stime,
            ));
        }

        let mut flags = TicketFlags::Initial;
        if !principal.service {
            flags = flags | TicketFlags::PreAuthent;
        }

        let issued = ServiceTicketBuilder::new(principal.name.clone(), krbtgt, stime, end_time)
            .flags(flags)
            .session_key(self.session_key(&auth_req.etypes)?)
            .build(&self.registry, &self.krbtgt_key)?;

        debug!("issuing tgt");
        KerberosReply::issue(
            &self.registry,
            KrbMessageType::KrbAsRep,
            &issued,
            auth_req.nonce,
            client_key,
            None,
        )
    }

    #[instrument(level = "info", skip_all, fields(service = %tgs_req.service_name))]
    fn process_ticket_grant(
        &self,
        tgs_req: &TicketGrantRequest,
        stime: SystemTime,
    ) -> Result<KerberosReply, KrbError> {
        let verified = tgs_req.verify(&self.registry, &self.krbtgt_key, stime, self.clock_skew)?;
        trace!(client = %verified.client);

        let service_name = &tgs_req.service_name;
        let (service_key, is_krbtgt) = if service_name.is_service_krbtgt(&self.realm) {
            (&self.krbtgt_key, true)
        } else {
            let Some(service) = self.find(service_name) else {
                error!("service not found");
                return Ok(KerberosReply::error(
                    KrbErrorCode::KdcErrSPrincipalUnknown,
                    service_name,
                    "service principal unknown",
                    stime,
                ));
            };
            let Some(key) = service.keys.first() else {
                error!("service has no keys");
                return Err(KrbError::KeyNotFound {
                    etype: 0,
                    kvno: None,
                });
            };
            (key, false)
        };

        let end_time = tgs_req
            .until()
            .min(verified.tgt.endtime)
            .min(stime + self.service_lifetime);
        let auth_time = verified.tgt.authtime;

        let flags = if verified.tgt.flags.contains(TicketFlags::PreAuthent) {
            TicketFlags::PreAuthent
        } else {
            TicketFlags::none()
        };
        let mut builder = ServiceTicketBuilder::new(
            verified.client.clone(),
            service_name.clone(),
            auth_time,
            end_time,
        )
        .flags(flags)
        .session_key(self.session_key(tgs_req.etypes())?);

        if !is_krbtgt {
            match self.find(&verified.client) {
                Some(client) if !client.service => {
                    builder = builder.authorization_data(vec![self.pac_for(
                        client,
                        auth_time,
                        service_key,
                    )?]);
                }
                _ => debug!("client has no pac to issue"),
            }
        }

        let issued = builder.build(&self.registry, service_key)?;

        debug!(client = %verified.client, "issuing service ticket");
        KerberosReply::issue(
            &self.registry,
            KrbMessageType::KrbTgsRep,
            &issued,
            tgs_req.nonce(),
            &verified.session_key,
            None,
        )
    }
}

#[async_trait]
impl RealmService for InMemoryRealm {
    fn realm(&self) -> &str {
        &self.realm
    }

    async fn process(
        &self,
        request: &KerberosRequest,
        now: SystemTime,
    ) -> Result<KerberosReply, KrbError> {
        match request {
            KerberosRequest::AS(auth_req) => self.process_authentication(auth_req, now),
            KerberosRequest::TGS(tgs_req) => self.process_ticket_grant(tgs_req, now),
        }
    }
}
