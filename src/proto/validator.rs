use super::mechanism::{self, KerberosToken};
use super::{decrypt_ticket, time_distance, ApRepBuilder, ClaimsIdentity, ErrorReply, Name, Pac};
use super::DEFAULT_CLOCK_SKEW;
use crate::asn1::ap_options::ApOptions;
use crate::asn1::ap_rep::ApRep;
use crate::asn1::ap_req::ApReq;
use crate::asn1::authenticator::Authenticator;
use crate::asn1::authorization_data::find_authorization_data;
use crate::asn1::constants::{key_usage, AuthorizationDataType};
use crate::asn1::enc_ticket_part::EncTicketPart;
use crate::asn1::krb_error::KrbErrorMessage;
use crate::asn1::tagged_ticket::Ticket;
use crate::asn1::Asn1Entity;
use crate::crypto::{CryptoKey, CryptoRegistry};
use crate::error::KrbError;
use bitmask_enum::bitmask;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tracing::{debug, error, instrument, trace, warn};
use zeroize::Zeroizing;

/// Where the service's long term key comes from.
pub enum KeySource {
    /// Derive the key from the service password for whichever etype the ticket uses. With
    /// no salt the RFC 4120 default salt of the ticket's service name is used.
    Password {
        password: Zeroizing<String>,
        salt: Option<String>,
    },
    /// Pre-computed keys, as a keytab would hold them.
    Keys(Vec<CryptoKey>),
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::Password { salt, .. } => f
                .debug_struct("Password")
                .field("salt", salt)
                .finish_non_exhaustive(),
            KeySource::Keys(keys) => f.debug_tuple("Keys").field(&keys.len()).finish(),
        }
    }
}

impl KeySource {
    pub fn password(password: &str, salt: Option<&str>) -> Self {
        KeySource::Password {
            password: Zeroizing::new(password.to_string()),
            salt: salt.map(str::to_string),
        }
    }

    /// The key the ticket was encrypted with. A key is chosen by etype and kvno only;
    /// decryption is never attempted with more than one key.
    pub fn select(&self, registry: &CryptoRegistry, ticket: &Ticket) -> Result<CryptoKey, KrbError> {
        let etype = ticket.enc_part.etype;
        let kvno = ticket.enc_part.kvno;
        match self {
            KeySource::Password { password, salt } => {
                let salt = match salt {
                    Some(salt) => salt.clone(),
                    None => Name::from_principal_name(&ticket.sname, &ticket.realm)?.default_salt(),
                };
                trace!(etype, %salt, "deriving service key from password");
                registry.string_to_key(etype, password, &salt, None)
            }
            KeySource::Keys(keys) => keys
                .iter()
                .find(|key| {
                    i32::from(key.etype()) == etype
                        && match (kvno, key.kvno()) {
                            (Some(wanted), Some(have)) => wanted == have,
                            _ => true,
                        }
                })
                .cloned()
                .ok_or_else(|| {
                    error!(etype, ?kvno, "no service key for ticket");
                    KrbError::KeyNotFound { etype, kvno }
                }),
        }
    }
}

/// The checks applied to a decrypted AP-REQ.
#[bitmask(u32)]
pub enum ValidationActions {
    /// The authenticator names the ticket's client.
    ClientPrincipal = 1 << 0,
    /// The authenticator's realm is the ticket's client realm.
    Realm = 1 << 1,
    StartTime = 1 << 2,
    EndTime = 1 << 3,
    /// The authenticator was created within the clock skew of now.
    TokenWindow = 1 << 4,
    Replay = 1 << 5,
    /// A PAC must be present and its server signature must verify with the service key.
    PacSignature = 1 << 6,
}

impl ValidationActions {
    /// Every check apart from the PAC, which only Active Directory style KDCs provide.
    pub fn standard() -> Self {
        ValidationActions::ClientPrincipal
            | ValidationActions::Realm
            | ValidationActions::StartTime
            | ValidationActions::EndTime
            | ValidationActions::TokenWindow
            | ValidationActions::Replay
    }
}

/// The stages a token passes through on its way to a claims identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineState {
    Decoded,
    KeySelected,
    Decrypted,
    Validated,
    ValidationSkipped,
    ClaimsExtracted,
}

fn transition(state: PipelineState) {
    debug!(?state, "ap-req pipeline");
}

/// What identifies a single use of an authenticator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReplayEntry {
    pub client: Name,
    pub service: Name,
    pub ctime: SystemTime,
    pub cusec: u32,
}

pub trait ReplayCache: Send + Sync {
    /// Record `entry` until `expires`. Returns false if it had already been seen.
    fn check_and_insert(&self, entry: ReplayEntry, expires: SystemTime, now: SystemTime) -> bool;
}

#[derive(Debug, Default)]
pub struct InMemoryReplayCache {
    entries: Mutex<HashMap<ReplayEntry, SystemTime>>,
}

impl ReplayCache for InMemoryReplayCache {
    fn check_and_insert(&self, entry: ReplayEntry, expires: SystemTime, now: SystemTime) -> bool {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        entries.retain(|_, expiry| *expiry > now);
        if entries.contains_key(&entry) {
            return false;
        }
        entries.insert(entry, expires);
        true
    }
}

pub struct KerberosValidatorBuilder {
    key_source: KeySource,
    registry: Option<CryptoRegistry>,
    actions: ValidationActions,
    clock_skew: Duration,
    replay_cache: Option<Arc<dyn ReplayCache>>,
    skip_validation: bool,
}

impl KerberosValidatorBuilder {
    pub fn registry(mut self, registry: CryptoRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn actions(mut self, actions: ValidationActions) -> Self {
        self.actions = actions;
        self
    }

    pub fn clock_skew(mut self, clock_skew: Duration) -> Self {
        self.clock_skew = clock_skew;
        self
    }

    pub fn replay_cache(mut self, replay_cache: Arc<dyn ReplayCache>) -> Self {
        self.replay_cache = Some(replay_cache);
        self
    }

    /// Decrypt tokens without checking times, names, replays or the PAC. Only for
    /// inspecting captured traffic.
    pub fn dangerously_skip_validation(mut self) -> Self {
        self.skip_validation = true;
        self
    }

    pub fn build(self) -> KerberosValidator {
        KerberosValidator {
            key_source: self.key_source,
            registry: self.registry.unwrap_or_default(),
            actions: self.actions,
            clock_skew: self.clock_skew,
            replay_cache: self
                .replay_cache
                .unwrap_or_else(|| Arc::new(InMemoryReplayCache::default())),
            skip_validation: self.skip_validation,
        }
    }
}

/// Accepts AP-REQ tokens presented to a service and turns them into claims identities.
pub struct KerberosValidator {
    key_source: KeySource,
    registry: CryptoRegistry,
    actions: ValidationActions,
    clock_skew: Duration,
    replay_cache: Arc<dyn ReplayCache>,
    skip_validation: bool,
}

impl KerberosValidator {
    pub fn builder(key_source: KeySource) -> KerberosValidatorBuilder {
        KerberosValidatorBuilder {
            key_source,
            registry: None,
            actions: ValidationActions::standard(),
            clock_skew: DEFAULT_CLOCK_SKEW,
            replay_cache: None,
            skip_validation: false,
        }
    }

    pub fn validate(&self, token: &[u8]) -> Result<ClaimsIdentity, KrbError> {
        self.validate_at(token, SystemTime::now())
    }

    pub fn validate_at(&self, token: &[u8], now: SystemTime) -> Result<ClaimsIdentity, KrbError> {
        self.decrypt_at(token, now)?.claims()
    }

    pub fn decrypt(&self, token: &[u8]) -> Result<DecryptedApReq, KrbError> {
        self.decrypt_at(token, SystemTime::now())
    }

    /// Run the pipeline up to validation, treating `now` as the current time.
    #[instrument(level = "debug", skip_all)]
    pub fn decrypt_at(&self, token: &[u8], now: SystemTime) -> Result<DecryptedApReq, KrbError> {
        let ap_req = match mechanism::detect(token)? {
            KerberosToken::ApReq { message, framing } => {
                trace!(?framing, "kerberos token");
                ApReq::from_der(&message)?
            }
            KerberosToken::KrbError { message, .. } => {
                let reply = ErrorReply::from(KrbErrorMessage::from_der(&message)?);
                error!(%reply, "token is a kerberos error");
                return Err(reply.into_error());
            }
        };
        transition(PipelineState::Decoded);

        let service_key = self.key_source.select(&self.registry, &ap_req.ticket)?;
        transition(PipelineState::KeySelected);

        let ticket = decrypt_ticket(&self.registry, &ap_req.ticket, &service_key)?;
        let session_key = CryptoKey::from_encryption_key(&ticket.key)?;
        if ap_req.authenticator.etype != i32::from(session_key.etype()) {
            error!(
                authenticator_etype = ap_req.authenticator.etype,
                session_etype = %session_key.etype(),
                "authenticator is not encrypted with the session key type"
            );
            return Err(KrbError::KeyNotFound {
                etype: ap_req.authenticator.etype,
                kvno: None,
            });
        }
        let plaintext = self.registry.cipher_for(&session_key)?.decrypt(
            &session_key,
            key_usage::AP_REQ_AUTHENTICATOR,
            &ap_req.authenticator.cipher,
        )?;
        let authenticator = Authenticator::from_der(&plaintext)?;
        transition(PipelineState::Decrypted);

        let decrypted = DecryptedApReq {
            client: Name::from_principal_name(&ticket.cname, &ticket.crealm)?,
            service: Name::from_principal_name(&ap_req.ticket.sname, &ap_req.ticket.realm)?,
            ap_options: ap_req.ap_options,
            ticket,
            authenticator,
            session_key,
            state: PipelineState::Decrypted,
        };

        if self.skip_validation {
            warn!(client = %decrypted.client, "ap-req validation skipped");
            transition(PipelineState::ValidationSkipped);
            return Ok(DecryptedApReq {
                state: PipelineState::ValidationSkipped,
                ..decrypted
            });
        }

        self.check(&decrypted, &service_key, now)?;
        transition(PipelineState::Validated);
        debug!(client = %decrypted.client, service = %decrypted.service, "ap-req accepted");
        Ok(DecryptedApReq {
            state: PipelineState::Validated,
            ..decrypted
        })
    }

    fn check(
        &self,
        decrypted: &DecryptedApReq,
        service_key: &CryptoKey,
        now: SystemTime,
    ) -> Result<(), KrbError> {
        let ticket = &decrypted.ticket;
        let authenticator = &decrypted.authenticator;
        let skew = self.clock_skew;

        if self.actions.contains(ValidationActions::ClientPrincipal)
            && authenticator.cname != ticket.cname
        {
            error!(client = %decrypted.client, "authenticator client does not match ticket");
            return Err(KrbError::ClientPrincipalMismatch);
        }

        if self.actions.contains(ValidationActions::Realm) && authenticator.crealm != ticket.crealm {
            error!(
                ticket_realm = %ticket.crealm,
                authenticator_realm = %authenticator.crealm,
                "authenticator realm does not match ticket"
            );
            return Err(KrbError::RealmMismatch);
        }

        if self.actions.contains(ValidationActions::StartTime) {
            let start = ticket.starttime.unwrap_or(ticket.authtime);
            if start > now + skew {
                error!(?start, "ticket is not yet valid");
                return Err(KrbError::TicketNotYetValid);
            }
        }

        if self.actions.contains(ValidationActions::EndTime) && ticket.endtime + skew < now {
            error!(end = ?ticket.endtime, "ticket has expired");
            return Err(KrbError::TicketExpired);
        }

        if self.actions.contains(ValidationActions::TokenWindow)
            && time_distance(authenticator.ctime, now) > skew
        {
            error!(ctime = ?authenticator.ctime, "authenticator outside the clock skew");
            return Err(KrbError::ClockSkew);
        }

        if self.actions.contains(ValidationActions::Replay) {
            let entry = ReplayEntry {
                client: decrypted.client.clone(),
                service: decrypted.service.clone(),
                ctime: authenticator.ctime,
                cusec: authenticator.cusec,
            };
            if !self
                .replay_cache
                .check_and_insert(entry, authenticator.ctime + skew + skew, now)
            {
                error!(client = %decrypted.client, "authenticator replayed");
                return Err(KrbError::ReplayDetected);
            }
        }

        if self.actions.contains(ValidationActions::PacSignature) {
            let pac = decrypted.pac()?.ok_or_else(|| {
                error!("ticket carries no pac");
                KrbError::PacMissing
            })?;
            pac.verify_server_signature(&self.registry, service_key)?;
        }

        Ok(())
    }
}

/// A successfully decrypted AP-REQ.
#[derive(Debug)]
pub struct DecryptedApReq {
    client: Name,
    service: Name,
    ap_options: ApOptions,
    ticket: EncTicketPart,
    authenticator: Authenticator,
    session_key: CryptoKey,
    state: PipelineState,
}

impl DecryptedApReq {
    pub fn client(&self) -> &Name {
        &self.client
    }

    pub fn service(&self) -> &Name {
        &self.service
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn ticket(&self) -> &EncTicketPart {
        &self.ticket
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    pub fn session_key(&self) -> &CryptoKey {
        &self.session_key
    }

    /// The key to protect further messages with: the authenticator subkey if the client
    /// offered one, else the ticket session key.
    pub fn context_key(&self) -> Result<CryptoKey, KrbError> {
        match &self.authenticator.subkey {
            Some(subkey) => CryptoKey::from_encryption_key(subkey),
            None => Ok(self.session_key.clone()),
        }
    }

    pub fn mutual_required(&self) -> bool {
        self.ap_options.contains(ApOptions::MutualRequired)
    }

    /// The AP-REP proving to the client that the service could read its ticket.
    pub fn ap_rep(&self, registry: &CryptoRegistry) -> Result<ApRep, KrbError> {
        let mut builder = ApRepBuilder::new(self.authenticator.ctime, self.authenticator.cusec);
        if let Some(seq_number) = self.authenticator.seq_number {
            builder = builder.seq_number(seq_number);
        }
        builder.build(registry, &self.session_key)
    }

    /// The PAC in the ticket's authorization data, if the KDC included one.
    pub fn pac(&self) -> Result<Option<Pac>, KrbError> {
        let Some(entries) = self.ticket.authorization_data.as_deref() else {
            return Ok(None);
        };
        find_authorization_data(entries, AuthorizationDataType::AdWin2kPac)?
            .map(|data| Pac::parse(&data))
            .transpose()
    }

    pub fn claims(&self) -> Result<ClaimsIdentity, KrbError> {
        let pac = self.pac()?;
        let identity = ClaimsIdentity::from_kerberos(&self.client, pac.as_ref());
        transition(PipelineState::ClaimsExtracted);
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        InMemoryReplayCache, KerberosValidator, KeySource, PipelineState, ReplayCache,
        ReplayEntry, ValidationActions,
    };
    use crate::asn1::authorization_data::AuthorizationDataEntry;
    use crate::asn1::constants::{AuthorizationDataType, EncryptionType, KrbErrorCode};
    use crate::asn1::gssapi::{NegTokenInit, NegotiationToken, OID_KRB5, OID_MS_KRB5};
    use crate::asn1::ticket_flags::TicketFlags;
    use crate::asn1::Asn1Entity;
    use crate::crypto::{CryptoKey, CryptoRegistry};
    use crate::error::KrbError;
    use crate::proto::{
        claim_types, ApRepBuilder, ApReqBuilder, ErrorReply, FileTime, GroupMembership,
        KerbValidationInfo, Name, PacBuilder, PacClientInfo, ServiceTicketBuilder, Sid,
        UpnDnsInfo,
    };
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    const SERVICE_PASSWORD: &str = "P@ssw0rd!";

    fn now() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_718_192_887)
    }

    fn client() -> Name {
        Name::principal("testuser", "EXAMPLE.COM")
    }

    fn service() -> Name {
        Name::service("HTTP", "web.example.com", "EXAMPLE.COM")
    }

    fn service_key(etype: EncryptionType) -> CryptoKey {
        CryptoRegistry::default()
            .string_to_key(
                etype.into(),
                SERVICE_PASSWORD,
                &service().default_salt(),
                None,
            )
            .expect("service key")
    }

    fn pac(registry: &CryptoRegistry, service_key: &CryptoKey) -> Vec<u8> {
        let domain: Sid = "S-1-5-21-1004336348-1177238915-682003330".parse().expect("sid");
        let info = KerbValidationInfo {
            logon_time: FileTime::from_system_time(now()),
            logoff_time: FileTime::NEVER,
            effective_name: "testuser".to_string(),
            user_id: 1105,
            primary_group_id: 513,
            group_ids: vec![GroupMembership::new(513), GroupMembership::new(1110)],
            logon_domain_name: "EXAMPLE".to_string(),
            logon_domain_id: Some(domain.clone()),
            ..Default::default()
        };
        let client_info = PacClientInfo {
            client_id: FileTime::from_system_time(now()),
            name: "testuser".to_string(),
        };
        let krbtgt_key = CryptoKey::new(EncryptionType::AES256_CTS_HMAC_SHA1_96, vec![0x5a; 32]);
        PacBuilder::new(info, client_info)
            .upn_dns_info(
                UpnDnsInfo::new("testuser@example.com", "EXAMPLE.COM")
                    .with_sam_name("testuser", domain.with_rid(1105)),
            )
            .build(registry, service_key, &krbtgt_key)
            .expect("pac")
    }

    /// An AP-REQ for HTTP/web.example.com under a key of `etype`, optionally wrapped in
    /// GSS-API and SPNEGO framing.
    fn token(etype: EncryptionType, spnego: bool, with_pac: bool) -> Vec<u8> {
        let registry = CryptoRegistry::default();
        let key = service_key(etype);

        let mut builder = ServiceTicketBuilder::new(
            client(),
            service(),
            now(),
            now() + Duration::from_secs(36_000),
        )
        .flags(TicketFlags::PreAuthent);
        if with_pac {
            let pac_entry =
                AuthorizationDataEntry::new(AuthorizationDataType::AdWin2kPac, pac(&registry, &key));
            builder = builder.authorization_data(vec![
                AuthorizationDataEntry::if_relevant(&[pac_entry]).expect("if relevant")
            ]);
        }
        let issued = builder.build(&registry, &key).expect("ticket");

        let ap_req = ApReqBuilder::new(client(), issued.ticket, issued.session_key)
            .ctime(now() + Duration::from_micros(1_250))
            .mutual_required();
        if spnego {
            let gss = ap_req.build_gss(&registry).expect("gss");
            NegotiationToken::Init(NegTokenInit {
                mech_types: vec![OID_MS_KRB5, OID_KRB5],
                mech_token: Some(gss),
                mech_list_mic: None,
            })
            .to_der()
            .expect("spnego")
        } else {
            ap_req.build(&registry).expect("ap-req").to_der().expect("encode")
        }
    }

    fn check_claims(etype: EncryptionType, spnego: bool) {
        let _ = tracing_subscriber::fmt::try_init();
        let validator = KerberosValidator::builder(KeySource::password(SERVICE_PASSWORD, None))
            .actions(ValidationActions::standard() | ValidationActions::PacSignature)
            .build();
        let identity = validator
            .validate_at(&token(etype, spnego, true), now())
            .expect("validate");

        let mut types: Vec<&str> = identity
            .claims()
            .iter()
            .map(|c| c.claim_type.as_str())
            .collect();
        types.sort_unstable();
        types.dedup();
        let mut expected = vec![
            claim_types::NAME,
            claim_types::UPN,
            claim_types::PRIMARY_SID,
            claim_types::PRIMARY_GROUP_SID,
            claim_types::GROUP_SID,
            claim_types::WINDOWS_ACCOUNT_NAME,
        ];
        expected.sort_unstable();
        assert_eq!(types, expected);

        assert_eq!(identity.name(), "testuser@EXAMPLE.COM");
        assert_eq!(identity.find(claim_types::UPN), Some("testuser@example.com"));
        assert_eq!(
            identity.find(claim_types::PRIMARY_SID),
            Some("S-1-5-21-1004336348-1177238915-682003330-1105")
        );
        assert_eq!(identity.find(claim_types::WINDOWS_ACCOUNT_NAME), Some("EXAMPLE\\testuser"));
        assert_eq!(identity.find_all(claim_types::GROUP_SID).count(), 2);
        assert!(identity.failed_records().is_empty());
    }

    #[test]
    fn rc4_raw() {
        check_claims(EncryptionType::RC4_HMAC, false);
    }

    #[test]
    fn rc4_spnego() {
        check_claims(EncryptionType::RC4_HMAC, true);
    }

    #[test]
    fn aes128_raw() {
        check_claims(EncryptionType::AES128_CTS_HMAC_SHA1_96, false);
    }

    #[test]
    fn aes128_spnego() {
        check_claims(EncryptionType::AES128_CTS_HMAC_SHA1_96, true);
    }

    #[test]
    fn aes256_raw() {
        check_claims(EncryptionType::AES256_CTS_HMAC_SHA1_96, false);
    }

    #[test]
    fn aes256_spnego() {
        check_claims(EncryptionType::AES256_CTS_HMAC_SHA1_96, true);
    }

    // AP-REQs from lzhu@EXAMPLE.COM to HTTP/web.example.com (kvno 2) built with MIT krb5
    // 1.20: the service keys come from krb5_c_string_to_key over SERVICE_PASSWORD, the
    // ticket and authenticator from krb5_c_encrypt, and the PAC from krb5_pac_sign over the
    // Windows LOGON_INFO sample with a krbtgt key of 0x5a repeated.
    const MIT_RC4_KEY: &str = "217e50203a5aba59cefa863c724bf61b";
    const MIT_RC4_AP_REQ: &str = "6e8206f3308206efa003020105a10302010ea20703050020000000a382066f6182066b30820667a003020105a10d1b0b4558414d504c452e434f4da2223020a003020103a11930171b04485454501b0f7765622e6578616d706c652e636f6da382062b30820627a003020117a103020102a2820619048206156ec8315691593fcfa0aad68c1d5327935439c11df780f5d9cdf75727d50d2f60a9bb6d5b8ccbf877012056b96a4457c2e6d15f07dca4760836333d757c2034352ef48707ee57968344bd8b93f7108cc58ab4e573b126d4ad23149e82b254efad2a4d1d81f93dca9691b8ae96b04148673fe961263e6d8b99547d3db7650a69680d537ef1e2c62bf52d0f3bec11d43de88f18aa4c473029bed4d596f4335b7af3ecef36d6f81cbadcef7cba50b63da305cf00b1fcc7eb55af4f8caa4661d83d585e2b0e180f42077056912d605a3259dd3e041637954b3724c6a360f811d6fbeca2e3c4df3f9b99b41d09aeb7b0681df71b9788013d3c1b70c97b8d1f046061188ccd3509f7859f85662a605a983a08d263569b1b693f5170d53a7c1643aadcf3382c05c0ed04a6c39d8199032d5b963534b62f2c2879db55ca190edbff0e4af4a2128144addee8c8f6aa890d85ce99b6d54f993697828684412b372bd89de1585a92ae33d9fe671378c833d86f55df0d50a1886ff7cc98413f7eb8bc4f0bf53362a338d1b0eec8ed50f43a70018575e2dfca204ebf2bc5cf28c958ec6ad879fb9b3704b7f501e04ceeeb0f07d5ba676131a4a08fcdc919903f047877573b81217c6161cd4317243e928487114b97302c0ed23b89c8e3d30ed17b42136cf8c2afddb908756a61fcdfafc7788dad5a459155034612191cf33ee70c31ec022697456164a388117157c13acf47b6289733a3197d8b16bcc39b68172e2b0ecd9c2c6e4d75f04c12bd0a446726070f9676c0090ddc26b3e1adb74187ec29c161d55aecb0fa3832fb2c9c3706c7dbdb895c27fc6d7cbec9531acd83a179af6f1682c5156b908be6c281820120c1e5765a9a3304ef6d93076dda1a27c89a3c6f37fc8dab7d2813e49434ceeae8dd6b8a9849e50e4975b3f092e23bd9df6142d667394abb8abc157f78511b4ee16b8d682737efed71607674023e596c618f44f50858e25b9a4cbaef81f8917db913f763335e6ef6bb7e513a33340d1dc59ee4db1ef6f430e48bcab47093b8ce0e44d40770484f7057bd596781bcefc54037c636a899deacbb50edcc2272414d253e985bd50e289d450d72189d8b73acf0e938c3141bc9110da02d370f365d7b3c576773179173fc49cc09d70bc177f930b476c62e29246ba7fc6542cd09655cb7de9f9756827a7858460a6b59b1ae3b2afb41b16060f91b9bdbb5090babceeb2404caa523b1b03f3557cfd826f898aee05a575db821b9405d5172a61ff54d635fdd26606f73f5fad03a4c948bfa055b7ff1330b88196fc5a2b231d72f51a38fb9cabf24ac325d455da522c36c31b3674dd594ce4a6b8557e2713bf14e86c6e7f76d323341e71a4613c752bb6443402da97bb47349085b71a0d87b064dd73837cfe440f0371e48fd9315a9034129e66faae4d4b7d477af01c0dddea91a926512374f953729b8d8427f7c97a23c819160d316cfdfad71e4fe159b59a4cbf175aa1d09e67cdfe47584a97281986d94311d7708290f6517472eae39b01a928a5c101eabaf8b4d4e004564b6de07be67ba44a9c39256922166e9b39c1a2b4854956209c4ae3b7de9c0d002a5f9becbc571b81354c4616f6a795d4ab9d4859e04e076ab61c8730c592ac730d26514823364479ea339f0a2ff16c0f555dc49099d32d17f6e90c076d442a9b72662f94d8b15eef72eeb38af40055ce4c10d932298f909e6ffd9f36ae2314a1c5b99a6e43be780062b2e01b02749bd0b2845c1dc7baa16aa28d4bd728ca0178551eedb54c34d9bb7462472a8f07f6f8e0310c3f7d25d20897b06ecf12a8326b6e9a26d72f35aa38b3995a62f5aea47b59b0df7d068545b0cbf1c29972b3b85e6ece8ddcd771c8eef7a7bc21d3175482dd6864b3cbd07d441730d4df7394639db9e5adb4295842c1fa3d6d7ec69ec4734fa846ab27b101d7b255d1d8f73f929a2e8cdfd5d0aac697a81ddfd0c02238a29233c665162c0db4d127931ed42f91ca87ebdb058c67bb66cfaea4a3ab6b78142f6e29fe78d4ab7c10c4068363f9ed0fbd313e00d502df6a02325c6d64f7e0da06a5b5a68aecab28e21a4fd25113f72f8e2a69c59a6adfad0d65af802289b0bb08465c42f8e6d8f04b0c2200a5b8b8f1751b7f3a048d2ccf46dc27424739443b0ddd6f5600772983c62706e68866abaed44c5c903a4673065a003020117a25e045c76fa7fe6c6dce48f74f04bc414c918532c51d485a362de067a0416e8b26613f68358e8111fc3cab9e96ee775003473bb691e5e4634ad1bd63b687439609a8e8a8d0b18af01952390bf90517941da18a753790f0d1c3199755937efd3";
    const MIT_AES128_KEY: &str = "e5aa87f206464b87d3240e5fc05fd277";
    const MIT_AES128_AP_REQ: &str = "6e8206f3308206efa003020105a10302010ea20703050020000000a382066b6182066730820663a003020105a10d1b0b4558414d504c452e434f4da2223020a003020103a11930171b04485454501b0f7765622e6578616d706c652e636f6da382062730820623a003020111a103020102a282061504820611eb6be133fec3d61782a9082ad481b75f8d22a2139fc57aced742faa207805458ed4e2366ea46790c0921a24dd8f9f0cffd57559514506455d05dbd7050a725a4b1daa17f2685076e9d516bb692f0d567cff365fc573650ac5954960f3d2a9e0cdd545f519c58bbbb6d491d5d2e84883c5a34a35655ae7d2d31741c73ac189ca46fd536063efaa4512324d0c0ec88a9a1fb1673f03fecf2ffba4591561a1499b118f44cd0a4dcad73ab5b6e9d28963d9794b77574098ce33503524fd04dd4f27623b4f30e5303c09e60619d556f91b126006cb6bb24d502d54030e08681469177948c1a93660859e69b02938c8e3d26f6055c61b4a11027f1fb5852b92089665e43d1e5ce454d89058e0cc8ef479645f02e89feadc9a387cfaa16c604cc383a3c6713029bef81a768c750aa829d44a7e2f9dd5a34daa6be42a7d2d849612f3945bcd1dbfd81c63c6db738128059217ccb4ba368dec90ca92b6869f531ae77ba7766ef1ea574405637e2f49a24ebb40d0be8b7698e9426095bafba3f332190b5c5277dc7addfa07692f7a135a75de9c4736d5b4730bb77284523f812b4c2a5966fcfeebc0ecf2ad0f8e07b53fcb306514bf1b18ee7a1f62a9cdab4048001cdad9213da2d764dc7875d64647cebf5b04d4f951239e94ff6bc7e97eedf591ae8bb040578d40ecb44ed403bb135b7483b30e717eb5a2174347199f5d3edb865574962cfcbb14473d222d03bd6407d6d90373b522dab4a432d2f1c6a532a953e4aa835443c4bd2c31ccdbbc6bd92a951c4b3bae544899c6c930597609ae57a099a65ba288335d6d38fb127d69088aa4395d8ac9e8d060ea2cdce1854316585c77faec88d9948a82d5cfc6578a8fbe9e11d3333652c13697dfb06ce713b1adb1dc11aa6426654b4e8a362df2390e8e5f0af883af625bbd379013d45a8473d92b46fec2167e0e58b54790a160ac312596502c887af873e9c1352c86db6856a0f4b867a4718cd9bdf11e6191d284dded3436ac984ed9f0978c7230888b3f44c4a66bc96bcf7f2b2d679490f3f8033bfc374290af4bc8204f5bb91f1049a4913751dc3da3853e9493032fea2597614d94d028c6c1243118e6cb749b7b4b33efa9f002c37bedc1a479c2296b72d14e8bb2a208bd76916e26d056cab536646d0a8ebbd83217d75540b3542e600ad875549a7c57bc8368e4a57b37f12876c5e2b11efef9e612deb2986203b48b31fe9da555077bd582b18560e6b57af5d73c54f820915187ede7c60b8e479ca5909450411e4760153c8657b7fd729fe857657f2435b28f543d537b76e4fe21224e3ac42787e61c3e634a153d54e5134bed4c43aff482d80f51f74fa72112e7e2591d7b3c58d750de1e65c0d7efb2a56dc6f04a9909d02d10b4c45969c114c03dc76b56e13d677b16f596d2ce4b25e433da8ee5bae15ca01f8f4e9815362d28279a4f349068b29a12dbfebd66d687db9c22a938ec930b63f1351c709220ff2316543f6cba4ef1b4db0b2af19c6a0646649375cc07ca8e476b52ade339afa69ecbe0398e9db6f2d4bcaa80a0a64993b5a6e5ab8fe5d23af69e84e94647c1ae0a6ec3a93795207568a7ac3ed4351babdab6f02246c34e020e493a65b172df95eb1a9eae0bac196802ea3c6508acfb85ccea0414a2488db4a02dc9b6d2d74a1413da8d8b5241c1c9ed9f98a47b9e928a1742a68e8f075a2f5a2d6793990c8f8b6c71b74bddaba86114078f3018dd65d5662102ec4e000469da22d86747b13502c29079647ff29dd7cfcfad2c58df8801518218c738953727c1a1820d8846a5b5b674a2c8a9153a2ec63ed6060af5d02f99bc72527938378dd2522fd496087440bb6665c94b44593cbe4e416ee0551876bda991b6e0f717e2186e79d27723e640fae5968c271c0589cd8a0f303bad572a78e8c70b14abed13f4f293f162ebf9ec7ea2091f4af77dbe9faedf2a261e0db0b776e9db9270846ebb78dfd462c74386d7b21508fc9bcbaaeee265179c68ad4a90eba1e4095c9b65c43d9ff680d120f6ab7fd213e34da806e2877de6005ea11b5308101a02f6492f3b71ba4afdb528665ef0e205488eba9f5d531da2aebdedbeacc5c4fe9374d8d2876ca8b8783d217bb5d9aaf39d8a6ac01ab61832880cf418e73fe79bdeafc3421527d5561e871490af9ee15989d1051b255b2a896a46b3069a003020111a26204605e75ca2fd3de1d631aa622227993932ac15c0028f5af0ec7e811d45f4a954abc55a2b17e707fe79040d5f5cc0c0b2f171509b3b2d88f5dcbdc228bcd36fa2f4e57aff95d8a2b3b12771224ab2f96e7b08c1b91749f9379f956dc932308078b10";
    const MIT_AES256_KEY: &str = "5d3ea251f919b6ecc689f67499daf63e9e45e6a528c030be2b4f35c8d514ddbd";
    const MIT_AES256_AP_REQ: &str = "6e820703308206ffa003020105a10302010ea20703050020000000a382067b6182067730820673a003020105a10d1b0b4558414d504c452e434f4da2223020a003020103a11930171b04485454501b0f7765622e6578616d706c652e636f6da382063730820633a003020112a103020102a282062504820621a7027dd785a9b794b90f1b2b0561ccf74d936f66378b83c55d9302ea05a18d4c9f43cdcd3fba12be6e36a3801494f955082cd20247d7900606347b15e9181e594be3ebc6687fa711a5581deb8121242fcbae20b05bdc07bcea8c7f2380a63803e0711720a5a6a35ba939e9f2d2c007d4de0952dfce09134ea7401fbb2df646de8e9dead7375642b526a079254600930d2578c02d5ffb9f10ba23406bc076b64b173286f27369fa75df27f79dedb5a512794498ba59a268d51737215e0537819e14be2081b741e75b131e2c05420dddfdddb9c98bd550b60125d6b618fa6c6b6c614c54f80f92898f05836057afeba3f8099a036f7809e3c9de74259e2a17039c058cf1ffba5676cb6ed0fbc5fac944840c67b3d9660872a8a58ae238679606f2bd8404bc4aa4d7be7d378204c3493aae6eb50ddf2ddeea35230a95e74796198168a2eff3f1e96a2d1806fbe535c2a879fc83b79ab05440ebf783a7cfcc44df6b956b90174d518c22483df2c7cf938f1d01ed7bbe9738345aae1c726e6c3a627871c1cf614581334259ee4e71616ec718b618690b54809fe6fba16312ea5dd4ef9b77c9340f54e7b013421c69cfe5276db45904ced0336cca0a3592f93920098c69dc4820c1ffc1ea5309c3223281ac34d9f0c30939f80375364de6412802161f9a6507da0a7e193caac877b647dac6ac1eb06b00d6bc3c88c2b57058bc2b61510b5a695208dcaaa4b5ceb6fa342be1d67a0e09faa829e3239b0ab5ac0d7636bb5dc944e71ae0204e978ef06c9862198411691b9fd947e98289fa68bf3c6bfc40010227dba7f0066290d88ce5f617e9086e714eec8d00144500c301299d326b025912f8e278655259a516cfc5cba1aaa14f1b926b5d326528d19c0fa4099d68f294d640275c5d59b2e6caa95c5720bef0c32576be2e715a213ff2baa1e64aab5b8f64dad54fcb379db03e2c16226f42062a6145872d1a82fb3c81e6c7ff00d45326304f33dd9bfdd869948b51d99708414ba9e4a9fb33305bde0329155d21c527ab0c488e4e0d9c955a469e2bc90bb3efa9f80d187e3a9c0ed83d1f7acfe7e02b25a34d796fbaec67bc63c64d4989b0d1c11d557372c9f787a3e922ab54cc7b945d73cfa2b62bc2103cfb66d7fa9ac64b45d0c64807e1f99f777e386f267ad6145100310f18cc01138a3bc9cb2b3c16908a2cab171898ae7f9719d0928c3e18651aef911d401f44fb1dd0410ffb5936ac01e52572fa83387a8ba4ff9a19d64fe1e7992932e51b9510b4255aa565e85df653e4d0e41f216e25b6ab451bde39b21a4fc94d7bf264b192fb165df625b11c4ed1dd54d57779be2a0c4a4244c0367fef8f47c375a5a15a47472ca88e1ea7587da08fabab645148f45edc969d0acc6f28974ba13c2f91496ed9dda513a5b8bd9145c17d2d09cf862e6a00f2c4ddb54b15da97c8dd965e1202ef46d6ee27d2dcb65989f00c2a11dea7c922507ef0ea8c15397a6c48e0e73a37ecaa3fe865ae614dddcca1d586e6f870df93273f3b669fb351b3ef7da5c2834b62df316c5feb3b76edd52196c036bb9127aaeee7238af80efac70324525ae7552d6278a71ac26f05f34de54fec175868189a48719d283bd90cfb4b35c01b45249f3e9120185a99109e40282f8609c3322414c7defdfceb7f07fed95eaa792905f5089bde1f16f0428176db7b5630202efef85c8c1653d12c1bc2d915229fef007f11783de02cc7031f21c5800b64449d01acc358603dea21ec5674cf096ca0ad69fd990596117fab18f5ddbcd56efed7c76cde8df6573da0b2e7854c10fe8ed4c379d7dc84c7568d154620069ad033a72363d84b1f7b3f2ae527d5af485e4e15862b3804a7eda1587948cfaf44762874f302c3252b26f2343688111e4da77a42b67b048175b47b389b602fa18974081044af84ee58dde74f425d8d6e76f5111ab1008b17281e60a8b42d61f50614dae7433ca4b96ecd477df10f1f25af5bdcda86ab49e29d60c00f2142eed8ba27c63f42efdb2f5c3adeebdffc005ea18bada7c13b906dd28f034adcfbfae58d8ef3a8fba1fb2290bfe458024161323baf01b5c1688fce977dbe26e0d9452fc8759a50cda81cde9ffe365cb0a065b1969ea2b660eb3994585105661e81d9097b112abf43b3468e40457a507eb5c689858b200b00edcb4897bdd928cc68cf76d0dd35300c66358f76b6135128a46b3069a003020112a2620460ed67bde0158e1cac87ed9b8b7294e6511e578d9855adc178df140130006bc04faeb7af33d50c21d94a4bd0847410ed5e24b8534c4ddc7ce15c9b3b426a120ba87b49425bd1ed06e92b0c682386f6722d6e05e1e552168ea40c04fa9c2dd0f85b";

    fn check_mit_ap_req(etype: EncryptionType, key: &str, ap_req: &str) {
        let _ = tracing_subscriber::fmt::try_init();
        let registry = CryptoRegistry::default();
        let key = CryptoKey::new(etype, hex::decode(key).expect("hex")).with_kvno(2);
        assert_eq!(service_key(etype).value(), key.value());

        let validator = KerberosValidator::builder(KeySource::Keys(vec![key]))
            .actions(ValidationActions::standard() | ValidationActions::PacSignature)
            .build();
        let decrypted = validator
            .decrypt_at(&hex::decode(ap_req).expect("hex"), now())
            .expect("decrypt");
        assert_eq!(decrypted.state(), PipelineState::Validated);
        assert_eq!(decrypted.client(), &Name::principal("lzhu", "EXAMPLE.COM"));
        assert_eq!(decrypted.service(), &service());
        assert!(decrypted.mutual_required());
        assert_eq!(decrypted.authenticator().cusec, 1250);
        assert_eq!(decrypted.session_key().etype(), etype);

        let pac = decrypted.pac().expect("pac").expect("pac present");
        let krbtgt_key = CryptoKey::new(EncryptionType::AES256_CTS_HMAC_SHA1_96, vec![0x5a; 32]);
        pac.verify_kdc_signature(&registry, &krbtgt_key)
            .expect("kdc signature");
        assert_eq!(pac.client_info().expect("client info").name, "lzhu");

        let identity = decrypted.claims().expect("claims");
        assert_eq!(identity.name(), "lzhu@EXAMPLE.COM");
        assert_eq!(identity.find(claim_types::UPN), Some("lzhu@EXAMPLE.COM"));
        assert_eq!(identity.find(claim_types::WINDOWS_ACCOUNT_NAME), Some("NTDEV\\lzhu"));
        assert_eq!(
            identity.find(claim_types::PRIMARY_SID),
            Some("S-1-5-21-397955417-626881126-188441444-2914711")
        );
        assert_eq!(
            identity.find(claim_types::PRIMARY_GROUP_SID),
            Some("S-1-5-21-397955417-626881126-188441444-513")
        );
        assert_eq!(identity.find_all(claim_types::GROUP_SID).count(), 39);
        assert!(identity.failed_records().is_empty());
    }

    #[test]
    fn mit_rc4_ap_req() {
        check_mit_ap_req(EncryptionType::RC4_HMAC, MIT_RC4_KEY, MIT_RC4_AP_REQ);
    }

    #[test]
    fn mit_aes128_ap_req() {
        check_mit_ap_req(
            EncryptionType::AES128_CTS_HMAC_SHA1_96,
            MIT_AES128_KEY,
            MIT_AES128_AP_REQ,
        );
    }

    #[test]
    fn mit_aes256_ap_req() {
        check_mit_ap_req(
            EncryptionType::AES256_CTS_HMAC_SHA1_96,
            MIT_AES256_KEY,
            MIT_AES256_AP_REQ,
        );
    }

    #[test]
    fn mit_ap_req_with_wrong_key() {
        let mut key = hex::decode(MIT_AES256_KEY).expect("hex");
        key[0] ^= 1;
        let key = CryptoKey::new(EncryptionType::AES256_CTS_HMAC_SHA1_96, key);
        let validator = KerberosValidator::builder(KeySource::Keys(vec![key])).build();
        assert!(validator
            .decrypt_at(&hex::decode(MIT_AES256_AP_REQ).expect("hex"), now())
            .is_err());
    }

    #[test]
    fn replay_rejected() {
        let token = token(EncryptionType::AES256_CTS_HMAC_SHA1_96, false, false);
        let validator = KerberosValidator::builder(KeySource::password(SERVICE_PASSWORD, None))
            .build();

        let decrypted = validator.decrypt_at(&token, now()).expect("first use");
        assert_eq!(decrypted.state(), PipelineState::Validated);
        assert_eq!(decrypted.client(), &client());
        assert!(decrypted.mutual_required());
        assert!(matches!(
            validator.decrypt_at(&token, now()),
            Err(KrbError::ReplayDetected)
        ));
    }

    #[test]
    fn time_checks() {
        let token = token(EncryptionType::AES128_CTS_HMAC_SHA1_96, false, false);
        let validator = KerberosValidator::builder(KeySource::password(SERVICE_PASSWORD, None))
            .build();

        assert!(matches!(
            validator.decrypt_at(&token, now() + Duration::from_secs(600)),
            Err(KrbError::ClockSkew)
        ));
        assert!(matches!(
            validator.decrypt_at(&token, now() - Duration::from_secs(3600)),
            Err(KrbError::TicketNotYetValid)
        ));
        assert!(matches!(
            validator.decrypt_at(&token, now() + Duration::from_secs(86_400)),
            Err(KrbError::TicketExpired)
        ));

        let lenient = KerberosValidator::builder(KeySource::password(SERVICE_PASSWORD, None))
            .actions(ValidationActions::none())
            .build();
        assert!(lenient
            .decrypt_at(&token, now() + Duration::from_secs(600))
            .is_ok());
    }

    #[test]
    fn pac_required_when_checked() {
        let token = token(EncryptionType::AES256_CTS_HMAC_SHA1_96, false, false);
        let validator = KerberosValidator::builder(KeySource::password(SERVICE_PASSWORD, None))
            .actions(ValidationActions::PacSignature)
            .build();
        assert!(matches!(
            validator.decrypt_at(&token, now()),
            Err(KrbError::PacMissing)
        ));
    }

    #[test]
    fn key_selection() {
        let token = token(EncryptionType::AES256_CTS_HMAC_SHA1_96, false, false);

        let aes128 = service_key(EncryptionType::AES128_CTS_HMAC_SHA1_96);
        let validator = KerberosValidator::builder(KeySource::Keys(vec![aes128])).build();
        assert!(matches!(
            validator.decrypt_at(&token, now()),
            Err(KrbError::KeyNotFound { etype: 18, .. })
        ));

        // The right type with the wrong value fails authentication; no other key is tried.
        let wrong = CryptoKey::new(EncryptionType::AES256_CTS_HMAC_SHA1_96, vec![0x01; 32]);
        let right = service_key(EncryptionType::AES256_CTS_HMAC_SHA1_96);
        let validator = KerberosValidator::builder(KeySource::Keys(vec![wrong, right])).build();
        assert!(matches!(
            validator.decrypt_at(&token, now()),
            Err(KrbError::MessageAuthenticationFailed)
        ));

        let right = service_key(EncryptionType::AES256_CTS_HMAC_SHA1_96);
        let validator = KerberosValidator::builder(KeySource::Keys(vec![right]))
            .dangerously_skip_validation()
            .build();
        let decrypted = validator
            .decrypt_at(&token, now() + Duration::from_secs(86_400))
            .expect("skipped");
        assert_eq!(decrypted.state(), PipelineState::ValidationSkipped);
        assert!(decrypted.pac().expect("pac").is_none());
    }

    #[test]
    fn mutual_authentication_reply() {
        let token = token(EncryptionType::AES256_CTS_HMAC_SHA1_96, true, false);
        let registry = CryptoRegistry::default();
        let validator = KerberosValidator::builder(KeySource::password(SERVICE_PASSWORD, None))
            .build();
        let decrypted = validator.decrypt_at(&token, now()).expect("decrypt");

        let ap_rep = decrypted.ap_rep(&registry).expect("ap-rep");
        ApRepBuilder::verify(
            &registry,
            &ap_rep,
            decrypted.session_key(),
            now() + Duration::from_micros(1_250),
        )
        .expect("client accepts ap-rep");
    }

    #[test]
    fn krb_error_token_surfaces() {
        let reply = ErrorReply::new(KrbErrorCode::KrbApErrSkew, &service(), now())
            .with_text("clock skew too great");
        let wire = reply.message().to_der().expect("encode");
        let validator = KerberosValidator::builder(KeySource::password(SERVICE_PASSWORD, None))
            .build();
        match validator.decrypt_at(&wire, now()) {
            Err(KrbError::Protocol(err)) => {
                assert_eq!(err.code(), Some(KrbErrorCode::KrbApErrSkew));
            }
            other => unreachable!("expected protocol error, got {other:?}"),
        }
    }

    #[test]
    fn ntlm_token_rejected() {
        let validator = KerberosValidator::builder(KeySource::password(SERVICE_PASSWORD, None))
            .build();
        assert!(matches!(
            validator.validate(b"NTLMSSP\0\x01\x00\x00\x00"),
            Err(KrbError::UnsupportedMechanism(name)) if name == "NTLM"
        ));
    }

    #[test]
    fn replay_cache_expires_entries() {
        let cache = InMemoryReplayCache::default();
        let entry = ReplayEntry {
            client: client(),
            service: service(),
            ctime: now(),
            cusec: 7,
        };
        let expires = now() + Duration::from_secs(600);
        assert!(cache.check_and_insert(entry.clone(), expires, now()));
        assert!(!cache.check_and_insert(entry.clone(), expires, now()));
        assert!(cache.check_and_insert(entry, expires, expires + Duration::from_secs(1)));
    }
}
