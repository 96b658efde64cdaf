//! Protocol level types built on top of the DER entities: principal names, the request and
//! reply exchanges, ticket issuance, and the AP-REQ validation pipeline.

mod ap_req;
mod claims;
pub mod mechanism;
mod ms_pac;
mod reply;
mod request;
mod ticket;
mod validator;

pub use self::ap_req::{ApRepBuilder, ApReqBuilder};
pub use self::claims::{claim_types, Claim, ClaimsIdentity, AUTHENTICATION_TYPE_KERBEROS};
pub use self::mechanism::{detect, Framing, KerberosToken};
pub use self::ms_pac::{
    FileTime, GroupMembership, KerbValidationInfo, Pac, PacBuffer, PacBuilder, PacClientInfo,
    PacSignature, Sid, SidAndAttributes, UpnDnsInfo, LOGON_EXTRA_SIDS, LOGON_RESOURCE_GROUPS,
    RID_DOMAIN_USERS, SE_GROUP_DEFAULT, UPN_DNS_EXTENDED, UPN_DNS_NO_UPN,
    USER_DONT_EXPIRE_PASSWORD, USER_NORMAL_ACCOUNT,
};
pub use self::reply::{KdcReply, KerberosReply};
pub use self::request::{
    AuthenticationRequest, AuthenticationRequestBuilder, KerberosRequest, TicketGrantRequest,
    TicketGrantRequestBuilder, VerifiedTicketGrant,
};
pub use self::ticket::{decrypt_ticket, IssuedTicket, ServiceTicketBuilder};
pub use self::validator::{
    DecryptedApReq, InMemoryReplayCache, KerberosValidator, KerberosValidatorBuilder, KeySource,
    PipelineState, ReplayCache, ReplayEntry, ValidationActions,
};

use crate::asn1::constants::{KrbErrorCode, PrincipalNameType};
use crate::asn1::etype_info2::EtypeInfo2;
use crate::asn1::krb_error::KrbErrorMessage;
use crate::asn1::pa_data::MethodData;
use crate::asn1::principal_name::PrincipalName;
use crate::asn1::Asn1Entity;
use crate::error::KrbError;
use rand::RngCore;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{error, trace};

/// The default tolerated difference between two clocks, RFC 4120 section 1.6.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Ord, PartialOrd)]
pub enum Name {
    Principal {
        name: String,
        realm: String,
    },
    // MIT sends host based services with either name type 1 or 3, so both forms need to
    // compare equal once normalised.
    SrvHst {
        service: String,
        host: String,
        realm: String,
    },
    SrvInst {
        service: String,
        instance: Vec<String>,
        realm: String,
    },
}

impl Name {
    pub fn principal(name: &str, realm: &str) -> Self {
        Self::Principal {
            name: name.to_string(),
            realm: realm.to_string(),
        }
    }

    pub fn service(service: &str, host: &str, realm: &str) -> Self {
        Self::SrvHst {
            service: service.to_string(),
            host: host.to_string(),
            realm: realm.to_string(),
        }
    }

    pub fn service_krbtgt(realm: &str) -> Self {
        /*
         * RFC4120, section 7.3, Name of the TGS
         * The principal identifier of the ticket-granting service shall be
         * composed of three parts: the realm of the KDC issuing the TGS ticket,
         * and a two-part name of type NT-SRV-INST, with the first part "krbtgt"
         * and the second part the name of the realm that will accept the TGT.
         */
        Self::SrvInst {
            service: "krbtgt".to_string(),
            instance: vec![realm.to_string()],
            realm: realm.to_string(),
        }
    }

    pub fn realm(&self) -> &str {
        match self {
            Self::Principal { realm, .. }
            | Self::SrvHst { realm, .. }
            | Self::SrvInst { realm, .. } => realm,
        }
    }

    pub fn is_service_krbtgt(&self, check_realm: &str) -> bool {
        match self {
            // MIT omits the instance in an AS-REQ, and Heimdal sends any name type it likes.
            Self::SrvInst { service, realm, .. } | Self::SrvHst { service, realm, .. } => {
                service == "krbtgt" && check_realm == realm
            }
            Self::Principal { name, realm } => name == "krbtgt" && check_realm == realm,
        }
    }

    /// The name components in wire order, without the realm.
    pub fn components(&self) -> Vec<String> {
        match self {
            Self::Principal { name, .. } => name.split('/').map(str::to_string).collect(),
            Self::SrvHst { service, host, .. } => vec![service.clone(), host.clone()],
            Self::SrvInst {
                service, instance, ..
            } => std::iter::once(service.clone())
                .chain(instance.iter().cloned())
                .collect(),
        }
    }

    /// The default salt of RFC 4120 section 4: the realm followed by every component.
    pub fn default_salt(&self) -> String {
        let mut salt = self.realm().to_string();
        for component in self.components() {
            salt.push_str(&component);
        }
        salt
    }

    pub fn to_principal_name(&self) -> PrincipalName {
        let name_type = match self {
            Self::Principal { .. } => PrincipalNameType::NtPrincipal,
            Self::SrvHst { .. } => PrincipalNameType::NtSrvHst,
            Self::SrvInst { .. } => PrincipalNameType::NtSrvInst,
        };
        PrincipalName {
            name_type: name_type.into(),
            name_string: self.components(),
        }
    }

    pub fn from_principal_name(princ: &PrincipalName, realm: &str) -> Result<Self, KrbError> {
        let name_type = PrincipalNameType::try_from(princ.name_type).map_err(|err| {
            error!(?err, name_type = princ.name_type, "invalid principal name type");
            KrbError::Asn1InvalidValue("principal name type")
        })?;

        trace!(?name_type, name_string = ?princ.name_string);

        let realm = realm.to_string();
        match (name_type, princ.name_string.as_slice()) {
            (_, []) => Err(KrbError::Asn1InvalidValue("principal name components")),
            (PrincipalNameType::NtSrvInst, [service, instance @ ..]) => Ok(Name::SrvInst {
                service: service.clone(),
                instance: instance.to_vec(),
                realm,
            }),
            (
                PrincipalNameType::NtSrvHst | PrincipalNameType::NtPrincipal,
                [service, host],
            ) if service == "krbtgt" => Ok(Name::SrvInst {
                service: service.clone(),
                instance: vec![host.clone()],
                realm,
            }),
            (PrincipalNameType::NtSrvHst, [service, host]) => Ok(Name::SrvHst {
                service: service.clone(),
                host: host.clone(),
                realm,
            }),
            (_, components) => Ok(Name::Principal {
                name: components.join("/"),
                realm,
            }),
        }
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.components().join("/"), self.realm())
    }
}

/// A KRB-ERROR returned by a KDC or service. Clients inspect the code and pre-auth hints
/// to decide how to retry.
#[derive(Clone, PartialEq, Eq)]
pub struct ErrorReply {
    message: KrbErrorMessage,
}

impl fmt::Debug for ErrorReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorReply")
            .field("code", &self.message.error_code)
            .field("text", &self.message.e_text)
            .field("service", &self.message.sname.name_string)
            .field("realm", &self.message.realm)
            .finish()
    }
}

impl ErrorReply {
    pub fn new(code: KrbErrorCode, service: &Name, stime: SystemTime) -> Self {
        let since_epoch = stime.duration_since(UNIX_EPOCH).unwrap_or_default();
        ErrorReply {
            message: KrbErrorMessage {
                ctime: None,
                cusec: None,
                stime: UNIX_EPOCH + Duration::from_secs(since_epoch.as_secs()),
                susec: since_epoch.subsec_micros(),
                error_code: code.into(),
                crealm: None,
                cname: None,
                realm: service.realm().to_string(),
                sname: service.to_principal_name(),
                e_text: None,
                e_data: None,
            },
        }
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.message.e_text = Some(text.to_string());
        self
    }

    pub fn with_client(mut self, client: &Name) -> Self {
        self.message.crealm = Some(client.realm().to_string());
        self.message.cname = Some(client.to_principal_name());
        self
    }

    pub fn with_method_data(mut self, method_data: &MethodData) -> Result<Self, KrbError> {
        self.message.e_data = Some(method_data.to_der()?);
        Ok(self)
    }

    pub fn code(&self) -> Option<KrbErrorCode> {
        self.message.code()
    }

    pub fn error_code(&self) -> i32 {
        self.message.error_code
    }

    pub fn text(&self) -> Option<&str> {
        self.message.e_text.as_deref()
    }

    pub fn method_data(&self) -> Result<Option<MethodData>, KrbError> {
        self.message.method_data()
    }

    pub fn etype_info2(&self) -> Result<Option<EtypeInfo2>, KrbError> {
        self.message.etype_info2()
    }

    pub fn message(&self) -> &KrbErrorMessage {
        &self.message
    }

    pub fn into_error(self) -> KrbError {
        KrbError::Protocol(Box::new(self))
    }
}

impl From<KrbErrorMessage> for ErrorReply {
    fn from(message: KrbErrorMessage) -> Self {
        ErrorReply { message }
    }
}

impl fmt::Display for ErrorReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code() {
            Some(code) => write!(f, "{code:?} ({})", self.message.error_code)?,
            None => write!(f, "error code {}", self.message.error_code)?,
        }
        if let Some(text) = self.text() {
            write!(f, ": {text}")?;
        }
        Ok(())
    }
}

/// A request nonce. MIT treats the nonce as a signed value, so the top bit stays clear.
pub(crate) fn random_nonce() -> u32 {
    rand::rng().next_u32() & 0x7fff_ffff
}

/// Split a time into whole seconds and the microseconds Kerberos carries beside it.
pub(crate) fn split_micros(time: SystemTime) -> (SystemTime, u32) {
    let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
    (
        UNIX_EPOCH + Duration::from_secs(since_epoch.as_secs()),
        since_epoch.subsec_micros(),
    )
}

/// The absolute difference between two times.
pub(crate) fn time_distance(a: SystemTime, b: SystemTime) -> Duration {
    a.duration_since(b)
        .or_else(|_| b.duration_since(a))
        .unwrap_or_default()
}
