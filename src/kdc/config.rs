use super::{InMemoryRealm, ListenerOptions, StaticRealmLookup};
use crate::asn1::constants::EncryptionType;
use crate::constants::{
    DEFAULT_IO_MAX_SIZE, DEFAULT_RECEIVE_TIMEOUT, DEFAULT_SHUTDOWN_GRACE, DEFAULT_UDP_MAX_SIZE,
};
use crate::crypto::{CryptoKey, CryptoRegistry};
use crate::error::KrbError;
use crate::proto::{Name, Sid};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

fn default_kvno() -> u32 {
    1
}

fn default_etype() -> i32 {
    EncryptionType::AES256_CTS_HMAC_SHA1_96.into()
}

fn default_receive_timeout() -> u64 {
    DEFAULT_RECEIVE_TIMEOUT.as_secs()
}

fn default_shutdown_grace() -> u64 {
    DEFAULT_SHUTDOWN_GRACE.as_secs()
}

fn default_max_request_size() -> usize {
    DEFAULT_IO_MAX_SIZE
}

fn default_max_udp_reply_size() -> usize {
    DEFAULT_UDP_MAX_SIZE
}

/// A user. Exactly one of `password` or a hex `key` must be given.
#[derive(Debug, Deserialize)]
pub struct UserPrincipal {
    pub name: String,
    pub password: Option<String>,
    pub key: Option<String>,
    #[serde(default = "default_etype")]
    pub etype: i32,
    #[serde(default = "default_kvno")]
    pub kvno: u32,
    pub rid: u32,
    #[serde(default)]
    pub groups: Vec<u32>,
}

#[derive(Debug, Deserialize)]
pub struct ServicePrincipal {
    pub srvname: String,
    pub hostname: String,
    pub password: Option<String>,
    pub key: Option<String>,
    #[serde(default = "default_etype")]
    pub etype: i32,
    #[serde(default = "default_kvno")]
    pub kvno: u32,
}

#[derive(Debug, Deserialize)]
pub struct RealmConfig {
    pub name: String,
    pub domain_sid: String,
    #[serde(deserialize_with = "hex::serde::deserialize")]
    pub krbtgt_key: Vec<u8>,
    #[serde(default = "default_etype")]
    pub krbtgt_etype: i32,
    #[serde(default = "default_kvno")]
    pub krbtgt_kvno: u32,
    pub clock_skew_secs: Option<u64>,
    #[serde(default)]
    pub user: Vec<UserPrincipal>,
    #[serde(default)]
    pub service: Vec<ServicePrincipal>,
}

#[derive(Debug, Deserialize)]
pub struct KdcConfig {
    pub default_realm: String,
    #[serde(default)]
    pub tcp_address: Vec<String>,
    #[serde(default)]
    pub udp_address: Vec<String>,
    #[serde(default = "default_receive_timeout")]
    pub receive_timeout_secs: u64,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
    #[serde(default = "default_max_request_size")]
    pub max_request_size: usize,
    #[serde(default = "default_max_udp_reply_size")]
    pub max_udp_reply_size: usize,
    pub realm: Vec<RealmConfig>,
}

impl KdcConfig {
    pub fn parse<P: AsRef<Path>>(path: P) -> Result<KdcConfig, KrbError> {
        let contents = fs::read_to_string(&path)?;

        toml::from_str(&contents).map_err(|err| {
            error!(?err, "toml parse failure");
            KrbError::ConfigInvalid(err.to_string())
        })
    }

    /// Build every configured realm, keyed by realm name.
    pub fn realms(&self) -> Result<HashMap<String, Arc<InMemoryRealm>>, KrbError> {
        let registry = CryptoRegistry::default();
        self.realm
            .iter()
            .map(|realm| {
                let built = realm.build(&registry)?;
                Ok((realm.name.clone(), Arc::new(built)))
            })
            .collect()
    }
}

impl RealmConfig {
    fn build(&self, registry: &CryptoRegistry) -> Result<InMemoryRealm, KrbError> {
        let RealmConfig {
            name: realm,
            domain_sid,
            krbtgt_key,
            krbtgt_etype,
            krbtgt_kvno,
            clock_skew_secs,
            user,
            service,
        } = self;

        let krbtgt_key =
            CryptoKey::new(etype(*krbtgt_etype)?, krbtgt_key.clone()).with_kvno(*krbtgt_kvno);
        let domain_sid: Sid = domain_sid.parse().map_err(|err| {
            error!(?err, %domain_sid, "invalid domain sid");
            KrbError::ConfigInvalid(format!("domain sid of realm {realm}"))
        })?;

        let mut built = InMemoryRealm::new(realm, krbtgt_key, domain_sid)
            .with_registry(registry.clone());
        if let Some(secs) = clock_skew_secs {
            built = built.with_clock_skew(Duration::from_secs(*secs));
        }

        for UserPrincipal {
            name,
            password,
            key,
            etype,
            kvno,
            rid,
            groups,
        } in user
        {
            let principal = Name::principal(name, realm);
            let key = long_term_key(
                registry,
                &principal,
                password.as_deref(),
                key.as_deref(),
                *etype,
                *kvno,
            )?;
            built = built.with_user_key(name, key, *rid, groups);
        }

        for ServicePrincipal {
            srvname,
            hostname,
            password,
            key,
            etype,
            kvno,
        } in service
        {
            let principal = Name::service(srvname, hostname, realm);
            let key = long_term_key(
                registry,
                &principal,
                password.as_deref(),
                key.as_deref(),
                *etype,
                *kvno,
            )?;
            built = built.with_service(srvname, hostname, key);
        }

        debug!(%realm, users = user.len(), services = service.len(), "realm configured");
        Ok(built)
    }
}

fn etype(value: i32) -> Result<EncryptionType, KrbError> {
    EncryptionType::try_from(value).map_err(|_| {
        error!(etype = value, "unknown encryption type in config");
        KrbError::UnsupportedEncryption(value)
    })
}

fn long_term_key(
    registry: &CryptoRegistry,
    principal: &Name,
    password: Option<&str>,
    key: Option<&str>,
    etype_value: i32,
    kvno: u32,
) -> Result<CryptoKey, KrbError> {
    let salt = principal.default_salt();
    let key = match (password, key) {
        (Some(password), None) => registry.string_to_key(etype_value, password, &salt, None)?,
        (None, Some(key)) => CryptoKey::new(etype(etype_value)?, hex::decode(key)?),
        _ => {
            error!(%principal, "principal needs exactly one of password or key");
            return Err(KrbError::ConfigInvalid(format!(
                "{principal} needs exactly one of password or key"
            )));
        }
    };
    Ok(key.with_kvno(kvno).with_salt(salt))
}

impl TryFrom<&KdcConfig> for ListenerOptions {
    type Error = KrbError;

    fn try_from(config: &KdcConfig) -> Result<Self, Self::Error> {
        let realms = config.realms()?;
        if !realms.contains_key(&config.default_realm) {
            error!(default_realm = %config.default_realm, "default realm is not configured");
            return Err(KrbError::ConfigInvalid(format!(
                "default realm {} is not configured",
                config.default_realm
            )));
        }

        let lookup = realms
            .into_values()
            .fold(StaticRealmLookup::new(), |lookup, realm| {
                lookup.with_realm(realm)
            });

        let mut options = ListenerOptions::new(Arc::new(lookup), &config.default_realm);
        options.tcp_endpoints = config.tcp_address.clone();
        options.udp_endpoints = config.udp_address.clone();
        options.receive_timeout = Duration::from_secs(config.receive_timeout_secs);
        options.shutdown_grace = Duration::from_secs(config.shutdown_grace_secs);
        options.max_request_size = config.max_request_size;
        options.max_udp_reply_size = config.max_udp_reply_size;
        Ok(options)
    }
}
