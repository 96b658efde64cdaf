//! Finding the KDCs of a realm: a static map first, then DNS SRV records through an
//! injected resolver.

use crate::constants::KERBEROS_PORT;
use crate::error::KrbError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace};

/// Transport protocols available to send Kerberos messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportProtocol {
    Tcp,
    Udp,
}

impl TransportProtocol {
    fn srv_label(self) -> &'static str {
        match self {
            TransportProtocol::Tcp => "_tcp",
            TransportProtocol::Udp => "_udp",
        }
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportProtocol::Tcp => write!(f, "tcp"),
            TransportProtocol::Udp => write!(f, "udp"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DnsRecordType {
    A,
    Aaaa,
    Cname,
    Srv,
}

/// One answer from a resolver. Fields a record type does not use are left at their
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DnsRecord {
    pub name: String,
    pub target: String,
    pub port: u16,
    pub priority: u16,
    pub weight: u16,
    pub ttl: Duration,
    pub canonical_names: Vec<String>,
}

impl DnsRecord {
    pub fn srv(name: &str, target: &str, port: u16, priority: u16, weight: u16) -> Self {
        DnsRecord {
            name: name.to_string(),
            target: target.to_string(),
            port,
            priority,
            weight,
            ..Default::default()
        }
    }
}

/// The DNS lookup itself is left to the embedding application.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    async fn query(&self, name: &str, record_type: DnsRecordType)
        -> Result<Vec<DnsRecord>, KrbError>;
}

/// A resolver answering from a fixed table, for tests and closed environments.
#[derive(Debug, Clone, Default)]
pub struct StaticDnsResolver {
    records: HashMap<(String, DnsRecordType), Vec<DnsRecord>>,
}

impl StaticDnsResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_record(mut self, record_type: DnsRecordType, record: DnsRecord) -> Self {
        self.records
            .entry((record.name.to_ascii_lowercase(), record_type))
            .or_default()
            .push(record);
        self
    }
}

#[async_trait]
impl DnsResolver for StaticDnsResolver {
    async fn query(
        &self,
        name: &str,
        record_type: DnsRecordType,
    ) -> Result<Vec<DnsRecord>, KrbError> {
        Ok(self
            .records
            .get(&(name.to_ascii_lowercase(), record_type))
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdcEndpoint {
    pub host: String,
    pub port: u16,
    pub protocol: TransportProtocol,
}

impl KdcEndpoint {
    pub fn new(host: &str, port: u16, protocol: TransportProtocol) -> Self {
        KdcEndpoint {
            host: host.to_string(),
            port,
            protocol,
        }
    }

    /// Parse `host`, `host:port` or `[v6addr]:port`, optionally prefixed with `tcp/` or
    /// `udp/`. Without a prefix TCP is assumed.
    pub fn parse(value: &str) -> Result<Self, KrbError> {
        let (protocol, rest) = match value.split_once('/') {
            Some(("tcp", rest)) => (TransportProtocol::Tcp, rest),
            Some(("udp", rest)) => (TransportProtocol::Udp, rest),
            Some(_) => return Err(KrbError::ConfigInvalid(format!("kdc address {value}"))),
            None => (TransportProtocol::Tcp, value),
        };

        let invalid = || KrbError::ConfigInvalid(format!("kdc address {value}"));
        let (host, port) = if let Some(v6) = rest.strip_prefix('[') {
            let (host, tail) = v6.split_once(']').ok_or_else(invalid)?;
            let port = match tail.strip_prefix(':') {
                Some(port) => port.parse().map_err(|_| invalid())?,
                None if tail.is_empty() => KERBEROS_PORT,
                None => return Err(invalid()),
            };
            (host, port)
        } else {
            match rest.rsplit_once(':') {
                Some((host, port)) => (host, port.parse().map_err(|_| invalid())?),
                None => (rest, KERBEROS_PORT),
            }
        };
        if host.is_empty() {
            return Err(invalid());
        }
        Ok(KdcEndpoint::new(host, port, protocol))
    }
}

impl fmt::Display for KdcEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}/[{}]:{}", self.protocol, self.host, self.port)
        } else {
            write!(f, "{}/{}:{}", self.protocol, self.host, self.port)
        }
    }
}

#[derive(Clone, Default)]
pub struct KdcLocator {
    static_kdcs: HashMap<String, Vec<KdcEndpoint>>,
    resolver: Option<Arc<dyn DnsResolver>>,
}

impl fmt::Debug for KdcLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KdcLocator")
            .field("static_kdcs", &self.static_kdcs)
            .field("resolver", &self.resolver.is_some())
            .finish()
    }
}

impl KdcLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_kdc(mut self, realm: &str, endpoint: KdcEndpoint) -> Self {
        self.static_kdcs
            .entry(realm.to_ascii_uppercase())
            .or_default()
            .push(endpoint);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn DnsResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// The KDCs for `realm` in the order they should be tried. Statically configured KDCs
    /// win; otherwise `_kerberos._tcp.REALM` then `_kerberos._udp.REALM`, each ordered
    /// by priority and then by weight.
    pub async fn locate(&self, realm: &str) -> Result<Vec<KdcEndpoint>, KrbError> {
        if let Some(endpoints) = self.static_kdcs.get(&realm.to_ascii_uppercase()) {
            trace!(%realm, count = endpoints.len(), "static kdcs");
            return Ok(endpoints.clone());
        }

        let Some(resolver) = &self.resolver else {
            error!(%realm, "no kdc configured for realm and no resolver available");
            return Err(KrbError::Transport);
        };

        let mut endpoints = Vec::new();
        for protocol in [TransportProtocol::Tcp, TransportProtocol::Udp] {
            let name = format!("_kerberos.{}.{}", protocol.srv_label(), realm);
            let mut records = resolver.query(&name, DnsRecordType::Srv).await?;
            // RFC 2782: a target of "." means the service is not offered.
            records.retain(|r| !r.target.is_empty() && r.target != ".");
            records.sort_by(|a, b| a.priority.cmp(&b.priority).then(b.weight.cmp(&a.weight)));
            debug!(%name, count = records.len(), "srv records");
            endpoints.extend(records.into_iter().map(|r| KdcEndpoint {
                host: r.target.trim_end_matches('.').to_string(),
                port: r.port,
                protocol,
            }));
        }

        if endpoints.is_empty() {
            error!(%realm, "no kdc found for realm");
            return Err(KrbError::Transport);
        }
        Ok(endpoints)
    }
}
