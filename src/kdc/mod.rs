//! A KDC front end: TCP and UDP accept loops that decode requests, hand them to the realm
//! they name, and write the reply back. Every failure past the socket becomes a KRB-ERROR.

pub mod config;
mod realm;

pub use self::realm::{InMemoryRealm, PrincipalEntry};

use crate::asn1::constants::KrbErrorCode;
use crate::constants::{
    DEFAULT_IO_MAX_SIZE, DEFAULT_RECEIVE_TIMEOUT, DEFAULT_SHUTDOWN_GRACE, DEFAULT_UDP_MAX_SIZE,
    UDP_RECV_BUFFER,
};
use crate::error::KrbError;
use crate::proto::{KerberosReply, KerberosRequest, Name};
use crate::KdcTcpCodec;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, instrument, trace, warn};

/// The logic of one realm. Implementations answer AS and TGS requests; anything they
/// return as an error is converted to a KRB-ERROR by the listener.
#[async_trait]
pub trait RealmService: Send + Sync {
    fn realm(&self) -> &str;

    async fn process(
        &self,
        request: &KerberosRequest,
        now: SystemTime,
    ) -> Result<KerberosReply, KrbError>;
}

/// Resolves a realm name to the service handling it.
#[async_trait]
pub trait RealmLookup: Send + Sync {
    async fn find(&self, realm: &str) -> Option<Arc<dyn RealmService>>;
}

/// A fixed set of realms.
#[derive(Default, Clone)]
pub struct StaticRealmLookup {
    realms: HashMap<String, Arc<dyn RealmService>>,
}

impl StaticRealmLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_realm(mut self, service: Arc<dyn RealmService>) -> Self {
        self.realms.insert(service.realm().to_string(), service);
        self
    }
}

#[async_trait]
impl RealmLookup for StaticRealmLookup {
    async fn find(&self, realm: &str) -> Option<Arc<dyn RealmService>> {
        self.realms.get(realm).cloned()
    }
}

pub struct ListenerOptions {
    pub realm_lookup: Arc<dyn RealmLookup>,
    /// Names the KDC in errors for requests too broken to carry a realm.
    pub default_realm: String,
    pub receive_timeout: Duration,
    /// `host:port` strings.
    pub tcp_endpoints: Vec<String>,
    pub udp_endpoints: Vec<String>,
    pub max_request_size: usize,
    /// Larger UDP replies are replaced by KRB_ERR_RESPONSE_TOO_BIG.
    pub max_udp_reply_size: usize,
    pub shutdown_grace: Duration,
}

impl ListenerOptions {
    pub fn new(realm_lookup: Arc<dyn RealmLookup>, default_realm: &str) -> Self {
        ListenerOptions {
            realm_lookup,
            default_realm: default_realm.to_string(),
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            tcp_endpoints: Vec::new(),
            udp_endpoints: Vec::new(),
            max_request_size: DEFAULT_IO_MAX_SIZE,
            max_udp_reply_size: DEFAULT_UDP_MAX_SIZE,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

impl fmt::Debug for ListenerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerOptions")
            .field("default_realm", &self.default_realm)
            .field("receive_timeout", &self.receive_timeout)
            .field("tcp_endpoints", &self.tcp_endpoints)
            .field("udp_endpoints", &self.udp_endpoints)
            .field("max_request_size", &self.max_request_size)
            .field("max_udp_reply_size", &self.max_udp_reply_size)
            .field("shutdown_grace", &self.shutdown_grace)
            .finish_non_exhaustive()
    }
}

/// Where a connection or datagram is in its exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Accepted,
    RequestDecoded,
    RealmResolved,
    Processed,
    ResponseSent,
    ErrorSent,
}

#[derive(Clone, Debug)]
enum CoreAction {
    Shutdown,
}

#[derive(Clone, Copy, Debug)]
enum TaskName {
    KdcTcp,
    KdcUdp,
}

impl fmt::Display for TaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                TaskName::KdcTcp => "Key Distribution Center (TCP)",
                TaskName::KdcUdp => "Key Distribution Center (UDP)",
            }
        )
    }
}

struct Shared {
    realm_lookup: Arc<dyn RealmLookup>,
    default_realm: String,
    receive_timeout: Duration,
    max_request_size: usize,
    max_udp_reply_size: usize,
    shutdown_grace: Duration,
}

/// Controls a running listener.
pub struct KdcHandle {
    clean_shutdown: bool,
    tx: broadcast::Sender<CoreAction>,
    handles: Vec<(TaskName, JoinHandle<()>)>,
    tcp_addrs: Vec<SocketAddr>,
    udp_addrs: Vec<SocketAddr>,
}

impl KdcHandle {
    /// The bound TCP addresses, with any port 0 resolved.
    pub fn tcp_addrs(&self) -> &[SocketAddr] {
        &self.tcp_addrs
    }

    pub fn udp_addrs(&self) -> &[SocketAddr] {
        &self.udp_addrs
    }

    /// Close the accept sockets, let in-flight exchanges finish within the grace period,
    /// then abort whatever remains.
    pub async fn shutdown(mut self) {
        if self.tx.send(CoreAction::Shutdown).is_err() {
            warn!("no listener task acknowledged shutdown");
        }

        while let Some((name, handle)) = self.handles.pop() {
            if let Err(err) = handle.await {
                error!(?err, "task {name} failed to finish");
            }
        }

        self.clean_shutdown = true;
        info!("kdc listener stopped");
    }
}

impl Drop for KdcHandle {
    fn drop(&mut self) {
        if !self.clean_shutdown {
            warn!("kdc handle dropped without shutdown, stopping listeners");
            let _ = self.tx.send(CoreAction::Shutdown);
        }
    }
}

/// Bind every endpoint in `options` and start serving. Binding failures are returned;
/// once started the listener only stops through [`KdcHandle::shutdown`].
pub async fn start(options: ListenerOptions) -> Result<KdcHandle, KrbError> {
    if options.tcp_endpoints.is_empty() && options.udp_endpoints.is_empty() {
        return Err(KrbError::ConfigInvalid(
            "no listen endpoints configured".to_string(),
        ));
    }

    let (tx, _rx) = broadcast::channel(4);
    let shared = Arc::new(Shared {
        realm_lookup: options.realm_lookup,
        default_realm: options.default_realm,
        receive_timeout: options.receive_timeout,
        max_request_size: options.max_request_size,
        max_udp_reply_size: options.max_udp_reply_size,
        shutdown_grace: options.shutdown_grace,
    });

    let mut handle = KdcHandle {
        clean_shutdown: false,
        tx,
        handles: Vec::new(),
        tcp_addrs: Vec::new(),
        udp_addrs: Vec::new(),
    };

    for address in &options.tcp_endpoints {
        let listener = TcpListener::bind(address.as_str()).await.map_err(|err| {
            error!(?err, %address, "could not bind kdc tcp address");
            KrbError::IoError(err)
        })?;
        handle.tcp_addrs.push(listener.local_addr()?);
        let task = tokio::spawn(kdc_tcp_acceptor(
            listener,
            shared.clone(),
            handle.tx.subscribe(),
        ));
        handle.handles.push((TaskName::KdcTcp, task));
    }

    for address in &options.udp_endpoints {
        let socket = UdpSocket::bind(address.as_str()).await.map_err(|err| {
            error!(?err, %address, "could not bind kdc udp address");
            KrbError::IoError(err)
        })?;
        handle.udp_addrs.push(socket.local_addr()?);
        let task = tokio::spawn(kdc_udp_acceptor(
            Arc::new(socket),
            shared.clone(),
            handle.tx.subscribe(),
        ));
        handle.handles.push((TaskName::KdcUdp, task));
    }

    info!(tcp = ?handle.tcp_addrs, udp = ?handle.udp_addrs, "kdc listener started");
    Ok(handle)
}

async fn drain(mut tasks: JoinSet<()>, grace: Duration) {
    if tasks.is_empty() {
        return;
    }
    debug!(in_flight = tasks.len(), "waiting for in-flight exchanges");
    let finished = timeout(grace, async { while tasks.join_next().await.is_some() {} }).await;
    if finished.is_err() {
        warn!(remaining = tasks.len(), "shutdown grace elapsed, aborting exchanges");
        tasks.abort_all();
    }
}

async fn kdc_tcp_acceptor(
    listener: TcpListener,
    shared: Arc<Shared>,
    mut rx: broadcast::Receiver<CoreAction>,
) {
    info!("Started task {}", TaskName::KdcTcp);
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = rx.recv() => break,
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((tcpstream, client_address)) => {
                        let shared = shared.clone();
                        let rx = rx.resubscribe();
                        connections.spawn(kdc_tcp_client_process(tcpstream, client_address, shared, rx));
                    }
                    Err(err) => {
                        error!(?err, "kdc acceptor error, continuing");
                    }
                }
            }
        }
    }

    drop(listener);
    drain(connections, shared.shutdown_grace).await;
    info!("Stopped task {}", TaskName::KdcTcp);
}

#[instrument(level = "debug", skip_all, fields(client_address = %client_address))]
async fn kdc_tcp_client_process(
    tcpstream: TcpStream,
    client_address: SocketAddr,
    shared: Arc<Shared>,
    mut rx: broadcast::Receiver<CoreAction>,
) {
    trace!(state = ?ConnectionState::Accepted);
    let mut kdc_stream = Framed::new(tcpstream, KdcTcpCodec::new(shared.max_request_size));

    loop {
        // Shutdown only interrupts a connection between requests.
        let next = tokio::select! {
            _ = rx.recv() => break,
            next = timeout(shared.receive_timeout, kdc_stream.next()) => next,
        };

        let record = match next {
            Ok(Some(Ok(record))) => record,
            Ok(Some(Err(KrbError::RequestTooLarge))) => {
                let reply = KerberosReply::error(
                    KrbErrorCode::KrbErrFieldToolong,
                    &Name::service_krbtgt(&shared.default_realm),
                    "request too large",
                    SystemTime::now(),
                );
                if let Err(err) = kdc_stream.send(&reply).await {
                    error!(?err, "error writing response");
                }
                trace!(state = ?ConnectionState::ErrorSent);
                break;
            }
            Ok(Some(Err(err))) => {
                error!(?err, "error reading request, disconnecting");
                break;
            }
            Ok(None) => break,
            Err(_) => {
                debug!("receive timeout, disconnecting");
                break;
            }
        };

        let exchange = dispatch(&shared, &record, SystemTime::now()).await;
        if let Err(err) = kdc_stream.send(&exchange.reply).await {
            error!(?err, "error writing response, disconnecting");
            break;
        }
        trace!(state = ?exchange.state);
    }
    debug!("closing client");
}

async fn kdc_udp_acceptor(
    socket: Arc<UdpSocket>,
    shared: Arc<Shared>,
    mut rx: broadcast::Receiver<CoreAction>,
) {
    info!("Started task {}", TaskName::KdcUdp);
    let mut datagrams = JoinSet::new();
    let mut buf = vec![0u8; UDP_RECV_BUFFER];

    loop {
        tokio::select! {
            _ = rx.recv() => break,
            Some(_) = datagrams.join_next(), if !datagrams.is_empty() => {}
            recv_result = socket.recv_from(&mut buf) => {
                match recv_result {
                    Ok((len, client_address)) => {
                        let data = buf[..len].to_vec();
                        datagrams.spawn(kdc_udp_process(socket.clone(), client_address, data, shared.clone()));
                    }
                    Err(err) => {
                        error!(?err, "kdc udp receive error, continuing");
                    }
                }
            }
        }
    }

    drain(datagrams, shared.shutdown_grace).await;
    drop(socket);
    info!("Stopped task {}", TaskName::KdcUdp);
}

#[instrument(level = "debug", skip_all, fields(client_address = %client_address))]
async fn kdc_udp_process(
    socket: Arc<UdpSocket>,
    client_address: SocketAddr,
    data: Vec<u8>,
    shared: Arc<Shared>,
) {
    trace!(state = ?ConnectionState::Accepted);
    let stime = SystemTime::now();

    let exchange = if data.len() > shared.max_request_size {
        error!(len = data.len(), "datagram exceeds the maximum request size");
        Exchange::error(
            KerberosReply::error(
                KrbErrorCode::KrbErrFieldToolong,
                &Name::service_krbtgt(&shared.default_realm),
                "request too large",
                stime,
            ),
            Name::service_krbtgt(&shared.default_realm),
        )
    } else {
        dispatch(&shared, &data, stime).await
    };

    let mut state = exchange.state;
    let der = match exchange.reply.to_der() {
        Ok(der) if der.len() <= shared.max_udp_reply_size => der,
        Ok(der) => {
            debug!(len = der.len(), "reply too big for udp");
            state = ConnectionState::ErrorSent;
            let too_big = KerberosReply::error(
                KrbErrorCode::KrbErrResponseTooBig,
                &exchange.service,
                "response too big for udp, retry with tcp",
                stime,
            );
            match too_big.to_der() {
                Ok(der) => der,
                Err(err) => {
                    error!(?err, "unable to encode error reply");
                    return;
                }
            }
        }
        Err(err) => {
            error!(?err, "unable to encode reply");
            return;
        }
    };

    if let Err(err) = socket.send_to(&der, client_address).await {
        error!(?err, "error writing response");
        return;
    }
    trace!(?state);
}

/// The reply to one request and the state the exchange ended in.
struct Exchange {
    reply: KerberosReply,
    state: ConnectionState,
    service: Name,
}

impl Exchange {
    fn error(reply: KerberosReply, service: Name) -> Self {
        Exchange {
            reply,
            state: ConnectionState::ErrorSent,
            service,
        }
    }
}

async fn dispatch(shared: &Shared, data: &[u8], stime: SystemTime) -> Exchange {
    let request = match KerberosRequest::from_der(data) {
        Ok(request) => request,
        Err(err) => {
            error!(?err, "unable to decode request");
            let service = Name::service_krbtgt(&shared.default_realm);
            return Exchange::error(error_reply(&err, &service, stime), service);
        }
    };
    trace!(state = ?ConnectionState::RequestDecoded);

    let service = Name::service_krbtgt(request.realm());
    let Some(realm) = shared.realm_lookup.find(request.realm()).await else {
        warn!(realm = %request.realm(), "request for unknown realm");
        return Exchange::error(
            error_reply(&KrbError::RealmNotFound, &service, stime),
            service,
        );
    };
    trace!(state = ?ConnectionState::RealmResolved);

    match realm.process(&request, stime).await {
        Ok(reply) => {
            trace!(state = ?ConnectionState::Processed);
            let state = match reply {
                KerberosReply::ERR(_) => ConnectionState::ErrorSent,
                _ => ConnectionState::ResponseSent,
            };
            Exchange {
                reply,
                state,
                service,
            }
        }
        Err(err) => {
            error!(?err, "unable to process request");
            Exchange::error(error_reply(&err, &service, stime), service)
        }
    }
}

/// The KRB-ERROR a client receives for `err`.
pub fn error_reply(err: &KrbError, service: &Name, stime: SystemTime) -> KerberosReply {
    let code = match err {
        KrbError::Protocol(reply) => return KerberosReply::ERR(reply.clone()),
        KrbError::RealmNotFound => KrbErrorCode::KdcErrWrongRealm,
        KrbError::PrincipalUnknown => KrbErrorCode::KdcErrCPrincipalUnknown,
        KrbError::PreauthRequired => KrbErrorCode::KdcErrPreauthRequired,
        KrbError::PreauthFailed => KrbErrorCode::KdcErrPreauthFailed,
        KrbError::InvalidPvno => KrbErrorCode::KdcErrBadPvno,
        KrbError::InvalidMessageType => KrbErrorCode::KrbApErrMsgType,
        KrbError::UnsupportedEncryption(_) => KrbErrorCode::KdcErrEtypeNosupp,
        KrbError::UnsupportedChecksum(_) => KrbErrorCode::KdcErrSumtypeNosupp,
        KrbError::KeyNotFound { .. } => KrbErrorCode::KrbApErrNokey,
        KrbError::ClockSkew => KrbErrorCode::KrbApErrSkew,
        KrbError::TicketExpired => KrbErrorCode::KrbApErrTktExpired,
        KrbError::TicketNotYetValid => KrbErrorCode::KrbApErrTktNyv,
        KrbError::ReplayDetected => KrbErrorCode::KrbApErrRepeat,
        KrbError::ClientPrincipalMismatch | KrbError::RealmMismatch => {
            KrbErrorCode::KrbApErrBadmatch
        }
        KrbError::ChecksumMismatch => KrbErrorCode::KrbApErrModified,
        KrbError::RequestTooLarge => KrbErrorCode::KrbErrFieldToolong,
        err if err.is_crypto_failure() => KrbErrorCode::KrbApErrBadIntegrity,
        _ => KrbErrorCode::KrbErrGeneric,
    };
    // Only the realm message is spelled out; other internals stay private.
    let text = match err {
        KrbError::RealmNotFound => err.to_string(),
        _ => format!("{code:?}"),
    };
    KerberosReply::error(code, service, &text, stime)
}
