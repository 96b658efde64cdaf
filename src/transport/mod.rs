//! Sending requests to a KDC over TCP or UDP.

mod locator;

pub use self::locator::{
    DnsRecord, DnsRecordType, DnsResolver, KdcEndpoint, KdcLocator, StaticDnsResolver,
    TransportProtocol,
};

use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_IO_MAX_SIZE, DEFAULT_RECEIVE_TIMEOUT, UDP_RECV_BUFFER,
};
use crate::error::KrbError;
use crate::proto::{KerberosReply, KerberosRequest};
use crate::KerberosTcpCodec;
use futures::{SinkExt, StreamExt};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream, UdpSocket};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tracing::{debug, error, instrument, trace, warn};

/// Sends one request per call to the first reachable KDC of a realm. Nothing is retried
/// once a request has been sent.
#[derive(Debug, Clone)]
pub struct KdcClient {
    locator: KdcLocator,
    connect_timeout: Duration,
    receive_timeout: Duration,
    max_size: usize,
}

impl KdcClient {
    pub fn new(locator: KdcLocator) -> Self {
        KdcClient {
            locator,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            max_size: DEFAULT_IO_MAX_SIZE,
        }
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn receive_timeout(mut self, receive_timeout: Duration) -> Self {
        self.receive_timeout = receive_timeout;
        self
    }

    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    /// Send `request` to a KDC of `realm`. A KRB-ERROR answer is returned as
    /// [`KrbError::Protocol`] so callers can inspect its code and pre-auth hints.
    #[instrument(level = "debug", skip_all, fields(realm = %realm))]
    pub async fn send(
        &self,
        realm: &str,
        request: &KerberosRequest,
    ) -> Result<KerberosReply, KrbError> {
        let der = request.to_der()?;
        for endpoint in self.locator.locate(realm).await? {
            let reply = match endpoint.protocol {
                TransportProtocol::Tcp => {
                    let Some(stream) = self.connect_tcp(&endpoint).await else {
                        continue;
                    };
                    self.exchange_tcp(stream, request).await?
                }
                TransportProtocol::Udp => {
                    let Some(socket) = self.connect_udp(&endpoint).await else {
                        continue;
                    };
                    self.exchange_udp(&socket, &der).await?
                }
            };
            debug!(%endpoint, "kdc replied");
            return match reply {
                KerberosReply::ERR(err) => {
                    debug!(%err, "kdc returned an error");
                    Err(KrbError::Protocol(err))
                }
                reply => Ok(reply),
            };
        }
        error!("no kdc for the realm could be reached");
        Err(KrbError::Transport)
    }

    async fn resolve(&self, endpoint: &KdcEndpoint) -> Option<SocketAddr> {
        match lookup_host((endpoint.host.as_str(), endpoint.port)).await {
            Ok(mut addrs) => addrs.next(),
            Err(err) => {
                warn!(?err, %endpoint, "unable to resolve kdc");
                None
            }
        }
    }

    async fn connect_tcp(&self, endpoint: &KdcEndpoint) -> Option<TcpStream> {
        let addr = self.resolve(endpoint).await?;
        match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Some(stream),
            Ok(Err(err)) => {
                warn!(?err, %endpoint, "unable to connect to kdc");
                None
            }
            Err(_) => {
                warn!(%endpoint, "timed out connecting to kdc");
                None
            }
        }
    }

    async fn connect_udp(&self, endpoint: &KdcEndpoint) -> Option<UdpSocket> {
        let addr = self.resolve(endpoint).await?;
        let local: SocketAddr = if addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = match UdpSocket::bind(local).await {
            Ok(socket) => socket,
            Err(err) => {
                warn!(?err, "unable to bind udp socket");
                return None;
            }
        };
        match socket.connect(addr).await {
            Ok(()) => Some(socket),
            Err(err) => {
                warn!(?err, %endpoint, "unable to connect udp socket");
                None
            }
        }
    }

    async fn exchange_tcp(
        &self,
        stream: TcpStream,
        request: &KerberosRequest,
    ) -> Result<KerberosReply, KrbError> {
        let mut krb_stream = Framed::new(stream, KerberosTcpCodec::new(self.max_size));
        match timeout(self.receive_timeout, krb_stream.send(request)).await {
            Ok(sent) => sent.map_err(transport_error)?,
            Err(_) => {
                error!("timed out sending to the kdc");
                return Err(KrbError::Transport);
            }
        }

        match timeout(self.receive_timeout, krb_stream.next()).await {
            Ok(Some(reply)) => reply.map_err(transport_error),
            Ok(None) => {
                error!("kdc closed the connection without replying");
                Err(KrbError::Transport)
            }
            Err(_) => {
                error!("timed out waiting for the kdc");
                Err(KrbError::Transport)
            }
        }
    }

    async fn exchange_udp(&self, socket: &UdpSocket, der: &[u8]) -> Result<KerberosReply, KrbError> {
        socket.send(der).await.map_err(|err| {
            error!(?err, "unable to send request");
            KrbError::Transport
        })?;

        let mut buf = vec![0u8; UDP_RECV_BUFFER];
        let len = match timeout(self.receive_timeout, socket.recv(&mut buf)).await {
            Ok(Ok(len)) => len,
            Ok(Err(err)) => {
                error!(?err, "unable to receive reply");
                return Err(KrbError::Transport);
            }
            Err(_) => {
                error!("timed out waiting for the kdc");
                return Err(KrbError::Transport);
            }
        };
        trace!(len, "datagram received");
        KerberosReply::from_der(&buf[..len])
    }
}

/// Socket failures are opaque to the caller; decode failures are not.
fn transport_error(err: KrbError) -> KrbError {
    match err {
        KrbError::IoError(err) => {
            error!(?err, "kdc connection failed");
            KrbError::Transport
        }
        other => other,
    }
}
