use std::time::Duration;

/// The largest TCP record accepted from a peer.
pub(crate) const DEFAULT_IO_MAX_SIZE: usize = 64 * 1024;

/// Datagrams larger than this are answered with KRB_ERR_RESPONSE_TOO_BIG.
pub(crate) const DEFAULT_UDP_MAX_SIZE: usize = 1400;

/// Enough for any datagram a socket can hand back.
pub(crate) const UDP_RECV_BUFFER: usize = 65_535;

pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub(crate) const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(10);
pub(crate) const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub(crate) const KERBEROS_PORT: u16 = 88;
