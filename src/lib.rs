// #![deny(warnings)]

#![warn(unused_extern_crates)]
// Enable some groups of clippy lints.
#![deny(clippy::suspicious)]
#![deny(clippy::perf)]
// Specific lints to enforce.
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]
#![deny(clippy::disallowed_types)]
#![deny(clippy::manual_let_else)]
#![allow(clippy::unreachable)]

pub mod asn1;
pub(crate) mod constants;
pub mod crypto;
pub mod error;
pub mod kdc;
pub mod proto;
pub mod transport;

use crate::constants::DEFAULT_IO_MAX_SIZE;
use crate::error::KrbError;
use crate::proto::{KerberosReply, KerberosRequest};
use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{error, trace};

const LENGTH_PREFIX: usize = 4;

/*
 * RFC4120, section 7.2.2
 *
 * Each request (KRB_KDC_REQ) and response (KRB_KDC_REP or KRB_ERROR) sent over the TCP
 * stream is preceded by the length of the request as 4 octets in network byte order.
 * The high bit of the length is reserved for future expansion and MUST currently be set
 * to zero.
 */

/// Split one length prefixed record off the front of `buf`.
fn decode_record(buf: &mut BytesMut, max_size: usize) -> Result<Option<BytesMut>, KrbError> {
    if buf.len() < LENGTH_PREFIX {
        return Ok(None);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    // A set high bit always exceeds the maximum.
    if len > max_size {
        error!(len, max_size, "record exceeds the maximum size");
        return Err(KrbError::RequestTooLarge);
    }
    if buf.len() < LENGTH_PREFIX + len {
        buf.reserve(LENGTH_PREFIX + len - buf.len());
        return Ok(None);
    }
    buf.advance(LENGTH_PREFIX);
    trace!(len, "record received");
    Ok(Some(buf.split_to(len)))
}

fn encode_record(der_bytes: &[u8], max_size: usize, buf: &mut BytesMut) -> Result<(), KrbError> {
    if der_bytes.len() > max_size {
        error!(len = der_bytes.len(), max_size, "record exceeds the maximum size");
        return Err(KrbError::RequestTooLarge);
    }
    let d_len = der_bytes.len() as u32;
    buf.reserve(LENGTH_PREFIX + der_bytes.len());
    buf.extend_from_slice(&d_len.to_be_bytes());
    buf.extend_from_slice(der_bytes);
    Ok(())
}

/// The client side of a KDC TCP connection: requests out, replies in.
pub struct KerberosTcpCodec {
    max_size: usize,
}

impl KerberosTcpCodec {
    pub fn new(max_size: usize) -> Self {
        KerberosTcpCodec { max_size }
    }
}

impl Default for KerberosTcpCodec {
    fn default() -> Self {
        KerberosTcpCodec::new(DEFAULT_IO_MAX_SIZE)
    }
}

impl Decoder for KerberosTcpCodec {
    type Item = KerberosReply;
    type Error = KrbError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match decode_record(buf, self.max_size)? {
            Some(record) => KerberosReply::from_der(&record).map(Some),
            None => Ok(None),
        }
    }
}

impl Encoder<&KerberosRequest> for KerberosTcpCodec {
    type Error = KrbError;

    fn encode(&mut self, msg: &KerberosRequest, buf: &mut BytesMut) -> Result<(), KrbError> {
        encode_record(&msg.to_der()?, self.max_size, buf)
    }
}

/// The KDC side of a TCP connection. Requests are handed up undecoded so that a request
/// which fails to decode can still be answered with a KRB-ERROR.
pub struct KdcTcpCodec {
    max_size: usize,
}

impl KdcTcpCodec {
    pub fn new(max_size: usize) -> Self {
        KdcTcpCodec { max_size }
    }
}

impl Default for KdcTcpCodec {
    fn default() -> Self {
        KdcTcpCodec::new(DEFAULT_IO_MAX_SIZE)
    }
}

impl Decoder for KdcTcpCodec {
    type Item = BytesMut;
    type Error = KrbError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_record(buf, self.max_size)
    }
}

impl Encoder<&KerberosReply> for KdcTcpCodec {
    type Error = KrbError;

    fn encode(&mut self, msg: &KerberosReply, buf: &mut BytesMut) -> Result<(), KrbError> {
        // Replies are not bounded by the request limit.
        encode_record(&msg.to_der()?, usize::MAX >> 1, buf)
    }
}
