use crate::asn1::element::Tag;
use crate::proto::ErrorReply;
use std::fmt;

#[derive(Debug)]
pub enum KrbError {
    // IMPORTANT: Don't add key material or plaintext to this enum - you can leak internal
    // state in an error. If you want to debug the error, then use the error! macro at the
    // error raise site to report relevant information.
    Asn1Truncated,
    Asn1LengthOverrun { declared: usize, available: usize },
    Asn1IndefiniteLength,
    Asn1NonCanonical,
    Asn1TrailingData,
    Asn1DepthExceeded,
    Asn1InvalidValue(&'static str),
    UnexpectedTag { expected: Tag, actual: Tag },
    MissingField {
        structure: &'static str,
        field: &'static str,
    },
    InvalidPvno,
    InvalidMessageType,

    UnsupportedMechanism(String),

    UnsupportedEncryption(i32),
    UnsupportedChecksum(i32),
    PlatformNotSupported(&'static str),

    MessageAuthenticationFailed,
    InsufficientData,
    CtsCiphertextInvalid,
    InvalidEncryptionKey,
    InvalidHmacKey,
    PreauthInvalidS2KParams,
    KeyAgreementInvalid,
    ChecksumMismatch,
    KeyNotFound { etype: i32, kvno: Option<u32> },
    MutualAuthFailed,

    Protocol(Box<ErrorReply>),

    Transport,
    RequestTooLarge,

    RealmNotFound,

    TicketExpired,
    TicketNotYetValid,
    ClockSkew,
    ReplayDetected,
    ClientPrincipalMismatch,
    RealmMismatch,
    PacMissing,
    PacSignatureInvalid,
    PacInvalid(&'static str),

    PreauthRequired,
    PreauthFailed,
    PrincipalUnknown,

    ConfigInvalid(String),
    DerError(der::Error),
    BinRWError(binrw::Error),
    IoError(std::io::Error),
    FromHexError(hex::FromHexError),
}

impl KrbError {
    /// Errors raised by the crypto layer when the ciphertext or key is wrong. These are
    /// terminal and must never be treated as "try another key".
    pub fn is_crypto_failure(&self) -> bool {
        matches!(
            self,
            KrbError::MessageAuthenticationFailed
                | KrbError::InsufficientData
                | KrbError::CtsCiphertextInvalid
                | KrbError::InvalidEncryptionKey
                | KrbError::InvalidHmacKey
        )
    }

    pub fn protocol_error(&self) -> Option<&ErrorReply> {
        match self {
            KrbError::Protocol(reply) => Some(reply),
            _ => None,
        }
    }
}

impl fmt::Display for KrbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KrbError::Asn1Truncated => write!(f, "der value is truncated"),
            KrbError::Asn1LengthOverrun {
                declared,
                available,
            } => write!(
                f,
                "der length {declared} exceeds the {available} bytes available"
            ),
            KrbError::Asn1IndefiniteLength => write!(f, "indefinite length encoding is not der"),
            KrbError::Asn1NonCanonical => write!(f, "non canonical der encoding"),
            KrbError::Asn1TrailingData => write!(f, "trailing data after der value"),
            KrbError::Asn1DepthExceeded => write!(f, "der nesting is too deep"),
            KrbError::Asn1InvalidValue(what) => write!(f, "invalid der value for {what}"),
            KrbError::UnexpectedTag { expected, actual } => {
                write!(f, "Expected {expected} but found {actual}")
            }
            KrbError::MissingField { structure, field } => {
                write!(f, "{structure} is missing required field {field}")
            }
            KrbError::InvalidPvno => write!(f, "protocol version number is not 5"),
            KrbError::InvalidMessageType => write!(f, "message type does not match its tag"),
            KrbError::UnsupportedMechanism(mech) => {
                write!(f, "mechanism not supported: {mech}")
            }
            KrbError::UnsupportedEncryption(etype) => {
                write!(f, "unsupported encryption type {etype}")
            }
            KrbError::UnsupportedChecksum(ctype) => write!(f, "unsupported checksum type {ctype}"),
            KrbError::PlatformNotSupported(name) => {
                write!(f, "platform not supported: {name} is unavailable on this host")
            }
            KrbError::MessageAuthenticationFailed => write!(f, "message authentication failed"),
            KrbError::InsufficientData => write!(f, "ciphertext is too short"),
            KrbError::CtsCiphertextInvalid => write!(f, "cts ciphertext is invalid"),
            KrbError::InvalidEncryptionKey => write!(f, "encryption key is invalid"),
            KrbError::InvalidHmacKey => write!(f, "hmac key is invalid"),
            KrbError::PreauthInvalidS2KParams => write!(f, "invalid string to key parameters"),
            KrbError::KeyAgreementInvalid => write!(f, "key agreement public value is invalid"),
            KrbError::ChecksumMismatch => write!(f, "checksum does not match"),
            KrbError::KeyNotFound { etype, kvno } => match kvno {
                Some(kvno) => write!(f, "no key for encryption type {etype} and kvno {kvno}"),
                None => write!(f, "no key for encryption type {etype}"),
            },
            KrbError::MutualAuthFailed => write!(f, "mutual authentication failed"),
            KrbError::Protocol(reply) => write!(f, "kdc returned {reply}"),
            KrbError::Transport => write!(f, "could not complete request"),
            KrbError::RequestTooLarge => write!(f, "request exceeds the maximum size"),
            KrbError::RealmNotFound => write!(f, "realm not found"),
            KrbError::TicketExpired => write!(f, "ticket expired"),
            KrbError::TicketNotYetValid => write!(f, "ticket not yet valid"),
            KrbError::ClockSkew => write!(f, "clock skew too great"),
            KrbError::ReplayDetected => write!(f, "request is a replay"),
            KrbError::ClientPrincipalMismatch => {
                write!(f, "authenticator client does not match the ticket")
            }
            KrbError::RealmMismatch => write!(f, "authenticator realm does not match the ticket"),
            KrbError::PacMissing => write!(f, "ticket carries no pac"),
            KrbError::PacSignatureInvalid => write!(f, "pac signature is invalid"),
            KrbError::PacInvalid(what) => write!(f, "pac is invalid: {what}"),
            KrbError::PreauthRequired => write!(f, "pre-authentication required"),
            KrbError::PreauthFailed => write!(f, "pre-authentication failed"),
            KrbError::PrincipalUnknown => write!(f, "principal unknown"),
            KrbError::ConfigInvalid(msg) => write!(f, "invalid configuration: {msg}"),
            KrbError::DerError(err) => write!(f, "der error: {err}"),
            KrbError::BinRWError(err) => write!(f, "binary record error: {err}"),
            KrbError::IoError(err) => write!(f, "io error: {err}"),
            KrbError::FromHexError(err) => write!(f, "hex error: {err}"),
        }
    }
}

impl std::error::Error for KrbError {}

impl From<der::Error> for KrbError {
    fn from(value: der::Error) -> Self {
        KrbError::DerError(value)
    }
}

impl From<binrw::Error> for KrbError {
    fn from(value: binrw::Error) -> Self {
        KrbError::BinRWError(value)
    }
}

impl From<std::io::Error> for KrbError {
    fn from(value: std::io::Error) -> Self {
        KrbError::IoError(value)
    }
}

impl From<hex::FromHexError> for KrbError {
    fn from(value: hex::FromHexError) -> Self {
        KrbError::FromHexError(value)
    }
}
