//! Identify which security mechanism produced a token before any Kerberos decoding or
//! cryptography is attempted. Only Kerberos is accepted; NTLM and NegoEx are recognised
//! so they can be rejected by name.

use crate::asn1::gssapi::{
    InitialContextToken, KerberosGssToken, KerberosTokenId, NegotiationToken, OID_KRB5,
    OID_MS_KRB5, OID_NEGOEX, OID_NTLM, OID_SPNEGO,
};
use crate::error::KrbError;
use der::asn1::ObjectIdentifier;
use tracing::{debug, trace};

const NTLM_SIGNATURE: &[u8] = b"NTLMSSP\0";
const NEGOEX_SIGNATURE: &[u8] = b"NEGOEXTS";

const TAG_GSS_INITIAL_CONTEXT: u8 = 0x60;
const TAG_AP_REQ: u8 = 0x6e;
const TAG_KRB_ERROR: u8 = 0x7e;
const TAG_NEG_TOKEN_RESP: u8 = 0xa1;

pub const MECH_NTLM: &str = "NTLM";
pub const MECH_NEGOEX: &str = "NegoEx";

/// How a Kerberos message arrived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    Raw,
    Gss,
    Spnego,
}

/// A token that carries a Kerberos message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KerberosToken {
    ApReq { framing: Framing, message: Vec<u8> },
    KrbError { framing: Framing, message: Vec<u8> },
}

impl KerberosToken {
    pub fn framing(&self) -> Framing {
        match self {
            KerberosToken::ApReq { framing, .. } | KerberosToken::KrbError { framing, .. } => {
                *framing
            }
        }
    }

    fn wrapped(self, framing: Framing) -> Self {
        match self {
            KerberosToken::ApReq { message, .. } => KerberosToken::ApReq { framing, message },
            KerberosToken::KrbError { message, .. } => {
                KerberosToken::KrbError { framing, message }
            }
        }
    }
}

/// The display name of a mechanism OID.
pub fn mechanism_name(oid: &ObjectIdentifier) -> String {
    match *oid {
        OID_NTLM => MECH_NTLM.to_string(),
        OID_NEGOEX => MECH_NEGOEX.to_string(),
        OID_KRB5 | OID_MS_KRB5 => "Kerberos".to_string(),
        OID_SPNEGO => "SPNEGO".to_string(),
        other => other.to_string(),
    }
}

/// Classify `token`, unwrapping GSS-API and SPNEGO framing down to the Kerberos message.
pub fn detect(token: &[u8]) -> Result<KerberosToken, KrbError> {
    detect_framed(token, false)
}

fn detect_framed(token: &[u8], inside_spnego: bool) -> Result<KerberosToken, KrbError> {
    if token.starts_with(NTLM_SIGNATURE) {
        debug!("ntlm token rejected");
        return Err(KrbError::UnsupportedMechanism(MECH_NTLM.to_string()));
    }
    if token.starts_with(NEGOEX_SIGNATURE) {
        debug!("negoex token rejected");
        return Err(KrbError::UnsupportedMechanism(MECH_NEGOEX.to_string()));
    }

    match token.first() {
        None => Err(KrbError::Asn1Truncated),
        Some(&TAG_AP_REQ) => Ok(KerberosToken::ApReq {
            framing: Framing::Raw,
            message: token.to_vec(),
        }),
        Some(&TAG_KRB_ERROR) => Ok(KerberosToken::KrbError {
            framing: Framing::Raw,
            message: token.to_vec(),
        }),
        Some(&TAG_GSS_INITIAL_CONTEXT) => {
            let initial = InitialContextToken::from_der(token)?;
            trace!(mech = %initial.mech, "gss initial context token");
            match initial.mech {
                OID_KRB5 | OID_MS_KRB5 => from_gss(&initial),
                OID_SPNEGO if !inside_spnego => from_spnego(token),
                other => Err(KrbError::UnsupportedMechanism(mechanism_name(&other))),
            }
        }
        Some(&TAG_NEG_TOKEN_RESP) if !inside_spnego => from_spnego(token),
        Some(other) => {
            trace!(first_byte = other, "unrecognised token");
            Err(KrbError::UnsupportedMechanism("unknown".to_string()))
        }
    }
}

fn from_gss(initial: &InitialContextToken) -> Result<KerberosToken, KrbError> {
    let gss = KerberosGssToken::from_initial_context_token(initial)?;
    match gss.token_id {
        KerberosTokenId::ApReq => Ok(KerberosToken::ApReq {
            framing: Framing::Gss,
            message: gss.message,
        }),
        KerberosTokenId::Error => Ok(KerberosToken::KrbError {
            framing: Framing::Gss,
            message: gss.message,
        }),
        KerberosTokenId::ApRep => Err(KrbError::InvalidMessageType),
    }
}

/// Descend into the SPNEGO mechanism token. With no optimistic token the client's
/// preferred mechanism decides.
fn from_spnego(token: &[u8]) -> Result<KerberosToken, KrbError> {
    let (mech_token, preferred) = match NegotiationToken::from_der(token)? {
        NegotiationToken::Init(init) => (init.mech_token, init.mech_types.first().copied()),
        NegotiationToken::Resp(resp) => (resp.response_token, resp.supported_mech),
    };

    match (mech_token, preferred) {
        (Some(inner), _) => detect_framed(&inner, true).map(|t| t.wrapped(Framing::Spnego)),
        (None, Some(mech)) => Err(KrbError::UnsupportedMechanism(mechanism_name(&mech))),
        (None, None) => Err(KrbError::MissingField {
            structure: "NegTokenInit",
            field: "mechToken",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::{detect, Framing, KerberosToken};
    use crate::asn1::gssapi::{
        InitialContextToken, KerberosGssToken, KerberosTokenId, NegTokenInit, NegotiationToken,
        OID_KRB5, OID_MS_KRB5, OID_NEGOEX, OID_NTLM,
    };
    use crate::error::KrbError;

    const NTLM_NEGOTIATE: &str = "4e544c4d5353500001000000978208e2000000000000000000000000000000000a00614a0000000f";

    fn spnego(mech_types: Vec<der::asn1::ObjectIdentifier>, token: Option<Vec<u8>>) -> Vec<u8> {
        NegotiationToken::Init(NegTokenInit {
            mech_types,
            mech_token: token,
            mech_list_mic: None,
        })
        .to_der()
        .expect("encode")
    }

    fn unsupported(result: Result<KerberosToken, KrbError>) -> String {
        match result {
            Err(KrbError::UnsupportedMechanism(name)) => name,
            other => unreachable!("expected unsupported mechanism, got {other:?}"),
        }
    }

    #[test]
    fn ntlm_rejected() {
        let ntlm = hex::decode(NTLM_NEGOTIATE).expect("hex");
        assert_eq!(unsupported(detect(&ntlm)), "NTLM");

        let wrapped = spnego(vec![OID_NTLM], Some(ntlm));
        let err = detect(&wrapped).expect_err("spnego ntlm");
        assert!(err.to_string().contains("NTLM"));

        // No optimistic token, NTLM preferred.
        assert_eq!(unsupported(detect(&spnego(vec![OID_NTLM, OID_KRB5], None))), "NTLM");

        let gss_ntlm = InitialContextToken {
            mech: OID_NTLM,
            inner: vec![0x00],
        }
        .to_der()
        .expect("encode");
        assert_eq!(unsupported(detect(&gss_ntlm)), "NTLM");
    }

    #[test]
    fn negoex_rejected() {
        assert_eq!(unsupported(detect(b"NEGOEXTS\x00\x00\x00\x00")), "NegoEx");
        assert_eq!(unsupported(detect(&spnego(vec![OID_NEGOEX], None))), "NegoEx");
    }

    #[test]
    fn kerberos_framings() {
        let ap_req = vec![0x6e, 0x00];
        assert_eq!(
            detect(&ap_req).expect("raw"),
            KerberosToken::ApReq {
                framing: Framing::Raw,
                message: ap_req.clone()
            }
        );

        let gss = KerberosGssToken::new(KerberosTokenId::ApReq, ap_req.clone())
            .to_der()
            .expect("encode");
        let token = detect(&gss).expect("gss");
        assert_eq!(token.framing(), Framing::Gss);

        let wrapped = spnego(vec![OID_MS_KRB5, OID_KRB5, OID_NTLM], Some(gss));
        assert_eq!(
            detect(&wrapped).expect("spnego"),
            KerberosToken::ApReq {
                framing: Framing::Spnego,
                message: ap_req
            }
        );

        let error = KerberosGssToken::new(KerberosTokenId::Error, vec![0x7e, 0x00])
            .to_der()
            .expect("encode");
        assert!(matches!(
            detect(&error).expect("error"),
            KerberosToken::KrbError { .. }
        ));
    }

    #[test]
    fn nested_spnego_and_garbage() {
        let inner = spnego(vec![OID_KRB5], Some(vec![0x6e, 0x00]));
        let outer = spnego(vec![super::OID_SPNEGO], Some(inner));
        assert!(detect(&outer).is_err());

        assert_eq!(unsupported(detect(&[0x30, 0x00])), "unknown");
        assert!(matches!(detect(&[]), Err(KrbError::Asn1Truncated)));
    }
}
