//! GSS-API token framing (RFC 2743 section 3.1, RFC 4121 section 4.1) and the SPNEGO
//! negotiation tokens (RFC 4178) that carry Kerberos messages between applications.

use super::element::{encode_header, read_tlv, Element, Tag};
use super::{Fields, SequenceBuilder};
use crate::error::KrbError;
use der::asn1::ObjectIdentifier;
use tracing::trace;

pub const OID_SPNEGO: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.5.5.2");
pub const OID_KRB5: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.113554.1.2.2");
/// Windows 2000 era clients advertise Kerberos under this truncated OID.
pub const OID_MS_KRB5: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.48018.1.2.2");
pub const OID_NTLM: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.2.2.10");
pub const OID_NEGOEX: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.3.6.1.4.1.311.2.2.30");

const INITIAL_CONTEXT_TOKEN_TAG: u32 = 0;

/// ```text
/// InitialContextToken ::= [APPLICATION 0] IMPLICIT SEQUENCE {
///         thisMech          MechType,
///         innerContextToken ANY DEFINED BY thisMech
/// }
/// ```
///
/// The inner token is not necessarily DER (Kerberos prefixes it with a two byte token
/// id), so it is kept as raw octets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitialContextToken {
    pub mech: ObjectIdentifier,
    pub inner: Vec<u8>,
}

impl InitialContextToken {
    pub fn from_der(data: &[u8]) -> Result<Self, KrbError> {
        let (tag, content, rest) = read_tlv(data)?;
        if tag != Tag::application(INITIAL_CONTEXT_TOKEN_TAG) {
            return Err(KrbError::UnexpectedTag {
                expected: Tag::application(INITIAL_CONTEXT_TOKEN_TAG),
                actual: tag,
            });
        }
        if !rest.is_empty() {
            return Err(KrbError::Asn1TrailingData);
        }

        let (mech, inner) = Element::from_der_partial(content)?;
        let mech = mech.as_oid()?;
        trace!(%mech, inner_len = inner.len(), "decoded gss initial context token");

        Ok(InitialContextToken {
            mech,
            inner: inner.to_vec(),
        })
    }

    pub fn to_der(&self) -> Result<Vec<u8>, KrbError> {
        let mut content = Element::oid(&self.mech).to_der()?;
        content.extend_from_slice(&self.inner);

        let mut out = Vec::with_capacity(content.len() + 6);
        encode_header(
            Tag::application(INITIAL_CONTEXT_TOKEN_TAG),
            content.len(),
            &mut out,
        )?;
        out.extend_from_slice(&content);
        Ok(out)
    }
}

/// The two byte TOK_ID that precedes a Kerberos message inside a GSS token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KerberosTokenId {
    ApReq,
    ApRep,
    Error,
}

impl KerberosTokenId {
    pub fn bytes(self) -> [u8; 2] {
        match self {
            KerberosTokenId::ApReq => [0x01, 0x00],
            KerberosTokenId::ApRep => [0x02, 0x00],
            KerberosTokenId::Error => [0x03, 0x00],
        }
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, KrbError> {
        match bytes {
            [0x01, 0x00] => Ok(KerberosTokenId::ApReq),
            [0x02, 0x00] => Ok(KerberosTokenId::ApRep),
            [0x03, 0x00] => Ok(KerberosTokenId::Error),
            _ => Err(KrbError::Asn1InvalidValue("kerberos token id")),
        }
    }
}

/// A Kerberos message framed for GSS-API use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KerberosGssToken {
    pub token_id: KerberosTokenId,
    /// The DER encoded AP-REQ, AP-REP or KRB-ERROR.
    pub message: Vec<u8>,
}

impl KerberosGssToken {
    pub fn new(token_id: KerberosTokenId, message: Vec<u8>) -> Self {
        KerberosGssToken { token_id, message }
    }

    /// Unwrap a Kerberos mechanism token. Both the registered and the legacy Microsoft
    /// Kerberos OIDs are accepted.
    pub fn from_initial_context_token(token: &InitialContextToken) -> Result<Self, KrbError> {
        if token.mech != OID_KRB5 && token.mech != OID_MS_KRB5 {
            return Err(KrbError::UnsupportedMechanism(token.mech.to_string()));
        }
        if token.inner.len() < 2 {
            return Err(KrbError::Asn1Truncated);
        }
        let (id, message) = token.inner.split_at(2);
        Ok(KerberosGssToken {
            token_id: KerberosTokenId::from_bytes(id)?,
            message: message.to_vec(),
        })
    }

    pub fn from_der(data: &[u8]) -> Result<Self, KrbError> {
        Self::from_initial_context_token(&InitialContextToken::from_der(data)?)
    }

    pub fn to_initial_context_token(&self) -> InitialContextToken {
        let mut inner = Vec::with_capacity(self.message.len() + 2);
        inner.extend_from_slice(&self.token_id.bytes());
        inner.extend_from_slice(&self.message);
        InitialContextToken {
            mech: OID_KRB5,
            inner,
        }
    }

    pub fn to_der(&self) -> Result<Vec<u8>, KrbError> {
        self.to_initial_context_token().to_der()
    }
}

/// ```text
/// NegTokenInit ::= SEQUENCE {
///         mechTypes       [0] MechTypeList,
///         reqFlags        [1] ContextFlags  OPTIONAL,
///         mechToken       [2] OCTET STRING  OPTIONAL,
///         mechListMIC     [3] OCTET STRING  OPTIONAL,
///         ...
/// }
/// ```
///
/// reqFlags is ignored, as is the negHints field of the Windows NegTokenInit2 variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegTokenInit {
    pub mech_types: Vec<ObjectIdentifier>,
    pub mech_token: Option<Vec<u8>>,
    pub mech_list_mic: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegState {
    AcceptCompleted,
    AcceptIncomplete,
    Reject,
    RequestMic,
}

impl NegState {
    fn from_value(value: i64) -> Result<Self, KrbError> {
        match value {
            0 => Ok(NegState::AcceptCompleted),
            1 => Ok(NegState::AcceptIncomplete),
            2 => Ok(NegState::Reject),
            3 => Ok(NegState::RequestMic),
            _ => Err(KrbError::Asn1InvalidValue("negState")),
        }
    }

    fn value(self) -> i64 {
        match self {
            NegState::AcceptCompleted => 0,
            NegState::AcceptIncomplete => 1,
            NegState::Reject => 2,
            NegState::RequestMic => 3,
        }
    }
}

/// ```text
/// NegTokenResp ::= SEQUENCE {
///         negState       [0] ENUMERATED OPTIONAL,
///         supportedMech  [1] MechType      OPTIONAL,
///         responseToken  [2] OCTET STRING  OPTIONAL,
///         mechListMIC    [3] OCTET STRING  OPTIONAL,
///         ...
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegTokenResp {
    pub neg_state: Option<NegState>,
    pub supported_mech: Option<ObjectIdentifier>,
    pub response_token: Option<Vec<u8>>,
    pub mech_list_mic: Option<Vec<u8>>,
}

/// ```text
/// NegotiationToken ::= CHOICE {
///         negTokenInit    [0] NegTokenInit,
///         negTokenResp    [1] NegTokenResp
/// }
/// ```
///
/// The initial token travels inside an [`InitialContextToken`] under the SPNEGO OID, the
/// responses are sent bare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NegotiationToken {
    Init(NegTokenInit),
    Resp(NegTokenResp),
}

fn octets(element: &Element) -> Result<Vec<u8>, KrbError> {
    element.as_octets().map(|b| b.to_vec())
}

impl NegotiationToken {
    fn decode_choice(element: &Element) -> Result<Self, KrbError> {
        let tag = element.tag();
        if tag == Tag::context(0) {
            let fields = Fields::decode("NegTokenInit", element.inner()?)?;
            let mech_types = fields
                .required(0, "mechTypes")?
                .as_sequence()?
                .iter()
                .map(Element::as_oid)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(NegotiationToken::Init(NegTokenInit {
                mech_types,
                mech_token: fields.map_optional(2, octets)?,
                mech_list_mic: fields.map_optional(3, octets)?,
            }))
        } else if tag == Tag::context(1) {
            let fields = Fields::decode("NegTokenResp", element.inner()?)?;
            Ok(NegotiationToken::Resp(NegTokenResp {
                neg_state: fields
                    .map_optional(0, Element::as_enumerated)?
                    .map(NegState::from_value)
                    .transpose()?,
                supported_mech: fields.map_optional(1, Element::as_oid)?,
                response_token: fields.map_optional(2, octets)?,
                mech_list_mic: fields.map_optional(3, octets)?,
            }))
        } else {
            Err(KrbError::UnexpectedTag {
                expected: Tag::context(0),
                actual: tag,
            })
        }
    }

    /// Decode either a GSS framed NegTokenInit or a bare NegTokenResp.
    pub fn from_der(data: &[u8]) -> Result<Self, KrbError> {
        let (tag, _, _) = read_tlv(data)?;
        if tag == Tag::application(INITIAL_CONTEXT_TOKEN_TAG) {
            let token = InitialContextToken::from_der(data)?;
            if token.mech != OID_SPNEGO {
                return Err(KrbError::UnsupportedMechanism(token.mech.to_string()));
            }
            Self::decode_choice(&Element::from_der(&token.inner)?)
        } else {
            Self::decode_choice(&Element::from_der(data)?)
        }
    }

    pub fn to_der(&self) -> Result<Vec<u8>, KrbError> {
        match self {
            NegotiationToken::Init(init) => {
                let mech_types = Element::sequence(init.mech_types.iter().map(Element::oid).collect());
                let seq = SequenceBuilder::new()
                    .field(0, mech_types)
                    .optional(2, init.mech_token.as_deref().map(Element::octet_string))
                    .optional(3, init.mech_list_mic.as_deref().map(Element::octet_string))
                    .build();
                InitialContextToken {
                    mech: OID_SPNEGO,
                    inner: Element::explicit(0, seq).to_der()?,
                }
                .to_der()
            }
            NegotiationToken::Resp(resp) => {
                let seq = SequenceBuilder::new()
                    .optional(0, resp.neg_state.map(|s| Element::enumerated(s.value())))
                    .optional(1, resp.supported_mech.as_ref().map(Element::oid))
                    .optional(2, resp.response_token.as_deref().map(Element::octet_string))
                    .optional(3, resp.mech_list_mic.as_deref().map(Element::octet_string))
                    .build();
                Element::explicit(1, seq).to_der()
            }
        }
    }
}
