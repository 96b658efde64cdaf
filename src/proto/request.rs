use super::ticket::decrypt_ticket;
use super::{random_nonce, split_micros, time_distance, ApReqBuilder, Name};
use crate::asn1::ap_req::ApReq;
use crate::asn1::authenticator::Authenticator;
use crate::asn1::checksum::Checksum;
use crate::asn1::constants::{key_usage, EncryptionType, KrbMessageType, PaDataType};
use crate::asn1::element::{Element, Tag};
use crate::asn1::enc_ticket_part::EncTicketPart;
use crate::asn1::encrypted_data::EncryptedData;
use crate::asn1::kdc_options::KdcOptions;
use crate::asn1::kdc_req::KdcReq;
use crate::asn1::kdc_req_body::KdcReqBody;
use crate::asn1::pa_data::PaData;
use crate::asn1::pa_enc_ts_enc::PaEncTsEnc;
use crate::asn1::pa_pac_request::PaPacRequest;
use crate::asn1::tagged_ticket::Ticket;
use crate::asn1::Asn1Entity;
use crate::crypto::{CryptoKey, CryptoRegistry};
use crate::error::KrbError;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, trace};

/// The etypes offered when the caller does not choose, strongest first.
const DEFAULT_ETYPES: [EncryptionType; 3] = [
    EncryptionType::AES256_CTS_HMAC_SHA1_96,
    EncryptionType::AES128_CTS_HMAC_SHA1_96,
    EncryptionType::RC4_HMAC,
];

#[derive(Debug, Clone)]
pub enum KerberosRequest {
    AS(Box<AuthenticationRequest>),
    TGS(Box<TicketGrantRequest>),
}

/// An AS-REQ.
#[derive(Debug, Clone)]
pub struct AuthenticationRequest {
    pub client_name: Name,
    pub service_name: Name,
    pub from: Option<SystemTime>,
    pub until: SystemTime,
    pub renew: Option<SystemTime>,
    pub nonce: u32,
    pub etypes: Vec<i32>,
    pub kdc_options: KdcOptions,
    pub padata: Vec<PaData>,
}

/// A TGS-REQ. The body is kept as received since the authenticator checksum covers
/// those exact bytes.
#[derive(Debug, Clone)]
pub struct TicketGrantRequest {
    pub service_name: Name,
    pub ap_req: ApReq,
    pub padata: Vec<PaData>,
    req_body: KdcReqBody,
    req_body_der: Vec<u8>,
}

/// A TGS-REQ whose TGT and authenticator have been decrypted and checked.
#[derive(Debug)]
pub struct VerifiedTicketGrant {
    pub client: Name,
    pub tgt: EncTicketPart,
    pub session_key: CryptoKey,
    pub authenticator: Authenticator,
}

pub struct AuthenticationRequestBuilder {
    client_name: Name,
    service_name: Name,
    from: Option<SystemTime>,
    until: SystemTime,
    renew: Option<SystemTime>,
    etypes: Vec<i32>,
    kdc_options: KdcOptions,
    padata: Vec<PaData>,
}

pub struct TicketGrantRequestBuilder {
    client_name: Name,
    service_name: Name,
    tgt: Ticket,
    session_key: CryptoKey,
    from: Option<SystemTime>,
    until: SystemTime,
    renew: Option<SystemTime>,
    etypes: Vec<i32>,
    kdc_options: KdcOptions,
    now: Option<SystemTime>,
}

impl KerberosRequest {
    pub fn build_as(
        client_name: &Name,
        service_name: Name,
        until: SystemTime,
    ) -> AuthenticationRequestBuilder {
        AuthenticationRequestBuilder {
            client_name: client_name.clone(),
            service_name,
            from: None,
            until,
            renew: None,
            etypes: DEFAULT_ETYPES.iter().map(|e| i32::from(*e)).collect(),
            kdc_options: KdcOptions::Forwardable | KdcOptions::Renewable,
            padata: Vec::new(),
        }
    }

    /// Request a ticket for `service_name` with a TGT and its session key.
    pub fn build_tgs(
        client_name: &Name,
        service_name: Name,
        until: SystemTime,
        tgt: Ticket,
        session_key: CryptoKey,
    ) -> TicketGrantRequestBuilder {
        TicketGrantRequestBuilder {
            client_name: client_name.clone(),
            service_name,
            tgt,
            session_key,
            from: None,
            until,
            renew: None,
            etypes: DEFAULT_ETYPES.iter().map(|e| i32::from(*e)).collect(),
            kdc_options: KdcOptions::Forwardable | KdcOptions::Canonicalize,
            now: None,
        }
    }

    /// The realm the request is addressed to.
    pub fn realm(&self) -> &str {
        match self {
            KerberosRequest::AS(req) => req.service_name.realm(),
            KerberosRequest::TGS(req) => req.service_name.realm(),
        }
    }

    pub fn from_der(data: &[u8]) -> Result<Self, KrbError> {
        let element = Element::from_der(data)?;
        let kdc_req = KdcReq::decode(&element)?;

        match kdc_req.msg_type {
            KrbMessageType::KrbAsReq => {
                AuthenticationRequest::from_kdc_req(kdc_req).map(|r| KerberosRequest::AS(Box::new(r)))
            }
            KrbMessageType::KrbTgsReq => {
                let req_body_der = raw_req_body(&element)?;
                TicketGrantRequest::from_kdc_req(kdc_req, req_body_der)
                    .map(|r| KerberosRequest::TGS(Box::new(r)))
            }
            _ => Err(KrbError::InvalidMessageType),
        }
    }

    pub fn to_der(&self) -> Result<Vec<u8>, KrbError> {
        match self {
            KerberosRequest::AS(req) => req.to_kdc_req().to_der(),
            KerberosRequest::TGS(req) => {
                let kdc_req = KdcReq {
                    msg_type: KrbMessageType::KrbTgsReq,
                    padata: Some(req.all_padata()?),
                    req_body: req.req_body.clone(),
                };
                kdc_req.to_der()
            }
        }
    }
}

/// The bytes of the `[4] req-body` member exactly as they appeared on the wire.
fn raw_req_body(element: &Element) -> Result<Vec<u8>, KrbError> {
    element
        .inner()?
        .as_sequence()?
        .iter()
        .find(|child| child.tag() == Tag::context(4))
        .ok_or(KrbError::MissingField {
            structure: "KDC-REQ",
            field: "req-body",
        })?
        .inner()?
        .to_der()
}

fn service_name_from_body(body: &KdcReqBody) -> Result<Name, KrbError> {
    let sname = body.sname.as_ref().ok_or(KrbError::MissingField {
        structure: "KDC-REQ-BODY",
        field: "sname",
    })?;
    Name::from_principal_name(sname, &body.realm)
}

impl AuthenticationRequest {
    fn from_kdc_req(req: KdcReq) -> Result<Self, KrbError> {
        let body = req.req_body;
        let cname = body.cname.as_ref().ok_or(KrbError::MissingField {
            structure: "KDC-REQ-BODY",
            field: "cname",
        })?;
        let client_name = Name::from_principal_name(cname, &body.realm)?;
        let service_name = service_name_from_body(&body)?;

        Ok(AuthenticationRequest {
            client_name,
            service_name,
            from: body.from,
            until: body.till,
            renew: body.rtime,
            nonce: body.nonce,
            etypes: body.etype,
            kdc_options: body.kdc_options,
            padata: req.padata.unwrap_or_default(),
        })
    }

    fn to_kdc_req(&self) -> KdcReq {
        KdcReq {
            msg_type: KrbMessageType::KrbAsReq,
            padata: if self.padata.is_empty() {
                None
            } else {
                Some(self.padata.clone())
            },
            req_body: KdcReqBody {
                kdc_options: self.kdc_options,
                cname: Some(self.client_name.to_principal_name()),
                realm: self.client_name.realm().to_string(),
                sname: Some(self.service_name.to_principal_name()),
                from: self.from,
                till: self.until,
                rtime: self.renew,
                nonce: self.nonce,
                etype: self.etypes.clone(),
                addresses: None,
                enc_authorization_data: None,
                additional_tickets: None,
            },
        }
    }

    fn find_padata(&self, padata_type: PaDataType) -> Option<&PaData> {
        self.padata.iter().find(|pa| pa.is(padata_type))
    }

    pub fn enc_timestamp(&self) -> Result<Option<EncryptedData>, KrbError> {
        self.find_padata(PaDataType::PaEncTimestamp)
            .map(|pa| EncryptedData::from_der(&pa.padata_value))
            .transpose()
    }

    /// The client's PA-PAC-REQUEST choice, if it made one.
    pub fn include_pac(&self) -> Result<Option<bool>, KrbError> {
        self.find_padata(PaDataType::PaPacRequest)
            .map(|pa| PaPacRequest::from_der(&pa.padata_value).map(|req| req.include_pac))
            .transpose()
    }

    /// Decrypt PA-ENC-TIMESTAMP with the client's long term key.
    pub fn decrypt_enc_timestamp(
        &self,
        registry: &CryptoRegistry,
        key: &CryptoKey,
    ) -> Result<Option<PaEncTsEnc>, KrbError> {
        let Some(enc_ts) = self.enc_timestamp()? else {
            return Ok(None);
        };
        if enc_ts.etype != i32::from(key.etype()) {
            return Err(KrbError::KeyNotFound {
                etype: enc_ts.etype,
                kvno: enc_ts.kvno,
            });
        }
        let plaintext = registry.cipher_for(key)?.decrypt(
            key,
            key_usage::AS_REQ_PA_ENC_TIMESTAMP,
            &enc_ts.cipher,
        )?;
        PaEncTsEnc::from_der(&plaintext).map(Some)
    }
}

impl AuthenticationRequestBuilder {
    pub fn from(mut self, from: Option<SystemTime>) -> Self {
        self.from = from;
        self
    }

    pub fn renew_until(mut self, renew: Option<SystemTime>) -> Self {
        self.renew = renew;
        self
    }

    pub fn etypes(mut self, etypes: &[EncryptionType]) -> Self {
        self.etypes = etypes.iter().map(|e| i32::from(*e)).collect();
        self
    }

    pub fn kdc_options(mut self, kdc_options: KdcOptions) -> Self {
        self.kdc_options = kdc_options;
        self
    }

    /// Add PA-ENC-TIMESTAMP, proving knowledge of `key` at time `now`.
    pub fn preauth_enc_ts(
        mut self,
        registry: &CryptoRegistry,
        key: &CryptoKey,
        now: SystemTime,
    ) -> Result<Self, KrbError> {
        let (patimestamp, pausec) = split_micros(now);
        let plaintext = PaEncTsEnc {
            patimestamp,
            pausec: Some(pausec),
        }
        .to_der()?;

        let cipher = registry.cipher_for(key)?.encrypt(
            key,
            key_usage::AS_REQ_PA_ENC_TIMESTAMP,
            &plaintext,
        )?;
        let enc_ts = EncryptedData {
            etype: key.etype().into(),
            kvno: None,
            cipher,
        };

        self.padata.push(PaData::new(
            PaDataType::PaEncTimestamp,
            enc_ts.to_der()?,
        ));
        Ok(self)
    }

    /// Add PA-PAC-REQUEST (MS-KILE 2.2.3).
    pub fn include_pac(mut self, include_pac: bool) -> Result<Self, KrbError> {
        self.padata.push(PaData::new(
            PaDataType::PaPacRequest,
            PaPacRequest { include_pac }.to_der()?,
        ));
        Ok(self)
    }

    pub fn build(self) -> KerberosRequest {
        KerberosRequest::AS(Box::new(AuthenticationRequest {
            client_name: self.client_name,
            service_name: self.service_name,
            from: self.from,
            until: self.until,
            renew: self.renew,
            nonce: random_nonce(),
            etypes: self.etypes,
            kdc_options: self.kdc_options,
            padata: self.padata,
        }))
    }
}

impl TicketGrantRequest {
    fn from_kdc_req(req: KdcReq, req_body_der: Vec<u8>) -> Result<Self, KrbError> {
        let service_name = service_name_from_body(&req.req_body)?;

        let mut ap_req = None;
        let mut padata = Vec::new();
        for pa in req.padata.unwrap_or_default() {
            if pa.is(PaDataType::PaTgsReq) && ap_req.is_none() {
                ap_req = Some(ApReq::from_der(&pa.padata_value)?);
            } else {
                padata.push(pa);
            }
        }
        let ap_req = ap_req.ok_or_else(|| {
            error!("tgs-req carries no pa-tgs-req");
            KrbError::MissingField {
                structure: "TGS-REQ",
                field: "PA-TGS-REQ",
            }
        })?;

        Ok(TicketGrantRequest {
            service_name,
            ap_req,
            padata,
            req_body: req.req_body,
            req_body_der,
        })
    }

    fn all_padata(&self) -> Result<Vec<PaData>, KrbError> {
        let mut padata = vec![PaData::new(PaDataType::PaTgsReq, self.ap_req.to_der()?)];
        padata.extend(self.padata.iter().cloned());
        Ok(padata)
    }

    pub fn req_body(&self) -> &KdcReqBody {
        &self.req_body
    }

    pub fn nonce(&self) -> u32 {
        self.req_body.nonce
    }

    pub fn until(&self) -> SystemTime {
        self.req_body.till
    }

    pub fn renew(&self) -> Option<SystemTime> {
        self.req_body.rtime
    }

    pub fn etypes(&self) -> &[i32] {
        &self.req_body.etype
    }

    /// Decrypt the TGT with the realm's krbtgt key, then check the authenticator and the
    /// checksum it carries over the request body.
    pub fn verify(
        &self,
        registry: &CryptoRegistry,
        krbtgt_key: &CryptoKey,
        now: SystemTime,
        clock_skew: Duration,
    ) -> Result<VerifiedTicketGrant, KrbError> {
        let tgt = &self.ap_req.ticket;
        let tgt_name = Name::from_principal_name(&tgt.sname, &tgt.realm)?;
        if !tgt_name.is_service_krbtgt(self.service_name.realm()) {
            error!(%tgt_name, "pa-tgs-req ticket is not a tgt for this realm");
            return Err(KrbError::RealmMismatch);
        }

        let enc_tgt = decrypt_ticket(registry, tgt, krbtgt_key)?;
        let session_key = CryptoKey::from_encryption_key(&enc_tgt.key)?;

        let plaintext = registry.cipher_for(&session_key)?.decrypt(
            &session_key,
            key_usage::TGS_REQ_AUTHENTICATOR,
            &self.ap_req.authenticator.cipher,
        )?;
        let authenticator = Authenticator::from_der(&plaintext)?;

        if authenticator.cname != enc_tgt.cname || authenticator.crealm != enc_tgt.crealm {
            error!("authenticator client does not match the tgt");
            return Err(KrbError::ClientPrincipalMismatch);
        }

        if time_distance(authenticator.ctime, now) > clock_skew {
            error!(?authenticator.ctime, ?now, "authenticator outside the clock skew");
            return Err(KrbError::ClockSkew);
        }

        if enc_tgt.endtime < now {
            error!(endtime = ?enc_tgt.endtime, "tgt expired");
            return Err(KrbError::TicketExpired);
        }

        let cksum = authenticator.cksum.as_ref().ok_or_else(|| {
            error!("authenticator carries no request body checksum");
            KrbError::ChecksumMismatch
        })?;
        let cipher = registry.cipher_for(&session_key)?;
        if cksum.cksumtype != i32::from(cipher.checksum_type()) {
            error!(cksumtype = cksum.cksumtype, "unexpected checksum type");
            return Err(KrbError::UnsupportedChecksum(cksum.cksumtype));
        }
        cipher.verify_checksum(
            &session_key,
            key_usage::TGS_REQ_AUTH_CKSUM,
            &self.req_body_der,
            &cksum.checksum,
        )?;

        let client = Name::from_principal_name(&enc_tgt.cname, &enc_tgt.crealm)?;
        debug!(%client, service = %self.service_name, "verified tgs-req");

        Ok(VerifiedTicketGrant {
            client,
            tgt: enc_tgt,
            session_key,
            authenticator,
        })
    }
}

impl TicketGrantRequestBuilder {
    pub fn from(mut self, from: Option<SystemTime>) -> Self {
        self.from = from;
        self
    }

    pub fn renew_until(mut self, renew: Option<SystemTime>) -> Self {
        self.renew = renew;
        self
    }

    pub fn etypes(mut self, etypes: &[EncryptionType]) -> Self {
        self.etypes = etypes.iter().map(|e| i32::from(*e)).collect();
        self
    }

    /// The authenticator time, defaults to now.
    pub fn now(mut self, now: SystemTime) -> Self {
        self.now = Some(now);
        self
    }

    pub fn build(self, registry: &CryptoRegistry) -> Result<KerberosRequest, KrbError> {
        let req_body = KdcReqBody {
            kdc_options: self.kdc_options,
            cname: None,
            realm: self.service_name.realm().to_string(),
            sname: Some(self.service_name.to_principal_name()),
            from: self.from,
            till: self.until,
            rtime: self.renew,
            nonce: random_nonce(),
            etype: self.etypes,
            addresses: None,
            enc_authorization_data: None,
            additional_tickets: None,
        };
        let req_body_der = req_body.to_der()?;

        let cipher = registry.cipher_for(&self.session_key)?;
        let checksum = Checksum {
            cksumtype: cipher.checksum_type().into(),
            checksum: cipher.checksum(
                &self.session_key,
                key_usage::TGS_REQ_AUTH_CKSUM,
                &req_body_der,
            )?,
        };
        trace!(service = %self.service_name, "built tgs-req body checksum");

        let ap_req = ApReqBuilder::new(self.client_name, self.tgt, self.session_key)
            .ctime(self.now.unwrap_or_else(SystemTime::now))
            .checksum(checksum)
            .usage(key_usage::TGS_REQ_AUTHENTICATOR)
            .build(registry)?;

        Ok(KerberosRequest::TGS(Box::new(TicketGrantRequest {
            service_name: self.service_name,
            ap_req,
            padata: Vec::new(),
            req_body,
            req_body_der,
        })))
    }
}
