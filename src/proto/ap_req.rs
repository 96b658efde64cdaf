use super::{split_micros, Name};
use crate::asn1::ap_options::ApOptions;
use crate::asn1::ap_rep::{ApRep, EncApRepPart};
use crate::asn1::ap_req::ApReq;
use crate::asn1::authenticator::Authenticator;
use crate::asn1::checksum::Checksum;
use crate::asn1::constants::key_usage;
use crate::asn1::encrypted_data::EncryptedData;
use crate::asn1::gssapi::{KerberosGssToken, KerberosTokenId};
use crate::asn1::tagged_ticket::Ticket;
use crate::asn1::Asn1Entity;
use crate::crypto::{CryptoKey, CryptoRegistry};
use crate::error::KrbError;
use std::time::SystemTime;
use tracing::{error, trace};

/// Builds the AP-REQ a client presents to a service, or inside PA-TGS-REQ to the KDC.
pub struct ApReqBuilder {
    client: Name,
    ticket: Ticket,
    session_key: CryptoKey,
    ctime: SystemTime,
    options: ApOptions,
    checksum: Option<Checksum>,
    subkey: Option<CryptoKey>,
    seq_number: Option<u32>,
    usage: i32,
}

impl ApReqBuilder {
    pub fn new(client: Name, ticket: Ticket, session_key: CryptoKey) -> Self {
        ApReqBuilder {
            client,
            ticket,
            session_key,
            ctime: SystemTime::now(),
            options: ApOptions::none(),
            checksum: None,
            subkey: None,
            seq_number: None,
            usage: key_usage::AP_REQ_AUTHENTICATOR,
        }
    }

    pub fn ctime(mut self, ctime: SystemTime) -> Self {
        self.ctime = ctime;
        self
    }

    /// Ask the service to prove it could read the ticket with an AP-REP.
    pub fn mutual_required(mut self) -> Self {
        self.options = self.options | ApOptions::MutualRequired;
        self
    }

    pub fn checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    pub fn subkey(mut self, subkey: CryptoKey) -> Self {
        self.subkey = Some(subkey);
        self
    }

    pub fn seq_number(mut self, seq_number: u32) -> Self {
        self.seq_number = Some(seq_number);
        self
    }

    /// PA-TGS-REQ authenticators are encrypted under a different key usage.
    pub(crate) fn usage(mut self, usage: i32) -> Self {
        self.usage = usage;
        self
    }

    pub fn build(self, registry: &CryptoRegistry) -> Result<ApReq, KrbError> {
        let (ctime, cusec) = split_micros(self.ctime);
        let authenticator = Authenticator {
            crealm: self.client.realm().to_string(),
            cname: self.client.to_principal_name(),
            cksum: self.checksum,
            cusec,
            ctime,
            subkey: self.subkey.as_ref().map(CryptoKey::to_encryption_key),
            seq_number: self.seq_number,
            authorization_data: None,
        };
        trace!(client = %self.client, usage = self.usage, "encrypting authenticator");

        let plaintext = authenticator.to_der()?;
        let cipher = registry
            .cipher_for(&self.session_key)?
            .encrypt(&self.session_key, self.usage, &plaintext)?;

        Ok(ApReq::new(
            self.options,
            self.ticket,
            EncryptedData {
                etype: self.session_key.etype().into(),
                kvno: None,
                cipher,
            },
        ))
    }

    /// The AP-REQ framed as a GSS-API initial context token.
    pub fn build_gss(self, registry: &CryptoRegistry) -> Result<Vec<u8>, KrbError> {
        let ap_req = self.build(registry)?;
        KerberosGssToken::new(KerberosTokenId::ApReq, ap_req.to_der()?).to_der()
    }
}

/// The service side of mutual authentication: echo the authenticator time back under
/// the session key.
pub struct ApRepBuilder {
    ctime: SystemTime,
    cusec: u32,
    subkey: Option<CryptoKey>,
    seq_number: Option<u32>,
}

impl ApRepBuilder {
    /// `ctime` and `cusec` are taken from the authenticator being answered.
    pub fn new(ctime: SystemTime, cusec: u32) -> Self {
        ApRepBuilder {
            ctime,
            cusec,
            subkey: None,
            seq_number: None,
        }
    }

    pub fn subkey(mut self, subkey: CryptoKey) -> Self {
        self.subkey = Some(subkey);
        self
    }

    pub fn seq_number(mut self, seq_number: u32) -> Self {
        self.seq_number = Some(seq_number);
        self
    }

    pub fn build(
        self,
        registry: &CryptoRegistry,
        session_key: &CryptoKey,
    ) -> Result<ApRep, KrbError> {
        let part = EncApRepPart {
            ctime: split_micros(self.ctime).0,
            cusec: self.cusec,
            subkey: self.subkey.as_ref().map(CryptoKey::to_encryption_key),
            seq_number: self.seq_number,
        };
        let cipher = registry.cipher_for(session_key)?.encrypt(
            session_key,
            key_usage::AP_REP_ENC_PART,
            &part.to_der()?,
        )?;
        Ok(ApRep {
            enc_part: EncryptedData {
                etype: session_key.etype().into(),
                kvno: None,
                cipher,
            },
        })
    }

    /// Client side check of an AP-REP: it must decrypt under the session key and echo
    /// the time the client sent.
    pub fn verify(
        registry: &CryptoRegistry,
        ap_rep: &ApRep,
        session_key: &CryptoKey,
        sent_ctime: SystemTime,
    ) -> Result<EncApRepPart, KrbError> {
        let plaintext = registry.cipher_for(session_key)?.decrypt(
            session_key,
            key_usage::AP_REP_ENC_PART,
            &ap_rep.enc_part.cipher,
        )?;
        let part = EncApRepPart::from_der(&plaintext)?;

        let (ctime, cusec) = split_micros(sent_ctime);
        if part.ctime != ctime || part.cusec != cusec {
            error!("ap-rep does not echo the authenticator time");
            return Err(KrbError::MutualAuthFailed);
        }
        Ok(part)
    }
}
