use super::{ErrorReply, IssuedTicket, Name};
use crate::asn1::constants::{key_usage, KrbErrorCode, KrbMessageType, PaDataType};
use crate::asn1::element::{Element, Tag};
use crate::asn1::enc_kdc_rep_part::EncKdcRepPart;
use crate::asn1::encrypted_data::EncryptedData;
use crate::asn1::etype_info2::{EtypeInfo2, EtypeInfo2Entry};
use crate::asn1::kdc_rep::KdcRep;
use crate::asn1::krb_error::KrbErrorMessage;
use crate::asn1::pa_data::PaData;
use crate::asn1::tagged_ticket::Ticket;
use crate::asn1::Asn1Entity;
use crate::crypto::{CryptoKey, CryptoRegistry};
use crate::error::KrbError;
use std::time::SystemTime;
use tracing::{debug, error, trace};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KerberosReply {
    AS(KdcReply),
    TGS(KdcReply),
    ERR(Box<ErrorReply>),
}

/// An AS-REP or TGS-REP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdcReply {
    rep: KdcRep,
}

impl KerberosReply {
    pub fn from_der(data: &[u8]) -> Result<Self, KrbError> {
        let element = Element::from_der(data)?;
        match element.tag() {
            t if t == Tag::application(KrbMessageType::KrbAsRep.application_tag()) => {
                KdcRep::decode(&element).map(|rep| KerberosReply::AS(KdcReply { rep }))
            }
            t if t == Tag::application(KrbMessageType::KrbTgsRep.application_tag()) => {
                KdcRep::decode(&element).map(|rep| KerberosReply::TGS(KdcReply { rep }))
            }
            t if t == Tag::application(KrbMessageType::KrbError.application_tag()) => {
                KrbErrorMessage::decode(&element)
                    .map(|msg| KerberosReply::ERR(Box::new(ErrorReply::from(msg))))
            }
            actual => {
                trace!(%actual, "unexpected reply tag");
                Err(KrbError::UnexpectedTag {
                    expected: Tag::application(KrbMessageType::KrbAsRep.application_tag()),
                    actual,
                })
            }
        }
    }

    pub fn to_der(&self) -> Result<Vec<u8>, KrbError> {
        match self {
            KerberosReply::AS(reply) | KerberosReply::TGS(reply) => reply.rep.to_der(),
            KerberosReply::ERR(err) => err.message().to_der(),
        }
    }

    /// A KRB-ERROR becomes [`KrbError::Protocol`] so callers can branch on it.
    pub fn into_result(self) -> Result<KdcReply, KrbError> {
        match self {
            KerberosReply::AS(reply) | KerberosReply::TGS(reply) => Ok(reply),
            KerberosReply::ERR(err) => Err(KrbError::Protocol(err)),
        }
    }

    pub fn error(code: KrbErrorCode, service: &Name, text: &str, stime: SystemTime) -> Self {
        KerberosReply::ERR(Box::new(
            ErrorReply::new(code, service, stime).with_text(text),
        ))
    }

    /// KDC_ERR_PREAUTH_REQUIRED listing PA-ENC-TIMESTAMP and the salts the client needs.
    pub fn preauth_required(
        service: &Name,
        client: &Name,
        etype_info2: EtypeInfo2,
        stime: SystemTime,
    ) -> Result<Self, KrbError> {
        let method_data = vec![
            PaData::new(PaDataType::PaEncTimestamp, Vec::new()),
            PaData::new(PaDataType::PaEtypeInfo2, etype_info2.to_der()?),
        ];
        let reply = ErrorReply::new(KrbErrorCode::KdcErrPreauthRequired, service, stime)
            .with_client(client)
            .with_text("pre-authentication required")
            .with_method_data(&method_data)?;
        Ok(KerberosReply::ERR(Box::new(reply)))
    }

    /// Wrap an issued ticket in an AS-REP or TGS-REP, encrypting the reply part with
    /// `reply_key`. The key usage follows the reply type.
    pub fn issue(
        registry: &CryptoRegistry,
        msg_type: KrbMessageType,
        issued: &IssuedTicket,
        nonce: u32,
        reply_key: &CryptoKey,
        padata: Option<Vec<PaData>>,
    ) -> Result<Self, KrbError> {
        let usage = match msg_type {
            KrbMessageType::KrbAsRep => key_usage::AS_REP_ENC_PART,
            KrbMessageType::KrbTgsRep => key_usage::TGS_REP_ENC_PART_SESSION_KEY,
            _ => return Err(KrbError::InvalidMessageType),
        };

        let reply_part = issued.reply_part(msg_type, nonce);
        let cipher =
            registry
                .cipher_for(reply_key)?
                .encrypt(reply_key, usage, &reply_part.to_der()?)?;

        let rep = KdcRep {
            msg_type,
            padata,
            crealm: issued.enc_part.crealm.clone(),
            cname: issued.enc_part.cname.clone(),
            ticket: issued.ticket.clone(),
            enc_part: EncryptedData {
                etype: reply_key.etype().into(),
                kvno: reply_key.kvno(),
                cipher,
            },
        };
        debug!(?msg_type, "built kdc reply");

        Ok(match msg_type {
            KrbMessageType::KrbAsRep => KerberosReply::AS(KdcReply { rep }),
            _ => KerberosReply::TGS(KdcReply { rep }),
        })
    }
}

impl KdcReply {
    pub fn msg_type(&self) -> KrbMessageType {
        self.rep.msg_type
    }

    pub fn client(&self) -> Result<Name, KrbError> {
        Name::from_principal_name(&self.rep.cname, &self.rep.crealm)
    }

    pub fn ticket(&self) -> &Ticket {
        &self.rep.ticket
    }

    pub fn enc_part(&self) -> &EncryptedData {
        &self.rep.enc_part
    }

    pub fn padata(&self) -> &[PaData] {
        self.rep.padata.as_deref().unwrap_or_default()
    }

    pub fn etype_info2(&self) -> Result<Option<EtypeInfo2>, KrbError> {
        self.padata()
            .iter()
            .find(|pa| pa.is(PaDataType::PaEtypeInfo2))
            .map(|pa| EtypeInfo2::from_der(&pa.padata_value))
            .transpose()
    }

    /// Derive the client's long term key for the reply etype. The salt and iteration
    /// count come from ETYPE-INFO2 when the KDC sent it, otherwise the default salt.
    pub fn client_key(
        &self,
        registry: &CryptoRegistry,
        password: &str,
    ) -> Result<CryptoKey, KrbError> {
        let etype = self.rep.enc_part.etype;
        let entry: Option<EtypeInfo2Entry> = self
            .etype_info2()?
            .and_then(|entries| entries.into_iter().find(|e| e.etype == etype));

        let salt = match entry.as_ref().and_then(|e| e.salt.clone()) {
            Some(salt) => salt,
            None => self.client()?.default_salt(),
        };
        let params = entry.as_ref().and_then(|e| e.s2kparams.as_deref());
        registry.string_to_key(etype, password, &salt, params)
    }

    /// Decrypt the reply part. AS-REPs use the client key (usage 3), TGS-REPs the TGT
    /// session key (usage 8).
    pub fn decrypt_enc_part(
        &self,
        registry: &CryptoRegistry,
        key: &CryptoKey,
    ) -> Result<EncKdcRepPart, KrbError> {
        let usage = match self.rep.msg_type {
            KrbMessageType::KrbAsRep => key_usage::AS_REP_ENC_PART,
            _ => key_usage::TGS_REP_ENC_PART_SESSION_KEY,
        };
        self.decrypt_with_usage(registry, key, usage)
    }

    /// Decrypt a TGS-REP that was sealed with the authenticator subkey (usage 9).
    pub fn decrypt_enc_part_with_subkey(
        &self,
        registry: &CryptoRegistry,
        subkey: &CryptoKey,
    ) -> Result<EncKdcRepPart, KrbError> {
        self.decrypt_with_usage(registry, subkey, key_usage::TGS_REP_ENC_PART_SUBKEY)
    }

    fn decrypt_with_usage(
        &self,
        registry: &CryptoRegistry,
        key: &CryptoKey,
        usage: i32,
    ) -> Result<EncKdcRepPart, KrbError> {
        if self.rep.enc_part.etype != i32::from(key.etype()) {
            error!(
                reply_etype = self.rep.enc_part.etype,
                key_etype = %key.etype(),
                "reply is not encrypted with this key type"
            );
            return Err(KrbError::KeyNotFound {
                etype: self.rep.enc_part.etype,
                kvno: self.rep.enc_part.kvno,
            });
        }
        let plaintext = registry
            .cipher_for(key)?
            .decrypt(key, usage, &self.rep.enc_part.cipher)?;
        EncKdcRepPart::from_der(&plaintext)
    }
}

#[cfg(test)]
mod tests {
    use super::KerberosReply;
    use crate::asn1::constants::{EncryptionType, KrbErrorCode, KrbMessageType};
    use crate::asn1::etype_info2::EtypeInfo2Entry;
    use crate::crypto::{CryptoKey, CryptoRegistry};
    use crate::error::KrbError;
    use crate::proto::{Name, ServiceTicketBuilder};
    use std::time::{Duration, UNIX_EPOCH};

    const AS_REP_SAMPLE: &str = "6b8203513082034da003020105a10302010ba22d302b3029a103020113a2220420301e301ca003020112a1151b134558414d504c452e434f4d7465737475736572a30d1b0b4558414d504c452e434f4da4153013a003020101a10c300a1b087465737475736572a58201ba618201b6308201b2a003020105a10d1b0b4558414d504c452e434f4da220301ea003020102a11730151b066b72627467741b0b4558414d504c452e434f4da382017830820174a003020112a103020101a28201660482016297d16c13bbd7fdd8dac58f284e9eea01c1cc89413195aee01d12ab05c5775f701849e25fd416427693cf8cf6567180cb5c9c1bf157521fdf38316c0ddb0a824b60c98056677ace3bcbccd2c82c203aaad8a0e6df44d07c76be2ddb70349a3c23b7b7bc2211c8bcc879a704872cf46d1d650b55f75e487eafdffbae8dc00e9083e9e0b59aa275a4591a7965d5ffb15f8d96d84a9d0a5840ef5d4715f2e99b3cf3cdc961ce416e4d9e49e7a1a617d9199006d07eb886a70a49c1e8e966f99d6939c0d853636081a1ed0b9fdc4971f447cc5aa503092d91f352d451e349bf58a4320aa116d9a30e944402014aee43f51a457c01ae7f3a6863a8df05569ed969edc97f298bf93be1ed85d64914b293e6dc6ebc8229a6aa040ce7c184cf7082ab3b3b3ff53bc4b47b3512e29479b4ffe8508cfcc1f3e5ec6371039bff5b5c78facc9e00a6d818d4b6ea2be680547abbe8bd79e804814699f51fcdc531bb94613dc9923840a682012c30820128a003020112a282011f0482011be5fca41337468155848766f655f34e00f7124a268bbfc79b68d4e949aa466c05a5cdaca4f21f62303e0175b5112b544c9b8dd950c85c58498aaf0e950ac4eecebd56616c192b640bca93298f4c2ed63bef8efe82ed585847ff4af54ae74bf6d2f9103fd99f90b724df57c0f8daea1d5e801c11d49af9671a1a8a4e8be6f86219e22af04b1b2a76c09489ea3b78eda7d0cf791a598f1e238586a0563b5fa690459cc3a8be3ea6c6a1dc539e37e1e055d2473f30d51e2e91bd5387f3be96d58add57057635ed29da77eeb9d111f18416e9eb3ef192e92c39151f171bd9fbeea181ced330bb6d53ef08001db94a0276914c24ecabf7629bea0309748e4b1630a0e36159f8db557d7e2a87eeaa499ea6d8d8a17efa582ca8b1e023d9a8";

    #[test]
    fn decrypt_captured_as_rep() {
        let _ = tracing_subscriber::fmt::try_init();
        let registry = CryptoRegistry::default();
        let blob = hex::decode(AS_REP_SAMPLE).expect("hex");

        let reply = KerberosReply::from_der(&blob)
            .and_then(KerberosReply::into_result)
            .expect("as-rep");
        assert_eq!(reply.msg_type(), KrbMessageType::KrbAsRep);
        assert_eq!(
            reply.client().expect("client"),
            Name::principal("testuser", "EXAMPLE.COM")
        );

        let key = reply.client_key(&registry, "password").expect("key");
        assert_eq!(key.etype(), EncryptionType::AES256_CTS_HMAC_SHA1_96);

        let part = reply.decrypt_enc_part(&registry, &key).expect("decrypt");
        // This KDC answers with an EncTGSRepPart, which clients must accept.
        assert_eq!(part.msg_type, KrbMessageType::KrbTgsRep);
        assert_eq!(part.nonce, 0x56cb16df);
        assert_eq!(part.srealm, "EXAMPLE.COM");
        assert_eq!(part.sname.name_string, vec!["krbtgt", "EXAMPLE.COM"]);
        assert_eq!(part.key.keytype, 18);
        assert!(part.encrypted_pa_data.is_some());

        let wrong = reply.client_key(&registry, "wrong").expect("key");
        assert!(matches!(
            reply.decrypt_enc_part(&registry, &wrong),
            Err(KrbError::MessageAuthenticationFailed)
        ));

        assert_eq!(KerberosReply::AS(reply).to_der().expect("encode"), blob);
    }

    #[test]
    fn krb_error_becomes_protocol_error() {
        let now = UNIX_EPOCH + Duration::from_secs(1_718_192_885);
        let entry = EtypeInfo2Entry {
            etype: 17,
            salt: Some("EXAMPLE.COMtestuser".to_string()),
            s2kparams: None,
        };
        let wire = KerberosReply::preauth_required(
            &Name::service_krbtgt("EXAMPLE.COM"),
            &Name::principal("testuser", "EXAMPLE.COM"),
            vec![entry.clone()],
            now,
        )
        .and_then(|reply| reply.to_der())
        .expect("encode");

        let err = KerberosReply::from_der(&wire)
            .and_then(KerberosReply::into_result)
            .expect_err("must be an error");
        let reply = err.protocol_error().expect("protocol error");
        assert_eq!(reply.code(), Some(KrbErrorCode::KdcErrPreauthRequired));
        assert_eq!(reply.etype_info2().expect("etype info2"), Some(vec![entry]));
    }

    #[test]
    fn issue_tgs_reply() {
        let registry = CryptoRegistry::default();
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let service_key = CryptoKey::new(EncryptionType::RC4_HMAC, vec![0x55; 16]);
        let tgt_session =
            CryptoKey::new(EncryptionType::AES128_CTS_HMAC_SHA1_96, vec![0x56; 16]);

        let issued = ServiceTicketBuilder::new(
            Name::principal("testuser", "EXAMPLE.COM"),
            Name::service("HTTP", "web.example.com", "EXAMPLE.COM"),
            now,
            now + Duration::from_secs(600),
        )
        .build(&registry, &service_key)
        .expect("issue");

        let wire = KerberosReply::issue(
            &registry,
            KrbMessageType::KrbTgsRep,
            &issued,
            1234,
            &tgt_session,
            None,
        )
        .and_then(|reply| reply.to_der())
        .expect("reply");

        let KerberosReply::TGS(reply) = KerberosReply::from_der(&wire).expect("decode") else {
            unreachable!("expected a tgs-rep");
        };
        let part = reply
            .decrypt_enc_part(&registry, &tgt_session)
            .expect("decrypt");
        assert_eq!(part.nonce, 1234);
        assert_eq!(part.key.keytype, 23);

        assert!(matches!(
            reply.decrypt_enc_part_with_subkey(&registry, &tgt_session),
            Err(KrbError::MessageAuthenticationFailed)
        ));
    }

    #[test]
    fn unexpected_top_level_tag() {
        let err = KerberosReply::from_der(&hex::decode("6e00").expect("hex"))
            .expect_err("must fail");
        assert_eq!(err.to_string(), "Expected Application-11 but found Application-14");
    }
}
