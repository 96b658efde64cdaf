use super::{split_micros, Name};
use crate::asn1::authorization_data::AuthorizationData;
use crate::asn1::constants::{key_usage, KrbMessageType};
use crate::asn1::enc_kdc_rep_part::EncKdcRepPart;
use crate::asn1::enc_ticket_part::EncTicketPart;
use crate::asn1::encrypted_data::EncryptedData;
use crate::asn1::last_req::LastReqEntry;
use crate::asn1::tagged_ticket::Ticket;
use crate::asn1::ticket_flags::TicketFlags;
use crate::asn1::transited_encoding::TransitedEncoding;
use crate::asn1::Asn1Entity;
use crate::crypto::{CryptoKey, CryptoRegistry};
use crate::error::KrbError;
use std::time::SystemTime;
use tracing::{debug, error};

/// Issues a ticket for `service` on behalf of `client`.
pub struct ServiceTicketBuilder {
    client: Name,
    service: Name,
    auth_time: SystemTime,
    start_time: Option<SystemTime>,
    end_time: SystemTime,
    renew_until: Option<SystemTime>,
    flags: TicketFlags,
    session_key: Option<CryptoKey>,
    authorization_data: Option<AuthorizationData>,
}

/// A freshly issued ticket along with the cleartext the KDC needs to build its reply.
#[derive(Debug)]
pub struct IssuedTicket {
    pub ticket: Ticket,
    pub session_key: CryptoKey,
    pub enc_part: EncTicketPart,
}

impl ServiceTicketBuilder {
    pub fn new(client: Name, service: Name, auth_time: SystemTime, end_time: SystemTime) -> Self {
        ServiceTicketBuilder {
            client,
            service,
            auth_time,
            start_time: None,
            end_time,
            renew_until: None,
            flags: TicketFlags::none(),
            session_key: None,
            authorization_data: None,
        }
    }

    pub fn start_time(mut self, start_time: Option<SystemTime>) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn renew_until(mut self, renew_until: Option<SystemTime>) -> Self {
        self.renew_until = renew_until;
        self
    }

    pub fn flags(mut self, flags: TicketFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Use this session key rather than generating one of the service key's etype.
    pub fn session_key(mut self, session_key: CryptoKey) -> Self {
        self.session_key = Some(session_key);
        self
    }

    pub fn authorization_data(mut self, authorization_data: AuthorizationData) -> Self {
        self.authorization_data = Some(authorization_data);
        self
    }

    pub fn build(
        self,
        registry: &CryptoRegistry,
        service_key: &CryptoKey,
    ) -> Result<IssuedTicket, KrbError> {
        let session_key = match self.session_key {
            Some(key) => key,
            None => registry
                .key_derivation(service_key.etype().into())?
                .random_key(),
        };

        let enc_part = EncTicketPart {
            flags: self.flags,
            key: session_key.to_encryption_key(),
            crealm: self.client.realm().to_string(),
            cname: self.client.to_principal_name(),
            transited: TransitedEncoding::empty(),
            authtime: split_micros(self.auth_time).0,
            starttime: self.start_time.map(|t| split_micros(t).0),
            endtime: split_micros(self.end_time).0,
            renew_till: self.renew_until.map(|t| split_micros(t).0),
            caddr: None,
            authorization_data: self.authorization_data,
        };

        let plaintext = enc_part.to_der()?;
        let cipher = registry.cipher_for(service_key)?.encrypt(
            service_key,
            key_usage::TICKET_ENC_PART,
            &plaintext,
        )?;

        let ticket = Ticket {
            realm: self.service.realm().to_string(),
            sname: self.service.to_principal_name(),
            enc_part: EncryptedData {
                etype: service_key.etype().into(),
                kvno: service_key.kvno(),
                cipher,
            },
        };

        debug!(client = %self.client, service = %self.service, "issued ticket");

        Ok(IssuedTicket {
            ticket,
            session_key,
            enc_part,
        })
    }
}

impl IssuedTicket {
    /// The EncASRepPart or EncTGSRepPart that hands the session key to the client.
    pub fn reply_part(&self, msg_type: KrbMessageType, nonce: u32) -> EncKdcRepPart {
        EncKdcRepPart {
            msg_type,
            key: self.enc_part.key.clone(),
            last_req: vec![LastReqEntry {
                lr_type: 0,
                lr_value: self.enc_part.authtime,
            }],
            nonce,
            key_expiration: None,
            flags: self.enc_part.flags,
            authtime: self.enc_part.authtime,
            starttime: self.enc_part.starttime,
            endtime: self.enc_part.endtime,
            renew_till: self.enc_part.renew_till,
            srealm: self.ticket.realm.clone(),
            sname: self.ticket.sname.clone(),
            caddr: None,
            encrypted_pa_data: None,
        }
    }
}

/// Decrypt a ticket with the long term key of the service it was issued for.
pub fn decrypt_ticket(
    registry: &CryptoRegistry,
    ticket: &Ticket,
    key: &CryptoKey,
) -> Result<EncTicketPart, KrbError> {
    if ticket.enc_part.etype != i32::from(key.etype()) {
        error!(
            ticket_etype = ticket.enc_part.etype,
            key_etype = %key.etype(),
            "ticket is not encrypted with this key type"
        );
        return Err(KrbError::KeyNotFound {
            etype: ticket.enc_part.etype,
            kvno: ticket.enc_part.kvno,
        });
    }
    let plaintext = registry.cipher_for(key)?.decrypt(
        key,
        key_usage::TICKET_ENC_PART,
        &ticket.enc_part.cipher,
    )?;
    EncTicketPart::from_der(&plaintext)
}

#[cfg(test)]
mod tests {
    use super::{decrypt_ticket, ServiceTicketBuilder};
    use crate::asn1::constants::{EncryptionType, KrbMessageType};
    use crate::asn1::ticket_flags::TicketFlags;
    use crate::crypto::{CryptoKey, CryptoRegistry};
    use crate::error::KrbError;
    use crate::proto::Name;
    use std::time::{Duration, UNIX_EPOCH};

    #[test]
    fn issue_and_decrypt() {
        let registry = CryptoRegistry::default();
        let service_key =
            CryptoKey::new(EncryptionType::AES256_CTS_HMAC_SHA1_96, vec![0x11; 32]).with_kvno(2);
        let auth_time = UNIX_EPOCH + Duration::from_millis(1_718_192_887_751);

        let issued = ServiceTicketBuilder::new(
            Name::principal("testuser", "EXAMPLE.COM"),
            Name::service("HTTP", "web.example.com", "EXAMPLE.COM"),
            auth_time,
            auth_time + Duration::from_secs(3600),
        )
        .flags(TicketFlags::Initial | TicketFlags::PreAuthent)
        .build(&registry, &service_key)
        .expect("issue");

        assert_eq!(issued.ticket.enc_part.kvno, Some(2));
        assert_eq!(issued.ticket.enc_part.etype, 18);
        assert_eq!(issued.ticket.sname.name_string, vec!["HTTP", "web.example.com"]);
        assert_eq!(
            issued.session_key.etype(),
            EncryptionType::AES256_CTS_HMAC_SHA1_96
        );

        let enc_part = decrypt_ticket(&registry, &issued.ticket, &service_key).expect("decrypt");
        assert_eq!(enc_part, issued.enc_part);
        assert_eq!(enc_part.crealm, "EXAMPLE.COM");
        // Kerberos times carry whole seconds.
        assert_eq!(
            enc_part.authtime,
            UNIX_EPOCH + Duration::from_secs(1_718_192_887)
        );

        let reply = issued.reply_part(KrbMessageType::KrbAsRep, 42);
        assert_eq!(reply.nonce, 42);
        assert_eq!(reply.key, enc_part.key);
        assert_eq!(reply.srealm, "EXAMPLE.COM");
    }

    #[test]
    fn wrong_key_type_is_not_tried() {
        let registry = CryptoRegistry::default();
        let service_key = CryptoKey::new(EncryptionType::AES128_CTS_HMAC_SHA1_96, vec![0x22; 16]);
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);

        let issued = ServiceTicketBuilder::new(
            Name::principal("testuser", "EXAMPLE.COM"),
            Name::service_krbtgt("EXAMPLE.COM"),
            now,
            now + Duration::from_secs(60),
        )
        .build(&registry, &service_key)
        .expect("issue");

        let rc4 = CryptoKey::new(EncryptionType::RC4_HMAC, vec![0x22; 16]);
        assert!(matches!(
            decrypt_ticket(&registry, &issued.ticket, &rc4),
            Err(KrbError::KeyNotFound { etype: 17, .. })
        ));

        let wrong = CryptoKey::new(EncryptionType::AES128_CTS_HMAC_SHA1_96, vec![0x23; 16]);
        assert!(matches!(
            decrypt_ticket(&registry, &issued.ticket, &wrong),
            Err(KrbError::MessageAuthenticationFailed)
        ));
    }
}
