use super::constants::KrbMessageType;
use super::element::{Element, Tag};
use super::encrypted_data::EncryptedData;
use super::pa_data::PaData;
use super::principal_name::PrincipalName;
use super::tagged_ticket::Ticket;
use super::{check_header, Asn1Entity, Fields, SequenceBuilder};
use crate::error::KrbError;

/// ```text
/// AS-REP          ::= [APPLICATION 11] KDC-REP
///
/// TGS-REP         ::= [APPLICATION 13] KDC-REP
///
/// KDC-REP         ::= SEQUENCE {
///         pvno            [0] INTEGER (5),
///         msg-type        [1] INTEGER (11 -- AS -- | 13 -- TGS --),
///         padata          [2] SEQUENCE OF PA-DATA OPTIONAL
///                                 -- NOTE: not empty --,
///         crealm          [3] Realm,
///         cname           [4] PrincipalName,
///         ticket          [5] Ticket,
///         enc-part        [6] EncryptedData
///                                 -- EncASRepPart or EncTGSRepPart,
///                                 -- as appropriate
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KdcRep {
    pub msg_type: KrbMessageType,
    pub padata: Option<Vec<PaData>>,
    pub crealm: String,
    pub cname: PrincipalName,
    pub ticket: Ticket,
    pub enc_part: EncryptedData,
}

impl Asn1Entity for KdcRep {
    fn decode(element: &Element) -> Result<Self, KrbError> {
        let msg_type = match element.tag() {
            t if t == Tag::application(11) => KrbMessageType::KrbAsRep,
            t if t == Tag::application(13) => KrbMessageType::KrbTgsRep,
            actual => {
                return Err(KrbError::UnexpectedTag {
                    expected: Tag::application(11),
                    actual,
                })
            }
        };
        let fields = Fields::decode("KDC-REP", element.inner()?)?;
        check_header(&fields, 0, 1, msg_type)?;

        Ok(KdcRep {
            msg_type,
            padata: fields.map_optional(2, Vec::<PaData>::decode)?,
            crealm: fields.required(3, "crealm")?.as_kerberos_string()?,
            cname: PrincipalName::decode(fields.required(4, "cname")?)?,
            ticket: Ticket::decode(fields.required(5, "ticket")?)?,
            enc_part: EncryptedData::decode(fields.required(6, "enc-part")?)?,
        })
    }

    fn encode(&self) -> Result<Element, KrbError> {
        let inner = SequenceBuilder::new()
            .field(0, Element::integer(super::constants::KRB5_PVNO))
            .field(1, Element::integer(i32::from(self.msg_type).into()))
            .optional(2, self.padata.as_ref().map(|p| p.encode()).transpose()?)
            .field(3, Element::kerberos_string(&self.crealm))
            .field(4, self.cname.encode()?)
            .field(5, self.ticket.encode()?)
            .field(6, self.enc_part.encode()?)
            .build();
        Ok(Element::application(self.msg_type.application_tag(), inner))
    }
}

#[cfg(test)]
mod tests {
    use super::KdcRep;
    use crate::asn1::constants::{KrbMessageType, PaDataType};
    use crate::asn1::etype_info2::EtypeInfo2;
    use crate::asn1::Asn1Entity;
    use crate::error::KrbError;

    const AS_REP_SAMPLE: &str = "6b8203513082034da003020105a10302010ba22d302b3029a103020113a2220420301e301ca003020112a1151b134558414d504c452e434f4d7465737475736572a30d1b0b4558414d504c452e434f4da4153013a003020101a10c300a1b087465737475736572a58201ba618201b6308201b2a003020105a10d1b0b4558414d504c452e434f4da220301ea003020102a11730151b066b72627467741b0b4558414d504c452e434f4da382017830820174a003020112a103020101a28201660482016297d16c13bbd7fdd8dac58f284e9eea01c1cc89413195aee01d12ab05c5775f701849e25fd416427693cf8cf6567180cb5c9c1bf157521fdf38316c0ddb0a824b60c98056677ace3bcbccd2c82c203aaad8a0e6df44d07c76be2ddb70349a3c23b7b7bc2211c8bcc879a704872cf46d1d650b55f75e487eafdffbae8dc00e9083e9e0b59aa275a4591a7965d5ffb15f8d96d84a9d0a5840ef5d4715f2e99b3cf3cdc961ce416e4d9e49e7a1a617d9199006d07eb886a70a49c1e8e966f99d6939c0d853636081a1ed0b9fdc4971f447cc5aa503092d91f352d451e349bf58a4320aa116d9a30e944402014aee43f51a457c01ae7f3a6863a8df05569ed969edc97f298bf93be1ed85d64914b293e6dc6ebc8229a6aa040ce7c184cf7082ab3b3b3ff53bc4b47b3512e29479b4ffe8508cfcc1f3e5ec6371039bff5b5c78facc9e00a6d818d4b6ea2be680547abbe8bd79e804814699f51fcdc531bb94613dc9923840a682012c30820128a003020112a282011f0482011be5fca41337468155848766f655f34e00f7124a268bbfc79b68d4e949aa466c05a5cdaca4f21f62303e0175b5112b544c9b8dd950c85c58498aaf0e950ac4eecebd56616c192b640bca93298f4c2ed63bef8efe82ed585847ff4af54ae74bf6d2f9103fd99f90b724df57c0f8daea1d5e801c11d49af9671a1a8a4e8be6f86219e22af04b1b2a76c09489ea3b78eda7d0cf791a598f1e238586a0563b5fa690459cc3a8be3ea6c6a1dc539e37e1e055d2473f30d51e2e91bd5387f3be96d58add57057635ed29da77eeb9d111f18416e9eb3ef192e92c39151f171bd9fbeea181ced330bb6d53ef08001db94a0276914c24ecabf7629bea0309748e4b1630a0e36159f8db557d7e2a87eeaa499ea6d8d8a17efa582ca8b1e023d9a8";

    #[test]
    fn krb_kdc_rep_parse() {
        let blob = hex::decode(AS_REP_SAMPLE).expect("Failed to decode sample");
        let rep = KdcRep::from_der(&blob).expect("Failed to decode");

        assert_eq!(rep.msg_type, KrbMessageType::KrbAsRep);
        let padata = rep.padata.as_ref().expect("padata");
        assert_eq!(padata.len(), 1);
        assert!(padata[0].is(PaDataType::PaEtypeInfo2));
        let info = EtypeInfo2::from_der(&padata[0].padata_value).expect("etype-info2");
        assert_eq!(info[0].etype, 18);
        assert_eq!(info[0].salt.as_deref(), Some("EXAMPLE.COMtestuser"));

        assert_eq!(rep.crealm, "EXAMPLE.COM");
        assert_eq!(rep.cname.name_string, vec!["testuser"]);
        assert_eq!(rep.ticket.realm, "EXAMPLE.COM");
        assert_eq!(rep.ticket.sname.name_string, vec!["krbtgt", "EXAMPLE.COM"]);
        assert_eq!(rep.ticket.enc_part.etype, 18);
        assert_eq!(rep.ticket.enc_part.kvno, Some(1));
        assert_eq!(rep.enc_part.etype, 18);
        assert_eq!(rep.enc_part.kvno, None);

        assert_eq!(rep.to_der().expect("Failed to encode"), blob);
    }

    #[test]
    fn krb_error_is_not_a_reply() {
        let blob = hex::decode("7e5a3058a003020105a10302011ea411180f32303234303631323131343830355aa505020301dc66a603020134a90c1b0a41464f524553542e4144aa1f301da003020102a11630141b066b72627467741b0a41464f524553542e4144").expect("hex");
        let err = KdcRep::from_der(&blob).expect_err("must not decode");
        assert!(matches!(err, KrbError::UnexpectedTag { .. }));
        assert_eq!(
            err.to_string(),
            "Expected Application-11 but found Application-30"
        );
    }
}
