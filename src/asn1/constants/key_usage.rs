//! Key usage numbers from RFC 4120 section 7.5.1 and MS-PAC.

pub const AS_REQ_PA_ENC_TIMESTAMP: i32 = 1;
pub const TICKET_ENC_PART: i32 = 2;
pub const AS_REP_ENC_PART: i32 = 3;
pub const TGS_REQ_AD_SESSION_KEY: i32 = 4;
pub const TGS_REQ_AD_SUBKEY: i32 = 5;
pub const TGS_REQ_AUTH_CKSUM: i32 = 6;
pub const TGS_REQ_AUTHENTICATOR: i32 = 7;
pub const TGS_REP_ENC_PART_SESSION_KEY: i32 = 8;
pub const TGS_REP_ENC_PART_SUBKEY: i32 = 9;
pub const AP_REQ_AUTH_CKSUM: i32 = 10;
pub const AP_REQ_AUTHENTICATOR: i32 = 11;
pub const AP_REP_ENC_PART: i32 = 12;
pub const KERB_NON_KERB_CKSUM_SALT: i32 = 17;
