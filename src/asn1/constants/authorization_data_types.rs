use num_enum::{IntoPrimitive, TryFromPrimitive};

#[derive(Debug, TryFromPrimitive, IntoPrimitive, PartialEq, Eq, Clone, Copy)]
#[repr(i32)]
pub enum AuthorizationDataType {
    AdIfRelevant = 1,
    AdKdcIssued = 4,
    AdAndOr = 5,
    AdMandatoryForKdc = 8,
    AdWin2kPac = 128,
    AdEtypeNegotiation = 129,
}
