use super::{Name, Pac};
use tracing::{debug, warn};

/// Claim type identifiers, using the URIs Windows identities carry.
pub mod claim_types {
    pub const NAME: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/name";
    pub const UPN: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/upn";
    pub const PRIMARY_SID: &str = "http://schemas.microsoft.com/ws/2008/06/identity/claims/primarysid";
    pub const PRIMARY_GROUP_SID: &str =
        "http://schemas.microsoft.com/ws/2008/06/identity/claims/primarygroupsid";
    pub const GROUP_SID: &str = "http://schemas.microsoft.com/ws/2008/06/identity/claims/groupsid";
    pub const WINDOWS_ACCOUNT_NAME: &str =
        "http://schemas.microsoft.com/ws/2008/06/identity/claims/windowsaccountname";
}

pub const AUTHENTICATION_TYPE_KERBEROS: &str = "Kerberos";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Claim {
    pub claim_type: String,
    pub value: String,
}

impl Claim {
    pub fn new(claim_type: &str, value: impl Into<String>) -> Self {
        Claim {
            claim_type: claim_type.to_string(),
            value: value.into(),
        }
    }
}

/// The identity of an authenticated client, as a flat list of typed claims.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimsIdentity {
    name: String,
    authentication_type: &'static str,
    claims: Vec<Claim>,
    failed: Vec<(u32, String)>,
}

impl ClaimsIdentity {
    /// Build the identity of `client`. The PAC, when present, contributes the Windows
    /// account details; buffers it could not decode are kept as failed records.
    pub fn from_kerberos(client: &Name, pac: Option<&Pac>) -> Self {
        let name = client.to_string();
        let mut claims = vec![Claim::new(claim_types::NAME, name.clone())];
        let mut failed = Vec::new();
        let mut upn = None;

        if let Some(pac) = pac {
            if let Some(info) = pac.logon_info() {
                if !info.logon_domain_name.is_empty() {
                    claims.push(Claim::new(
                        claim_types::WINDOWS_ACCOUNT_NAME,
                        format!("{}\\{}", info.logon_domain_name, info.effective_name),
                    ));
                }
                if let Some(sid) = info.user_sid() {
                    claims.push(Claim::new(claim_types::PRIMARY_SID, sid.to_string()));
                }
                if let Some(sid) = info.primary_group_sid() {
                    claims.push(Claim::new(claim_types::PRIMARY_GROUP_SID, sid.to_string()));
                }
                claims.extend(
                    info.group_sids()
                        .into_iter()
                        .map(|sid| Claim::new(claim_types::GROUP_SID, sid.to_string())),
                );
            }

            upn = pac
                .upn_dns_info()
                .filter(|info| !info.upn.is_empty())
                .map(|info| info.upn.clone());

            for (ul_type, reason) in pac.failures() {
                warn!(ul_type, reason, "pac buffer skipped while building claims");
                failed.push((ul_type, reason.to_string()));
            }
        }

        claims.push(Claim::new(claim_types::UPN, upn.unwrap_or_else(|| name.clone())));
        debug!(%name, claims = claims.len(), "claims identity built");

        ClaimsIdentity {
            name,
            authentication_type: AUTHENTICATION_TYPE_KERBEROS,
            claims,
            failed,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn authentication_type(&self) -> &str {
        self.authentication_type
    }

    pub fn is_authenticated(&self) -> bool {
        true
    }

    pub fn claims(&self) -> &[Claim] {
        &self.claims
    }

    pub fn find(&self, claim_type: &str) -> Option<&str> {
        self.claims
            .iter()
            .find(|c| c.claim_type == claim_type)
            .map(|c| c.value.as_str())
    }

    pub fn find_all<'a>(&'a self, claim_type: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.claims
            .iter()
            .filter(move |c| c.claim_type == claim_type)
            .map(|c| c.value.as_str())
    }

    /// PAC buffers that were present but could not be decoded.
    pub fn failed_records(&self) -> &[(u32, String)] {
        &self.failed
    }
}
