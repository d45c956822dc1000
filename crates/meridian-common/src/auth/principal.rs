//! The server-side representation of an authenticated identity.

/// Well-known authority strings.
pub mod roles {
    /// Ordinary account.
    pub const USER: &str = "ROLE_USER";
    /// Administrative account; bypasses ownership checks.
    pub const ADMIN: &str = "ROLE_ADMIN";
}

/// Account standing as seen by the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    /// Account may authenticate and act.
    Active,
    /// Account deactivated.
    Disabled,
    /// Account locked out (failed logins or an explicit lock).
    Locked,
}

/// An authenticated identity, valid for the duration of a single RPC.
///
/// Principals are values: each request gets its own instance and nothing
/// outlives the call that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Stable identifier from the directory (or the token subject when
    /// resolving from claims alone).
    pub user_id: String,
    /// Token subject.
    pub username: String,
    /// Role strings, in issue order.
    pub authorities: Vec<String>,
    /// Standing at resolution time.
    pub account_status: AccountStatus,
}

impl Principal {
    /// Whether the principal carries the given authority.
    pub fn has_authority(&self, authority: &str) -> bool {
        self.authorities.iter().any(|a| a == authority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authority_lookup() {
        let p = Principal {
            user_id: "u-1".into(),
            username: "alice".into(),
            authorities: vec![roles::USER.into()],
            account_status: AccountStatus::Active,
        };
        assert!(p.has_authority(roles::USER));
        assert!(!p.has_authority(roles::ADMIN));
    }
}
