//! Submitter identity carried by every command.

use serde::{Deserialize, Serialize};

/// Authority granting administrative access.
pub const ADMIN_AUTHORITY: &str = "ADMIN";

/// Snapshot of the submitting user's identity.
///
/// The engine never interprets it beyond the principal name (used for
/// conflict detection and ownership checks) and the admin authority.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SecurityContext {
    /// Name of the authenticated principal.
    pub principal: String,

    /// Granted authorities.
    pub authorities: Vec<String>,

    /// Address for completion notices.
    pub email: Option<String>,
}

impl SecurityContext {
    /// Create a context for a principal with no authorities.
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            authorities: Vec::new(),
            email: None,
        }
    }

    /// Context used when the caller did not identify itself.
    pub fn anonymous() -> Self {
        Self::new("anonymous")
    }

    /// Builder method to grant an authority.
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authorities.push(authority.into());
        self
    }

    /// Builder method to set the notification address.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Returns true if the principal holds the admin authority.
    pub fn is_admin(&self) -> bool {
        self.authorities.iter().any(|a| a == ADMIN_AUTHORITY)
    }

    /// Returns true if this identity may act on a task submitted by `owner`.
    pub fn can_manage(&self, owner: &SecurityContext) -> bool {
        self.is_admin() || self.principal == owner.principal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_can_manage_anyone() {
        let admin = SecurityContext::new("root").with_authority(ADMIN_AUTHORITY);
        let alice = SecurityContext::new("alice");
        assert!(admin.can_manage(&alice));
        assert!(!alice.can_manage(&admin));
        assert!(alice.can_manage(&alice.clone()));
    }
}
