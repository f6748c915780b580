//! Role-based access checks.
//!
//! Roles are a flat set. Every protected operation lists its own allowed
//! roles; `admin` is never treated as implying `premium`.

use serde::Serialize;
use taskmaster_core::{Principal, Role};

/// Admin-only operations.
pub const ADMIN_ONLY: &[Role] = &[Role::Admin];
/// Operations open to paying users and administrators.
pub const PREMIUM_OR_ADMIN: &[Role] = &[Role::Admin, Role::Premium];
/// Any authenticated account.
pub const ANY_ROLE: &[Role] = &[Role::User, Role::Premium, Role::Admin];

/// Outcome of a role check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny(AccessDenial),
}

impl AccessDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessDecision::Allow)
    }
}

/// Why a principal was refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessDenial {
    pub role: Role,
    pub required_roles: Vec<Role>,
}

impl AccessDenial {
    pub fn message(&self) -> String {
        let names: Vec<&str> = self.required_roles.iter().map(Role::as_str).collect();
        format!("Access denied. Required role: {}", names.join(" or "))
    }
}

/// Allow iff the principal's role is a member of `required_roles`.
pub fn authorize(principal: &Principal, required_roles: &[Role]) -> AccessDecision {
    if required_roles.contains(&principal.role) {
        AccessDecision::Allow
    } else {
        AccessDecision::Deny(AccessDenial {
            role: principal.role,
            required_roles: required_roles.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_role_is_allowed() {
        let admin = Principal::new("a1", Role::Admin);
        assert!(authorize(&admin, ADMIN_ONLY).is_allowed());
        assert!(authorize(&admin, PREMIUM_OR_ADMIN).is_allowed());
    }

    #[test]
    fn test_admin_does_not_imply_premium() {
        let admin = Principal::new("a1", Role::Admin);
        let decision = authorize(&admin, &[Role::Premium]);
        assert_eq!(
            decision,
            AccessDecision::Deny(AccessDenial {
                role: Role::Admin,
                required_roles: vec![Role::Premium],
            })
        );
    }

    #[test]
    fn test_premium_cannot_reach_admin_routes() {
        let premium = Principal::new("p1", Role::Premium);
        assert!(!authorize(&premium, ADMIN_ONLY).is_allowed());
    }

    #[test]
    fn test_empty_role_set_denies_everyone() {
        for role in [Role::User, Role::Premium, Role::Admin] {
            assert!(!authorize(&Principal::new("x", role), &[]).is_allowed());
        }
    }

    #[test]
    fn test_denial_message_names_required_roles() {
        let user = Principal::new("u1", Role::User);
        let AccessDecision::Deny(denial) = authorize(&user, PREMIUM_OR_ADMIN) else {
            panic!("user must be denied");
        };
        assert_eq!(denial.message(), "Access denied. Required role: admin or premium");
    }
}
