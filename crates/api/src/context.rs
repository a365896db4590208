use storefront_auth::{JwtClaims, Permission, Principal, Role};
use storefront_core::UserId;

use crate::authz::permissions_from_roles;

/// The authenticated caller, built once per request from a validated token
/// and handed to handlers explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    user_id: UserId,
    email: Option<String>,
    roles: Vec<Role>,
    permissions: Vec<Permission>,
}

impl AuthContext {
    pub fn new(user_id: UserId, email: Option<String>, roles: Vec<Role>) -> Self {
        let permissions = permissions_from_roles(&roles);
        Self {
            user_id,
            email,
            roles,
            permissions,
        }
    }

    pub fn from_claims(claims: JwtClaims) -> Self {
        Self::new(claims.sub, claims.email, claims.roles)
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }

    pub fn principal(&self) -> Principal {
        Principal {
            user_id: self.user_id,
            roles: self.roles.clone(),
            permissions: self.permissions.clone(),
        }
    }

    /// Whether the caller holds `permission` (directly or via `*`).
    pub fn can(&self, permission: &Permission) -> bool {
        storefront_auth::authorize(&self.principal(), permission).is_ok()
    }
}
