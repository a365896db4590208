//! API-side authorization guard.
//!
//! Checked at the handler boundary before the orchestrator is called; the
//! orchestrator itself only distinguishes "own order" from "any order".

use storefront_auth::{AuthzError, CommandAuthorization, Permission, Role, authorize};

use crate::context::AuthContext;

/// Check every permission `command` requires for the current caller.
pub fn authorize_command<C: CommandAuthorization>(ctx: &AuthContext, command: &C) -> Result<(), AuthzError> {
    let principal = ctx.principal();
    for permission in command.required_permissions() {
        authorize(&principal, permission)?;
    }
    Ok(())
}

/// Role to permission mapping.
///
/// `admin` is staff and gets everything; customers act only on their own
/// carts and orders, which needs no named permission.
pub fn permissions_from_roles(roles: &[Role]) -> Vec<Permission> {
    if roles.iter().any(Role::is_admin) {
        return vec![Permission::new("*")];
    }

    Vec::new()
}
