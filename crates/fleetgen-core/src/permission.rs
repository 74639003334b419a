//! The permission gate.
//!
//! Every command and subscription passes the gate before any handler work
//! happens. The check is an async capability so deployments can plug in a
//! remote authorizer; [`RoleGate`] is the in-process role intersection.

use std::collections::BTreeSet;

use fleetgen_types::CallerIdentity;
use futures::FutureExt;
use futures::future::BoxFuture;

use crate::error::CommandError;

/// Decides whether a caller may run an operation.
pub trait PermissionGate: Send + Sync + 'static {
    /// Whether `identity` satisfies `required`.
    fn allows<'a>(
        &'a self,
        identity: &'a CallerIdentity,
        required: &'a BTreeSet<String>,
    ) -> BoxFuture<'a, bool>;
}

/// Grants access when the caller holds at least one required role.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoleGate;

impl PermissionGate for RoleGate {
    fn allows<'a>(
        &'a self,
        identity: &'a CallerIdentity,
        required: &'a BTreeSet<String>,
    ) -> BoxFuture<'a, bool> {
        futures::future::ready(identity.has_any_role(required)).boxed()
    }
}

/// Fail with [`CommandError::PermissionDenied`] unless the gate allows it.
pub async fn ensure_allowed(
    gate: &dyn PermissionGate,
    identity: &CallerIdentity,
    required: &BTreeSet<String>,
    operation: &str,
) -> Result<(), CommandError> {
    if gate.allows(identity, required).await {
        Ok(())
    } else {
        tracing::warn!(
            operation,
            caller = %identity.display_name,
            "Permission denied"
        );
        Err(CommandError::PermissionDenied {
            operation: operation.to_owned(),
        })
    }
}
