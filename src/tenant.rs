//! Tenant context (capability hook, §9): when `multitenancy.enabled`, every command and projected
//! event carries a `tenant_id`, and a [`TenantContext`] implementation supplies the current one
//! ambient to a request.

/// Supplies the tenant a command or projection run is scoped to. Injected rather than read from
/// ambient global state, per the "no ambient global state" redesign flag.
pub trait TenantContext: Send + Sync {
    fn tenant_id(&self) -> Option<&str>;
}

/// Always-absent tenant, used when `multitenancy.enabled = false`.
pub struct NoTenant;

impl TenantContext for NoTenant {
    fn tenant_id(&self) -> Option<&str> {
        None
    }
}

/// A fixed tenant, set once per request/command handling scope.
pub struct FixedTenant(pub String);

impl TenantContext for FixedTenant {
    fn tenant_id(&self) -> Option<&str> {
        Some(&self.0)
    }
}

/// Rejects metadata missing a `tenant_id` key when multitenancy's `strict_mode` is on.
pub fn require_tenant_id(metadata: &Option<serde_json::Value>, strict_mode: bool) -> Result<(), TenantError> {
    if !strict_mode {
        return Ok(());
    }

    let has_tenant_id = metadata
        .as_ref()
        .and_then(|value| value.get("tenant_id"))
        .map(|value| value.is_string())
        .unwrap_or(false);

    if has_tenant_id {
        Ok(())
    } else {
        Err(TenantError::MissingTenantId)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TenantError {
    #[error("event metadata is missing a tenant_id, required under multitenancy strict mode")]
    MissingTenantId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_mode_rejects_missing_tenant_id() {
        assert!(require_tenant_id(&None, true).is_err());
        assert!(require_tenant_id(&Some(serde_json::json!({"other": "x"})), true).is_err());
    }

    #[test]
    fn strict_mode_accepts_tenant_id() {
        assert!(require_tenant_id(&Some(serde_json::json!({"tenant_id": "acme"})), true).is_ok());
    }

    #[test]
    fn non_strict_mode_always_passes() {
        assert!(require_tenant_id(&None, false).is_ok());
    }
}
