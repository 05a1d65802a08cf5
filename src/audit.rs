use std::collections::HashSet;
use std::sync::Mutex;

use chrono::Utc;

use crate::auth::AuthContext;
use crate::models::audit::{AuditAction, AuditRecord};
use crate::store::{Store, fmt_ts};

/// Writes audit rows for mutations and sensitive reads. When an org has
/// audit logging disabled, writes are skipped and a single warning is
/// emitted per org per process lifetime.
pub struct AuditLog {
    warned_orgs: Mutex<HashSet<String>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            warned_orgs: Mutex::new(HashSet::new()),
        }
    }

    pub fn record(
        &self,
        store: &Store,
        ctx: &AuthContext,
        action: AuditAction,
        object_type: &str,
        object_id: Option<&str>,
        description: &str,
    ) {
        self.record_with_metadata(
            store,
            ctx,
            action,
            object_type,
            object_id,
            description,
            serde_json::json!({}),
        );
    }

    pub fn record_with_metadata(
        &self,
        store: &Store,
        ctx: &AuthContext,
        action: AuditAction,
        object_type: &str,
        object_id: Option<&str>,
        description: &str,
        metadata: serde_json::Value,
    ) {
        let enabled = store
            .get_org_settings(&ctx.org_id)
            .ok()
            .flatten()
            .map(|s| s.audit_logging)
            .unwrap_or(true);
        if !enabled {
            let mut warned = self.warned_orgs.lock().unwrap();
            if warned.insert(ctx.org_id.clone()) {
                tracing::warn!("audit logging disabled for org {}", ctx.org_id);
            }
            return;
        }

        let rec = AuditRecord {
            id: uuid::Uuid::new_v4().to_string(),
            org_id: ctx.org_id.clone(),
            user_id: Some(ctx.user_id.clone()),
            user_email: Some(ctx.email.clone()),
            action,
            object_type: object_type.to_string(),
            object_id: object_id.map(str::to_string),
            description: description.to_string(),
            metadata,
            ip_address: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
            timestamp: fmt_ts(Utc::now()),
        };
        // An audit failure must not fail the audited operation itself.
        if let Err(e) = store.append_audit(&rec) {
            tracing::error!("audit write failed for org {}: {e}", ctx.org_id);
        }
    }

    /// Tenancy probes and unauthorized operations.
    pub fn access_denied(
        &self,
        store: &Store,
        ctx: &AuthContext,
        object_type: &str,
        object_id: Option<&str>,
    ) {
        self.record(
            store,
            ctx,
            AuditAction::AccessDenied,
            object_type,
            object_id,
            "access denied",
        );
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}
