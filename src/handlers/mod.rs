pub mod audit;
pub mod dashboard;
pub mod dossiers;
pub mod events;
pub mod feedback;
pub mod fusion;
pub mod health;
pub mod orgs;
pub mod settings;
pub mod sources;
pub mod stream;
pub mod watchlists;

use crate::AppState;
use crate::auth::AuthContext;
use crate::models::audit::AuditAction;
use crate::models::org::Role;

/// Idempotent reads by viewers are not audited; everyone else's are.
pub(crate) fn audit_read(
    state: &AppState,
    ctx: &AuthContext,
    object_type: &str,
    object_id: Option<&str>,
) {
    if ctx.role == Role::Viewer {
        return;
    }
    state.audit.record(
        &state.store,
        ctx,
        AuditAction::View,
        object_type,
        object_id,
        "read",
    );
}
