use tracing::error;

use crate::{state::AppState, store::NewAuditEntry};

/// Appends to the audit trail. A failed append is logged and swallowed so it
/// never changes the outcome of the action being audited.
pub async fn record(state: &AppState, entry: NewAuditEntry) {
    let action = entry.action.as_str();
    if let Err(e) = state.store.append_audit(entry).await {
        error!(error = %e, action, "audit append failed");
    }
}
