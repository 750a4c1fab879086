//! Audit trail and system error recording

use serde_json::Value;
use tracing::{error, warn};
use tuutta_common::models::{AuditLogEntry, SystemError};
use tuutta_common::{Datastore, Result};

pub async fn record_audit(store: &Datastore, entry: &AuditLogEntry) -> Result<()> {
    store.create(entry).await
}

/// Log a caught failure and persist it for later inspection
///
/// Never fails: if the error record itself cannot be written, that is
/// only logged.
pub async fn record_system_error(
    store: &Datastore,
    tenant_id: &str,
    job: &str,
    message: impl Into<String>,
    context: Value,
) {
    let record = SystemError::new(tenant_id, job, message, context);
    error!(
        tenant_id,
        job,
        message = %record.message,
        context = %record.context,
        "Job failure recorded"
    );
    if let Err(e) = store.create(&record).await {
        warn!(tenant_id, job, error = %e, "Failed to persist system error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tuutta_common::Query;

    #[tokio::test]
    async fn test_system_error_persisted() {
        let store = Datastore::in_memory().await.unwrap();

        record_system_error(&store, "t1", "risk_scoring", "boom", json!({"step": "load"})).await;

        let errors: Vec<SystemError> = store.query(&Query::tenant("t1")).await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].job, "risk_scoring");
        assert_eq!(errors[0].context["step"], "load");
    }
}
