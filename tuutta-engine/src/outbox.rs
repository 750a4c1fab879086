//! Persisted outbox of domain events

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tracing::debug;
use tuutta_common::events::{DomainEvent, EventBus, OutboxEvent, OutboxStatus};
use tuutta_common::{Datastore, Query, Result};

use crate::error::truncate_message;
use crate::utils::db_retry::{retry_on_lock, DEFAULT_MAX_LOCK_WAIT_MS};

/// Appends events durably and wakes in-process listeners
#[derive(Clone)]
pub struct Outbox {
    store: Datastore,
    event_bus: Arc<EventBus>,
}

impl Outbox {
    pub fn new(store: Datastore, event_bus: Arc<EventBus>) -> Self {
        Self { store, event_bus }
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub async fn append(&self, event: DomainEvent) -> Result<OutboxEvent> {
        let record = OutboxEvent::new(event);
        self.store.create(&record).await?;

        debug!(
            tenant_id = %record.tenant_id,
            outbox_id = %record.id,
            kind = record.event.kind(),
            "Domain event appended"
        );

        self.event_bus.emit_lossy(record.event.clone());
        Ok(record)
    }

    /// Oldest pending events first
    pub async fn pending(&self, limit: usize) -> Result<Vec<OutboxEvent>> {
        self.store
            .query(
                &Query::all()
                    .eq("status", OutboxStatus::Pending.as_str())
                    .insertion_order()
                    .limit(limit),
            )
            .await
    }

    pub async fn mark_processed(&self, id: &str) -> Result<()> {
        let patch = json!({
            "status": OutboxStatus::Processed,
            "processedAt": Utc::now().timestamp_millis(),
        });
        retry_on_lock("outbox mark processed", DEFAULT_MAX_LOCK_WAIT_MS, || {
            self.store.merge_update::<OutboxEvent>(id, &patch)
        })
        .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, id: &str, error: &str) -> Result<()> {
        let patch = json!({
            "status": OutboxStatus::Failed,
            "error": truncate_message(error, 500),
            "processedAt": Utc::now().timestamp_millis(),
        });
        retry_on_lock("outbox mark failed", DEFAULT_MAX_LOCK_WAIT_MS, || {
            self.store.merge_update::<OutboxEvent>(id, &patch)
        })
        .await?;
        Ok(())
    }
}
