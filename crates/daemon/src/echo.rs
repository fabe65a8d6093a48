//! Default item processor: logs each item it is handed.
//!
//! Stands in for real downstream work until an operator wires their own
//! `ItemProcessor` into the worker.

use async_trait::async_trait;
use sluice_core::domain::WorkItem;
use sluice_core::port::{ItemProcessor, ProcessError};
use tracing::info;

pub struct EchoProcessor;

#[async_trait]
impl ItemProcessor for EchoProcessor {
    async fn process(&self, item: WorkItem) -> Result<(), ProcessError> {
        let preview = String::from_utf8_lossy(&item.payload);
        info!(
            bytes = item.payload.len(),
            enqueued_at = item.enqueued_at,
            payload = %preview,
            "Processed item"
        );
        Ok(())
    }
}
