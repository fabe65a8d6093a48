// Work Item Domain Model

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// A unit of work flowing through the dispatch pipeline.
///
/// The payload is opaque to the engine: bridges and the valve pass it
/// through unmodified. An item is immutable once created and owned by
/// exactly one component at a time — the valve until dispatch, the worker
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Opaque payload, passed through unmodified
    pub payload: Bytes,
    /// Enqueue timestamp in epoch ms (injected, not system time)
    pub enqueued_at: i64,
}

impl WorkItem {
    /// Create a new work item
    ///
    /// # Arguments
    ///
    /// * `payload` - Opaque payload bytes
    /// * `enqueued_at` - Enqueue timestamp in epoch ms (inject via TimeProvider)
    pub fn new(payload: Bytes, enqueued_at: i64) -> Self {
        Self {
            payload,
            enqueued_at,
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
