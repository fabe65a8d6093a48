// Item Processor Port
// Abstraction for the downstream work a worker performs per item.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::WorkItem;

/// Processing errors
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Processing failed: {0}")]
    Failed(String),

    #[error("Item rejected: {0}")]
    Rejected(String),
}

/// Item processor trait
///
/// A worker drives exactly one `process` call at a time; implementations
/// need no internal serialization of their own.
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    /// Process a single work item.
    ///
    /// # Errors
    /// - ProcessError::Failed for a retriable/reportable failure local to the item
    /// - ProcessError::Rejected when the item cannot be handled at all
    async fn process(&self, item: WorkItem) -> Result<(), ProcessError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use bytes::Bytes;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    /// Mock processor behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Always succeed
        Success,
        /// Always fail with message
        Fail(String),
        /// Panic with message (for panic isolation testing)
        Panic(String),
        /// Succeed after sleeping (for serialization testing)
        Slow(std::time::Duration),
    }

    /// Mock processor that records every item it sees, with the tokio
    /// clock instant of the call (usable under a paused runtime).
    pub struct MockProcessor {
        behavior: Mutex<MockBehavior>,
        seen: Arc<Mutex<Vec<(Bytes, Instant)>>>,
    }

    impl MockProcessor {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior: Mutex::new(behavior),
                seen: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub fn new_success() -> Self {
            Self::new(MockBehavior::Success)
        }

        pub fn new_fail(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Fail(message.into()))
        }

        pub fn new_panic_inducing(message: impl Into<String>) -> Self {
            Self::new(MockBehavior::Panic(message.into()))
        }

        /// Payloads seen so far, in processing order
        pub fn seen(&self) -> Vec<Bytes> {
            self.seen.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
        }

        /// Call instants (tokio clock) for pacing assertions
        pub fn seen_instants(&self) -> Vec<Instant> {
            self.seen.lock().unwrap().iter().map(|(_, i)| *i).collect()
        }

        pub fn call_count(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ItemProcessor for MockProcessor {
        async fn process(&self, item: WorkItem) -> Result<(), ProcessError> {
            self.seen
                .lock()
                .unwrap()
                .push((item.payload.clone(), Instant::now()));

            let behavior = self.behavior.lock().unwrap().clone();
            match behavior {
                MockBehavior::Success => Ok(()),
                MockBehavior::Fail(msg) => Err(ProcessError::Failed(msg)),
                MockBehavior::Panic(msg) => {
                    panic!("{}", msg); // Actually panic for panic isolation testing
                }
                MockBehavior::Slow(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(())
                }
            }
        }
    }
}
