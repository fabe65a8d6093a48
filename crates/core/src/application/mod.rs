// Application Layer - The dispatch pipeline's execution units

pub mod backoff;
pub mod constants;
pub mod consumer;
pub mod mailbox;
pub mod producer;
pub mod registry;
pub mod shutdown;
pub mod valve;
pub mod worker;

// Re-exports
pub use backoff::{BackoffPolicy, RetryDecision};
pub use consumer::{ConsumerConfig, ConsumerHandle, ConsumerReport, ConsumerSystem};
pub use mailbox::{mailbox, Address, Mailbox};
pub use producer::{ProducerConfig, ProducerSystem, PublishError, PublishReceipt, PublishRequest};
pub use registry::{RegistryError, SharedRegistry};
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
pub use valve::{EnqueueError, RateValve, ValveError, ValveHandle};
pub use worker::{SupervisorEvent, Worker};
