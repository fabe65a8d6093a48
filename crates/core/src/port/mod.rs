// Port Layer - Interfaces for external dependencies

pub mod broker;
pub mod processor;
pub mod time_provider;

// Re-exports
pub use broker::{Ack, BrokerError, Delivery, MessageBroker, Subscription};
pub use processor::{ItemProcessor, ProcessError};
pub use time_provider::TimeProvider;
