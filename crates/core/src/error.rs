// Central Error Type for the Engine

use thiserror::Error;

/// Engine-level error type
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Valve error: {0}")]
    Valve(#[from] crate::application::valve::ValveError),

    #[error("Broker error: {0}")]
    Broker(#[from] crate::port::BrokerError),

    #[error("Publish error: {0}")]
    Publish(#[from] crate::application::producer::PublishError),

    #[error("Registry error: {0}")]
    Registry(#[from] crate::application::registry::RegistryError),

    #[error("Processing error: {0}")]
    Process(#[from] crate::port::ProcessError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;
