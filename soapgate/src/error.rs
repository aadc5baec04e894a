use std::time::Duration;
use thiserror::Error;

use soapgate_wsdl::resolver::ResolveError;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Service client is not initialized")]
    NotInitialized,

    #[error("Invocation of {operation} failed: {message}")]
    ServiceInvocation { operation: String, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Unable to resolve definition")]
    Resolve(#[from] ResolveError),

    #[error("Resolution of {location} did not finish within {deadline:?}")]
    Deadline { location: String, deadline: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
