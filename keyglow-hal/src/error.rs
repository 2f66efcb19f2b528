//! Hardware interface error types

use thiserror::Error;

/// Errors from device operations
#[derive(Error, Debug)]
pub enum HalError {
    /// No matching device present, or claim denied
    #[error("Device not found: {0}")]
    NotFound(String),

    /// Device went away mid-operation
    #[error("Device disconnected")]
    Disconnected,

    /// Device rejected or garbled an exchange
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Underlying transport failure
    #[error("Transport error: {0}")]
    Transport(String),
}
