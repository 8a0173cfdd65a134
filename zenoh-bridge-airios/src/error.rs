//! Error types for the bridge runtime.

use airios_core::projection::EntityCommandError;
use airios_core::CoreError;
use thiserror::Error;

/// Errors raised while publishing states or handling entity commands.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Common(#[from] airios_common::Error),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Entity(#[from] EntityCommandError),

    #[error("Failed to publish to '{key}': {message}")]
    Publish { key: String, message: String },

    #[error("No device with identity '{0}'")]
    UnknownDevice(String),

    #[error("'{0}' is not a command key")]
    NotACommand(String),

    #[error("Undecodable command payload on '{0}'")]
    Payload(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;
