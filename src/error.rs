use std::time::Duration;
use thiserror::Error;

use crate::models::{CommandKind, DeviceType};

/// Configuration problems: fatal to a request (or to startup), never retried
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Location not found: {0}")]
    UnknownLocation(String),

    #[error("Command '{command}' is not configured for device type '{device_type}'")]
    UnsupportedCommand {
        command: CommandKind,
        device_type: DeviceType,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Failure to get output from a device. Isolated per execution unit.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("command execution failed: {0}")]
    Exec(String),

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("session worker failed: {0}")]
    Worker(String),
}

/// Errors surfaced by the command pipeline
#[derive(Debug, Error)]
pub enum LgError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The orchestrator itself failed, as opposed to an individual unit
    #[error("Orchestration failed: {0}")]
    Orchestration(String),
}
