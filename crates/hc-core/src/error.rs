//! Error types for Helicon

use thiserror::Error;

use crate::{PortId, TrackId};

/// Core error type
#[derive(Error, Debug)]
pub enum HcError {
    #[error("Port not found: {0:?}")]
    PortNotFound(PortId),

    #[error("Track not found: {0:?}")]
    TrackNotFound(TrackId),

    #[error("Connection {src:?} -> {dst:?} would create a cycle")]
    CycleDetected { src: PortId, dst: PortId },

    #[error("Connection {src:?} -> {dst:?} already exists")]
    AlreadyConnected { src: PortId, dst: PortId },

    #[error("Invalid connection: {0}")]
    InvalidConnection(String),

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),
}

/// Result type alias
pub type HcResult<T> = Result<T, HcError>;
