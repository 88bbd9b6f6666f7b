use std::net::SocketAddr;

use xybridge_frame::FrameError;
use xybridge_layout::ConfigError;

use crate::store::StoreError;

/// Errors that can occur in dashboard operations.
#[derive(Debug, thiserror::Error)]
pub enum DashboardError {
    /// The configuration text could not be compiled.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A variable store operation failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The frame carries a command byte outside the protocol.
    #[error("unknown command {0:#04x}")]
    UnknownCommand(u8),

    /// A subscriber callback called back into the dashboard that is
    /// notifying it. Outputs are written through the callback's writer.
    #[error("dashboard called from its own subscriber")]
    Reentrant,

    /// No variable with this name is declared.
    #[error("unknown variable `{0}`")]
    UnknownVariable(String),

    /// Failed to bind the listening socket.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Failed to accept an incoming connection.
    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// An I/O error occurred on a connection.
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DashboardError>;
