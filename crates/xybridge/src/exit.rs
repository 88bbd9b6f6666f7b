use std::fmt;
use std::io;

use xybridge_dashboard::{DashboardError, StoreError};
use xybridge_frame::FrameError;
use xybridge_layout::ConfigError;

// Process exit codes; USAGE and TIMEOUT follow sysexits and timeout(1).
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::AddrInUse | io::ErrorKind::AddrNotAvailable => TRANSPORT_ERROR,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset => FAILURE,
        io::ErrorKind::NotFound => USAGE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn frame_error(context: &str, err: FrameError) -> CliError {
    match err {
        FrameError::Io(source) => io_error(context, source),
        FrameError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        FrameError::ChecksumMismatch { .. } | FrameError::InvalidLength { .. } => {
            CliError::new(TRANSPORT_ERROR, format!("{context}: {err}"))
        }
        FrameError::PayloadTooLarge { .. } => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
    }
}

pub fn config_error(context: &str, err: ConfigError) -> CliError {
    match err {
        ConfigError::Frame(err) => frame_error(context, err),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

pub fn dashboard_error(context: &str, err: DashboardError) -> CliError {
    match err {
        DashboardError::Config(err) => config_error(context, err),
        DashboardError::Frame(err) => frame_error(context, err),
        DashboardError::Store(StoreError::InvalidValue { .. }) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        DashboardError::Store(_) | DashboardError::UnknownVariable(_) => {
            CliError::new(USAGE, format!("{context}: {err}"))
        }
        DashboardError::UnknownCommand(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        DashboardError::Reentrant => CliError::new(INTERNAL, format!("{context}: {err}")),
        DashboardError::Bind { source, .. } => io_error(context, source),
        DashboardError::Accept(source) | DashboardError::Io(source) => io_error(context, source),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_data_invalid() {
        let err = config_error("load", ConfigError::NoVariablesDeclared);
        assert_eq!(err.code, DATA_INVALID);
        assert!(err.message.starts_with("load: "));
    }

    #[test]
    fn bind_in_use_is_transport_error() {
        let err = dashboard_error(
            "bind failed",
            DashboardError::Bind {
                addr: ([0, 0, 0, 0], 6377).into(),
                source: io::Error::from(io::ErrorKind::AddrInUse),
            },
        );
        assert_eq!(err.code, TRANSPORT_ERROR);
    }

    #[test]
    fn unknown_variable_is_usage() {
        let err = dashboard_error("set", DashboardError::UnknownVariable("x".into()));
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn timeouts_map_to_124() {
        let err = frame_error(
            "probe",
            FrameError::Io(io::Error::from(io::ErrorKind::WouldBlock)),
        );
        assert_eq!(err.code, TIMEOUT);
    }
}
