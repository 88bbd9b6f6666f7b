//! Serve RemoteXY dashboards over TCP from their generated configuration text.
//!
//! # Crate Structure
//!
//! - [`frame`]: start-byte, length and CRC-16 framing of the wire protocol
//! - [`layout`]: compiling configuration text into a variable layout
//! - [`dashboard`]: live variables, frame dispatch and TCP serving

/// Re-export frame types.
pub mod frame {
    pub use xybridge_frame::*;
}

/// Re-export layout types.
pub mod layout {
    pub use xybridge_layout::*;
}

/// Re-export dashboard types.
pub mod dashboard {
    pub use xybridge_dashboard::*;
}

pub use xybridge_dashboard::{Dashboard, DashboardError, DashboardServer, ServerConfig};
pub use xybridge_layout::Layout;
