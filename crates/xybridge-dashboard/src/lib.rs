//! Live variables and request handling for a RemoteXY dashboard.
//!
//! A [`Dashboard`] owns the compiled [`Layout`](xybridge_layout::Layout),
//! the input/output buffers and the input subscribers. Each connection gets
//! a [`FrameEngine`] that turns its byte stream into response frames;
//! [`DashboardServer`] drives engines over blocking TCP sockets, and with the
//! `async` feature [`serve_async`] does the same on tokio.
//!
//! ```no_run
//! use std::sync::atomic::AtomicBool;
//! use xybridge_dashboard::{Dashboard, DashboardServer, InputEvent, OutputWriter, ServerConfig};
//!
//! # fn main() -> xybridge_dashboard::Result<()> {
//! let text = std::fs::read_to_string("sketch.h")?;
//! let dashboard = Dashboard::from_config_text(&text)?;
//! dashboard.subscribe_by_name(
//!     "button_1",
//!     "logger",
//!     |event: &InputEvent, outputs: &mut OutputWriter<'_>| {
//!         println!("button {}", event.value);
//!         // Button drives the red LED channel.
//!         if let Some(led) = outputs.output_index("led_1_r") {
//!             let _ = outputs.write_output(led, if event.value != 0 { 255 } else { 0 });
//!         }
//!     },
//! )?;
//! dashboard.write_output_by_name("led_1_r", 255)?;
//!
//! let server = DashboardServer::bind(dashboard, ServerConfig::default())?;
//! server.run(&AtomicBool::new(false))?;
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "async")]
pub mod async_server;
pub mod config;
pub mod dashboard;
pub mod engine;
pub mod error;
pub mod server;
pub mod store;
pub mod value;

#[cfg(feature = "async")]
pub use async_server::{bind_async, serve_async, serve_connection_async};
pub use config::{ServerConfig, DEFAULT_PORT};
pub use dashboard::{Dashboard, Reply, ACK_FRAME, OUTPUT_POLL_PAUSE};
pub use engine::{EngineOutput, FrameEngine, Session};
pub use error::{DashboardError, Result};
pub use server::{serve_connection, DashboardServer};
pub use store::{
    Callback, InputEvent, OutputWriter, Snapshot, StoreError, SubscriberId, VariableStore,
};
pub use value::{clamp_to_signed, to_signed, OutputValue, OUTPUT_LIMIT};
