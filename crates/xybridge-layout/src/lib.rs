//! Variable layout extraction from RemoteXY-generated configuration text.
//!
//! The dashboard editor emits a C snippet: a `RemoteXY_CONF[]` byte array
//! describing the widgets, followed by a struct whose fields are the input
//! and output variables. [`Layout::parse`] compiles that text once into the
//! byte-exact buffer layout and the pre-built configuration response frame.

pub mod error;
pub mod layout;
mod parser;

pub use error::{ConfigError, Result};
pub use layout::{Encoding, InputVariable, Layout, OutputVariable, DESCRIPTOR_OFFSET};
pub use parser::{CONF_MARKER, END_MARKER, INPUT_MARKER, OUTPUT_MARKER};
