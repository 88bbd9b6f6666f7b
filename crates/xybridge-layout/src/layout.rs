use std::ops::Range;

use bytes::Bytes;
use xybridge_frame::MIN_FRAME_SIZE;

use crate::error::Result;

/// Index in the configuration array where the widget descriptor begins.
///
/// Bytes `[0]` and `[1]` are the input and output buffer sizes, `[2..4]` the
/// descriptor length.
pub const DESCRIPTOR_OFFSET: usize = 4;

/// A one-byte variable pushed by the dashboard app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputVariable {
    pub name: String,
    /// Position in the input buffer.
    pub index: usize,
}

/// How an output variable's bytes are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Signed numeric value with the range the editor declared.
    Scalar { min: i32, max: i32 },
    /// Zero-terminated text filling at most the whole field.
    Text,
}

/// A variable polled by the dashboard app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputVariable {
    pub name: String,
    /// Byte offset in the output buffer.
    pub offset: usize,
    /// Field width in bytes.
    pub len: usize,
    pub encoding: Encoding,
}

impl OutputVariable {
    pub fn is_text(&self) -> bool {
        matches!(self.encoding, Encoding::Text)
    }

    /// The bytes this variable occupies in the output buffer.
    pub fn byte_range(&self) -> Range<usize> {
        self.offset..self.offset + self.len
    }
}

/// Compiled description of a dashboard's variables and configuration.
///
/// Built once by [`Layout::parse`], immutable afterwards.
#[derive(Debug, Clone)]
pub struct Layout {
    pub(crate) config_bytes: Vec<u8>,
    pub(crate) config_response: Bytes,
    pub(crate) input_size: usize,
    pub(crate) output_size: usize,
    pub(crate) inputs: Vec<InputVariable>,
    pub(crate) outputs: Vec<OutputVariable>,
}

impl Layout {
    /// Parse RemoteXY-generated configuration text.
    pub fn parse(text: &str) -> Result<Self> {
        crate::parser::parse(text)
    }

    /// The full configuration array, header included.
    pub fn config_bytes(&self) -> &[u8] {
        &self.config_bytes
    }

    /// Widget descriptor bytes sent in the configuration response.
    pub fn descriptor(&self) -> &[u8] {
        &self.config_bytes[DESCRIPTOR_OFFSET..]
    }

    /// Complete SEND_CONFIG response frame, checksum included.
    pub fn config_response(&self) -> &Bytes {
        &self.config_response
    }

    pub fn input_size(&self) -> usize {
        self.input_size
    }

    pub fn output_size(&self) -> usize {
        self.output_size
    }

    pub fn inputs(&self) -> &[InputVariable] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[OutputVariable] {
        &self.outputs
    }

    pub fn input_names(&self) -> Vec<String> {
        self.inputs.iter().map(|var| var.name.clone()).collect()
    }

    pub fn output_names(&self) -> Vec<String> {
        self.outputs.iter().map(|var| var.name.clone()).collect()
    }

    /// Index of the first input variable called `name`.
    pub fn input_index(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|var| var.name == name)
    }

    /// Index of the first output variable called `name`.
    pub fn output_index(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|var| var.name == name)
    }

    /// Largest frame the app can legally send: an input push.
    pub fn max_inbound_frame_len(&self) -> usize {
        self.input_size + MIN_FRAME_SIZE
    }
}
