use xybridge_frame::FrameError;

/// Errors that make a configuration text unusable.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required marker was not found in the text.
    #[error("configuration is missing boundary marker `{0}`")]
    MissingBoundary(&'static str),

    /// Neither an input nor an output variable section is present.
    #[error("configuration declares no input or output variables")]
    NoVariablesDeclared,

    /// A token in the configuration array is not a byte value.
    #[error("invalid configuration byte `{token}`")]
    InvalidConfigByte { token: String },

    /// The configuration array is too short to hold its header.
    #[error("configuration array has {len} bytes, header needs 4")]
    HeaderTooShort { len: usize },

    /// More input variables are declared than the input buffer holds.
    #[error("{found} input variables declared, input buffer holds {declared}")]
    InputOverflow { declared: usize, found: usize },

    /// Output variables need more bytes than the output buffer holds.
    #[error("output variables need {required} bytes, output buffer holds {declared}")]
    OutputOverflow { declared: usize, required: usize },

    /// The configuration response could not be framed.
    #[error("configuration response: {0}")]
    Frame(#[from] FrameError),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
