//! Byte conversions shared by input change detection and output writes.

use std::borrow::Cow;
use std::fmt;

/// Largest magnitude a numeric output accepts before clamping.
pub const OUTPUT_LIMIT: i64 = 255;

/// Interpret a buffer byte as a signed value.
pub fn to_signed(byte: u8) -> i8 {
    byte as i8
}

/// Clamp `value` to `[-255, 255]` and store it as a two's-complement byte.
///
/// `300` becomes `0xFF`, `-10` becomes `0xF6`.
pub fn clamp_to_signed(value: i64) -> u8 {
    let clamped = if value >= 0 {
        value.min(OUTPUT_LIMIT)
    } else {
        value.max(-OUTPUT_LIMIT)
    };
    clamped as u8
}

/// A value written to an output variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputValue {
    Int(i64),
    Text(String),
}

impl OutputValue {
    /// Text form, used by string fields.
    pub fn to_text(&self) -> Cow<'_, str> {
        match self {
            OutputValue::Int(value) => Cow::Owned(value.to_string()),
            OutputValue::Text(text) => Cow::Borrowed(text),
        }
    }

    /// Integer form, used by numeric fields.
    ///
    /// Text is parsed as a decimal integer; a decimal fraction is truncated
    /// toward zero.
    pub fn to_int(&self) -> Option<i64> {
        match self {
            OutputValue::Int(value) => Some(*value),
            OutputValue::Text(text) => {
                let text = text.trim();
                text.parse::<i64>().ok().or_else(|| {
                    text.parse::<f64>()
                        .ok()
                        .filter(|value| value.is_finite())
                        .map(|value| value.trunc() as i64)
                })
            }
        }
    }
}

impl fmt::Display for OutputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_text())
    }
}

macro_rules! int_value {
    ($($ty:ty),*) => {
        $(impl From<$ty> for OutputValue {
            fn from(value: $ty) -> Self {
                OutputValue::Int(i64::from(value))
            }
        })*
    };
}

int_value!(i8, u8, i16, u16, i32, u32, i64, bool);

impl From<&str> for OutputValue {
    fn from(value: &str) -> Self {
        OutputValue::Text(value.to_string())
    }
}

impl From<String> for OutputValue {
    fn from(value: String) -> Self {
        OutputValue::Text(value)
    }
}
