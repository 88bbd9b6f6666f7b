use bytes::BytesMut;
use tracing::{debug, warn};
use xybridge_frame::{encode_frame, Command};

use crate::error::{ConfigError, Result};
use crate::layout::{Encoding, InputVariable, Layout, OutputVariable, DESCRIPTOR_OFFSET};

/// Name of the configuration byte array.
pub const CONF_MARKER: &str = "RemoteXY_CONF[]";
/// Comment opening the input variable section.
pub const INPUT_MARKER: &str = "input variable";
/// Comment opening the output variable section.
pub const OUTPUT_MARKER: &str = "output variable";
/// Comment closing the variable sections.
pub const END_MARKER: &str = "other variable";

const CONF_END_MARKER: &str = ";";

pub(crate) fn parse(text: &str) -> Result<Layout> {
    let config_bytes = parse_config_array(text)?;
    if config_bytes.len() < DESCRIPTOR_OFFSET {
        return Err(ConfigError::HeaderTooShort {
            len: config_bytes.len(),
        });
    }

    let input_size = usize::from(config_bytes[0]);
    let output_size = usize::from(config_bytes[1]);
    let descriptor = &config_bytes[DESCRIPTOR_OFFSET..];
    let declared_len = usize::from(u16::from_le_bytes([config_bytes[2], config_bytes[3]]));
    if declared_len != descriptor.len() {
        warn!(
            declared = declared_len,
            actual = descriptor.len(),
            "configuration descriptor length disagrees with array contents"
        );
    }

    let mut response = BytesMut::new();
    encode_frame(Command::SendConfig.as_byte(), descriptor, &mut response)?;

    let end = text
        .find(END_MARKER)
        .ok_or(ConfigError::MissingBoundary(END_MARKER))?;
    let input_start = text.find(INPUT_MARKER);
    let output_start = text.find(OUTPUT_MARKER);
    if input_start.is_none() && output_start.is_none() {
        return Err(ConfigError::NoVariablesDeclared);
    }

    let inputs = match input_start {
        Some(start) => {
            let stop = output_start.filter(|&out| out > start).unwrap_or(end);
            parse_inputs(section(text, start, stop))
        }
        None => Vec::new(),
    };
    let outputs = match output_start {
        Some(start) => parse_outputs(section(text, start, end)),
        None => Vec::new(),
    };

    if inputs.len() > input_size {
        return Err(ConfigError::InputOverflow {
            declared: input_size,
            found: inputs.len(),
        });
    }
    let required: usize = outputs.iter().map(|var| var.len).sum();
    if required > output_size {
        return Err(ConfigError::OutputOverflow {
            declared: output_size,
            required,
        });
    }
    if inputs.len() < input_size || required < output_size {
        debug!(
            input_size,
            inputs = inputs.len(),
            output_size,
            output_bytes = required,
            "buffers carry unnamed trailing bytes"
        );
    }

    debug!(
        inputs = inputs.len(),
        outputs = outputs.len(),
        descriptor = descriptor.len(),
        "parsed dashboard configuration"
    );

    Ok(Layout {
        config_response: response.freeze(),
        config_bytes,
        input_size,
        output_size,
        inputs,
        outputs,
    })
}

fn parse_config_array(text: &str) -> Result<Vec<u8>> {
    let start = text
        .find(CONF_MARKER)
        .ok_or(ConfigError::MissingBoundary(CONF_MARKER))?
        + CONF_MARKER.len();
    let rest = strip_comments(&text[start..]);
    let end = rest
        .find(CONF_END_MARKER)
        .ok_or(ConfigError::MissingBoundary(CONF_END_MARKER))?;
    let body = &rest[..end];
    let values = body.find('=').map_or(body, |eq| &body[eq + 1..]);

    let cleaned: String = values
        .chars()
        .filter(|c| !matches!(c, '{' | '}' | '=' | ';') && !c.is_whitespace())
        .collect();

    cleaned
        .split(',')
        .filter(|token| !token.is_empty())
        .map(|token| {
            token.parse::<u8>().map_err(|_| ConfigError::InvalidConfigByte {
                token: token.to_string(),
            })
        })
        .collect()
}

fn strip_comments(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut rest = src;
    while let Some(slash) = rest.find('/') {
        let (head, tail) = rest.split_at(slash);
        out.push_str(head);
        if let Some(after) = tail.strip_prefix("//") {
            rest = after.find('\n').map_or("", |nl| &after[nl..]);
        } else if let Some(after) = tail.strip_prefix("/*") {
            rest = after.find("*/").map_or("", |close| &after[close + 2..]);
        } else {
            out.push('/');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

fn section(text: &str, start: usize, stop: usize) -> &str {
    if start < stop {
        &text[start..stop]
    } else {
        ""
    }
}

fn parse_inputs(section: &str) -> Vec<InputVariable> {
    section
        .lines()
        .filter_map(match_input)
        .enumerate()
        .map(|(index, name)| InputVariable {
            name: name.to_string(),
            index,
        })
        .collect()
}

fn parse_outputs(section: &str) -> Vec<OutputVariable> {
    let mut offset = 0usize;
    section
        .lines()
        .filter_map(match_output)
        .map(|decl| {
            let var = OutputVariable {
                name: decl.name.to_string(),
                offset,
                len: decl.len,
                encoding: decl.encoding,
            };
            offset += decl.len;
            var
        })
        .collect()
}

/// `[signed|unsigned] char name;`
fn match_input(line: &str) -> Option<&str> {
    let mut cur = Cursor::new(line);
    cur.type_token()?;
    let name = cur.ident()?;
    cur.skip_ws();
    cur.eat(";").then_some(name)
}

struct OutputDecl<'a> {
    name: &'a str,
    len: usize,
    encoding: Encoding,
}

/// `[signed|unsigned] char name[N]; /* string` or `... /* =min..max`
fn match_output(line: &str) -> Option<OutputDecl<'_>> {
    let mut cur = Cursor::new(line);
    cur.type_token()?;
    let name = cur.ident()?;
    cur.skip_ws();

    let mut len = 1;
    if cur.eat("[") {
        cur.skip_ws();
        len = usize::try_from(cur.number()?).ok().filter(|&n| n > 0)?;
        cur.skip_ws();
        if !cur.eat("]") {
            return None;
        }
        cur.skip_ws();
    }
    if !cur.eat(";") {
        return None;
    }

    cur.skip_ws();
    if !(cur.eat("/*") || cur.eat("//")) {
        return None;
    }
    cur.skip_ws();

    let encoding = if cur.keyword("string") {
        Encoding::Text
    } else if cur.eat("=") {
        let min = i32::try_from(cur.number()?).ok()?;
        if !cur.eat("..") {
            return None;
        }
        let max = i32::try_from(cur.number()?).ok()?;
        Encoding::Scalar { min, max }
    } else {
        return None;
    };

    Some(OutputDecl {
        name,
        len,
        encoding,
    })
}

struct Cursor<'a> {
    rest: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(line: &'a str) -> Self {
        Self { rest: line }
    }

    fn skip_ws(&mut self) {
        self.rest = self.rest.trim_start();
    }

    fn eat(&mut self, literal: &str) -> bool {
        match self.rest.strip_prefix(literal) {
            Some(rest) => {
                self.rest = rest;
                true
            }
            None => false,
        }
    }

    /// Like [`Cursor::eat`], but only at a word boundary.
    fn keyword(&mut self, word: &str) -> bool {
        match self.rest.strip_prefix(word) {
            Some(rest) if !rest.starts_with(is_ident_char) => {
                self.rest = rest;
                true
            }
            _ => false,
        }
    }

    fn type_token(&mut self) -> Option<()> {
        self.skip_ws();
        if self.keyword("unsigned") || self.keyword("signed") {
            self.skip_ws();
            return self.keyword("char").then_some(());
        }
        (self.keyword("char") || self.keyword("uint8_t") || self.keyword("int8_t")).then_some(())
    }

    fn ident(&mut self) -> Option<&'a str> {
        self.skip_ws();
        let first = self.rest.chars().next()?;
        if !(first.is_ascii_alphabetic() || first == '_') {
            return None;
        }
        let end = self
            .rest
            .find(|c: char| !is_ident_char(c))
            .unwrap_or(self.rest.len());
        let (ident, rest) = self.rest.split_at(end);
        self.rest = rest;
        Some(ident)
    }

    fn number(&mut self) -> Option<i64> {
        self.skip_ws();
        let digits_start = usize::from(self.rest.starts_with('-'));
        let end = self.rest[digits_start..]
            .find(|c: char| !c.is_ascii_digit())
            .map_or(self.rest.len(), |i| i + digits_start);
        if end == digits_start {
            return None;
        }
        let value = self.rest[..end].parse().ok()?;
        self.rest = &self.rest[end..];
        Some(value)
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
