use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;
use xybridge_dashboard::InputEvent;
use xybridge_frame::Frame;
use xybridge_layout::{Encoding, Layout};

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct InputEventOutput<'a> {
    event: &'static str,
    index: usize,
    name: Option<&'a str>,
    value: i8,
    timestamp: String,
}

pub fn print_input_event(event: &InputEvent, format: OutputFormat) {
    let name = event.name.as_deref();
    match format {
        OutputFormat::Json => {
            let out = InputEventOutput {
                event: "input",
                index: event.index,
                name,
                value: event.value,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table | OutputFormat::Pretty => {
            println!(
                "input {} ({}) = {}",
                event.index,
                name.unwrap_or("-"),
                event.value
            );
        }
        OutputFormat::Raw => {
            println!("{}={}", name.unwrap_or("-"), event.value);
        }
    }
}

#[derive(Serialize)]
struct InputOutput<'a> {
    name: &'a str,
    index: usize,
}

#[derive(Serialize)]
struct OutputVarOutput<'a> {
    name: &'a str,
    offset: usize,
    len: usize,
    encoding: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    min: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max: Option<i32>,
}

#[derive(Serialize)]
struct LayoutOutput<'a> {
    input_size: usize,
    output_size: usize,
    descriptor_size: usize,
    inputs: Vec<InputOutput<'a>>,
    outputs: Vec<OutputVarOutput<'a>>,
}

impl<'a> LayoutOutput<'a> {
    fn new(layout: &'a Layout) -> Self {
        Self {
            input_size: layout.input_size(),
            output_size: layout.output_size(),
            descriptor_size: layout.descriptor().len(),
            inputs: layout
                .inputs()
                .iter()
                .map(|var| InputOutput {
                    name: &var.name,
                    index: var.index,
                })
                .collect(),
            outputs: layout
                .outputs()
                .iter()
                .map(|var| {
                    let (encoding, min, max) = match var.encoding {
                        Encoding::Scalar { min, max } => ("scalar", Some(min), Some(max)),
                        Encoding::Text => ("text", None, None),
                    };
                    OutputVarOutput {
                        name: &var.name,
                        offset: var.offset,
                        len: var.len,
                        encoding,
                        min,
                        max,
                    }
                })
                .collect(),
        }
    }
}

pub fn print_layout(layout: &Layout, format: OutputFormat) {
    let out = LayoutOutput::new(layout);
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["DIRECTION", "NAME", "OFFSET", "LEN", "ENCODING"]);
            for var in &out.inputs {
                table.add_row(vec![
                    "input".to_string(),
                    var.name.to_string(),
                    var.index.to_string(),
                    "1".to_string(),
                    "signed".to_string(),
                ]);
            }
            for var in &out.outputs {
                table.add_row(vec![
                    "output".to_string(),
                    var.name.to_string(),
                    var.offset.to_string(),
                    var.len.to_string(),
                    encoding_label(var),
                ]);
            }
            println!(
                "input buffer {} bytes, output buffer {} bytes, descriptor {} bytes",
                out.input_size, out.output_size, out.descriptor_size
            );
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("Layout:");
            println!("  Input buffer:  {} bytes", out.input_size);
            println!("  Output buffer: {} bytes", out.output_size);
            println!("  Descriptor:    {} bytes", out.descriptor_size);
            for var in &out.inputs {
                println!("  input  [{}] {}", var.index, var.name);
            }
            for var in &out.outputs {
                println!(
                    "  output [{}..{}] {} {}",
                    var.offset,
                    var.offset + var.len,
                    var.name,
                    encoding_label(var)
                );
            }
        }
        OutputFormat::Raw => {
            for name in layout.input_names() {
                println!("input {name}");
            }
            for name in layout.output_names() {
                println!("output {name}");
            }
        }
    }
}

fn encoding_label(var: &OutputVarOutput<'_>) -> String {
    match (var.min, var.max) {
        (Some(min), Some(max)) => format!("{min}..{max}"),
        _ => "text".to_string(),
    }
}

#[derive(Serialize)]
struct ProbeOutput<'a> {
    server: &'a str,
    command: &'static str,
    command_byte: u8,
    frame_size: usize,
    payload_size: usize,
    payload: String,
}

pub fn print_probe(frame: &Frame, server: &str, format: OutputFormat) {
    let command = frame.command().map_or("UNKNOWN", |cmd| cmd.name());
    match format {
        OutputFormat::Json => {
            let out = ProbeOutput {
                server,
                command,
                command_byte: frame.command,
                frame_size: frame.wire_size(),
                payload_size: frame.payload.len(),
                payload: hex(frame.payload.as_ref()),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["SERVER", "COMMAND", "SIZE", "PAYLOAD"])
                .add_row(vec![
                    server.to_string(),
                    format!("{command} ({:#04x})", frame.command),
                    frame.payload.len().to_string(),
                    hex(frame.payload.as_ref()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "command={} ({:#04x}) size={} server={} payload={}",
                command,
                frame.command,
                frame.payload.len(),
                server,
                hex(frame.payload.as_ref())
            );
        }
        OutputFormat::Raw => {
            print_raw(frame.payload.as_ref());
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn hex(data: &[u8]) -> String {
    data.iter()
        .map(|byte| format!("{byte:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
