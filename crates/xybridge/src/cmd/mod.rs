use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use xybridge_dashboard::DEFAULT_PORT;

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod inspect;
pub mod probe;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve a dashboard described by a configuration file.
    Serve(ServeArgs),
    /// Print the variable layout of a configuration file.
    Inspect(InspectArgs),
    /// Send one request to a dashboard server and print the response.
    Probe(ProbeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Inspect(args) => inspect::run(args, format),
        Command::Probe(args) => probe::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Configuration text generated by the dashboard editor.
    pub config: PathBuf,
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: IpAddr,
    /// TCP port to listen on.
    #[arg(long, short = 'p', default_value_t = DEFAULT_PORT)]
    pub port: u16,
    /// Close connections idle for this long (e.g. 30s, 500ms).
    #[arg(long, value_name = "DURATION")]
    pub socket_timeout: Option<String>,
    /// Initial output value, `name=value` (repeatable).
    #[arg(long, value_name = "NAME=VALUE")]
    pub set: Vec<String>,
    /// Read `name=value` output updates from stdin, one per line.
    #[arg(long)]
    pub stdin: bool,
    /// Serve on the tokio runtime instead of one thread per connection.
    #[cfg(feature = "async")]
    #[arg(long = "async")]
    pub use_async: bool,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Configuration text generated by the dashboard editor.
    pub config: PathBuf,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum ProbeCommand {
    /// SEND_CONFIG
    Config,
    /// SEND_ALL_VARIABLES
    All,
    /// SEND_OUTPUT_VARIABLES
    Output,
    /// RECEIVE_INPUT_VARIABLES, carrying --payload
    Input,
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Server address, `host:port`.
    pub addr: String,
    /// Request to send.
    #[arg(long, short = 'c', value_enum, default_value = "config")]
    pub command: ProbeCommand,
    /// Input bytes for `--command input` (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub payload: Vec<u8>,
    /// Connect and response timeout (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

/// Parse `5s`, `500ms` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

/// Split `name=value`; the value may itself contain `=`.
pub fn parse_assignment(input: &str) -> CliResult<(&str, &str)> {
    match input.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim(), value)),
        _ => Err(CliError::new(
            USAGE,
            format!("expected NAME=VALUE, got `{input}`"),
        )),
    }
}
