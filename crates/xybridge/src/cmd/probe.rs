use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use xybridge_frame::{encode_frame, Command, Frame, FrameDecoder, FrameError, MAX_FRAME_SIZE};

use crate::cmd::{parse_duration, ProbeArgs, ProbeCommand};
use crate::exit::{frame_error, io_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_probe, OutputFormat};

pub fn run(args: ProbeArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_duration(&args.timeout)?;
    let addr = resolve(&args.addr)?;
    let request = build_request(args.command, &args.payload)?;

    let mut stream = TcpStream::connect_timeout(&addr, timeout)
        .map_err(|err| io_error(&format!("connect to {addr} failed"), err))?;
    stream
        .set_read_timeout(Some(timeout))
        .and_then(|()| stream.set_write_timeout(Some(timeout)))
        .map_err(|err| io_error("socket setup failed", err))?;

    let mut wire = BytesMut::new();
    encode_frame(request.command, request.payload.as_ref(), &mut wire)
        .map_err(|err| frame_error("encode failed", err))?;
    stream
        .write_all(&wire)
        .map_err(|err| io_error("send failed", err))?;

    let response = read_response(&mut stream, timeout)?;
    print_probe(&response, &addr.to_string(), format);
    Ok(SUCCESS)
}

fn resolve(addr: &str) -> CliResult<SocketAddr> {
    addr.to_socket_addrs()
        .map_err(|err| CliError::new(USAGE, format!("invalid address `{addr}`: {err}")))?
        .next()
        .ok_or_else(|| CliError::new(USAGE, format!("address `{addr}` did not resolve")))
}

fn build_request(command: ProbeCommand, payload: &[u8]) -> CliResult<Frame> {
    let command = match command {
        ProbeCommand::Config => Command::SendConfig,
        ProbeCommand::All => Command::SendAllVariables,
        ProbeCommand::Output => Command::SendOutputVariables,
        ProbeCommand::Input => {
            return Ok(Frame::new(
                Command::ReceiveInputVariables.as_byte(),
                payload.to_vec(),
            ))
        }
    };
    if !payload.is_empty() {
        return Err(CliError::new(
            USAGE,
            "--payload is only sent with --command input",
        ));
    }
    Ok(Frame::request(command))
}

/// Read until one valid frame arrives, skipping anything the decoder rejects.
fn read_response<R: Read>(reader: &mut R, timeout: Duration) -> CliResult<Frame> {
    let deadline = Instant::now() + timeout;
    let mut decoder = FrameDecoder::new(MAX_FRAME_SIZE);
    let mut buf = [0u8; 1024];

    loop {
        if let Some(frame) = decoder.next_frame() {
            return Ok(frame);
        }
        if Instant::now() >= deadline {
            return Err(CliError::new(
                TIMEOUT,
                format!("no response within {timeout:?}"),
            ));
        }
        match reader.read(&mut buf) {
            Ok(0) => return Err(frame_error("receive failed", FrameError::ConnectionClosed)),
            Ok(n) => decoder.push(&buf[..n]),
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(io_error("receive failed", err)),
        }
    }
}
