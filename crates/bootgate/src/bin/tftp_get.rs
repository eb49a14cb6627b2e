//! Minimal TFTP client to fetch a file from a server

use std::fs::File;
use std::io::{self, BufWriter, ErrorKind, Write};
use std::net::{IpAddr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::path::Path;
use std::process::exit;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use argh::FromArgs;
use backend::human;
use tftp::{
    MAX_SENDS, TftpErrorCode, TftpOpcode, TftpRequest, TransferMode, TransferOptions, build_ack, get_tftp_opcode,
    parse_data, parse_error, parse_oack,
};

const DEFAULT_PORT: u16 = 69;
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

#[derive(FromArgs, Debug)]
#[argh(
    description = "tftp-get - fetch a file from a TFTP server",
    example = "Save pxelinux.0 in the current directory:\n  {command_name} 10.0.1.50 boot/pxelinux.0",
    example = "Print a menu to stdout:\n  {command_name} 10.0.1.50:6969 menu.ipxe -"
)]
struct Args {
    #[argh(positional, description = "server as host[:port]")]
    server: String,

    #[argh(positional, description = "file to request")]
    remote: String,

    #[argh(positional, description = "local file, '-' for stdout (default: basename of the remote file)")]
    local: Option<String>,

    #[argh(option, short = 'b', default = "16384", description = "block size to request")]
    blksize: usize,

    #[argh(option, short = 't', default = "5", description = "seconds to wait for each packet")]
    timeout: u64,
}

/// Why the client gave up
enum Failure {
    /// Bad arguments or local resources
    Setup(anyhow::Error),
    /// The transfer itself failed
    Transfer(String),
}

impl From<anyhow::Error> for Failure {
    fn from(e: anyhow::Error) -> Self {
        Failure::Setup(e)
    }
}

fn main() {
    let args: Args = argh::from_env();
    match run(args) {
        Ok(()) => {}
        Err(Failure::Setup(e)) => {
            eprintln!("\r{e:#} - aborting");
            exit(2);
        }
        Err(Failure::Transfer(message)) => {
            eprintln!("\r{message} - aborting");
            exit(3);
        }
    }
}

fn run(args: Args) -> Result<(), Failure> {
    let server = server_address(&args.server)?;
    let local = match args.local.as_deref() {
        Some(local) if !local.is_empty() => local.to_string(),
        _ => Path::new(&args.remote)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow!("cannot derive a local name from {:?}", args.remote))?,
    };
    let mut output: Box<dyn Write> = if local == "-" {
        Box::new(io::stdout().lock())
    } else {
        let file = File::create(&local).with_context(|| format!("cannot create {local}"))?;
        Box::new(BufWriter::new(file))
    };

    let bind: SocketAddr = if server.is_ipv4() {
        "0.0.0.0:0".parse().context("invalid bind address")?
    } else {
        "[::]:0".parse().context("invalid bind address")?
    };
    let socket = UdpSocket::bind(bind).context("cannot create socket")?;
    socket
        .set_read_timeout(Some(Duration::from_secs(args.timeout.max(1))))
        .context("cannot set socket timeout")?;

    let mut request = TftpRequest::read_request(args.remote.as_str(), TransferMode::Octet);
    request
        .with_option("blksize", args.blksize.to_string())
        .with_option("tsize", "0");

    let started = Instant::now();
    let received = fetch(&socket, server, &request.to_bytes(), &mut output)?;
    output
        .flush()
        .map_err(|e| Failure::Transfer(format!("write failed: {e}")))?;

    let elapsed = started.elapsed();
    eprintln!(
        "\r{} in {} ({})          ",
        human::size(received),
        human::duration(elapsed),
        human::bandwidth(received, elapsed)
    );
    Ok(())
}

/// `host[:port]` to a socket address, defaulting to port 69
fn server_address(server: &str) -> Result<SocketAddr> {
    if let Ok(ip) = server.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DEFAULT_PORT));
    }
    let with_port = if server.contains(':') {
        server.to_string()
    } else {
        format!("{server}:{DEFAULT_PORT}")
    };
    with_port
        .to_socket_addrs()
        .with_context(|| format!("cannot resolve {server}"))?
        .next()
        .ok_or_else(|| anyhow!("no address for {server}"))
}

/// Receive the whole file into `output`; returns the byte count
fn fetch(socket: &UdpSocket, mut server: SocketAddr, request: &[u8], output: &mut dyn Write) -> Result<u64, Failure> {
    let send = |packet: &[u8], to: SocketAddr| {
        socket
            .send_to(packet, to)
            .map_err(|e| Failure::Transfer(format!("send failed: {e}")))
    };

    let mut buffer = vec![0u8; 128 << 10];
    let mut blksize = TransferOptions::DEFAULT_BLKSIZE;
    let mut tsize: Option<u64> = None;
    let mut connected = false;
    let mut last_ack: Option<Vec<u8>> = None;
    let mut expected: u16 = 1;
    let mut received: u64 = 0;
    let mut sends = 1;
    let started = Instant::now();
    let mut reported = started;

    send(request, server)?;
    loop {
        let (len, from) = match socket.recv_from(&mut buffer) {
            Ok(reply) => reply,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                if sends >= MAX_SENDS {
                    return Err(Failure::Transfer("retries count exceeded".to_string()));
                }
                sends += 1;
                match &last_ack {
                    Some(ack) => send(ack, server)?,
                    None => send(request, server)?,
                };
                continue;
            }
            Err(e) => return Err(Failure::Transfer(format!("receive failed: {e}"))),
        };
        if len <= 2 || (connected && from != server) {
            continue;
        }
        // The transfer continues from the server's session port
        if !connected {
            server = from;
            connected = true;
        }
        let packet = &buffer[..len];

        match get_tftp_opcode(packet) {
            Some(TftpOpcode::OptionAck) => {
                let options = parse_oack(packet).map_err(|e| Failure::Transfer(e.to_string()))?;
                for (name, value) in options {
                    match name.as_str() {
                        "tsize" => tsize = value.parse().ok(),
                        "blksize" => {
                            if let Ok(size) = value.parse::<usize>()
                                && (TransferOptions::MIN_BLKSIZE..=TransferOptions::MAX_BLKSIZE).contains(&size)
                            {
                                blksize = size;
                            }
                        }
                        _ => {}
                    }
                }
                let ack = build_ack(0);
                send(&ack, server)?;
                last_ack = Some(ack);
            }
            Some(TftpOpcode::Data) => {
                let (block, data) = parse_data(packet).map_err(|e| Failure::Transfer(e.to_string()))?;
                let fresh = block == expected;
                if fresh {
                    output
                        .write_all(data)
                        .map_err(|e| Failure::Transfer(format!("write failed: {e}")))?;
                    received += data.len() as u64;
                    expected = expected.wrapping_add(1);
                }
                let ack = build_ack(block);
                send(&ack, server)?;
                last_ack = Some(ack);

                if fresh && data.len() < blksize {
                    return Ok(received);
                }
                if reported.elapsed() >= PROGRESS_INTERVAL {
                    reported = Instant::now();
                    progress(received, tsize, started.elapsed());
                }
            }
            Some(TftpOpcode::Error) => {
                let (code, message) = parse_error(packet).map_err(|e| Failure::Transfer(e.to_string()))?;
                return Err(Failure::Transfer(error_message(code, message)));
            }
            _ => continue,
        }
        sends = 1;
    }
}

/// The server's text, or the standard text for `code` when it sent none
fn error_message(code: u16, message: String) -> String {
    if !message.is_empty() {
        return message;
    }
    match TftpErrorCode::from_u16(code) {
        Some(code) => code.default_message().to_string(),
        None => format!("error {code}"),
    }
}

fn progress(received: u64, tsize: Option<u64>, elapsed: Duration) {
    let bandwidth = human::bandwidth(received, elapsed);
    match tsize {
        Some(total) if total > 0 => eprint!("\r{}/{} ({bandwidth})  ", human::size(received), human::size(total)),
        _ => eprint!("\r{} ({bandwidth})  ", human::size(received)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_prefers_server_text() {
        assert_eq!(error_message(4, "read requests only".to_string()), "read requests only");
        assert_eq!(error_message(0, "backend down".to_string()), "backend down");
        assert_eq!(error_message(1, String::new()), "file not found");
        assert_eq!(error_message(42, String::new()), "error 42");
    }
}
