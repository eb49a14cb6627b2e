//! TFTP Session Engine
//!
//! One session serves one read request from its own UDP socket, bound to
//! an ephemeral port and connected to the client. The flow is
//! validate → resolve → negotiate → transfer, with one block in flight at a
//! time. Content is pulled from the resolved backend in large slices and
//! cut into blocks locally; an HTTP-backed transfer switches to the local
//! mirror as soon as one of the right size appears on disk.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use backend::{Context, ContentSource, Mode, human, sanitize};
use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::time::timeout_at;
use tracing::{debug, info, warn};

use crate::protocol::{
    TftpErrorCode, TftpOpcode, TransferOptions, build_data, build_error, build_oack, get_opcode, parse_ack,
    parse_error, parse_rrq,
};

/// Bytes read from a backend while resolving a request
pub const PREFETCH_SIZE: u64 = 64 << 10;

/// Times a single packet is sent before the session gives up
pub const MAX_SENDS: u32 = 3;

/// Client packets in a read session are ACKs and errors
const RECV_BUFFER: usize = 2048;

/// How a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Every block was acknowledged
    Completed { size: u64 },
    /// Request refused with an error packet
    Rejected { code: TftpErrorCode, message: &'static str },
    /// Retry budget exhausted; the client is presumed gone
    RetriesExceeded { sent: u64 },
    /// Client sent an error packet
    ClientError { code: u16, message: String },
    /// Client sent a packet that has no place in a read transfer
    IllegalOperation { opcode: u16 },
}

/// Create the per-session socket: ephemeral port, connected to the client
pub async fn create_session_socket(local_ip: IpAddr, client: SocketAddr) -> Result<UdpSocket> {
    let local_ip = match (local_ip, client) {
        (IpAddr::V4(ip), SocketAddr::V4(_)) => IpAddr::V4(ip),
        (IpAddr::V6(ip), SocketAddr::V6(_)) => IpAddr::V6(ip),
        (_, SocketAddr::V4(_)) => IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED),
        (_, SocketAddr::V6(_)) => IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED),
    };

    let sock = UdpSocket::bind(SocketAddr::new(local_ip, 0))
        .await
        .context("failed to bind session socket")?;
    sock.connect(client)
        .await
        .with_context(|| format!("failed to connect session socket to {client}"))?;

    debug!("Session socket bound to {}", sock.local_addr()?);
    Ok(sock)
}

/// Serve one request packet received by a listener.
///
/// `local_ip` is the listener's address; replies come from a fresh port on
/// it. Errors are socket failures only; protocol outcomes are reported in
/// the returned [`SessionOutcome`].
pub async fn handle_request(
    context: Arc<Context>,
    packet: &[u8],
    local_ip: IpAddr,
    client: SocketAddr,
) -> Result<SessionOutcome> {
    let sock = create_session_socket(local_ip, client).await?;
    let local = sock.local_addr()?;

    if get_opcode(packet) != Some(TftpOpcode::ReadRequest.as_u16()) {
        return reject(&sock, TftpErrorCode::IllegalOperation, "read requests only").await;
    }
    let request = parse_rrq(packet)?;
    let file = sanitize(&request.filename);
    let Some(mode) = request.transfer_mode() else {
        return reject(&sock, TftpErrorCode::IllegalOperation, "unknown transfer mode").await;
    };

    let options = TransferOptions::negotiate(&request.options);
    let requested: Vec<String> = request.options.iter().map(|(k, v)| format!("{k}={v}")).collect();
    info!(
        scope = "tftp",
        event = "request",
        %local,
        remote = %client,
        file = %file,
        transfer_mode = %mode,
        options = %requested.join(" "),
        "Read request"
    );

    let resolution = if file.is_empty() {
        None
    } else {
        context.routes.resolve(&file, PREFETCH_SIZE, options.timeout, "tftp").await
    };
    let Some(mut resolution) = resolution else {
        warn!(
            scope = "tftp",
            event = "error",
            %local,
            remote = %client,
            file = %file,
            code = TftpErrorCode::FileNotFound.as_u16(),
            "File not found"
        );
        return reject(&sock, TftpErrorCode::FileNotFound, "file not found").await;
    };
    if let Some(job) = resolution.cache_job.take() {
        context.cache.queue(job);
    }

    let blocks = (context.block_size / options.blksize as u64).max(1);
    let mut transfer = Transfer {
        sock: &sock,
        source: resolution.source,
        mirror: resolution.mirror,
        size: resolution.size,
        blksize: options.blksize,
        timeout: options.timeout,
        refill: blocks * options.blksize as u64,
        buffer: resolution.content,
        buffer_offset: 0,
        recv: vec![0u8; RECV_BUFFER],
    };

    let start = Instant::now();
    let outcome = transfer.run(&options).await?;
    let elapsed = start.elapsed();
    let mode = transfer.source.mode();

    match &outcome {
        SessionOutcome::Completed { size } => info!(
            scope = "tftp",
            event = "response",
            %local,
            remote = %client,
            file = %file,
            %mode,
            size,
            sent = size,
            duration = %human::duration(elapsed),
            bandwidth = %human::bandwidth(*size, elapsed),
            "Transfer complete"
        ),
        SessionOutcome::RetriesExceeded { sent } => warn!(
            scope = "tftp",
            event = "error",
            %local,
            remote = %client,
            file = %file,
            %mode,
            size = transfer.size,
            sent,
            code = 0,
            "Retries count exceeded"
        ),
        SessionOutcome::ClientError { code, message } => warn!(
            scope = "tftp",
            event = "error",
            %local,
            remote = %client,
            file = %file,
            %mode,
            size = transfer.size,
            code,
            error = %message,
            "Client aborted transfer"
        ),
        SessionOutcome::IllegalOperation { opcode } => warn!(
            scope = "tftp",
            event = "error",
            %local,
            remote = %client,
            file = %file,
            %mode,
            size = transfer.size,
            code = TftpErrorCode::IllegalOperation.as_u16(),
            opcode,
            "Illegal TFTP operation"
        ),
        SessionOutcome::Rejected { .. } => {}
    }
    Ok(outcome)
}

async fn reject(sock: &UdpSocket, code: TftpErrorCode, message: &'static str) -> Result<SessionOutcome> {
    sock.send(&build_error(code, message)).await?;
    Ok(SessionOutcome::Rejected { code, message })
}

/// What came back after sending a packet
enum Reply {
    Acked,
    TimedOut,
    Ended(SessionOutcome),
}

struct Transfer<'a> {
    sock: &'a UdpSocket,
    source: Arc<dyn ContentSource>,
    mirror: Option<PathBuf>,
    size: u64,
    blksize: usize,
    timeout: Duration,
    /// Bytes fetched from the backend when the buffer runs dry
    refill: u64,
    buffer: Bytes,
    buffer_offset: u64,
    recv: Vec<u8>,
}

impl Transfer<'_> {
    async fn run(&mut self, options: &TransferOptions) -> Result<SessionOutcome> {
        if options.wants_oack() {
            let oack = build_oack(&options.oack(self.size));
            debug!(size = self.size, packet = ?oack, "Sending OACK");
            if let Some(outcome) = self.deliver(&oack, 0).await? {
                return Ok(outcome);
            }
        }

        let blksize = self.blksize as u64;
        let mut offset = 0u64;
        loop {
            let length = blksize.min(self.size - offset);
            let block = ((offset / blksize) + 1) as u16;

            let mut sends = 0;
            loop {
                if sends >= MAX_SENDS {
                    return Ok(SessionOutcome::RetriesExceeded { sent: offset });
                }
                sends += 1;

                // A failed refetch costs a send and waits like a lost ACK
                let Some(data) = self.block(offset, length).await else {
                    debug!(offset, length, sends, "Backend refetch failed");
                    tokio::time::sleep(self.timeout).await;
                    continue;
                };
                match self.exchange(&build_data(block, &data), block).await? {
                    Reply::Acked => break,
                    Reply::TimedOut => debug!(block, sends, "Retransmitting"),
                    Reply::Ended(outcome) => return Ok(outcome),
                }
            }

            offset += length;
            if length < blksize {
                return Ok(SessionOutcome::Completed { size: self.size });
            }
        }
    }

    /// Send a control packet until `block` is acknowledged.
    ///
    /// Returns `Some` when the session is over.
    async fn deliver(&mut self, packet: &[u8], block: u16) -> Result<Option<SessionOutcome>> {
        for _ in 0..MAX_SENDS {
            match self.exchange(packet, block).await? {
                Reply::Acked => return Ok(None),
                Reply::TimedOut => debug!(block, "Retransmitting"),
                Reply::Ended(outcome) => return Ok(Some(outcome)),
            }
        }
        Ok(Some(SessionOutcome::RetriesExceeded { sent: 0 }))
    }

    /// Send one packet and wait up to the timeout for the matching ACK
    async fn exchange(&mut self, packet: &[u8], block: u16) -> Result<Reply> {
        self.sock.send(packet).await?;
        let deadline = tokio::time::Instant::now() + self.timeout;

        loop {
            let n = match timeout_at(deadline, self.sock.recv(&mut self.recv)).await {
                Err(_) => return Ok(Reply::TimedOut),
                Ok(result) => result.context("session receive failed")?,
            };
            if n <= 2 {
                continue;
            }
            let response = &self.recv[..n];

            match get_opcode(response) {
                Some(op) if op == TftpOpcode::Acknowledgment.as_u16() => {
                    if let Ok(ack) = parse_ack(response)
                        && ack == block
                    {
                        return Ok(Reply::Acked);
                    }
                }
                Some(op) if op == TftpOpcode::Error.as_u16() => {
                    let (code, message) = parse_error(response).unwrap_or((0, String::new()));
                    return Ok(Reply::Ended(SessionOutcome::ClientError { code, message }));
                }
                Some(opcode) => {
                    let error = TftpErrorCode::IllegalOperation;
                    self.sock.send(&build_error(error, error.default_message())).await?;
                    return Ok(Reply::Ended(SessionOutcome::IllegalOperation { opcode }));
                }
                None => {}
            }
        }
    }

    /// Bytes of the block at `offset`, refilling the buffer when needed.
    ///
    /// Returns `None` when the backend could not supply them.
    async fn block(&mut self, offset: u64, length: u64) -> Option<Bytes> {
        if length == 0 {
            return Some(Bytes::new());
        }
        let start = offset.checked_sub(self.buffer_offset)?;
        if start + length <= self.buffer.len() as u64 {
            return Some(self.buffer.slice(start as usize..(start + length) as usize));
        }

        // Exec output was captured whole during resolution
        if self.source.mode() == Mode::Exec {
            return None;
        }
        self.promote().await;

        let content = self.source.read(offset, self.refill).await.ok()?;
        self.buffer = content.data;
        self.buffer_offset = offset;
        if length > self.buffer.len() as u64 {
            return None;
        }
        Some(self.buffer.slice(..length as usize))
    }

    /// Switch an HTTP transfer to the local mirror once it is complete
    async fn promote(&mut self) {
        backend::route::promote(&mut self.source, self.mirror.as_deref(), self.size).await;
    }
}
