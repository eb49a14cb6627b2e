//! HTTP byte-range responder
//!
//! Serves the same routes as TFTP over HTTP/1.1 with `Range` support. The
//! body is streamed block by block so large images never sit in memory, and
//! an HTTP-backed response switches to the local mirror once it is complete.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use axum::Router;
use axum::body::Body;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use backend::{Context, ContentSource, Mode, human, sanitize};
use bytes::Bytes;
use futures::stream;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

/// Backend timeout while resolving an HTTP request
pub const BACKEND_TIMEOUT: Duration = Duration::from_secs(10);

/// `Server` header value
pub const SERVER: &str = concat!("bootgate/", env!("CARGO_PKG_VERSION"));

type SharedContext = watch::Receiver<Arc<Context>>;

/// Router answering every path from the current context
pub fn router(context: SharedContext) -> Router {
    Router::new().fallback(respond).with_state(context)
}

/// Serve HTTP on an already bound listener until it fails
pub async fn serve(listener: TcpListener, context: SharedContext) -> Result<()> {
    let local = listener.local_addr()?;
    info!(scope = "http", event = "listen", local = %local, "HTTP server listening");
    axum::serve(listener, router(context).into_make_service_with_connect_info::<SocketAddr>())
        .await
        .context("HTTP server failed")
}

/// Log fields shared by the request and response events
#[derive(Clone)]
struct Exchange {
    remote: SocketAddr,
    file: String,
    started: Instant,
}

impl Exchange {
    /// Body-less reply for refused or failed requests
    fn refuse(&self, status: StatusCode) -> Response {
        warn!(
            scope = "http",
            event = "response",
            remote = %self.remote,
            file = %self.file,
            status = status.as_u16(),
            "HTTP request refused"
        );
        (status, base_headers(), Body::empty()).into_response()
    }

    fn served(&self, mode: Mode, status: StatusCode, size: u64, sent: u64) {
        let elapsed = self.started.elapsed();
        info!(
            scope = "http",
            event = "response",
            remote = %self.remote,
            file = %self.file,
            mode = %mode,
            status = status.as_u16(),
            size,
            sent,
            duration = %human::duration(elapsed),
            bandwidth = %human::bandwidth(sent, elapsed),
            "HTTP response sent"
        );
    }
}

fn base_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::SERVER, HeaderValue::from_static(SERVER));
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers
}

async fn respond(
    State(context): State<SharedContext>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    request_headers: HeaderMap,
) -> Response {
    let context = context.borrow().clone();
    let exchange = Exchange {
        remote,
        file: sanitize(uri.path()),
        started: Instant::now(),
    };
    info!(
        scope = "http",
        event = "request",
        remote = %remote,
        file = %exchange.file,
        method = %method,
        "HTTP request"
    );

    if method != Method::GET && method != Method::HEAD {
        return exchange.refuse(StatusCode::METHOD_NOT_ALLOWED);
    }

    let Some(mut resolution) = context.routes.resolve(&exchange.file, 1, BACKEND_TIMEOUT, "http").await else {
        return exchange.refuse(StatusCode::NOT_FOUND);
    };
    if let Some(job) = resolution.cache_job.take() {
        context.cache.queue(job);
    }

    let size = resolution.size;
    let mode = resolution.mode();
    let mut headers = base_headers();
    if size == 0 {
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from(0u64));
        exchange.served(mode, StatusCode::OK, 0, 0);
        return (StatusCode::OK, headers, Body::empty()).into_response();
    }

    let range = request_headers.get(header::RANGE).and_then(|value| value.to_str().ok());
    let Some((begin, end)) = byte_range(range, size) else {
        return exchange.refuse(StatusCode::RANGE_NOT_SATISFIABLE);
    };

    let status = if begin > 0 || end < size - 1 {
        let content_range = format!("bytes {begin}-{end}/{size}");
        if let Ok(value) = HeaderValue::try_from(content_range) {
            headers.insert(header::CONTENT_RANGE, value);
        }
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(end - begin + 1));

    if method == Method::HEAD {
        exchange.served(mode, status, size, 0);
        return (status, headers, Body::empty()).into_response();
    }

    let body = BodyStream {
        captured: (mode == Mode::Exec).then(|| resolution.content.clone()),
        source: resolution.source,
        mirror: resolution.mirror,
        size,
        offset: begin,
        end: end + 1,
        block_size: context.block_size,
        sent: 0,
        done: false,
        exchange,
        status,
    };
    let body = stream::unfold(body, |mut body| async move {
        let chunk = body.next_chunk().await?;
        Some((chunk, body))
    });

    (status, headers, Body::from_stream(body)).into_response()
}

/// Resolve a `Range` header against `size` into an inclusive byte range.
///
/// A header that is absent or not a single `bytes=N-[M]` range selects the
/// whole resource. Returns `None` when the range cannot be satisfied.
fn byte_range(header: Option<&str>, size: u64) -> Option<(u64, u64)> {
    let last = size.checked_sub(1)?;
    let (begin, end) = match header.and_then(parse_range) {
        Some((begin, Some(end))) if end < last => (begin, end),
        Some((begin, _)) => (begin, last),
        None => (0, last),
    };
    (begin <= end && begin < size).then_some((begin, end))
}

fn parse_range(value: &str) -> Option<(u64, Option<u64>)> {
    let (begin, end) = value.strip_prefix("bytes=")?.split_once('-')?;
    let digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if begin.is_empty() || !digits(begin) || !digits(end) {
        return None;
    }
    let begin = begin.parse().ok()?;
    let end = if end.is_empty() { None } else { Some(end.parse().ok()?) };
    Some((begin, end))
}

/// State of a streamed response body
struct BodyStream {
    source: Arc<dyn ContentSource>,
    mirror: Option<PathBuf>,
    /// Whole command output for exec resolutions
    captured: Option<Bytes>,
    size: u64,
    offset: u64,
    /// Exclusive end of the range
    end: u64,
    block_size: u64,
    sent: u64,
    done: bool,
    exchange: Exchange,
    status: StatusCode,
}

impl BodyStream {
    async fn next_chunk(&mut self) -> Option<io::Result<Bytes>> {
        if self.done {
            return None;
        }
        if self.offset >= self.end {
            self.done = true;
            self.exchange
                .served(self.source.mode(), self.status, self.size, self.sent);
            return None;
        }

        let length = (self.end - self.offset).min(self.block_size);
        match self.fetch(length).await {
            Some(chunk) => {
                self.offset += length;
                self.sent += length;
                Some(Ok(chunk))
            }
            None => {
                self.done = true;
                warn!(
                    scope = "http",
                    event = "error",
                    remote = %self.exchange.remote,
                    file = %self.exchange.file,
                    offset = self.offset,
                    sent = self.sent,
                    "Backend read failed mid-response"
                );
                Some(Err(io::Error::other("backend read failed")))
            }
        }
    }

    async fn fetch(&mut self, length: u64) -> Option<Bytes> {
        if let Some(captured) = &self.captured {
            let start = usize::try_from(self.offset).ok()?;
            let stop = usize::try_from(self.offset + length).ok()?;
            return (stop <= captured.len()).then(|| captured.slice(start..stop));
        }

        backend::route::promote(&mut self.source, self.mirror.as_deref(), self.size).await;
        let content = self.source.read(self.offset, length).await.ok()?;
        (content.data.len() as u64 == length).then_some(content.data)
    }
}
