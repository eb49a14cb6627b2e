//! HTTP origin content source
//!
//! Every read is a ranged GET that must come back as `206 Partial Content`
//! with a `Content-Range: bytes B-E/T` header. Reads either buffer the body
//! (interactive serving) or stream it straight into a file at the matching
//! offset (background mirroring).

use std::io::SeekFrom;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Response, StatusCode};
use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::{BackendError, Result};
use crate::source::{Content, ContentSource, Mode};

/// User-Agent sent to every origin
pub const USER_AGENT: &str = concat!("bootgate/", env!("CARGO_PKG_VERSION"));

/// Parsed `Content-Range: bytes B-E/T` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub begin: u64,
    pub end: u64,
    pub total: u64,
}

impl ContentRange {
    /// Parse the value of a Content-Range header
    ///
    /// Only the fully specified form is accepted; `*` placeholders are not.
    pub fn parse(value: &str) -> Option<Self> {
        let rest = value.strip_prefix("bytes ")?;
        let (range, total) = rest.split_once('/')?;
        let (begin, end) = range.split_once('-')?;

        let digits = |s: &str| -> Option<u64> {
            if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            s.parse().ok()
        };

        Some(Self {
            begin: digits(begin)?,
            end: digits(end)?,
            total: digits(total)?,
        })
    }
}

/// Build header map from `"Name: value"` pairs, skipping invalid entries
pub fn header_map<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                headers.append(name, value);
            }
            _ => warn!(header = name, "Ignoring invalid header"),
        }
    }
    headers
}

/// Content source backed by an HTTP origin
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: Client,
    url: String,
    headers: HeaderMap,
    timeout: Duration,
}

impl HttpSource {
    pub fn new(client: Client, url: impl Into<String>, headers: HeaderMap, timeout: Duration) -> Self {
        Self {
            client,
            url: url.into(),
            headers,
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Same source with a different per-request timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn request(&self, offset: u64, length: u64) -> Result<(Response, ContentRange)> {
        let last = offset + length.max(1) - 1;
        let response = self
            .client
            .get(&self.url)
            .header(header::USER_AGENT, USER_AGENT)
            .header(header::RANGE, format!("bytes={offset}-{last}"))
            .headers(self.headers.clone())
            .timeout(self.timeout)
            .send()
            .await?;

        if response.status() != StatusCode::PARTIAL_CONTENT {
            return Err(BackendError::Status(response.status()));
        }

        let raw = response
            .headers()
            .get(header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let range = ContentRange::parse(&raw).ok_or(BackendError::ContentRange(raw))?;

        Ok((response, range))
    }

    /// Stream `[offset, offset + length)` into `file` at the same offset.
    ///
    /// The origin must return exactly the requested range. Returns the number
    /// of bytes written, which always equals `length` on success.
    pub async fn read_into(&self, file: &mut File, offset: u64, length: u64) -> Result<u64> {
        let start = Instant::now();
        let (mut response, range) = self.request(offset, length).await?;

        let last = offset + length.max(1) - 1;
        if range.begin != offset || range.end != last {
            return Err(BackendError::RangeMismatch {
                requested: format!("{offset}-{last}"),
                returned: format!("{}-{}", range.begin, range.end),
            });
        }

        file.seek(SeekFrom::Start(offset)).await?;
        let mut received = 0u64;
        while let Some(chunk) = response.chunk().await? {
            let remaining = (length - received) as usize;
            let take = chunk.len().min(remaining);
            file.write_all(&chunk[..take]).await?;
            received += take as u64;
            if received == length {
                break;
            }
        }
        file.flush().await?;

        debug!(
            target = %self.url,
            offset,
            length,
            received,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "HTTP stream"
        );

        if received != length {
            return Err(BackendError::ShortBody {
                expected: length,
                received,
            });
        }
        Ok(received)
    }
}

#[async_trait]
impl ContentSource for HttpSource {
    fn mode(&self) -> Mode {
        Mode::Http
    }

    fn target(&self) -> &str {
        &self.url
    }

    async fn read(&self, offset: u64, length: u64) -> Result<Content> {
        let start = Instant::now();
        let result = match self.request(offset, length).await {
            Ok((response, range)) => response
                .bytes()
                .await
                .map(|data| Content::new(range.total, data))
                .map_err(BackendError::from),
            Err(e) => Err(e),
        };
        debug!(
            target = %self.url,
            offset,
            length,
            read = result.as_ref().map(|c| c.data.len()).unwrap_or(0),
            total = result.as_ref().map(|c| c.total as i64).unwrap_or(-1),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "HTTP read"
        );
        result
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::net::SocketAddr;
    use std::sync::Arc;

    use axum::Router;
    use axum::extract::State;
    use axum::http::{HeaderMap as AxumHeaders, StatusCode as AxumStatus, Uri};
    use axum::response::{IntoResponse, Response as AxumResponse};
    use tempfile::tempdir;

    use super::*;

    /// Minimal range-capable origin used by backend tests.
    ///
    /// Paths under `/short/` announce the full range but deliver half of it;
    /// `/plain/` ignores Range and answers 200; `/auth/` requires an
    /// `x-token: secret` header.
    pub(crate) async fn spawn_origin(body: Vec<u8>) -> SocketAddr {
        async fn serve(State(body): State<Arc<Vec<u8>>>, uri: Uri, headers: AxumHeaders) -> AxumResponse {
            let path = uri.path();
            if path.starts_with("/missing/") {
                return AxumStatus::NOT_FOUND.into_response();
            }
            if path.starts_with("/plain/") {
                return (AxumStatus::OK, body.to_vec()).into_response();
            }
            if path.starts_with("/auth/") && headers.get("x-token").and_then(|v| v.to_str().ok()) != Some("secret") {
                return AxumStatus::FORBIDDEN.into_response();
            }

            let total = body.len() as u64;
            let range = headers
                .get("range")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("bytes="))
                .and_then(|v| v.split_once('-'))
                .and_then(|(b, e)| Some((b.parse::<u64>().ok()?, e.parse::<u64>().ok()?)));
            let Some((begin, end)) = range else {
                return (AxumStatus::OK, body.to_vec()).into_response();
            };
            if begin >= total {
                return AxumStatus::RANGE_NOT_SATISFIABLE.into_response();
            }
            let end = end.min(total - 1);
            let mut slice = body[begin as usize..=end as usize].to_vec();
            if path.starts_with("/short/") && slice.len() > 1 {
                slice.truncate(slice.len() / 2);
            }
            (
                AxumStatus::PARTIAL_CONTENT,
                [("content-range", format!("bytes {begin}-{end}/{total}"))],
                slice,
            )
                .into_response()
        }

        let app = Router::new().fallback(serve).with_state(Arc::new(body));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn source(addr: SocketAddr, path: &str) -> HttpSource {
        HttpSource::new(
            Client::new(),
            format!("http://{addr}{path}"),
            HeaderMap::new(),
            Duration::from_secs(5),
        )
    }

    #[test]
    fn test_parse_content_range() {
        assert_eq!(
            ContentRange::parse("bytes 0-0/2048"),
            Some(ContentRange {
                begin: 0,
                end: 0,
                total: 2048
            })
        );
        assert_eq!(ContentRange::parse("bytes 10-19/*"), None);
        assert_eq!(ContentRange::parse("bytes */2048"), None);
        assert_eq!(ContentRange::parse("items 0-1/2"), None);
        assert_eq!(ContentRange::parse("bytes -1-2/3"), None);
    }

    #[test]
    fn test_header_map_skips_invalid() {
        let headers = header_map([("X-Token", "abc"), ("bad header", "x")]);
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("x-token").unwrap(), "abc");
    }

    #[tokio::test]
    async fn test_buffered_read_reports_total() {
        let body: Vec<u8> = (0..2048u32).map(|i| i as u8).collect();
        let addr = spawn_origin(body.clone()).await;

        let content = source(addr, "/boot/image.bin").read(0, 1).await.unwrap();
        assert_eq!(content.total, 2048);
        assert_eq!(&content.data[..], &body[..1]);

        let content = source(addr, "/boot/image.bin").read(1000, 100).await.unwrap();
        assert_eq!(&content.data[..], &body[1000..1100]);
    }

    #[tokio::test]
    async fn test_non_partial_responses_fail() {
        let addr = spawn_origin(vec![1; 64]).await;

        assert!(matches!(
            source(addr, "/plain/x").read(0, 1).await,
            Err(BackendError::Status(StatusCode::OK))
        ));
        assert!(matches!(
            source(addr, "/missing/x").read(0, 1).await,
            Err(BackendError::Status(StatusCode::NOT_FOUND))
        ));
    }

    #[tokio::test]
    async fn test_custom_headers_are_sent() {
        let addr = spawn_origin(vec![7; 16]).await;

        assert!(source(addr, "/auth/x").read(0, 1).await.is_err());

        let authed = HttpSource::new(
            Client::new(),
            format!("http://{addr}/auth/x"),
            header_map([("x-token", "secret")]),
            Duration::from_secs(5),
        );
        assert_eq!(authed.read(0, 1).await.unwrap().total, 16);
    }

    #[tokio::test]
    async fn test_stream_into_file() {
        let body: Vec<u8> = (0..4096u32).map(|i| (i * 7) as u8).collect();
        let addr = spawn_origin(body.clone()).await;
        let dir = tempdir().unwrap();
        let path = dir.path().join("out");
        let mut file = File::create(&path).await.unwrap();

        let src = source(addr, "/boot/image.bin");
        assert_eq!(src.read_into(&mut file, 2048, 2048).await.unwrap(), 2048);
        assert_eq!(src.read_into(&mut file, 0, 2048).await.unwrap(), 2048);
        drop(file);

        assert_eq!(std::fs::read(&path).unwrap(), body);
    }

    #[tokio::test]
    async fn test_stream_rejects_mismatch_and_short_body() {
        let addr = spawn_origin(vec![3; 100]).await;
        let dir = tempdir().unwrap();
        let mut file = File::create(dir.path().join("out")).await.unwrap();

        // Origin clips the range at the end of the resource
        let result = source(addr, "/boot/x").read_into(&mut file, 50, 100).await;
        assert!(matches!(result, Err(BackendError::RangeMismatch { .. })));

        let result = source(addr, "/short/x").read_into(&mut file, 0, 100).await;
        assert!(matches!(result, Err(BackendError::ShortBody { expected: 100, .. })));
    }
}
