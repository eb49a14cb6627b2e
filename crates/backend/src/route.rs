//! Route resolution
//!
//! A route table maps a sanitized request path to an ordered chain of
//! backends. The first route whose pattern matches wins; its backends are
//! tried in order and the first one able to report a size serves the
//! request. Targets, headers and environment entries are templates expanded
//! with the route pattern's capture groups (`$1`, `${name}`).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use regex::Regex;
use reqwest::Client;
use reqwest::header::HeaderMap;
use serde::Deserialize;
use tracing::debug;

use crate::cache::CacheJob;
use crate::error::PatternError;
use crate::exec::ExecSource;
use crate::file::FileSource;
use crate::http::{HttpSource, header_map};
use crate::source::{ContentSource, Mode};

/// Bounds for a cache policy start delay, in seconds
pub const CACHE_DELAY_RANGE: (u64, u64) = (1, 60);
/// Bounds for the number of parallel chunks of a cache job
pub const CACHE_CONCURRENCY_RANGE: (usize, usize) = (1, 16);
/// Longest refresh interval a mirrored file may carry, in seconds
pub const CACHE_REFRESH_MAX: u64 = 30 * 86_400;

const DEFAULT_CACHE_DELAY: u64 = 5;
const DEFAULT_CACHE_CONCURRENCY: usize = 8;

/// Route as written in the configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    #[serde(rename = "match")]
    pub pattern: String,
    #[serde(default)]
    pub backends: Vec<BackendConfig>,
}

/// One backend of a route
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub mode: Mode,
    pub target: String,
    /// `"Name: value"` header templates (http only)
    #[serde(default)]
    pub headers: Vec<String>,
    /// `"NAME: value"` environment templates (exec only)
    #[serde(default)]
    pub env: Vec<String>,
    /// Mirroring policies, checked in order (http only)
    #[serde(default)]
    pub cache: Vec<CachePolicyConfig>,
}

/// Policy deciding whether and where an HTTP resolution gets mirrored
#[derive(Debug, Clone, Deserialize)]
pub struct CachePolicyConfig {
    #[serde(rename = "match")]
    pub pattern: String,
    pub path: String,
    #[serde(default = "default_cache_delay")]
    pub delay: u64,
    #[serde(default = "default_cache_concurrency")]
    pub concurrency: usize,
    #[serde(default)]
    pub refresh: u64,
}

fn default_cache_delay() -> u64 {
    DEFAULT_CACHE_DELAY
}

fn default_cache_concurrency() -> usize {
    DEFAULT_CACHE_CONCURRENCY
}

/// Strip traversal and shell metacharacter sequences from a request path.
///
/// Each sequence is removed in a single left-to-right pass, in this order:
/// `../`, `./`, `&`, `;`. Surrounding whitespace is trimmed.
pub fn sanitize(path: &str) -> String {
    ["../", "./", "&", ";"]
        .iter()
        .fold(path.to_string(), |acc, seq| acc.replace(seq, ""))
        .trim()
        .to_string()
}

/// Split `"Name: value"` and expand the value; entries without a name are dropped
fn expand_pair(matcher: &Regex, file: &str, entry: &str) -> Option<(String, String)> {
    let (name, value) = entry.split_once(':')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let value = matcher.replace_all(file, value.trim()).into_owned();
    Some((name.to_string(), value))
}

fn expand_headers(matcher: &Regex, file: &str, entries: &[String]) -> HeaderMap {
    let pairs: Vec<(String, String)> = entries
        .iter()
        .filter_map(|entry| expand_pair(matcher, file, entry))
        .collect();
    header_map(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
}

#[derive(Debug, Clone)]
struct CachePolicy {
    matcher: Regex,
    path: String,
    delay: Duration,
    concurrency: usize,
    refresh: u64,
}

#[derive(Debug, Clone)]
struct Backend {
    mode: Mode,
    target: String,
    headers: Vec<String>,
    env: Vec<String>,
    cache: Vec<CachePolicy>,
}

#[derive(Debug, Clone)]
struct Route {
    matcher: Regex,
    backends: Vec<Backend>,
}

/// A successfully resolved request
pub struct Resolution {
    /// Source that reported the size
    pub source: Arc<dyn ContentSource>,
    /// Total size of the resource
    pub size: u64,
    /// Bytes returned by the initial read, starting at offset 0
    pub content: Bytes,
    /// Path of the last file backend tried before this one, if any.
    ///
    /// For HTTP resolutions this is where a finished mirror would appear.
    pub mirror: Option<PathBuf>,
    /// Mirroring job produced by the first matching cache policy
    pub cache_job: Option<CacheJob>,
}

impl Resolution {
    pub fn mode(&self) -> Mode {
        self.source.mode()
    }
}

/// Swap an HTTP `source` for its local mirror once the mirror holds exactly
/// `size` bytes. Returns true when the source was replaced.
pub async fn promote(source: &mut Arc<dyn ContentSource>, mirror: Option<&Path>, size: u64) -> bool {
    if source.mode() != Mode::Http {
        return false;
    }
    let Some(mirror) = mirror else {
        return false;
    };
    if FileSource::regular_size(mirror).await != Some(size) {
        return false;
    }
    debug!(mirror = %mirror.display(), "Serving from local mirror");
    *source = Arc::new(FileSource::new(mirror));
    true
}

/// Compiled, immutable route table
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<Route>,
    client: Client,
}

impl RouteTable {
    /// Compile route patterns and clamp cache policy settings
    pub fn new(configs: &[RouteConfig], client: Client) -> Result<Self, PatternError> {
        let mut routes = Vec::with_capacity(configs.len());
        for (index, config) in configs.iter().enumerate() {
            let compile = |pattern: &str| {
                Regex::new(pattern).map_err(|source| PatternError {
                    route: index,
                    pattern: pattern.to_string(),
                    source,
                })
            };

            let mut backends = Vec::with_capacity(config.backends.len());
            for backend in &config.backends {
                let mut cache = Vec::with_capacity(backend.cache.len());
                for policy in &backend.cache {
                    cache.push(CachePolicy {
                        matcher: compile(&policy.pattern)?,
                        path: policy.path.trim().to_string(),
                        delay: Duration::from_secs(policy.delay.clamp(CACHE_DELAY_RANGE.0, CACHE_DELAY_RANGE.1)),
                        concurrency: policy
                            .concurrency
                            .clamp(CACHE_CONCURRENCY_RANGE.0, CACHE_CONCURRENCY_RANGE.1),
                        refresh: policy.refresh.min(CACHE_REFRESH_MAX),
                    });
                }
                backends.push(Backend {
                    mode: backend.mode,
                    target: backend.target.trim().to_string(),
                    headers: backend.headers.clone(),
                    env: backend.env.clone(),
                    cache,
                });
            }

            routes.push(Route {
                matcher: compile(&config.pattern)?,
                backends,
            });
        }
        Ok(Self { routes, client })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Resolve an already sanitized path.
    ///
    /// File and HTTP backends are checked with a read of `prefetch` bytes at
    /// offset 0; exec backends are always read in full. `timeout` bounds
    /// HTTP requests and command runs. `trigger` names the requester in any
    /// cache job produced. Returns `None` when nothing serves the path.
    pub async fn resolve(&self, file: &str, prefetch: u64, timeout: Duration, trigger: &str) -> Option<Resolution> {
        let Some(route) = self.routes.iter().find(|route| route.matcher.is_match(file)) else {
            debug!(file, "No matching route");
            return None;
        };

        let mut mirror: Option<PathBuf> = None;
        for backend in &route.backends {
            let target = route.matcher.replace_all(file, backend.target.as_str()).into_owned();
            if target.is_empty() {
                continue;
            }

            let headers = match backend.mode {
                Mode::Http => expand_headers(&route.matcher, file, &backend.headers),
                _ => HeaderMap::new(),
            };
            let (source, length): (Arc<dyn ContentSource>, u64) = match backend.mode {
                Mode::File => (Arc::new(FileSource::new(&target)), prefetch),
                Mode::Http => {
                    let source = HttpSource::new(self.client.clone(), &target, headers.clone(), timeout);
                    (Arc::new(source), prefetch)
                }
                Mode::Exec => {
                    let env = backend
                        .env
                        .iter()
                        .filter_map(|entry| expand_pair(&route.matcher, file, entry))
                        .collect();
                    (Arc::new(ExecSource::new(&target, env, timeout)), u64::MAX)
                }
            };

            match source.read(0, length).await {
                Ok(content) => {
                    let cache_job = match backend.mode {
                        Mode::Http => cache_job(route, backend, file, &target, headers, trigger),
                        _ => None,
                    };
                    return Some(Resolution {
                        source,
                        size: content.total,
                        content: content.data,
                        mirror,
                        cache_job,
                    });
                }
                Err(e) => {
                    debug!(file, mode = %backend.mode, target = %target, error = %e, "Backend miss");
                    if backend.mode == Mode::File {
                        mirror = Some(PathBuf::from(&target));
                    }
                }
            }
        }
        None
    }
}

/// Job for the first cache policy of `backend` matching `file`
fn cache_job(
    route: &Route,
    backend: &Backend,
    file: &str,
    remote: &str,
    headers: HeaderMap,
    trigger: &str,
) -> Option<CacheJob> {
    let policy = backend.cache.iter().find(|policy| policy.matcher.is_match(file))?;
    let local = route.matcher.replace_all(file, policy.path.as_str()).into_owned();
    if local.is_empty() {
        return None;
    }

    Some(CacheJob {
        trigger: trigger.to_string(),
        remote: remote.to_string(),
        local,
        headers,
        delay: policy.delay,
        concurrency: policy.concurrency,
        refresh: policy.refresh,
    })
}
