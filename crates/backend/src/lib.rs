//! Content backends for bootgate
//!
//! This crate holds everything that turns a request path into bytes:
//!
//! - [`ContentSource`] implementations for local files ([`FileSource`]),
//!   HTTP origins ([`HttpSource`]) and command output ([`ExecSource`])
//! - the [`RouteTable`] resolving a path through an ordered backend chain
//! - the [`CacheEngine`] mirroring HTTP resources to disk in the background
//! - the [`Context`] snapshot shared by the TFTP and HTTP front ends

pub mod cache;
pub mod context;
pub mod error;
pub mod exec;
pub mod file;
pub mod http;
pub mod human;
pub mod route;
pub mod source;

pub use reqwest;

pub use cache::{CacheConfig, CacheEngine, CacheJob, CacheQueue, JobOutcome};
pub use context::{Context, DEFAULT_BLOCK_SIZE};
pub use error::{BackendError, PatternError, Result};
pub use exec::ExecSource;
pub use file::FileSource;
pub use http::HttpSource;
pub use route::{Resolution, RouteConfig, RouteTable, sanitize};
pub use source::{Content, ContentSource, Mode};
