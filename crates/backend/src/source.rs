//! Content source contract
//!
//! A content source answers byte-range reads against one concrete target (a
//! local path, a URL or a command line). Sources are built per request by the
//! route resolver, once templates have been expanded.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Deserialize;

use crate::error::Result;

/// Backend mode, as named in route configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Local filesystem
    File,
    /// Remote origin fetched with HTTP range requests
    Http,
    /// Standard output of a local command
    Exec,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Http => "http",
            Self::Exec => "exec",
        }
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(Self::File),
            "http" => Ok(Self::Http),
            "exec" => Ok(Self::Exec),
            other => Err(format!("unknown backend mode: {other}")),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a successful range read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    /// Total size of the resource (not of this range)
    pub total: u64,
    /// Bytes of the requested range; may be short at end of resource
    pub data: Bytes,
}

impl Content {
    pub fn new(total: u64, data: impl Into<Bytes>) -> Self {
        Self {
            total,
            data: data.into(),
        }
    }
}

/// A byte-range content provider
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Backend mode this source implements
    fn mode(&self) -> Mode;

    /// Expanded target (path, URL or command line), for logging
    fn target(&self) -> &str;

    /// Read `[offset, offset + length)` and report the total resource size.
    ///
    /// Any error means the resource must be treated as unresolved.
    async fn read(&self, offset: u64, length: u64) -> Result<Content>;
}
