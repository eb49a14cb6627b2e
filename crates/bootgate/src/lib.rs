//! bootgate
//!
//! A network-boot content gateway. TFTP and HTTP clients request paths;
//! a route table maps each path to local files, HTTP origins or command
//! output, and large HTTP-backed files can be mirrored to local disk in the
//! background.
//!
//! - [`config`]: TOML settings and listener entries
//! - [`http`]: HTTP byte-range responder
//! - [`logging`]: log subscriber with a runtime debug toggle
//! - [`service`]: listener supervision, reload and signal handling

pub mod config;
pub mod http;
pub mod logging;
pub mod service;

// Re-export the service crates for easier access
pub use {backend, tftp};

pub use config::{DEFAULT_CONFIG, Listener, LogFormat, Protocol, Settings};
pub use service::ServiceManager;
