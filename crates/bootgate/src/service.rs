//! Listener supervision and runtime signals

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use backend::reqwest::Client;
use backend::{CacheEngine, CacheQueue, Context};
use futures::future::BoxFuture;
use tftp::TftpServer;
use tokio::net::TcpListener;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::{Listener, Protocol, Settings};
use crate::logging::LogHandle;

/// Pause before a failed listener is re-created
pub const RESTART_DELAY: Duration = Duration::from_secs(1);

/// A listener that can be (re)started against the shared context
pub trait Service: Send + Sync + 'static {
    fn name(&self) -> String;

    /// Bind and serve until the listener fails
    fn run(&self, context: watch::Receiver<Arc<Context>>) -> BoxFuture<'static, Result<()>>;
}

/// TFTP listener service
pub struct TftpService {
    listener: Listener,
}

impl Service for TftpService {
    fn name(&self) -> String {
        self.listener.to_string()
    }

    fn run(&self, context: watch::Receiver<Arc<Context>>) -> BoxFuture<'static, Result<()>> {
        let address = self.listener.address;
        Box::pin(async move {
            let mut server = TftpServer::new(address, context);
            server.run().await
        })
    }
}

/// HTTP listener service
pub struct HttpService {
    listener: Listener,
}

impl Service for HttpService {
    fn name(&self) -> String {
        self.listener.to_string()
    }

    fn run(&self, context: watch::Receiver<Arc<Context>>) -> BoxFuture<'static, Result<()>> {
        let address = self.listener.address;
        Box::pin(async move {
            let listener = TcpListener::bind(address)
                .await
                .with_context(|| format!("Failed to bind HTTP server to {address}"))?;
            crate::http::serve(listener, context).await
        })
    }
}

/// Service serving `listener`
pub fn service_for(listener: Listener) -> Box<dyn Service> {
    match listener.protocol {
        Protocol::Tftp => Box::new(TftpService { listener }),
        Protocol::Http => Box::new(HttpService { listener }),
    }
}

/// Run `service` forever, re-creating it after every failure
pub fn supervise(service: Box<dyn Service>, context: watch::Receiver<Arc<Context>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let name = service.name();
        loop {
            match service.run(context.clone()).await {
                Ok(()) => warn!(scope = "server", service = %name, "Listener stopped"),
                Err(e) => error!(
                    scope = "server",
                    event = "error",
                    service = %name,
                    error = %format!("{e:#}"),
                    "Listener failed"
                ),
            }
            tokio::time::sleep(RESTART_DELAY).await;
        }
    })
}

/// Re-read the configuration at `path` and publish a new context.
///
/// Returns the number of routes now active. On error nothing is published.
pub fn reload(path: &Path, sender: &watch::Sender<Arc<Context>>, cache: &CacheQueue, client: &Client) -> Result<usize> {
    let settings = Settings::load(path)?;
    let context = settings.context(cache.clone(), client.clone())?;
    let routes = context.routes.len();
    sender.send_replace(Arc::new(context));
    Ok(routes)
}

/// Owns the listeners, the cache engine and the signal loop
pub struct ServiceManager {
    config_path: PathBuf,
    settings: Settings,
    logging: Option<LogHandle>,
}

impl ServiceManager {
    pub fn new(config_path: PathBuf, settings: Settings, logging: Option<LogHandle>) -> Self {
        Self {
            config_path,
            settings,
            logging,
        }
    }

    /// Start everything and block until SIGINT or SIGTERM
    pub async fn run(self) -> Result<()> {
        let listeners = self.settings.listeners();
        if listeners.is_empty() {
            bail!("No usable listen entries in {}", self.config_path.display());
        }

        let client = Client::builder()
            .user_agent(backend::http::USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;
        let cache = CacheEngine::new(self.settings.cache_config(), client.clone()).start();
        let context = self.settings.context(cache.clone(), client.clone())?;
        info!(
            scope = "server",
            event = "start",
            version = env!("CARGO_PKG_VERSION"),
            routes = context.routes.len(),
            block_size = context.block_size,
            "bootgate started"
        );

        let (sender, receiver) = watch::channel(Arc::new(context));
        let handles: Vec<JoinHandle<()>> = listeners
            .into_iter()
            .map(|listener| supervise(service_for(listener), receiver.clone()))
            .collect();

        let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
        let mut user1 = signal(SignalKind::user_defined1()).context("Failed to install SIGUSR1 handler")?;
        let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        loop {
            tokio::select! {
                _ = hangup.recv() => match reload(&self.config_path, &sender, &cache, &client) {
                    Ok(routes) => info!(scope = "server", event = "reload", routes, "Configuration reloaded"),
                    Err(e) => error!(
                        scope = "server",
                        event = "reload",
                        error = %format!("{e:#}"),
                        "Reload failed, keeping previous configuration"
                    ),
                },
                _ = user1.recv() => self.toggle_debug(),
                _ = terminate.recv() => break,
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        info!(scope = "server", event = "end", "Shutting down");
        for handle in handles {
            handle.abort();
        }
        Ok(())
    }

    fn toggle_debug(&self) {
        let Some(logging) = &self.logging else {
            return;
        };
        match logging.toggle_debug() {
            Ok(enabled) => info!(scope = "server", debug = enabled, "Log level changed"),
            Err(e) => warn!(scope = "server", error = %e, "Failed to change log level"),
        }
    }
}
