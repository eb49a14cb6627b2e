//! TFTP Server Implementation
//!
//! The listener only receives request datagrams; every request is handed to
//! its own session task, which answers from a separate socket.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use backend::Context;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::transfer::handle_request;

/// Largest request datagram accepted
const MAX_REQUEST: usize = 2048;

/// TFTP listener
pub struct TftpServer {
    address: SocketAddr,
    context: watch::Receiver<Arc<Context>>,
    socket: Option<UdpSocket>,
}

impl TftpServer {
    /// Create a listener for `address`; sessions use the context current at
    /// the time their request arrives
    pub fn new(address: SocketAddr, context: watch::Receiver<Arc<Context>>) -> Self {
        Self {
            address,
            context,
            socket: None,
        }
    }

    /// Bind the listening socket
    pub fn bind(&mut self) -> Result<SocketAddr> {
        let socket = Socket::new(Domain::for_address(self.address), Type::DGRAM, Some(Protocol::UDP))
            .context("Failed to create TFTP socket")?;
        socket
            .set_reuse_address(true)
            .context("Failed to set SO_REUSEADDR on TFTP socket")?;
        socket
            .set_nonblocking(true)
            .context("Failed to set TFTP socket to non-blocking mode")?;
        socket
            .bind(&self.address.into())
            .with_context(|| format!("Failed to bind TFTP server to {}", self.address))?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket).context("Failed to convert to Tokio socket")?;
        let local_addr = socket.local_addr().context("Failed to get local address")?;

        self.socket = Some(socket);
        Ok(local_addr)
    }

    /// Get the local address the server is bound to (if bound)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    /// Bind if needed and serve until the socket fails
    pub async fn run(&mut self) -> Result<()> {
        if self.socket.is_none() {
            self.bind()?;
        }
        let Some(socket) = self.socket.as_ref() else {
            return Ok(());
        };
        let local_addr = socket.local_addr()?;
        info!(scope = "tftp", event = "listen", local = %local_addr, "TFTP server listening");

        let result = self.serve(socket, local_addr).await;
        self.socket = None;
        result
    }

    async fn serve(&self, socket: &UdpSocket, local_addr: SocketAddr) -> Result<()> {
        let mut buffer = [0u8; MAX_REQUEST];

        loop {
            let (len, client) = socket.recv_from(&mut buffer).await.context("TFTP receive failed")?;
            if len <= 2 {
                debug!(remote = %client, len, "Ignoring runt packet");
                continue;
            }

            let packet = buffer[..len].to_vec();
            let context = self.context.borrow().clone();
            tokio::spawn(async move {
                if let Err(e) = handle_request(context, &packet, local_addr.ip(), client).await {
                    warn!(scope = "tftp", event = "error", remote = %client, error = %e, "Session failed");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use backend::reqwest::Client;
    use backend::{CacheQueue, RouteConfig, RouteTable};
    use tempfile::tempdir;

    use super::*;
    use crate::protocol::{TftpRequest, TransferMode, build_ack, parse_data, parse_error};

    fn context(routes: &[RouteConfig]) -> Arc<Context> {
        let table = RouteTable::new(routes, Client::new()).unwrap();
        let (cache, _rx) = CacheQueue::channel(1);
        Arc::new(Context::new(table, cache, backend::DEFAULT_BLOCK_SIZE))
    }

    #[tokio::test]
    async fn test_server_local_addr() {
        let (_tx, rx) = watch::channel(context(&[]));
        let mut server = TftpServer::new("127.0.0.1:0".parse().unwrap(), rx);
        assert!(server.local_addr().is_none());

        let bound = server.bind().unwrap();
        assert_eq!(server.local_addr(), Some(bound));
        assert_ne!(bound.port(), 0);
    }

    #[tokio::test]
    async fn test_requests_use_current_context() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("menu"), b"v2 menu").unwrap();

        let (tx, rx) = watch::channel(context(&[]));
        let mut server = TftpServer::new("127.0.0.1:0".parse().unwrap(), rx);
        let addr = server.bind().unwrap();
        let task = tokio::spawn(async move { server.run().await });

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let request = TftpRequest::read_request("menu", TransferMode::Octet).to_bytes();
        let mut buf = vec![0u8; 1024];

        // No routes yet
        client.send_to(&request, addr).await.unwrap();
        let (n, session) = tokio::time::timeout(Duration::from_secs(5), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(parse_error(&buf[..n]).unwrap().0, 1);
        assert_ne!(session, addr);

        // Publish a context that serves the file
        let routes = [RouteConfig {
            pattern: "^menu$".to_string(),
            backends: vec![backend::route::BackendConfig {
                mode: backend::Mode::File,
                target: format!("{}/menu", dir.path().display()),
                headers: Vec::new(),
                env: Vec::new(),
                cache: Vec::new(),
            }],
        }];
        tx.send(context(&routes)).unwrap();

        client.send_to(&request, addr).await.unwrap();
        let (n, session) = tokio::time::timeout(Duration::from_secs(5), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let (block, data) = parse_data(&buf[..n]).unwrap();
        assert_eq!((block, data), (1, &b"v2 menu"[..]));
        client.send_to(&build_ack(1), session).await.unwrap();

        task.abort();
    }
}
