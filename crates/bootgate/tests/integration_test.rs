//! Integration tests for the gateway
//!
//! These tests start real TFTP and HTTP listeners on loopback and drive them
//! with the `tftp-get` client and an HTTP client.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use bootgate::Settings;
use bootgate::backend::CacheEngine;
use bootgate::backend::reqwest::Client;
use bootgate::tftp::TftpServer;
use tempfile::{TempDir, tempdir};
use tokio::net::TcpListener;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::time::sleep;

struct Gateway {
    tftp: SocketAddr,
    http: SocketAddr,
    dir: TempDir,
}

/// Start both listeners; `config` renders the TOML for the scratch
/// directory and the bound HTTP address
async fn start(config: impl FnOnce(&Path, SocketAddr) -> String) -> Gateway {
    let dir = tempdir().unwrap();
    let http_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let http = http_listener.local_addr().unwrap();

    let settings = Settings::from_toml(&config(dir.path(), http)).unwrap();
    let client = Client::new();
    let cache = CacheEngine::new(settings.cache_config(), client.clone()).start();
    let context = settings.context(cache, client).unwrap();
    let (_sender, receiver) = watch::channel(Arc::new(context));

    let mut server = TftpServer::new("127.0.0.1:0".parse().unwrap(), receiver.clone());
    let tftp = server.bind().unwrap();
    tokio::spawn(async move { server.run().await });
    tokio::spawn(bootgate::http::serve(http_listener, receiver));

    Gateway { tftp, http, dir }
}

fn files_route(root: &Path) -> String {
    format!(
        "[[routes]]\nmatch = \"^/?files/(.+)$\"\n[[routes.backends]]\nmode = \"file\"\ntarget = \"{}/origin/$1\"\n",
        root.display()
    )
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

async fn tftp_get(server: SocketAddr, remote: &str, local: &Path) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_tftp-get"))
        .arg(server.to_string())
        .arg(remote)
        .arg(local)
        .output()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_tftp_get_downloads_file() {
    let gateway = start(|root, _| files_route(root)).await;
    let data = pattern(200 * 1024 + 3);
    std::fs::create_dir_all(gateway.dir.path().join("origin")).unwrap();
    std::fs::write(gateway.dir.path().join("origin/kernel"), &data).unwrap();

    let local = gateway.dir.path().join("kernel.out");
    let output = tftp_get(gateway.tftp, "files/kernel", &local).await;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(std::fs::read(&local).unwrap(), data);
}

#[tokio::test]
async fn test_tftp_get_reports_missing_file() {
    let gateway = start(|root, _| files_route(root)).await;

    let local = gateway.dir.path().join("missing.out");
    let output = tftp_get(gateway.tftp, "files/missing", &local).await;
    assert_eq!(output.status.code(), Some(3));
    assert!(String::from_utf8_lossy(&output.stderr).contains("file not found"));
}

#[tokio::test]
async fn test_http_and_tftp_serve_same_routes() {
    let gateway = start(|root, _| files_route(root)).await;
    let data = pattern(5000);
    std::fs::create_dir_all(gateway.dir.path().join("origin")).unwrap();
    std::fs::write(gateway.dir.path().join("origin/initrd"), &data).unwrap();

    let body = Client::new()
        .get(format!("http://{}/files/initrd", gateway.http))
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(body, data);

    let local = gateway.dir.path().join("initrd.out");
    let output = tftp_get(gateway.tftp, "files/initrd", &local).await;
    assert!(output.status.success());
    assert_eq!(std::fs::read(&local).unwrap(), data);
}

#[tokio::test]
async fn test_http_backend_gets_mirrored() {
    let gateway = start(|root, http| {
        // Several chunks per file, so every chunk is a partial (206) fetch
        format!(
            "block_size = 1048576
{}
[[routes]]
match = \"^/?mirrored/(.+)$\"

  [[routes.backends]]
  mode = \"file\"
  target = \"{root}/mirror/$1\"

  [[routes.backends]]
  mode = \"http\"
  target = \"http://{http}/files/$1\"

    [[routes.backends.cache]]
    match = \"\\\\.img$\"
    path = \"{root}/mirror/$1\"
    delay = 1
    concurrency = 4
    refresh = 60
",
            files_route(root),
            root = root.display(),
        )
    })
    .await;
    let data = pattern(3 * 1024 * 1024 + 11);
    std::fs::create_dir_all(gateway.dir.path().join("origin")).unwrap();
    std::fs::write(gateway.dir.path().join("origin/disk.img"), &data).unwrap();

    // First fetch goes through the HTTP backend and queues a mirror job
    let local = gateway.dir.path().join("disk.out");
    let output = tftp_get(gateway.tftp, "mirrored/disk.img", &local).await;
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(std::fs::read(&local).unwrap(), data);

    let mirror = gateway.dir.path().join("mirror/disk.img");
    let marker = gateway.dir.path().join("mirror/.disk.img.refresh");
    let mut mirrored = false;
    for _ in 0..100 {
        // The marker is written last
        if std::fs::read_to_string(&marker).is_ok_and(|ttl| ttl == "60\n") {
            mirrored = true;
            break;
        }
        sleep(Duration::from_millis(100)).await;
    }
    assert!(mirrored, "mirror never completed");
    assert_eq!(std::fs::read(&mirror).unwrap(), data);

    // The origin disappears; the mirror now answers
    std::fs::remove_file(gateway.dir.path().join("origin/disk.img")).unwrap();
    let body = Client::new()
        .get(format!("http://{}/mirrored/disk.img", gateway.http))
        .header("Range", "bytes=0-9")
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();
    assert_eq!(body, &data[..10]);
}
