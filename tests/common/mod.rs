//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use effective_cloudrun::config::ServiceConfig;

/// Start a mock upstream that answers `GET /delay/{n}` after `n * unit`.
///
/// Any other path is answered immediately. Responses are JSON, one per
/// connection.
pub async fn start_delay_backend(unit: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    tokio::spawn(async move {
                        let mut buf = vec![0u8; 4096];
                        let n = match socket.read(&mut buf).await {
                            Ok(n) => n,
                            Err(_) => return,
                        };
                        let head = String::from_utf8_lossy(&buf[..n]);
                        let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();

                        let units = path
                            .strip_prefix("/delay/")
                            .and_then(|n| n.parse::<u32>().ok())
                            .unwrap_or(0);
                        tokio::time::sleep(unit * units).await;

                        let body = format!(r#"{{"url":"{path}","delay":{units}}}"#);
                        let response = format!(
                            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    addr
}

/// Config for a loopback service on an ephemeral port.
pub fn test_config(upstream: SocketAddr, delay_secs: u64, shutdown_timeout_secs: u64) -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.listener.host = "127.0.0.1".into();
    config.listener.port = 0;
    config.shutdown.timeout_secs = shutdown_timeout_secs;
    config.upstream.base_url = format!("http://{upstream}/");
    config.upstream.delay_secs = delay_secs;
    config.upstream.use_system_proxy = false;
    config
}

/// Client that never goes through a proxy and never reuses connections.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
