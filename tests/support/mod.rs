//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Landing page whose download form posts to `action`.
#[must_use]
pub fn landing_page(action: &str) -> String {
    format!(
        r#"<html><body>
             <h1 class="section_title" title="clip.mp4">clip.mp4</h1>
             <form method="post" action="{action}"><button>Slow download</button></form>
           </body></html>"#
    )
}

/// Polls `check` every 10ms until it holds or `timeout` elapses.
pub async fn wait_until<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Raw HTTP server that answers every request with a `video/mp4` body of
/// `total` bytes, written `chunk` bytes at a time with `delay` between writes.
///
/// Keeps a transfer open long enough to cancel it mid-stream.
pub async fn spawn_trickle_server(total: usize, chunk: usize, delay: Duration) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }

                let head = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: video/mp4\r\nContent-Length: {total}\r\n\r\n"
                );
                if socket.write_all(head.as_bytes()).await.is_err() {
                    return;
                }

                let payload = vec![b'x'; chunk];
                let mut sent = 0;
                while sent < total {
                    let n = chunk.min(total - sent);
                    if socket.write_all(&payload[..n]).await.is_err() {
                        return;
                    }
                    sent += n;
                    tokio::time::sleep(delay).await;
                }
            });
        }
    });

    addr
}
