//! Minimal HTTP/1.1 server answering fixed JSON bodies by path, for tests
//! that exercise the API clients end to end.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub struct FixtureServer {
    pub base: String,
    connections: Arc<AtomicUsize>,
}

impl FixtureServer {
    /// Serves `routes` (path without query -> status and body). Unknown paths
    /// get a 404. The first `drop_first` connections are closed without a
    /// response.
    pub async fn start(routes: Vec<(&str, u16, String)>, drop_first: usize) -> FixtureServer {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes: Arc<HashMap<String, (u16, String)>> = Arc::new(
            routes
                .into_iter()
                .map(|(path, status, body)| (path.to_string(), (status, body)))
                .collect(),
        );
        let connections = Arc::new(AtomicUsize::new(0));

        let counter = connections.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                if counter.fetch_add(1, Ordering::SeqCst) < drop_first {
                    drop(socket);
                    continue;
                }
                tokio::spawn(respond(socket, routes.clone()));
            }
        });

        FixtureServer {
            base: format!("http://{}", addr),
            connections,
        }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

async fn respond(mut socket: TcpStream, routes: Arc<HashMap<String, (u16, String)>>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }

    let head = String::from_utf8_lossy(&buf);
    let target = head.split_whitespace().nth(1).unwrap_or("/");
    let path = target.split('?').next().unwrap_or(target);
    let (status, body) = routes
        .get(path)
        .cloned()
        .unwrap_or_else(|| (404, r#"{"error":"not found"}"#.to_string()));

    let response = format!(
        "HTTP/1.1 {} Fixture\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}
