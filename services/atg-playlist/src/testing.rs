//!
//! src/testing.rs
//!
//! Loopback http server for adapter tests. Answers each connection with
//! the next scripted response and records the request line it saw
//!

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use url::Url;

pub struct StubServer {
    pub base: Url,
    seen: Arc<Mutex<Vec<String>>>,
}

impl StubServer {
    pub async fn start(script: Vec<(u16, &str)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let script: Vec<(u16, String)> = script.into_iter()
            .map(|(status, body)| (status, body.to_string()))
            .collect();

        tokio::spawn(async move {
            for (status, body) in script {
                let Ok((mut socket, _)) = listener.accept().await else { return };
                let line = request_line(&mut socket).await;
                log.lock().unwrap().push(line);
                let reply = format!(
                    "HTTP/1.1 {status} Scripted\r\ncontent-type: application/json\r\n\
                     content-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        Self { base: format!("http://{addr}/").parse().unwrap(), seen }
    }

    /// `METHOD /path?query` for every request served so far
    pub fn requests(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

async fn request_line(socket: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut buf = [0_u8; 1024];
    while !head.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => head.extend_from_slice(&buf[..n]),
        }
    }
    let head = String::from_utf8_lossy(&head);
    let first = head.lines().next().unwrap_or_default();
    // drop the trailing "HTTP/1.1"
    first.rsplit_once(' ').map_or(first, |(line, _)| line).to_string()
}
