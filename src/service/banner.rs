//! Banner retrieval: passive read first, then a port-specific prompt

use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use std::io::{Read, Write};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

const READ_BUFFER: usize = 2048;

/// Prompt that elicits a response from a quiet service
pub fn prompt_for(port: u16, host: &str) -> Vec<u8> {
    match port {
        80 | 443 | 8000 | 8008 | 8080 | 8443 | 3000 | 9000 => {
            format!("HEAD / HTTP/1.0\r\nHost: {}\r\n\r\n", host).into_bytes()
        }
        25 | 465 | 587 | 2525 => b"EHLO reconscan.local\r\n".to_vec(),
        21 => b"FEAT\r\n".to_vec(),
        110 => b"NOOP\r\n".to_vec(),
        143 => b"A1 CAPABILITY\r\n".to_vec(),
        6379 => b"PING\r\n".to_vec(),
        _ => b"\r\n".to_vec(),
    }
}

/// Printable, single-line form of a banner, capped at `max_chars`.
pub fn sanitize_banner(raw: &str, max_chars: usize) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let capped: String = cleaned.chars().take(max_chars).collect();
    if capped.is_empty() {
        None
    } else {
        Some(capped)
    }
}

/// Reads banners from open TCP ports
#[derive(Debug, Clone)]
pub struct BannerGrabber {
    timeout: Duration,
    passive_wait: Duration,
    tls_ports: Vec<u16>,
}

impl BannerGrabber {
    pub fn new(timeout: Duration, passive_wait: Duration, tls_ports: Vec<u16>) -> Self {
        Self {
            timeout,
            passive_wait,
            tls_ports,
        }
    }

    /// Raw (lossily decoded, untrimmed) banner text, if the service said anything.
    pub async fn grab(&self, ip: IpAddr, port: u16) -> Option<String> {
        let addr = SocketAddr::new(ip, port);
        let bytes = if self.tls_ports.contains(&port) {
            match self.grab_tls(addr).await {
                Some(bytes) => Some(bytes),
                None => self.grab_plain(addr).await,
            }
        } else {
            self.grab_plain(addr).await
        }?;

        if bytes.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&bytes).into_owned())
        }
    }

    async fn grab_plain(&self, addr: SocketAddr) -> Option<Vec<u8>> {
        let exchange = async {
            let mut stream = TcpStream::connect(addr).await.ok()?;
            let mut buf = vec![0u8; READ_BUFFER];

            if let Ok(Ok(n)) = timeout(self.passive_wait, stream.read(&mut buf)).await {
                if n > 0 {
                    buf.truncate(n);
                    return Some(buf);
                }
            }

            stream
                .write_all(&prompt_for(addr.port(), &addr.ip().to_string()))
                .await
                .ok()?;
            let n = stream.read(&mut buf).await.ok()?;
            buf.truncate(n);
            Some(buf)
        };
        timeout(self.timeout, exchange).await.ok().flatten()
    }

    /// TLS handshake with verification off, then an HTTP prompt.
    async fn grab_tls(&self, addr: SocketAddr) -> Option<Vec<u8>> {
        let io_timeout = self.timeout;
        let task = tokio::task::spawn_blocking(move || -> Option<Vec<u8>> {
            let stream = std::net::TcpStream::connect_timeout(&addr, io_timeout).ok()?;
            stream.set_read_timeout(Some(io_timeout)).ok()?;
            stream.set_write_timeout(Some(io_timeout)).ok()?;

            let mut builder = SslConnector::builder(SslMethod::tls()).ok()?;
            builder.set_verify(SslVerifyMode::NONE);
            let connector = builder.build();
            let host = addr.ip().to_string();
            let mut tls = connector
                .configure()
                .ok()?
                .verify_hostname(false)
                .use_server_name_indication(false)
                .connect(&host, stream)
                .ok()?;

            tls.write_all(&prompt_for(443, &host)).ok()?;
            let mut buf = vec![0u8; READ_BUFFER];
            let n = tls.read(&mut buf).ok()?;
            buf.truncate(n);
            Some(buf)
        });
        timeout(self.timeout + Duration::from_millis(100), task)
            .await
            .ok()?
            .ok()
            .flatten()
    }
}
