//! Proxy connectivity probes
//!
//! A probe proves that a proxy accepts our credentials and can reach a known
//! target by opening a CONNECT tunnel through it.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, instrument};

use crate::error::{RelayError, Result};
use crate::models::ProxyRecord;

/// Checks whether a proxy is usable. Callers bound each probe with a timeout.
#[async_trait]
pub trait ProxyProbe: Send + Sync {
    async fn probe(&self, proxy: &ProxyRecord) -> Result<()>;
}

/// Probe that establishes an HTTP CONNECT tunnel to a fixed target
pub struct ConnectProbe {
    target_host: String,
    target_port: u16,
}

impl ConnectProbe {
    pub fn new(target_host: impl Into<String>, target_port: u16) -> Self {
        Self {
            target_host: target_host.into(),
            target_port,
        }
    }

    /// Derive the tunnel target from a URL such as `https://www.google.com`
    pub fn from_url(probe_url: &str) -> Result<Self> {
        let url = url::Url::parse(probe_url)?;
        let host = url
            .host_str()
            .ok_or_else(|| RelayError::InvalidConfig(format!("probe URL has no host: {}", probe_url)))?;
        let port = url.port_or_known_default().ok_or_else(|| {
            RelayError::InvalidConfig(format!("probe URL has no port: {}", probe_url))
        })?;
        Ok(Self::new(host, port))
    }

    /// Build HTTP CONNECT request
    fn build_connect_request(&self, proxy: &ProxyRecord) -> String {
        let authority = format!("{}:{}", self.target_host, self.target_port);
        let mut request = format!("CONNECT {} HTTP/1.1\r\nHost: {}\r\n", authority, authority);

        if proxy.has_credentials() {
            let credentials = format!("{}:{}", proxy.username, proxy.password);
            request.push_str(&format!(
                "Proxy-Authorization: Basic {}\r\n",
                BASE64.encode(credentials.as_bytes())
            ));
        }

        request.push_str("\r\n");
        request
    }

    async fn connect(&self, proxy: &ProxyRecord) -> std::result::Result<(), anyhow::Error> {
        let mut stream = TcpStream::connect(proxy.address()).await?;

        let request = self.build_connect_request(proxy);
        stream.write_all(request.as_bytes()).await?;

        let mut response = vec![0u8; 1024];
        let n = stream.read(&mut response).await?;
        if n == 0 {
            anyhow::bail!("empty CONNECT response");
        }

        let response_str = String::from_utf8_lossy(&response[..n]);
        if !response_str.starts_with("HTTP/1.1 200") && !response_str.starts_with("HTTP/1.0 200") {
            anyhow::bail!(
                "CONNECT rejected: {}",
                response_str.lines().next().unwrap_or("unknown response")
            );
        }

        Ok(())
    }
}

#[async_trait]
impl ProxyProbe for ConnectProbe {
    #[instrument(skip(self, proxy), fields(proxy = %proxy))]
    async fn probe(&self, proxy: &ProxyRecord) -> Result<()> {
        self.connect(proxy).await.map_err(|e| RelayError::ProxyValidation {
            proxy: proxy.to_string(),
            reason: e.to_string(),
        })?;

        debug!(
            "Tunnel to {}:{} established through {}",
            self.target_host, self.target_port, proxy
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// One-shot fake proxy that captures the request head and replies with `reply`
    async fn fake_proxy(reply: &'static str) -> (u16, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(reply.as_bytes()).await.unwrap();
            String::from_utf8_lossy(&buf[..n]).to_string()
        });
        (port, handle)
    }

    #[test]
    fn test_from_url_uses_default_port() {
        let probe = ConnectProbe::from_url("https://www.google.com").unwrap();
        assert_eq!(probe.target_host, "www.google.com");
        assert_eq!(probe.target_port, 443);

        assert!(ConnectProbe::from_url("not a url").is_err());
    }

    #[test]
    fn test_connect_request_carries_basic_auth() {
        let probe = ConnectProbe::new("example.com", 443);
        let proxy = ProxyRecord::new("10.0.0.1", 8080, "user", "pass", None);
        let request = probe.build_connect_request(&proxy);

        assert!(request.starts_with("CONNECT example.com:443 HTTP/1.1\r\n"));
        assert!(request.contains("Proxy-Authorization: Basic dXNlcjpwYXNz\r\n"));
        assert!(request.ends_with("\r\n\r\n"));

        let anon = ProxyRecord::new("10.0.0.1", 8080, "", "", None);
        assert!(!probe.build_connect_request(&anon).contains("Proxy-Authorization"));
    }

    #[tokio::test]
    async fn test_probe_accepts_established_tunnel() {
        let (port, server) = fake_proxy("HTTP/1.1 200 Connection established\r\n\r\n").await;
        let proxy = ProxyRecord::new("127.0.0.1", port, "user", "pass", None);

        let probe = ConnectProbe::new("example.com", 443);
        probe.probe(&proxy).await.unwrap();

        let head = server.await.unwrap();
        assert!(head.starts_with("CONNECT example.com:443"));
    }

    #[tokio::test]
    async fn test_probe_rejects_auth_failure() {
        let (port, _server) =
            fake_proxy("HTTP/1.1 407 Proxy Authentication Required\r\n\r\n").await;
        let proxy = ProxyRecord::new("127.0.0.1", port, "user", "wrong", None);

        let err = ConnectProbe::new("example.com", 443)
            .probe(&proxy)
            .await
            .unwrap_err();
        match err {
            RelayError::ProxyValidation { reason, .. } => assert!(reason.contains("407")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
