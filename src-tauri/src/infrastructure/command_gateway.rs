use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use url::Url;

const SYNC_COMMAND: &str = "sync_ntp_time";
const INSTALL_COMMAND: &str = "install_sidecar";
const RECORD_COMMAND: &str = "db_insert_record";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
// Installation waits on an elevation prompt.
const DEFAULT_INSTALL_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncRecord {
    pub offset: f64,
    pub delay: f64,
    pub server: String,
    pub timestamp: i64,
}

#[async_trait]
pub trait CommandGateway: Send + Sync {
    async fn sync(&self, server: &str) -> Result<String, InfraError>;

    async fn install_helper(&self) -> Result<String, InfraError>;

    async fn record_sync(&self, record: &SyncRecord) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestCommandGateway {
    client: Client,
    endpoint: Url,
    install_timeout: Duration,
}

#[derive(Debug, Serialize)]
struct SyncRequest<'a> {
    server: &'a str,
}

impl ReqwestCommandGateway {
    pub fn new(endpoint: Url) -> Result<Self, InfraError> {
        Self::with_timeout(endpoint, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(endpoint: Url, timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| InfraError::Gateway(format!("failed to build http client: {error}")))?;
        Ok(Self {
            client,
            endpoint,
            install_timeout: DEFAULT_INSTALL_TIMEOUT.max(timeout),
        })
    }

    pub fn with_install_timeout(mut self, install_timeout: Duration) -> Self {
        self.install_timeout = install_timeout;
        self
    }

    fn command_endpoint(&self, command: &str) -> Result<Url, InfraError> {
        let mut url = self.endpoint.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::Gateway("command endpoint URL cannot be a base".to_string())
            })?;
            segments.pop_if_empty();
            segments.push("commands");
            segments.push(command);
        }
        Ok(url)
    }

    fn http_error(command: &str, status: reqwest::StatusCode, body: &str) -> InfraError {
        let message = if body.trim().is_empty() {
            format!("{command} failed: http {}", status.as_u16())
        } else {
            format!("{command} failed: http {}; body={body}", status.as_u16())
        };
        InfraError::Gateway(message)
    }

    async fn post_command<B>(
        &self,
        command: &str,
        body: &B,
        timeout: Option<Duration>,
    ) -> Result<String, InfraError>
    where
        B: Serialize + Sync + ?Sized,
    {
        let url = self.command_endpoint(command)?;
        let mut request = self.client.post(url).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .await
            .map_err(|error| InfraError::Gateway(format!("network error while calling {command}: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Gateway(format!("failed reading {command} response: {error}")))?;

        if !status.is_success() {
            return Err(Self::http_error(command, status, &body));
        }
        Ok(body)
    }
}

#[async_trait]
impl CommandGateway for ReqwestCommandGateway {
    async fn sync(&self, server: &str) -> Result<String, InfraError> {
        let server = server.trim();
        if server.is_empty() {
            return Err(InfraError::Gateway("server must not be empty".to_string()));
        }
        self.post_command(SYNC_COMMAND, &SyncRequest { server }, None).await
    }

    async fn install_helper(&self) -> Result<String, InfraError> {
        self.post_command(
            INSTALL_COMMAND,
            &serde_json::json!({}),
            Some(self.install_timeout),
        )
        .await
    }

    async fn record_sync(&self, record: &SyncRecord) -> Result<(), InfraError> {
        self.post_command(RECORD_COMMAND, record, None)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    async fn serve_once(status_line: &'static str, body: &'static str) -> (Url, oneshot::Receiver<String>) {
        serve_once_after(Duration::ZERO, status_line, body).await
    }

    async fn serve_once_after(
        delay: Duration,
        status_line: &'static str,
        body: &'static str,
    ) -> (Url, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind listener");
        let address = listener.local_addr().expect("local addr");
        let (request_tx, request_rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut buffer = vec![0_u8; 8192];
            let mut received = Vec::new();
            loop {
                let read = stream.read(&mut buffer).await.expect("read request");
                received.extend_from_slice(&buffer[..read]);
                let text = String::from_utf8_lossy(&received);
                if read == 0 || request_complete(&text) {
                    break;
                }
            }
            tokio::time::sleep(delay).await;
            let response = format!(
                "{status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.expect("write response");
            let _ = stream.shutdown().await;
            let _ = request_tx.send(String::from_utf8_lossy(&received).into_owned());
        });

        let endpoint = Url::parse(&format!("http://{address}/")).expect("endpoint url");
        (endpoint, request_rx)
    }

    fn request_complete(text: &str) -> bool {
        let Some((head, body)) = text.split_once("\r\n\r\n") else {
            return false;
        };
        let content_length = head
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        body.len() >= content_length
    }

    #[test]
    fn command_endpoint_appends_command_segments() {
        let base = Url::parse("http://127.0.0.1:12346/bridge/").expect("base url");
        let gateway = ReqwestCommandGateway::new(base).expect("gateway");
        let url = gateway.command_endpoint(SYNC_COMMAND).expect("command url");
        assert_eq!(url.as_str(), "http://127.0.0.1:12346/bridge/commands/sync_ntp_time");
    }

    #[tokio::test]
    async fn sync_posts_server_and_returns_raw_body() {
        let (endpoint, request) = serve_once("HTTP/1.1 200 OK", r#"{"success":true,"offset":1.5}"#).await;
        let gateway = ReqwestCommandGateway::new(endpoint).expect("gateway");

        let body = gateway.sync("time.google.com").await.expect("sync call");
        assert_eq!(body, r#"{"success":true,"offset":1.5}"#);

        let request = request.await.expect("captured request");
        assert!(request.starts_with("POST /commands/sync_ntp_time "));
        assert!(request.contains(r#"{"server":"time.google.com"}"#));
    }

    #[tokio::test]
    async fn non_success_status_is_gateway_error() {
        let (endpoint, _request) = serve_once("HTTP/1.1 500 Internal Server Error", "boom").await;
        let gateway = ReqwestCommandGateway::new(endpoint).expect("gateway");

        let error = gateway.install_helper().await.expect_err("http 500 is an error");
        match error {
            InfraError::Gateway(message) => {
                assert!(message.contains("install_sidecar"));
                assert!(message.contains("500"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn blank_server_is_rejected_without_request() {
        let endpoint = Url::parse("http://127.0.0.1:9/").expect("endpoint url");
        let gateway = ReqwestCommandGateway::new(endpoint).expect("gateway");
        assert!(matches!(gateway.sync("  ").await, Err(InfraError::Gateway(_))));
    }

    #[tokio::test]
    async fn install_outlives_the_default_request_timeout() {
        let (endpoint, _request) = serve_once_after(
            Duration::from_millis(400),
            "HTTP/1.1 200 OK",
            r#"{"success":true}"#,
        )
        .await;
        let gateway = ReqwestCommandGateway::with_timeout(endpoint, Duration::from_millis(100))
            .expect("gateway")
            .with_install_timeout(Duration::from_secs(5));

        let body = gateway.install_helper().await.expect("install call");
        assert_eq!(body, r#"{"success":true}"#);
    }

    #[tokio::test]
    async fn sync_is_bounded_by_the_request_timeout() {
        let (endpoint, _request) = serve_once_after(
            Duration::from_secs(2),
            "HTTP/1.1 200 OK",
            r#"{"success":true}"#,
        )
        .await;
        let gateway = ReqwestCommandGateway::with_timeout(endpoint, Duration::from_millis(100))
            .expect("gateway")
            .with_install_timeout(Duration::from_secs(5));

        let error = gateway.sync("pool.ntp.org").await.expect_err("sync times out");
        assert!(matches!(error, InfraError::Gateway(message) if message.contains("sync_ntp_time")));
    }
}
