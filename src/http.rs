// Network transport for remote taxonomy documents
use crate::{Error, Result};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use std::time::Duration;
use url::Url;

/// HTTP basic-auth credentials forwarded on every request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: Option<String>) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
}

/// Fetches the raw bytes behind a network URL.
pub trait Transport: Send + Sync {
    fn get(&self, url: &Url, credentials: Option<&Credentials>) -> Result<Vec<u8>>;

    fn get_async<'a>(
        &'a self,
        url: &'a Url,
        credentials: Option<&'a Credentials>,
    ) -> BoxFuture<'a, Result<Vec<u8>>>;
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// Number of retry attempts
    pub retry_attempts: u32,
    /// Initial retry delay in milliseconds
    pub retry_delay_ms: u64,
    /// Maximum retry delay in milliseconds (for exponential backoff cap)
    pub max_retry_delay_ms: u64,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            retry_attempts: 3,
            retry_delay_ms: 500,
            max_retry_delay_ms: 10_000,
            user_agent: format!("crabrl-dts/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// `reqwest`-backed transport. Clients are built on first use so that a
/// transport can be created (and dropped) from inside an async runtime
/// without touching the blocking client.
pub struct HttpTransport {
    config: HttpClientConfig,
    client: OnceLock<reqwest::Client>,
    blocking: OnceLock<reqwest::blocking::Client>,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(HttpClientConfig::default())
    }
}

impl HttpTransport {
    pub fn new(config: HttpClientConfig) -> Self {
        Self {
            config,
            client: OnceLock::new(),
            blocking: OnceLock::new(),
        }
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_seconds)
    }

    fn async_client(&self) -> Result<&reqwest::Client> {
        if let Some(client) = self.client.get() {
            return Ok(client);
        }
        let client = reqwest::Client::builder()
            .timeout(self.timeout())
            .user_agent(&self.config.user_agent)
            .pool_idle_timeout(Duration::from_secs(30))
            .build()?;
        Ok(self.client.get_or_init(|| client))
    }

    fn blocking_client(&self) -> Result<&reqwest::blocking::Client> {
        if let Some(client) = self.blocking.get() {
            return Ok(client);
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(self.timeout())
            .user_agent(&self.config.user_agent)
            .build()?;
        Ok(self.blocking.get_or_init(|| client))
    }

    /// Capped exponential backoff
    fn backoff(&self, attempt: u32) -> Duration {
        let delay = self
            .config
            .retry_delay_ms
            .saturating_mul(2_u64.saturating_pow(attempt));
        Duration::from_millis(delay.min(self.config.max_retry_delay_ms))
    }

    fn should_retry(&self, error: &Error, attempt: u32) -> bool {
        if attempt >= self.config.retry_attempts {
            return false;
        }
        match error {
            // Retry on network errors, timeouts, but not on invalid URLs or similar
            Error::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            // Server errors only; 4xx (including auth failures) are final
            Error::HttpStatus { status, .. } => *status >= 500,
            Error::Timeout { .. } => true,
            _ => false,
        }
    }

    fn fetch_once_blocking(&self, url: &Url, credentials: Option<&Credentials>) -> Result<Vec<u8>> {
        let mut request = self.blocking_client()?.get(url.clone());
        if let Some(creds) = credentials {
            request = request.basic_auth(&creds.username, creds.password.as_ref());
        }
        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes()?.to_vec())
    }

    async fn fetch_once(&self, url: &Url, credentials: Option<&Credentials>) -> Result<Vec<u8>> {
        let mut request = self.async_client()?.get(url.clone());
        if let Some(creds) = credentials {
            request = request.basic_auth(&creds.username, creds.password.as_ref());
        }
        let response = tokio::time::timeout(self.timeout(), request.send())
            .await
            .map_err(|_| Error::Timeout {
                uri: url.to_string(),
                seconds: self.config.timeout_seconds,
            })??;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &Url, credentials: Option<&Credentials>) -> Result<Vec<u8>> {
        let mut attempt = 0;
        loop {
            match self.fetch_once_blocking(url, credentials) {
                Ok(bytes) => return Ok(bytes),
                Err(e) if self.should_retry(&e, attempt) => {
                    tracing::debug!("retrying {} after: {}", url, e);
                    std::thread::sleep(self.backoff(attempt));
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn get_async<'a>(
        &'a self,
        url: &'a Url,
        credentials: Option<&'a Credentials>,
    ) -> BoxFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            let mut attempt = 0;
            loop {
                match self.fetch_once(url, credentials).await {
                    Ok(bytes) => return Ok(bytes),
                    Err(e) if self.should_retry(&e, attempt) => {
                        tracing::debug!("retrying {} after: {}", url, e);
                        tokio::time::sleep(self.backoff(attempt)).await;
                        attempt += 1;
                    }
                    Err(e) => return Err(e),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let transport = HttpTransport::new(HttpClientConfig {
            retry_delay_ms: 100,
            max_retry_delay_ms: 500,
            ..Default::default()
        });
        assert_eq!(transport.backoff(0), Duration::from_millis(100));
        assert_eq!(transport.backoff(1), Duration::from_millis(200));
        assert_eq!(transport.backoff(2), Duration::from_millis(400));
        assert_eq!(transport.backoff(3), Duration::from_millis(500));
        assert_eq!(transport.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn test_retry_policy() {
        let transport = HttpTransport::new(HttpClientConfig {
            retry_attempts: 2,
            ..Default::default()
        });
        let server_error = Error::HttpStatus {
            url: "http://example.com".into(),
            status: 503,
        };
        let unauthorized = Error::HttpStatus {
            url: "http://example.com".into(),
            status: 401,
        };
        let timeout = Error::Timeout {
            uri: "http://example.com".into(),
            seconds: 30,
        };

        assert!(transport.should_retry(&server_error, 0));
        assert!(transport.should_retry(&timeout, 1));
        assert!(!transport.should_retry(&server_error, 2));
        assert!(!transport.should_retry(&unauthorized, 0));
        assert!(!transport.should_retry(&Error::Config("x".into()), 0));
    }

    #[tokio::test]
    async fn test_transport_can_be_created_inside_runtime() {
        let transport = HttpTransport::default();
        assert_eq!(transport.config().retry_attempts, 3);
        drop(transport);
    }
}
