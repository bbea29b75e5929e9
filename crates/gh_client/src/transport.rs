use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::GhError;

/// Raw response handed back by a transport: status, headers, body text.
#[derive(Debug, Clone, Default)]
pub struct TransportReply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl TransportReply {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Capability set required from an HTTP implementation. Satisfied by
/// [`ReqwestTransport`] in production and by scripted fakes in tests.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<TransportReply, GhError>;
    async fn put(
        &self,
        url: &str,
        body: &str,
        headers: &[(String, String)],
    ) -> Result<TransportReply, GhError>;
    async fn post(
        &self,
        url: &str,
        body: &str,
        headers: &[(String, String)],
    ) -> Result<TransportReply, GhError>;
    async fn patch(
        &self,
        url: &str,
        body: &str,
        headers: &[(String, String)],
    ) -> Result<TransportReply, GhError>;
    async fn delete(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<TransportReply, GhError>;
}

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub timeout: Duration,
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    /// Approximate pacing in bytes per second; 0 disables.
    pub download_limit: u64,
    pub upload_limit: u64,
    /// Cumulative byte caps; 0 disables.
    pub max_download: u64,
    pub max_upload: u64,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            http_proxy: None,
            https_proxy: None,
            download_limit: 0,
            upload_limit: 0,
            max_download: 0,
            max_upload: 0,
        }
    }
}

pub struct ReqwestTransport {
    client: reqwest::Client,
    options: TransportOptions,
    downloaded: AtomicU64,
    uploaded: AtomicU64,
}

impl ReqwestTransport {
    pub fn new(options: TransportOptions) -> Result<Self, GhError> {
        let mut builder = reqwest::Client::builder().timeout(options.timeout);
        if let Some(proxy) = &options.http_proxy {
            builder = builder.proxy(
                reqwest::Proxy::http(proxy)
                    .map_err(|err| GhError::Transport(err.to_string()))?,
            );
        }
        if let Some(proxy) = &options.https_proxy {
            builder = builder.proxy(
                reqwest::Proxy::https(proxy)
                    .map_err(|err| GhError::Transport(err.to_string()))?,
            );
        }
        let client = builder
            .build()
            .map_err(|err| GhError::Transport(err.to_string()))?;
        Ok(Self {
            client,
            options,
            downloaded: AtomicU64::new(0),
            uploaded: AtomicU64::new(0),
        })
    }

    async fn execute(
        &self,
        method: reqwest::Method,
        url: &str,
        body: Option<&str>,
        headers: &[(String, String)],
    ) -> Result<TransportReply, GhError> {
        if let Some(body) = body {
            let uploaded = self
                .uploaded
                .fetch_add(body.len() as u64, Ordering::Relaxed)
                + body.len() as u64;
            if self.options.max_upload > 0 && uploaded > self.options.max_upload {
                return Err(GhError::BudgetExhausted("upload"));
            }
            pace(body.len() as u64, self.options.upload_limit).await;
        }

        let mut request = self.client.request(method, url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(body) = body {
            request = request.body(body.to_string());
        }

        let response = request
            .send()
            .await
            .map_err(|err| GhError::Transport(err.to_string()))?;
        let status = response.status().as_u16();
        let reply_headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|value| (k.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .text()
            .await
            .map_err(|err| GhError::Transport(err.to_string()))?;

        let downloaded = self
            .downloaded
            .fetch_add(body.len() as u64, Ordering::Relaxed)
            + body.len() as u64;
        if self.options.max_download > 0 && downloaded > self.options.max_download {
            return Err(GhError::BudgetExhausted("download"));
        }
        pace(body.len() as u64, self.options.download_limit).await;

        debug!(url, status, bytes = body.len(), "transport reply");
        Ok(TransportReply {
            status,
            headers: reply_headers,
            body,
        })
    }
}

/// Crude bandwidth shaping: sleep long enough that this payload averages out
/// to the configured bytes-per-second rate.
async fn pace(bytes: u64, limit: u64) {
    if limit == 0 || bytes == 0 {
        return;
    }
    let secs = bytes as f64 / limit as f64;
    if secs > 0.0 {
        tokio::time::sleep(Duration::from_secs_f64(secs)).await;
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<TransportReply, GhError> {
        self.execute(reqwest::Method::GET, url, None, headers).await
    }

    async fn put(
        &self,
        url: &str,
        body: &str,
        headers: &[(String, String)],
    ) -> Result<TransportReply, GhError> {
        self.execute(reqwest::Method::PUT, url, Some(body), headers)
            .await
    }

    async fn post(
        &self,
        url: &str,
        body: &str,
        headers: &[(String, String)],
    ) -> Result<TransportReply, GhError> {
        self.execute(reqwest::Method::POST, url, Some(body), headers)
            .await
    }

    async fn patch(
        &self,
        url: &str,
        body: &str,
        headers: &[(String, String)],
    ) -> Result<TransportReply, GhError> {
        self.execute(reqwest::Method::PATCH, url, Some(body), headers)
            .await
    }

    async fn delete(
        &self,
        url: &str,
        headers: &[(String, String)],
    ) -> Result<TransportReply, GhError> {
        self.execute(reqwest::Method::DELETE, url, None, headers)
            .await
    }
}
