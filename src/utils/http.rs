// src/utils/http.rs

//! HTTP transport used by the fetch orchestrator and the live watcher.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::FetchConfig;

/// Status and body of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Network seam; the only place the engine suspends on I/O.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Issue a GET and read the whole body.
    async fn get(&self, url: &str) -> Result<HttpResponse>;

    /// Issue a form-encoded POST and read the whole body.
    async fn post_form(&self, url: &str, form: &[(&str, String)]) -> Result<HttpResponse>;
}

/// Create a configured asynchronous HTTP client.
pub fn create_async_client(config: &FetchConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?;
    Ok(client)
}

/// `Transport` backed by a shared reqwest client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        Ok(Self {
            client: create_async_client(config)?,
        })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str) -> Result<HttpResponse> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }

    async fn post_form(&self, url: &str, form: &[(&str, String)]) -> Result<HttpResponse> {
        let response = self.client.post(url).form(form).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_range() {
        assert!(HttpResponse::new(200, "").is_success());
        assert!(HttpResponse::new(204, "").is_success());
        assert!(!HttpResponse::new(302, "").is_success());
        assert!(!HttpResponse::new(500, "").is_success());
    }

    #[test]
    fn test_client_builds_from_defaults() {
        assert!(HttpTransport::new(&FetchConfig::default()).is_ok());
    }
}
