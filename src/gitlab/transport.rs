use std::{collections::HashMap, fmt::Display, path::Path, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{header::USER_AGENT, Certificate, Client, ClientBuilder};
use serde::de::DeserializeOwned;
use thiserror::Error;
use url::Url;

use super::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Delete,
}

impl Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => f.write_str("GET"),
            Self::Post => f.write_str("POST"),
            Self::Delete => f.write_str("DELETE"),
        }
    }
}

/// A single HTTP call, fully described so it can be replayed on retry.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub timeout: Duration,
}

impl ApiRequest {
    /// Value of the `name` query parameter, if present.
    #[cfg(test)]
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// A response whose body has already been read in full.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// Header names are stored lowercase.
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl ApiResponse {
    #[cfg(test)]
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    #[cfg(test)]
    pub fn with_header(mut self, name: &str, value: impl ToString) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turns anything but `200 OK` into [`FetchError::Status`].
    pub fn ensure_ok(self, url: &Url) -> Result<Self, FetchError> {
        if self.status == 200 {
            return Ok(self);
        }

        Err(FetchError::Status {
            url: url.to_string(),
            status: self.status,
            body: self.body,
        })
    }

    pub fn json<T: DeserializeOwned>(&self, url: &Url) -> Result<T, FetchError> {
        serde_json::from_str(&self.body).map_err(|source| FetchError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

/// Connection, timeout, DNS or TLS failure. Never an HTTP status.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{method} {url}: {message}")]
pub struct TransportError {
    pub method: Method,
    pub url: String,
    pub message: String,
}

impl TransportError {
    pub fn new(request: &ApiRequest, message: impl Display) -> Self {
        Self {
            method: request.method,
            url: request.url.to_string(),
            message: message.to_string(),
        }
    }
}

/// Performs exactly one HTTP attempt. Retrying is the caller's business.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError>;
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(trust_store: Option<&Path>, insecure: bool) -> Result<Self> {
        let user_agent = format!("{}/{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        log::debug!("{}: {}", USER_AGENT.as_str(), user_agent);

        let mut builder = ClientBuilder::new().user_agent(user_agent);

        if let Some(path) = trust_store {
            let pem = std::fs::read(path)
                .context(format!("Failed to read trust store {}", path.display()))?;
            let certificate = Certificate::from_pem(&pem)
                .context(format!("Invalid certificate in {}", path.display()))?;
            builder = builder.add_root_certificate(certificate);
        }

        if insecure {
            log::warn!("TLS certificate verification is disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder.build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, TransportError> {
        let mut builder = match request.method {
            Method::Get => self.client.get(request.url.clone()),
            Method::Post => self.client.post(request.url.clone()),
            Method::Delete => self.client.delete(request.url.clone()),
        }
        .timeout(request.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|error| TransportError::new(request, error))?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                let value = value.to_str().ok()?;
                Some((name.as_str().to_string(), value.to_string()))
            })
            .collect();

        // Reading the body to the end hands the connection back to the pool.
        let body = response
            .text()
            .await
            .map_err(|error| TransportError::new(request, error))?;

        Ok(ApiResponse {
            status,
            headers,
            body,
        })
    }
}
