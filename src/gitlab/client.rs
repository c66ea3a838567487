use std::{fmt, time::Duration};

use thiserror::Error;
use url::Url;

use super::transport::{ApiRequest, ApiResponse, Method, Transport};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20);
pub const DEFAULT_MAX_RETRIES: u32 = 5;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Why a request produced no usable data.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Every attempt failed at the transport level.
    #[error("{method} request to {url} failed after {attempts} attempts")]
    Exhausted {
        method: Method,
        url: String,
        attempts: u32,
    },

    /// The registry answered, but not with `200 OK`. Never retried.
    #[error("request to {url} returned status {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Per-call knobs. Defaults: 20s timeout, 5 attempts, no headers, no query.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOptions {
    pub timeout: Duration,
    pub max_retries: u32,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            headers: Vec::new(),
            query: Vec::new(),
        }
    }
}

impl RequestOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Sets `name`, replacing an earlier value of the same parameter.
    pub fn with_query(mut self, name: &str, value: impl ToString) -> Self {
        self.query.retain(|(key, _)| key != name);
        self.query.push((name.to_string(), value.to_string()));
        self
    }
}

/// Delay to wait after the n-th failed attempt (1-based).
pub struct RetryPolicy {
    delay: Box<dyn Fn(u32) -> Duration + Send + Sync>,
}

impl RetryPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self::from_fn(move |_| delay)
    }

    pub fn from_fn(delay: impl Fn(u32) -> Duration + Send + Sync + 'static) -> Self {
        Self {
            delay: Box::new(delay),
        }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        (self.delay)(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(DEFAULT_RETRY_DELAY)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("first_delay", &self.delay(1))
            .finish()
    }
}

/// Sends requests through a [`Transport`], retrying transport failures.
///
/// Any HTTP status, 4xx and 5xx included, is a response and is handed back
/// as-is. Only when all `max_retries` attempts fail to produce a response does
/// the caller get [`FetchError::Exhausted`]. A delay follows every failed
/// attempt, so `n` failures cost `n` delays.
#[derive(Debug)]
pub struct RequestClient<T> {
    transport: T,
    retry: RetryPolicy,
}

impl<T: Transport> RequestClient<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn get(&self, url: &Url, options: &RequestOptions) -> Result<ApiResponse, FetchError> {
        self.send(Method::Get, url, None, options).await
    }

    pub async fn post(
        &self,
        url: &Url,
        body: serde_json::Value,
        options: &RequestOptions,
    ) -> Result<ApiResponse, FetchError> {
        self.send(Method::Post, url, Some(body), options).await
    }

    pub async fn delete(
        &self,
        url: &Url,
        options: &RequestOptions,
    ) -> Result<ApiResponse, FetchError> {
        self.send(Method::Delete, url, None, options).await
    }

    pub async fn send(
        &self,
        method: Method,
        url: &Url,
        body: Option<serde_json::Value>,
        options: &RequestOptions,
    ) -> Result<ApiResponse, FetchError> {
        let request = ApiRequest {
            method,
            url: url.clone(),
            headers: options.headers.clone(),
            query: options.query.clone(),
            body,
            timeout: options.timeout,
        };

        for attempt in 1..=options.max_retries {
            match self.transport.send(&request).await {
                Ok(response) => {
                    log::debug!("{} {} -> {}", method, url, response.status);
                    return Ok(response);
                }
                Err(error) => log::warn!(
                    "Failed {} request (attempt {}/{}): {}",
                    method,
                    attempt,
                    options.max_retries,
                    error.message,
                ),
            }
            tokio::time::sleep(self.retry.delay(attempt)).await;
        }

        Err(FetchError::Exhausted {
            method,
            url: url.to_string(),
            attempts: options.max_retries,
        })
    }
}
