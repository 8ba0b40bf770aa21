use std::time::Duration;

use metricflow_core::SinkError;
use metricflow_domain::Result;
use reqwest::header::HeaderMap;
use reqwest::{Client as ReqwestClient, Method, RequestBuilder};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::{http_error, InfraError};

/// Longest response body kept in a [`SinkError::Rejected`].
const MAX_ERROR_BODY: usize = 512;

/// HTTP client used by sinks that push over HTTP.
///
/// A request is sent exactly once; retry and circuit breaking are applied by
/// the flush scheduler around the whole export.
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: ReqwestClient,
    timeout: Duration,
}

impl HttpClient {
    /// Start building a new HTTP client.
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// Per-request timeout.
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Create a request builder using the underlying reqwest client.
    pub fn request<U>(&self, method: Method, url: U) -> RequestBuilder
    where
        U: reqwest::IntoUrl,
    {
        self.client.request(method, url)
    }

    /// Sends `builder` and maps the outcome onto [`SinkError`].
    ///
    /// Any 2xx status is success. Other statuses become
    /// [`SinkError::Rejected`] carrying a truncated response body.
    pub async fn send(
        &self,
        builder: RequestBuilder,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), SinkError> {
        let request = builder.build().map_err(|err| http_error(&err, self.timeout))?;
        let method = request.method().clone();
        let url = request.url().clone();
        debug!(%method, %url, "sending HTTP request");

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(SinkError::Cancelled),
            response = self.client.execute(request) => {
                response.map_err(|err| http_error(&err, self.timeout))?
            }
        };

        let status = response.status();
        debug!(%method, %url, %status, "received HTTP response");
        if status.is_success() {
            return Ok(());
        }

        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Err(SinkError::Rejected { status: status.as_u16(), body })
    }
}

/// Builder for [`HttpClient`].
#[derive(Debug)]
pub struct HttpClientBuilder {
    timeout: Duration,
    user_agent: Option<String>,
    default_headers: Option<HeaderMap>,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: Some(concat!("metricflow/", env!("CARGO_PKG_VERSION")).to_string()),
            default_headers: None,
        }
    }
}

impl HttpClientBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    pub fn default_headers(mut self, headers: HeaderMap) -> Self {
        self.default_headers = Some(headers);
        self
    }

    /// # Errors
    ///
    /// Returns `MetricsError::Config` if the TLS backend cannot be set up.
    pub fn build(self) -> Result<HttpClient> {
        let mut builder = ReqwestClient::builder().timeout(self.timeout);

        if let Some(agent) = self.user_agent {
            builder = builder.user_agent(agent);
        }

        if let Some(headers) = self.default_headers {
            builder = builder.default_headers(headers);
        }

        let client = builder.build().map_err(InfraError::from)?;

        Ok(HttpClient { client, timeout: self.timeout })
    }
}
