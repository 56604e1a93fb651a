//! Elasticsearch backend for sqlagg.
//!
//! [`EsBackend`] posts a compiled [`SearchRequest`] to
//! `{url}/{index}[/{type}]/_search` and hands the raw JSON response back to
//! the result reader. HTTP failures are classified into [`BackendError`]
//! variants so the client can decide what to retry.
//!
//! ```no_run
//! use sqlagg::config::BackendConfig;
//! use sqlagg::SqlClient;
//! use sqlagg_es::EsBackend;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let backend = EsBackend::from_config(&BackendConfig::default())?;
//! let client = SqlClient::new(backend).with_retries(2);
//! let table = client.query_table("SELECT gender, COUNT(*) FROM bank GROUP BY gender").await?;
//! println!("{}", table.render());
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use sqlagg::config::BackendConfig;
use sqlagg::{BackendError, ExecutionBackend, SearchRequest};

/// HTTP backend for an Elasticsearch-compatible cluster
#[derive(Debug, Clone)]
pub struct EsBackend {
    client: Client,
    url: Url,
    credentials: Option<(String, Option<String>)>,
}

impl EsBackend {
    /// Backend for `url` with a default client and no credentials
    pub fn new(url: &str) -> Result<Self, BackendError> {
        Self::with_client(Client::new(), url)
    }

    pub fn from_config(config: &BackendConfig) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| BackendError::Http(e.to_string()))?;

        let backend = Self::with_client(client, &config.url)?;
        Ok(match &config.username {
            Some(username) => backend.with_basic_auth(username, config.password.as_deref()),
            None => backend,
        })
    }

    fn with_client(client: Client, url: &str) -> Result<Self, BackendError> {
        let parsed = Url::parse(url)
            .map_err(|e| BackendError::Http(format!("invalid URL '{}': {}", url, e)))?;
        if parsed.cannot_be_a_base() {
            return Err(BackendError::Http(format!("invalid URL '{}': not a base URL", url)));
        }
        Ok(Self {
            client,
            url: parsed,
            credentials: None,
        })
    }

    /// Basic auth for every request
    pub fn with_basic_auth(mut self, username: &str, password: Option<&str>) -> Self {
        self.credentials = Some((username.to_string(), password.map(str::to_string)));
        self
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    /// `{url}/{index}[/{type}]/_search` with each segment percent-encoded
    fn search_url(&self, request: &SearchRequest) -> Url {
        let mut url = self.url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(&request.index);
            if let Some(doc_type) = &request.doc_type {
                segments.push(doc_type);
            }
            segments.push("_search");
        }
        url
    }
}

fn transport_error(e: reqwest::Error) -> BackendError {
    if e.is_timeout() {
        BackendError::Timeout(e.to_string())
    } else {
        BackendError::Http(e.to_string())
    }
}

/// Index named by an `index_not_found_exception` body
fn missing_index(body: &str) -> Option<String> {
    let error: Value = serde_json::from_str(body).ok()?;
    let error = error.get("error")?;
    if error.get("type")?.as_str()? != "index_not_found_exception" {
        return None;
    }
    error
        .get("index")
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn status_error(status: StatusCode, body: String, request: &SearchRequest) -> BackendError {
    if status == StatusCode::NOT_FOUND {
        let index = missing_index(&body).unwrap_or_else(|| request.index.clone());
        return BackendError::IndexNotFound(index);
    }
    BackendError::Status {
        status: status.as_u16(),
        body,
    }
}

#[async_trait]
impl ExecutionBackend for EsBackend {
    #[instrument(skip(self, request), fields(path = %request.path()))]
    async fn execute(&self, request: &SearchRequest) -> Result<Value, BackendError> {
        let body = request.to_json();
        debug!(body = %body, "Sending search request");

        let mut builder = self.client.post(self.search_url(request)).json(&body);
        if let Some((username, password)) = &self.credentials {
            builder = builder.basic_auth(username, password.as_deref());
        }

        let response = builder.send().await.map_err(transport_error)?;
        let status = response.status();
        let text = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            warn!(status = status.as_u16(), "Search request rejected");
            return Err(status_error(status, text, request));
        }

        serde_json::from_str(&text).map_err(|e| BackendError::Decode(e.to_string()))
    }
}
