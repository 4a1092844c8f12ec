use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tracing::debug;
use url::Url;

use crate::error::FetchError;

pub const AUTHORIZATION_HEADER: &str = "Authorization";
pub const CORRELATION_HEADER: &str = "X-CorrelationID";
pub const TENANT_HEADER: &str = "X-TenantUuid";
pub const TILE_WIDTH_HEADER: &str = "tile-width";

/// How the response body should be read before it is handed to the frame decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Binary,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: Url,
    pub kind: ResponseKind,
}

impl FetchRequest {
    pub fn new(url: Url, kind: ResponseKind) -> Self {
        Self { url, kind }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    /// Final URL after redirects.
    pub url: Url,
    pub body: Bytes,
    pub tile_width: Option<String>,
}

/// Network primitive the scheduler drives. One call per started request.
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// Headers attached to every outgoing fetch. Shared between the dispatcher, which updates
/// them from host messages, and the fetcher, which reads them when a request starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestHeaders {
    pub correlation_id: String,
    pub authorization: Option<String>,
    pub tenant_uuid: Option<String>,
}

pub type SharedHeaders = Arc<RwLock<RequestHeaders>>;

impl RequestHeaders {
    pub fn shared(correlation_id: impl Into<String>) -> SharedHeaders {
        Arc::new(RwLock::new(Self {
            correlation_id: correlation_id.into(),
            ..Self::default()
        }))
    }

    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![(CORRELATION_HEADER, self.correlation_id.clone())];
        if let Some(value) = &self.authorization {
            pairs.push((AUTHORIZATION_HEADER, value.clone()));
        }
        if let Some(value) = &self.tenant_uuid {
            pairs.push((TENANT_HEADER, value.clone()));
        }
        pairs
    }
}

#[derive(Clone)]
pub struct HttpFetcher {
    http: reqwest::Client,
    headers: SharedHeaders,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, headers: SharedHeaders) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, headers })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let pairs = self.headers.read().pairs();
        let mut builder = self.http.get(request.url.clone());
        for (name, value) in pairs {
            builder = builder.header(name, value);
        }

        let res = builder
            .send()
            .await
            .map_err(|err| FetchError::transport(err.to_string()))?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            let message = if body.trim().is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_string()
            } else {
                body
            };
            return Err(FetchError {
                status: status.as_u16(),
                message,
            });
        }

        let url = res.url().clone();
        let tile_width = res
            .headers()
            .get(TILE_WIDTH_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let body = match request.kind {
            ResponseKind::Binary => res.bytes().await,
            ResponseKind::Text => res.text().await.map(Bytes::from),
        }
        .map_err(|err| FetchError {
            status: status.as_u16(),
            message: err.to_string(),
        })?;

        debug!(url = %url, status = status.as_u16(), bytes = body.len(), "fetch complete");
        Ok(FetchResponse {
            url,
            body,
            tile_width,
        })
    }
}
