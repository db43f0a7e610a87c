pub mod body;
pub mod response;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, SET_COOKIE};
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;

pub use body::{EntryValue, FileField, FormPayload, FormValue, RequestBody};
pub use response::{route, RawResponse};

/// Cookie the server uses to hand out the CSRF token
const CSRF_COOKIE: &str = "csrftoken";

/// Header the server expects the CSRF token in
pub const CSRF_HEADER: &str = "X-CSRFToken";

/// Failures reported to the write control and the screens
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    /// Network failure (or a request that could not be built)
    #[error("request failed: {0}")]
    Transport(String),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// Error reported by the server inside a successful response
    #[error("{0}")]
    Application(String),

    #[error("could not decode response: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    Get,
    Post,
    #[default]
    Put,
    #[allow(dead_code)]
    Patch,
    #[allow(dead_code)]
    Delete,
}

impl Method {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
        };
        f.write_str(name)
    }
}

/// A fully serialized request, ready to hand to a [`Transport`]
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: Method,
    pub target: String,
    pub body: RequestBody,
}

/// Issues requests and reports either a response or a failure
pub trait Transport: Send + Sync {
    fn send(
        &self,
        request: PreparedRequest,
    ) -> impl Future<Output = Result<RawResponse, ApiError>> + Send;
}

/// Shared HTTP client for the ch2 web API.
///
/// Cheap to clone. The CSRF token is shared between clones and refreshed from
/// the `csrftoken` cookie whenever the server sets one.
#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    csrf_token: Arc<RwLock<Option<String>>>,
}

impl ApiClient {
    pub fn new(base_url: &str, csrf_token: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            csrf_token: Arc::new(RwLock::new(csrf_token.filter(|t| !t.is_empty()))),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn csrf_token(&self) -> Option<String> {
        self.csrf_token.read().ok().and_then(|t| t.clone())
    }

    /// Absolute URL for a target path (absolute targets are used as-is)
    pub fn url(&self, target: &str) -> String {
        if target.starts_with("http://") || target.starts_with("https://") {
            target.to_string()
        } else if target.starts_with('/') {
            format!("{}{}", self.base_url, target)
        } else {
            format!("{}/{}", self.base_url, target)
        }
    }

    /// GET a target and decode the routed JSON
    pub async fn get_json<T: DeserializeOwned>(&self, target: &str) -> Result<T> {
        let request = PreparedRequest {
            method: Method::Get,
            target: target.to_string(),
            body: RequestBody::Empty,
        };
        let value = route(self.send(request).await)
            .with_context(|| format!("GET {} failed", target))?;
        serde_json::from_value(value).with_context(|| format!("Unexpected data from {}", target))
    }

    fn capture_csrf(&self, headers: &HeaderMap) {
        let token = headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find_map(csrf_from_cookie);

        if let Some(token) = token {
            if let Ok(mut current) = self.csrf_token.write() {
                if current.as_deref() != Some(token.as_str()) {
                    tracing::debug!("Refreshed CSRF token from cookie");
                    *current = Some(token);
                }
            }
        }
    }
}

fn csrf_from_cookie(cookie: &str) -> Option<String> {
    let pair = cookie.split(';').next()?.trim();
    let (name, value) = pair.split_once('=')?;
    (name.trim() == CSRF_COOKIE && !value.is_empty()).then(|| value.trim().to_string())
}

impl Transport for ApiClient {
    async fn send(&self, request: PreparedRequest) -> Result<RawResponse, ApiError> {
        let url = self.url(&request.target);
        tracing::debug!("{} {}", request.method, url);

        let mut builder = self.client.request(request.method.as_reqwest(), &url);

        if request.method != Method::Get {
            if let Some(token) = self.csrf_token() {
                builder = builder.header(CSRF_HEADER, token);
            }
        }

        for (name, value) in request.body.headers() {
            builder = builder.header(*name, *value);
        }

        builder = match request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(text) => builder.body(text),
            RequestBody::Multipart(entries) => builder.multipart(body::to_form(entries)?),
        };

        let response = builder.send().await.map_err(|e| {
            tracing::warn!("{} {} failed: {}", request.method, url, e);
            ApiError::Transport(e.to_string())
        })?;

        self.capture_csrf(response.headers());

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        tracing::debug!("{} {} -> {} ({} bytes)", request.method, url, status, body.len());
        Ok(RawResponse::new(status, body.to_vec()))
    }
}
