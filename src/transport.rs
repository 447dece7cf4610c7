use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE,
};
use reqwest::{Client, Method};
use serde_json::Value;

use crate::error::ClientError;
use crate::json::{self, ResponseBody};

pub const DEFAULT_API_BASE: &str = "https://discord.com";
/// Versioned path prefix applied to every request against the default host.
pub const API_PREFIX: &str = "/api/v10";

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    /// Alternate host; when set the path is used verbatim without the API prefix.
    pub host: Option<String>,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            host: None,
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: ResponseBody,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.body.field(name)
    }
}

/// HTTP client for the chat service API. Cloning is cheap and clones share
/// one connection pool.
#[derive(Debug, Clone)]
pub struct Transport {
    client: Client,
    api_base: String,
    token: Option<String>,
}

impl Default for Transport {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE)
    }
}

impl Transport {
    pub fn new(api_base: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn url_for(&self, host: Option<&str>, path: &str) -> String {
        match host {
            Some(host) if host.contains("://") => {
                format!("{}{}", host.trim_end_matches('/'), path)
            }
            Some(host) => format!("https://{}{}", host.trim_end_matches('/'), path),
            None => format!("{}{}{}", self.api_base, API_PREFIX, path),
        }
    }

    fn build_headers(
        &self,
        req: &ApiRequest,
        body: Option<&str>,
    ) -> Result<HeaderMap, ClientError> {
        let mut headers = HeaderMap::new();

        if let Some(ref token) = self.token {
            let value = HeaderValue::from_str(token)
                .map_err(|_| ClientError::InvalidHeader(AUTHORIZATION.to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }

        for (name, value) in &req.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ClientError::InvalidHeader(name.clone()))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| ClientError::InvalidHeader(name.clone()))?;
            headers.insert(header_name, header_value);
        }

        if let Some(body) = body {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(body.len()));
            if !headers.contains_key(CONTENT_TYPE) {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
        }

        Ok(headers)
    }

    /// Performs exactly one round trip. Failures are returned, never retried.
    pub async fn request(&self, req: ApiRequest) -> Result<ApiResponse, ClientError> {
        let url = self.url_for(req.host.as_deref(), &req.path);
        let body = req.body.as_ref().map(|b| json::format_json(b)).transpose()?;
        let headers = self.build_headers(&req, body.as_deref())?;

        tracing::debug!(method = %req.method, url = %url, "api request");

        let mut builder = self.client.request(req.method, &url).headers(headers);
        if let Some(body) = body {
            builder = builder.body(body);
        }
        let resp = builder.send().await?;

        let status = resp.status().as_u16();
        let headers = resp.headers().clone();
        let bytes = resp.bytes().await?;

        tracing::debug!(status, len = bytes.len(), url = %url, "api response");

        Ok(ApiResponse {
            status,
            headers,
            body: json::decode_body(bytes.to_vec()),
        })
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse, ClientError> {
        self.request(ApiRequest::get(path)).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<ApiResponse, ClientError> {
        self.request(ApiRequest::post(path).json(body)).await
    }

    pub async fn patch(&self, path: &str, body: Value) -> Result<ApiResponse, ClientError> {
        self.request(ApiRequest::patch(path).json(body)).await
    }

    pub async fn put(&self, path: &str, body: Value) -> Result<ApiResponse, ClientError> {
        self.request(ApiRequest::put(path).json(body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse, ClientError> {
        self.request(ApiRequest::delete(path)).await
    }

    /// Asks the API for the gateway endpoint (`GET /gateway`).
    pub async fn gateway_url(&self) -> Result<String, ClientError> {
        let resp = self.get("/gateway").await?;
        match resp.field("url").and_then(|v| v.as_str()) {
            Some(url) => Ok(url.to_string()),
            None => Err(ClientError::GatewayUnavailable(format!(
                "GET /gateway returned {} without a url",
                resp.status
            ))),
        }
    }
}
