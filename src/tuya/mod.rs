pub mod models;
pub mod sign;
pub mod token;

use std::{collections::BTreeMap, time::Duration};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

use self::{
    models::{DeviceDetails, TuyaResponse, TokenResult},
    sign::{path_and_query, sign_request, HttpMethod, SigningContext},
    token::TokenState,
};

/// Failures of a single signed call, classified so callers can tell an
/// unlucky poll from a dead credential.
#[derive(Debug, Error)]
pub enum TuyaError {
    #[error("request failed: {0:#}")]
    Transport(anyhow::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("unexpected response payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Tuya API error: code={code}, msg={msg}")]
    Api { code: i32, msg: String },

    #[error("token acquisition failed after {attempts} attempts")]
    TokenExhausted {
        attempts: u32,
        #[source]
        last: Box<TuyaError>,
    },
}

/// Cloud project credentials plus the one device this process logs.
#[derive(Clone)]
pub struct Credentials {
    pub access_id: String,
    pub access_secret: String,
    pub device_id: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_id", &self.access_id)
            .field("access_secret", &"<redacted>")
            .field("device_id", &self.device_id)
            .finish()
    }
}

/// A fully signed request, ready for any [`Transport`].
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub method: HttpMethod,
    /// Exactly the path and query string that were signed.
    pub path_and_query: String,
    pub headers: Vec<(&'static str, String)>,
    pub body: Option<Vec<u8>>,
}

impl SignedRequest {
    #[cfg(test)]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Status code and decoded body of a response. Bodies that are not JSON are
/// carried as a JSON string so they can still be logged.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: serde_json::Value,
}

/// "Send a signed request, get status + JSON".
pub trait Transport {
    async fn send(&self, request: &SignedRequest) -> Result<ApiResponse>;
}

// ---------------------------------------------------------------------------
// reqwest transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }
}

impl Transport for ReqwestTransport {
    async fn send(&self, request: &SignedRequest) -> Result<ApiResponse> {
        let url = format!("{}{}", self.base_url, request.path_and_query);
        debug!(method = %request.method, url = %url, "Sending Tuya request");

        let builder = match request.method {
            HttpMethod::Get => self.http.get(&url),
            HttpMethod::Post => self.http.post(&url),
        };
        let mut builder = builder.headers(to_header_map(&request.headers)?);
        if let Some(body) = &request.body {
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.clone());
        }

        let response = builder
            .send()
            .await
            .with_context(|| format!("Tuya {} {} failed", request.method, request.path_and_query))?;
        let status = response.status().as_u16();
        let bytes = response
            .bytes()
            .await
            .context("Failed to read Tuya response body")?;

        let body = serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            serde_json::Value::String(String::from_utf8_lossy(&bytes).into_owned())
        });
        Ok(ApiResponse { status, body })
    }
}

/// Convert our header list into a `reqwest::header::HeaderMap`.
fn to_header_map(headers: &[(&'static str, String)]) -> Result<reqwest::header::HeaderMap> {
    let mut header_map = reqwest::header::HeaderMap::new();
    for (k, v) in headers {
        let name = reqwest::header::HeaderName::from_bytes(k.as_bytes())
            .with_context(|| format!("invalid header name: {k}"))?;
        let value = reqwest::header::HeaderValue::from_str(v)
            .with_context(|| format!("invalid header value for {k}"))?;
        header_map.insert(name, value);
    }
    Ok(header_map)
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct TuyaClient<T> {
    transport: T,
    credentials: Credentials,
}

#[cfg(test)]
impl<T> TuyaClient<T> {
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

impl<T: Transport> TuyaClient<T> {
    pub fn new(transport: T, credentials: Credentials) -> Self {
        Self { transport, credentials }
    }

    pub fn device_id(&self) -> &str {
        &self.credentials.device_id
    }

    /// Sign a request at `now` and attach the Tuya authentication headers.
    ///
    /// `access_token` is empty for token calls.
    pub fn build_request(
        &self,
        method: HttpMethod,
        path: &str,
        query: &BTreeMap<String, String>,
        body: Option<Vec<u8>>,
        access_token: &str,
        now: DateTime<Utc>,
    ) -> SignedRequest {
        let ctx = SigningContext {
            method,
            path,
            query,
            body: body.as_deref(),
            access_token,
        };
        let signature = sign_request(
            &self.credentials.access_id,
            &self.credentials.access_secret,
            &ctx,
            now,
        );

        let headers = vec![
            ("client_id", self.credentials.access_id.clone()),
            ("sign", signature.sign),
            ("sign_method", "HMAC-SHA256".to_owned()),
            ("access_token", access_token.to_owned()),
            ("t", signature.t.to_string()),
            ("lang", "en".to_owned()),
        ];

        SignedRequest {
            method,
            path_and_query: path_and_query(path, query),
            headers,
            body,
        }
    }

    /// Send a signed request and unwrap the envelope. Succeeds only on
    /// HTTP 200 with `success: true`; returns the result and the server `t`.
    async fn call<R: DeserializeOwned>(&self, request: SignedRequest) -> Result<(i64, R), TuyaError> {
        let response = self
            .transport
            .send(&request)
            .await
            .map_err(TuyaError::Transport)?;

        if response.status != 200 {
            return Err(TuyaError::Status {
                status: response.status,
                body: response.body.to_string(),
            });
        }

        serde_json::from_value::<TuyaResponse<R>>(response.body)?.into_result()
    }

    /// Obtain a brand-new token pair: `GET /v1.0/token?grant_type=1`.
    pub async fn mint_token(&self, now: DateTime<Utc>) -> Result<TokenState, TuyaError> {
        let query = BTreeMap::from([("grant_type".to_owned(), "1".to_owned())]);
        let request = self.build_request(HttpMethod::Get, "/v1.0/token", &query, None, "", now);
        let (t, result) = self.call::<TokenResult>(request).await?;
        Ok(TokenState::from_response(t, result))
    }

    /// Exchange a refresh token for a renewed pair: `GET /v1.0/token/{refresh_token}`.
    pub async fn refresh_token(
        &self,
        refresh_token: &str,
        now: DateTime<Utc>,
    ) -> Result<TokenState, TuyaError> {
        let path = format!("/v1.0/token/{refresh_token}");
        let request = self.build_request(HttpMethod::Get, &path, &BTreeMap::new(), None, "", now);
        let (t, result) = self.call::<TokenResult>(request).await?;
        Ok(TokenState::from_response(t, result))
    }

    /// Fetch online flag and DP status list: `GET /v1.0/devices/{device_id}`.
    /// Returns the server timestamp alongside the details.
    pub async fn device_details(
        &self,
        access_token: &str,
        now: DateTime<Utc>,
    ) -> Result<(i64, DeviceDetails), TuyaError> {
        let path = format!("/v1.0/devices/{}", self.credentials.device_id);
        let request =
            self.build_request(HttpMethod::Get, &path, &BTreeMap::new(), None, access_token, now);
        self.call::<DeviceDetails>(request).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
