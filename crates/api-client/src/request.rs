//! Per-call request description and the returned response.

use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use worldbest_protocol::api::ApiResponse;

use crate::error::ApiError;
use crate::upload::UploadBody;

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    /// Overrides the client-wide timeout.
    pub timeout: Option<Duration>,
    /// Sends the request without credentials and never refreshes on 401.
    /// Used for login, signup and the password reset endpoints.
    pub anonymous: bool,
}

impl RequestOptions {
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }
}

pub(crate) enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Upload(UploadBody),
}

/// One outbound call, kept intact so it can be re-dispatched after a
/// token refresh.
pub(crate) struct RequestContext {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) body: RequestBody,
    pub(crate) options: RequestOptions,
    /// Set once the call has been re-dispatched after a refresh.
    pub(crate) retried: bool,
    pub(crate) request_id: String,
}

impl RequestContext {
    pub(crate) fn new(
        method: Method,
        path: impl Into<String>,
        body: RequestBody,
        options: RequestOptions,
    ) -> Self {
        Self {
            method,
            path: path.into(),
            body,
            options,
            retried: false,
            request_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}

/// A successful HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl Response {
    /// Deserializes the body as-is.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_slice(&self.body).map_err(ApiError::decode)
    }

    /// Deserializes the payload, unwrapping the `{success, data}` envelope
    /// when the server used one.
    pub fn data<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        decode_data(&self.body)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

pub(crate) fn decode_data<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    let value: serde_json::Value = serde_json::from_slice(body).map_err(ApiError::decode)?;
    let enveloped = value
        .as_object()
        .is_some_and(|o| o.contains_key("success") && o.contains_key("data"));
    if enveloped {
        let envelope: ApiResponse<T> = serde_json::from_value(value).map_err(ApiError::decode)?;
        if let Some(data) = envelope.data {
            return Ok(data);
        }
        return Err(ApiError::decode(<serde_json::Error as serde::de::Error>::custom(
            "envelope has null data",
        )));
    }
    serde_json::from_value(value).map_err(ApiError::decode)
}
