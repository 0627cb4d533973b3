//! Uniform error shape for every failed API call.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use worldbest_session::StoreError;

/// Error codes assigned by the client itself (no server response).
pub mod codes {
    pub const NETWORK_ERROR: &str = "NETWORK_ERROR";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const DECODE_ERROR: &str = "DECODE_ERROR";
    pub const STORAGE_ERROR: &str = "STORAGE_ERROR";
    pub const IO_ERROR: &str = "IO_ERROR";
    pub const SESSION_EXPIRED: &str = "SESSION_EXPIRED";
}

/// A failed API call.
///
/// `status` is `None` when no HTTP response was received (network
/// failure, timeout, local I/O). `code` and `details` come from the
/// response body when the server provided them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct ApiError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    fn local(code: &str, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            code: Some(code.to_string()),
            details: None,
        }
    }

    /// Normalizes a transport-level failure.
    pub fn network(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::local(codes::TIMEOUT, "request timed out")
        } else if err.is_builder() {
            Self::local(codes::INVALID_REQUEST, err.to_string())
        } else {
            Self::local(codes::NETWORK_ERROR, err.to_string())
        }
    }

    /// Normalizes an error response from its status and body.
    ///
    /// Understands both `{"error": {code, message, details}}` and a flat
    /// `{code, message, details}` body. Falls back to the status reason.
    pub fn from_status(status: StatusCode, body: &[u8]) -> Self {
        let parsed: Option<serde_json::Value> = serde_json::from_slice(body).ok();
        let source = parsed
            .as_ref()
            .and_then(|v| v.get("error").filter(|e| e.is_object()))
            .or(parsed.as_ref());

        let message = source
            .and_then(|s| s.get("message"))
            .and_then(|m| m.as_str())
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| match status.canonical_reason() {
                Some(reason) => reason.to_string(),
                None => format!("request failed with status {}", status.as_u16()),
            });

        let code = source.and_then(|s| s.get("code")).and_then(|c| match c {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        });

        let details = source
            .and_then(|s| s.get("details"))
            .filter(|d| !d.is_null())
            .cloned();

        Self {
            message,
            status: Some(status.as_u16()),
            code,
            details,
        }
    }

    /// A response body that did not match the expected shape.
    pub fn decode(err: serde_json::Error) -> Self {
        Self::local(codes::DECODE_ERROR, format!("invalid response body: {err}"))
    }

    pub fn store(err: StoreError) -> Self {
        Self::local(codes::STORAGE_ERROR, format!("credential storage failed: {err}"))
    }

    pub fn io(err: std::io::Error) -> Self {
        Self::local(codes::IO_ERROR, err.to_string())
    }

    /// No credentials are left to refresh with.
    pub fn session_expired() -> Self {
        Self::local(codes::SESSION_EXPIRED, "session expired")
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == Some(StatusCode::UNAUTHORIZED.as_u16())
    }

    /// Returns `true` if no HTTP response was received.
    pub fn is_network(&self) -> bool {
        self.status.is_none()
            && matches!(
                self.code.as_deref(),
                Some(codes::NETWORK_ERROR) | Some(codes::TIMEOUT)
            )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_error_body() {
        let body = br#"{"success":false,"error":{"code":"VALIDATION","message":"title required","details":{"field":"title"}}}"#;
        let err = ApiError::from_status(StatusCode::UNPROCESSABLE_ENTITY, body);
        assert_eq!(err.status, Some(422));
        assert_eq!(err.code.as_deref(), Some("VALIDATION"));
        assert_eq!(err.message, "title required");
        assert_eq!(err.details.unwrap()["field"], "title");
    }

    #[test]
    fn flat_error_body() {
        let body = br#"{"message":"quota exceeded","code":"QUOTA","details":[1,2]}"#;
        let err = ApiError::from_status(StatusCode::TOO_MANY_REQUESTS, body);
        assert_eq!(err.status, Some(429));
        assert_eq!(err.code.as_deref(), Some("QUOTA"));
        assert_eq!(err.message, "quota exceeded");
        assert!(err.details.unwrap().is_array());
    }

    #[test]
    fn numeric_code_is_stringified() {
        let err = ApiError::from_status(StatusCode::BAD_REQUEST, br#"{"code":1042}"#);
        assert_eq!(err.code.as_deref(), Some("1042"));
        assert_eq!(err.message, "Bad Request");
    }

    #[test]
    fn non_json_body_uses_status_reason() {
        let err = ApiError::from_status(StatusCode::BAD_GATEWAY, b"<html>upstream down</html>");
        assert_eq!(err.status, Some(502));
        assert_eq!(err.message, "Bad Gateway");
        assert!(err.code.is_none());
        assert!(err.details.is_none());
    }

    #[test]
    fn unauthorized_detection() {
        let err = ApiError::from_status(StatusCode::UNAUTHORIZED, b"");
        assert!(err.is_unauthorized());
        assert!(!err.is_network());
    }

    #[test]
    fn session_expired_has_no_status() {
        let err = ApiError::session_expired();
        assert!(err.status.is_none());
        assert_eq!(err.code.as_deref(), Some(codes::SESSION_EXPIRED));
        assert!(!err.is_network());
    }

    #[test]
    fn display_is_message() {
        let err = ApiError::from_status(StatusCode::NOT_FOUND, br#"{"message":"no such project"}"#);
        assert_eq!(err.to_string(), "no such project");
    }
}
