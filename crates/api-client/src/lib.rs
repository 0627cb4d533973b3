//! HTTP client for the WorldBest API.
//!
//! Attaches the current access token to every request, recovers from an
//! expired token with a single shared refresh exchange, and reports every
//! failure as a uniform [`ApiError`].

pub mod auth;
pub mod client;
pub mod error;
pub mod request;
pub mod upload;

#[cfg(test)]
mod mock_server;

pub use auth::AuthApi;
pub use client::{ApiClient, ApiClientBuilder};
pub use error::ApiError;
pub use request::{RequestOptions, Response};
pub use upload::{ProgressCallback, UploadFile};
