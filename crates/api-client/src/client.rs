//! Authenticated API client.
//!
//! Async HTTP client using `reqwest` with Bearer token authentication and
//! a single-flight refresh of expired access tokens.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use tracing::{debug, info, warn};

use worldbest_protocol::auth::{RefreshRequest, RefreshResponse};
use worldbest_protocol::constants::{DEFAULT_API_URL, HTTP_REQUEST_TIMEOUT, REFRESH_PATH};
use worldbest_session::{Credentials, Session};

use crate::error::ApiError;
use crate::request::{RequestBody, RequestContext, RequestOptions, Response, decode_data};
use crate::upload::{ProgressCallback, UploadBody, UploadFile};

/// Header carrying the per-request correlation ID.
const REQUEST_ID_HEADER: &str = "x-request-id";

type SharedRefresh = Shared<BoxFuture<'static, Result<Credentials, ApiError>>>;

/// Builder for [`ApiClient`].
#[derive(Debug, Clone)]
pub struct ApiClientBuilder {
    base_url: String,
    timeout: Duration,
    user_agent: String,
}

impl Default for ApiClientBuilder {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            timeout: HTTP_REQUEST_TIMEOUT,
            user_agent: concat!("worldbest-client/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ApiClientBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn build(self, session: Arc<Session>) -> Result<ApiClient, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent)
            .build()
            .map_err(ApiError::network)?;

        Ok(ApiClient {
            inner: Arc::new(Inner {
                http,
                base_url: self.base_url.trim_end_matches('/').to_string(),
                session,
                refresh: Mutex::new(None),
            }),
        })
    }
}

struct Inner {
    http: reqwest::Client,
    base_url: String,
    session: Arc<Session>,
    /// In-flight refresh exchange shared by every caller that hit a 401
    /// while it was running.
    refresh: Mutex<Option<SharedRefresh>>,
}

/// WorldBest API client.
///
/// Cloning is cheap; clones share the HTTP connection pool and the
/// refresh slot.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

impl ApiClient {
    /// Creates a client with default timeout and user agent.
    pub fn new(base_url: impl Into<String>, session: Arc<Session>) -> Result<Self, ApiError> {
        Self::builder().base_url(base_url).build(session)
    }

    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::default()
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.inner.session
    }

    /// Performs a request. `path` is relative to the base URL.
    pub async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        options: RequestOptions,
    ) -> Result<Response, ApiError> {
        let body = match body {
            Some(b) => RequestBody::Json(serde_json::to_value(b).map_err(|e| ApiError {
                code: Some(crate::error::codes::INVALID_REQUEST.into()),
                ..ApiError::decode(e)
            })?),
            None => RequestBody::Empty,
        };
        self.execute(RequestContext::new(method, path, body, options))
            .await
    }

    pub async fn get(&self, path: &str) -> Result<Response, ApiError> {
        self.request::<()>(Method::GET, path, None, RequestOptions::default())
            .await
    }

    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response, ApiError> {
        self.request(Method::POST, path, Some(body), RequestOptions::default())
            .await
    }

    /// POST without a body.
    pub async fn post_empty(&self, path: &str) -> Result<Response, ApiError> {
        self.request::<()>(Method::POST, path, None, RequestOptions::default())
            .await
    }

    pub async fn put<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response, ApiError> {
        self.request(Method::PUT, path, Some(body), RequestOptions::default())
            .await
    }

    pub async fn patch<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response, ApiError> {
        self.request(Method::PATCH, path, Some(body), RequestOptions::default())
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<Response, ApiError> {
        self.request::<()>(Method::DELETE, path, None, RequestOptions::default())
            .await
    }

    /// Uploads a file as `multipart/form-data`.
    ///
    /// `on_progress` receives increasing percentages while the body is
    /// streamed. It is never called after this future resolves.
    pub async fn upload(
        &self,
        path: &str,
        file: UploadFile,
        on_progress: Option<ProgressCallback>,
    ) -> Result<Response, ApiError> {
        let body = RequestBody::Upload(UploadBody::new(file, on_progress));
        self.execute(RequestContext::new(
            Method::POST,
            path,
            body,
            RequestOptions::default(),
        ))
        .await
    }

    /// Exchanges the stored refresh token for a new access token.
    ///
    /// Joins an exchange already in flight instead of starting a second
    /// one. On failure the session is expired.
    pub async fn refresh(&self) -> Result<Credentials, ApiError> {
        if !self.inner.session.is_authenticated() {
            return Err(ApiError::session_expired());
        }
        self.refresh_single_flight().await
    }

    /// Runs a request, refreshing and re-dispatching once on 401.
    async fn execute(&self, mut ctx: RequestContext) -> Result<Response, ApiError> {
        loop {
            let token = if ctx.options.anonymous {
                None
            } else {
                self.inner.session.access_token()
            };

            let resp = self.dispatch(&ctx, token.as_deref()).await?;
            if resp.status != StatusCode::UNAUTHORIZED {
                return into_result(resp);
            }

            let unauthorized = ApiError::from_status(resp.status, &resp.body);
            let Some(stale) = token else {
                // Nothing to refresh: the call was made without credentials.
                return Err(unauthorized);
            };
            if ctx.retried {
                warn!(
                    method = %ctx.method,
                    path = %ctx.path,
                    request_id = %ctx.request_id,
                    "still unauthorized after refresh"
                );
                return Err(unauthorized);
            }

            ctx.retried = true;
            if let Err(e) = self.refresh_after(&stale).await {
                debug!(request_id = %ctx.request_id, error = %e, "refresh failed, giving up");
                return Err(unauthorized);
            }
        }
    }

    /// Obtains credentials newer than `stale`, refreshing only if no other
    /// caller already did.
    async fn refresh_after(&self, stale: &str) -> Result<Credentials, ApiError> {
        match self.inner.session.credentials() {
            None => Err(ApiError::session_expired()),
            Some(current) if current.access_token != stale => {
                debug!("credentials already rotated, reusing");
                Ok(current)
            }
            Some(_) => self.refresh_single_flight().await,
        }
    }

    async fn refresh_single_flight(&self) -> Result<Credentials, ApiError> {
        let inflight = {
            let mut slot = self
                .inner
                .refresh
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            match slot.as_ref() {
                Some(existing) => {
                    debug!("joining in-flight token refresh");
                    existing.clone()
                }
                None => {
                    let fut = exchange_refresh_token(
                        self.inner.http.clone(),
                        self.url(REFRESH_PATH),
                        self.inner.session.clone(),
                    )
                    .boxed()
                    .shared();
                    *slot = Some(fut.clone());
                    fut
                }
            }
        };

        let result = inflight.clone().await;

        // Vacate the slot unless a newer exchange already replaced it.
        let mut slot = self
            .inner
            .refresh
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        if slot.as_ref().is_some_and(|f| f.ptr_eq(&inflight)) {
            *slot = None;
        }
        result
    }

    async fn dispatch(
        &self,
        ctx: &RequestContext,
        token: Option<&str>,
    ) -> Result<Response, ApiError> {
        let url = self.url(&ctx.path);
        let mut req = self
            .inner
            .http
            .request(ctx.method.clone(), &url)
            .header(REQUEST_ID_HEADER, &ctx.request_id);

        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        for (name, value) in &ctx.options.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if !ctx.options.query.is_empty() {
            req = req.query(&ctx.options.query);
        }
        if let Some(timeout) = ctx.options.timeout {
            req = req.timeout(timeout);
        }
        req = match &ctx.body {
            RequestBody::Empty => req,
            RequestBody::Json(value) => req.json(value),
            RequestBody::Upload(upload) => req.multipart(upload.form()?),
        };

        debug!(
            method = %ctx.method,
            path = %ctx.path,
            request_id = %ctx.request_id,
            authenticated = token.is_some(),
            retried = ctx.retried,
            "dispatching request"
        );

        let resp = req.send().await.map_err(ApiError::network)?;
        let status = resp.status();
        let headers = resp.headers().clone();
        let body = resp.bytes().await.map_err(ApiError::network)?.to_vec();

        Ok(Response {
            status,
            headers,
            body,
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if path.starts_with('/') {
            format!("{}{}", self.inner.base_url, path)
        } else {
            format!("{}/{}", self.inner.base_url, path)
        }
    }
}

/// Maps 4xx/5xx to an error; everything else is returned untouched.
fn into_result(resp: Response) -> Result<Response, ApiError> {
    if resp.status.is_client_error() || resp.status.is_server_error() {
        Err(ApiError::from_status(resp.status, &resp.body))
    } else {
        Ok(resp)
    }
}

/// Performs the refresh call and records its outcome in the session.
///
/// Never carries an access token and never retries: a 401 here is
/// terminal.
async fn exchange_refresh_token(
    http: reqwest::Client,
    url: String,
    session: Arc<Session>,
) -> Result<Credentials, ApiError> {
    let outcome = async {
        let current = session.credentials().ok_or_else(ApiError::session_expired)?;
        let resp = http
            .post(&url)
            .json(&RefreshRequest {
                refresh_token: current.refresh_token.clone(),
            })
            .send()
            .await
            .map_err(ApiError::network)?;
        let status = resp.status();
        let body = resp.bytes().await.map_err(ApiError::network)?;
        if !status.is_success() {
            return Err(ApiError::from_status(status, &body));
        }

        let refreshed: RefreshResponse = decode_data(&body)?;
        let credentials = Credentials {
            access_token: refreshed.access_token,
            refresh_token: refreshed.refresh_token.unwrap_or(current.refresh_token),
        };
        session
            .refreshed(credentials.clone())
            .map_err(ApiError::store)?;
        Ok(credentials)
    }
    .await;

    match outcome {
        Ok(credentials) => {
            info!("token refresh succeeded");
            Ok(credentials)
        }
        Err(e) => {
            warn!(status = ?e.status, code = ?e.code, error = %e, "token refresh failed");
            let _ = session.expire();
            Err(e)
        }
    }
}
