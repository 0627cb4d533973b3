//! Account endpoints.
//!
//! Thin wrappers over [`ApiClient`] that also keep the [`Session`] in step
//! with the server: login and signup store credentials, logout and account
//! deletion clear them.
//!
//! [`Session`]: worldbest_session::Session

use reqwest::Method;
use tracing::{info, warn};

use worldbest_protocol::auth::{
    AuthResponse, ChangePasswordRequest, EmailRequest, LoginRequest, ProfileUpdate,
    ResetPasswordRequest, SignupRequest, TokenRequest, TwoFactorSetup, User,
};
use worldbest_session::Credentials;

use crate::client::ApiClient;
use crate::error::ApiError;
use crate::request::RequestOptions;

#[derive(Clone)]
pub struct AuthApi {
    client: ApiClient,
}

impl AuthApi {
    pub fn new(client: ApiClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    /// Signs in and stores the issued credentials.
    pub async fn login(&self, email: &str, password: &str) -> Result<User, ApiError> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        self.authenticate("/auth/login", &body).await
    }

    /// Creates an account and signs in as it.
    pub async fn signup(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<User, ApiError> {
        let body = SignupRequest {
            email: email.to_string(),
            password: password.to_string(),
            display_name: display_name.to_string(),
        };
        self.authenticate("/auth/signup", &body).await
    }

    async fn authenticate<B: serde::Serialize>(&self, path: &str, body: &B) -> Result<User, ApiError> {
        let resp = self
            .client
            .request(Method::POST, path, Some(body), RequestOptions::default().anonymous())
            .await?;
        let auth: AuthResponse = resp.data()?;

        self.client
            .session()
            .login(Credentials::new(auth.access_token, auth.refresh_token))
            .map_err(ApiError::store)?;
        info!(user_id = %auth.user.id, "signed in");
        Ok(auth.user)
    }

    /// Ends the session. Local credentials are cleared even when the server
    /// call fails.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let session = self.client.session();
        if session.is_authenticated()
            && let Err(e) = self.client.post_empty("/auth/logout").await
        {
            warn!(error = %e, "server logout failed, clearing local session anyway");
        }
        session.logout().map_err(ApiError::store)
    }

    /// Forces a token refresh. Shares an exchange already in flight.
    pub async fn refresh(&self) -> Result<Credentials, ApiError> {
        self.client.refresh().await
    }

    pub async fn me(&self) -> Result<User, ApiError> {
        self.client.get("/auth/me").await?.data()
    }

    /// Validates stored credentials at startup.
    ///
    /// Returns `None` without a network call when nothing is stored. Only
    /// 401/403 clear the session; any other failure leaves it intact so the
    /// caller can try again later.
    pub async fn restore(&self) -> Result<Option<User>, ApiError> {
        let session = self.client.session();
        if !session.is_authenticated() {
            return Ok(None);
        }
        match self.me().await {
            Ok(user) => Ok(Some(user)),
            Err(e) if matches!(e.status, Some(401 | 403)) => {
                warn!(status = ?e.status, "stored session rejected");
                if session.is_authenticated() {
                    let _ = session.expire();
                }
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn forgot_password(&self, email: &str) -> Result<(), ApiError> {
        let body = EmailRequest {
            email: email.to_string(),
        };
        self.anonymous_post("/auth/forgot-password", &body).await
    }

    pub async fn reset_password(&self, token: &str, password: &str) -> Result<(), ApiError> {
        let body = ResetPasswordRequest {
            token: token.to_string(),
            password: password.to_string(),
        };
        self.anonymous_post("/auth/reset-password", &body).await
    }

    pub async fn verify_email(&self, token: &str) -> Result<(), ApiError> {
        let body = TokenRequest {
            token: token.to_string(),
        };
        self.anonymous_post("/auth/verify-email", &body).await
    }

    pub async fn resend_verification(&self) -> Result<(), ApiError> {
        self.client.post_empty("/auth/resend-verification").await?;
        Ok(())
    }

    pub async fn change_password(
        &self,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), ApiError> {
        let body = ChangePasswordRequest {
            current_password: current_password.to_string(),
            new_password: new_password.to_string(),
        };
        self.client.post("/auth/change-password", &body).await?;
        Ok(())
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<User, ApiError> {
        self.client.patch("/auth/profile", update).await?.data()
    }

    /// Deletes the account and clears the local session.
    pub async fn delete_account(&self) -> Result<(), ApiError> {
        self.client.delete("/auth/account").await?;
        self.client.session().logout().map_err(ApiError::store)
    }

    pub async fn enable_2fa(&self) -> Result<TwoFactorSetup, ApiError> {
        self.client.post_empty("/auth/2fa/enable").await?.data()
    }

    pub async fn verify_2fa(&self, token: &str) -> Result<(), ApiError> {
        let body = TokenRequest {
            token: token.to_string(),
        };
        self.client.post("/auth/2fa/verify", &body).await?;
        Ok(())
    }

    pub async fn disable_2fa(&self, token: &str) -> Result<(), ApiError> {
        let body = TokenRequest {
            token: token.to_string(),
        };
        self.client.post("/auth/2fa/disable", &body).await?;
        Ok(())
    }

    async fn anonymous_post<B: serde::Serialize>(&self, path: &str, body: &B) -> Result<(), ApiError> {
        self.client
            .request(Method::POST, path, Some(body), RequestOptions::default().anonymous())
            .await?;
        Ok(())
    }
}
