//! Authenticated HTTP client
//!
//! Every call goes through [`ApiClient::send`], which
//!
//! 1. attaches `Authorization: Bearer <token>` read from the [`Session`] at
//!    call time,
//! 2. turns transport failures into [`ApiError::Connectivity`] without any
//!    refresh,
//! 3. on a 401 runs the refresh protocol and replays the request exactly
//!    once with the new token.
//!
//! A request is an immutable [`ApiRequest`]; each attempt rebuilds the
//! transport request from it, and the attempt number is passed explicitly.

use std::sync::Arc;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{Client, Method, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::base::ApiError;
use crate::auth::{AuthSnapshot, RefreshError, Session, TokenRefresher};
use crate::config::ClientConfig;
use crate::security::{redact, Secret};

/// A file sent as one multipart field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub field: String,
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

/// Request payload, kept as plain data so it can be rebuilt for a replay
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Empty,
    Json(serde_json::Value),
    Multipart(Vec<FilePart>),
}

/// Which attempt of a request is being sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    First,
    /// The single replay after a token refresh
    Replay,
}

/// Immutable description of one API call
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: RequestBody,
    /// Send the session's bearer token (off for login/register)
    pub authenticated: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: RequestBody::Empty,
            authenticated: true,
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

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body).map_err(|e| ApiError::Decode(e.to_string()))?;
        self.body = RequestBody::Json(value);
        Ok(self)
    }

    pub fn multipart(mut self, parts: Vec<FilePart>) -> Self {
        self.body = RequestBody::Multipart(parts);
        self
    }

    /// Never attach a token, never refresh
    pub fn anonymous(mut self) -> Self {
        self.authenticated = false;
        self
    }
}

/// HTTP client bound to one [`Session`]
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
    session: Arc<Session>,
    refresher: Arc<TokenRefresher>,
}

impl ApiClient {
    /// Builds the client and its refresher from configuration
    pub fn new(config: &ClientConfig, session: Arc<Session>) -> Result<Self, ApiError> {
        let base_url = config
            .base_url()
            .map_err(|e| ApiError::Decode(format!("invalid API base URL: {}", e)))?;
        let http = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ApiError::Connectivity(e.to_string()))?;
        let refresher = TokenRefresher::new(
            http.clone(),
            &base_url,
            Duration::from_secs(config.refresh_timeout_secs),
        )
        .map_err(|e| ApiError::Decode(e.to_string()))?;

        Ok(Self::with_parts(http, base_url, session, Arc::new(refresher)))
    }

    /// Assembles a client from existing parts
    pub fn with_parts(
        http: Client,
        base_url: Url,
        session: Arc<Session>,
        refresher: Arc<TokenRefresher>,
    ) -> Self {
        Self {
            http,
            base_url,
            session,
            refresher,
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn refresher(&self) -> &Arc<TokenRefresher> {
        &self.refresher
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ========================================================================
    // Typed helpers
    // ========================================================================

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        decode(self.send(&ApiRequest::get(path)).await?).await
    }

    pub async fn send_json<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, ApiError> {
        decode(self.send(request).await?).await
    }

    /// Sends a request whose successful response body is ignored
    pub async fn send_empty(&self, request: &ApiRequest) -> Result<(), ApiError> {
        self.send(request).await.map(|_| ())
    }

    // ========================================================================
    // Middleware
    // ========================================================================

    /// Sends a request, repairing an expired token once if needed
    ///
    /// Returns the response only for 2xx statuses.
    pub async fn send(&self, request: &ApiRequest) -> Result<Response, ApiError> {
        let auth = if request.authenticated {
            self.session.snapshot()
        } else {
            AuthSnapshot {
                token: None,
                generation: 0,
                epoch: 0,
            }
        };

        let response = self
            .dispatch(request, auth.token.as_ref(), Attempt::First)
            .await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return check_status(response).await;
        }

        // sent without a credential: nothing to repair
        if auth.token.is_none() {
            return Err(ApiError::Unauthorized);
        }

        let token = self.recover(request, &auth).await?;
        let replay = self.dispatch(request, Some(&token), Attempt::Replay).await?;
        if replay.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!(
                method = %request.method,
                path = %request.path,
                "Request rejected again after refresh"
            );
            self.session
                .expire_if_epoch(auth.epoch, "credential rejected after refresh");
            return Err(ApiError::Unauthorized);
        }
        check_status(replay).await
    }

    /// Produces the token for the single replay, or the terminal error
    async fn recover(&self, request: &ApiRequest, auth: &AuthSnapshot) -> Result<Secret, ApiError> {
        let current = self.session.snapshot();

        let Some(current_token) = current.token else {
            // the session was cleared (e.g. a refresh already failed for
            // this credential); do not start another refresh
            tracing::debug!(path = %request.path, "401 after session was cleared");
            return Err(ApiError::Unauthorized);
        };

        if current.epoch != auth.epoch {
            tracing::debug!(path = %request.path, "401 from a previous session");
            return Err(ApiError::Unauthorized);
        }

        if current.generation != auth.generation {
            tracing::info!(path = %request.path, "Token already refreshed, replaying");
            return Ok(current_token);
        }

        tracing::info!(
            method = %request.method,
            path = %request.path,
            token = %redact::token(current_token.expose()),
            "Access token rejected, refreshing"
        );
        match self.refresher.refresh(&self.session).await {
            Ok(token) => Ok(token),
            Err(RefreshError::Superseded) => Err(ApiError::Unauthorized),
            Err(e) => {
                // the refresher expires the session for terminal failures;
                // the leader may have been dropped, so make sure here too
                if e.is_terminal() {
                    self.session.expire_if_epoch(auth.epoch, &e.to_string());
                }
                Err(ApiError::Unauthorized)
            }
        }
    }

    /// One attempt on the wire
    async fn dispatch(
        &self,
        request: &ApiRequest,
        token: Option<&Secret>,
        attempt: Attempt,
    ) -> Result<Response, ApiError> {
        let url = self.url(&request.path)?;
        tracing::debug!(
            method = %request.method,
            url = %redact::url(url.as_str()),
            ?attempt,
            authenticated = token.is_some(),
            "Sending request"
        );

        let mut builder = self.http.request(request.method.clone(), url);
        if let Some(token) = token {
            builder = builder.bearer_auth(token.expose());
        }
        builder = match &request.body {
            RequestBody::Empty => builder,
            RequestBody::Json(value) => builder.json(value),
            RequestBody::Multipart(parts) => builder.multipart(build_form(parts)?),
        };

        let response = builder.send().await.map_err(|e| {
            tracing::warn!(path = %request.path, "Network error: {}", e);
            ApiError::Connectivity(e.to_string())
        })?;

        tracing::debug!(status = %response.status(), ?attempt, "Response received");
        Ok(response)
    }

    fn url(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| ApiError::Decode(format!("invalid path {}: {}", path, e)))
    }
}

fn build_form(parts: &[FilePart]) -> Result<Form, ApiError> {
    parts.iter().try_fold(Form::new(), |form, part| {
        let file = Part::bytes(part.bytes.clone())
            .file_name(part.file_name.clone())
            .mime_str(&part.mime)
            .map_err(|e| ApiError::Decode(format!("invalid mime type {}: {}", part.mime, e)))?;
        Ok(form.part(part.field.clone(), file))
    })
}

async fn check_status(response: Response) -> Result<Response, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::Unauthorized);
    }
    let body = response.text().await.unwrap_or_default();
    tracing::warn!(%status, "Request failed");
    Err(ApiError::Http { status, body })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ApiError::Connectivity(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::Decode(e.to_string()))
}
