//! Bookworm - Session and authentication core of the library client
//!
//! Everything the reader application needs to talk to the Bookworm backend
//! as a signed-in user.
//!
//! ## Features
//!
//! - Session state mirrored to durable storage (file, OS keyring, memory)
//! - Bearer token injection on every request
//! - Transparent repair of expired access tokens: one refresh for any
//!   number of concurrent 401s, one replay per request
//! - Navigation guard for protected routes with post-login redirect
//!
//! ## Architecture
//!
//! - **Auth**: credential store, session state, refresh protocol, guard
//! - **Api**: authenticated HTTP client and `/users/*` endpoints
//! - **Security**: token zeroization and log redaction
//! - **Config**: persistent client settings

pub mod api;
pub mod auth;
pub mod commands;
pub mod config;
pub mod security;

use std::sync::Arc;

use thiserror::Error;

use api::{ApiClient, ApiError};
use auth::{CredentialStore, NavigationGuard, RouteGuardDecision, Session};
use config::{ClientConfig, ConfigError};

/// Errors that can occur while wiring up the client
#[derive(Debug, Error)]
pub enum InitError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Api(#[from] ApiError),
}

/// Application context: one session shared by the HTTP client and the guard
pub struct Bookworm {
    config: ClientConfig,
    session: Arc<Session>,
    api: ApiClient,
    guard: NavigationGuard<ApiClient>,
}

impl Bookworm {
    /// Opens the configured credential store and restores the session
    pub fn new(config: ClientConfig) -> Result<Self, InitError> {
        let store = config.open_store()?;
        Self::with_store(config, store)
    }

    /// Uses an explicit credential store
    pub fn with_store(
        config: ClientConfig,
        store: Arc<dyn CredentialStore>,
    ) -> Result<Self, InitError> {
        let session = Arc::new(Session::restore(store, config.persist_profile));
        let api = ApiClient::new(&config, session.clone())?;
        let guard = NavigationGuard::new(api.clone());

        Ok(Self {
            config,
            session,
            api,
            guard,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn guard(&self) -> &NavigationGuard<ApiClient> {
        &self.guard
    }

    /// Loads the profile if a restored token has none yet
    pub async fn bootstrap(&self) -> Result<(), ApiError> {
        if self.session.needs_profile() {
            tracing::info!("Restored token without profile, fetching");
            self.session.fetch_user_data(&self.api).await?;
        }
        Ok(())
    }

    /// Signs in and makes sure a profile is loaded
    pub async fn login(&self, email: &str, password: &str) -> Result<(), ApiError> {
        if self.session.login(&self.api, email, password).await?.is_some() {
            self.session.fetch_user_data(&self.api).await?;
        }
        Ok(())
    }

    pub fn logout(&self) {
        self.session.clear_auth_data();
    }

    /// Runs the guard and renders where navigation ends up
    pub async fn navigate(&self, full_path: &str) -> (RouteGuardDecision, String) {
        let decision = self.guard.check(full_path).await;
        let location = decision
            .location(&self.config.login_path, &self.config.home_path)
            .unwrap_or_else(|| full_path.to_string());
        (decision, location)
    }
}

/// Installs the global `tracing` subscriber
///
/// `RUST_LOG` overrides the default filter.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("bookworm_lib=debug,bookworm=debug,info"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
