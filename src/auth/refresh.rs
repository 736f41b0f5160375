//! Token refresh protocol
//!
//! Coalesces every concurrent demand for a new access token into one call to
//! `POST /users/token/refresh/`. The first caller to find the protocol idle
//! becomes the leader and performs the exchange; everybody arriving while it
//! runs parks a oneshot sender in the waiter queue and receives the same
//! outcome.
//!
//! ```text
//!   Idle ──first 401──▶ Refreshing { waiters } ──success/failure──▶ Idle
//! ```

use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use reqwest::{Client, StatusCode, Url};
use thiserror::Error;
use tokio::sync::oneshot;

use super::session::Session;
use crate::api::{RefreshRequest, RefreshResponse};
use crate::security::{redact, Secret};

/// Path of the refresh endpoint, relative to the API base URL
pub const REFRESH_PATH: &str = "users/token/refresh/";

/// Why a refresh cycle did not produce a token
///
/// Cloned to every waiter of the cycle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshError {
    /// No refresh token is stored
    #[error("No refresh token available")]
    MissingRefreshToken,

    /// The refresh endpoint answered with a non-success status
    #[error("Refresh rejected with HTTP {0}")]
    Rejected(StatusCode),

    /// The refresh endpoint could not be reached
    #[error("Refresh network error: {0}")]
    Network(String),

    /// The refresh call did not finish in time
    #[error("Refresh timed out after {0:?}")]
    Timeout(Duration),

    /// The refresh endpoint answered with an unexpected body
    #[error("Malformed refresh response: {0}")]
    Malformed(String),

    /// The session changed identity while the refresh was in flight
    #[error("Session changed during refresh")]
    Superseded,

    /// The leading caller was dropped before finishing
    #[error("Refresh abandoned")]
    Abandoned,
}

impl RefreshError {
    /// Whether the failure means the stored credential is unusable
    ///
    /// `Superseded` belongs to an older session and `Abandoned` says nothing
    /// about the credential, so neither clears the session.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RefreshError::Superseded | RefreshError::Abandoned)
    }
}

type Outcome = Result<Secret, RefreshError>;

/// Process-wide refresh state
#[derive(Debug, Default)]
pub enum RefreshState {
    #[default]
    Idle,
    Refreshing {
        waiters: Vec<oneshot::Sender<Outcome>>,
    },
}

impl RefreshState {
    pub fn is_refreshing(&self) -> bool {
        matches!(self, RefreshState::Refreshing { .. })
    }
}

/// Single-flight refresher
///
/// Uses its own bare HTTP client: the refresh call must never pass through
/// the retrying middleware.
pub struct TokenRefresher {
    http: Client,
    endpoint: Url,
    timeout: Duration,
    state: Mutex<RefreshState>,
    exchanges: AtomicU64,
}

impl TokenRefresher {
    /// Creates a refresher for `<base_url>/users/token/refresh/`
    pub fn new(http: Client, base_url: &Url, timeout: Duration) -> Result<Self, url::ParseError> {
        Ok(Self {
            http,
            endpoint: base_url.join(REFRESH_PATH)?,
            timeout,
            state: Mutex::new(RefreshState::Idle),
            exchanges: AtomicU64::new(0),
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of refresh exchanges actually sent
    pub fn refresh_count(&self) -> u64 {
        self.exchanges.load(Ordering::SeqCst)
    }

    pub fn is_refreshing(&self) -> bool {
        self.lock().is_refreshing()
    }

    /// Obtains a new access token, joining an in-flight refresh if there is one
    ///
    /// On success the token is already stored in the session when this
    /// returns. On a terminal failure the session has been expired.
    pub async fn refresh(&self, session: &Session) -> Outcome {
        let waiting = {
            let mut state = self.lock();
            match &mut *state {
                RefreshState::Refreshing { waiters } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    tracing::debug!(queued = waiters.len(), "Joining in-flight refresh");
                    Some(rx)
                }
                RefreshState::Idle => {
                    *state = RefreshState::Refreshing {
                        waiters: Vec::new(),
                    };
                    None
                }
            }
        };

        if let Some(rx) = waiting {
            return rx.await.unwrap_or(Err(RefreshError::Abandoned));
        }

        let in_flight = InFlight {
            refresher: self,
            released: false,
        };

        let epoch = session.snapshot().epoch;
        let outcome = match tokio::time::timeout(self.timeout, self.exchange(session)).await {
            Ok(result) => result,
            Err(_) => Err(RefreshError::Timeout(self.timeout)),
        };

        let outcome = match outcome {
            Ok((access, rotated)) => {
                if session.apply_refresh(epoch, access.clone(), rotated) {
                    Ok(access)
                } else {
                    Err(RefreshError::Superseded)
                }
            }
            Err(e) => {
                tracing::warn!("Token refresh failed: {}", e);
                if e.is_terminal() {
                    session.expire_if_epoch(epoch, &e.to_string());
                }
                Err(e)
            }
        };

        in_flight.release(outcome.clone());
        outcome
    }

    /// Performs the network exchange
    async fn exchange(&self, session: &Session) -> Result<(Secret, Option<Secret>), RefreshError> {
        let refresh_token = session
            .refresh_token()
            .ok_or(RefreshError::MissingRefreshToken)?;

        self.exchanges.fetch_add(1, Ordering::SeqCst);
        tracing::info!(
            endpoint = %self.endpoint,
            refresh = %redact::token(refresh_token.expose()),
            "Refreshing access token"
        );

        let response = self
            .http
            .post(self.endpoint.clone())
            .json(&RefreshRequest {
                refresh: refresh_token.expose(),
            })
            .send()
            .await
            .map_err(|e| RefreshError::Network(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RefreshError::Rejected(status));
        }

        let body: RefreshResponse = response
            .json()
            .await
            .map_err(|e| RefreshError::Malformed(e.to_string()))?;
        if body.access.is_empty() {
            return Err(RefreshError::Malformed("empty access token".into()));
        }

        Ok((Secret::new(body.access), body.refresh.map(Secret::new)))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, outcome: Outcome) {
        let previous = mem::take(&mut *self.lock());
        if let RefreshState::Refreshing { waiters } = previous {
            tracing::debug!(waiters = waiters.len(), ok = outcome.is_ok(), "Refresh cycle finished");
            for waiter in waiters {
                let _ = waiter.send(outcome.clone());
            }
        }
    }
}

/// Returns the protocol to `Idle` even if the leader's future is dropped
struct InFlight<'a> {
    refresher: &'a TokenRefresher,
    released: bool,
}

impl InFlight<'_> {
    fn release(mut self, outcome: Outcome) {
        self.released = true;
        self.refresher.finish(outcome);
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.refresher.finish(Err(RefreshError::Abandoned));
        }
    }
}
