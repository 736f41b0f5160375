//! Wire types and errors shared by every endpoint wrapper

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Per-user reading statistics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct BookStats {
    #[serde(default)]
    pub read_count: u32,
    #[serde(default)]
    pub planning_count: u32,
    #[serde(default)]
    pub reading_count: u32,
    #[serde(default)]
    pub dropped_count: u32,
    #[serde(default)]
    pub total_count: u32,
    #[serde(default)]
    pub progress_marks_count: u32,
}

/// Full profile snapshot as returned by `/users/me/`
///
/// Always replaced wholesale; never merged field by field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UserProfile {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub is_premium: bool,
    #[serde(default)]
    pub premium_expiration_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub hide_ads: bool,
    #[serde(default, alias = "avatar")]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub about: Option<String>,
    #[serde(default)]
    pub stats: Option<BookStats>,
    #[serde(default)]
    pub is_staff: bool,
    #[serde(default)]
    pub is_superuser: bool,
}

impl UserProfile {
    /// Staff or superuser
    pub fn is_admin(&self) -> bool {
        self.is_staff || self.is_superuser
    }

    /// Two uppercase letters for the avatar placeholder
    ///
    /// Initials of the first two words, or the first two letters of a
    /// single-word name. Empty when there is no username.
    pub fn initials(&self) -> String {
        let mut words = self.username.split_whitespace();
        match (words.next(), words.next()) {
            (Some(first), Some(second)) => first
                .chars()
                .take(1)
                .chain(second.chars().take(1))
                .flat_map(char::to_uppercase)
                .collect(),
            (Some(only), None) => only.chars().take(2).flat_map(char::to_uppercase).collect(),
            _ => String::new(),
        }
    }
}

/// Body of `POST /users/login/`
#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

/// Body of `POST /users/register/`
#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest<'a> {
    pub email: &'a str,
    pub username: &'a str,
    pub password: &'a str,
}

/// Successful login
#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    #[serde(alias = "accessToken")]
    pub access: String,
    #[serde(default, alias = "refreshToken")]
    pub refresh: Option<String>,
    #[serde(default)]
    pub user: Option<UserProfile>,
}

/// Body of `POST /users/token/refresh/`
#[derive(Debug, Clone, Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh: &'a str,
}

/// Successful refresh. `refresh` is only present when the backend rotates
/// refresh tokens.
#[derive(Debug, Clone, Deserialize)]
pub struct RefreshResponse {
    pub access: String,
    #[serde(default)]
    pub refresh: Option<String>,
}

/// Editable profile fields for `PATCH /users/me/`
#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub about: Option<String>,
}

impl ProfileUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    pub fn with_about(mut self, about: impl Into<String>) -> Self {
        self.about = Some(about.into());
        self
    }
}

/// Errors surfaced by the HTTP layer
#[derive(Debug, Error)]
pub enum ApiError {
    /// No response was received at all
    #[error("Connectivity error: {0}")]
    Connectivity(String),

    /// The credential was rejected and could not be repaired
    #[error("Authentication failed")]
    Unauthorized,

    /// Any other non-success status
    #[error("HTTP {status}: {body}")]
    Http { status: StatusCode, body: String },

    /// The response body did not match the expected shape
    #[error("Decode error: {0}")]
    Decode(String),

    /// A local file could not be read
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// Authentication-class failure
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }

    pub fn is_connectivity(&self) -> bool {
        matches!(self, ApiError::Connectivity(_))
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ApiError::Unauthorized => Some(StatusCode::UNAUTHORIZED),
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}
