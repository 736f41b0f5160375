//! `/users/*` endpoints
//!
//! Thin wrappers: they neither read nor write the session. The session's own
//! operations call them and apply the results.

use std::path::Path;

use super::base::{
    ApiError, LoginRequest, LoginResponse, ProfileUpdate, RegisterRequest, UserProfile,
};
use super::client::{ApiClient, ApiRequest, FilePart};

const LOGIN_PATH: &str = "users/login/";
const REGISTER_PATH: &str = "users/register/";
const ME_PATH: &str = "users/me/";

/// Multipart field the backend reads the avatar from
const AVATAR_FIELD: &str = "avatar";

/// Image bytes for `PATCH /users/me/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvatarUpload {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl AvatarUpload {
    pub fn new(file_name: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime: mime.into(),
            bytes,
        }
    }

    /// Reads an image file, guessing the MIME type from its extension
    pub fn from_path(path: &Path) -> Result<Self, ApiError> {
        let bytes = std::fs::read(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "avatar".to_string());
        Ok(Self::new(file_name, guess_mime(path), bytes))
    }

    fn into_part(self) -> FilePart {
        FilePart {
            field: AVATAR_FIELD.to_string(),
            file_name: self.file_name,
            mime: self.mime,
            bytes: self.bytes,
        }
    }
}

fn guess_mime(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

impl ApiClient {
    /// `POST /users/login/`, sent without a token
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginResponse, ApiError> {
        let request = ApiRequest::post(LOGIN_PATH)
            .json(&LoginRequest { email, password })?
            .anonymous();
        self.send_json(&request).await
    }

    /// `POST /users/register/`, sent without a token
    pub async fn register(
        &self,
        email: &str,
        username: &str,
        password: &str,
    ) -> Result<(), ApiError> {
        let request = ApiRequest::post(REGISTER_PATH)
            .json(&RegisterRequest {
                email,
                username,
                password,
            })?
            .anonymous();
        self.send_empty(&request).await
    }

    /// `GET /users/me/`
    pub async fn me(&self) -> Result<UserProfile, ApiError> {
        self.get_json(ME_PATH).await
    }

    /// `PATCH /users/me/` with JSON fields
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile, ApiError> {
        let request = ApiRequest::patch(ME_PATH).json(update)?;
        self.send_json(&request).await
    }

    /// `PATCH /users/me/` with a multipart avatar
    pub async fn upload_avatar(&self, avatar: AvatarUpload) -> Result<UserProfile, ApiError> {
        let request = ApiRequest::patch(ME_PATH).multipart(vec![avatar.into_part()]);
        self.send_json(&request).await
    }

    /// `DELETE /users/me/`
    pub async fn delete_me(&self) -> Result<(), ApiError> {
        self.send_empty(&ApiRequest::delete(ME_PATH)).await
    }
}
