//! API module - Typed access to the Bookworm REST backend
//!
//! - [`ApiClient`]: bearer injection, 401 recovery and single replay
//! - `/users/*` endpoint wrappers
//! - Wire types and [`ApiError`]

mod base;
mod client;
mod user;

pub use base::*;
pub use client::{ApiClient, ApiRequest, Attempt, FilePart, RequestBody};
pub use user::AvatarUpload;
