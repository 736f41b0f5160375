//! Authentication module - Session state, token refresh and route gating
//!
//! - [`CredentialStore`] backends (file, OS keyring, memory)
//! - [`Session`]: the in-memory credential and profile, the only writer
//! - [`TokenRefresher`]: single-flight refresh of the access token
//! - [`NavigationGuard`]: admission decisions for protected routes

mod guard;
mod refresh;
mod session;
mod store;

pub use guard::{
    NavigationGuard, Route, RouteGuardDecision, SessionProbe, LOGIN_ROUTE, REGISTER_ROUTE, ROUTES,
};
pub use refresh::{RefreshError, RefreshState, TokenRefresher, REFRESH_PATH};
pub use session::{AuthSnapshot, Credential, ProfileRequired, Session, SessionEvent};
#[cfg(feature = "keyring")]
pub use store::KeyringStore;
pub use store::{
    known_keys, CredentialStore, FileStore, MemoryStore, StoreError, AUTH_TOKEN_KEY,
    REFRESH_TOKEN_KEY, USER_KEY,
};
