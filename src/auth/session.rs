//! Session state - the in-memory mirror of the stored credential
//!
//! [`Session`] is the only writer of the credential pair. Every mutation
//! updates memory and the [`CredentialStore`] under one lock so the two never
//! disagree for longer than a single call.
//!
//! Two counters track how the credential evolves:
//!
//! - `generation` changes whenever the access token changes (login, refresh,
//!   clear). The HTTP layer uses it to notice that somebody else already
//!   repaired the token it was rejected with.
//! - `epoch` changes only when the identity changes (login, clear). A refresh
//!   or profile fetch that started in an older epoch is discarded instead of
//!   being applied to a different session.

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;

use super::store::{
    CredentialStore, MemoryStore, AUTH_TOKEN_KEY, REFRESH_TOKEN_KEY, USER_KEY,
};
use crate::api::{ApiClient, ApiError, AvatarUpload, ProfileUpdate, UserProfile};
use crate::security::{redact, Secret};

/// Capacity of the session event channel
const EVENT_CAPACITY: usize = 16;

/// The access/refresh token pair
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub access_token: Option<Secret>,
    pub refresh_token: Option<Secret>,
}

/// Returned by [`Session::set_auth_data`] when a token arrived and no profile
/// is loaded yet. The caller is expected to call
/// [`Session::fetch_user_data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "the profile has to be fetched explicitly"]
pub struct ProfileRequired;

/// Notifications for code that reacts to session changes (views, the CLI)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A credential was set
    SignedIn,
    /// The access token was replaced by the refresh path
    Refreshed,
    /// The credential became unusable; the user has to log in again
    Expired { reason: String },
    /// The credential was cleared on purpose
    SignedOut,
}

/// Token and generation observed at one instant
#[derive(Debug, Clone)]
pub struct AuthSnapshot {
    pub token: Option<Secret>,
    pub generation: u64,
    pub epoch: u64,
}

#[derive(Debug, Default)]
struct SessionState {
    credential: Credential,
    profile: Option<UserProfile>,
    generation: u64,
    epoch: u64,
}

/// Explicitly constructed session context
///
/// Share it behind an `Arc` with the [`ApiClient`] and the navigation guard.
/// Independent instances never see each other's state.
///
/// # Example
///
/// ```
/// use bookworm_lib::auth::Session;
/// use bookworm_lib::api::UserProfile;
///
/// let session = Session::in_memory();
/// assert!(!session.is_logged_in());
///
/// let user = UserProfile { username: "Ann Li".into(), ..Default::default() };
/// let _ = session.set_auth_data("t1", Some(user));
/// assert!(session.is_logged_in());
/// assert_eq!(session.user_initials(), "AL");
/// ```
pub struct Session {
    state: RwLock<SessionState>,
    store: Arc<dyn CredentialStore>,
    persist_profile: bool,
    events: broadcast::Sender<SessionEvent>,
}

impl Session {
    /// Loads the stored credential (and profile snapshot, if enabled)
    pub fn restore(store: Arc<dyn CredentialStore>, persist_profile: bool) -> Self {
        let access_token = read_key(store.as_ref(), AUTH_TOKEN_KEY).map(Secret::from);
        let refresh_token = read_key(store.as_ref(), REFRESH_TOKEN_KEY).map(Secret::from);

        // a snapshot without a token belongs to no one
        let profile = if persist_profile && access_token.is_some() {
            read_key(store.as_ref(), USER_KEY).and_then(|raw| {
                serde_json::from_str::<UserProfile>(&raw)
                    .map_err(|e| tracing::warn!("Discarding unreadable user snapshot: {}", e))
                    .ok()
            })
        } else {
            None
        };

        tracing::info!(
            backend = store.name(),
            logged_in = access_token.is_some(),
            has_profile = profile.is_some(),
            "Session restored"
        );

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: RwLock::new(SessionState {
                credential: Credential {
                    access_token,
                    refresh_token,
                },
                profile,
                generation: 0,
                epoch: 0,
            }),
            store,
            persist_profile,
            events,
        }
    }

    /// Empty session over a [`MemoryStore`]
    pub fn in_memory() -> Self {
        Self::restore(Arc::new(MemoryStore::new()), true)
    }

    pub fn store(&self) -> &Arc<dyn CredentialStore> {
        &self.store
    }

    /// Receives every [`SessionEvent`] emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    // ========================================================================
    // Derived values, recomputed on every read
    // ========================================================================

    pub fn is_logged_in(&self) -> bool {
        self.read().credential.access_token.is_some()
    }

    pub fn is_admin(&self) -> bool {
        self.read().profile.as_ref().is_some_and(UserProfile::is_admin)
    }

    pub fn user_initials(&self) -> String {
        self.read()
            .profile
            .as_ref()
            .map(UserProfile::initials)
            .unwrap_or_default()
    }

    pub fn profile(&self) -> Option<UserProfile> {
        self.read().profile.clone()
    }

    pub fn access_token(&self) -> Option<Secret> {
        self.read().credential.access_token.clone()
    }

    pub fn refresh_token(&self) -> Option<Secret> {
        self.read().credential.refresh_token.clone()
    }

    pub fn credential(&self) -> Credential {
        self.read().credential.clone()
    }

    /// Token present but no profile loaded (e.g. right after a restart with
    /// profile persistence disabled)
    pub fn needs_profile(&self) -> bool {
        let state = self.read();
        state.credential.access_token.is_some() && state.profile.is_none()
    }

    /// Current token together with its generation
    pub fn snapshot(&self) -> AuthSnapshot {
        let state = self.read();
        AuthSnapshot {
            token: state.credential.access_token.clone(),
            generation: state.generation,
            epoch: state.epoch,
        }
    }

    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Stores a new access token and user snapshot
    ///
    /// The refresh token is left as it is. Returns [`ProfileRequired`] only on
    /// the edge from "no token" to "token present" while no profile is loaded.
    pub fn set_auth_data(
        &self,
        token: impl Into<Secret>,
        user: Option<UserProfile>,
    ) -> Option<ProfileRequired> {
        self.install(token.into(), None, user)
    }

    /// Replaces the whole credential pair for a new sign-in
    ///
    /// A refresh token left over from the previous identity is always
    /// dropped, also when the new credential arrives without one.
    pub fn sign_in(
        &self,
        access: impl Into<Secret>,
        refresh: Option<Secret>,
        user: Option<UserProfile>,
    ) -> Option<ProfileRequired> {
        self.install(access.into(), Some(refresh), user)
    }

    /// `refresh` is `None` to keep the current refresh token
    fn install(
        &self,
        token: Secret,
        refresh: Option<Option<Secret>>,
        user: Option<UserProfile>,
    ) -> Option<ProfileRequired> {
        let mut state = self.write();
        let was_absent = state.credential.access_token.is_none();

        self.persist(AUTH_TOKEN_KEY, Some(token.expose()));
        self.persist_profile_snapshot(user.as_ref());
        if let Some(refresh) = refresh {
            self.persist(REFRESH_TOKEN_KEY, refresh.as_ref().map(Secret::expose));
            state.credential.refresh_token = refresh;
        }

        tracing::info!(token = %redact::token(token.expose()), "Auth data set");
        state.credential.access_token = Some(token);
        state.profile = user;
        state.generation += 1;
        state.epoch += 1;

        let edge = was_absent && state.profile.is_none();
        drop(state);

        let _ = self.events.send(SessionEvent::SignedIn);
        edge.then_some(ProfileRequired)
    }

    /// Stores the refresh token delivered alongside a login
    pub fn set_refresh_token(&self, token: impl Into<Secret>) {
        let token = token.into();
        let mut state = self.write();
        self.persist(REFRESH_TOKEN_KEY, Some(token.expose()));
        state.credential.refresh_token = Some(token);
    }

    /// Applies the outcome of a successful refresh exchange
    ///
    /// Ignored (returns `false`) when the session changed identity since
    /// `epoch` was observed.
    pub(crate) fn apply_refresh(
        &self,
        epoch: u64,
        access: Secret,
        refresh: Option<Secret>,
    ) -> bool {
        let mut state = self.write();
        if state.epoch != epoch || state.credential.access_token.is_none() {
            tracing::info!("Dropping refreshed token for a superseded session");
            return false;
        }

        self.persist(AUTH_TOKEN_KEY, Some(access.expose()));
        if let Some(refresh) = &refresh {
            self.persist(REFRESH_TOKEN_KEY, Some(refresh.expose()));
        }

        tracing::info!(token = %redact::token(access.expose()), "Access token refreshed");
        state.credential.access_token = Some(access);
        if refresh.is_some() {
            state.credential.refresh_token = refresh;
        }
        state.generation += 1;
        drop(state);

        let _ = self.events.send(SessionEvent::Refreshed);
        true
    }

    /// Wipes token, refresh token and profile from memory and storage
    ///
    /// Idempotent.
    pub fn clear_auth_data(&self) {
        let mut state = self.write();
        if self.clear_locked(&mut state) {
            drop(state);
            let _ = self.events.send(SessionEvent::SignedOut);
        }
    }

    /// Clears the session because the credential can no longer be used
    pub fn expire(&self, reason: &str) {
        let mut state = self.write();
        if self.clear_locked(&mut state) {
            drop(state);
            tracing::warn!(reason, "Session expired");
            let _ = self.events.send(SessionEvent::Expired {
                reason: reason.to_string(),
            });
        }
    }

    /// Expires the session only if it is still the one observed at `epoch`
    pub(crate) fn expire_if_epoch(&self, epoch: u64, reason: &str) -> bool {
        let mut state = self.write();
        if state.epoch != epoch {
            return false;
        }
        let cleared = self.clear_locked(&mut state);
        drop(state);
        if cleared {
            tracing::warn!(reason, "Session expired");
            let _ = self.events.send(SessionEvent::Expired {
                reason: reason.to_string(),
            });
        }
        cleared
    }

    fn clear_locked(&self, state: &mut SessionState) -> bool {
        if let Err(e) = self.store.clear_all() {
            tracing::warn!(backend = self.store.name(), "Failed to clear stored credentials: {}", e);
        }

        let had_anything = state.credential.access_token.is_some()
            || state.credential.refresh_token.is_some()
            || state.profile.is_some();

        state.credential = Credential::default();
        state.profile = None;
        if had_anything {
            state.generation += 1;
            state.epoch += 1;
            tracing::info!("Auth data cleared");
        }
        had_anything
    }

    fn replace_profile(&self, epoch: u64, profile: UserProfile) -> bool {
        let mut state = self.write();
        if state.epoch != epoch || state.credential.access_token.is_none() {
            tracing::debug!("Discarding profile fetched for a superseded session");
            return false;
        }
        self.persist_profile_snapshot(Some(&profile));
        state.profile = Some(profile);
        true
    }

    fn persist_profile_snapshot(&self, profile: Option<&UserProfile>) {
        if !self.persist_profile {
            return;
        }
        match profile.map(serde_json::to_string).transpose() {
            Ok(json) => self.persist(USER_KEY, json.as_deref()),
            Err(e) => tracing::warn!("Failed to serialize user snapshot: {}", e),
        }
    }

    fn persist(&self, key: &str, value: Option<&str>) {
        let result = match value {
            Some(value) => self.store.set(key, value),
            None => self.store.delete(key).map(|_| ()),
        };
        if let Err(e) = result {
            tracing::warn!(backend = self.store.name(), key, "Credential store write failed: {}", e);
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ========================================================================
    // Network operations
    // ========================================================================

    /// Reloads the profile from `GET /users/me/`
    ///
    /// Without a token no request is made and the profile becomes absent.
    /// An authentication failure (after the client's own refresh attempt)
    /// clears the session; any other failure leaves it untouched.
    pub async fn fetch_user_data(&self, api: &ApiClient) -> Result<Option<UserProfile>, ApiError> {
        let epoch = {
            let mut state = self.write();
            if state.credential.access_token.is_none() {
                state.profile = None;
                return Ok(None);
            }
            state.epoch
        };

        match api.me().await {
            Ok(profile) => {
                self.replace_profile(epoch, profile.clone());
                Ok(Some(profile))
            }
            Err(e) if e.is_auth() => {
                tracing::warn!("Profile fetch rejected, clearing session");
                self.expire_if_epoch(epoch, "profile fetch rejected");
                Err(e)
            }
            Err(e) => {
                tracing::warn!("Profile fetch failed: {}", e);
                Err(e)
            }
        }
    }

    /// Uploads a new avatar and replaces the profile with the response
    pub async fn update_avatar(
        &self,
        api: &ApiClient,
        avatar: AvatarUpload,
    ) -> Result<UserProfile, ApiError> {
        let epoch = self.snapshot().epoch;
        let profile = api.upload_avatar(avatar).await?;
        self.replace_profile(epoch, profile.clone());
        Ok(profile)
    }

    /// Saves editable profile fields and replaces the profile with the response
    pub async fn update_profile(
        &self,
        api: &ApiClient,
        update: &ProfileUpdate,
    ) -> Result<UserProfile, ApiError> {
        let epoch = self.snapshot().epoch;
        let profile = api.update_profile(update).await?;
        self.replace_profile(epoch, profile.clone());
        Ok(profile)
    }

    /// Exchanges e-mail and password for a credential
    pub async fn login(
        &self,
        api: &ApiClient,
        email: &str,
        password: &str,
    ) -> Result<Option<ProfileRequired>, ApiError> {
        tracing::info!(email = %redact::email(email), "Logging in");
        let response = api.login(email, password).await?;

        Ok(self.sign_in(
            response.access,
            response.refresh.map(Secret::new),
            response.user,
        ))
    }

    /// Deletes the account and clears the session on success
    pub async fn delete_account(&self, api: &ApiClient) -> Result<(), ApiError> {
        api.delete_me().await?;
        self.clear_auth_data();
        Ok(())
    }
}

fn read_key(store: &dyn CredentialStore, key: &str) -> Option<String> {
    match store.get(key) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(backend = store.name(), key, "Credential store read failed: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(username: &str) -> UserProfile {
        UserProfile {
            username: username.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_new_session_is_logged_out() {
        let session = Session::in_memory();
        assert!(!session.is_logged_in());
        assert!(!session.is_admin());
        assert_eq!(session.user_initials(), "");
        assert!(session.profile().is_none());
        assert!(!session.needs_profile());
    }

    #[test]
    fn test_set_auth_data_writes_through() {
        let store = Arc::new(MemoryStore::new());
        let session = Session::restore(store.clone(), true);

        let edge = session.set_auth_data("t1", Some(user("Ann Li")));
        assert_eq!(edge, None);
        assert!(session.is_logged_in());
        assert_eq!(session.user_initials(), "AL");

        assert_eq!(store.get(AUTH_TOKEN_KEY).unwrap(), Some("t1".to_string()));
        let snapshot: UserProfile =
            serde_json::from_str(&store.get(USER_KEY).unwrap().unwrap()).unwrap();
        assert_eq!(snapshot.username, "Ann Li");
    }

    #[test]
    fn test_profile_required_only_on_absent_to_present_edge() {
        let session = Session::in_memory();

        assert_eq!(session.set_auth_data("t1", None), Some(ProfileRequired));
        // token already present: no second fetch request
        assert_eq!(session.set_auth_data("t2", None), None);

        session.clear_auth_data();
        assert_eq!(session.set_auth_data("t3", None), Some(ProfileRequired));

        session.clear_auth_data();
        assert_eq!(session.set_auth_data("t4", Some(user("x"))), None);
    }

    #[test]
    fn test_sign_in_replaces_refresh_token() {
        let store = Arc::new(MemoryStore::new());
        let session = Session::restore(store.clone(), true);
        let _ = session.sign_in("tA", Some(Secret::new("rA")), Some(user("Ann Li")));
        let first = session.snapshot().epoch;

        let _ = session.sign_in("tB", None, Some(user("Bo Ng")));

        assert_eq!(session.access_token().unwrap(), "tB");
        assert!(session.refresh_token().is_none());
        assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap(), None);
        assert!(session.snapshot().epoch > first);

        let _ = session.sign_in("tC", Some(Secret::new("rC")), None);
        assert_eq!(session.refresh_token().unwrap(), "rC");
        assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap(), Some("rC".to_string()));
    }

    #[test]
    fn test_set_auth_data_keeps_refresh_token() {
        let session = Session::in_memory();
        session.set_refresh_token("r1");
        let _ = session.set_auth_data("t1", None);
        assert_eq!(session.refresh_token().unwrap(), "r1");
    }

    #[test]
    fn test_clear_is_idempotent_and_wipes_store() {
        let store = Arc::new(MemoryStore::new());
        let session = Session::restore(store.clone(), true);
        session.set_refresh_token("r1");
        let _ = session.set_auth_data("t1", Some(user("reader")));

        session.clear_auth_data();
        session.clear_auth_data();

        assert!(!session.is_logged_in());
        assert!(session.profile().is_none());
        assert!(session.refresh_token().is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_restore_from_store() {
        let store = Arc::new(MemoryStore::new());
        store.set(AUTH_TOKEN_KEY, "t1").unwrap();
        store.set(REFRESH_TOKEN_KEY, "r1").unwrap();
        store
            .set(USER_KEY, &serde_json::to_string(&user("Ann Li")).unwrap())
            .unwrap();

        let session = Session::restore(store.clone(), true);
        assert!(session.is_logged_in());
        assert_eq!(session.refresh_token().unwrap(), "r1");
        assert_eq!(session.user_initials(), "AL");

        let without_snapshot = Session::restore(store, false);
        assert!(without_snapshot.is_logged_in());
        assert!(without_snapshot.needs_profile());
    }

    #[test]
    fn test_restore_ignores_orphan_profile() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(USER_KEY, &serde_json::to_string(&user("Ghost")).unwrap())
            .unwrap();

        let session = Session::restore(store, true);
        assert!(!session.is_logged_in());
        assert!(session.profile().is_none());
    }

    #[test]
    fn test_profile_not_persisted_when_disabled() {
        let store = Arc::new(MemoryStore::new());
        let session = Session::restore(store.clone(), false);
        let _ = session.set_auth_data("t1", Some(user("reader")));

        assert_eq!(store.get(USER_KEY).unwrap(), None);
        assert_eq!(session.user_initials(), "RE");
    }

    #[test]
    fn test_wholesale_replace() {
        let session = Session::in_memory();
        let admin = UserProfile {
            username: "Ann Li".into(),
            is_staff: true,
            ..Default::default()
        };
        let _ = session.set_auth_data("t1", Some(admin));
        let epoch = session.snapshot().epoch;
        assert!(session.is_admin());

        assert!(session.replace_profile(epoch, user("bob")));
        assert!(!session.is_admin());
        assert_eq!(session.user_initials(), "BO");
    }

    #[test]
    fn test_apply_refresh_respects_epoch() {
        let session = Session::in_memory();
        let _ = session.set_auth_data("t1", Some(user("reader")));
        let before = session.snapshot();

        assert!(session.apply_refresh(before.epoch, Secret::new("t2"), None));
        let after = session.snapshot();
        assert_eq!(after.token.unwrap(), "t2");
        assert!(after.generation > before.generation);
        assert_eq!(after.epoch, before.epoch);
        // profile survives a refresh
        assert_eq!(session.user_initials(), "RE");

        session.clear_auth_data();
        assert!(!session.apply_refresh(before.epoch, Secret::new("t3"), None));
        assert!(!session.is_logged_in());
    }

    #[test]
    fn test_apply_refresh_rotates_refresh_token() {
        let store = Arc::new(MemoryStore::new());
        let session = Session::restore(store.clone(), true);
        session.set_refresh_token("r1");
        let _ = session.set_auth_data("t1", None);
        let epoch = session.snapshot().epoch;

        assert!(session.apply_refresh(epoch, Secret::new("t2"), Some(Secret::new("r2"))));
        assert_eq!(session.refresh_token().unwrap(), "r2");
        assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap(), Some("r2".to_string()));
        assert_eq!(store.get(AUTH_TOKEN_KEY).unwrap(), Some("t2".to_string()));
    }

    #[test]
    fn test_events() {
        let session = Session::in_memory();
        let mut events = session.subscribe();

        let _ = session.set_auth_data("t1", None);
        session.expire("refresh rejected");
        // already cleared: nothing more to report
        session.clear_auth_data();

        assert_eq!(events.try_recv().unwrap(), SessionEvent::SignedIn);
        assert_eq!(
            events.try_recv().unwrap(),
            SessionEvent::Expired {
                reason: "refresh rejected".into()
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_expire_if_epoch_skips_newer_session() {
        let session = Session::in_memory();
        let _ = session.set_auth_data("t1", None);
        let old = session.snapshot().epoch;

        session.clear_auth_data();
        let _ = session.set_auth_data("t2", None);

        assert!(!session.expire_if_epoch(old, "stale"));
        assert!(session.is_logged_in());
    }

    #[test]
    fn test_sessions_are_isolated() {
        let a = Session::in_memory();
        let b = Session::in_memory();
        let _ = a.set_auth_data("t1", None);
        assert!(a.is_logged_in());
        assert!(!b.is_logged_in());
    }
}
