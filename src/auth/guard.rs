//! Navigation guard
//!
//! Decides, before every route transition, whether the destination may be
//! shown. It only reads the session and asks it to revalidate; repairing an
//! expired token is the HTTP client's job, so by the time revalidation fails
//! the client has already had its chance to refresh.

use async_trait::async_trait;

use crate::api::{ApiClient, ApiError};

/// What the guard needs from the session
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionProbe: Send + Sync {
    /// Whether an access token is present right now
    fn has_token(&self) -> bool;

    /// Confirms the credential with the backend (a profile fetch)
    async fn revalidate(&self) -> Result<(), ApiError>;

    /// Drops the credential
    fn invalidate(&self);
}

#[async_trait]
impl SessionProbe for ApiClient {
    fn has_token(&self) -> bool {
        self.session().is_logged_in()
    }

    async fn revalidate(&self) -> Result<(), ApiError> {
        match self.session().fetch_user_data(self).await? {
            Some(_) => Ok(()),
            // cleared while the request was in flight
            None => Err(ApiError::Unauthorized),
        }
    }

    fn invalidate(&self) {
        self.session().clear_auth_data();
    }
}

/// One entry of the route table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub name: &'static str,
    /// Path pattern; `:name` segments match any single segment
    pub pattern: &'static str,
    pub requires_auth: bool,
}

impl Route {
    pub const fn new(name: &'static str, pattern: &'static str, requires_auth: bool) -> Self {
        Self {
            name,
            pattern,
            requires_auth,
        }
    }

    /// Matches a path (without query or fragment) against the pattern
    pub fn matches(&self, path: &str) -> bool {
        let mut pattern = segments(self.pattern);
        let mut actual = segments(path);
        loop {
            match (pattern.next(), actual.next()) {
                (None, None) => return true,
                (Some(p), Some(a)) if p.starts_with(':') || p == a => continue,
                _ => return false,
            }
        }
    }
}

/// Path part of a router location, without query or fragment
fn path_only(full_path: &str) -> &str {
    full_path
        .find(|c| c == '?' || c == '#')
        .map_or(full_path, |end| &full_path[..end])
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Name of the login route
pub const LOGIN_ROUTE: &str = "login";
/// Name of the registration route
pub const REGISTER_ROUTE: &str = "register";

/// The application's routes
pub const ROUTES: &[Route] = &[
    Route::new("home", "/", true),
    Route::new(LOGIN_ROUTE, "/auth/login", false),
    Route::new(REGISTER_ROUTE, "/auth/register", false),
    Route::new("books", "/books", true),
    Route::new("book-detail", "/books/:id", true),
    Route::new("book-reader", "/books/:id/read", true),
    Route::new("profile", "/profile", true),
    Route::new("profile-settings", "/profile/settings", true),
];

/// Outcome of one navigation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteGuardDecision {
    Allow,
    /// Go to the login page, remembering where the user was headed
    DenyToLogin { redirect: Option<String> },
    /// Already signed in; skip login/register
    RedirectHome,
}

impl RouteGuardDecision {
    /// Where the navigation ends up, or `None` if the destination is allowed
    ///
    /// ```
    /// use bookworm_lib::auth::RouteGuardDecision;
    ///
    /// let deny = RouteGuardDecision::DenyToLogin { redirect: Some("/books/7".into()) };
    /// assert_eq!(
    ///     deny.location("/auth/login", "/").as_deref(),
    ///     Some("/auth/login?redirect=%2Fbooks%2F7")
    /// );
    /// assert_eq!(RouteGuardDecision::Allow.location("/auth/login", "/"), None);
    /// ```
    pub fn location(&self, login_path: &str, home_path: &str) -> Option<String> {
        match self {
            RouteGuardDecision::Allow => None,
            RouteGuardDecision::RedirectHome => Some(home_path.to_string()),
            RouteGuardDecision::DenyToLogin { redirect: None } => Some(login_path.to_string()),
            RouteGuardDecision::DenyToLogin {
                redirect: Some(target),
            } => {
                let query = url::form_urlencoded::Serializer::new(String::new())
                    .append_pair("redirect", target)
                    .finish();
                Some(format!("{}?{}", login_path, query))
            }
        }
    }

    /// The originally requested path carried by a denial
    pub fn redirect_target(&self) -> Option<&str> {
        match self {
            RouteGuardDecision::DenyToLogin { redirect } => redirect.as_deref(),
            _ => None,
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, RouteGuardDecision::Allow)
    }
}

/// Gate consulted before every route transition
pub struct NavigationGuard<P> {
    probe: P,
    routes: &'static [Route],
}

impl<P: SessionProbe> NavigationGuard<P> {
    /// Guard over the application route table
    pub fn new(probe: P) -> Self {
        Self::with_routes(probe, ROUTES)
    }

    pub fn with_routes(probe: P, routes: &'static [Route]) -> Self {
        Self { probe, routes }
    }

    pub fn probe(&self) -> &P {
        &self.probe
    }

    /// Finds the route for a full path (query and fragment ignored)
    pub fn resolve(&self, full_path: &str) -> Option<&Route> {
        let path = path_only(full_path);
        self.routes.iter().find(|route| route.matches(path))
    }

    /// Decides whether navigation to `full_path` may proceed
    pub async fn check(&self, full_path: &str) -> RouteGuardDecision {
        let Some(route) = self.resolve(full_path) else {
            tracing::debug!(path = full_path, "Unknown route, allowing");
            return RouteGuardDecision::Allow;
        };

        if route.name == LOGIN_ROUTE || route.name == REGISTER_ROUTE {
            return self.check_auth_page(route).await;
        }

        if !route.requires_auth {
            return RouteGuardDecision::Allow;
        }

        if !self.probe.has_token() {
            tracing::info!(route = route.name, "Not signed in, redirecting to login");
            return deny(full_path);
        }

        match self.probe.revalidate().await {
            Ok(()) => RouteGuardDecision::Allow,
            Err(e) if e.is_auth() => {
                tracing::info!(route = route.name, "Session rejected, redirecting to login");
                self.probe.invalidate();
                deny(full_path)
            }
            Err(e) => {
                tracing::warn!(route = route.name, "Could not revalidate session: {}", e);
                deny(full_path)
            }
        }
    }

    async fn check_auth_page(&self, route: &Route) -> RouteGuardDecision {
        if !self.probe.has_token() {
            return RouteGuardDecision::Allow;
        }
        match self.probe.revalidate().await {
            Ok(()) => {
                tracing::debug!(route = route.name, "Already signed in, redirecting home");
                RouteGuardDecision::RedirectHome
            }
            Err(e) => {
                if e.is_auth() {
                    self.probe.invalidate();
                }
                RouteGuardDecision::Allow
            }
        }
    }
}

fn deny(full_path: &str) -> RouteGuardDecision {
    RouteGuardDecision::DenyToLogin {
        redirect: Some(full_path.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(has_token: bool) -> MockSessionProbe {
        let mut probe = MockSessionProbe::new();
        probe.expect_has_token().return_const(has_token);
        probe
    }

    #[test]
    fn test_route_matching() {
        let detail = Route::new("book-detail", "/books/:id", true);
        assert!(detail.matches("/books/42"));
        assert!(detail.matches("/books/42/"));
        assert!(!detail.matches("/books"));
        assert!(!detail.matches("/books/42/read"));

        let home = Route::new("home", "/", true);
        assert!(home.matches("/"));
        assert!(home.matches(""));
        assert!(!home.matches("/books"));
    }

    #[test]
    fn test_resolve_ignores_query() {
        let guard = NavigationGuard::new(probe(false));
        assert_eq!(guard.resolve("/books/7/read?page=3").unwrap().name, "book-reader");
        assert_eq!(guard.resolve("/auth/login").unwrap().name, LOGIN_ROUTE);
        assert!(guard.resolve("/nowhere").is_none());
    }

    #[test]
    fn test_path_only() {
        assert_eq!(path_only("/books?page=2"), "/books");
        assert_eq!(path_only("/profile#avatar"), "/profile");
        assert_eq!(path_only("/books/7/read?page=3#p12"), "/books/7/read");
        assert_eq!(path_only("/profile/settings"), "/profile/settings");
        assert_eq!(path_only("?redirect=%2F"), "");
    }

    #[tokio::test]
    async fn test_protected_route_without_token_denies() {
        let mut p = probe(false);
        p.expect_revalidate().never();
        let guard = NavigationGuard::new(p);

        let decision = guard.check("/profile").await;
        assert_eq!(decision.redirect_target(), Some("/profile"));
        assert_eq!(
            decision.location("/auth/login", "/").as_deref(),
            Some("/auth/login?redirect=%2Fprofile")
        );
    }

    #[tokio::test]
    async fn test_protected_route_with_valid_session_allows() {
        let mut p = probe(true);
        p.expect_revalidate().times(1).returning(|| Ok(()));
        p.expect_invalidate().never();
        let guard = NavigationGuard::new(p);

        assert!(guard.check("/books/3").await.is_allowed());
    }

    #[tokio::test]
    async fn test_rejected_session_is_cleared_and_denied() {
        let mut p = probe(true);
        p.expect_revalidate()
            .times(1)
            .returning(|| Err(ApiError::Unauthorized));
        p.expect_invalidate().times(1).return_const(());
        let guard = NavigationGuard::new(p);

        let decision = guard.check("/books/3/read").await;
        assert_eq!(decision.redirect_target(), Some("/books/3/read"));
    }

    #[tokio::test]
    async fn test_connectivity_failure_denies_without_clearing() {
        let mut p = probe(true);
        p.expect_revalidate()
            .times(1)
            .returning(|| Err(ApiError::Connectivity("offline".into())));
        p.expect_invalidate().never();
        let guard = NavigationGuard::new(p);

        assert!(!guard.check("/profile/settings").await.is_allowed());
    }

    #[tokio::test]
    async fn test_login_page_redirects_home_when_signed_in() {
        let mut p = probe(true);
        p.expect_revalidate().times(1).returning(|| Ok(()));
        let guard = NavigationGuard::new(p);

        assert_eq!(guard.check("/auth/login").await, RouteGuardDecision::RedirectHome);
        assert_eq!(
            RouteGuardDecision::RedirectHome.location("/auth/login", "/").as_deref(),
            Some("/")
        );
    }

    #[tokio::test]
    async fn test_login_page_allowed_when_session_is_dead() {
        let mut p = probe(true);
        p.expect_revalidate()
            .times(1)
            .returning(|| Err(ApiError::Unauthorized));
        p.expect_invalidate().times(1).return_const(());
        let guard = NavigationGuard::new(p);

        assert!(guard.check("/auth/register").await.is_allowed());
    }

    #[tokio::test]
    async fn test_public_pages_allowed_when_logged_out() {
        let mut p = probe(false);
        p.expect_revalidate().never();
        let guard = NavigationGuard::new(p);

        assert!(guard.check("/auth/login").await.is_allowed());
        assert!(guard.check("/unknown/page").await.is_allowed());
    }

    #[test]
    fn test_deny_without_redirect() {
        let decision = RouteGuardDecision::DenyToLogin { redirect: None };
        assert_eq!(decision.location("/auth/login", "/").as_deref(), Some("/auth/login"));
        assert_eq!(decision.redirect_target(), None);
    }
}
