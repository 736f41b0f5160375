//! Log-safe renderings of credentials and identities
//!
//! Everything that reaches `tracing` output about a token, an e-mail address
//! or a URL with a query string goes through one of these helpers first.

/// Shows only the last four characters of a token
///
/// # Examples
///
/// ```
/// use bookworm_lib::security::redact;
///
/// assert_eq!(redact::token("eyJhbGciOiJIUzI1NiJ9.abcd"), "***abcd");
/// assert_eq!(redact::token("abc"), "****");
/// ```
pub fn token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    if chars.len() > 4 {
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("***{}", tail)
    } else {
        "****".to_string()
    }
}

/// Keeps the first two characters of the local part and the whole domain
///
/// # Examples
///
/// ```
/// use bookworm_lib::security::redact;
///
/// assert_eq!(redact::email("reader@example.com"), "re...@example.com");
/// assert_eq!(redact::email("ab@example.com"), "***@example.com");
/// assert_eq!(redact::email("not-an-email"), "***");
/// ```
pub fn email(email: &str) -> String {
    match email.split_once('@') {
        Some((local, domain)) if local.chars().count() > 2 => {
            let head: String = local.chars().take(2).collect();
            format!("{}...@{}", head, domain)
        }
        Some((_, domain)) => format!("***@{}", domain),
        None => "***".to_string(),
    }
}

/// Drops the query string and fragment
///
/// # Examples
///
/// ```
/// use bookworm_lib::security::redact;
///
/// assert_eq!(
///     redact::url("http://localhost:8000/api/users/me/?token=abc#frag"),
///     "http://localhost:8000/api/users/me/"
/// );
/// ```
pub fn url(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}
