//! Classification of upstream fetch failures.
//!
//! The upstream API reports authorization problems only through message
//! text, so the raw string is matched once here, at the fetch boundary, and
//! carried onward as a structured kind. The marker lists are an undocumented
//! contract with the upstream service and may drift with its wording.

/// Structured kind of a failed quota fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// Access denied (403); the account should be skipped until retried
    /// explicitly.
    Forbidden,
    /// Authorization expired or invalid (401-equivalent); the credential
    /// needs re-authorization.
    Auth,
    /// Anything else: connectivity, server errors, parse failures.
    Network,
}

const AUTH_MARKERS: &[&str] = &[
    "401",
    "unauthorized",
    "invalid_grant",
    "invalid authentication",
    "token expired",
    "token has expired",
    "authorization expired",
    "re-authenticate",
];

const FORBIDDEN_MARKERS: &[&str] = &["403", "forbidden"];

/// Classifies a raw fetch error message.
///
/// Forbidden wins over auth when both match: a 403 body that also mentions
/// "unauthorized" must not invalidate the stored credential.
pub fn classify_fetch_error(message: &str) -> FetchErrorKind {
    let lower = message.to_lowercase();
    if FORBIDDEN_MARKERS.iter().any(|m| lower.contains(m)) {
        return FetchErrorKind::Forbidden;
    }
    if AUTH_MARKERS.iter().any(|m| lower.contains(m)) {
        return FetchErrorKind::Auth;
    }
    FetchErrorKind::Network
}

impl FetchErrorKind {
    /// Stable, human-readable reason shown in the account cache instead of
    /// the raw upstream error.
    pub fn user_reason(&self) -> &'static str {
        match self {
            FetchErrorKind::Forbidden => "Access denied by the quota service",
            FetchErrorKind::Auth => "Authorization expired; sign in again",
            FetchErrorKind::Network => "Could not reach the quota service",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_forbidden() {
        assert_eq!(
            classify_fetch_error("HTTP 403 Forbidden"),
            FetchErrorKind::Forbidden
        );
        assert_eq!(
            classify_fetch_error("request FORBIDDEN by upstream"),
            FetchErrorKind::Forbidden
        );
    }

    #[test]
    fn test_classify_auth() {
        assert_eq!(
            classify_fetch_error("401 Unauthorized"),
            FetchErrorKind::Auth
        );
        assert_eq!(
            classify_fetch_error("oauth invalid_grant returned"),
            FetchErrorKind::Auth
        );
    }

    #[test]
    fn test_forbidden_wins_over_auth() {
        assert_eq!(
            classify_fetch_error("403: unauthorized client"),
            FetchErrorKind::Forbidden
        );
    }

    #[test]
    fn test_classify_network_fallback() {
        assert_eq!(
            classify_fetch_error("connection reset by peer"),
            FetchErrorKind::Network
        );
    }
}
