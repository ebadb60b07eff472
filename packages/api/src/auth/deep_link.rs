//! Custom-scheme links that resume an auth flow.
//!
//! The only route is the password-reset link, `app://auth/reset`. The identity
//! provider appends the recovery tokens to the fragment
//! (`#access_token=…&refresh_token=…&type=recovery`); some providers put them
//! in the query string instead, so both are read. An `error_description`
//! parameter means the provider refused the link (expired, already used).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use url::Url;

use crate::error::{AuthError, Result};

/// Tokens handed over by a password-reset link.
#[derive(Clone, PartialEq, Eq)]
pub struct RecoveryTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// From the link's `expires_at`, or `expires_in` counted from parsing.
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for RecoveryTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryTokens")
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// A recognised deep link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeepLink {
    /// Opens the sign-in screen; carries a recovery session when the link came
    /// from a reset email.
    ResetPassword { tokens: Option<RecoveryTokens> },
}

impl DeepLink {
    /// Parse `link` against the configured reset redirect (e.g. `app://auth/reset`).
    pub fn parse(link: &str, reset_redirect: &str) -> Result<Self> {
        let expected = Url::parse(reset_redirect)
            .map_err(|e| AuthError::Config(format!("invalid reset redirect {reset_redirect}: {e}")))?;
        let url = Url::parse(link).map_err(|e| AuthError::InvalidLink(e.to_string()))?;

        if url.scheme() != expected.scheme() || route_of(&url) != route_of(&expected) {
            return Err(AuthError::InvalidLink(format!("unrecognised link: {}", route_of(&url))));
        }

        let mut params: HashMap<String, String> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        if let Some(fragment) = url.fragment() {
            params.extend(
                url::form_urlencoded::parse(fragment.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned())),
            );
        }

        if let Some(message) = params
            .get("error_description")
            .or_else(|| params.get("error"))
        {
            return Err(AuthError::Rejected(message.clone()));
        }

        if let Some(kind) = params.get("type") {
            if kind != "recovery" {
                return Err(AuthError::InvalidLink(format!("unexpected link type: {kind}")));
            }
        }

        let expires_at = expiry_of(&params, Utc::now());
        let tokens = match (params.remove("access_token"), params.remove("refresh_token")) {
            (Some(access_token), Some(refresh_token)) => Some(RecoveryTokens {
                access_token,
                refresh_token,
                expires_at,
            }),
            _ => None,
        };

        Ok(DeepLink::ResetPassword { tokens })
    }
}

fn expiry_of(params: &HashMap<String, String>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let absolute = params
        .get("expires_at")
        .and_then(|secs| secs.parse::<i64>().ok())
        .and_then(|secs| DateTime::from_timestamp(secs, 0));
    absolute.or_else(|| {
        params
            .get("expires_in")
            .and_then(|secs| secs.parse::<i64>().ok())
            .map(|secs| now + chrono::Duration::seconds(secs))
    })
}

/// `app://auth/reset` and `app:///auth/reset` both name the route `auth/reset`.
fn route_of(url: &Url) -> String {
    let joined = format!("{}{}", url.host_str().unwrap_or_default(), url.path());
    joined.trim_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const REDIRECT: &str = "app://auth/reset";

    #[test]
    fn test_reset_link_with_fragment_tokens() {
        let before = Utc::now();
        let link = DeepLink::parse(
            "app://auth/reset#access_token=abc&refresh_token=def&expires_in=3600&type=recovery",
            REDIRECT,
        )
        .unwrap();
        let DeepLink::ResetPassword { tokens: Some(tokens) } = link else {
            panic!("expected recovery tokens");
        };
        assert_eq!(tokens.access_token, "abc");
        assert_eq!(tokens.refresh_token, "def");
        let expires_at = tokens.expires_at.unwrap();
        assert!(expires_at >= before + chrono::Duration::seconds(3600));
        assert!(expires_at <= Utc::now() + chrono::Duration::seconds(3600));
    }

    #[test]
    fn test_absolute_link_expiry_wins() {
        let link = DeepLink::parse(
            "app://auth/reset#access_token=a&refresh_token=r&expires_in=3600&expires_at=1700000000",
            REDIRECT,
        )
        .unwrap();
        let DeepLink::ResetPassword { tokens: Some(tokens) } = link else {
            panic!("expected recovery tokens");
        };
        assert_eq!(tokens.expires_at, DateTime::from_timestamp(1_700_000_000, 0));
    }

    #[test]
    fn test_reset_link_with_query_tokens_and_triple_slash() {
        let link = DeepLink::parse(
            "app:///auth/reset?access_token=a%2Bb&refresh_token=r",
            REDIRECT,
        )
        .unwrap();
        let DeepLink::ResetPassword { tokens: Some(tokens) } = link else {
            panic!("expected recovery tokens");
        };
        assert_eq!(tokens.access_token, "a+b");
        assert_eq!(tokens.expires_at, None);
    }

    #[test]
    fn test_bare_reset_link_opens_sign_in() {
        let link = DeepLink::parse("app://auth/reset", REDIRECT).unwrap();
        assert_eq!(link, DeepLink::ResetPassword { tokens: None });
    }

    #[test]
    fn test_provider_error_is_surfaced() {
        let err = DeepLink::parse(
            "app://auth/reset#error=access_denied&error_description=Email+link+is+invalid+or+has+expired",
            REDIRECT,
        )
        .unwrap_err();
        assert_eq!(err, AuthError::Rejected("Email link is invalid or has expired".into()));
    }

    #[test]
    fn test_unknown_links_are_rejected() {
        assert!(matches!(
            DeepLink::parse("app://campaigns/42", REDIRECT),
            Err(AuthError::InvalidLink(_))
        ));
        assert!(matches!(
            DeepLink::parse("https://auth/reset", REDIRECT),
            Err(AuthError::InvalidLink(_))
        ));
        assert!(matches!(
            DeepLink::parse("app://auth/reset#type=signup", REDIRECT),
            Err(AuthError::InvalidLink(_))
        ));
        assert!(matches!(
            DeepLink::parse("not a url", REDIRECT),
            Err(AuthError::InvalidLink(_))
        ));
    }
}
