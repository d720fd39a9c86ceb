use std::fmt;

/// An opaque credential handed out by the store in exchange for a username and password.
///
/// The token is obtained once and attached to every subsequent request of a run.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    /// Wraps a raw token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token for placing it into a request.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AuthToken").field(&"[redacted]").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_hides_token() {
        let token = AuthToken::new("sekrit.42");
        assert_eq!(format!("{token:?}"), r#"AuthToken("[redacted]")"#);
        assert_eq!(token.as_str(), "sekrit.42");
    }
}
