//! Credentials for challenge-response authentication

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::HeaderValue;

/// How long a credential should be remembered by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Persistence {
    /// Only for the current task
    None,
    /// For the lifetime of the session
    #[default]
    ForSession,
}

/// Username and password answered to an authentication challenge.
///
/// Attaching a credential to a request has no network effect by itself; it
/// is only used when the backend reports a challenge for one of the
/// request's tasks.
///
/// ```rust
/// use tether::Credential;
///
/// let credential = Credential::new("user", "pass");
/// assert_eq!(credential.authorization_header().to_str().unwrap(), "Basic dXNlcjpwYXNz");
/// ```
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    user: String,
    password: String,
    persistence: Persistence,
}

impl Credential {
    /// Create a credential remembered for the session
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
            persistence: Persistence::ForSession,
        }
    }

    /// Change how long the credential is remembered
    pub fn with_persistence(mut self, persistence: Persistence) -> Self {
        self.persistence = persistence;
        self
    }

    /// Username
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Password
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Persistence
    pub fn persistence(&self) -> Persistence {
        self.persistence
    }

    /// `Authorization` header value for HTTP Basic
    pub fn authorization_header(&self) -> HeaderValue {
        basic_authorization(&self.user, &self.password)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("persistence", &self.persistence)
            .finish()
    }
}

/// Build an HTTP Basic `Authorization` header value
pub fn basic_authorization(user: &str, password: &str) -> HeaderValue {
    let encoded = STANDARD.encode(format!("{}:{}", user, password));
    let mut value = HeaderValue::try_from(format!("Basic {}", encoded))
        .unwrap_or_else(|_| HeaderValue::from_static("Basic"));
    value.set_sensitive(true);
    value
}
