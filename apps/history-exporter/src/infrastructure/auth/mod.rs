//! Session Credentials
//!
//! Supplies the session token sent in the `token` field of every
//! subscription request.
//!
//! Obtaining a session (login, two-factor confirmation, cookie storage) is
//! handled outside this process; the exporter only consumes the resulting
//! tokens. A token refresher can swap in new tokens while an export is
//! running through [`StaticTokenSource::replace`].

use parking_lot::RwLock;

use crate::application::ports::{SessionTokens, TokenSource};
use crate::infrastructure::config::Credentials;

/// Token source backed by tokens held in memory.
#[derive(Debug)]
pub struct StaticTokenSource {
    tokens: RwLock<SessionTokens>,
}

impl StaticTokenSource {
    /// Create a source holding `tokens`.
    #[must_use]
    pub const fn new(tokens: SessionTokens) -> Self {
        Self {
            tokens: RwLock::new(tokens),
        }
    }

    /// Swap in new tokens. Requests issued afterwards use them.
    pub fn replace(&self, tokens: SessionTokens) {
        *self.tokens.write() = tokens;
        tracing::debug!("Session tokens replaced");
    }
}

impl From<Credentials> for StaticTokenSource {
    fn from(credentials: Credentials) -> Self {
        Self::new(credentials.into_tokens())
    }
}

impl TokenSource for StaticTokenSource {
    fn tokens(&self) -> SessionTokens {
        self.tokens.read().clone()
    }
}
