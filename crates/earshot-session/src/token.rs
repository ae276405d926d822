//! Session tokens: the capability credential a client presents to the relay.
//!
//! A token packs four parts into one opaque string:
//!
//! ```text
//! base64( name ":" uuid ":" public_key ":" session_secret )
//! ```
//!
//! The session secret is what makes a token unguessable. It comes from
//! `rand::rng()`, which is a CSPRNG seeded from the OS, never from a
//! counter or timestamp.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use earshot_protocol::ClientId;
use rand::Rng;
use rand::distr::Alphanumeric;
use uuid::Uuid;

use crate::{PlayerIdentity, SessionError};

/// Default length of the random session secret.
pub(crate) const DEFAULT_SECRET_LENGTH: usize = 8;

/// A freshly issued secret and the token that embeds it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub session_key: String,
    pub token: String,
}

/// Mints tokens for one server process.
#[derive(Debug, Clone)]
pub struct TokenFactory {
    public_key: String,
    secret_length: usize,
}

impl TokenFactory {
    pub fn new(public_key: impl Into<String>) -> Self {
        Self {
            public_key: public_key.into(),
            secret_length: DEFAULT_SECRET_LENGTH,
        }
    }

    /// Overrides the session secret length.
    pub fn with_secret_length(mut self, length: usize) -> Self {
        self.secret_length = length.max(1);
        self
    }

    pub fn public_key(&self) -> &str {
        &self.public_key
    }

    /// Generates a new session secret and the token carrying it.
    pub fn issue(&self, identity: &PlayerIdentity) -> IssuedToken {
        let session_key = random_alphanumeric(self.secret_length);
        let raw = format!(
            "{}:{}:{}:{}",
            identity.name, identity.id, self.public_key, session_key
        );
        IssuedToken {
            token: STANDARD.encode(raw),
            session_key,
        }
    }
}

/// A token decoded back into its parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub name: String,
    pub id: ClientId,
    pub public_key: String,
    pub session_key: String,
}

impl SessionToken {
    /// Decodes a token produced by [`TokenFactory::issue`].
    ///
    /// The session secret is alphanumeric and always last. The player id is
    /// the leftmost `:`-separated part that parses as a UUID, so both the
    /// name and the public key may contain `:`. A name that itself holds a
    /// `:`-delimited UUID would be split at the wrong place.
    pub fn decode(token: &str) -> Result<Self, SessionError> {
        let bytes = STANDARD
            .decode(token)
            .map_err(|e| SessionError::InvalidToken(e.to_string()))?;
        let raw =
            String::from_utf8(bytes).map_err(|e| SessionError::InvalidToken(e.to_string()))?;

        let parts: Vec<&str> = raw.split(':').collect();
        if parts.len() < 4 {
            return Err(SessionError::InvalidToken("expected four parts".into()));
        }
        let last = parts.len() - 1;
        let (at, id) = parts[1..last - 1]
            .iter()
            .enumerate()
            .find_map(|(i, part)| Uuid::parse_str(part).ok().map(|id| (i + 1, id)))
            .ok_or_else(|| SessionError::InvalidToken("bad player id".into()))?;

        Ok(Self {
            name: parts[..at].join(":"),
            id: ClientId(id),
            public_key: parts[at + 1..last].join(":"),
            session_key: parts[last].to_string(),
        })
    }

    pub fn identity(&self) -> PlayerIdentity {
        PlayerIdentity::new(self.id, self.name.clone())
    }
}

/// Random `[A-Za-z0-9]` string of the given length.
pub(crate) fn random_alphanumeric(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
