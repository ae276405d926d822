use std::fmt;

use serde::{Deserialize, Serialize};

/// The key pair identifying this game server to the control plane.
///
/// The public half is embedded in every client token. The private half is
/// only ever sent to the control plane and is redacted from `Debug`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerKeySet {
    pub private_key: String,
    pub public_key: String,
}

impl ServerKeySet {
    pub fn new(private_key: impl Into<String>, public_key: impl Into<String>) -> Self {
        Self {
            private_key: private_key.into(),
            public_key: public_key.into(),
        }
    }
}

impl fmt::Debug for ServerKeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerKeySet")
            .field("private_key", &"<redacted>")
            .field("public_key", &self.public_key)
            .finish()
    }
}
