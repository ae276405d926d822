//! Relay discovery: asking the control plane which relay to use.
//!
//! A connection attempt starts with a "start session" call. The control
//! plane answers with a relay assignment (two endpoints and a relay id).
//! A matching "end session" call tells it the server went away.
//!
//! Every control plane reply is wrapped in the same envelope:
//!
//! ```text
//! { "response": <any JSON>, "errors": [ { "code": "...", "message": "..." } ] }
//! ```
//!
//! A non-empty `errors` list means failure. A body that doesn't start with
//! `{` is kept as a raw string response. Anything that goes wrong before we
//! have a body (DNS, TLS, timeouts) is reported as [`BAD_HANDSHAKE`].

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use earshot_session::ServerKeySet;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{BAD_HANDSHAKE, DiscoveryError};

// ---------------------------------------------------------------------------
// Response envelope
// ---------------------------------------------------------------------------

/// One error entry of a control plane reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestError {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// The control plane reply envelope.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    #[serde(default)]
    pub response: Option<Value>,
    #[serde(default)]
    pub errors: Vec<RestError>,
}

impl ApiResponse {
    /// Parses a reply body.
    ///
    /// Bodies starting with `{` are decoded as the envelope; a broken one
    /// becomes a [`BAD_HANDSHAKE`] failure. Anything else is kept verbatim
    /// as a string response.
    pub fn parse(body: &str) -> Self {
        if !body.trim_start().starts_with('{') {
            return Self {
                response: Some(Value::String(body.to_string())),
                errors: Vec::new(),
            };
        }
        match serde_json::from_str(body) {
            Ok(parsed) => parsed,
            Err(e) => Self::failure(BAD_HANDSHAKE, format!("unreadable response: {e}")),
        }
    }

    /// A reply that carries a single error.
    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            response: None,
            errors: vec![RestError {
                code: code.into(),
                message: message.into(),
            }],
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Decodes the `response` field as `T`, or returns the first error.
    ///
    /// # Errors
    /// - `DiscoveryError::Rejected` if the envelope lists errors
    /// - `DiscoveryError::Malformed` if `response` doesn't fit `T`
    pub fn into_result<T: DeserializeOwned>(self) -> Result<T, DiscoveryError> {
        if let Some(first) = self.errors.into_iter().next() {
            return Err(DiscoveryError::Rejected {
                code: first.code,
                message: first.message,
            });
        }
        let response = self.response.unwrap_or(Value::Null);
        serde_json::from_value(response).map_err(|e| DiscoveryError::Malformed(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Assignment
// ---------------------------------------------------------------------------

/// What the control plane tells us on a successful start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub assigned_relay: RelayAssignment,
}

/// The relay picked for this server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayAssignment {
    #[serde(default)]
    pub secure_endpoint: String,
    #[serde(default)]
    pub insecure_endpoint: String,
    pub relay_id: Uuid,
}

impl RelayAssignment {
    /// The endpoint to dial: the secure one when present, otherwise the
    /// insecure one.
    pub fn endpoint(&self) -> &str {
        if self.secure_endpoint.trim().is_empty() {
            &self.insecure_endpoint
        } else {
            &self.secure_endpoint
        }
    }
}

// ---------------------------------------------------------------------------
// RelayDirectory
// ---------------------------------------------------------------------------

/// The control plane, as seen by the relay driver.
pub trait RelayDirectory: Send + Sync + 'static {
    /// Starts a session and returns the relay to dial.
    fn start_session(
        &self,
    ) -> impl Future<Output = Result<RelayAssignment, DiscoveryError>> + Send;

    /// Tells the control plane this server left its relay.
    fn end_session(&self) -> impl Future<Output = Result<(), DiscoveryError>> + Send;
}

/// Where and how to reach the control plane.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Base URL every path is joined onto.
    pub base_url: String,
    pub start_session_path: String,
    pub end_session_path: String,
    /// Deployment environment, sent as `oa-env`.
    pub environment: String,
    /// Plugin build number, sent as `oa-plbuild`.
    pub build: u32,
    pub request_timeout_secs: u64,
}

impl DiscoveryConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            base_url: "https://localhost/".into(),
            start_session_path: "/api/v1/servers/login".into(),
            end_session_path: "/api/v1/servers/logout".into(),
            environment: "production".into(),
            build: 0,
            request_timeout_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// HttpRelayDirectory
// ---------------------------------------------------------------------------

/// [`RelayDirectory`] over HTTPS.
///
/// Requests bypass any system proxy and accept any certificate, matching
/// the relay socket itself. The server's key pair travels as query
/// parameters, so URLs are never logged.
#[derive(Debug, Clone)]
pub struct HttpRelayDirectory {
    client: reqwest::Client,
    config: DiscoveryConfig,
    keys: ServerKeySet,
}

impl HttpRelayDirectory {
    /// # Errors
    /// Returns `DiscoveryError::Client` if the HTTP client can't be built.
    pub fn new(config: DiscoveryConfig, keys: ServerKeySet) -> Result<Self, DiscoveryError> {
        let client = reqwest::Client::builder()
            .no_proxy()
            .danger_accept_invalid_certs(true)
            .timeout(config.request_timeout())
            .build()
            .map_err(DiscoveryError::Client)?;
        Ok(Self {
            client,
            config,
            keys,
        })
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Calls `path` and always yields an envelope; transport failures are
    /// folded into a [`BAD_HANDSHAKE`] error entry.
    async fn call(&self, path: &str) -> ApiResponse {
        match self.fetch(path).await {
            Ok(body) => ApiResponse::parse(&body),
            Err(e) => {
                warn!(path, error = %e, "control plane request failed");
                ApiResponse::failure(BAD_HANDSHAKE, e.to_string())
            }
        }
    }

    async fn fetch(&self, path: &str) -> Result<String, reqwest::Error> {
        let build = self.config.build.to_string();
        let response = self
            .client
            .get(self.config.url(path))
            .query(&[
                ("type", "server"),
                ("private", self.keys.private_key.as_str()),
                ("public", self.keys.public_key.as_str()),
                ("oa-env", self.config.environment.as_str()),
                ("oa-plbuild", build.as_str()),
            ])
            .header("oa-env", self.config.environment.as_str())
            .send()
            .await?;
        debug!(path, status = %response.status(), "control plane responded");
        response.text().await
    }
}

impl RelayDirectory for HttpRelayDirectory {
    async fn start_session(&self) -> Result<RelayAssignment, DiscoveryError> {
        let login: LoginResponse = self
            .call(&self.config.start_session_path)
            .await
            .into_result()?;
        Ok(login.assigned_relay)
    }

    async fn end_session(&self) -> Result<(), DiscoveryError> {
        self.call(&self.config.end_session_path)
            .await
            .into_result::<Value>()
            .map(|_| ())
    }
}

// ---------------------------------------------------------------------------
// StaticRelayDirectory
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Outcome {
    Assign(RelayAssignment),
    Reject(RestError),
    Stall,
}

/// [`RelayDirectory`] with a fixed answer, for tests and for relays that
/// are configured by hand.
#[derive(Debug)]
pub struct StaticRelayDirectory {
    outcome: Mutex<Outcome>,
    starts: AtomicUsize,
    ends: AtomicUsize,
}

impl StaticRelayDirectory {
    /// Always assigns `assignment`.
    pub fn assigning(assignment: RelayAssignment) -> Self {
        Self::with(Outcome::Assign(assignment))
    }

    /// Always fails with `code`.
    pub fn rejecting(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with(Outcome::Reject(RestError {
            code: code.into(),
            message: message.into(),
        }))
    }

    /// Never answers.
    pub fn stalled() -> Self {
        Self::with(Outcome::Stall)
    }

    fn with(outcome: Outcome) -> Self {
        Self {
            outcome: Mutex::new(outcome),
            starts: AtomicUsize::new(0),
            ends: AtomicUsize::new(0),
        }
    }

    pub fn assign(&self, assignment: RelayAssignment) {
        *self.outcome.lock() = Outcome::Assign(assignment);
    }

    pub fn reject(&self, code: impl Into<String>, message: impl Into<String>) {
        *self.outcome.lock() = Outcome::Reject(RestError {
            code: code.into(),
            message: message.into(),
        });
    }

    pub fn stall(&self) {
        *self.outcome.lock() = Outcome::Stall;
    }

    /// How many times a session was started.
    pub fn start_calls(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// How many times a session was ended.
    pub fn end_calls(&self) -> usize {
        self.ends.load(Ordering::SeqCst)
    }
}

impl RelayDirectory for StaticRelayDirectory {
    async fn start_session(&self) -> Result<RelayAssignment, DiscoveryError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let outcome = self.outcome.lock().clone();
        match outcome {
            Outcome::Assign(assignment) => Ok(assignment),
            Outcome::Reject(error) => Err(DiscoveryError::Rejected {
                code: error.code,
                message: error.message,
            }),
            Outcome::Stall => std::future::pending().await,
        }
    }

    async fn end_session(&self) -> Result<(), DiscoveryError> {
        self.ends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
