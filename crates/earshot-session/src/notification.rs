use earshot_protocol::{NotificationPayload, Packet};

use crate::{ClientSession, PacketSink};

/// A push notification shown in the player's web client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    title: String,
    message: String,
}

impl Notification {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Sends the notification to `session`.
    ///
    /// Returns `false` without sending if the title or message is empty.
    pub fn send(&self, sink: &dyn PacketSink, session: &ClientSession) -> bool {
        if self.title.is_empty() || self.message.is_empty() {
            return false;
        }
        let payload = NotificationPayload {
            title: self.title.clone(),
            message: self.message.clone(),
        };
        match Packet::new(&payload) {
            Ok(packet) => {
                sink.send(session, packet);
                true
            }
            Err(e) => {
                tracing::warn!(
                    client_id = %session.id(),
                    error = %e,
                    "failed to build notification"
                );
                false
            }
        }
    }
}
