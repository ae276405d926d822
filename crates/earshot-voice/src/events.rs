use earshot_protocol::ClientId;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Something that happened in the voice graph, for external consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoiceEvent {
    /// `listener` can now hear `speaker`. Fired once per direction.
    EnterProximity { listener: ClientId, speaker: ClientId },
    /// `listener` no longer hears `speaker`.
    LeaveProximity { listener: ClientId, speaker: ClientId },
    MicrophoneMuted { client: ClientId },
    MicrophoneUnmuted { client: ClientId },
}

/// Receives [`VoiceEvent`]s. Must not block.
pub trait VoiceEventSink: Send + Sync {
    fn emit(&self, event: VoiceEvent);
}

impl VoiceEventSink for mpsc::UnboundedSender<VoiceEvent> {
    fn emit(&self, event: VoiceEvent) {
        if self.send(event).is_err() {
            tracing::trace!("voice event receiver dropped");
        }
    }
}

/// Discards every event.
impl VoiceEventSink for () {
    fn emit(&self, _event: VoiceEvent) {}
}
