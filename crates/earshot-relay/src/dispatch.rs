//! Routing inbound relay frames to handlers.
//!
//! Each channel has at most one handler. Frames for channels nobody
//! handles are logged and dropped. A handler that fails only loses its
//! own message; the socket keeps reading.

use std::collections::HashMap;
use std::sync::Arc;

use earshot_protocol::{Channel, Codec, Frame, JsonCodec};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::RelayError;

/// Handles the frames of one or more channels.
pub trait InboundHandler: Send + Sync {
    /// Handles one frame whose event names a channel this handler was
    /// registered for.
    ///
    /// # Errors
    /// Any error is logged by the dispatcher and the frame is dropped.
    fn handle(&self, frame: &Frame) -> Result<(), RelayError>;
}

/// Channel → handler table shared by the socket reader.
#[derive(Default)]
pub struct Dispatcher {
    handlers: RwLock<HashMap<Channel, Arc<dyn InboundHandler>>>,
    codec: JsonCodec,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes `channel` to `handler`, returning the handler it replaced.
    pub fn register(
        &self,
        channel: Channel,
        handler: Arc<dyn InboundHandler>,
    ) -> Option<Arc<dyn InboundHandler>> {
        self.handlers.write().insert(channel, handler)
    }

    pub fn unregister(&self, channel: Channel) -> Option<Arc<dyn InboundHandler>> {
        self.handlers.write().remove(&channel)
    }

    pub fn is_handled(&self, channel: Channel) -> bool {
        self.handlers.read().contains_key(&channel)
    }

    /// Decodes raw socket bytes and dispatches the frame.
    pub fn dispatch(&self, bytes: &[u8]) {
        match self.codec.decode::<Frame>(bytes) {
            Ok(frame) => self.dispatch_frame(&frame),
            Err(e) => warn!(error = %e, "unreadable relay frame dropped"),
        }
    }

    /// Dispatches an already decoded frame.
    pub fn dispatch_frame(&self, frame: &Frame) {
        let Some(channel) = frame.channel() else {
            debug!(event = %frame.event, "relay event without a channel ignored");
            return;
        };
        // Clone the handler out so a handler may (un)register others.
        let handler = self.handlers.read().get(&channel).cloned();
        let Some(handler) = handler else {
            debug!(%channel, "no handler for relay channel");
            return;
        };
        if let Err(e) = handler.handle(frame) {
            warn!(%channel, error = %e, "relay frame handler failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use earshot_protocol::{ClientConnectedPayload, ClientId, SystemNotificationPayload};

    use super::*;

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
    }

    impl InboundHandler for Counting {
        fn handle(&self, frame: &Frame) -> Result<(), RelayError> {
            frame.decode::<ClientConnectedPayload>()?;
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn connected_bytes() -> Vec<u8> {
        let frame = Frame::for_channel(&ClientConnectedPayload {
            client: ClientId::random(),
        })
        .unwrap();
        JsonCodec.encode(&frame).unwrap()
    }

    #[test]
    fn test_dispatch_routes_to_registered_handler() {
        let dispatcher = Dispatcher::new();
        let handler = Arc::new(Counting::default());
        dispatcher.register(Channel::ClientConnected, handler.clone());

        dispatcher.dispatch(&connected_bytes());

        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispatch_unhandled_channel_is_ignored() {
        let dispatcher = Dispatcher::new();
        let handler = Arc::new(Counting::default());
        dispatcher.register(Channel::ClientConnected, handler.clone());
        let frame = Frame::for_channel(&SystemNotificationPayload {
            message: "hi".into(),
        })
        .unwrap();

        dispatcher.dispatch_frame(&frame);

        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dispatch_garbage_does_not_reach_handlers() {
        let dispatcher = Dispatcher::new();
        let handler = Arc::new(Counting::default());
        dispatcher.register(Channel::ClientConnected, handler.clone());

        dispatcher.dispatch(b"\x00\x01 not json");
        dispatcher.dispatch(br#"{ "event": "client-connected", "payload": {} }"#);

        assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_register_replaces_previous_handler() {
        let dispatcher = Dispatcher::new();
        let first = Arc::new(Counting::default());
        let second = Arc::new(Counting::default());

        assert!(dispatcher.register(Channel::ClientConnected, first.clone()).is_none());
        assert!(dispatcher.register(Channel::ClientConnected, second.clone()).is_some());
        dispatcher.dispatch(&connected_bytes());

        assert_eq!(first.calls.load(Ordering::SeqCst), 0);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregister_stops_routing() {
        let dispatcher = Dispatcher::new();
        dispatcher.register(Channel::ClientConnected, Arc::new(Counting::default()));

        dispatcher.unregister(Channel::ClientConnected);

        assert!(!dispatcher.is_handled(Channel::ClientConnected));
    }
}
