//! Integration tests for the WebSocket connector.
//!
//! These tests spin up a real WebSocket server (playing the relay) and
//! dial it with `WebSocketConnector` to verify that data actually flows
//! over the network in both directions.

#[cfg(feature = "websocket")]
mod websocket {
    use std::time::Duration;

    use earshot_transport::{Connection, Connector, WebSocketConnector};
    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    /// Binds a relay stand-in on a random port and returns its `ws://` URL
    /// plus the listener.
    async fn relay_listener() -> (String, TcpListener) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("should bind");
        let addr = listener.local_addr().expect("bound address");
        (format!("ws://{addr}/"), listener)
    }

    #[tokio::test]
    async fn test_connect_send_and_receive() {
        let (url, listener) = relay_listener().await;

        let relay = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            let first = ws.next().await.unwrap().unwrap();
            assert_eq!(first.into_data().as_ref(), b"hello relay");

            ws.send(Message::Text("hello server".into())).await.unwrap();
            ws
        });

        let connector = WebSocketConnector::new().expect("connector");
        let conn = connector.connect(&url).await.expect("should connect");
        assert!(conn.id().into_inner() > 0);

        conn.send(b"hello relay").await.expect("send should succeed");
        let received = conn
            .recv()
            .await
            .expect("recv should succeed")
            .expect("should have data");
        assert_eq!(received, b"hello server");

        conn.close().await.expect("close should succeed");
        let _ws = relay.await.unwrap();
    }

    #[tokio::test]
    async fn test_recv_returns_none_when_relay_closes() {
        let (url, listener) = relay_listener().await;

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Close(None)).await.unwrap();
            // Keep the socket alive long enough for the close to arrive.
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let connector = WebSocketConnector::new().expect("connector");
        let conn = connector.connect(&url).await.expect("should connect");

        let result = conn.recv().await.expect("recv should not error");
        assert!(result.is_none(), "should return None on relay close");
    }

    #[tokio::test]
    async fn test_connect_to_closed_port_fails() {
        let (url, listener) = relay_listener().await;
        drop(listener);

        let connector = WebSocketConnector::new().expect("connector");
        let result = connector.connect(&url).await;

        assert!(result.is_err());
    }
}
