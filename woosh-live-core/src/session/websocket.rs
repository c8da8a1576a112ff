//! WebSocket transport for the hosted live service (`tokio-tungstenite`).
//!
//! The socket is split into a writer task (outbound channel -> JSON text
//! frames) and a reader task (text or binary JSON frames -> inbound channel).

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use tracing::{debug, info, warn};
use url::Url;

use super::{
    protocol::{ClientMessage, ServerMessage},
    transport::{Connection, LiveTransport, OUTBOUND_CAPACITY},
};
use crate::error::{LiveError, Result};

/// Bidirectional streaming endpoint of the hosted generative-AI service.
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

pub struct WebSocketTransport {
    endpoint: Url,
    api_key: String,
}

impl WebSocketTransport {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_endpoint(DEFAULT_ENDPOINT, api_key)
    }

    pub fn with_endpoint(endpoint: &str, api_key: impl Into<String>) -> Result<Self> {
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
            api_key: api_key.into(),
        })
    }

    fn request_url(&self) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("key", &self.api_key);
        url
    }
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("endpoint", &self.endpoint.as_str())
            .finish_non_exhaustive()
    }
}

/// Text or binary payload. Control frames carry no server message.
fn frame_body(msg: &Message) -> Option<&[u8]> {
    match msg {
        Message::Text(text) => Some(text.as_str().as_bytes()),
        Message::Binary(bytes) => Some(bytes.as_slice()),
        _ => None,
    }
}

fn parse_server_frame(bytes: &[u8]) -> Result<ServerMessage> {
    serde_json::from_slice(bytes).map_err(|e| LiveError::Protocol(format!("bad server message: {e}")))
}

#[async_trait]
impl LiveTransport for WebSocketTransport {
    async fn connect(&self) -> Result<Connection> {
        info!(endpoint = self.endpoint.as_str(), "connecting to live service");
        let (ws_stream, response) = connect_async(self.request_url().as_str()).await?;
        debug!(status = %response.status(), "websocket connected");

        let (mut write, mut read) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::channel::<ClientMessage>(OUTBOUND_CAPACITY);
        let (inbound_tx, inbound) = mpsc::channel::<Result<ServerMessage>>(OUTBOUND_CAPACITY);

        tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                let json = match serde_json::to_string(&msg) {
                    Ok(j) => j,
                    Err(e) => {
                        warn!("failed to serialize client message: {e}");
                        continue;
                    }
                };
                if let Err(e) = write.send(Message::Text(json.into())).await {
                    warn!("websocket send failed: {e}");
                    return;
                }
            }
            // Session dropped its sender: close politely.
            let _ = write.send(Message::Close(None)).await;
            let _ = write.close().await;
            debug!("websocket writer closed");
        });

        tokio::spawn(async move {
            while let Some(frame) = read.next().await {
                let parsed = match frame {
                    Ok(Message::Close(reason)) => {
                        info!(?reason, "live service closed the connection");
                        break;
                    }
                    Ok(msg) => match frame_body(&msg) {
                        Some(body) => parse_server_frame(body),
                        None => continue,
                    },
                    Err(e) => Err(LiveError::from(e)),
                };
                let failed = parsed.is_err();
                if inbound_tx.send(parsed).await.is_err() || failed {
                    break;
                }
            }
            debug!("websocket reader finished");
        });

        Ok(Connection { outbound, inbound })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_key_goes_into_query() {
        let t = WebSocketTransport::with_endpoint("wss://example.test/live", "secret").unwrap();
        assert_eq!(t.request_url().as_str(), "wss://example.test/live?key=secret");
        assert!(!format!("{t:?}").contains("secret"));
    }

    #[test]
    fn binary_and_text_frames_parse_alike() {
        let msg = parse_server_frame(br#"{"setupComplete":{}}"#).unwrap();
        assert!(msg.setup_complete.is_some());
        assert!(matches!(
            parse_server_frame(b"not json"),
            Err(LiveError::Protocol(_))
        ));
    }

    #[test]
    fn frame_body_reads_text_and_binary_payloads() {
        let json = r#"{"setupComplete":{}}"#;
        let text = Message::Text(json.to_string().into());
        let binary = Message::Binary(json.as_bytes().to_vec().into());
        assert_eq!(frame_body(&text), Some(json.as_bytes()));
        assert_eq!(frame_body(&binary), Some(json.as_bytes()));
        assert_eq!(frame_body(&Message::Close(None)), None);

        let parsed = parse_server_frame(frame_body(&binary).unwrap()).unwrap();
        assert!(parsed.setup_complete.is_some());
    }

    #[test]
    fn invalid_endpoint_is_a_connection_error() {
        assert!(matches!(
            WebSocketTransport::with_endpoint("not a url", "k"),
            Err(LiveError::Connection(_))
        ));
    }
}
