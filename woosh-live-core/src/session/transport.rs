//! Transport seam between the session state machine and the wire.
//!
//! A [`Connection`] is a pair of channels. The session driver pushes
//! [`ClientMessage`]s into `outbound` and reads [`ServerMessage`]s from
//! `inbound`. Dropping `outbound` asks the transport to close the
//! connection. `inbound` ending without an error means the remote side
//! closed it.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use super::protocol::{ClientMessage, ServerMessage};
use crate::error::Result;

/// Outbound queue depth between the session driver and the transport writer.
pub const OUTBOUND_CAPACITY: usize = 64;

/// An established, not yet set up, connection to the live service.
pub struct Connection {
    pub outbound: mpsc::Sender<ClientMessage>,
    pub inbound: mpsc::Receiver<Result<ServerMessage>>,
}

#[async_trait]
pub trait LiveTransport: Send + Sync + 'static {
    /// # Errors
    /// `LiveError::Connection` when the remote handshake fails.
    async fn connect(&self) -> Result<Connection>;
}

/// Offline stand-in for the live service: acknowledges setup and swallows
/// audio. Never produces speech. Used by the host's dry-run mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoopbackTransport;

#[async_trait]
impl LiveTransport for LoopbackTransport {
    async fn connect(&self) -> Result<Connection> {
        let (outbound, mut from_client) = mpsc::channel::<ClientMessage>(OUTBOUND_CAPACITY);
        let (to_client, inbound) = mpsc::channel(OUTBOUND_CAPACITY);

        tokio::spawn(async move {
            let mut frames = 0u64;
            while let Some(msg) = from_client.recv().await {
                match msg {
                    ClientMessage::Setup(setup) => {
                        debug!(model = setup.model.as_str(), "loopback: setup received");
                        if to_client.send(Ok(ServerMessage::setup_complete())).await.is_err() {
                            break;
                        }
                    }
                    ClientMessage::RealtimeInput(_) => frames += 1,
                }
            }
            debug!(frames, "loopback: client closed");
        });

        Ok(Connection { outbound, inbound })
    }
}
