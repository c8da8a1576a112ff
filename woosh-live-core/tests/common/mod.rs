#![allow(dead_code)]

use std::sync::{atomic::AtomicBool, Arc};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use woosh_live_core::buffering::{AudioProducer, Producer};
use woosh_live_core::codec::{decode_transport, encode_transport, pcm16_to_bytes};
use woosh_live_core::session::protocol::{
    ClientMessage, Content, Part, ServerContent, ServerMessage, TransportPacket,
};
use woosh_live_core::session::transport::{Connection, LiveTransport};
use woosh_live_core::{
    CaptureBackend, CaptureStream, LiveError, LiveStatus, LiveStatusEvent, OutputDevice,
    OutputFactory, Result, VirtualOutput,
};

pub const SPEECH_RATE: u32 = 24_000;

/// Hands out one pre-built channel pair; the test plays the server.
pub struct ScriptedTransport {
    conn: Mutex<Option<Connection>>,
}

pub struct ServerSide {
    pub from_client: mpsc::Receiver<ClientMessage>,
    pub to_client: mpsc::Sender<Result<ServerMessage>>,
}

pub fn scripted() -> (Arc<ScriptedTransport>, ServerSide) {
    scripted_with_capacity(256)
}

/// Like [`scripted`], with `capacity` client messages buffered before the
/// client's sends wait on the test.
pub fn scripted_with_capacity(capacity: usize) -> (Arc<ScriptedTransport>, ServerSide) {
    let (outbound, from_client) = mpsc::channel(capacity);
    let (to_client, inbound) = mpsc::channel(256);
    let transport = Arc::new(ScriptedTransport {
        conn: Mutex::new(Some(Connection { outbound, inbound })),
    });
    (
        transport,
        ServerSide {
            from_client,
            to_client,
        },
    )
}

#[async_trait]
impl LiveTransport for ScriptedTransport {
    async fn connect(&self) -> Result<Connection> {
        self.conn
            .lock()
            .take()
            .ok_or_else(|| LiveError::Connection("scripted transport already used".into()))
    }
}

impl ServerSide {
    pub async fn next(&mut self) -> Option<ClientMessage> {
        tokio::time::timeout(Duration::from_secs(2), self.from_client.recv())
            .await
            .expect("timed out waiting for client message")
    }

    /// Read the setup message and acknowledge it.
    pub async fn accept(&mut self) -> ClientMessage {
        let setup = self.next().await.expect("client sent nothing");
        assert!(matches!(setup, ClientMessage::Setup(_)), "first message must be setup");
        self.send(ServerMessage::setup_complete()).await;
        setup
    }

    pub async fn send(&self, msg: ServerMessage) {
        self.to_client.send(Ok(msg)).await.expect("client gone");
    }

    pub async fn fail(&self, error: LiveError) {
        self.to_client.send(Err(error)).await.expect("client gone");
    }
}

/// First sample and MIME type of a realtime input message.
pub fn first_sample(msg: &ClientMessage) -> (i16, String) {
    let ClientMessage::RealtimeInput(input) = msg else {
        panic!("expected realtime input, got {msg:?}");
    };
    let packet = &input.media_chunks[0];
    let bytes = decode_transport(&packet.data).expect("valid base64");
    (i16::from_le_bytes([bytes[0], bytes[1]]), packet.mime_type.clone())
}

fn content(content: ServerContent) -> ServerMessage {
    ServerMessage {
        server_content: Some(content),
        ..ServerMessage::default()
    }
}

/// `secs` of 24 kHz mono speech in one server message.
pub fn speech(secs: f64) -> ServerMessage {
    let frames = (secs * SPEECH_RATE as f64).round() as usize;
    let bytes = pcm16_to_bytes(&vec![1000i16; frames]);
    inline_audio(&format!("audio/pcm;rate={SPEECH_RATE}"), &bytes)
}

/// One server message carrying `bytes` as inline audio, as-is.
pub fn inline_audio(mime_type: &str, bytes: &[u8]) -> ServerMessage {
    content(ServerContent {
        model_turn: Some(Content {
            parts: vec![Part {
                text: None,
                inline_data: Some(TransportPacket {
                    mime_type: mime_type.to_string(),
                    data: encode_transport(bytes),
                }),
            }],
        }),
        ..ServerContent::default()
    })
}

pub fn interrupted() -> ServerMessage {
    content(ServerContent {
        interrupted: true,
        ..ServerContent::default()
    })
}

pub fn turn_complete() -> ServerMessage {
    content(ServerContent {
        turn_complete: true,
        ..ServerContent::default()
    })
}

/// Capture backend that pushes canned audio once, at open.
pub struct ScriptedCapture {
    rate: u32,
    samples: Vec<f32>,
    deny: bool,
}

impl ScriptedCapture {
    /// `count` frames of 4096 samples at 16 kHz; frame `k` holds `(k + 1) / 10`.
    pub fn frames(count: usize) -> Self {
        let samples = (0..count)
            .flat_map(|k| std::iter::repeat((k + 1) as f32 / 10.0).take(4096))
            .collect();
        Self {
            rate: 16_000,
            samples,
            deny: false,
        }
    }

    pub fn denied() -> Self {
        Self {
            rate: 16_000,
            samples: Vec::new(),
            deny: true,
        }
    }
}

struct ScriptedStream(u32);

impl CaptureStream for ScriptedStream {
    fn sample_rate(&self) -> u32 {
        self.0
    }
}

impl CaptureBackend for ScriptedCapture {
    fn open(
        &self,
        mut producer: AudioProducer,
        _running: Arc<AtomicBool>,
    ) -> Result<Box<dyn CaptureStream>> {
        if self.deny {
            return Err(LiveError::PermissionDenied);
        }
        producer.push_slice(&self.samples);
        Ok(Box::new(ScriptedStream(self.rate)))
    }
}

pub fn virtual_output(out: &VirtualOutput) -> Arc<dyn OutputFactory> {
    let out = out.clone();
    Arc::new(move || -> Result<Arc<dyn OutputDevice>> { Ok(Arc::new(out.clone())) })
}

pub async fn wait_for_status(
    rx: &mut broadcast::Receiver<LiveStatusEvent>,
    want: LiveStatus,
) -> LiveStatusEvent {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            match rx.recv().await {
                Ok(event) if event.status == want => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("status channel closed: {e}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {want}"))
}
