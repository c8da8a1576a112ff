mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use common::{first_sample, interrupted, scripted, scripted_with_capacity, speech, turn_complete};
use woosh_live_core::buffering::frame::AudioFrame;
use woosh_live_core::session::protocol::ClientMessage;
use woosh_live_core::{ConnectionState, LiveError, LiveSession, SessionConfig, SessionEvent};

fn config(connect_timeout: Duration) -> SessionConfig {
    SessionConfig {
        model: "test-model".into(),
        voice: "Kore".into(),
        system_instruction: Some("be brief".into()),
        connect_timeout,
    }
}

fn frame(value: i16, seq: u64) -> AudioFrame {
    AudioFrame::new(vec![value; 4096], 16_000, seq)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Option<SessionEvent> {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for session event")
}

#[tokio::test]
async fn frames_sent_before_open_arrive_after_handshake_in_order() {
    let (transport, mut server) = scripted();
    let (tx, mut events) = mpsc::unbounded_channel();
    let session = LiveSession::open(transport, config(Duration::from_secs(2)), tx);

    assert_eq!(session.state(), ConnectionState::Opening);
    for (seq, value) in [10i16, 20, 30].into_iter().enumerate() {
        session.send_audio_frame(frame(value, seq as u64)).unwrap();
    }

    let ClientMessage::Setup(setup) = server.next().await.unwrap() else {
        panic!("first message must be setup");
    };
    assert_eq!(setup.model, "models/test-model");

    // Nothing may follow the setup until it is acknowledged.
    assert!(
        tokio::time::timeout(Duration::from_millis(50), server.from_client.recv())
            .await
            .is_err()
    );

    server.send(woosh_live_core::session::protocol::ServerMessage::setup_complete()).await;
    assert!(matches!(next_event(&mut events).await, Some(SessionEvent::Open)));
    assert_eq!(session.state(), ConnectionState::Open);

    for expected in [10i16, 20, 30] {
        let (sample, mime) = first_sample(&server.next().await.unwrap());
        assert_eq!(sample, expected);
        assert_eq!(mime, "audio/pcm;rate=16000");
    }

    tokio::time::timeout(Duration::from_secs(2), async {
        while session.frames_sent() < 3 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("frames counted");
}

#[tokio::test]
async fn close_is_idempotent_and_reports_once() {
    let (transport, mut server) = scripted();
    let (tx, mut events) = mpsc::unbounded_channel();
    let session = LiveSession::open(transport, config(Duration::from_secs(2)), tx);
    server.accept().await;
    assert!(matches!(next_event(&mut events).await, Some(SessionEvent::Open)));

    session.close();
    session.close();
    session.closed().await;
    session.close();

    assert_eq!(session.state(), ConnectionState::Closed);
    assert!(matches!(next_event(&mut events).await, Some(SessionEvent::Closed)));
    assert!(matches!(
        session.send_audio_frame(frame(1, 0)),
        Err(LiveError::NotOpen)
    ));

    // The transport sees its outbound side end.
    assert!(server.next().await.is_none());

    drop(session);
    assert!(next_event(&mut events).await.is_none());
}

#[tokio::test]
async fn transport_error_fires_one_error_and_nothing_after() {
    let (transport, mut server) = scripted();
    let (tx, mut events) = mpsc::unbounded_channel();
    let session = LiveSession::open(transport, config(Duration::from_secs(2)), tx);
    server.accept().await;
    assert!(matches!(next_event(&mut events).await, Some(SessionEvent::Open)));

    server
        .fail(LiveError::Connection("connection reset".into()))
        .await;
    match next_event(&mut events).await {
        Some(SessionEvent::Error(LiveError::Connection(msg))) => {
            assert_eq!(msg, "connection reset")
        }
        other => panic!("expected connection error, got {other:?}"),
    }

    session.closed().await;
    assert_eq!(session.state(), ConnectionState::Failed);
    assert!(matches!(
        session.send_audio_frame(frame(1, 0)),
        Err(LiveError::NotOpen)
    ));

    session.close();
    assert_eq!(session.state(), ConnectionState::Failed);
    drop(session);
    assert!(next_event(&mut events).await.is_none());
}

#[tokio::test]
async fn missing_acknowledgment_times_out() {
    let (transport, mut server) = scripted();
    let (tx, mut events) = mpsc::unbounded_channel();
    let session = LiveSession::open(transport, config(Duration::from_millis(50)), tx);
    assert!(matches!(server.next().await, Some(ClientMessage::Setup(_))));

    assert!(matches!(
        next_event(&mut events).await,
        Some(SessionEvent::Error(LiveError::Connection(_)))
    ));
    session.closed().await;
    assert_eq!(session.state(), ConnectionState::Failed);
}

#[tokio::test]
async fn inbound_audio_is_stamped_with_turn() {
    let (transport, mut server) = scripted();
    let (tx, mut events) = mpsc::unbounded_channel();
    let _session = LiveSession::open(transport, config(Duration::from_secs(2)), tx);
    server.accept().await;
    assert!(matches!(next_event(&mut events).await, Some(SessionEvent::Open)));

    server.send(speech(0.1)).await;
    server.send(turn_complete()).await;
    server.send(speech(0.1)).await;

    let mut turns = Vec::new();
    while turns.len() < 3 {
        let Some(SessionEvent::Message(event)) = next_event(&mut events).await else {
            panic!("expected a server event");
        };
        turns.push((event.audio.map(|a| a.turn), event.turn_complete));
    }
    assert_eq!(turns, vec![(Some(0), false), (None, true), (Some(1), false)]);
}

#[tokio::test]
async fn remote_close_ends_in_closed() {
    let (transport, mut server) = scripted();
    let (tx, mut events) = mpsc::unbounded_channel();
    let session = LiveSession::open(transport, config(Duration::from_secs(2)), tx);
    server.accept().await;
    assert!(matches!(next_event(&mut events).await, Some(SessionEvent::Open)));

    drop(server);
    assert!(matches!(next_event(&mut events).await, Some(SessionEvent::Closed)));
    session.closed().await;
    assert_eq!(session.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn loopback_transport_acknowledges_setup() {
    let (tx, mut events) = mpsc::unbounded_channel();
    let session = LiveSession::open(
        Arc::new(woosh_live_core::LoopbackTransport),
        config(Duration::from_secs(2)),
        tx,
    );
    assert!(matches!(next_event(&mut events).await, Some(SessionEvent::Open)));
    session.send_audio_frame(frame(5, 0)).unwrap();
    session.close();
    assert!(matches!(next_event(&mut events).await, Some(SessionEvent::Closed)));
}

#[tokio::test]
async fn inbound_events_flow_while_the_transport_writer_is_stalled() {
    // Room for one frame; the server then stops reading.
    let (transport, mut server) = scripted_with_capacity(1);
    let (tx, mut events) = mpsc::unbounded_channel();
    let session = LiveSession::open(transport, config(Duration::from_secs(2)), tx);
    server.accept().await;
    assert!(matches!(next_event(&mut events).await, Some(SessionEvent::Open)));

    for seq in 0..3 {
        session.send_audio_frame(frame(seq as i16, seq)).unwrap();
    }
    tokio::time::timeout(Duration::from_secs(2), async {
        while session.frames_sent() < 1 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("first frame written");

    server.send(interrupted()).await;
    match next_event(&mut events).await {
        Some(SessionEvent::Message(event)) => assert!(event.interrupted),
        other => panic!("expected the interruption, got {other:?}"),
    }
    server.send(speech(0.1)).await;
    match next_event(&mut events).await {
        Some(SessionEvent::Message(event)) => assert!(event.audio.is_some()),
        other => panic!("expected speech, got {other:?}"),
    }
    assert_eq!(session.frames_sent(), 1);

    // Closing does not wait on the stuck writer.
    session.close();
    assert!(matches!(next_event(&mut events).await, Some(SessionEvent::Closed)));
    session.closed().await;
    assert_eq!(session.state(), ConnectionState::Closed);
}
