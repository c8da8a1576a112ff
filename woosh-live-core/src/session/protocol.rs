//! JSON wire types for the live service's bidirectional stream.
//!
//! ```text
//! client -> {"setup": {...}}                       once, first message
//! server -> {"setupComplete": {}}                  handshake acknowledgment
//! client -> {"realtimeInput": {"mediaChunks": [..]}}  one per audio frame
//! server -> {"serverContent": {...}}               speech, interruption, turn end
//! ```

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    buffering::frame::AudioFrame,
    codec::{decode_transport, encode_transport, parse_pcm_rate},
    playback::InboundAudioChunk,
};

/// Text-safe audio payload: base64 PCM plus its MIME tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportPacket {
    pub mime_type: String,
    pub data: String,
}

impl TransportPacket {
    pub fn from_frame(frame: &AudioFrame) -> Self {
        let (bytes, mime_type) = frame.to_pcm_bytes();
        Self {
            mime_type,
            data: encode_transport(&bytes),
        }
    }
}

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(Setup),
    RealtimeInput(RealtimeInput),
}

impl ClientMessage {
    pub fn audio(frame: &AudioFrame) -> Self {
        ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![TransportPacket::from_frame(frame)],
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    /// Fully qualified model name, `models/<id>`.
    pub model: String,
    pub generation_config: GenerationConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<Modality>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speech_config: Option<SpeechConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Modality {
    Audio,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

impl SpeechConfig {
    pub fn prebuilt(voice: impl Into<String>) -> Self {
        Self {
            voice_config: VoiceConfig {
                prebuilt_voice_config: PrebuiltVoiceConfig {
                    voice_name: voice.into(),
                },
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            parts: vec![Part {
                text: Some(text.into()),
                inline_data: None,
            }],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<TransportPacket>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    pub media_chunks: Vec<TransportPacket>,
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub setup_complete: Option<SetupComplete>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_content: Option<ServerContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub go_away: Option<GoAway>,
}

impl ServerMessage {
    pub fn setup_complete() -> Self {
        Self {
            setup_complete: Some(SetupComplete {}),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupComplete {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_turn: Option<Content>,
    #[serde(default)]
    pub interrupted: bool,
    #[serde(default)]
    pub turn_complete: bool,
}

/// Notice that the server will drop the connection soon.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoAway {
    #[serde(default)]
    pub time_left: Option<String>,
}

/// One inbound message reduced to what the audio path needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerEvent {
    pub audio: Option<InboundAudioChunk>,
    pub interrupted: bool,
    pub turn_complete: bool,
}

impl ServerContent {
    /// Concatenate the inline audio parts (in part order) into one chunk
    /// tagged with `turn`. Parts that fail to decode are logged and skipped.
    pub fn into_event(self, turn: u64) -> ServerEvent {
        let mut data = Vec::new();
        let mut sample_rate = None;

        let parts = self.model_turn.map(|c| c.parts).unwrap_or_default();
        for part in parts {
            let Some(blob) = part.inline_data else {
                continue;
            };
            if !blob.mime_type.starts_with("audio/") {
                continue;
            }
            match decode_transport(&blob.data) {
                Ok(bytes) => {
                    sample_rate = sample_rate.or_else(|| parse_pcm_rate(&blob.mime_type));
                    data.extend_from_slice(&bytes);
                }
                Err(e) => warn!(turn, "skipping inline audio part: {e}"),
            }
        }

        ServerEvent {
            audio: (!data.is_empty()).then_some(InboundAudioChunk {
                data,
                sample_rate,
                turn,
            }),
            interrupted: self.interrupted,
            turn_complete: self.turn_complete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn setup_serializes_to_wire_shape() {
        let msg = ClientMessage::Setup(Setup {
            model: "models/test-model".into(),
            generation_config: GenerationConfig {
                response_modalities: vec![Modality::Audio],
                speech_config: Some(SpeechConfig::prebuilt("Kore")),
            },
            system_instruction: Some(Content::text("be brief")),
        });

        let json = serde_json::to_value(&msg).expect("serialize setup");
        assert_eq!(json["setup"]["model"], "models/test-model");
        assert_eq!(json["setup"]["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            json["setup"]["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
                ["voiceName"],
            "Kore"
        );
        assert_eq!(json["setup"]["systemInstruction"]["parts"][0]["text"], "be brief");
        assert!(json["setup"]["systemInstruction"]["parts"][0]
            .get("inlineData")
            .is_none());
    }

    #[test]
    fn audio_frame_becomes_realtime_input() {
        let frame = AudioFrame::new(vec![1, -1], 16_000, 0);
        let json = serde_json::to_value(ClientMessage::audio(&frame)).expect("serialize input");
        let chunk = &json["realtimeInput"]["mediaChunks"][0];
        assert_eq!(chunk["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(
            decode_transport(chunk["data"].as_str().unwrap()).unwrap(),
            vec![1, 0, 0xff, 0xff]
        );
    }

    #[test]
    fn parses_setup_complete_and_server_content() {
        let ack: ServerMessage = serde_json::from_str(r#"{"setupComplete":{}}"#).unwrap();
        assert!(ack.setup_complete.is_some());
        assert!(ack.server_content.is_none());

        let raw = r#"{"serverContent":{"modelTurn":{"parts":[
            {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AQACAA=="}},
            {"text":"ignored"},
            {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AwA="}}
        ]},"interrupted":true,"turnComplete":false,"unknownField":1}}"#;
        let msg: ServerMessage = serde_json::from_str(raw).unwrap();
        let event = msg.server_content.unwrap().into_event(4);
        let audio = event.audio.unwrap();
        assert_eq!(audio.data, vec![1, 0, 2, 0, 3, 0]);
        assert_eq!(audio.sample_rate, Some(24_000));
        assert_eq!(audio.turn, 4);
        assert!(event.interrupted);
        assert!(!event.turn_complete);
    }

    #[test]
    fn interruption_without_audio_has_no_chunk() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"serverContent":{"interrupted":true}}"#).unwrap();
        let event = msg.server_content.unwrap().into_event(0);
        assert!(event.audio.is_none());
        assert!(event.interrupted);
    }

    #[test]
    fn bad_base64_part_is_skipped() {
        let content = ServerContent {
            model_turn: Some(Content {
                parts: vec![
                    Part {
                        text: None,
                        inline_data: Some(TransportPacket {
                            mime_type: "audio/pcm".into(),
                            data: "%%%".into(),
                        }),
                    },
                    Part {
                        text: None,
                        inline_data: Some(TransportPacket {
                            mime_type: "audio/pcm".into(),
                            data: encode_transport(&[9, 0]),
                        }),
                    },
                ],
            }),
            ..ServerContent::default()
        };
        let audio = content.into_event(0).audio.unwrap();
        assert_eq!(audio.data, vec![9, 0]);
        assert_eq!(audio.sample_rate, None);
    }
}
