//! Wire types for the Soniox real-time WebSocket protocol.
//!
//! The first outbound message on a fresh connection is a JSON configuration
//! handshake; every following outbound message is a raw binary audio frame.
//! Inbound messages are JSON token batches or an error payload.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::settings::{AudioFormat, SessionSettings};

pub const MODEL: &str = "stt-rt-v3";
pub const SAMPLE_RATE: u32 = 16_000;
pub const NUM_CHANNELS: u16 = 1;

/// Configuration handshake, sent as the first text message after the
/// transport opens.
#[derive(Debug, Clone, Serialize)]
pub struct SessionConfig {
    pub api_key: String,
    pub model: String,
    pub audio_format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_channels: Option<u16>,
    pub language_hints: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    pub enable_endpoint_detection: bool,
}

impl SessionConfig {
    /// Build the handshake for a freshly minted streaming credential.
    ///
    /// The raw-PCM path declares its fixed format; the compressed
    /// (`auto`) path lets the backend sniff the container and therefore
    /// omits the PCM-only fields, matching the browser client.
    pub fn new(api_key: String, settings: &SessionSettings) -> Self {
        let (sample_rate, num_channels) = match settings.audio_format {
            AudioFormat::PcmS16le => (Some(SAMPLE_RATE), Some(NUM_CHANNELS)),
            AudioFormat::Auto => (None, None),
        };

        Self {
            api_key,
            model: MODEL.to_string(),
            audio_format: settings.audio_format.wire_name().to_string(),
            sample_rate,
            num_channels,
            language_hints: settings.language_hints_or_default(),
            context: settings.word_context.clone(),
            enable_endpoint_detection: settings.enable_endpoint_detection,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptToken {
    pub text: String,
    #[serde(default)]
    pub is_final: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct InboundMessage {
    #[serde(default)]
    tokens: Option<Vec<TranscriptToken>>,
    #[serde(default)]
    error: Option<String>,
}

/// A parsed inbound message, reduced to what the session acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// A token batch, already partitioned into final and provisional runs
    /// with control markers stripped. Either side may be empty.
    Tokens {
        final_text: String,
        provisional_text: String,
    },
    /// An error payload from the backend.
    Error(String),
}

// Control annotations like <end> or <comma> are backend markup, never
// literal transcript text.
static CONTROL_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

pub fn strip_control_markers(text: &str) -> String {
    CONTROL_MARKER.replace_all(text, "").into_owned()
}

/// Parse one inbound text message.
///
/// Returns `None` for malformed or unrecognized payloads; the caller logs
/// and ignores those rather than failing the session.
pub fn parse_message(raw: &str) -> Option<InboundEvent> {
    let message: InboundMessage = serde_json::from_str(raw).ok()?;

    if let Some(error) = message.error {
        return Some(InboundEvent::Error(error));
    }

    let tokens = message.tokens?;
    if tokens.is_empty() {
        return None;
    }

    let mut final_text = String::new();
    let mut provisional_text = String::new();
    for token in &tokens {
        let clean = strip_control_markers(&token.text);
        if token.is_final {
            final_text.push_str(&clean);
        } else {
            provisional_text.push_str(&clean);
        }
    }

    Some(InboundEvent::Tokens {
        final_text,
        provisional_text,
    })
}
