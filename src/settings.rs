use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_GRACE_PERIOD_MS: u64 = 500;

/// Audio formats accepted by the speech backend.
///
/// Native capture paths send raw PCM with a declared format; browser hosts
/// send compressed container chunks and let the backend sniff them. The two
/// paths are configured distinctly and are not interchangeable.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    PcmS16le,
    Auto,
}

impl AudioFormat {
    pub fn wire_name(self) -> &'static str {
        match self {
            AudioFormat::PcmS16le => "pcm_s16le",
            AudioFormat::Auto => "auto",
        }
    }
}

/// User-tunable configuration for a transcription session.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SessionSettings {
    /// Language hints passed verbatim to the backend.
    pub language_hints: Vec<String>,
    /// Optional free-text vocabulary context passed verbatim when set.
    pub word_context: Option<String>,
    pub audio_format: AudioFormat,
    pub enable_endpoint_detection: bool,
    /// How long to keep the session open after a stop, waiting for trailing
    /// final tokens.
    pub grace_period_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            language_hints: default_language_hints(),
            word_context: None,
            audio_format: AudioFormat::PcmS16le,
            enable_endpoint_detection: true,
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
        }
    }
}

impl SessionSettings {
    /// Language hints with the empty list falling back to English.
    pub fn language_hints_or_default(&self) -> Vec<String> {
        if self.language_hints.is_empty() {
            vec!["en".to_string()]
        } else {
            self.language_hints.clone()
        }
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

fn default_language_hints() -> Vec<String> {
    ["en", "zh", "es", "fr", "de", "ja", "ko"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
