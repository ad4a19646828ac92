//! Core engine for Ramble's real-time voice-to-text clients.
//!
//! A recording attempt runs as a single transcription session: audio starts
//! buffering before the backend connection is up, streams live once the
//! handshake completes, and a stop keeps the connection open briefly so
//! trailing recognition results are not lost. Host integrations consume
//! [`session::SessionEvent`]s and apply them to their text surface through
//! one of the reconcilers.

pub mod audio;
pub mod auth;
pub mod error;
pub mod logging;
pub mod protocol;
pub mod session;
pub mod settings;
pub mod transport;

pub use audio::{AudioCaptureSource, AudioFrame, CpalCaptureSource};
pub use auth::{HttpTokenIssuer, StreamToken, TokenError, TokenIssuer};
pub use error::SessionError;
pub use session::{
    AppendTranscript, CursorReconciler, DictationManager, SessionEvent, SessionHandle,
    SessionState, TranscriptionSession,
};
pub use settings::{AudioFormat, SessionSettings};
pub use transport::{TransportConnector, WebSocketConnector};
