//! Real-time transcription session machinery.
//!
//! The controller runs the protocol state machine, the prebuffer covers the
//! capture-before-connect window, the shutdown coordinator implements the
//! trailing-token grace period, and the reconcilers turn session events
//! into host text edits.

pub mod controller;
pub mod manager;
pub mod prebuffer;
pub mod reconciler;
pub mod shutdown;

pub use controller::{SessionEvent, SessionHandle, SessionState, TranscriptionSession};
pub use manager::DictationManager;
pub use prebuffer::AudioPrebuffer;
pub use reconciler::{AppendTranscript, BufferHost, CursorReconciler, TextHost};
pub use shutdown::{ShutdownCoordinator, ShutdownPhase};
