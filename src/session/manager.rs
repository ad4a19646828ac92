//! Recording orchestration: one microphone, one session.
//!
//! `DictationManager` owns the capture source and a session handle and
//! keeps them in lockstep: capture starts before the connection attempt so
//! the prebuffer catches leading speech, and any session error stops the
//! microphone and tears the session down without waiting for the host.

use log::{info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::audio::AudioCaptureSource;
use crate::auth::TokenIssuer;
use crate::error::SessionError;
use crate::session::controller::{SessionEvent, SessionHandle, TranscriptionSession};
use crate::settings::SessionSettings;
use crate::transport::TransportConnector;

pub struct DictationManager {
    capture: Arc<dyn AudioCaptureSource>,
    session: SessionHandle,
}

impl DictationManager {
    /// Wire a capture source to a freshly spawned session and return the
    /// manager plus the session's event stream.
    ///
    /// Error events additionally stop capture and disconnect the session
    /// before reaching the caller, so hosts only need to render them.
    pub fn new(
        capture: Arc<dyn AudioCaptureSource>,
        issuer: Arc<dyn TokenIssuer>,
        connector: Arc<dyn TransportConnector>,
        settings: SessionSettings,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (session, mut session_events) = TranscriptionSession::spawn(settings, issuer, connector);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let pump_capture = capture.clone();
        let pump_session = session.clone();
        tokio::spawn(async move {
            while let Some(event) = session_events.recv().await {
                if let SessionEvent::Error(ref error) = event {
                    warn!("session error, stopping recording: {}", error);
                    pump_capture.stop();
                    pump_session.disconnect();
                }
                if matches!(event, SessionEvent::Disconnected) {
                    pump_capture.stop();
                }
                if event_tx.send(event).is_err() {
                    break;
                }
            }
        });

        (Self { capture, session }, event_rx)
    }

    /// Begin a recording attempt: arm the prebuffer, start the microphone,
    /// then kick off the connection handshake in the background.
    ///
    /// If the microphone cannot be acquired, the session attempt is rolled
    /// back and no connection is made.
    pub fn start_recording(&self) -> Result<(), SessionError> {
        self.session.start_buffering();

        let session = self.session.clone();
        if let Err(error) = self
            .capture
            .start(Box::new(move |frame| session.send_audio(frame)))
        {
            self.session.disconnect();
            return Err(error);
        }

        self.session.connect();
        info!("recording started");
        Ok(())
    }

    /// Stop the microphone and let the session run out its grace period for
    /// trailing tokens.
    pub fn stop_recording(&self) {
        self.capture.stop();
        self.session.stop();
        info!("recording stopped, awaiting trailing tokens");
    }

    /// Abandon the attempt immediately: no grace period, no finalization.
    pub fn cancel_recording(&self) {
        self.capture.stop();
        self.session.disconnect();
        info!("recording cancelled");
    }

    pub fn session(&self) -> &SessionHandle {
        &self.session
    }
}
