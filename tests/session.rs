//! End-to-end session behavior against an in-memory transport and token
//! issuer. Time-sensitive cases run with paused time so grace periods
//! elapse deterministically.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, timeout};

use ramble_core::audio::{AudioCaptureSource, AudioFrame, FrameCallback};
use ramble_core::auth::{StreamToken, TokenError, TokenIssuer};
use ramble_core::error::SessionError;
use ramble_core::session::{DictationManager, SessionEvent, TranscriptionSession};
use ramble_core::settings::SessionSettings;
use ramble_core::transport::{
    Incoming, TransportConnector, TransportError, TransportSink, TransportStream,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Sent {
    Text(String),
    Binary(Vec<u8>),
}

struct RecordingSink {
    sent: Arc<Mutex<Vec<Sent>>>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl TransportSink for RecordingSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(Sent::Text(text));
        Ok(())
    }

    async fn send_binary(&mut self, data: Vec<u8>) -> Result<(), TransportError> {
        self.sent.lock().unwrap().push(Sent::Binary(data));
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct ChannelStream {
    rx: mpsc::UnboundedReceiver<Result<Incoming, TransportError>>,
}

#[async_trait]
impl TransportStream for ChannelStream {
    async fn next_message(&mut self) -> Option<Result<Incoming, TransportError>> {
        self.rx.recv().await
    }
}

/// Test-side handle to one scripted connection: releases the pending
/// connect, feeds inbound messages, and inspects outbound traffic.
struct TestConnection {
    release: Option<oneshot::Sender<()>>,
    sent: Arc<Mutex<Vec<Sent>>>,
    closes: Arc<AtomicUsize>,
    inbound: mpsc::UnboundedSender<Result<Incoming, TransportError>>,
}

impl TestConnection {
    fn release(&mut self) {
        if let Some(tx) = self.release.take() {
            let _ = tx.send(());
        }
    }

    fn feed_text(&self, raw: &str) {
        let _ = self.inbound.send(Ok(Incoming::Text(raw.to_string())));
    }

    fn feed_close(&self) {
        let _ = self.inbound.send(Ok(Incoming::Closed));
    }

    fn feed_error(&self, message: &str) {
        let _ = self.inbound.send(Err(TransportError(message.to_string())));
    }

    fn sent_items(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

struct Prepared {
    gate: oneshot::Receiver<()>,
    sink: Box<dyn TransportSink>,
    stream: Box<dyn TransportStream>,
}

/// Connector handing out pre-scripted connections in order. `connect`
/// blocks until the test releases the corresponding `TestConnection`.
#[derive(Default)]
struct MockConnector {
    queue: Mutex<VecDeque<Prepared>>,
}

impl MockConnector {
    fn prepare(&self) -> TestConnection {
        let (release_tx, gate) = oneshot::channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));
        let closes = Arc::new(AtomicUsize::new(0));

        self.queue.lock().unwrap().push_back(Prepared {
            gate,
            sink: Box::new(RecordingSink {
                sent: sent.clone(),
                closes: closes.clone(),
            }),
            stream: Box::new(ChannelStream { rx: inbound_rx }),
        });

        TestConnection {
            release: Some(release_tx),
            sent,
            closes,
            inbound: inbound_tx,
        }
    }
}

#[async_trait]
impl TransportConnector for MockConnector {
    async fn connect(
        &self,
        _url: &str,
    ) -> Result<(Box<dyn TransportSink>, Box<dyn TransportStream>), TransportError> {
        let prepared = self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| TransportError("no scripted connection".to_string()))?;
        let _ = prepared.gate.await;
        Ok((prepared.sink, prepared.stream))
    }
}

struct StaticIssuer;

#[async_trait]
impl TokenIssuer for StaticIssuer {
    async fn issue(&self) -> Result<StreamToken, TokenError> {
        Ok(StreamToken {
            token: "stream-key".to_string(),
            websocket_url: "wss://mock.test/ws".to_string(),
        })
    }

    async fn refresh_credentials(&self) -> Result<(), TokenError> {
        Ok(())
    }
}

struct DenyingIssuer;

#[async_trait]
impl TokenIssuer for DenyingIssuer {
    async fn issue(&self) -> Result<StreamToken, TokenError> {
        Err(TokenError::AccessDenied("Please subscribe.".to_string()))
    }

    async fn refresh_credentials(&self) -> Result<(), TokenError> {
        Ok(())
    }
}

struct MockCapture {
    fail: bool,
    stops: AtomicUsize,
    callback: Mutex<Option<FrameCallback>>,
}

impl MockCapture {
    fn new(fail: bool) -> Self {
        Self {
            fail,
            stops: AtomicUsize::new(0),
            callback: Mutex::new(None),
        }
    }

    fn emit(&self, frame: AudioFrame) {
        if let Some(cb) = self.callback.lock().unwrap().as_ref() {
            cb(frame);
        }
    }
}

impl AudioCaptureSource for MockCapture {
    fn start(&self, on_frame: FrameCallback) -> Result<(), SessionError> {
        if self.fail {
            return Err(SessionError::DeviceUnavailable("mic busy".to_string()));
        }
        *self.callback.lock().unwrap() = Some(on_frame);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

fn settings(grace_ms: u64) -> SessionSettings {
    SessionSettings {
        language_hints: vec!["en".to_string()],
        grace_period_ms: grace_ms,
        ..SessionSettings::default()
    }
}

fn frame(byte: u8) -> AudioFrame {
    AudioFrame::new(vec![byte])
}

async fn expect_event(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for session event")
        .expect("event channel closed")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test(start_paused = true)]
async fn test_prebuffered_audio_flushes_in_order_after_handshake() {
    let connector = Arc::new(MockConnector::default());
    let mut conn = connector.prepare();
    let (session, mut events) =
        TranscriptionSession::spawn(settings(500), Arc::new(StaticIssuer), connector);

    session.start_buffering();
    for b in 1..=3u8 {
        session.send_audio(frame(b));
    }
    session.connect();
    // Still connecting: these land in the prebuffer behind the first three.
    session.send_audio(frame(4));
    session.send_audio(frame(5));

    conn.release();
    assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);

    // Now streaming: goes straight to the transport.
    session.send_audio(frame(6));
    wait_until(|| conn.sent_items().len() == 7).await;

    let sent = conn.sent_items();
    let Sent::Text(handshake) = &sent[0] else {
        panic!("first message must be the configuration handshake");
    };
    let config: serde_json::Value = serde_json::from_str(handshake).unwrap();
    assert_eq!(config["api_key"], "stream-key");
    assert_eq!(config["model"], "stt-rt-v3");
    assert_eq!(config["audio_format"], "pcm_s16le");
    assert_eq!(config["sample_rate"], 16000);

    let binaries: Vec<Vec<u8>> = sent[1..]
        .iter()
        .map(|s| match s {
            Sent::Binary(data) => data.clone(),
            Sent::Text(_) => panic!("unexpected text after handshake"),
        })
        .collect();
    assert_eq!(binaries, vec![vec![1], vec![2], vec![3], vec![4], vec![5], vec![6]]);
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_invalidates_inflight_connect() {
    let connector = Arc::new(MockConnector::default());
    let mut conn = connector.prepare();
    let (session, mut events) =
        TranscriptionSession::spawn(settings(500), Arc::new(StaticIssuer), connector);

    session.start_buffering();
    session.send_audio(frame(1));
    session.connect();
    session.disconnect();
    assert_eq!(expect_event(&mut events).await, SessionEvent::Disconnected);

    // The connect completing now is stale: the transport is released
    // untouched, no handshake, no Connected event.
    conn.release();
    wait_until(|| conn.close_count() == 1).await;
    assert!(conn.sent_items().is_empty());
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_connect_completing_during_grace_still_flushes() {
    let connector = Arc::new(MockConnector::default());
    let mut conn = connector.prepare();
    let (session, mut events) =
        TranscriptionSession::spawn(settings(500), Arc::new(StaticIssuer), connector);

    session.start_buffering();
    session.send_audio(frame(7));
    session.connect();
    session.stop();

    // The stop only started the grace window; a connect completing inside
    // it still delivers the buffered audio.
    conn.release();
    assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);
    wait_until(|| conn.sent_items().len() == 2).await;

    assert_eq!(expect_event(&mut events).await, SessionEvent::Finalized);
    assert_eq!(expect_event(&mut events).await, SessionEvent::Disconnected);
    wait_until(|| conn.close_count() == 1).await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_finalizes_after_grace_period() {
    let connector = Arc::new(MockConnector::default());
    let mut conn = connector.prepare();
    let (session, mut events) =
        TranscriptionSession::spawn(settings(500), Arc::new(StaticIssuer), connector);

    session.start_buffering();
    session.connect();
    conn.release();
    assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);

    session.stop();
    assert_eq!(expect_event(&mut events).await, SessionEvent::Finalized);
    assert_eq!(expect_event(&mut events).await, SessionEvent::Disconnected);
    wait_until(|| conn.close_count() == 1).await;
}

#[tokio::test(start_paused = true)]
async fn test_late_final_words_restart_grace_and_finalize_once() {
    let connector = Arc::new(MockConnector::default());
    let mut conn = connector.prepare();
    let (session, mut events) =
        TranscriptionSession::spawn(settings(500), Arc::new(StaticIssuer), connector);

    session.start_buffering();
    session.connect();
    conn.release();
    assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);

    session.stop();
    conn.feed_text(r#"{"tokens":[{"text":"late words","is_final":true}]}"#);

    assert_eq!(
        expect_event(&mut events).await,
        SessionEvent::FinalWords("late words".to_string())
    );
    assert_eq!(
        expect_event(&mut events).await,
        SessionEvent::ProvisionalWords(String::new())
    );
    // Both the superseded and the restarted timer fire; teardown happens
    // exactly once.
    assert_eq!(expect_event(&mut events).await, SessionEvent::Finalized);
    assert_eq!(expect_event(&mut events).await, SessionEvent::Disconnected);
    wait_until(|| conn.close_count() == 1).await;
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_final_batch_without_provisional_clears_display() {
    let connector = Arc::new(MockConnector::default());
    let mut conn = connector.prepare();
    let (session, mut events) =
        TranscriptionSession::spawn(settings(500), Arc::new(StaticIssuer), connector);

    session.start_buffering();
    session.connect();
    conn.release();
    assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);

    conn.feed_text(
        r#"{"tokens":[{"text":"hello ","is_final":true},{"text":"wor","is_final":false}]}"#,
    );
    assert_eq!(
        expect_event(&mut events).await,
        SessionEvent::FinalWords("hello ".to_string())
    );
    assert_eq!(
        expect_event(&mut events).await,
        SessionEvent::ProvisionalWords("wor".to_string())
    );

    // The provisional run was promoted wholesale: the batch has final text
    // only, so the stale "wor" display must be cleared explicitly.
    conn.feed_text(r#"{"tokens":[{"text":"world","is_final":true}]}"#);
    assert_eq!(
        expect_event(&mut events).await,
        SessionEvent::FinalWords("world".to_string())
    );
    assert_eq!(
        expect_event(&mut events).await,
        SessionEvent::ProvisionalWords(String::new())
    );
}

#[tokio::test(start_paused = true)]
async fn test_backend_error_surfaces_and_leaves_teardown_to_owner() {
    let connector = Arc::new(MockConnector::default());
    let mut conn = connector.prepare();
    let (session, mut events) =
        TranscriptionSession::spawn(settings(500), Arc::new(StaticIssuer), connector);

    session.start_buffering();
    session.connect();
    conn.release();
    assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);

    conn.feed_text(r#"{"error":"quota exceeded"}"#);
    assert_eq!(
        expect_event(&mut events).await,
        SessionEvent::Error(SessionError::Backend("quota exceeded".to_string()))
    );
    // No teardown yet; the owner decides.
    assert!(events.try_recv().is_err());

    session.disconnect();
    assert_eq!(expect_event(&mut events).await, SessionEvent::Disconnected);
    wait_until(|| conn.close_count() == 1).await;
}

#[tokio::test(start_paused = true)]
async fn test_malformed_inbound_messages_are_ignored() {
    let connector = Arc::new(MockConnector::default());
    let mut conn = connector.prepare();
    let (session, mut events) =
        TranscriptionSession::spawn(settings(500), Arc::new(StaticIssuer), connector);

    session.start_buffering();
    session.connect();
    conn.release();
    assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);

    conn.feed_text("definitely not json");
    conn.feed_text(r#"{"tokens":[{"text":"<end>","is_final":true}]}"#);
    conn.feed_text(r#"{"tokens":[{"text":"ok","is_final":true}]}"#);

    // The garbage and the marker-only batch produce nothing; the session
    // keeps running and delivers the next real batch.
    assert_eq!(
        expect_event(&mut events).await,
        SessionEvent::FinalWords("ok".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn test_server_close_tears_down_without_error() {
    let connector = Arc::new(MockConnector::default());
    let mut conn = connector.prepare();
    let (session, mut events) =
        TranscriptionSession::spawn(settings(500), Arc::new(StaticIssuer), connector);

    session.start_buffering();
    session.connect();
    conn.release();
    assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);

    conn.feed_close();
    assert_eq!(expect_event(&mut events).await, SessionEvent::Disconnected);
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_transport_failure_is_terminal() {
    let connector = Arc::new(MockConnector::default());
    let mut conn = connector.prepare();
    let (session, mut events) =
        TranscriptionSession::spawn(settings(500), Arc::new(StaticIssuer), connector);

    session.start_buffering();
    session.connect();
    conn.release();
    assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);

    conn.feed_error("connection reset");
    assert_eq!(
        expect_event(&mut events).await,
        SessionEvent::Error(SessionError::Transport("connection reset".to_string()))
    );
    assert_eq!(expect_event(&mut events).await, SessionEvent::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_token_denial_closes_the_attempt() {
    let connector = Arc::new(MockConnector::default());
    let (session, mut events) =
        TranscriptionSession::spawn(settings(500), Arc::new(DenyingIssuer), connector);

    session.start_buffering();
    session.connect();

    assert_eq!(
        expect_event(&mut events).await,
        SessionEvent::Error(SessionError::TokenAcquisition("Please subscribe.".to_string()))
    );
    assert_eq!(expect_event(&mut events).await, SessionEvent::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_session_is_reusable_after_close() {
    let connector = Arc::new(MockConnector::default());
    let mut first = connector.prepare();
    let mut second = connector.prepare();
    let (session, mut events) =
        TranscriptionSession::spawn(settings(500), Arc::new(StaticIssuer), connector);

    session.start_buffering();
    session.connect();
    first.release();
    assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);
    session.disconnect();
    assert_eq!(expect_event(&mut events).await, SessionEvent::Disconnected);

    // Second attempt on the same handle gets a fresh prebuffer epoch.
    session.start_buffering();
    session.send_audio(frame(9));
    session.connect();
    second.release();
    assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);
    wait_until(|| second.sent_items().len() == 2).await;
    assert_eq!(second.sent_items()[1], Sent::Binary(vec![9]));
}

#[tokio::test(start_paused = true)]
async fn test_manager_streams_captured_frames() {
    let connector = Arc::new(MockConnector::default());
    let mut conn = connector.prepare();
    let capture = Arc::new(MockCapture::new(false));

    let (manager, mut events) = DictationManager::new(
        capture.clone(),
        Arc::new(StaticIssuer),
        connector,
        settings(500),
    );

    manager.start_recording().unwrap();
    capture.emit(frame(1));
    conn.release();
    assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);
    wait_until(|| conn.sent_items().len() == 2).await;
    assert_eq!(conn.sent_items()[1], Sent::Binary(vec![1]));
}

#[tokio::test(start_paused = true)]
async fn test_manager_rolls_back_when_microphone_fails() {
    let connector = Arc::new(MockConnector::default());
    let capture = Arc::new(MockCapture::new(true));

    let (manager, mut events) = DictationManager::new(
        capture,
        Arc::new(StaticIssuer),
        connector,
        settings(500),
    );

    assert_eq!(
        manager.start_recording(),
        Err(SessionError::DeviceUnavailable("mic busy".to_string()))
    );
    // The armed session attempt is rolled back; no connection is made.
    assert_eq!(expect_event(&mut events).await, SessionEvent::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn test_manager_stops_capture_on_session_error() {
    let connector = Arc::new(MockConnector::default());
    let mut conn = connector.prepare();
    let capture = Arc::new(MockCapture::new(false));

    let (manager, mut events) = DictationManager::new(
        capture.clone(),
        Arc::new(StaticIssuer),
        connector,
        settings(500),
    );

    manager.start_recording().unwrap();
    conn.release();
    assert_eq!(expect_event(&mut events).await, SessionEvent::Connected);

    conn.feed_text(r#"{"error":"quota exceeded"}"#);
    assert_eq!(
        expect_event(&mut events).await,
        SessionEvent::Error(SessionError::Backend("quota exceeded".to_string()))
    );
    assert_eq!(expect_event(&mut events).await, SessionEvent::Disconnected);
    wait_until(|| capture.stops.load(Ordering::SeqCst) >= 1).await;
}
