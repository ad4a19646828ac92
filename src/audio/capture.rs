//! Microphone capture.
//!
//! Frames are produced on a dedicated capture thread that exclusively owns
//! the cpal stream; the session never touches the device handle. Capture is
//! fixed at 16 kHz mono s16le to match the backend exactly, so no
//! resampling happens here.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use log::{debug, error, info};
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::SessionError;
use crate::protocol::SAMPLE_RATE;

/// One slice of captured audio, immutable once produced.
///
/// Native capture yields raw PCM s16le bytes; browser-style hosts may feed
/// compressed container chunks through the same type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    data: Vec<u8>,
}

impl AudioFrame {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

impl From<Vec<u8>> for AudioFrame {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

pub type FrameCallback = Box<dyn Fn(AudioFrame) + Send + 'static>;

/// Continuous microphone capture with idempotent start/stop.
pub trait AudioCaptureSource: Send + Sync {
    /// Begin capture, invoking `on_frame` for every produced frame until
    /// `stop` is called. A second `start` while running is a no-op.
    ///
    /// Fails synchronously with `DeviceUnavailable` if the microphone
    /// cannot be acquired, releasing anything it grabbed first.
    fn start(&self, on_frame: FrameCallback) -> Result<(), SessionError>;

    /// Halt capture and release the device. No-op when not running.
    fn stop(&self);
}

struct CaptureWorker {
    stop_tx: mpsc::Sender<()>,
    join_handle: JoinHandle<()>,
}

/// `AudioCaptureSource` backed by the default cpal input device.
pub struct CpalCaptureSource {
    worker: Mutex<Option<CaptureWorker>>,
}

impl CpalCaptureSource {
    pub fn new() -> Self {
        Self {
            worker: Mutex::new(None),
        }
    }
}

impl Default for CpalCaptureSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioCaptureSource for CpalCaptureSource {
    fn start(&self, on_frame: FrameCallback) -> Result<(), SessionError> {
        let mut worker = self.worker.lock().unwrap();
        if worker.is_some() {
            debug!("capture already running, ignoring start");
            return Ok(());
        }

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<(), String>>();

        // The cpal stream is !Send, so a dedicated thread owns it for the
        // whole capture lifetime and drops it on stop.
        let join_handle = std::thread::spawn(move || {
            let result = (|| -> Result<(), String> {
                let host = cpal::default_host();
                let device = host
                    .default_input_device()
                    .ok_or_else(|| "no input device available".to_string())?;
                let name = device.name().unwrap_or_else(|_| "unknown".to_string());

                let sample_format = device
                    .default_input_config()
                    .map_err(|e| e.to_string())?
                    .sample_format();
                let config = StreamConfig {
                    channels: 1,
                    sample_rate: SampleRate(SAMPLE_RATE),
                    buffer_size: cpal::BufferSize::Default,
                };

                let stream = build_stream(&device, &config, sample_format, on_frame)?;
                stream.play().map_err(|e| e.to_string())?;
                info!("capture started on '{}' at {} Hz mono", name, SAMPLE_RATE);
                let _ = ready_tx.send(Ok(()));

                let _ = stop_rx.recv();
                drop(stream);
                debug!("capture stream released");
                Ok(())
            })();

            if let Err(err) = result {
                let _ = ready_tx.send(Err(err));
            }
        });

        match ready_rx.recv_timeout(Duration::from_secs(3)) {
            Ok(Ok(())) => {
                *worker = Some(CaptureWorker {
                    stop_tx,
                    join_handle,
                });
                Ok(())
            }
            Ok(Err(err)) => {
                let _ = join_handle.join();
                error!("failed to start capture: {}", err);
                Err(SessionError::DeviceUnavailable(err))
            }
            Err(_) => {
                let _ = stop_tx.send(());
                let _ = join_handle.join();
                error!("timed out starting capture");
                Err(SessionError::DeviceUnavailable(
                    "timed out opening audio stream".to_string(),
                ))
            }
        }
    }

    fn stop(&self) {
        let mut worker = self.worker.lock().unwrap();
        if let Some(w) = worker.take() {
            let _ = w.stop_tx.send(());
            let _ = w.join_handle.join();
            info!("capture stopped");
        }
    }
}

fn build_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    on_frame: FrameCallback,
) -> Result<cpal::Stream, String> {
    let err_fn = |err| error!("audio stream error: {}", err);

    match sample_format {
        SampleFormat::F32 => device
            .build_input_stream(
                config,
                move |data: &[f32], _| {
                    let mut bytes = Vec::with_capacity(data.len() * 2);
                    for &sample in data {
                        let s = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
                        bytes.extend_from_slice(&s.to_le_bytes());
                    }
                    on_frame(AudioFrame::new(bytes));
                },
                err_fn,
                None,
            )
            .map_err(|e| e.to_string()),
        SampleFormat::I16 => device
            .build_input_stream(
                config,
                move |data: &[i16], _| {
                    let mut bytes = Vec::with_capacity(data.len() * 2);
                    for &sample in data {
                        bytes.extend_from_slice(&sample.to_le_bytes());
                    }
                    on_frame(AudioFrame::new(bytes));
                },
                err_fn,
                None,
            )
            .map_err(|e| e.to_string()),
        SampleFormat::U16 => device
            .build_input_stream(
                config,
                move |data: &[u16], _| {
                    let mut bytes = Vec::with_capacity(data.len() * 2);
                    for &sample in data {
                        let s = (sample as i32 - 32768) as i16;
                        bytes.extend_from_slice(&s.to_le_bytes());
                    }
                    on_frame(AudioFrame::new(bytes));
                },
                err_fn,
                None,
            )
            .map_err(|e| e.to_string()),
        other => Err(format!("unsupported sample format: {:?}", other)),
    }
}
