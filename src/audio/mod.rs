pub mod capture;

pub use capture::{AudioCaptureSource, AudioFrame, CpalCaptureSource, FrameCallback};
