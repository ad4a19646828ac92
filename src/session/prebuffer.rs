//! Audio buffered between record-start and transport-open.
//!
//! Capture starts before the connection handshake completes so no speech is
//! lost; everything produced in that window is replayed over the transport
//! in capture order the moment the session reaches Streaming.

use std::collections::VecDeque;

use crate::audio::AudioFrame;

/// FIFO holding pre-connection audio for exactly one buffering epoch.
///
/// Drain is destructive and one-shot: frames appended after a drain are
/// dropped until `arm` starts a new epoch.
#[derive(Debug, Default)]
pub struct AudioPrebuffer {
    frames: VecDeque<AudioFrame>,
    armed: bool,
}

impl AudioPrebuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Begin a fresh buffering epoch, discarding anything held.
    pub fn arm(&mut self) {
        self.frames.clear();
        self.armed = true;
    }

    /// Append a frame if the buffer is armed; otherwise the frame is
    /// dropped (capture may race slightly past a drain or disconnect).
    pub fn append(&mut self, frame: AudioFrame) {
        if self.armed {
            self.frames.push_back(frame);
        }
    }

    /// Remove and return all buffered frames in append order, ending the
    /// current epoch.
    pub fn drain_in_order(&mut self) -> Vec<AudioFrame> {
        self.armed = false;
        self.frames.drain(..).collect()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.armed = false;
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
