//! Outbound seam towards the Art-Net node.

use std::sync::{Arc, Mutex};

use crate::error::TransportError;
use crate::frame::CHANNEL_COUNT;

/// Sink for complete universe frames. Implementations own their socket or
/// device; a sender releases its output through `close` on shutdown.
pub trait DmxOutput: Send {
    fn transmit(&mut self, frame: &[u8; CHANNEL_COUNT]) -> Result<(), TransportError>;

    fn close(&mut self) {}
}

/// Output that only logs what would go on the wire.
pub struct LogOutput {
    label: String,
    sequence: u8,
}

impl LogOutput {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            sequence: 0,
        }
    }
}

impl DmxOutput for LogOutput {
    fn transmit(&mut self, frame: &[u8; CHANNEL_COUNT]) -> Result<(), TransportError> {
        let lit = frame.iter().filter(|v| **v > 0).count();
        let preview: Vec<String> = frame
            .iter()
            .enumerate()
            .filter(|(_, v)| **v > 0)
            .take(8)
            .map(|(i, v)| format!("{}={}", i + 1, v))
            .collect();
        log::info!(
            "[{}] seq {:3} {} channel(s) lit: {}",
            self.label,
            self.sequence,
            lit,
            preview.join(" ")
        );
        self.sequence = self.sequence.wrapping_add(1);
        Ok(())
    }

    fn close(&mut self) {
        log::info!("[{}] output closed", self.label);
    }
}

/// Shared log of transmitted frames, cloned into a `RecordingOutput`.
#[derive(Clone, Default)]
pub struct FrameLog {
    frames: Arc<Mutex<Vec<[u8; CHANNEL_COUNT]>>>,
    closed: Arc<Mutex<bool>>,
    failures: Arc<Mutex<usize>>,
}

impl FrameLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frames(&self) -> Vec<[u8; CHANNEL_COUNT]> {
        self.frames.lock().map(|f| f.clone()).unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.frames.lock().map(|f| f.len()).unwrap_or(0)
    }

    pub fn last(&self) -> Option<[u8; CHANNEL_COUNT]> {
        self.frames.lock().ok().and_then(|f| f.last().copied())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.lock().map(|c| *c).unwrap_or(false)
    }

    /// Makes the next `count` transmits fail.
    pub fn fail_next(&self, count: usize) {
        if let Ok(mut failures) = self.failures.lock() {
            *failures = count;
        }
    }

    pub fn output(&self) -> RecordingOutput {
        RecordingOutput { log: self.clone() }
    }
}

/// In-process output recording every frame it is handed.
pub struct RecordingOutput {
    log: FrameLog,
}

impl DmxOutput for RecordingOutput {
    fn transmit(&mut self, frame: &[u8; CHANNEL_COUNT]) -> Result<(), TransportError> {
        if self.log.is_closed() {
            return Err(TransportError::Closed);
        }
        if let Ok(mut failures) = self.log.failures.lock() {
            if *failures > 0 {
                *failures -= 1;
                return Err(TransportError::Transmit("injected failure".into()));
            }
        }
        let mut frames = self
            .log
            .frames
            .lock()
            .map_err(|e| TransportError::Transmit(e.to_string()))?;
        frames.push(*frame);
        Ok(())
    }

    fn close(&mut self) {
        if let Ok(mut closed) = self.log.closed.lock() {
            *closed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_output_keeps_frames_until_closed() {
        let log = FrameLog::new();
        let mut output = log.output();
        let mut frame = [0u8; CHANNEL_COUNT];
        frame[0] = 7;
        output.transmit(&frame).unwrap();
        assert_eq!(log.count(), 1);
        assert_eq!(log.last().map(|f| f[0]), Some(7));

        output.close();
        assert!(log.is_closed());
        assert_eq!(output.transmit(&frame), Err(TransportError::Closed));
    }

    #[test]
    fn injected_failures_are_consumed() {
        let log = FrameLog::new();
        let mut output = log.output();
        log.fail_next(1);
        let frame = [0u8; CHANNEL_COUNT];
        assert!(output.transmit(&frame).is_err());
        assert!(output.transmit(&frame).is_ok());
        assert_eq!(log.count(), 1);
    }
}
