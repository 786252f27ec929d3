//! Translation of frames received from the network into messages.

use serde::Serialize;

use crate::command::Bucket;
use crate::config::{ReceiverConfig, ReceiverOutput};
use crate::frame::CHANNEL_COUNT;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ReceivedMessage {
    Raw(Vec<u8>),
    Buckets { buckets: Vec<Bucket> },
}

pub struct FrameReceiver {
    config: ReceiverConfig,
    last: Option<Vec<u8>>,
}

impl FrameReceiver {
    pub fn new(config: ReceiverConfig) -> Self {
        Self { config, last: None }
    }

    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    /// Turns an incoming frame into a message, or `None` when it repeats the
    /// previous frame and `always_emit` is off.
    pub fn receive(&mut self, data: &[u8]) -> Option<ReceivedMessage> {
        let data = &data[..data.len().min(CHANNEL_COUNT)];
        if !self.config.always_emit && self.last.as_deref() == Some(data) {
            return None;
        }
        self.last = Some(data.to_vec());

        Some(match self.config.output {
            ReceiverOutput::Raw => ReceivedMessage::Raw(data.to_vec()),
            ReceiverOutput::Buckets => ReceivedMessage::Buckets {
                buckets: data
                    .iter()
                    .enumerate()
                    .map(|(i, v)| Bucket::new(i as i64 + 1, i64::from(*v)))
                    .collect(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn repeated_frames_are_suppressed() {
        let mut receiver = FrameReceiver::new(ReceiverConfig::default());
        assert_eq!(
            receiver.receive(&[1, 2, 3]),
            Some(ReceivedMessage::Raw(vec![1, 2, 3]))
        );
        assert_eq!(receiver.receive(&[1, 2, 3]), None);
        assert!(receiver.receive(&[1, 2, 4]).is_some());
    }

    #[test]
    fn always_emit_forwards_duplicates() {
        let mut receiver = FrameReceiver::new(ReceiverConfig {
            always_emit: true,
            ..ReceiverConfig::default()
        });
        assert!(receiver.receive(&[0; 4]).is_some());
        assert!(receiver.receive(&[0; 4]).is_some());
    }

    #[test]
    fn bucket_output_is_one_based() {
        let mut receiver = FrameReceiver::new(ReceiverConfig {
            output: ReceiverOutput::Buckets,
            ..ReceiverConfig::default()
        });
        let message = receiver.receive(&[10, 0]).unwrap();
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"buckets": [{"channel": 1, "value": 10}, {"channel": 2, "value": 0}]})
        );
    }
}
