//! Inbound payloads and their validation into sender actions.
//!
//! Parsing is split in two: serde turns JSON into a loosely typed `Payload`,
//! then `Payload::into_command` checks every field and produces a `Command`.
//! Nothing is applied to a frame until a `Command` exists, so a rejected
//! payload has no effect beyond the `start_buckets` the sender applies first.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use transition_curves::{ArcConfig, Curve, PanTilt, PlaybackInterval, DEFAULT_GAMMA};

use crate::error::{SenderError, ValidationError};
use crate::frame::{validate_write, CHANNEL_COUNT};
use crate::transition::Timing;

/// A `{channel, value, fill?}` entry. `fill` sets every channel in
/// `channel..=fill` to `value`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    pub channel: i64,
    pub value: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<i64>,
}

impl Bucket {
    pub fn new(channel: i64, value: i64) -> Self {
        Self {
            channel,
            value,
            fill: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandPayload {
    #[serde(default)]
    pub channel: Option<i64>,
    #[serde(default)]
    pub value: Option<i64>,
    #[serde(default)]
    pub buckets: Option<Vec<Bucket>>,
    #[serde(default)]
    pub start_buckets: Option<Vec<Bucket>>,
    #[serde(default)]
    pub transition: Option<String>,
    #[serde(default)]
    pub duration: Option<i64>,
    #[serde(default)]
    pub repeat: Option<i64>,
    #[serde(default)]
    pub gap: Option<i64>,
    #[serde(default)]
    pub hold: Option<i64>,
    #[serde(default)]
    pub mirror: Option<bool>,
    #[serde(default)]
    pub gamma: Option<f64>,
    #[serde(default)]
    pub start: Option<PanTilt>,
    #[serde(default)]
    pub end: Option<PanTilt>,
    #[serde(default)]
    pub center: Option<PanTilt>,
    #[serde(default)]
    pub arc: Option<ArcConfig>,
    #[serde(default)]
    pub interval: Option<Vec<f64>>,
    #[serde(default)]
    pub net: Option<i64>,
    #[serde(default)]
    pub subnet: Option<i64>,
    #[serde(default)]
    pub universe: Option<i64>,
}

/// Anything a sender accepts: a bare array replaces the whole frame, an
/// object carries writes and transition options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Payload {
    Frame(Vec<i64>),
    Command(CommandPayload),
}

impl Payload {
    pub fn from_json(text: &str) -> Result<Self, ValidationError> {
        serde_json::from_str(text).map_err(|e| ValidationError::Malformed(e.to_string()))
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, ValidationError> {
        serde_json::from_value(value).map_err(|e| ValidationError::Malformed(e.to_string()))
    }

    /// Optional `net`/`subnet`/`universe` routing fields.
    pub fn address(&self) -> (Option<i64>, Option<i64>, Option<i64>) {
        match self {
            Payload::Frame(_) => (None, None, None),
            Payload::Command(c) => (c.net, c.subnet, c.universe),
        }
    }

    /// Validated `start_buckets`, applied before the command itself.
    pub fn start_writes(&self) -> Result<Vec<(u16, u8)>, ValidationError> {
        match self {
            Payload::Command(CommandPayload {
                start_buckets: Some(buckets),
                ..
            }) => expand_buckets(buckets),
            _ => Ok(Vec::new()),
        }
    }

    /// Checks every field and resolves the action to run.
    pub fn into_command(&self) -> Result<Command, SenderError> {
        match self {
            Payload::Frame(values) => Ok(Command::Frame(validate_frame(values)?)),
            Payload::Command(c) => c.to_command(),
        }
    }
}

/// Transition requested by a payload's `transition` tag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransitionRequest {
    Immediate,
    Curve(Curve),
    Arc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArcCommand {
    /// Starting position; the current pan/tilt channel values when absent.
    pub start: Option<PanTilt>,
    pub end: PanTilt,
    pub center: PanTilt,
    pub config: ArcConfig,
    pub interval: PlaybackInterval,
    pub timing: Timing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Replace channels 1..=len.
    Frame(Vec<u8>),
    /// Write each channel at once, then send.
    Write(Vec<(u16, u8)>),
    /// Fade each channel from its current value.
    Fade {
        writes: Vec<(u16, u8)>,
        curve: Curve,
        timing: Timing,
    },
    Arc(ArcCommand),
    /// Only `start_buckets` were given.
    None,
}

fn validate_frame(values: &[i64]) -> Result<Vec<u8>, ValidationError> {
    values
        .iter()
        .take(CHANNEL_COUNT)
        .enumerate()
        .map(|(i, v)| validate_write(i as i64 + 1, *v).map(|(_, value)| value))
        .collect()
}

/// Expands fills and merges by channel; later buckets win.
pub fn expand_buckets(buckets: &[Bucket]) -> Result<Vec<(u16, u8)>, ValidationError> {
    let mut merged = BTreeMap::new();
    for bucket in buckets {
        let last = match bucket.fill {
            Some(fill) if fill < bucket.channel => {
                return Err(ValidationError::InvalidFill {
                    channel: bucket.channel,
                    fill,
                })
            }
            Some(fill) => fill,
            None => bucket.channel,
        };
        // The end of a fill is checked like any other channel.
        validate_write(last, bucket.value)?;
        for channel in bucket.channel..=last {
            let (channel, value) = validate_write(channel, bucket.value)?;
            merged.insert(channel, value);
        }
    }
    Ok(merged.into_iter().collect())
}

fn timing_field(field: &'static str, value: Option<i64>) -> Result<u64, ValidationError> {
    match value {
        None => Ok(0),
        Some(v) if v < 0 => Err(ValidationError::NegativeTiming { field, value: v }),
        Some(v) => Ok(v as u64),
    }
}

impl CommandPayload {
    pub fn timing(&self) -> Result<Timing, ValidationError> {
        let repeat = match self.repeat.unwrap_or(0) {
            r if r < 0 => -1,
            r => i32::try_from(r).unwrap_or(i32::MAX),
        };
        Ok(Timing {
            duration_ms: timing_field("duration", self.duration)?,
            hold_ms: timing_field("hold", self.hold)?,
            gap_ms: timing_field("gap", self.gap)?,
            repeat,
            mirror: self.mirror.unwrap_or(false),
        })
    }

    pub fn transition_request(&self) -> Result<TransitionRequest, SenderError> {
        match self.transition.as_deref() {
            None | Some("") => Ok(TransitionRequest::Immediate),
            Some("arc") => Ok(TransitionRequest::Arc),
            Some("gamma") => Ok(TransitionRequest::Curve(Curve::gamma(
                self.gamma.unwrap_or(DEFAULT_GAMMA),
            ))),
            Some(other) => Ok(TransitionRequest::Curve(other.parse::<Curve>()?)),
        }
    }

    fn interval(&self) -> Result<PlaybackInterval, SenderError> {
        match self.interval.as_deref() {
            Some([start, end, ..]) => Ok(PlaybackInterval::new(*start, *end)?),
            _ => Ok(PlaybackInterval::FULL),
        }
    }

    fn writes(&self) -> Result<Option<Vec<(u16, u8)>>, ValidationError> {
        if let Some(channel) = self.channel {
            let value = self.value.ok_or(ValidationError::MissingField("value"))?;
            return Ok(Some(vec![validate_write(channel, value)?]));
        }
        match &self.buckets {
            Some(buckets) => expand_buckets(buckets).map(Some),
            None => Ok(None),
        }
    }

    pub fn to_command(&self) -> Result<Command, SenderError> {
        let request = self.transition_request()?;
        let timing = self.timing()?;

        if request == TransitionRequest::Arc {
            let end = self.end.ok_or(ValidationError::MissingField("end"))?;
            let center = self.center.ok_or(ValidationError::MissingField("center"))?;
            let config = self.arc.unwrap_or_default();
            if config.pan_channel == config.tilt_channel {
                return Err(ValidationError::OverlappingArcChannels(config.pan_channel).into());
            }
            validate_write(i64::from(config.pan_channel), 0)?;
            validate_write(i64::from(config.tilt_channel), 0)?;
            return Ok(Command::Arc(ArcCommand {
                start: self.start,
                end,
                center,
                config,
                interval: self.interval()?,
                timing,
            }));
        }

        let writes = match self.writes()? {
            Some(writes) => writes,
            None if self.start_buckets.is_some() => return Ok(Command::None),
            None => return Err(ValidationError::EmptyPayload.into()),
        };
        Ok(match request {
            TransitionRequest::Curve(curve) => Command::Fade {
                writes,
                curve,
                timing,
            },
            _ => Command::Write(writes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn command(value: serde_json::Value) -> Result<Command, SenderError> {
        Payload::from_value(value).unwrap().into_command()
    }

    #[test]
    fn bare_array_is_a_frame() {
        let payload = Payload::from_json("[1, 2, 3]").unwrap();
        assert_eq!(payload.into_command().unwrap(), Command::Frame(vec![1, 2, 3]));
        assert!(Payload::from_json("[1, 256]").unwrap().into_command().is_err());
    }

    #[test]
    fn single_channel_write() {
        assert_eq!(
            command(json!({"channel": 5, "value": 200})).unwrap(),
            Command::Write(vec![(5, 200)])
        );
        assert!(matches!(
            command(json!({"channel": 513, "value": 1})),
            Err(SenderError::Validation(ValidationError::ChannelOutOfRange(513)))
        ));
        assert!(matches!(
            command(json!({"channel": 1})),
            Err(SenderError::Validation(ValidationError::MissingField("value")))
        ));
    }

    #[test]
    fn buckets_fill_and_merge() {
        let writes = expand_buckets(&[
            Bucket {
                channel: 10,
                value: 50,
                fill: Some(13),
            },
            Bucket::new(2, 7),
            Bucket::new(12, 99),
        ])
        .unwrap();
        assert_eq!(writes, vec![(2, 7), (10, 50), (11, 50), (12, 99), (13, 50)]);
    }

    #[test]
    fn bad_buckets_are_rejected() {
        let backwards = Bucket {
            channel: 10,
            value: 1,
            fill: Some(3),
        };
        assert_eq!(
            expand_buckets(&[backwards]),
            Err(ValidationError::InvalidFill { channel: 10, fill: 3 })
        );
        let overflow = Bucket {
            channel: 510,
            value: 1,
            fill: Some(520),
        };
        assert_eq!(
            expand_buckets(&[overflow]),
            Err(ValidationError::ChannelOutOfRange(520))
        );
    }

    #[test]
    fn fade_options() {
        let cmd = command(json!({
            "buckets": [{"channel": 1, "value": 255}],
            "transition": "gamma",
            "gamma": 1.8,
            "duration": 1000,
            "repeat": -1,
            "mirror": true
        }))
        .unwrap();
        match cmd {
            Command::Fade {
                writes,
                curve,
                timing,
            } => {
                assert_eq!(writes, vec![(1, 255)]);
                assert_eq!(curve, Curve::Gamma { factor: 1.8 });
                assert_eq!(timing.duration_ms, 1000);
                assert_eq!(timing.repeat, -1);
                assert!(timing.mirror);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_transition_and_negative_timing() {
        assert!(matches!(
            command(json!({"channel": 1, "value": 1, "transition": "bounce"})),
            Err(SenderError::UnknownTransition(_))
        ));
        assert!(matches!(
            command(json!({"channel": 1, "value": 1, "transition": "linear", "duration": -5})),
            Err(SenderError::Validation(ValidationError::NegativeTiming { field: "duration", .. }))
        ));
    }

    #[test]
    fn arc_requires_end_and_center() {
        assert!(matches!(
            command(json!({"transition": "arc", "center": {"pan": 0, "tilt": 0}})),
            Err(SenderError::Validation(ValidationError::MissingField("end")))
        ));
        let cmd = command(json!({
            "transition": "arc",
            "end": {"pan": 50, "tilt": 100},
            "center": {"pan": 0, "tilt": 0},
            "interval": [0.25, 0.75],
            "duration": 500
        }))
        .unwrap();
        match cmd {
            Command::Arc(arc) => {
                assert_eq!(arc.start, None);
                assert_eq!(arc.config, ArcConfig::default());
                assert_eq!(arc.interval.start(), 0.25);
                assert_eq!(arc.timing.duration_ms, 500);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn arc_channels_must_differ() {
        assert!(matches!(
            command(json!({
                "transition": "arc",
                "end": {"pan": 1, "tilt": 1},
                "center": {"pan": 0, "tilt": 0},
                "arc": {"pan_channel": 4, "tilt_channel": 4}
            })),
            Err(SenderError::Validation(ValidationError::OverlappingArcChannels(4)))
        ));
    }

    #[test]
    fn start_buckets_alone_are_accepted() {
        let payload = Payload::from_value(json!({
            "start_buckets": [{"channel": 3, "value": 30}]
        }))
        .unwrap();
        assert_eq!(payload.start_writes().unwrap(), vec![(3, 30)]);
        assert_eq!(payload.into_command().unwrap(), Command::None);
        assert!(matches!(
            command(json!({})),
            Err(SenderError::Validation(ValidationError::EmptyPayload))
        ));
    }
}
