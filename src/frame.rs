//! The 512-slot DMX value store of one universe.

use crate::error::ValidationError;

pub const CHANNEL_COUNT: usize = 512;

/// Channel values of a universe. Channels are addressed 1..=512.
///
/// Writes are validated, never clamped. Any write that changes a value marks
/// the frame dirty until the scheduler takes it for transmission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFrame {
    values: [u8; CHANNEL_COUNT],
    dirty: bool,
}

impl Default for ChannelFrame {
    fn default() -> Self {
        Self {
            values: [0; CHANNEL_COUNT],
            dirty: false,
        }
    }
}

/// Checks a channel number and converts it to a 0-based slot index.
pub fn channel_index(channel: i64) -> Result<usize, ValidationError> {
    if (1..=CHANNEL_COUNT as i64).contains(&channel) {
        Ok((channel - 1) as usize)
    } else {
        Err(ValidationError::ChannelOutOfRange(channel))
    }
}

/// Checks a `(channel, value)` pair without writing it.
pub fn validate_write(channel: i64, value: i64) -> Result<(u16, u8), ValidationError> {
    let index = channel_index(channel)?;
    let value = u8::try_from(value).map_err(|_| ValidationError::ValueOutOfRange { channel, value })?;
    Ok((index as u16 + 1, value))
}

impl ChannelFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a frame from persisted values.
    ///
    /// Anything other than exactly 512 in-range entries yields a zeroed frame.
    pub fn restore(values: &[i64]) -> Self {
        let mut frame = Self::default();
        if values.len() != CHANNEL_COUNT {
            log::warn!(
                "[frame] persisted frame has {} entries, starting from zeros",
                values.len()
            );
            return frame;
        }
        for (slot, value) in frame.values.iter_mut().zip(values) {
            match u8::try_from(*value) {
                Ok(v) => *slot = v,
                Err(_) => {
                    log::warn!("[frame] persisted value {value} out of range, starting from zeros");
                    return Self::default();
                }
            }
        }
        frame
    }

    /// Writes one channel. Returns whether the stored value changed.
    pub fn set(&mut self, channel: impl Into<i64>, value: impl Into<i64>) -> Result<bool, ValidationError> {
        let (channel, value) = validate_write(channel.into(), value.into())?;
        let slot = &mut self.values[usize::from(channel) - 1];
        if *slot == value {
            return Ok(false);
        }
        *slot = value;
        self.dirty = true;
        Ok(true)
    }

    /// Value of a channel; 0 for anything outside 1..=512.
    pub fn get(&self, channel: impl Into<i64>) -> u8 {
        channel_index(channel.into())
            .map(|i| self.values[i])
            .unwrap_or(0)
    }

    /// Writes channels 1..=min(len, 512) from `values`.
    pub fn set_all(&mut self, values: &[u8]) {
        let count = values.len().min(CHANNEL_COUNT);
        if self.values[..count] != values[..count] {
            self.values[..count].copy_from_slice(&values[..count]);
            self.dirty = true;
        }
    }

    pub fn as_bytes(&self) -> &[u8; CHANNEL_COUNT] {
        &self.values
    }

    pub fn snapshot(&self) -> [u8; CHANNEL_COUNT] {
        self.values
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Clears the dirty flag, returning its previous state.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_get() {
        let mut frame = ChannelFrame::new();
        assert_eq!(frame.set(1, 10), Ok(true));
        assert_eq!(frame.set(512, 255), Ok(true));
        assert_eq!(frame.get(1), 10);
        assert_eq!(frame.get(512), 255);
        assert_eq!(frame.get(2), 0);
        assert_eq!(frame.get(0), 0);
        assert_eq!(frame.get(600), 0);
    }

    #[test]
    fn out_of_range_writes_are_rejected_without_mutation() {
        let mut frame = ChannelFrame::new();
        assert_eq!(frame.set(0, 10), Err(ValidationError::ChannelOutOfRange(0)));
        assert_eq!(frame.set(513, 10), Err(ValidationError::ChannelOutOfRange(513)));
        assert_eq!(
            frame.set(1, 256),
            Err(ValidationError::ValueOutOfRange {
                channel: 1,
                value: 256
            })
        );
        assert!(frame.set(1, -1).is_err());
        assert_eq!(frame, ChannelFrame::new());
        assert!(!frame.is_dirty());
    }

    #[test]
    fn repeated_write_marks_dirty_once() {
        let mut frame = ChannelFrame::new();
        assert_eq!(frame.set(7, 99), Ok(true));
        assert!(frame.take_dirty());
        assert_eq!(frame.set(7, 99), Ok(false));
        assert!(!frame.is_dirty());
        assert_eq!(frame.get(7), 99);
    }

    #[test]
    fn set_all_applies_prefix() {
        let mut frame = ChannelFrame::new();
        frame.set_all(&[1, 2, 3]);
        assert_eq!(frame.get(3), 3);
        assert_eq!(frame.get(4), 0);
        assert!(frame.is_dirty());

        let long = vec![9u8; 600];
        frame.set_all(&long);
        assert_eq!(frame.get(512), 9);
    }

    #[test]
    fn restore_validates_length_and_range() {
        let mut values = vec![0i64; CHANNEL_COUNT];
        values[0] = 42;
        values[511] = 255;
        let frame = ChannelFrame::restore(&values);
        assert_eq!(frame.get(1), 42);
        assert_eq!(frame.get(512), 255);
        assert!(!frame.is_dirty());

        assert_eq!(ChannelFrame::restore(&values[..100]), ChannelFrame::new());
        values[3] = 300;
        assert_eq!(ChannelFrame::restore(&values), ChannelFrame::new());
    }
}
