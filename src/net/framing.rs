// src/net/framing.rs

//! End-of-message rules shared by TCP `receive` and UDP `recv_from`.

/// Decides when an accumulated buffer holds a whole message.
///
/// The message is complete when a non-empty terminator matches the tail of
/// the buffer, or when an expected size is set and reached. With neither
/// set, any read that returns data is a complete message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageEnd {
    terminator: Vec<u8>,
    expected_size: usize,
}

impl MessageEnd {
    /// Every non-empty read ends the message.
    pub fn any_read() -> Self {
        Self::default()
    }

    /// The message ends with `terminator` (an empty terminator means none).
    pub fn terminated_by(terminator: impl Into<Vec<u8>>) -> Self {
        Self {
            terminator: terminator.into(),
            expected_size: 0,
        }
    }

    /// The message is at least `expected_size` bytes (0 means no limit).
    pub fn sized(expected_size: usize) -> Self {
        Self {
            terminator: Vec::new(),
            expected_size,
        }
    }

    /// Adds a size threshold to an existing rule.
    pub fn with_expected_size(mut self, expected_size: usize) -> Self {
        self.expected_size = expected_size;
        self
    }

    pub fn terminator(&self) -> &[u8] {
        &self.terminator
    }

    pub fn expected_size(&self) -> usize {
        self.expected_size
    }

    /// `true` when neither a terminator nor a size is configured.
    pub fn is_any_read(&self) -> bool {
        self.terminator.is_empty() && self.expected_size == 0
    }

    /// Whether `buffer` (the bytes accumulated so far) completes a message.
    pub fn is_satisfied(&self, buffer: &[u8]) -> bool {
        if self.is_any_read() {
            return true;
        }
        let terminated = !self.terminator.is_empty() && buffer.ends_with(&self.terminator);
        let sized = self.expected_size != 0 && buffer.len() >= self.expected_size;
        terminated || sized
    }
}
