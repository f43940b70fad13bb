//! Resize records for the fd 3 control channel.
//!
//! Each record is exactly [`ResizeMessage::LEN`] bytes with no framing and no
//! reply. The layout mirrors the kernel's `struct winsize` so a helper can hand
//! it to `TIOCSWINSZ` unchanged:
//!
//! ```text
//! offset 0  u16 LE  rows
//! offset 2  u16 LE  columns
//! offset 4  u16 LE  x pixels (always 0)
//! offset 6  u16 LE  y pixels (always 0)
//! ```
//!
//! Changing the record size breaks every existing helper.

use crate::error::PtyError;

/// A terminal window size, as carried on the control channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeMessage {
    pub cols: u16,
    pub rows: u16,
}

impl ResizeMessage {
    /// Size of one record on the wire.
    pub const LEN: usize = 8;

    /// Build a message from caller-order `(cols, rows)`.
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }

    /// Validate wide dimensions before narrowing them to the wire width.
    ///
    /// Zero and anything above `u16::MAX` are rejected rather than truncated.
    pub fn checked(cols: u32, rows: u32) -> Result<Self, PtyError> {
        let narrow = |v: u32| u16::try_from(v).ok().filter(|v| *v > 0);
        match (narrow(cols), narrow(rows)) {
            (Some(c), Some(r)) => Ok(Self::new(c, r)),
            _ => Err(PtyError::InvalidSize { cols, rows }),
        }
    }

    /// Encode as rows first, then columns, padded to eight bytes.
    pub fn encode(&self) -> [u8; Self::LEN] {
        let mut buf = [0u8; Self::LEN];
        buf[0..2].copy_from_slice(&self.rows.to_le_bytes());
        buf[2..4].copy_from_slice(&self.cols.to_le_bytes());
        buf
    }

    /// Decode a record read from the control channel. Padding is ignored.
    pub fn decode(buf: &[u8; Self::LEN]) -> Self {
        Self {
            rows: u16::from_le_bytes([buf[0], buf[1]]),
            cols: u16::from_le_bytes([buf[2], buf[3]]),
        }
    }
}
