//! Frame model and the control-payload codec.
//!
//! The transport's message framing already delimits frames, so the codec only
//! has to deal with the resize control payload: ASCII `"<cols>,<rows>"`,
//! exactly one comma, no whitespace, both dimensions positive.

use std::fmt;

use thiserror::Error;

/// Terminal geometry in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub cols: u16,
    pub rows: u16,
}

impl fmt::Display for WindowSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.cols, self.rows)
    }
}

/// Why a session is being closed, carried on the transport's close handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    /// Peer finished cleanly (local end of input or shell exit).
    Normal,
    /// Transport or endpoint failure.
    Abnormal,
    /// Peer sent something the framing protocol does not allow.
    ProtocolError,
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CloseCode::Normal => "normal",
            CloseCode::Abnormal => "abnormal",
            CloseCode::ProtocolError => "protocol error",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlParseError {
    #[error("expected exactly one ',' separator")]
    Separator,
    #[error("dimension is not a positive decimal integer")]
    Dimension,
}

/// Render a resize payload for the wire.
pub fn encode_resize(size: WindowSize) -> String {
    format!("{},{}", size.cols, size.rows)
}

/// Parse a resize payload. Anything that is not two positive decimal integers
/// joined by a single comma is rejected; the caller decides whether to discard
/// the frame or tear the session down.
pub fn parse_resize(payload: &str) -> Result<WindowSize, ControlParseError> {
    let (cols, rows) = payload
        .split_once(',')
        .ok_or(ControlParseError::Separator)?;
    if rows.contains(',') {
        return Err(ControlParseError::Separator);
    }
    Ok(WindowSize {
        cols: parse_dimension(cols)?,
        rows: parse_dimension(rows)?,
    })
}

fn parse_dimension(field: &str) -> Result<u16, ControlParseError> {
    if field.is_empty() || !field.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ControlParseError::Dimension);
    }
    let value: u16 = field.parse().map_err(|_| ControlParseError::Dimension)?;
    if value == 0 {
        return Err(ControlParseError::Dimension);
    }
    Ok(value)
}
