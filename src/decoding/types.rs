use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::correlation::response_status::StatusLabel;
use crate::network::types::{Direction, SessionId};

/// Identifier of one in-flight call within a connection.
///
/// The protocol may hand the same value out again once the previous call has
/// completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CallKey(pub u32);

impl fmt::Display for CallKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FrameKind {
    Call { method: String },
    Reply { status_code: u8 },
    Other { kind: u8 },
}

/// A frame as produced by a stream decoder, before correlation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecodedFrame {
    pub kind: FrameKind,
    pub call_key: Option<CallKey>,
    /// Arguments of a call or payload of a reply.
    #[serde(skip)]
    pub body: Vec<u8>,
    /// The complete frame as it appeared on the wire.
    #[serde(skip)]
    pub raw: Vec<u8>,
}

/// Method attached to a frame after correlation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MethodLabel {
    Known(String),
    Unknown,
}

impl fmt::Display for MethodLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MethodLabel::Known(m) => f.write_str(m),
            MethodLabel::Unknown => f.write_str("unknown"),
        }
    }
}

impl Serialize for MethodLabel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A decoded frame annotated by its directional tracker, ready for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct TracedFrame {
    pub session_id: SessionId,
    pub direction: Direction,
    pub timestamp: DateTime<Utc>,
    pub method: MethodLabel,
    /// Only set on replies.
    pub status: Option<StatusLabel>,
    pub frame: DecodedFrame,
}
