//! Common data types flowing between the capture layer and the sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Process-wide session identifier, strictly increasing and never reused.
pub type SessionId = u64;

/// Direction of one half of a traced connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Client to server: the request side, where calls are registered.
    Outgoing,
    /// Server to client: the response side, where calls are resolved.
    Incoming,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Outgoing => "outgoing",
            Direction::Incoming => "incoming",
        }
    }

    pub fn arrow(&self) -> &'static str {
        match self {
            Direction::Outgoing => "-->",
            Direction::Incoming => "<--",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one TCP connection on one interface, oriented client first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionKey {
    pub client: SocketAddr,
    pub server: SocketAddr,
}

impl ConnectionKey {
    pub fn new(client: SocketAddr, server: SocketAddr) -> Self {
        Self { client, server }
    }

    /// Direction of a segment travelling from `src` to `dst`, if it belongs here.
    pub fn direction_of(&self, src: SocketAddr, dst: SocketAddr) -> Option<Direction> {
        if src == self.client && dst == self.server {
            Some(Direction::Outgoing)
        } else if src == self.server && dst == self.client {
            Some(Direction::Incoming)
        } else {
            None
        }
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.client, self.server)
    }
}

/// Framing of the bytes handed over by a capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Starts with an Ethernet II header.
    Ethernet,
    /// Starts directly with an IPv4 or IPv6 header.
    Ip,
}

/// One raw frame read from one interface.
#[derive(Debug, Clone)]
pub struct CapturedPacket {
    /// Index of the interface in the coordinator's interface list.
    pub interface: usize,
    pub link: LinkKind,
    pub timestamp: DateTime<Utc>,
    pub data: Vec<u8>,
}

/// Connection lifecycle events produced by reassembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    Start {
        key: ConnectionKey,
        /// The handshake was not observed, the streams may not start on a frame boundary.
        missed_syn: bool,
    },
    Data {
        key: ConnectionKey,
        direction: Direction,
        payload: Vec<u8>,
    },
    End {
        key: ConnectionKey,
    },
}

impl StreamEvent {
    pub fn key(&self) -> &ConnectionKey {
        match self {
            StreamEvent::Start { key, .. } => key,
            StreamEvent::Data { key, .. } => key,
            StreamEvent::End { key } => key,
        }
    }
}
