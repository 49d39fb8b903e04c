//! Session management core module.
//!
//! One [`session::ConnectionSession`] per traced TCP connection, each with a
//! [`stream_tracker::DirectionalStreamTracker`] per direction.

/// Submodule for the connection session.
pub mod session;
/// Submodule for the per-direction decode state.
pub mod stream_tracker;

pub use session::{ConnectionSession, SessionContext};
pub use stream_tracker::DirectionalStreamTracker;

/// Lifecycle of a session.
///
/// Variants:
/// - `Active`: data is routed to the trackers. Sessions start here.
/// - `Ended`: the connection closed; no transition leaves this state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Ended,
}
