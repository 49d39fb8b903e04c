//! Capture side of the tracer.
//!
//! From configured interfaces down to ordered per-connection byte streams:
//! [`filter_builder`] builds the capture filter, [`packet_source`] opens the
//! devices, [`reassembler`] turns frames into connection events and
//! [`capture_coordinator`] routes those events to sessions.

pub mod capture_coordinator;
pub mod filter_builder;
pub mod packet_source;
pub mod reassembler;
pub mod types;

pub use capture_coordinator::CaptureCoordinator;
pub use filter_builder::FilterExpression;
pub use packet_source::{default_source, CaptureDevice, PacketSource};
pub use reassembler::TcpReassembler;
