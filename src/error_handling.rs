//! Error types shared across the tracer.
//!
//! Only configuration-time failures ([`types::ConfigError`] and interface-open
//! failures in [`types::CaptureError`]) are fatal; everything that happens
//! inside a traced connection is logged and contained there.

pub mod types;
