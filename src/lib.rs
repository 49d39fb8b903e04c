pub mod configuration;
pub mod correlation;
pub mod decoding;
pub mod error_handling;
pub mod network;
pub mod rendering;
pub mod session_management;
