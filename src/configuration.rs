pub mod config;
pub mod types;

pub use config::Config;
pub use types::{DisplayOptions, DEFAULT_FILTER, DEFAULT_INTERFACE, DEFAULT_PORT};
