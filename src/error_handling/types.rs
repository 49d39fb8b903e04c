use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    NoInterfaces,
    InvalidPort(u16),
    InvalidBufferSize(i32),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::NoInterfaces => write!(f, "No capture interface configured"),
            ConfigError::InvalidPort(p) => write!(f, "Invalid port: {}", p),
            ConfigError::InvalidBufferSize(s) => write!(f, "Invalid capture buffer size: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug)]
pub enum CaptureError {
    InterfaceOpen { interface: String, reason: String },
    InvalidFilter {
        interface: String,
        filter: String,
        reason: String,
    },
    Unsupported(String),
    ReadFailed(String),
    SourceClosed,
    ChannelFailed,
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::InterfaceOpen { interface, reason } => {
                write!(f, "Unable to open interface '{}': {}", interface, reason)
            }
            CaptureError::InvalidFilter {
                interface,
                filter,
                reason,
            } => write!(
                f,
                "Invalid capture filter '{}' on interface '{}': {}",
                filter, interface, reason
            ),
            CaptureError::Unsupported(e) => write!(f, "Capture not supported: {}", e),
            CaptureError::ReadFailed(e) => write!(f, "Capture read failed: {}", e),
            CaptureError::SourceClosed => write!(f, "Capture source closed"),
            CaptureError::ChannelFailed => write!(f, "Capture channel failed"),
        }
    }
}

impl std::error::Error for CaptureError {}

#[derive(Debug)]
pub enum TracerError {
    ConfigurationError(ConfigError),
    CaptureError(CaptureError),
}

impl fmt::Display for TracerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TracerError::ConfigurationError(e) => write!(f, "Configuration error: {}", e),
            TracerError::CaptureError(e) => write!(f, "Capture error: {}", e),
        }
    }
}

impl std::error::Error for TracerError {}

impl From<ConfigError> for TracerError {
    fn from(err: ConfigError) -> Self {
        TracerError::ConfigurationError(err)
    }
}

impl From<CaptureError> for TracerError {
    fn from(err: CaptureError) -> Self {
        TracerError::CaptureError(err)
    }
}
