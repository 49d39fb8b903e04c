use super::types::*;
use crate::error_handling::types::ConfigError;
use clap::Parser;
use log::info;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Runtime configuration of the tracer.
///
/// Every field can be given on the command line. When `--config <FILE>` is
/// present the whole configuration is read from that TOML file instead, using
/// the same field names (`filter`, `ports`, `interfaces`, ...).
///
/// # Fields Overview
///
/// - `filter`: base capture filter, extended with port clauses at startup
/// - `ports`: explicit server ports, OR'd into the filter
/// - `interfaces`: one capture source is opened per entry
/// - `buffer_size`: handed to the capture backend untouched
/// - `always_show_frame_dump` / `always_show_hex`: renderer switches
/// - `tracked_methods`: enables call/response correlation and seeds the
///   per-connection method summary; absent means no correlation at all
/// - `response_statuses`: which response outcomes get a label; absent means all
/// - `json`: render frames as JSON lines instead of log lines
#[derive(Parser, Deserialize, Debug, Clone, PartialEq)]
#[command(name = "rpctrace")]
#[command(version)]
#[command(about = "Passive live-traffic tracer for RPC connections")]
#[serde(default)]
pub struct Config {
    /// Base capture filter expression
    #[arg(short = 'f', long, default_value = DEFAULT_FILTER)]
    pub filter: String,

    /// Server port to trace, may be repeated or comma separated
    #[arg(short = 'p', long = "port", value_delimiter = ',')]
    pub ports: Vec<u16>,

    /// Network interface to capture on, may be repeated or comma separated
    #[arg(short = 'i', long = "interface", value_delimiter = ',', default_value = DEFAULT_INTERFACE)]
    pub interfaces: Vec<String>,

    /// Capture buffer size in bytes, passed to the capture backend
    #[arg(long)]
    pub buffer_size: Option<i32>,

    /// Always print the decoded frame structure
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub always_show_frame_dump: bool,

    /// Always print the raw frame bytes as hex
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub always_show_hex: bool,

    /// Method names to track for call/response correlation
    #[arg(long = "track-method", value_delimiter = ',')]
    pub tracked_methods: Option<Vec<String>>,

    /// Response statuses to label, as `alias` or `alias=Label` (ok, notok, error)
    #[arg(long = "status", value_delimiter = ',')]
    pub response_statuses: Option<Vec<String>>,

    /// Render frames as JSON lines on stdout
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub json: bool,

    /// Read the configuration from a TOML file instead of the command line
    #[arg(short = 'c', long)]
    #[serde(skip)]
    pub config: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER.to_string(),
            ports: Vec::new(),
            interfaces: vec![DEFAULT_INTERFACE.to_string()],
            buffer_size: None,
            always_show_frame_dump: false,
            always_show_hex: false,
            tracked_methods: None,
            response_statuses: None,
            json: false,
            config: None,
        }
    }
}

impl Config {
    /// Parses the command line.
    ///
    /// # Panics
    /// Exits the process with clap's usage message on invalid arguments.
    pub fn from_args() -> Self {
        Config::parse()
    }

    /// Reads a configuration from a TOML file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        let mut config: Config =
            toml::from_str(&content).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.config = Some(path.to_path_buf());
        Ok(config)
    }

    /// Command line first, then the file it points to if any, then validation.
    pub fn load() -> Result<Self, ConfigError> {
        let args = Config::from_args();
        let config = match args.config {
            Some(ref path) => {
                info!("Reading configuration from {}", path.display());
                Config::from_file(path)?
            }
            None => args,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.interfaces.is_empty() || self.interfaces.iter().any(|i| i.trim().is_empty()) {
            return Err(ConfigError::NoInterfaces);
        }
        if let Some(&port) = self.ports.iter().find(|&&p| p == 0) {
            return Err(ConfigError::InvalidPort(port));
        }
        if let Some(size) = self.buffer_size {
            if size <= 0 {
                return Err(ConfigError::InvalidBufferSize(size));
            }
        }
        Ok(())
    }

    pub fn display_options(&self) -> DisplayOptions {
        DisplayOptions {
            always_show_frame_dump: self.always_show_frame_dump,
            always_show_hex: self.always_show_hex,
        }
    }

    /// Ports the reassembler treats as server ports when it joins a connection late.
    pub fn server_ports(&self) -> Vec<u16> {
        if self.ports.is_empty() {
            vec![DEFAULT_PORT]
        } else {
            self.ports.clone()
        }
    }
}
