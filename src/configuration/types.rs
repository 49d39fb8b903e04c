/// Capture filter used when none is configured.
pub const DEFAULT_FILTER: &str = "ip proto \\tcp";

/// Port the protocol listens on when neither the filter nor the port list names one.
pub const DEFAULT_PORT: u16 = 4040;

/// Interface captured when none is configured.
pub const DEFAULT_INTERFACE: &str = "any";

/// Rendering switches handed through to the frame renderer.
///
/// The session layer never looks at these.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DisplayOptions {
    /// Print the structured frame dump under every rendered frame
    pub always_show_frame_dump: bool,
    /// Print the raw frame bytes as hex under every rendered frame
    pub always_show_hex: bool,
}
