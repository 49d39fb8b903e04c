//! Output of traced frames.
//!
//! [`LogRenderer`] prints one human-readable line per frame through the logger,
//! [`JsonRenderer`] writes one JSON object per line for machine consumption.

use log::{info, warn};
use std::io::{self, Write};

use crate::configuration::types::DisplayOptions;
use crate::decoding::types::{FrameKind, TracedFrame};

/// Bytes of a frame body shown in a dump line.
const DUMP_PREVIEW: usize = 64;

pub trait FrameRenderer {
    fn render(&mut self, frame: &TracedFrame);
}

pub struct LogRenderer {
    options: DisplayOptions,
}

impl LogRenderer {
    pub fn new(options: DisplayOptions) -> Self {
        Self { options }
    }

    /// Text for one frame, possibly several lines.
    pub fn format(&self, traced: &TracedFrame) -> String {
        let frame = &traced.frame;
        let key = frame
            .call_key
            .map(|k| k.to_string())
            .unwrap_or_else(|| "-".to_string());
        let prefix = format!("[{}] {}", traced.session_id, traced.direction.arrow());

        let mut out = match &frame.kind {
            FrameKind::Call { .. } => format!(
                "{} call {} {} ({} bytes)",
                prefix,
                key,
                traced.method,
                frame.body.len()
            ),
            FrameKind::Reply { .. } => format!(
                "{} reply {} {} -> {}",
                prefix,
                key,
                traced.method,
                traced
                    .status
                    .as_ref()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "unclassified".to_string())
            ),
            FrameKind::Other { kind } => format!(
                "{} frame kind {} ({} bytes)",
                prefix,
                kind,
                frame.raw.len()
            ),
        };

        let unknown_kind = matches!(frame.kind, FrameKind::Other { .. });
        if self.options.always_show_frame_dump || unknown_kind {
            let shown = &frame.body[..frame.body.len().min(DUMP_PREVIEW)];
            out.push_str(&format!(
                "\n[{}]     dump: {:?}{}",
                traced.session_id,
                String::from_utf8_lossy(shown),
                if frame.body.len() > DUMP_PREVIEW {
                    " ..."
                } else {
                    ""
                }
            ));
        }
        if self.options.always_show_hex {
            out.push_str(&format!(
                "\n[{}]     hex: {}",
                traced.session_id,
                hex::encode(&frame.raw)
            ));
        }
        out
    }
}

impl FrameRenderer for LogRenderer {
    fn render(&mut self, frame: &TracedFrame) {
        info!("{}", self.format(frame));
    }
}

/// Newline-delimited JSON.
pub struct JsonRenderer<W: Write> {
    out: W,
}

impl JsonRenderer<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> JsonRenderer<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> FrameRenderer for JsonRenderer<W> {
    fn render(&mut self, frame: &TracedFrame) {
        let line = match serde_json::to_string(frame) {
            Ok(line) => line,
            Err(e) => {
                warn!("[{}] unable to serialize frame: {}", frame.session_id, e);
                return;
            }
        };
        if let Err(e) = writeln!(self.out, "{}", line) {
            warn!("[{}] unable to write frame: {}", frame.session_id, e);
        }
    }
}
