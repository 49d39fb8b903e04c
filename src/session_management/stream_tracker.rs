use chrono::{DateTime, Utc};
use log::trace;
use std::sync::Arc;

use crate::correlation::correlation_table::CorrelationTable;
use crate::correlation::response_status::ResponseStatusCatalog;
use crate::decoding::stream_decoder::{DecoderFactory, StreamDecoder};
use crate::decoding::types::{DecodedFrame, FrameKind, MethodLabel, TracedFrame};
use crate::network::types::{Direction, SessionId};

/// Decode state of one direction of one connection.
///
/// Chunks go to the direction's own [`StreamDecoder`]; every frame coming back
/// is annotated against the connection's [`CorrelationTable`], which the owning
/// session lends for the duration of the call. Calls seen going out are
/// registered, replies coming in are resolved.
pub struct DirectionalStreamTracker {
    session_id: SessionId,
    direction: Direction,
    decoder: Box<dyn StreamDecoder>,
    catalog: Arc<ResponseStatusCatalog>,
    bytes_seen: u64,
    frames_seen: u64,
    closed: bool,
}

impl DirectionalStreamTracker {
    /// `decode_immediately` is false for connections joined mid-stream, where
    /// the first chunk may not start on a frame boundary.
    pub fn new(
        session_id: SessionId,
        direction: Direction,
        decode_immediately: bool,
        factory: &dyn DecoderFactory,
        catalog: Arc<ResponseStatusCatalog>,
    ) -> Self {
        Self {
            session_id,
            direction,
            decoder: factory.create(direction, decode_immediately),
            catalog,
            bytes_seen: 0,
            frames_seen: 0,
            closed: false,
        }
    }

    /// Frames completed by `chunk` carry `captured_at` as their timestamp.
    pub fn handle_packet(
        &mut self,
        chunk: &[u8],
        captured_at: DateTime<Utc>,
        table: &mut CorrelationTable,
    ) -> Vec<TracedFrame> {
        if self.closed {
            return Vec::new();
        }
        self.bytes_seen += chunk.len() as u64;
        trace!(
            "[{}] {} {} bytes",
            self.session_id,
            self.direction.arrow(),
            chunk.len()
        );

        let frames = self.decoder.push(chunk);
        self.annotate_all(frames, captured_at, table)
    }

    /// Flushes the decoder. Later chunks are ignored.
    pub fn end(&mut self, table: &mut CorrelationTable) -> Vec<TracedFrame> {
        if self.closed {
            return Vec::new();
        }
        self.closed = true;
        let frames = self.decoder.finish();
        self.annotate_all(frames, Utc::now(), table)
    }

    fn annotate_all(
        &mut self,
        frames: Vec<DecodedFrame>,
        timestamp: DateTime<Utc>,
        table: &mut CorrelationTable,
    ) -> Vec<TracedFrame> {
        self.frames_seen += frames.len() as u64;
        frames
            .into_iter()
            .map(|frame| self.annotate(frame, timestamp, table))
            .collect()
    }

    fn annotate(
        &self,
        frame: DecodedFrame,
        timestamp: DateTime<Utc>,
        table: &mut CorrelationTable,
    ) -> TracedFrame {
        let (method, status) = match (&frame.kind, self.direction) {
            (FrameKind::Call { method }, Direction::Outgoing) => {
                if let Some(key) = frame.call_key {
                    table.register(key, method);
                }
                (MethodLabel::Known(method.clone()), None)
            }
            (FrameKind::Call { method }, Direction::Incoming) => {
                (MethodLabel::Known(method.clone()), None)
            }
            (FrameKind::Reply { status_code }, Direction::Incoming) => {
                let method = match frame.call_key {
                    Some(key) => table.resolve(key),
                    None => MethodLabel::Unknown,
                };
                let status = self.catalog.classify(*status_code);
                table.record_status(&method, status.clone());
                (method, Some(status))
            }
            (FrameKind::Reply { status_code }, Direction::Outgoing) => {
                (MethodLabel::Unknown, Some(self.catalog.classify(*status_code)))
            }
            (FrameKind::Other { .. }, _) => (MethodLabel::Unknown, None),
        };

        TracedFrame {
            session_id: self.session_id,
            direction: self.direction,
            timestamp,
            method,
            status,
            frame,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn bytes_seen(&self) -> u64 {
        self.bytes_seen
    }

    pub fn frames_seen(&self) -> u64 {
        self.frames_seen
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::response_status::StatusLabel;
    use crate::decoding::framed_decoder::{encode_call, encode_reply, FramedDecoderFactory};
    use crate::decoding::types::CallKey;

    fn tracker(direction: Direction) -> DirectionalStreamTracker {
        DirectionalStreamTracker::new(
            1,
            direction,
            true,
            &FramedDecoderFactory,
            Arc::new(ResponseStatusCatalog::default()),
        )
    }

    fn enabled_table() -> CorrelationTable {
        CorrelationTable::new(Some(Arc::from(Vec::<String>::new())))
    }

    #[test]
    fn test_outgoing_call_is_registered() {
        let mut table = enabled_table();
        let mut outgoing = tracker(Direction::Outgoing);

        let frames = outgoing.handle_packet(&encode_call(12, "search", b"q"), Utc::now(), &mut table);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].method, MethodLabel::Known("search".to_string()));
        assert_eq!(frames[0].direction, Direction::Outgoing);
        assert_eq!(frames[0].status, None);
        assert_eq!(table.pending_calls(), 1);
        assert_eq!(outgoing.frames_seen(), 1);
    }

    #[test]
    fn test_incoming_reply_is_resolved_and_classified() {
        let mut table = enabled_table();
        table.register(CallKey(12), "search");
        let mut incoming = tracker(Direction::Incoming);

        let frames = incoming.handle_packet(&encode_reply(12, 1, b""), Utc::now(), &mut table);

        assert_eq!(frames[0].method, MethodLabel::Known("search".to_string()));
        assert_eq!(frames[0].status.as_ref().map(|s| s.to_string()), Some("NOT_OK".to_string()));
        assert_eq!(table.pending_calls(), 0);
        assert!(matches!(
            table.summary()["search"].last_status,
            Some(StatusLabel::Classified { .. })
        ));
    }

    #[test]
    fn test_calls_from_the_server_are_not_registered() {
        let mut table = enabled_table();
        let mut incoming = tracker(Direction::Incoming);

        let frames = incoming.handle_packet(&encode_call(3, "notify", b""), Utc::now(), &mut table);

        assert_eq!(frames[0].method, MethodLabel::Known("notify".to_string()));
        assert_eq!(table.pending_calls(), 0);
    }

    #[test]
    fn test_frames_carry_capture_time() {
        let mut table = enabled_table();
        let mut outgoing = tracker(Direction::Outgoing);
        let captured_at = Utc::now() - chrono::Duration::seconds(30);

        let frames = outgoing.handle_packet(&encode_call(4, "slow", b""), captured_at, &mut table);

        assert_eq!(frames[0].timestamp, captured_at);
    }

    #[test]
    fn test_closed_tracker_ignores_chunks() {
        let mut table = enabled_table();
        let mut outgoing = tracker(Direction::Outgoing);

        assert!(outgoing.end(&mut table).is_empty());
        assert!(outgoing.is_closed());
        assert!(outgoing
            .handle_packet(&encode_call(1, "late", b""), Utc::now(), &mut table)
            .is_empty());
        assert_eq!(outgoing.bytes_seen(), 0);
        assert_eq!(table.pending_calls(), 0);
    }
}
