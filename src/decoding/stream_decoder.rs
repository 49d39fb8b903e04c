use super::types::DecodedFrame;
use crate::network::types::Direction;

/// Turns one ordered byte stream into frames.
///
/// Implementations may buffer partial frames between calls to `push`.
pub trait StreamDecoder: Send {
    /// Feeds the next chunk of the stream and returns every frame it completed.
    fn push(&mut self, chunk: &[u8]) -> Vec<DecodedFrame>;

    /// Ends the stream. Remaining complete frames are returned, partial ones dropped.
    fn finish(&mut self) -> Vec<DecodedFrame>;
}

/// Creates the decoder for one direction of one connection.
pub trait DecoderFactory: Send + Sync {
    /// `aligned` is false when the stream may start in the middle of a frame.
    fn create(&self, direction: Direction, aligned: bool) -> Box<dyn StreamDecoder>;
}
