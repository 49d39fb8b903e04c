//! Reference decoder for length-prefixed RPC frames.
//!
//! Wire layout, all integers big-endian:
//!
//! ```text
//! ┌──────────┬──────┬─────────┬───────────────────────────────────────────┐
//! │ len: u32 │ kind │ id: u32 │ body                                      │
//! └──────────┴──────┴─────────┴───────────────────────────────────────────┘
//!   len counts everything after itself
//!   kind 1 (call):  body = method_len: u8 | method (UTF-8) | args
//!   kind 2 (reply): body = status: u8 | payload
//! ```
//!
//! A decoder that is not aligned (joined mid-stream) drops whole chunks until
//! one starts with a plausible frame header. A bad length prefix throws the
//! buffered bytes away and returns the decoder to that unaligned state.

use log::{debug, trace};
use std::fmt;

use super::stream_decoder::{DecoderFactory, StreamDecoder};
use super::types::{CallKey, DecodedFrame, FrameKind};
use crate::network::types::Direction;

pub const KIND_CALL: u8 = 1;
pub const KIND_REPLY: u8 = 2;

/// Upper bound for `len`; anything bigger is treated as garbage.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

const LEN_PREFIX: usize = 4;
const HEADER_LEN: usize = 5;

#[derive(Debug)]
enum FramingError {
    BadLength(usize),
    Truncated(&'static str),
    BadMethodName,
}

impl fmt::Display for FramingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FramingError::BadLength(len) => write!(f, "implausible frame length {}", len),
            FramingError::Truncated(what) => write!(f, "frame too short for {}", what),
            FramingError::BadMethodName => write!(f, "method name is not UTF-8"),
        }
    }
}

fn read_u32_be(b: &[u8], off: usize) -> Option<u32> {
    let bytes = b.get(off..off + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn plausible_length(len: usize) -> bool {
    (HEADER_LEN..=MAX_FRAME_LEN).contains(&len)
}

pub struct FramedDecoder {
    direction: Direction,
    aligned: bool,
    buffer: Vec<u8>,
    discarded: u64,
}

impl FramedDecoder {
    pub fn new(direction: Direction, aligned: bool) -> Self {
        Self {
            direction,
            aligned,
            buffer: Vec::new(),
            discarded: 0,
        }
    }

    /// Bytes thrown away so far while looking for a frame boundary.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    fn looks_like_frame_start(chunk: &[u8]) -> bool {
        match (read_u32_be(chunk, 0), chunk.get(LEN_PREFIX)) {
            (Some(len), Some(&kind)) if chunk.len() >= LEN_PREFIX + HEADER_LEN => {
                plausible_length(len as usize) && (kind == KIND_CALL || kind == KIND_REPLY)
            }
            _ => false,
        }
    }

    /// Splits the next complete frame off the buffer, if there is one.
    ///
    /// A body error only loses that frame; a length error loses the framing.
    fn next_frame(&mut self) -> Result<Option<Result<DecodedFrame, FramingError>>, FramingError> {
        let len = match read_u32_be(&self.buffer, 0) {
            Some(len) => len as usize,
            None => return Ok(None),
        };
        if !plausible_length(len) {
            return Err(FramingError::BadLength(len));
        }
        if self.buffer.len() < LEN_PREFIX + len {
            return Ok(None);
        }

        let raw: Vec<u8> = self.buffer.drain(..LEN_PREFIX + len).collect();
        Ok(Some(Self::parse_frame(raw)))
    }

    fn parse_frame(raw: Vec<u8>) -> Result<DecodedFrame, FramingError> {
        let kind = raw[LEN_PREFIX];
        let call_key = read_u32_be(&raw, LEN_PREFIX + 1).map(CallKey);
        let rest = &raw[LEN_PREFIX + HEADER_LEN..];

        let (kind, body) = match kind {
            KIND_CALL => {
                let method_len = *rest.first().ok_or(FramingError::Truncated("method length"))?
                    as usize;
                let method = rest
                    .get(1..1 + method_len)
                    .ok_or(FramingError::Truncated("method name"))?;
                let method = std::str::from_utf8(method)
                    .map_err(|_| FramingError::BadMethodName)?
                    .to_string();
                (FrameKind::Call { method }, rest[1 + method_len..].to_vec())
            }
            KIND_REPLY => {
                let status_code = *rest.first().ok_or(FramingError::Truncated("status"))?;
                (FrameKind::Reply { status_code }, rest[1..].to_vec())
            }
            other => (FrameKind::Other { kind: other }, rest.to_vec()),
        };

        Ok(DecodedFrame {
            kind,
            call_key,
            body,
            raw,
        })
    }
}

impl StreamDecoder for FramedDecoder {
    fn push(&mut self, chunk: &[u8]) -> Vec<DecodedFrame> {
        if !self.aligned {
            if !Self::looks_like_frame_start(chunk) {
                self.discarded += chunk.len() as u64;
                trace!(
                    "{} stream not aligned, skipping {} bytes",
                    self.direction,
                    chunk.len()
                );
                return Vec::new();
            }
            debug!(
                "{} stream aligned after skipping {} bytes",
                self.direction, self.discarded
            );
            self.aligned = true;
        }

        self.buffer.extend_from_slice(chunk);

        let mut frames = Vec::new();
        loop {
            match self.next_frame() {
                Ok(Some(Ok(frame))) => frames.push(frame),
                Ok(Some(Err(e))) => debug!("{} frame dropped: {}", self.direction, e),
                Ok(None) => break,
                Err(e) => {
                    debug!(
                        "{} framing lost ({}), dropping {} buffered bytes",
                        self.direction,
                        e,
                        self.buffer.len()
                    );
                    self.discarded += self.buffer.len() as u64;
                    self.buffer.clear();
                    self.aligned = false;
                    break;
                }
            }
        }
        frames
    }

    fn finish(&mut self) -> Vec<DecodedFrame> {
        if !self.buffer.is_empty() {
            debug!(
                "{} stream ended inside a frame, dropping {} bytes",
                self.direction,
                self.buffer.len()
            );
            self.discarded += self.buffer.len() as u64;
            self.buffer.clear();
        }
        Vec::new()
    }
}

/// Builds a [`FramedDecoder`] for every connection direction.
#[derive(Debug, Default, Clone, Copy)]
pub struct FramedDecoderFactory;

impl DecoderFactory for FramedDecoderFactory {
    fn create(&self, direction: Direction, aligned: bool) -> Box<dyn StreamDecoder> {
        Box::new(FramedDecoder::new(direction, aligned))
    }
}

#[cfg(test)]
pub(crate) fn encode_call(id: u32, method: &str, args: &[u8]) -> Vec<u8> {
    let len = HEADER_LEN + 1 + method.len() + args.len();
    let mut out = Vec::with_capacity(LEN_PREFIX + len);
    out.extend_from_slice(&(len as u32).to_be_bytes());
    out.push(KIND_CALL);
    out.extend_from_slice(&id.to_be_bytes());
    out.push(method.len() as u8);
    out.extend_from_slice(method.as_bytes());
    out.extend_from_slice(args);
    out
}

#[cfg(test)]
pub(crate) fn encode_reply(id: u32, status: u8, payload: &[u8]) -> Vec<u8> {
    let len = HEADER_LEN + 1 + payload.len();
    let mut out = Vec::with_capacity(LEN_PREFIX + len);
    out.extend_from_slice(&(len as u32).to_be_bytes());
    out.push(KIND_REPLY);
    out.extend_from_slice(&id.to_be_bytes());
    out.push(status);
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_split_across_chunks() {
        let mut decoder = FramedDecoder::new(Direction::Outgoing, true);
        let mut stream = encode_call(7, "getUser", b"\x01\x02");
        stream.extend(encode_call(8, "ping", b""));

        let (a, b) = stream.split_at(6);
        assert!(decoder.push(a).is_empty());
        let frames = decoder.push(b);

        assert_eq!(frames.len(), 2);
        assert_eq!(
            frames[0].kind,
            FrameKind::Call {
                method: "getUser".to_string()
            }
        );
        assert_eq!(frames[0].call_key, Some(CallKey(7)));
        assert_eq!(frames[0].body, vec![1, 2]);
        assert_eq!(frames[0].raw, encode_call(7, "getUser", b"\x01\x02"));
        assert_eq!(frames[1].call_key, Some(CallKey(8)));
    }

    #[test]
    fn test_reply_and_unknown_kind() {
        let mut decoder = FramedDecoder::new(Direction::Incoming, true);
        let mut other = encode_reply(3, 0, b"xyz");
        other[LEN_PREFIX] = 9;

        let mut stream = encode_reply(3, 2, b"boom");
        stream.extend(other);
        let frames = decoder.push(&stream);

        assert_eq!(frames[0].kind, FrameKind::Reply { status_code: 2 });
        assert_eq!(frames[0].body, b"boom".to_vec());
        assert_eq!(frames[1].kind, FrameKind::Other { kind: 9 });
    }

    #[test]
    fn test_unaligned_decoder_waits_for_a_frame_start() {
        let mut decoder = FramedDecoder::new(Direction::Incoming, false);
        let tail_of_previous = [0xde, 0xad, 0xbe, 0xef, 0x00, 0x01];

        assert!(decoder.push(&tail_of_previous).is_empty());
        assert_eq!(decoder.discarded(), 6);

        let frames = decoder.push(&encode_reply(11, 0, b""));
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].call_key, Some(CallKey(11)));
    }

    #[test]
    fn test_bad_length_resynchronises() {
        let mut decoder = FramedDecoder::new(Direction::Outgoing, true);

        let garbage = [0xff, 0xff, 0xff, 0xff, 0x01, 0, 0, 0, 0];
        assert!(decoder.push(&garbage).is_empty());

        // Not a frame start, still skipped.
        assert!(decoder.push(b"noise").is_empty());

        let frames = decoder.push(&encode_call(1, "hello", b""));
        assert_eq!(frames.len(), 1);
        assert_eq!(decoder.discarded(), (garbage.len() + 5) as u64);
    }

    #[test]
    fn test_bad_body_only_drops_that_frame() {
        let mut decoder = FramedDecoder::new(Direction::Outgoing, true);
        let mut broken = encode_call(1, "ab", b"");
        // method length pointing past the end of the frame
        broken[LEN_PREFIX + HEADER_LEN] = 200;

        let mut stream = broken;
        stream.extend(encode_call(2, "ok", b""));
        let frames = decoder.push(&stream);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].call_key, Some(CallKey(2)));
    }

    #[test]
    fn test_finish_drops_partial_frame() {
        let mut decoder = FramedDecoder::new(Direction::Outgoing, true);
        let frame = encode_call(5, "slow", b"abcdef");

        assert!(decoder.push(&frame[..frame.len() - 2]).is_empty());
        assert!(decoder.finish().is_empty());
        assert_eq!(decoder.discarded(), (frame.len() - 2) as u64);
    }
}
