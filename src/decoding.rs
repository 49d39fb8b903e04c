//! Frame decoding seam.
//!
//! The session layer only knows the [`StreamDecoder`] and [`DecoderFactory`]
//! traits; [`FramedDecoder`] is the length-prefixed implementation the binary
//! ships with.

pub mod framed_decoder;
pub mod stream_decoder;
pub mod types;

pub use framed_decoder::{FramedDecoder, FramedDecoderFactory};
pub use stream_decoder::{DecoderFactory, StreamDecoder};
pub use types::{CallKey, DecodedFrame, FrameKind, MethodLabel, TracedFrame};
