#![forbid(unsafe_code)]
//! # GIF frame splitter and composer
//!
//! Splits animated GIFs into one PNG per frame plus a JSON-friendly frame list, and composes
//! such lists back into GIF files. Underneath sits a complete GIF codec: LZW, color tables,
//! quantization of true color frames and a streaming decoder and encoder.
//!
//! ## File level interface
//!
//! ```rust,no_run
//! let meta = gifendec::decode("in.gif", "frames/").unwrap();
//! for frame in &meta.frames {
//!     println!("{} at {},{} for {:?}", frame.file, frame.left, frame.top, frame.delay);
//! }
//! gifendec::encode("out.gif", &meta, true, 5).unwrap();
//! ```
//!
//! ## Streaming interface
//!
//! ```rust
//! use gifendec::{DecodeOptions, Encoder, Frame, Repeat};
//!
//! let color_map = &[0xFF, 0xFF, 0xFF, 0, 0, 0];
//! let mut image = Vec::new();
//! {
//!     let mut encoder = Encoder::new(&mut image, 2, 2, color_map).unwrap();
//!     encoder.set_repeat(Repeat::Infinite).unwrap();
//!     encoder.write_frame(&Frame::from_indexed_pixels(2, 2, [0, 1, 1, 0], None)).unwrap();
//! }
//!
//! let mut decoder = DecodeOptions::new().read_info(&image[..]).unwrap();
//! while let Some(frame) = decoder.read_next_frame().unwrap() {
//!     assert_eq!(&*frame.buffer, &[0, 1, 1, 0]);
//! }
//! assert_eq!(decoder.repeat(), Repeat::Infinite);
//! ```
#![deny(missing_docs)]
#![allow(clippy::manual_range_contains)]

pub mod artifact;
pub mod bits;
mod common;
pub mod compose;
mod document;
mod encoder;
mod error;
mod files;
pub mod lzw;
mod meta;
pub mod palette;
pub mod quantize;
mod reader;
mod traits;

pub use crate::common::{AnyExtension, Delay, DisposalMethod, Extension, Frame, Repeat};

pub use crate::reader::{DecodeOptions, Decoder, DecoderIter, MemoryLimit, Version};
pub use crate::reader::DecodingError;

pub use crate::encoder::{Encoder, EncodingError, ExtensionData};

pub use crate::document::{EncodeOptions, GifDocument};
pub use crate::error::{Error, ErrorKind};
pub use crate::files::{decode, decode_with_options, encode, encode_with_options, encode_with_uri};
pub use crate::meta::{FrameMeta, GifMeta};

/// Low-level, advanced decoder. Prefer [`Decoder`] instead, which can stream frames too.
pub mod streaming_decoder {
    pub use crate::common::Block;
    pub use crate::reader::{Decoded, Screen, StreamingDecoder, PLTE_CHANNELS};
}
