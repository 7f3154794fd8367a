use std::borrow::Cow;
use std::io::{self, Read};

use thiserror::Error;
use tracing::trace;

use crate::bits::{BitReader, ByteSource};
use crate::common::{AnyExtension, Block, DisposalMethod, Extension, Frame, Repeat};
use crate::lzw::{LzwDecoder, LzwStatus};
use crate::reader::converter;
use crate::reader::{DecodeOptions, MemoryLimit};
use crate::traits::ReadBytesExt;

/// GIF palettes are RGB
pub const PLTE_CHANNELS: usize = 3;

/// Error returned while decoding a GIF stream.
///
/// Structural errors carry the absolute byte offset at which they were detected.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DecodingError {
    /// The stream does not start with `GIF87a` or `GIF89a`.
    #[error("malformed GIF header at offset {offset}")]
    InvalidHeader {
        /// Byte offset.
        offset: u64,
    },
    /// A block introducer or extension label that is not supported.
    #[error("unknown block type 0x{kind:02x} at offset {offset}")]
    UnknownBlock {
        /// Byte offset.
        offset: u64,
        /// The introducer or extension label.
        kind: u8,
    },
    /// The stream ended before the structure was complete.
    #[error("unexpected end of stream at offset {offset}")]
    Truncated {
        /// Byte offset.
        offset: u64,
    },
    /// An LZW code was referenced before being defined.
    #[error("invalid LZW code {code} at offset {offset}")]
    LzwCorruption {
        /// Byte offset.
        offset: u64,
        /// The offending code.
        code: u16,
    },
    /// The image data announces an unusable LZW code size.
    #[error("invalid minimal code size {size} at offset {offset}")]
    InvalidMinCodeSize {
        /// Byte offset.
        offset: u64,
        /// The code size byte.
        size: u8,
    },
    /// A pixel refers past the end of the active color table.
    #[error("pixel index {index} exceeds color table of {colors} entries at offset {offset}")]
    PaletteIndex {
        /// Byte offset of the image data.
        offset: u64,
        /// The offending index.
        index: u8,
        /// Size of the active color table.
        colors: usize,
    },
    /// Neither a local nor a global color table is available for a frame.
    #[error("no color table available for frame at offset {offset}")]
    MissingColorTable {
        /// Byte offset.
        offset: u64,
    },
    /// The frame does not fit the logical screen. Only checked when enabled.
    #[error("frame {width}x{height}+{left}+{top} at offset {offset} is out-of-bounds")]
    FrameBounds {
        /// Byte offset.
        offset: u64,
        /// Frame left offset.
        left: u16,
        /// Frame top offset.
        top: u16,
        /// Frame width.
        width: u16,
        /// Frame height.
        height: u16,
    },
    /// The image data does not finish with End-of-Information. Only checked when enabled.
    #[error("no end code in LZW stream at offset {offset}")]
    MissingEndCode {
        /// Byte offset.
        offset: u64,
    },
    /// Other structural problems.
    #[error("{reason} at offset {offset}")]
    Format {
        /// Byte offset.
        offset: u64,
        /// What is wrong.
        reason: &'static str,
    },
    /// A frame or extension would exceed the configured memory limit.
    #[error("memory limit exceeded at offset {offset}")]
    MemoryLimit {
        /// Byte offset.
        offset: u64,
    },
    /// Wraps `std::io::Error`.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl DecodingError {
    #[cold]
    pub(crate) fn format(offset: u64, reason: &'static str) -> Self {
        DecodingError::Format { offset, reason }
    }

    /// Byte offset the error refers to, if any.
    pub fn offset(&self) -> Option<u64> {
        use self::DecodingError::*;
        match *self {
            InvalidHeader { offset }
            | UnknownBlock { offset, .. }
            | Truncated { offset }
            | LzwCorruption { offset, .. }
            | InvalidMinCodeSize { offset, .. }
            | PaletteIndex { offset, .. }
            | MissingColorTable { offset }
            | FrameBounds { offset, .. }
            | MissingEndCode { offset }
            | Format { offset, .. }
            | MemoryLimit { offset } => Some(offset),
            Io(_) => None,
        }
    }
}

/// One version number of the GIF standard.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Version {
    /// Version 87a, from May 1987.
    V87a,
    /// Version 89a, from July 1989.
    V89a,
}

/// Logical screen descriptor and global color table.
#[derive(Clone, Debug)]
pub struct Screen {
    /// Version from the header.
    pub version: Version,
    /// Logical screen width.
    pub width: u16,
    /// Logical screen height.
    pub height: u16,
    /// Global color table, RGB triples padded to a power of two.
    pub global_palette: Option<Vec<u8>>,
    /// Background color index.
    pub bg_color: u8,
}

/// Indicates what has been decoded by [`StreamingDecoder::next_block`].
#[derive(Debug)]
#[non_exhaustive]
pub enum Decoded {
    /// A block that carries nothing of interest, e.g. an unknown application extension.
    Nothing,
    /// Loop count from a NETSCAPE2.0 or ANIMEXTS1.0 extension.
    Repetitions(Repeat),
    /// Payload of a comment extension, sub-blocks concatenated.
    Comment(Vec<u8>),
    /// Payload of a plain text extension, sub-blocks concatenated.
    Text(Vec<u8>),
    /// Image descriptor and local color table of the next frame, together with the data of
    /// a preceding graphic control extension. The image data follows and must be read with
    /// [`StreamingDecoder::read_image_data`].
    FrameMetadata(Frame<'static>),
    /// The trailer has been reached.
    Trailer,
}

/// Counts consumed bytes so errors can name their offset.
struct CountingReader<R> {
    inner: R,
    offset: u64,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.offset += n as u64;
        Ok(n)
    }
}

struct ControlData {
    delay: u16,
    dispose: DisposalMethod,
    needs_user_input: bool,
    transparent: Option<u8>,
}

/// GIF decoder which reads the stream block by block.
///
/// To just get GIF frames, use [`crate::Decoder`] instead.
pub struct StreamingDecoder<R: Read> {
    reader: CountingReader<io::BufReader<R>>,
    memory_limit: MemoryLimit,
    check_frame_consistency: bool,
    check_for_end_code: bool,
    allow_unknown_blocks: bool,
    width: u16,
    height: u16,
    control: Option<ControlData>,
}

impl<R: Read> StreamingDecoder<R> {
    /// Creates a new streaming decoder with default options.
    #[must_use]
    pub fn new(r: R) -> Self {
        Self::with_options(r, &DecodeOptions::new())
    }

    pub(crate) fn with_options(r: R, options: &DecodeOptions) -> Self {
        StreamingDecoder {
            reader: CountingReader {
                inner: io::BufReader::new(r),
                offset: 0,
            },
            memory_limit: options.memory_limit.clone(),
            check_frame_consistency: options.check_frame_consistency,
            check_for_end_code: options.check_for_end_code,
            allow_unknown_blocks: options.allow_unknown_blocks,
            width: 0,
            height: 0,
            control: None,
        }
    }

    /// Number of bytes consumed so far.
    pub fn offset(&self) -> u64 {
        self.reader.offset
    }

    #[cold]
    fn io_error(&self, err: io::Error) -> DecodingError {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            DecodingError::Truncated {
                offset: self.reader.offset,
            }
        } else {
            DecodingError::Io(err)
        }
    }

    fn read_u8(&mut self) -> Result<u8, DecodingError> {
        self.reader.read_u8().map_err(|e| self.io_error(e))
    }

    fn read_le_u16(&mut self) -> Result<u16, DecodingError> {
        self.reader.read_le_u16().map_err(|e| self.io_error(e))
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), DecodingError> {
        self.reader.read_exact(buf).map_err(|e| self.io_error(e))
    }

    fn read_color_table(&mut self, flags: u8) -> Result<Vec<u8>, DecodingError> {
        let entries = 1usize << ((flags & 0b111) + 1);
        let mut table = vec![0; entries * PLTE_CHANNELS];
        self.read_exact(&mut table)?;
        Ok(table)
    }

    /// Reads the header, the logical screen descriptor and the global color table.
    pub fn read_header(&mut self) -> Result<Screen, DecodingError> {
        let mut magic = [0; 6];
        self.read_exact(&mut magic)?;
        let version = match &magic {
            b"GIF87a" => Version::V87a,
            b"GIF89a" => Version::V89a,
            _ => return Err(DecodingError::InvalidHeader { offset: 0 }),
        };
        self.width = self.read_le_u16()?;
        self.height = self.read_le_u16()?;
        let flags = self.read_u8()?;
        let bg_color = self.read_u8()?;
        let _aspect_ratio = self.read_u8()?;
        let global_palette = if flags & 0x80 != 0 {
            Some(self.read_color_table(flags)?)
        } else {
            None
        };
        Ok(Screen {
            version,
            width: self.width,
            height: self.height,
            global_palette,
            bg_color,
        })
    }

    /// Reads the next block. Image data is left in the stream after
    /// [`Decoded::FrameMetadata`].
    pub fn next_block(&mut self) -> Result<Decoded, DecodingError> {
        let offset = self.offset();
        let introducer = self.read_u8()?;
        match Block::from_u8(introducer) {
            Some(Block::Image) => self.read_image_descriptor(offset).map(Decoded::FrameMetadata),
            Some(Block::Extension) => self.read_extension(),
            Some(Block::Trailer) => Ok(Decoded::Trailer),
            None if self.allow_unknown_blocks => {
                self.skip_sub_blocks()?;
                Ok(Decoded::Nothing)
            }
            None => Err(DecodingError::UnknownBlock {
                offset,
                kind: introducer,
            }),
        }
    }

    fn read_extension(&mut self) -> Result<Decoded, DecodingError> {
        let offset = self.offset();
        let label = AnyExtension(self.read_u8()?);
        match label.into_known() {
            Some(Extension::Control) => {
                self.read_control_extension()?;
                Ok(Decoded::Nothing)
            }
            Some(Extension::Comment) => Ok(Decoded::Comment(self.read_sub_blocks()?)),
            Some(Extension::Text) => Ok(Decoded::Text(self.read_sub_blocks()?)),
            Some(Extension::Application) => self.read_application_extension(),
            None if self.allow_unknown_blocks => {
                self.skip_sub_blocks()?;
                Ok(Decoded::Nothing)
            }
            None => Err(DecodingError::UnknownBlock {
                offset,
                kind: label.0,
            }),
        }
    }

    fn read_control_extension(&mut self) -> Result<(), DecodingError> {
        let offset = self.offset();
        if self.read_u8()? != 4 {
            return Err(DecodingError::format(
                offset,
                "control extension has wrong length",
            ));
        }
        let flags = self.read_u8()?;
        let delay = self.read_le_u16()?;
        let trns = self.read_u8()?;
        self.skip_sub_blocks()?;
        self.control = Some(ControlData {
            delay,
            dispose: DisposalMethod::from_u8((flags & 0b11100) >> 2).unwrap_or(DisposalMethod::Any),
            needs_user_input: flags & 0b10 != 0,
            transparent: if flags & 1 != 0 { Some(trns) } else { None },
        });
        Ok(())
    }

    fn read_application_extension(&mut self) -> Result<Decoded, DecodingError> {
        let len = usize::from(self.read_u8()?);
        let mut ident = vec![0; len];
        self.read_exact(&mut ident)?;
        if ident != b"NETSCAPE2.0" && ident != b"ANIMEXTS1.0" {
            self.skip_sub_blocks()?;
            return Ok(Decoded::Nothing);
        }
        let data = self.read_sub_blocks()?;
        match data.as_slice() {
            [1, lo, hi, ..] => {
                let repeat = u16::from_le_bytes([*lo, *hi]);
                Ok(Decoded::Repetitions(if repeat == 0 {
                    Repeat::Infinite
                } else {
                    Repeat::Finite(repeat)
                }))
            }
            _ => Ok(Decoded::Nothing),
        }
    }

    fn read_image_descriptor(&mut self, offset: u64) -> Result<Frame<'static>, DecodingError> {
        let left = self.read_le_u16()?;
        let top = self.read_le_u16()?;
        let width = self.read_le_u16()?;
        let height = self.read_le_u16()?;
        let flags = self.read_u8()?;

        if self.check_frame_consistency
            && (u32::from(left) + u32::from(width) > u32::from(self.width)
                || u32::from(top) + u32::from(height) > u32::from(self.height))
        {
            return Err(DecodingError::FrameBounds {
                offset,
                left,
                top,
                width,
                height,
            });
        }

        let palette = if flags & 0b1000_0000 != 0 {
            Some(self.read_color_table(flags)?)
        } else {
            None
        };

        let mut frame = Frame {
            left,
            top,
            width,
            height,
            interlaced: flags & 0b0100_0000 != 0,
            palette,
            ..Frame::default()
        };
        // A graphic control extension only applies to the image that follows it.
        if let Some(control) = self.control.take() {
            frame.delay = control.delay;
            frame.dispose = control.dispose;
            frame.needs_user_input = control.needs_user_input;
            frame.transparent = control.transparent;
        }
        Ok(frame)
    }

    /// Decompresses the image data following [`Decoded::FrameMetadata`] into the frame.
    ///
    /// `colors` is the size of the active color table. The buffer is deinterlaced.
    pub fn read_image_data(
        &mut self,
        frame: &mut Frame<'static>,
        colors: usize,
    ) -> Result<(), DecodingError> {
        let offset = self.offset();
        let min_code_size = self.read_u8()?;
        let mut lzw = LzwDecoder::new(min_code_size).ok_or(DecodingError::InvalidMinCodeSize {
            offset,
            size: min_code_size,
        })?;

        let pixels = usize::from(frame.width) * usize::from(frame.height);
        if !self.memory_limit.fits(pixels) {
            return Err(DecodingError::MemoryLimit { offset });
        }
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(pixels)
            .map_err(|_| DecodingError::MemoryLimit { offset })?;

        let check_for_end_code = self.check_for_end_code;
        let mut bits = BitReader::new(SubBlocks::new(self));
        match lzw.decode(&mut bits, &mut buffer, pixels) {
            Ok(LzwStatus::Done) if buffer.len() < pixels => {
                return Err(DecodingError::Truncated {
                    offset: bits.offset(),
                })
            }
            Ok(LzwStatus::Done) => {}
            Ok(LzwStatus::LimitReached) if check_for_end_code => {
                match lzw.at_end_code(&mut bits) {
                    Ok(true) => {}
                    Ok(false) => {
                        return Err(DecodingError::MissingEndCode {
                            offset: bits.offset(),
                        })
                    }
                    Err(DecodingError::Truncated { offset }) if bits.source().is_done() => {
                        return Err(DecodingError::MissingEndCode { offset })
                    }
                    Err(err) => return Err(err),
                }
            }
            Ok(LzwStatus::LimitReached) => {}
            Err(err) => return Err(err),
        }
        bits.into_inner().skip_rest()?;

        if frame.interlaced {
            buffer = converter::deinterlace(&buffer, usize::from(frame.width));
            frame.interlaced = false;
        }
        if let Some(index) = buffer.iter().copied().find(|&i| usize::from(i) >= colors) {
            return Err(DecodingError::PaletteIndex {
                offset,
                index,
                colors,
            });
        }
        trace!(
            "decoded {}x{} image data at offset {}, min code size {}",
            frame.width,
            frame.height,
            offset,
            min_code_size
        );
        frame.buffer = Cow::Owned(buffer);
        Ok(())
    }

    /// Reads a sequence of sub-blocks and concatenates their payload.
    fn read_sub_blocks(&mut self) -> Result<Vec<u8>, DecodingError> {
        let mut data = Vec::new();
        loop {
            let offset = self.offset();
            let len = usize::from(self.read_u8()?);
            if len == 0 {
                return Ok(data);
            }
            if !self.memory_limit.fits(data.len() + len) {
                return Err(DecodingError::MemoryLimit { offset });
            }
            let start = data.len();
            data.resize(start + len, 0);
            self.read_exact(&mut data[start..])?;
        }
    }

    fn skip_sub_blocks(&mut self) -> Result<(), DecodingError> {
        SubBlocks::new(self).skip_rest()
    }
}

/// Payload of a sub-block sequence as one byte stream. Stops at the zero length terminator.
pub(crate) struct SubBlocks<'a, R: Read> {
    decoder: &'a mut StreamingDecoder<R>,
    left: usize,
    done: bool,
}

impl<'a, R: Read> SubBlocks<'a, R> {
    fn new(decoder: &'a mut StreamingDecoder<R>) -> Self {
        SubBlocks {
            decoder,
            left: 0,
            done: false,
        }
    }

    /// True once the terminator has been read.
    pub(crate) fn is_done(&self) -> bool {
        self.done
    }

    /// Consumes all remaining sub-blocks including the terminator.
    pub(crate) fn skip_rest(mut self) -> Result<(), DecodingError> {
        let mut scratch = [0; 0xFF];
        while !self.done {
            if self.left > 0 {
                let n = self.left;
                self.decoder.read_exact(&mut scratch[..n])?;
                self.left = 0;
            }
            match self.decoder.read_u8()? {
                0 => self.done = true,
                len => self.left = usize::from(len),
            }
        }
        Ok(())
    }
}

impl<R: Read> ByteSource for SubBlocks<'_, R> {
    fn next_byte(&mut self) -> Result<Option<u8>, DecodingError> {
        while !self.done {
            if self.left > 0 {
                self.left -= 1;
                return self.decoder.read_u8().map(Some);
            }
            match self.decoder.read_u8()? {
                0 => self.done = true,
                len => self.left = usize::from(len),
            }
        }
        Ok(None)
    }

    fn offset(&self) -> u64 {
        self.decoder.offset()
    }
}

#[test]
fn error_cast() {
    let _: Box<dyn std::error::Error> = DecodingError::format(0, "testing").into();
}

#[test]
fn offsets_are_reported() {
    let err = DecodingError::Truncated { offset: 42 };
    assert_eq!(err.offset(), Some(42));
    assert_eq!(err.to_string(), "unexpected end of stream at offset 42");
    let io = DecodingError::from(io::Error::from(io::ErrorKind::Other));
    assert_eq!(io.offset(), None);
}
