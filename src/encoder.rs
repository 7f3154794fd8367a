//! # GIF encoder
use std::borrow::Cow;
use std::cmp::min;
use std::io::{self, Write};

use thiserror::Error;
use tracing::trace;

use crate::bits::BitWriter;
use crate::common::{AnyExtension, Block, DisposalMethod, Extension, Frame, Repeat};
use crate::lzw::{min_code_size_for, LzwEncoder};
use crate::palette::MAX_COLORS;
use crate::reader::interlace;
use crate::traits::WriteBytesExt;

/// Encoding error.
///
/// Variants tied to a frame carry its zero-based position in the output.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EncodingError {
    /// A color table that GIF cannot store: empty or more than 256 colors.
    #[error("frame {frame}: {colors} colors cannot be stored in a GIF color table")]
    UnsupportedColorDepth {
        /// Frame index.
        frame: usize,
        /// Requested number of colors.
        colors: usize,
    },
    /// The frame does not fit the logical screen.
    #[error(
        "frame {frame}: {width}x{height}+{left}+{top} exceeds the {screen_width}x{screen_height} screen"
    )]
    FrameBounds {
        /// Frame index.
        frame: usize,
        /// Frame left offset.
        left: u16,
        /// Frame top offset.
        top: u16,
        /// Frame width.
        width: u16,
        /// Frame height.
        height: u16,
        /// Logical screen width.
        screen_width: u16,
        /// Logical screen height.
        screen_height: u16,
    },
    /// The frame has no local palette and the image has no global palette.
    #[error("frame {frame}: the GIF format requires a color palette but none was given")]
    MissingColorPalette {
        /// Frame index.
        frame: usize,
    },
    /// Frame buffer is too small for the declared dimensions.
    #[error("frame {frame}: {len} bytes are too few for {width}x{height} pixels")]
    FrameBufferTooSmall {
        /// Frame index.
        frame: usize,
        /// Buffer length.
        len: usize,
        /// Frame width.
        width: u16,
        /// Frame height.
        height: u16,
    },
    /// A pixel refers past the end of the active color table.
    #[error("frame {frame}: pixel index {index} exceeds color table of {colors} entries")]
    PaletteIndex {
        /// Frame index.
        frame: usize,
        /// The offending index.
        index: u8,
        /// Size of the active color table.
        colors: usize,
    },
    /// The speed setting is outside of 1..=10.
    #[error("speed {0} is outside of 1..=10")]
    InvalidSpeed(u8),
    /// The delay has a zero denominator.
    #[error("frame {frame}: delay has a zero denominator")]
    InvalidDelay {
        /// Frame index.
        frame: usize,
    },
    /// LZW data is not valid for GIF. This may happen when wrong buffer is given to
    /// `write_lzw_pre_encoded_frame`.
    #[error("frame {frame}: invalid LZW minimum code size {size}")]
    InvalidMinCodeSize {
        /// Frame index.
        frame: usize,
        /// The code size byte.
        size: u8,
    },
    /// Wraps `std::io::Error`.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl EncodingError {
    /// Index of the frame the error refers to, if any.
    pub fn frame(&self) -> Option<usize> {
        use self::EncodingError::*;
        match *self {
            UnsupportedColorDepth { frame, .. }
            | FrameBounds { frame, .. }
            | MissingColorPalette { frame }
            | FrameBufferTooSmall { frame, .. }
            | PaletteIndex { frame, .. }
            | InvalidDelay { frame }
            | InvalidMinCodeSize { frame, .. } => Some(frame),
            InvalidSpeed(_) | Io(_) => None,
        }
    }
}

/// Extension data.
#[non_exhaustive]
pub enum ExtensionData {
    /// Control extension. Use `ExtensionData::new_control_ext` to construct.
    Control {
        /// Flags.
        flags: u8,
        /// Frame delay.
        delay: u16,
        /// Transparent index.
        trns: u8,
    },
    /// Sets the number of repetitions
    Repetitions(Repeat),
}

impl ExtensionData {
    /// Constructor for control extension data.
    ///
    /// `delay` is given in units of 10 ms.
    #[must_use]
    pub fn new_control_ext(
        delay: u16,
        dispose: DisposalMethod,
        needs_user_input: bool,
        trns: Option<u8>,
    ) -> Self {
        let mut flags = 0;
        let trns = match trns {
            Some(trns) => {
                flags |= 1;
                trns
            }
            None => 0,
        };
        flags |= u8::from(needs_user_input) << 1;
        flags |= (dispose as u8) << 2;
        ExtensionData::Control { flags, delay, trns }
    }
}

/// Splits written data into sub-blocks of at most 255 bytes.
///
/// [`BlockWriter::finish`] writes the last partial block and the terminator.
struct BlockWriter<'a, W: Write + 'a> {
    w: &'a mut W,
    bytes: usize,
    buf: [u8; 0xFF],
}

impl<'a, W: Write + 'a> BlockWriter<'a, W> {
    fn new(w: &'a mut W) -> BlockWriter<'a, W> {
        BlockWriter {
            w,
            bytes: 0,
            buf: [0; 0xFF],
        }
    }

    fn finish(self) -> io::Result<()> {
        if self.bytes > 0 {
            self.w.write_le(self.bytes as u8)?;
            self.w.write_all(&self.buf[..self.bytes])?;
        }
        self.w.write_le(0u8)
    }
}

impl<'a, W: Write + 'a> Write for BlockWriter<'a, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let to_copy = min(buf.len(), 0xFF - self.bytes);
        self.buf[self.bytes..][..to_copy].copy_from_slice(&buf[..to_copy]);
        self.bytes += to_copy;
        if self.bytes == 0xFF {
            self.bytes = 0;
            self.w.write_le(0xFFu8)?;
            self.w.write_all(&self.buf)?;
        }
        Ok(to_copy)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// GIF encoder.
pub struct Encoder<W: Write> {
    w: Option<W>,
    /// Colors in the global table, if there is one.
    global_colors: Option<usize>,
    width: u16,
    height: u16,
    frames: usize,
}

impl<W: Write> Encoder<W> {
    /// Creates a new encoder and writes the header and logical screen descriptor.
    ///
    /// `global_palette` gives the global color palette in the format `[r, g, b, ...]`,
    /// if no global palette shall be used an empty slice may be supplied.
    pub fn new(
        w: W,
        width: u16,
        height: u16,
        global_palette: &[u8],
    ) -> Result<Self, EncodingError> {
        Encoder {
            w: Some(w),
            global_colors: None,
            width,
            height,
            frames: 0,
        }
        .write_global_palette(global_palette)
    }

    /// Write an extension block that signals a repeat behaviour.
    ///
    /// `Repeat::Finite(0)` writes nothing.
    pub fn set_repeat(&mut self, repeat: Repeat) -> Result<(), EncodingError> {
        self.write_extension(ExtensionData::Repetitions(repeat))
    }

    /// Writes a comment extension. Text longer than 255 bytes is split into sub-blocks.
    pub fn write_comment(&mut self, text: &[u8]) -> Result<(), EncodingError> {
        self.write_raw_extension(Extension::Comment.into(), &[text])
    }

    /// Number of frames written so far.
    pub fn frames_written(&self) -> usize {
        self.frames
    }

    fn write_global_palette(mut self, palette: &[u8]) -> Result<Self, EncodingError> {
        let mut flags = 0;
        let table = if palette.is_empty() {
            None
        } else {
            let (palette, padding, table_size) = check_color_table(palette, 0)?;
            self.global_colors = Some(palette.len() / 3);
            flags |= 0b1000_0000;
            flags |= table_size;
            flags |= table_size << 4;
            Some((palette, padding))
        };
        self.write_screen_desc(flags)?;
        if let Some((palette, padding)) = table {
            write_color_table(self.writer()?, palette, padding)?;
        }
        Ok(self)
    }

    /// Writes a frame to the image.
    ///
    /// The buffer holds one palette index per pixel, rows top to bottom. Interlaced frames
    /// are reordered before compression.
    ///
    /// Note: This function also writes a control extension.
    pub fn write_frame(&mut self, frame: &Frame<'_>) -> Result<(), EncodingError> {
        let index = self.frames;
        let pixels = usize::from(frame.width) * usize::from(frame.height);
        if frame.buffer.len() < pixels {
            return Err(EncodingError::FrameBufferTooSmall {
                frame: index,
                len: frame.buffer.len(),
                width: frame.width,
                height: frame.height,
            });
        }
        let colors = self.active_colors(frame)?;
        let data = &frame.buffer[..pixels];
        if let Some(&bad) = data.iter().find(|&&i| usize::from(i) >= colors) {
            return Err(EncodingError::PaletteIndex {
                frame: index,
                index: bad,
                colors,
            });
        }
        let encoded = lzw_encode(data, frame)?;
        self.write_frame_header(frame)?;
        if let Some((&min_code_size, data)) = encoded.split_first() {
            self.write_encoded_image_block(min_code_size, data)?;
        }
        self.frames += 1;
        Ok(())
    }

    /// Writes a frame to the image, but expects `Frame.buffer` to contain LZW-encoded data
    /// from [`Frame::make_lzw_pre_encoded`].
    ///
    /// Note: This function also writes a control extension.
    pub fn write_lzw_pre_encoded_frame(&mut self, frame: &Frame<'_>) -> Result<(), EncodingError> {
        let index = self.frames;
        let Some((&min_code_size, data)) = frame.buffer.split_first() else {
            return Err(EncodingError::FrameBufferTooSmall {
                frame: index,
                len: 0,
                width: frame.width,
                height: frame.height,
            });
        };
        if !(2..=8).contains(&min_code_size) {
            return Err(EncodingError::InvalidMinCodeSize {
                frame: index,
                size: min_code_size,
            });
        }
        self.active_colors(frame)?;
        self.write_frame_header(frame)?;
        self.write_encoded_image_block(min_code_size, data)?;
        self.frames += 1;
        Ok(())
    }

    fn active_colors(&self, frame: &Frame<'_>) -> Result<usize, EncodingError> {
        let index = self.frames;
        if frame.right() > u32::from(self.width) || frame.bottom() > u32::from(self.height) {
            return Err(EncodingError::FrameBounds {
                frame: index,
                left: frame.left,
                top: frame.top,
                width: frame.width,
                height: frame.height,
                screen_width: self.width,
                screen_height: self.height,
            });
        }
        match frame.palette {
            Some(ref palette) => Ok(check_color_table(palette, index)?.0.len() / 3),
            None => self
                .global_colors
                .ok_or(EncodingError::MissingColorPalette { frame: index }),
        }
    }

    fn write_frame_header(&mut self, frame: &Frame<'_>) -> Result<(), EncodingError> {
        let index = self.frames;
        self.write_extension(ExtensionData::new_control_ext(
            frame.delay,
            frame.dispose,
            frame.needs_user_input,
            frame.transparent,
        ))?;
        let mut flags = 0;
        if frame.interlaced {
            flags |= 0b0100_0000;
        }
        let palette = match frame.palette {
            Some(ref palette) => {
                flags |= 0b1000_0000;
                let (palette, padding, table_size) = check_color_table(palette, index)?;
                flags |= table_size;
                Some((palette, padding))
            }
            None => None,
        };
        let writer = self.writer()?;
        writer.write_le(Block::Image as u8)?;
        writer.write_le(frame.left)?;
        writer.write_le(frame.top)?;
        writer.write_le(frame.width)?;
        writer.write_le(frame.height)?;
        writer.write_le(flags)?;
        if let Some((palette, padding)) = palette {
            write_color_table(writer, palette, padding)?;
        }
        trace!(
            "frame {}: {}x{}+{}+{}, delay {}cs, local palette: {}",
            index,
            frame.width,
            frame.height,
            frame.left,
            frame.top,
            frame.delay,
            frame.palette.is_some()
        );
        Ok(())
    }

    fn write_encoded_image_block(&mut self, min_code_size: u8, data: &[u8]) -> Result<(), EncodingError> {
        let writer = self.writer()?;
        writer.write_le(min_code_size)?;
        let mut blocks = BlockWriter::new(writer);
        blocks.write_all(data)?;
        blocks.finish()?;
        trace!("frame {}: {} bytes of LZW data", self.frames, data.len());
        Ok(())
    }

    /// Writes an extension to the image.
    ///
    /// It is normally not necessary to call this method manually.
    pub fn write_extension(&mut self, extension: ExtensionData) -> Result<(), EncodingError> {
        use self::ExtensionData::*;
        if let Repetitions(Repeat::Finite(0)) = extension {
            return Ok(());
        }
        let writer = self.writer()?;
        writer.write_le(Block::Extension as u8)?;
        match extension {
            Control { flags, delay, trns } => {
                writer.write_le(Extension::Control as u8)?;
                writer.write_le(4u8)?;
                writer.write_le(flags)?;
                writer.write_le(delay)?;
                writer.write_le(trns)?;
            }
            Repetitions(repeat) => {
                writer.write_le(Extension::Application as u8)?;
                writer.write_le(11u8)?;
                writer.write_all(b"NETSCAPE2.0")?;
                writer.write_le(3u8)?;
                writer.write_le(1u8)?;
                writer.write_le(match repeat {
                    Repeat::Finite(no) => no,
                    Repeat::Infinite => 0u16,
                })?;
            }
        }
        writer.write_le(0u8)?;
        Ok(())
    }

    /// Writes a raw extension to the image.
    ///
    /// `func` is the extension identifier (e.g. `Extension::Comment.into()`). `data` are the
    /// extension payload blocks. If any contained slice has a length > 255 it is automatically
    /// divided into sub-blocks.
    pub fn write_raw_extension(
        &mut self,
        func: AnyExtension,
        data: &[&[u8]],
    ) -> Result<(), EncodingError> {
        let writer = self.writer()?;
        writer.write_le(Block::Extension as u8)?;
        writer.write_le(func.0)?;
        for block in data {
            for chunk in block.chunks(0xFF) {
                writer.write_le(chunk.len() as u8)?;
                writer.write_all(chunk)?;
            }
        }
        writer.write_le(0u8)?;
        Ok(())
    }

    fn write_screen_desc(&mut self, flags: u8) -> Result<(), EncodingError> {
        let width = self.width;
        let height = self.height;
        let writer = self.writer()?;
        writer.write_all(b"GIF89a")?;
        writer.write_le(width)?;
        writer.write_le(height)?;
        writer.write_le(flags)?;
        writer.write_le(0u8)?; // background color
        writer.write_le(0u8)?; // aspect ratio
        Ok(())
    }

    /// Finishes writing, and returns the `io::Write` instance used by this encoder
    pub fn into_inner(mut self) -> Result<W, EncodingError> {
        self.write_trailer()?;
        self.w.take().ok_or_else(writer_gone)
    }

    fn write_trailer(&mut self) -> Result<(), EncodingError> {
        self.writer()?.write_le(Block::Trailer as u8)?;
        Ok(())
    }

    #[inline]
    fn writer(&mut self) -> Result<&mut W, EncodingError> {
        self.w.as_mut().ok_or_else(writer_gone)
    }
}

#[cold]
fn writer_gone() -> EncodingError {
    EncodingError::Io(io::Error::new(
        io::ErrorKind::Other,
        "the writer was already taken",
    ))
}

impl<W: Write> Drop for Encoder<W> {
    #[cfg(feature = "raii_no_panic")]
    fn drop(&mut self) {
        if self.w.is_some() {
            let _ = self.write_trailer();
        }
    }

    #[cfg(not(feature = "raii_no_panic"))]
    fn drop(&mut self) {
        if self.w.is_some() {
            if let Err(err) = self.write_trailer() {
                panic!("failed to write the GIF trailer: {err}");
            }
        }
    }
}

fn write_color_table<W: Write>(writer: &mut W, table: &[u8], padding: usize) -> io::Result<()> {
    writer.write_all(table)?;
    for _ in 0..padding {
        writer.write_all(&[0, 0, 0])?;
    }
    Ok(())
}

fn check_color_table(table: &[u8], frame: usize) -> Result<(&[u8], usize, u8), EncodingError> {
    let num_colors = table.len() / 3;
    if num_colors == 0 || num_colors > MAX_COLORS {
        return Err(EncodingError::UnsupportedColorDepth {
            frame,
            colors: num_colors,
        });
    }
    let table_size = flag_size(num_colors);
    let padding = (2 << table_size) - num_colors;
    Ok((&table[..num_colors * 3], padding, table_size))
}

/// Compresses frame data. The first byte is the minimum code size, followed by LZW data.
///
/// The code size covers the local palette and every index in the data, so frames compress
/// identically whether or not they were pre-encoded.
fn lzw_encode(data: &[u8], frame: &Frame<'_>) -> io::Result<Vec<u8>> {
    let max_byte = data.iter().copied().max().unwrap_or(0);
    let local = frame.palette.as_ref().map_or(0, |p| p.len() / 3);
    let min_code_size = min_code_size_for(local.max(usize::from(max_byte) + 1));
    let interlaced;
    let data = if frame.interlaced {
        interlaced = interlace(data, usize::from(frame.width));
        &interlaced[..]
    } else {
        data
    };

    let mut buffer = Vec::with_capacity(data.len() / 2 + 1);
    buffer.push(min_code_size);
    let mut encoder = LzwEncoder::new(min_code_size)
        .ok_or_else(|| io::Error::from(io::ErrorKind::InvalidInput))?;
    let mut bits = BitWriter::new(&mut buffer);
    encoder.encode(data, &mut bits)?;
    Ok(buffer)
}

impl Frame<'_> {
    /// Replace frame's buffer with a LZW-compressed one for use with
    /// [`Encoder::write_lzw_pre_encoded_frame`].
    ///
    /// Frames can be compressed in any order, separately from the `Encoder`, which can be used
    /// to compress frames in parallel.
    pub fn make_lzw_pre_encoded(&mut self) -> Result<(), EncodingError> {
        let pixels = usize::from(self.width) * usize::from(self.height);
        let data = self
            .buffer
            .get(..pixels)
            .ok_or(EncodingError::FrameBufferTooSmall {
                frame: 0,
                len: self.buffer.len(),
                width: self.width,
                height: self.height,
            })?;
        let encoded = lzw_encode(data, self)?;
        self.buffer = Cow::Owned(encoded);
        Ok(())
    }
}

// Color table size converted to flag bits
fn flag_size(size: usize) -> u8 {
    (size.clamp(2, 255).next_power_of_two().trailing_zeros() - 1) as u8
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_flag_size() {
        #[rustfmt::skip]
        fn expected(size: usize) -> u8 {
            match size {
                0  ..=2   => 0,
                3  ..=4   => 1,
                5  ..=8   => 2,
                9  ..=16  => 3,
                17 ..=32  => 4,
                33 ..=64  => 5,
                65 ..=128 => 6,
                129..=256 => 7,
                _ => 7
            }
        }

        for i in 0..300 {
            assert_eq!(flag_size(i), expected(i));
        }
    }

    #[test]
    fn block_writer_chunks() {
        let mut out = Vec::new();
        let mut blocks = BlockWriter::new(&mut out);
        blocks.write_all(&[7; 300]).unwrap();
        blocks.finish().unwrap();
        assert_eq!(out.len(), 1 + 255 + 1 + 45 + 1);
        assert_eq!(out[0], 255);
        assert_eq!(out[256], 45);
        assert_eq!(out[out.len() - 1], 0);
    }

    #[test]
    fn minimal_file() {
        let mut out = Vec::new();
        {
            let mut encoder = Encoder::new(&mut out, 1, 1, &[0, 0, 0, 255, 255, 255]).unwrap();
            encoder
                .write_frame(&Frame::from_indexed_pixels(1, 1, [1], None))
                .unwrap();
            encoder.into_inner().unwrap();
        }
        assert_eq!(&out[..6], b"GIF89a");
        // global table flag, 2 entries, color resolution 1
        assert_eq!(out[10], 0b1000_0000);
        assert_eq!(out[13..19], [0, 0, 0, 255, 255, 255]);
        // control extension
        assert_eq!(out[19..23], [0x21, 0xF9, 4, (DisposalMethod::Keep as u8) << 2]);
        assert_eq!(out.last(), Some(&0x3B));
    }

    #[test]
    fn drop_writes_trailer() {
        let mut out = Vec::new();
        {
            let mut encoder = Encoder::new(&mut out, 2, 2, &[0; 6]).unwrap();
            encoder
                .write_frame(&Frame::from_indexed_pixels(2, 2, [0, 1, 1, 0], None))
                .unwrap();
        }
        assert_eq!(out.last(), Some(&0x3B));
    }

    #[test]
    fn frame_errors_name_the_frame() {
        let mut encoder = Encoder::new(Vec::new(), 4, 4, &[]).unwrap();
        let palette = vec![0u8; 6];
        let ok = Frame::from_palette_pixels(2, 2, [0, 1, 0, 1], palette.clone(), None);
        encoder.write_frame(&ok).unwrap();

        let mut outside = ok.clone();
        outside.left = 3;
        match encoder.write_frame(&outside) {
            Err(err @ EncodingError::FrameBounds { .. }) => assert_eq!(err.frame(), Some(1)),
            other => panic!("unexpected {:?}", other),
        }

        let bad_index = Frame::from_palette_pixels(2, 2, [0, 1, 2, 1], palette, None);
        match encoder.write_frame(&bad_index) {
            Err(EncodingError::PaletteIndex { frame: 1, index: 2, colors: 2 }) => {}
            other => panic!("unexpected {:?}", other),
        }

        let no_palette = Frame::from_indexed_pixels(1, 1, [0], None);
        match encoder.write_frame(&no_palette) {
            Err(EncodingError::MissingColorPalette { frame: 1 }) => {}
            other => panic!("unexpected {:?}", other),
        }

        let mut short = ok.clone();
        short.buffer = Cow::Borrowed(&[0, 0]);
        assert!(matches!(
            encoder.write_frame(&short),
            Err(EncodingError::FrameBufferTooSmall { frame: 1, len: 2, .. })
        ));
        assert_eq!(encoder.frames_written(), 1);
    }

    #[test]
    fn pre_encoded_matches_direct() {
        let palette: Vec<u8> = (0..48).collect();
        let pixels: Vec<u8> = (0..100).map(|i| (i * 7 % 16) as u8).collect();
        let frame = Frame::from_palette_pixels(10, 10, pixels, palette, Some(3));

        let mut direct = Encoder::new(Vec::new(), 10, 10, &[]).unwrap();
        direct.write_frame(&frame).unwrap();
        let direct = direct.into_inner().unwrap();

        let mut pre = frame.clone();
        pre.make_lzw_pre_encoded().unwrap();
        let mut encoder = Encoder::new(Vec::new(), 10, 10, &[]).unwrap();
        encoder.write_lzw_pre_encoded_frame(&pre).unwrap();
        assert_eq!(encoder.into_inner().unwrap(), direct);
    }
}
