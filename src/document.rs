//! Whole-file model on top of [`Decoder`](crate::Decoder) and [`Encoder`].
use std::io::{Read, Write};

#[cfg(feature = "rayon")]
use rayon::prelude::*;
use tracing::debug;

use crate::common::{Extension, Frame, Repeat};
use crate::encoder::{Encoder, EncodingError};
use crate::palette::{ColorTable, MAX_COLORS};
use crate::quantize::{build_palette, remap, Quantizer, DEFAULT_SPEED};
use crate::reader::{indices_to_rgba, DecodeOptions, DecodingError};

/// Options for building a [`GifDocument`] from frames.
#[derive(Clone, Debug)]
pub struct EncodeOptions {
    pub(crate) repeat: Repeat,
    pub(crate) speed: u8,
    pub(crate) max_colors: u16,
    pub(crate) dither: bool,
    pub(crate) screen: Option<(u16, u16)>,
    pub(crate) auto_grow: bool,
    pub(crate) global_palette: bool,
    pub(crate) comment: Option<String>,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl EncodeOptions {
    /// Plays once, speed 5, up to 256 colors per frame, screen sized to fit the frames.
    #[must_use]
    pub fn new() -> Self {
        EncodeOptions {
            repeat: Repeat::Finite(0),
            speed: DEFAULT_SPEED,
            max_colors: MAX_COLORS as u16,
            dither: false,
            screen: None,
            auto_grow: true,
            global_palette: false,
            comment: None,
        }
    }

    /// Loop behaviour. `Repeat::Finite(0)` writes no loop extension.
    pub fn set_repeat(&mut self, repeat: Repeat) -> &mut Self {
        self.repeat = repeat;
        self
    }

    /// Loop forever, or play once.
    pub fn set_infinite(&mut self, infinite: bool) -> &mut Self {
        self.repeat = if infinite {
            Repeat::Infinite
        } else {
            Repeat::Finite(0)
        };
        self
    }

    /// Quantization speed from 1 (best quality) to 10 (fastest).
    ///
    /// Checked when the options are used, see [`EncodeOptions::quantizer`].
    pub fn set_speed(&mut self, speed: u8) -> &mut Self {
        self.speed = speed;
        self
    }

    /// Palette size limit for quantized frames, 2 to 256, including the transparent entry.
    pub fn set_max_colors(&mut self, colors: u16) -> &mut Self {
        self.max_colors = colors;
        self
    }

    /// Diffuse the quantization error.
    ///
    /// The default is `false`.
    pub fn set_dither(&mut self, dither: bool) -> &mut Self {
        self.dither = dither;
        self
    }

    /// Explicit logical screen size instead of the union of the frame bounds.
    pub fn set_screen(&mut self, width: u16, height: u16) -> &mut Self {
        self.screen = Some((width, height));
        self
    }

    /// Grow an explicit screen to fit frames that extend past it.
    ///
    /// The default is `true`. When turned off such frames fail with
    /// [`EncodingError::FrameBounds`].
    pub fn set_auto_grow(&mut self, grow: bool) -> &mut Self {
        self.auto_grow = grow;
        self
    }

    /// Store one palette in the global color table instead of one per frame.
    ///
    /// The default is `false`. Frames whose palettes differ are requantized to a shared one.
    pub fn set_global_palette(&mut self, global: bool) -> &mut Self {
        self.global_palette = global;
        self
    }

    /// Text stored in a comment extension right after the screen, before the loop extension.
    pub fn set_comment(&mut self, comment: Option<String>) -> &mut Self {
        self.comment = comment;
        self
    }

    /// Quantizer for the speed and palette size settings.
    pub fn quantizer(&self) -> Result<Quantizer, EncodingError> {
        Quantizer::new(self.speed, usize::from(self.max_colors)).ok_or_else(|| {
            if (2..=MAX_COLORS).contains(&usize::from(self.max_colors)) {
                EncodingError::InvalidSpeed(self.speed)
            } else {
                EncodingError::UnsupportedColorDepth {
                    frame: 0,
                    colors: usize::from(self.max_colors),
                }
            }
        })
    }

    /// Whether quantization diffuses the error.
    pub fn dither(&self) -> bool {
        self.dither
    }
}

/// A complete GIF: screen, palettes, loop count, comments and indexed frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GifDocument {
    /// Logical screen width.
    pub width: u16,
    /// Logical screen height.
    pub height: u16,
    /// Global color table.
    pub global_palette: Option<ColorTable>,
    /// Background color index into the global table.
    pub bg_color: Option<usize>,
    /// Loop behaviour.
    pub repeat: Repeat,
    /// Payloads of comment extensions, in file order.
    pub comments: Vec<Vec<u8>>,
    /// Payloads of plain text extensions, sub-blocks concatenated.
    pub texts: Vec<Vec<u8>>,
    /// Frames in display order. Buffers hold palette indices.
    pub frames: Vec<Frame<'static>>,
}

impl GifDocument {
    /// Reads a whole GIF.
    pub fn decode<R: Read>(r: R, options: DecodeOptions) -> Result<Self, DecodingError> {
        let decoder = options.read_info(r)?;
        let global_palette = decoder.global_palette().and_then(ColorTable::from_rgb_bytes);
        let bg_color = decoder.bg_color();
        let (width, height) = (decoder.width(), decoder.height());

        let mut frames = decoder.into_iter();
        let collected = frames.by_ref().collect::<Result<Vec<_>, _>>()?;
        let decoder = frames.decoder();
        debug!(
            "decoded {} frames, {:?}, {} bytes",
            collected.len(),
            decoder.repeat(),
            decoder.offset()
        );
        Ok(GifDocument {
            width,
            height,
            global_palette,
            bg_color,
            repeat: decoder.repeat(),
            comments: decoder.comments().to_vec(),
            texts: decoder.texts().to_vec(),
            frames: collected,
        })
    }

    /// Arranges frames on a screen.
    ///
    /// The screen is the explicit one from `options`, grown to fit when allowed, or else the
    /// union of all frame rectangles.
    pub fn new(mut frames: Vec<Frame<'static>>, options: &EncodeOptions) -> Result<Self, EncodingError> {
        let (width, height) = screen_size(&frames, options)?;
        let global_palette = if options.global_palette {
            share_palette(&mut frames, options)?
        } else {
            None
        };
        Ok(GifDocument {
            width,
            height,
            global_palette,
            bg_color: None,
            repeat: options.repeat,
            comments: options
                .comment
                .iter()
                .map(|comment| comment.as_bytes().to_vec())
                .collect(),
            texts: Vec::new(),
            frames,
        })
    }

    /// Writes the document and returns the writer.
    ///
    /// Frames are compressed up front, in parallel with the `rayon` feature, and written in
    /// order. The first failing frame in order decides the error.
    pub fn write<W: Write>(&self, w: W) -> Result<W, EncodingError> {
        let global = self
            .global_palette
            .as_ref()
            .map(ColorTable::as_rgb_bytes)
            .unwrap_or_default();
        let mut encoder = Encoder::new(w, self.width, self.height, &global)?;
        for comment in &self.comments {
            encoder.write_comment(comment)?;
        }
        for text in &self.texts {
            encoder.write_raw_extension(Extension::Text.into(), &[text.as_slice()])?;
        }
        encoder.set_repeat(self.repeat)?;

        #[cfg(feature = "rayon")]
        let compressed: Vec<_> = self
            .frames
            .par_iter()
            .enumerate()
            .map(|(index, frame)| self.compress(index, frame))
            .collect();
        #[cfg(not(feature = "rayon"))]
        let compressed: Vec<_> = self
            .frames
            .iter()
            .enumerate()
            .map(|(index, frame)| self.compress(index, frame))
            .collect();

        for frame in compressed {
            encoder.write_lzw_pre_encoded_frame(&frame?)?;
        }
        debug!(
            "encoded {}x{} screen, {} frames, {:?}",
            self.width,
            self.height,
            encoder.frames_written(),
            self.repeat
        );
        encoder.into_inner()
    }

    /// Encodes into a new buffer.
    pub fn to_vec(&self) -> Result<Vec<u8>, EncodingError> {
        self.write(Vec::new())
    }

    fn compress(&self, index: usize, frame: &Frame<'static>) -> Result<Frame<'static>, EncodingError> {
        let pixels = usize::from(frame.width) * usize::from(frame.height);
        let data = frame
            .buffer
            .get(..pixels)
            .ok_or(EncodingError::FrameBufferTooSmall {
                frame: index,
                len: frame.buffer.len(),
                width: frame.width,
                height: frame.height,
            })?;
        let colors = match frame.palette {
            Some(ref palette) => palette.len() / 3,
            None => self.global_palette.as_ref().map_or(0, ColorTable::len),
        };
        // no table at all is reported by the encoder
        if colors > 0 {
            check_indices(data, colors, index)?;
        }
        let mut frame = frame.clone();
        frame.make_lzw_pre_encoded()?;
        Ok(frame)
    }
}

fn check_indices(data: &[u8], colors: usize, frame: usize) -> Result<(), EncodingError> {
    match data.iter().find(|&&i| usize::from(i) >= colors) {
        Some(&index) => Err(EncodingError::PaletteIndex {
            frame,
            index,
            colors,
        }),
        None => Ok(()),
    }
}

fn screen_size(frames: &[Frame<'_>], options: &EncodeOptions) -> Result<(u16, u16), EncodingError> {
    let (mut width, mut height) = options.screen.unwrap_or((0, 0));
    for (index, frame) in frames.iter().enumerate() {
        let (right, bottom) = (frame.right(), frame.bottom());
        let outside = right > u32::from(width) || bottom > u32::from(height);
        let grow = options.screen.is_none() || options.auto_grow;
        if outside && (!grow || right > u32::from(u16::MAX) || bottom > u32::from(u16::MAX)) {
            return Err(EncodingError::FrameBounds {
                frame: index,
                left: frame.left,
                top: frame.top,
                width: frame.width,
                height: frame.height,
                screen_width: width,
                screen_height: height,
            });
        }
        width = width.max(right as u16);
        height = height.max(bottom as u16);
    }
    Ok((width, height))
}

/// Moves the frame palettes into one global table.
///
/// Identical palettes are hoisted as they are. Otherwise all frames are expanded and
/// requantized to a palette built from every frame.
fn share_palette(
    frames: &mut [Frame<'static>],
    options: &EncodeOptions,
) -> Result<Option<ColorTable>, EncodingError> {
    let Some(first) = frames.first() else {
        return Ok(None);
    };
    let first = first
        .palette
        .clone()
        .ok_or(EncodingError::MissingColorPalette { frame: 0 })?;
    if frames.iter().all(|frame| frame.palette.as_ref() == Some(&first)) {
        let table = ColorTable::from_rgb_bytes(&first).ok_or(EncodingError::UnsupportedColorDepth {
            frame: 0,
            colors: first.len() / 3,
        })?;
        for frame in frames.iter_mut() {
            frame.palette = None;
        }
        return Ok(Some(table));
    }

    let quantizer = options.quantizer()?;
    let mut images = Vec::with_capacity(frames.len());
    for (index, frame) in frames.iter().enumerate() {
        let palette = frame
            .palette
            .as_deref()
            .ok_or(EncodingError::MissingColorPalette { frame: index })?;
        let pixels = usize::from(frame.width) * usize::from(frame.height);
        let data = frame
            .buffer
            .get(..pixels)
            .ok_or(EncodingError::FrameBufferTooSmall {
                frame: index,
                len: frame.buffer.len(),
                width: frame.width,
                height: frame.height,
            })?;
        check_indices(data, palette.len() / 3, index)?;
        images.push(indices_to_rgba(data, palette, frame.transparent));
    }

    let (table, transparent) = build_palette(images.iter().map(Vec::as_slice), &quantizer);
    for (frame, rgba) in frames.iter_mut().zip(&images) {
        let indices = remap(rgba, usize::from(frame.width), &table, transparent, options.dither);
        frame.transparent = transparent.filter(|_| rgba.chunks_exact(4).any(|px| px[3] == 0));
        frame.palette = None;
        frame.buffer = indices.into();
    }
    debug!("shared palette of {} colors", table.len());
    Ok(Some(table))
}

#[cfg(test)]
mod test {
    use super::*;

    fn square(left: u16, top: u16, palette: Vec<u8>, index: u8) -> Frame<'static> {
        let mut frame = Frame::from_palette_pixels(2, 2, vec![index; 4], palette, None);
        frame.left = left;
        frame.top = top;
        frame
    }

    #[test]
    fn plain_text_survives() {
        let header = [0u8, 0, 0, 0, 2, 0, 2, 0, 1, 1, 0, 1];
        let mut encoder = Encoder::new(Vec::new(), 2, 2, &[0; 6]).unwrap();
        encoder
            .write_raw_extension(Extension::Text.into(), &[&header[..], &b"hi"[..]])
            .unwrap();
        encoder.write_frame(&square(0, 0, vec![0; 6], 1)).unwrap();
        let data = encoder.into_inner().unwrap();

        let doc = GifDocument::decode(&data[..], DecodeOptions::new()).unwrap();
        assert_eq!(doc.texts, vec![[&header[..], &b"hi"[..]].concat()]);

        let again = GifDocument::decode(&doc.to_vec().unwrap()[..], DecodeOptions::new()).unwrap();
        assert_eq!(again.texts, doc.texts);
        assert_eq!(again.frames[0].buffer, doc.frames[0].buffer);
    }

    #[test]
    fn screen_is_union_of_frames() {
        let frames = vec![square(0, 0, vec![0; 6], 0), square(3, 1, vec![0; 6], 1)];
        let doc = GifDocument::new(frames, &EncodeOptions::new()).unwrap();
        assert_eq!((doc.width, doc.height), (5, 3));
    }

    #[test]
    fn explicit_screen_grows_or_fails() {
        let frames = vec![square(9, 0, vec![0; 6], 0)];
        let mut options = EncodeOptions::new();
        options.set_screen(10, 10);
        let doc = GifDocument::new(frames.clone(), &options).unwrap();
        assert_eq!((doc.width, doc.height), (11, 10));

        options.set_auto_grow(false);
        match GifDocument::new(frames, &options) {
            Err(err @ EncodingError::FrameBounds { .. }) => assert_eq!(err.frame(), Some(0)),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn identical_palettes_are_hoisted() {
        let palette = vec![1, 2, 3, 4, 5, 6];
        let frames = vec![square(0, 0, palette.clone(), 0), square(0, 0, palette.clone(), 1)];
        let mut options = EncodeOptions::new();
        options.set_global_palette(true);
        let doc = GifDocument::new(frames, &options).unwrap();
        assert_eq!(doc.global_palette.as_ref().map(ColorTable::as_rgb_bytes), Some(palette));
        assert!(doc.frames.iter().all(|frame| frame.palette.is_none()));
        assert_eq!(doc.frames[1].buffer.as_ref(), &[1; 4]);
    }

    #[test]
    fn different_palettes_are_merged() {
        let frames = vec![
            square(0, 0, vec![255, 0, 0, 0, 0, 255], 0),
            square(0, 0, vec![0, 255, 0, 0, 0, 255], 1),
        ];
        let mut options = EncodeOptions::new();
        options.set_global_palette(true);
        let doc = GifDocument::new(frames, &options).unwrap();
        let table = doc.global_palette.clone().unwrap();
        // red from the first frame, blue from the second
        assert_eq!(table.colors(), &[[255, 0, 0], [0, 0, 255]]);
        assert_eq!(doc.frames[1].buffer.as_ref(), &[1; 4]);

        let bytes = doc.to_vec().unwrap();
        let decoded = GifDocument::decode(&bytes[..], DecodeOptions::new()).unwrap();
        assert_eq!(decoded.global_palette.unwrap().colors()[..2], table.colors()[..]);
        assert_eq!(decoded.frames[0].buffer.as_ref(), &[0; 4]);
    }

    #[test]
    fn document_roundtrip() {
        let mut frames = vec![square(0, 0, vec![0, 0, 0, 9, 9, 9, 7, 7, 7], 2)];
        frames[0].delay = 30;
        frames[0].transparent = Some(1);
        let mut options = EncodeOptions::new();
        options.set_infinite(true).set_comment(Some("hello".into()));
        let doc = GifDocument::new(frames, &options).unwrap();
        let bytes = doc.to_vec().unwrap();

        let decoded = GifDocument::decode(&bytes[..], DecodeOptions::new()).unwrap();
        assert_eq!(decoded.repeat, Repeat::Infinite);
        assert_eq!(decoded.comments, vec![b"hello".to_vec()]);
        assert_eq!(decoded.frames.len(), 1);
        let frame = &decoded.frames[0];
        assert_eq!(frame.delay, 30);
        assert_eq!(frame.transparent, Some(1));
        assert_eq!(frame.buffer.as_ref(), &[2; 4]);
        // padded to a power of two
        assert_eq!(frame.palette.as_ref().map(Vec::len), Some(12));
    }

    #[test]
    fn errors_follow_frame_order() {
        let frames = vec![
            square(0, 0, vec![0; 6], 0),
            square(0, 0, vec![0; 6], 5),
            square(0, 0, vec![0; 6], 7),
        ];
        let doc = GifDocument::new(frames, &EncodeOptions::new()).unwrap();
        match doc.to_vec() {
            Err(EncodingError::PaletteIndex { frame: 1, index: 5, colors: 2 }) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn option_errors() {
        let mut options = EncodeOptions::new();
        options.set_speed(0);
        assert!(matches!(options.quantizer(), Err(EncodingError::InvalidSpeed(0))));
        options.set_speed(10).set_max_colors(300);
        assert!(matches!(
            options.quantizer(),
            Err(EncodingError::UnsupportedColorDepth { colors: 300, .. })
        ));
    }
}
