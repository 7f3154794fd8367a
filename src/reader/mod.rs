use std::io::prelude::*;
use std::iter::FusedIterator;
use std::num::NonZeroU64;

use tracing::debug;

use crate::common::{Frame, Repeat};

mod converter;
mod decoder;

pub(crate) use self::converter::{indices_to_rgba, interlace};
pub use self::decoder::{
    Decoded, DecodingError, Screen, StreamingDecoder, Version, PLTE_CHANNELS,
};

#[derive(Clone, Debug)]
/// The maximum amount of memory the decoder is allowed to use for each frame
pub enum MemoryLimit {
    /// Enforce no memory limit.
    ///
    /// If you intend to process images from unknown origins this is a potentially dangerous
    /// constant to use, as your program could be vulnerable to decompression bombs.
    Unlimited,
    /// Limit the amount of memory that can be used for a single frame or extension to this
    /// many bytes.
    Bytes(NonZeroU64),
}

impl MemoryLimit {
    pub(crate) fn fits(&self, size: usize) -> bool {
        match self {
            Self::Unlimited => true,
            Self::Bytes(limit) => size as u64 <= limit.get(),
        }
    }
}

/// Options for opening a GIF decoder. [`DecodeOptions::read_info`] will start the decoder.
#[derive(Clone, Debug)]
pub struct DecodeOptions {
    pub(crate) memory_limit: MemoryLimit,
    pub(crate) check_frame_consistency: bool,
    pub(crate) check_for_end_code: bool,
    pub(crate) allow_unknown_blocks: bool,
    pub(crate) coalesce: bool,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodeOptions {
    /// Creates a new decoder builder
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self {
            memory_limit: MemoryLimit::Bytes(NonZeroU64::MIN.saturating_add(50_000_000 - 1)), // 50 MB
            check_frame_consistency: false,
            check_for_end_code: false,
            allow_unknown_blocks: false,
            coalesce: false,
        }
    }

    /// Configure a memory limit for decoding.
    pub fn set_memory_limit(&mut self, limit: MemoryLimit) {
        self.memory_limit = limit;
    }

    /// Configure if frames must be within the screen descriptor.
    ///
    /// The default is `false`.
    ///
    /// When turned on, all frame descriptors being read must fit within the screen descriptor or
    /// otherwise [`DecodingError::FrameBounds`] is returned.
    pub fn check_frame_consistency(&mut self, check: bool) {
        self.check_frame_consistency = check;
    }

    /// Configure if LZW encoded blocks must end with a marker end code.
    ///
    /// The default is `false`.
    ///
    /// When turned off then image data blocks can simply end once all pixels are decoded. Note
    /// that this might silently ignore some bits of the last or second to last byte.
    pub fn check_lzw_end_code(&mut self, check: bool) {
        self.check_for_end_code = check;
    }

    /// Configure if unknown blocks are allowed to be decoded.
    ///
    /// The default is `false`.
    ///
    /// When turned on, unknown block introducers and unknown extension labels are skipped,
    /// assuming a sequence of zero-length terminated sub-blocks follows them. When turned off,
    /// they are reported as [`DecodingError::UnknownBlock`].
    pub fn allow_unknown_blocks(&mut self, check: bool) {
        self.allow_unknown_blocks = check;
    }

    /// Configure whether [`crate::decode_with_options`] writes composed full-screen RGBA images
    /// instead of the raw frame rectangles.
    ///
    /// The default is `false`.
    pub fn set_coalesce(&mut self, coalesce: bool) {
        self.coalesce = coalesce;
    }

    /// Reads the logical screen descriptor including the global color palette
    ///
    /// Returns a [`Decoder`]. All decoder configuration has to be done beforehand.
    pub fn read_info<R: Read>(self, r: R) -> Result<Decoder<R>, DecodingError> {
        Decoder::with_no_init(StreamingDecoder::with_options(r, &self)).init()
    }
}

/// GIF decoder. Create [`DecodeOptions`] to get started, and call [`DecodeOptions::read_info`].
pub struct Decoder<R: Read> {
    decoder: StreamingDecoder<R>,
    screen: Screen,
    repeat: Repeat,
    comments: Vec<Vec<u8>>,
    texts: Vec<Vec<u8>>,
    /// Metadata of a frame whose image data has not been read yet.
    pending: Option<Frame<'static>>,
    current_frame: Frame<'static>,
    at_eof: bool,
}

impl<R> Decoder<R>
where
    R: Read,
{
    /// Create a new decoder with default options.
    #[inline]
    pub fn new(reader: R) -> Result<Self, DecodingError> {
        DecodeOptions::new().read_info(reader)
    }

    /// Return a builder that allows configuring limits etc.
    #[must_use]
    #[inline]
    pub fn build() -> DecodeOptions {
        DecodeOptions::new()
    }

    fn with_no_init(decoder: StreamingDecoder<R>) -> Self {
        Self {
            decoder,
            screen: Screen {
                version: Version::V89a,
                width: 0,
                height: 0,
                global_palette: None,
                bg_color: 0,
            },
            repeat: Repeat::default(),
            comments: Vec::new(),
            texts: Vec::new(),
            pending: None,
            current_frame: Frame::default(),
            at_eof: false,
        }
    }

    fn init(mut self) -> Result<Self, DecodingError> {
        self.screen = self.decoder.read_header()?;
        debug!(
            "{:?} screen {}x{}, global palette: {}",
            self.screen.version,
            self.screen.width,
            self.screen.height,
            self.screen.global_palette.is_some()
        );
        match self.next_frame_metadata()? {
            Some(frame) => self.pending = Some(frame),
            None => {
                return Err(DecodingError::format(
                    self.decoder.offset(),
                    "file does not contain any image data",
                ))
            }
        }
        Ok(self)
    }

    /// Reads blocks up to the next image descriptor, collecting extensions on the way.
    fn next_frame_metadata(&mut self) -> Result<Option<Frame<'static>>, DecodingError> {
        while !self.at_eof {
            match self.decoder.next_block()? {
                Decoded::FrameMetadata(frame) => return Ok(Some(frame)),
                Decoded::Trailer => self.at_eof = true,
                Decoded::Repetitions(repeat) => self.repeat = repeat,
                Decoded::Comment(comment) => self.comments.push(comment),
                Decoded::Text(text) => self.texts.push(text),
                Decoded::Nothing => {}
            }
        }
        Ok(None)
    }

    /// Reads the next frame from the image.
    ///
    /// The buffer holds one palette index per pixel, rows top to bottom. Interlaced frames are
    /// deinterlaced.
    ///
    /// You can also call `.into_iter()` on the decoder to use it as a regular iterator.
    pub fn read_next_frame(&mut self) -> Result<Option<&Frame<'static>>, DecodingError> {
        let mut frame = match self.pending.take() {
            Some(frame) => frame,
            None => match self.next_frame_metadata()? {
                Some(frame) => frame,
                None => return Ok(None),
            },
        };
        let colors = frame
            .palette
            .as_deref()
            .or(self.screen.global_palette.as_deref())
            .map(|palette| palette.len() / PLTE_CHANNELS)
            .ok_or(DecodingError::MissingColorTable {
                offset: self.decoder.offset(),
            })?;
        self.decoder.read_image_data(&mut frame, colors)?;
        self.current_frame = frame;
        Ok(Some(&self.current_frame))
    }

    /// Returns the color palette relevant for the frame that has been decoded
    pub fn palette(&self) -> Result<&[u8], DecodingError> {
        self.current_frame
            .palette
            .as_deref()
            .or(self.screen.global_palette.as_deref())
            .ok_or(DecodingError::MissingColorTable {
                offset: self.decoder.offset(),
            })
    }

    /// The global color palette
    pub fn global_palette(&self) -> Option<&[u8]> {
        self.screen.global_palette.as_deref()
    }

    /// Width of the logical screen
    #[inline]
    pub fn width(&self) -> u16 {
        self.screen.width
    }

    /// Height of the logical screen
    #[inline]
    pub fn height(&self) -> u16 {
        self.screen.height
    }

    /// Version from the header
    pub fn version(&self) -> Version {
        self.screen.version
    }

    /// Index of the background color in the global palette
    ///
    /// `None` if there is no global palette or the index is outside of it.
    pub fn bg_color(&self) -> Option<usize> {
        let palette = self.screen.global_palette.as_ref()?;
        let index = usize::from(self.screen.bg_color);
        (index < palette.len() / PLTE_CHANNELS).then_some(index)
    }

    /// Number of loop repetitions
    ///
    /// Only reflects extensions read so far, which for well-formed files precede the first frame.
    pub fn repeat(&self) -> Repeat {
        self.repeat
    }

    /// Comment extensions read so far
    pub fn comments(&self) -> &[Vec<u8>] {
        &self.comments
    }

    /// Plain text extensions read so far
    pub fn texts(&self) -> &[Vec<u8>] {
        &self.texts
    }

    /// Bytes consumed from the reader
    pub fn offset(&self) -> u64 {
        self.decoder.offset()
    }
}

impl<R: Read> IntoIterator for Decoder<R> {
    type Item = Result<Frame<'static>, DecodingError>;
    type IntoIter = DecoderIter<R>;

    #[inline]
    fn into_iter(self) -> Self::IntoIter {
        DecoderIter {
            inner: self,
            ended: false,
        }
    }
}

/// Use `decoder.into_iter()` to iterate over the frames
pub struct DecoderIter<R: Read> {
    inner: Decoder<R>,
    ended: bool,
}

impl<R: Read> DecoderIter<R> {
    /// The decoder, e.g. to query comments after the last frame.
    pub fn decoder(&self) -> &Decoder<R> {
        &self.inner
    }
}

impl<R: Read> FusedIterator for DecoderIter<R> {}

impl<R: Read> Iterator for DecoderIter<R> {
    type Item = Result<Frame<'static>, DecodingError>;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.ended {
            match self.inner.read_next_frame() {
                Ok(Some(_)) => Some(Ok(self.inner.current_frame.take())),
                Ok(None) => {
                    self.ended = true;
                    None
                }
                Err(err) => {
                    self.ended = true;
                    Some(Err(err))
                }
            }
        } else {
            None
        }
    }
}
