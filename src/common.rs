//! Block types and frame data shared by the decoder and the encoder

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Disposal method
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum DisposalMethod {
    /// Decoder is not required to take any action.
    #[default]
    Any = 0,
    /// Do not dispose.
    Keep = 1,
    /// Restore to background color.
    Background = 2,
    /// Restore to previous.
    Previous = 3,
}

impl DisposalMethod {
    /// Converts `u8` to `Option<Self>`
    pub fn from_u8(n: u8) -> Option<DisposalMethod> {
        match n {
            0 => Some(DisposalMethod::Any),
            1 => Some(DisposalMethod::Keep),
            2 => Some(DisposalMethod::Background),
            3 => Some(DisposalMethod::Previous),
            _ => None,
        }
    }
}

/// Known GIF block types
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Block {
    /// Image block.
    Image = 0x2C,
    /// Extension block.
    Extension = 0x21,
    /// Image trailer.
    Trailer = 0x3B,
}

impl Block {
    /// Converts `u8` to `Option<Self>`
    pub fn from_u8(n: u8) -> Option<Block> {
        match n {
            0x2C => Some(Block::Image),
            0x21 => Some(Block::Extension),
            0x3B => Some(Block::Trailer),
            _ => None,
        }
    }
}

/// A newtype wrapper around an arbitrary extension ID.
///
/// An extension is some amount of byte data organized in sub-blocks so that one can skip over it
/// without knowing the semantics. Though technically you likely want to use a `Application`
/// extension, the library tries to stay flexible here.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct AnyExtension(pub u8);

/// Known GIF extensions
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Extension {
    /// Plain text extension.
    Text = 0x01,
    /// Graphic control extension.
    Control = 0xF9,
    /// Comment extension.
    Comment = 0xFE,
    /// Application extension.
    Application = 0xFF,
}

impl AnyExtension {
    /// Decode the label as a known extension.
    pub fn into_known(self) -> Option<Extension> {
        Extension::from_u8(self.0)
    }
}

impl From<Extension> for AnyExtension {
    fn from(ext: Extension) -> Self {
        AnyExtension(ext as u8)
    }
}

impl Extension {
    /// Converts `u8` to `Option<Self>`
    pub fn from_u8(n: u8) -> Option<Extension> {
        match n {
            0x01 => Some(Extension::Text),
            0xF9 => Some(Extension::Control),
            0xFE => Some(Extension::Comment),
            0xFF => Some(Extension::Application),
            _ => None,
        }
    }
}

/// Number of repetitions
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Repeat {
    /// Finite number of repetitions. `Finite(0)` means the animation plays once and no
    /// loop extension is written.
    Finite(u16),
    /// Infinite number of repetitions
    Infinite,
}

impl Default for Repeat {
    fn default() -> Self {
        Repeat::Finite(0)
    }
}

/// Frame delay as a fraction of seconds.
///
/// GIF stores delays in hundredths of a second, so decoded delays always have a denominator
/// dividing 100 once reduced.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Delay {
    /// Numerator, in seconds.
    pub numerator: u32,
    /// Denominator, in seconds. Never zero for a valid delay.
    pub denominator: u32,
}

/// Ticks per second of the GIF delay field.
pub const CENTISECONDS: u32 = 100;

impl Delay {
    /// Builds a reduced fraction from a raw delay in centiseconds.
    pub fn from_centiseconds(cs: u16) -> Delay {
        let numerator = u32::from(cs);
        let divisor = gcd(numerator, CENTISECONDS);
        Delay {
            numerator: numerator / divisor,
            denominator: CENTISECONDS / divisor,
        }
    }

    /// Converts back to GIF ticks, rounding to the nearest centisecond and saturating at
    /// `u16::MAX`.
    ///
    /// Returns `None` if the denominator is zero.
    pub fn to_centiseconds(self) -> Option<u16> {
        if self.denominator == 0 {
            return None;
        }
        let num = u64::from(self.numerator) * u64::from(CENTISECONDS);
        let den = u64::from(self.denominator);
        let rounded = (num + den / 2) / den;
        Some(rounded.min(u64::from(u16::MAX)) as u16)
    }
}

impl Default for Delay {
    fn default() -> Self {
        Delay {
            numerator: 0,
            denominator: 1,
        }
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// A GIF frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Frame delay in units of 10 ms.
    pub delay: u16,
    /// Disposal method.
    pub dispose: DisposalMethod,
    /// Transparent index (if available).
    pub transparent: Option<u8>,
    /// True if the frame needs user input to be displayed.
    pub needs_user_input: bool,
    /// Offset from the top border of the canvas.
    pub top: u16,
    /// Offset from the left border of the canvas.
    pub left: u16,
    /// Width of the frame.
    pub width: u16,
    /// Height of the frame.
    pub height: u16,
    /// True if the image is interlaced.
    pub interlaced: bool,
    /// Frame local color palette if available.
    pub palette: Option<Vec<u8>>,
    /// Buffer containing the image data.
    /// Only indices unless the frame was LZW pre-encoded.
    pub buffer: Cow<'a, [u8]>,
}

impl<'a> Default for Frame<'a> {
    fn default() -> Frame<'a> {
        Frame {
            delay: 0,
            dispose: DisposalMethod::Keep,
            transparent: None,
            needs_user_input: false,
            top: 0,
            left: 0,
            width: 0,
            height: 0,
            interlaced: false,
            palette: None,
            buffer: Cow::Borrowed(&[]),
        }
    }
}

impl Frame<'static> {
    /// Takes the frame out, leaving an empty one in its place.
    pub(crate) fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    /// Creates a frame from a palette and indexed pixels.
    ///
    /// # Panics:
    /// *   If the length of pixels does not equal `width * height`.
    /// *   If the length of palette > `256 * 3`.
    pub fn from_palette_pixels(
        width: u16,
        height: u16,
        pixels: impl Into<Vec<u8>>,
        palette: impl Into<Vec<u8>>,
        transparent: Option<u8>,
    ) -> Frame<'static> {
        let pixels = pixels.into();
        let palette = palette.into();
        assert_eq!(
            width as usize * height as usize,
            pixels.len(),
            "Too many or too little pixels for the given width and height to create a GIF Frame"
        );
        assert!(
            palette.len() <= 256 * 3,
            "Too many palette values to create a GIF Frame"
        );

        Frame {
            width,
            height,
            buffer: Cow::Owned(pixels),
            palette: Some(palette),
            transparent,
            ..Frame::default()
        }
    }

    /// Creates a frame from indexed pixels in the global palette.
    ///
    /// # Panics:
    /// *   If the length of pixels does not equal `width * height`.
    pub fn from_indexed_pixels(
        width: u16,
        height: u16,
        pixels: impl Into<Vec<u8>>,
        transparent: Option<u8>,
    ) -> Frame<'static> {
        let pixels = pixels.into();
        assert_eq!(
            width as usize * height as usize,
            pixels.len(),
            "Too many or too little pixels for the given width and height to create a GIF Frame"
        );

        Frame {
            width,
            height,
            buffer: Cow::Owned(pixels),
            palette: None,
            transparent,
            ..Frame::default()
        }
    }
}

impl Frame<'_> {
    /// Frame delay as a reduced fraction of seconds.
    pub fn delay_fraction(&self) -> Delay {
        Delay::from_centiseconds(self.delay)
    }

    /// Right edge of the frame on the logical screen.
    pub fn right(&self) -> u32 {
        u32::from(self.left) + u32::from(self.width)
    }

    /// Bottom edge of the frame on the logical screen.
    pub fn bottom(&self) -> u32 {
        u32::from(self.top) + u32::from(self.height)
    }
}
