//! Frame artifacts: PNG files out, images of any supported format in
use std::borrow::Cow;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use thiserror::Error;

/// Prefix of inline frame sources.
pub const DATA_URI_PREFIX: &str = "data:image/png;base64,";

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// Failure to read or write a frame artifact.
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// The file could not be opened, read or written.
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The image or data URI is not usable.
    #[error("{0}")]
    Format(String),
}

impl From<png::EncodingError> for ArtifactError {
    fn from(err: png::EncodingError) -> Self {
        match err {
            png::EncodingError::IoError(err) => ArtifactError::Io(err),
            other => ArtifactError::Format(other.to_string()),
        }
    }
}

impl From<image::ImageError> for ArtifactError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(err) => ArtifactError::Io(err),
            other => ArtifactError::Format(other.to_string()),
        }
    }
}

impl From<png::DecodingError> for ArtifactError {
    fn from(err: png::DecodingError) -> Self {
        match err {
            png::DecodingError::IoError(err) => ArtifactError::Io(err),
            other => ArtifactError::Format(other.to_string()),
        }
    }
}

/// Decoded pixels of a frame source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Raster {
    /// Palette image, kept as is.
    Indexed {
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
        /// RGB triples.
        palette: Vec<u8>,
        /// First palette entry with alpha 0.
        transparent: Option<u8>,
        /// One index per pixel.
        indices: Vec<u8>,
    },
    /// Anything else, expanded to 8 bit RGBA.
    Rgba {
        /// Width in pixels.
        width: u32,
        /// Height in pixels.
        height: u32,
        /// Four bytes per pixel.
        pixels: Vec<u8>,
    },
}

impl Raster {
    /// Width and height in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        match *self {
            Raster::Indexed { width, height, .. } | Raster::Rgba { width, height, .. } => {
                (width, height)
            }
        }
    }
}

/// Writes an 8 bit palette PNG. The transparent index gets alpha 0 in a tRNS chunk.
pub fn write_indexed_png(
    path: &Path,
    width: u16,
    height: u16,
    palette: &[u8],
    transparent: Option<u8>,
    indices: &[u8],
) -> Result<(), ArtifactError> {
    let mut w = BufWriter::new(File::create(path)?);
    let mut encoder = png::Encoder::new(&mut w, u32::from(width), u32::from(height));
    encoder.set_color(png::ColorType::Indexed);
    encoder.set_depth(png::BitDepth::Eight);
    encoder.set_palette(palette.to_vec());
    if let Some(t) = transparent {
        let mut trns = vec![0xFF; usize::from(t) + 1];
        trns[usize::from(t)] = 0;
        encoder.set_trns(trns);
    }
    let mut writer = encoder.write_header()?;
    writer.write_image_data(indices)?;
    writer.finish()?;
    w.flush()?;
    Ok(())
}

/// Writes an 8 bit RGBA PNG.
pub fn write_rgba_png(path: &Path, width: u16, height: u16, rgba: &[u8]) -> Result<(), ArtifactError> {
    let mut w = BufWriter::new(File::create(path)?);
    let mut encoder = png::Encoder::new(&mut w, u32::from(width), u32::from(height));
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(rgba)?;
    writer.finish()?;
    w.flush()?;
    Ok(())
}

/// Loads a frame source.
///
/// The source is a `data:image/png;base64,` URI, a path, or bare base64 when no such file
/// exists. PNGs go through [`decode_png`] and keep their palette. Other formats known to
/// `image` are expanded to RGBA.
pub fn read_source(source: &str) -> Result<Raster, ArtifactError> {
    let bytes = match source.strip_prefix(DATA_URI_PREFIX) {
        Some(encoded) => STANDARD
            .decode(encoded.trim())
            .map_err(|err| ArtifactError::Format(format!("invalid base64 data: {err}")))?,
        None if Path::new(source).exists() => std::fs::read(source)?,
        // a missing path reports as such unless it parses as base64
        None => match STANDARD.decode(source.trim()) {
            Ok(bytes) if !bytes.is_empty() => bytes,
            _ => std::fs::read(source)?,
        },
    };
    decode_image(&bytes)
}

/// Decodes an encoded image of any supported format.
pub fn decode_image(bytes: &[u8]) -> Result<Raster, ArtifactError> {
    if bytes.starts_with(PNG_SIGNATURE) {
        return decode_png(bytes);
    }
    let rgba = image::load_from_memory(bytes)?.into_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(Raster::Rgba {
        width,
        height,
        pixels: rgba.into_raw(),
    })
}

/// Decodes PNG bytes. Palette images keep their indices, everything else becomes RGBA.
pub fn decode_png(bytes: &[u8]) -> Result<Raster, ArtifactError> {
    let mut decoder = png::Decoder::new(bytes);
    decoder.set_transformations(png::Transformations::IDENTITY);
    let mut reader = decoder.read_info()?;
    if reader.info().color_type == png::ColorType::Indexed {
        let info = reader.info();
        let palette = info
            .palette
            .as_ref()
            .map(|p| p.to_vec())
            .ok_or_else(|| ArtifactError::Format("palette image without PLTE chunk".into()))?;
        let transparent = info
            .trns
            .as_deref()
            .and_then(|trns| trns.iter().position(|&alpha| alpha == 0))
            .map(|t| t as u8);
        let clear: Vec<bool> = info
            .trns
            .as_deref()
            .map(|trns| trns.iter().map(|&alpha| alpha == 0).collect())
            .unwrap_or_default();
        let depth = info.bit_depth as u8;
        let mut buf = vec![0; reader.output_buffer_size()];
        let frame = reader.next_frame(&mut buf)?;
        let mut indices = unpack(&buf, frame.width, frame.height, frame.line_size, depth);
        // GIF has a single transparent index
        if let Some(t) = transparent {
            for index in indices.iter_mut() {
                if clear.get(usize::from(*index)).copied().unwrap_or(false) {
                    *index = t;
                }
            }
        }
        return Ok(Raster::Indexed {
            width: frame.width,
            height: frame.height,
            palette,
            transparent,
            indices,
        });
    }

    let mut decoder = png::Decoder::new(bytes);
    decoder.set_transformations(png::Transformations::EXPAND | png::Transformations::STRIP_16);
    let mut reader = decoder.read_info()?;
    let mut buf = vec![0; reader.output_buffer_size()];
    let frame = reader.next_frame(&mut buf)?;
    buf.truncate(frame.buffer_size());
    let pixels = match frame.color_type {
        png::ColorType::Rgba => buf,
        png::ColorType::Rgb => buf
            .chunks_exact(3)
            .flat_map(|c| [c[0], c[1], c[2], 0xFF])
            .collect(),
        png::ColorType::GrayscaleAlpha => buf
            .chunks_exact(2)
            .flat_map(|c| [c[0], c[0], c[0], c[1]])
            .collect(),
        png::ColorType::Grayscale => buf.iter().flat_map(|&g| [g, g, g, 0xFF]).collect(),
        png::ColorType::Indexed => {
            return Err(ArtifactError::Format("palette was not expanded".into()))
        }
    };
    Ok(Raster::Rgba {
        width: frame.width,
        height: frame.height,
        pixels,
    })
}

/// Unpacks rows of 1, 2, 4 or 8 bit indices, most significant bits first.
fn unpack(buf: &[u8], width: u32, height: u32, line_size: usize, depth: u8) -> Vec<u8> {
    let width = width as usize;
    let mut out = Vec::with_capacity(width * height as usize);
    for row in buf.chunks(line_size.max(1)).take(height as usize) {
        if depth == 8 {
            out.extend_from_slice(&row[..width.min(row.len())]);
            continue;
        }
        let per_byte = usize::from(8 / depth);
        let mask = (1u8 << depth) - 1;
        for x in 0..width {
            let byte = row.get(x / per_byte).copied().unwrap_or(0);
            let shift = 8 - depth * (1 + (x % per_byte) as u8);
            out.push((byte >> shift) & mask);
        }
    }
    out
}

/// Encodes PNG bytes as a data URI, the inline form accepted by [`read_source`].
pub fn to_data_uri(png: &[u8]) -> String {
    let mut uri = String::from(DATA_URI_PREFIX);
    STANDARD.encode_string(png, &mut uri);
    uri
}

/// Source text for error messages, without inline image data.
pub(crate) fn describe(source: &str) -> Cow<'_, str> {
    if source.starts_with(DATA_URI_PREFIX) {
        Cow::Owned(format!("{DATA_URI_PREFIX}... ({} bytes)", source.len()))
    } else if source.len() > 256 && !Path::new(source).exists() {
        let head: String = source.chars().take(32).collect();
        Cow::Owned(format!("{head}... ({} bytes)", source.len()))
    } else {
        Cow::Borrowed(source)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn indexed_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        let palette = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12];
        let indices = [0, 1, 2, 3, 3, 2];
        write_indexed_png(&path, 3, 2, &palette, Some(2), &indices).unwrap();
        match read_source(path.to_str().unwrap()).unwrap() {
            Raster::Indexed {
                width,
                height,
                palette: p,
                transparent,
                indices: i,
            } => {
                assert_eq!((width, height), (3, 2));
                assert_eq!(p, palette);
                assert_eq!(transparent, Some(2));
                assert_eq!(i, indices);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn rgba_from_data_uri() {
        let mut png = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut png, 2, 1);
            encoder.set_color(png::ColorType::Rgb);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header().unwrap();
            writer.write_image_data(&[10, 20, 30, 40, 50, 60]).unwrap();
        }
        let raster = read_source(&to_data_uri(&png)).unwrap();
        assert_eq!(
            raster,
            Raster::Rgba {
                width: 2,
                height: 1,
                pixels: vec![10, 20, 30, 255, 40, 50, 60, 255],
            }
        );
    }

    #[test]
    fn low_bit_depth_palette() {
        let mut png = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut png, 5, 2);
            encoder.set_color(png::ColorType::Indexed);
            encoder.set_depth(png::BitDepth::Two);
            encoder.set_palette(vec![0u8; 12]);
            let mut writer = encoder.write_header().unwrap();
            // 0 1 2 3 | 1 and 3 2 1 0 | 2, row padded to two bytes
            writer
                .write_image_data(&[0b00_01_10_11, 0b01_000000, 0b11_10_01_00, 0b10_000000])
                .unwrap();
        }
        match decode_png(&png).unwrap() {
            Raster::Indexed { indices, .. } => {
                assert_eq!(indices, [0, 1, 2, 3, 1, 3, 2, 1, 0, 2]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn other_formats_become_rgba() {
        let mut bmp = Vec::new();
        let rgb = image::RgbImage::from_raw(2, 1, vec![10, 20, 30, 40, 50, 60]).unwrap();
        rgb.write_to(&mut io::Cursor::new(&mut bmp), image::ImageFormat::Bmp).unwrap();
        let expected = Raster::Rgba {
            width: 2,
            height: 1,
            pixels: vec![10, 20, 30, 255, 40, 50, 60, 255],
        };
        assert_eq!(decode_image(&bmp).unwrap(), expected);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.bmp");
        std::fs::write(&path, &bmp).unwrap();
        assert_eq!(read_source(path.to_str().unwrap()).unwrap(), expected);
    }

    #[test]
    fn bare_base64() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        write_rgba_png(&path, 1, 1, &[1, 2, 3, 4]).unwrap();
        let uri = to_data_uri(&std::fs::read(&path).unwrap());
        let bare = uri.strip_prefix(DATA_URI_PREFIX).unwrap();
        assert_eq!(
            read_source(bare).unwrap(),
            Raster::Rgba {
                width: 1,
                height: 1,
                pixels: vec![1, 2, 3, 4],
            }
        );
        assert!(describe(&bare.repeat(8)).ends_with("bytes)"));
    }

    #[test]
    fn bad_sources() {
        assert!(matches!(
            read_source("data:image/png;base64,!!!"),
            Err(ArtifactError::Format(_))
        ));
        assert!(matches!(
            read_source("/nonexistent/frame.png"),
            Err(ArtifactError::Io(_))
        ));
        assert!(matches!(decode_png(b"not a png"), Err(ArtifactError::Format(_))));
        assert!(matches!(decode_image(b"not an image"), Err(ArtifactError::Format(_))));
        assert_eq!(describe("a.png"), "a.png");
        assert!(describe(&to_data_uri(&[0; 64])).ends_with("bytes)"));
    }
}
