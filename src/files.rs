//! GIF files to frame artifacts and back.
use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

#[cfg(feature = "rayon")]
use rayon::prelude::*;
use tracing::{debug, trace};

use crate::artifact::{describe, read_source, write_indexed_png, write_rgba_png, ArtifactError, Raster};
use crate::common::Frame;
use crate::compose::Canvas;
use crate::document::{EncodeOptions, GifDocument};
use crate::encoder::EncodingError;
use crate::error::Error;
use crate::meta::{FrameMeta, GifMeta};
use crate::quantize::Quantizer;
use crate::reader::{DecodeOptions, DecodingError, PLTE_CHANNELS};

/// Splits the GIF at `src` into PNG files in `dst_dir` with default options.
///
/// Frame `i` is written to `frame_{i:04}.png`. `dst_dir` is created if needed.
pub fn decode(src: impl AsRef<Path>, dst_dir: impl AsRef<Path>) -> Result<GifMeta, Error> {
    decode_with_options(src, dst_dir, &DecodeOptions::new())
}

/// Splits the GIF at `src` into PNG files in `dst_dir`.
///
/// Without coalescing each artifact is an indexed PNG of the frame rectangle with the frame's
/// color table. With coalescing each artifact is the full screen as RGBA after drawing the
/// frame, placed at the origin.
pub fn decode_with_options(
    src: impl AsRef<Path>,
    dst_dir: impl AsRef<Path>,
    options: &DecodeOptions,
) -> Result<GifMeta, Error> {
    let src = src.as_ref();
    let dst_dir = dst_dir.as_ref();
    let decoding = |source: DecodingError| Error::Decoding {
        path: src.to_path_buf(),
        source,
    };

    let file = File::open(src).map_err(|source| external_io(src, None, source))?;
    fs::create_dir_all(dst_dir).map_err(|source| external_io(dst_dir, None, source))?;
    let mut decoder = options.clone().read_info(file).map_err(decoding)?;
    let global = decoder.global_palette().map(<[u8]>::to_vec);
    let (width, height) = (decoder.width(), decoder.height());
    let mut canvas = options.coalesce.then(|| Canvas::new(width, height));

    let mut frames = Vec::new();
    while let Some(frame) = decoder.read_next_frame().map_err(decoding)? {
        let index = frames.len();
        let path = dst_dir.join(format!("frame_{index:04}.png"));
        let palette = frame.palette.as_deref().or(global.as_deref()).unwrap_or(&[]);
        let (left, top) = match canvas {
            Some(ref mut canvas) => {
                let pixels = canvas.draw(frame, palette);
                write_rgba_png(&path, width, height, pixels)
                    .map_err(|err| artifact_error(&path, index, err))?;
                (0, 0)
            }
            None => {
                let transparent = frame
                    .transparent
                    .filter(|&t| usize::from(t) < palette.len() / PLTE_CHANNELS);
                write_indexed_png(
                    &path,
                    frame.width,
                    frame.height,
                    palette,
                    transparent,
                    &frame.buffer,
                )
                .map_err(|err| artifact_error(&path, index, err))?;
                (frame.left, frame.top)
            }
        };
        trace!("frame {} written to {}", index, path.display());
        frames.push(FrameMeta {
            delay: frame.delay_fraction(),
            file: path.to_string_lossy().into_owned(),
            left,
            top,
        });
    }

    debug!(
        "decoded {} frames of {} into {}",
        frames.len(),
        src.display(),
        dst_dir.display()
    );
    Ok(GifMeta {
        file: src.to_string_lossy().into_owned(),
        frames,
    })
}

/// Composes the frames listed in `meta` into a GIF at `dst` and returns `dst`.
///
/// `infinite` loops the animation forever, otherwise it plays once. `speed` trades palette
/// quality for time, from 1 (best) to 10 (fastest).
pub fn encode(
    dst: impl AsRef<Path>,
    meta: &GifMeta,
    infinite: bool,
    speed: u8,
) -> Result<PathBuf, Error> {
    let mut options = EncodeOptions::new();
    options.set_infinite(infinite).set_speed(speed);
    encode_with_options(dst, meta, &options)
}

/// Like [`encode`], and stores `uri` in a comment extension.
pub fn encode_with_uri(
    dst: impl AsRef<Path>,
    meta: &GifMeta,
    infinite: bool,
    speed: u8,
    uri: &str,
) -> Result<PathBuf, Error> {
    let mut options = EncodeOptions::new();
    options
        .set_infinite(infinite)
        .set_speed(speed)
        .set_comment(Some(uri.to_owned()));
    encode_with_options(dst, meta, &options)
}

/// Composes the frames listed in `meta` into a GIF at `dst`.
///
/// The GIF is written to a temporary file next to `dst` and renamed once complete, so `dst` is
/// never left half written.
pub fn encode_with_options(
    dst: impl AsRef<Path>,
    meta: &GifMeta,
    options: &EncodeOptions,
) -> Result<PathBuf, Error> {
    let dst = dst.as_ref();
    let encoding = |source: EncodingError| Error::Encoding {
        path: dst.to_path_buf(),
        source,
    };

    if meta.frames.is_empty() {
        return Err(Error::Metadata("no frames to encode".into()));
    }
    let delays = meta
        .frames
        .iter()
        .enumerate()
        .map(|(frame, meta)| {
            meta.delay
                .to_centiseconds()
                .ok_or(EncodingError::InvalidDelay { frame })
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(encoding)?;
    let quantizer = options.quantizer().map_err(encoding)?;

    #[cfg(feature = "rayon")]
    let loaded: Vec<_> = meta
        .frames
        .par_iter()
        .enumerate()
        .map(|(index, frame)| load_frame(index, frame, &quantizer, options.dither))
        .collect();
    #[cfg(not(feature = "rayon"))]
    let loaded: Vec<_> = meta
        .frames
        .iter()
        .enumerate()
        .map(|(index, frame)| load_frame(index, frame, &quantizer, options.dither))
        .collect();
    let mut frames = loaded.into_iter().collect::<Result<Vec<_>, _>>()?;
    for (frame, delay) in frames.iter_mut().zip(delays) {
        frame.delay = delay;
    }

    let document = GifDocument::new(frames, options).map_err(encoding)?;
    let (pending, file) = PendingFile::create(dst)?;
    let writer = document.write(BufWriter::new(file)).map_err(encoding)?;
    let file = writer
        .into_inner()
        .map_err(|err| external_io(dst, None, err.into_error()))?;
    file.sync_all().map_err(|source| external_io(dst, None, source))?;
    drop(file);
    pending.commit()?;

    debug!(
        "encoded {} frames into {}, speed {}, {:?}",
        meta.frames.len(),
        dst.display(),
        options.speed,
        options.repeat
    );
    Ok(dst.to_path_buf())
}

/// Reads one artifact and turns it into an indexed frame. The delay is set by the caller.
fn load_frame(
    index: usize,
    meta: &FrameMeta,
    quantizer: &Quantizer,
    dither: bool,
) -> Result<Frame<'static>, Error> {
    let invalid = |reason: String| Error::Artifact {
        path: PathBuf::from(describe(&meta.file).into_owned()),
        frame: index,
        reason,
    };

    let raster = read_source(&meta.file).map_err(|err| artifact_error(&meta.file, index, err))?;
    let (width, height) = raster.dimensions();
    let (w, h) = match (u16::try_from(width), u16::try_from(height)) {
        (Ok(w), Ok(h)) => (w, h),
        _ => return Err(invalid(format!("{width}x{height} is too large for GIF"))),
    };
    let pixels = usize::from(w) * usize::from(h);
    let mut frame = match raster {
        Raster::Indexed {
            palette,
            transparent,
            indices,
            ..
        } => {
            if indices.len() != pixels {
                return Err(invalid(format!("{} indices for {w}x{h} pixels", indices.len())));
            }
            Frame::from_palette_pixels(w, h, indices, palette, transparent)
        }
        Raster::Rgba { pixels: rgba, .. } => {
            if rgba.len() != pixels * 4 {
                return Err(invalid(format!("{} bytes for {w}x{h} RGBA pixels", rgba.len())));
            }
            Frame::from_rgba_quantized(w, h, &rgba, quantizer, dither)
        }
    };
    frame.left = meta.left;
    frame.top = meta.top;
    trace!(
        "frame {}: {}x{}+{}+{} from {}",
        index,
        w,
        h,
        meta.left,
        meta.top,
        describe(&meta.file)
    );
    Ok(frame)
}

fn external_io(path: &Path, frame: Option<usize>, source: io::Error) -> Error {
    Error::ExternalIo {
        path: path.to_path_buf(),
        frame,
        source,
    }
}

fn artifact_error(path: impl AsRef<Path>, frame: usize, err: ArtifactError) -> Error {
    let path = PathBuf::from(describe(&path.as_ref().to_string_lossy()).into_owned());
    match err {
        ArtifactError::Io(source) => Error::ExternalIo {
            path,
            frame: Some(frame),
            source,
        },
        ArtifactError::Format(reason) => Error::Artifact {
            path,
            frame,
            reason,
        },
    }
}

/// Temporary sibling of an output file. Removed on drop unless committed.
struct PendingFile {
    path: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl PendingFile {
    fn create(target: &Path) -> Result<(Self, File), Error> {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let name = target
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let unique = COUNTER.fetch_add(1, Ordering::Relaxed);
        let path = target.with_file_name(format!(".{name}.{}.{unique}.tmp", std::process::id()));
        let file = File::create(&path).map_err(|source| external_io(&path, None, source))?;
        let pending = PendingFile {
            path,
            target: target.to_path_buf(),
            committed: false,
        };
        Ok((pending, file))
    }

    fn commit(mut self) -> Result<(), Error> {
        fs::rename(&self.path, &self.target)
            .map_err(|source| external_io(&self.target, None, source))?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PendingFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::Delay;

    #[test]
    fn pending_file_is_removed_unless_committed() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.gif");
        {
            let (_pending, _file) = PendingFile::create(&target).unwrap();
            assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
        }
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        let (pending, file) = PendingFile::create(&target).unwrap();
        drop(file);
        pending.commit().unwrap();
        assert!(target.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn failed_encode_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("out.gif");
        let meta = GifMeta {
            file: dst.to_string_lossy().into_owned(),
            frames: vec![FrameMeta {
                delay: Delay::default(),
                file: dir.path().join("missing.png").to_string_lossy().into_owned(),
                left: 0,
                top: 0,
            }],
        };
        let err = encode(&dst, &meta, false, 5).unwrap_err();
        assert_eq!(err.frame(), Some(0));
        assert!(matches!(err, Error::ExternalIo { .. }));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
