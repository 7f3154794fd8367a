//! Full-screen rendering of frames, honouring disposal methods.
use crate::common::{DisposalMethod, Frame};
use crate::reader::indices_to_rgba;

/// RGBA canvas the size of the logical screen. Starts fully transparent.
pub struct Canvas {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
    /// Disposal of the last drawn frame, applied before the next one.
    pending: Option<Pending>,
}

struct Pending {
    dispose: DisposalMethod,
    rect: Rect,
    saved: Option<Vec<u8>>,
}

#[derive(Clone, Copy)]
struct Rect {
    left: usize,
    top: usize,
    width: usize,
    height: usize,
}

impl Canvas {
    /// Creates a transparent canvas.
    pub fn new(width: u16, height: u16) -> Self {
        let (width, height) = (usize::from(width), usize::from(height));
        Canvas {
            width,
            height,
            pixels: vec![0; width * height * 4],
            pending: None,
        }
    }

    /// The composed image, four bytes per pixel.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Draws `frame`, a decoded frame with palette indices, using `palette` for its colors,
    /// and returns the composed screen.
    ///
    /// Parts of the frame outside the screen are clipped. Transparent pixels leave the
    /// canvas untouched.
    pub fn draw(&mut self, frame: &Frame<'_>, palette: &[u8]) -> &[u8] {
        if let Some(pending) = self.pending.take() {
            self.dispose(pending);
        }

        let rect = self.clip(frame);
        let saved = match frame.dispose {
            DisposalMethod::Previous => Some(self.pixels.clone()),
            _ => None,
        };

        let frame_width = usize::from(frame.width);
        let rgba = indices_to_rgba(&frame.buffer, palette, frame.transparent);
        for y in 0..rect.height {
            let src_row = (rect.top + y - usize::from(frame.top)) * frame_width;
            let src_start = src_row + rect.left - usize::from(frame.left);
            let src = rgba.get(src_start * 4..(src_start + rect.width) * 4);
            let dst_start = ((rect.top + y) * self.width + rect.left) * 4;
            let dst = &mut self.pixels[dst_start..dst_start + rect.width * 4];
            let Some(src) = src else { break };
            for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
                if s[3] != 0 {
                    d.copy_from_slice(s);
                }
            }
        }

        self.pending = Some(Pending {
            dispose: frame.dispose,
            rect,
            saved,
        });
        &self.pixels
    }

    fn clip(&self, frame: &Frame<'_>) -> Rect {
        let left = usize::from(frame.left).min(self.width);
        let top = usize::from(frame.top).min(self.height);
        let right = (frame.right() as usize).min(self.width);
        let bottom = (frame.bottom() as usize).min(self.height);
        Rect {
            left,
            top,
            width: right - left,
            height: bottom - top,
        }
    }

    fn dispose(&mut self, pending: Pending) {
        match pending.dispose {
            DisposalMethod::Any | DisposalMethod::Keep => {}
            DisposalMethod::Background => {
                let rect = pending.rect;
                for y in rect.top..rect.top + rect.height {
                    let start = (y * self.width + rect.left) * 4;
                    self.pixels[start..start + rect.width * 4].fill(0);
                }
            }
            DisposalMethod::Previous => {
                if let Some(saved) = pending.saved {
                    self.pixels = saved;
                }
            }
        }
    }
}
