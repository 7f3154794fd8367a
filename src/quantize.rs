//! Color reduction of RGBA images to indexed frames.
//!
//! The speed setting picks the reduction method:
//!
//! | speed | method                                          |
//! |-------|-------------------------------------------------|
//! | 1-4   | median cut, then `5 - speed` k-means passes     |
//! | 5-7   | median cut                                      |
//! | 8-10  | fixed 3-3-2 bit buckets                         |
//!
//! Images with few enough distinct colors are always mapped exactly. All methods are
//! deterministic: ties are resolved by first occurrence in the image.
use std::collections::HashMap;

use crate::common::Frame;
use crate::palette::{distance, ColorTable, MAX_COLORS};

/// Slowest and best quality speed setting.
pub const MIN_SPEED: u8 = 1;
/// Fastest speed setting.
pub const MAX_SPEED: u8 = 10;
/// Speed used when none is given.
pub const DEFAULT_SPEED: u8 = 5;

/// Palette construction method
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Method {
    /// Recursive box splitting at the weighted median of the widest channel.
    MedianCut,
    /// One bucket per 3-3-2 bit RGB prefix.
    FixedBuckets,
}

/// Work done for a speed setting.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct QuantizeConfig {
    /// Palette construction method.
    pub method: Method,
    /// k-means passes after median cut.
    pub refine_passes: u8,
}

impl QuantizeConfig {
    /// Configuration for `speed`, or `None` outside of 1..=10.
    pub fn for_speed(speed: u8) -> Option<Self> {
        let config = match speed {
            1..=4 => QuantizeConfig {
                method: Method::MedianCut,
                refine_passes: 5 - speed,
            },
            5..=7 => QuantizeConfig {
                method: Method::MedianCut,
                refine_passes: 0,
            },
            8..=10 => QuantizeConfig {
                method: Method::FixedBuckets,
                refine_passes: 0,
            },
            _ => return None,
        };
        Some(config)
    }
}

/// Builds palettes of at most `max_colors` entries.
#[derive(Debug, Clone)]
pub struct Quantizer {
    config: QuantizeConfig,
    max_colors: usize,
}

impl Quantizer {
    /// Returns `None` for a speed outside of 1..=10 or a color count outside of 2..=256.
    pub fn new(speed: u8, max_colors: usize) -> Option<Self> {
        if !(2..=MAX_COLORS).contains(&max_colors) {
            return None;
        }
        Some(Quantizer {
            config: QuantizeConfig::for_speed(speed)?,
            max_colors,
        })
    }

    /// The method and passes in use.
    pub fn config(&self) -> QuantizeConfig {
        self.config
    }

    /// Palette size limit, including a transparent entry.
    pub fn max_colors(&self) -> usize {
        self.max_colors
    }

    /// Reduces a histogram, in first-occurrence order, to at most `budget` colors.
    fn reduce(&self, histogram: &[([u8; 3], u32)], budget: usize) -> Vec<[u8; 3]> {
        if histogram.len() <= budget {
            return histogram.iter().map(|&(color, _)| color).collect();
        }
        match self.config.method {
            Method::MedianCut => {
                let palette = median_cut(histogram, budget);
                refine(palette, histogram, self.config.refine_passes)
            }
            Method::FixedBuckets => fixed_buckets(histogram, budget),
        }
    }
}

/// Result of [`quantize_rgba`].
#[derive(Debug, Clone)]
pub struct Quantized {
    /// Opaque colors followed by the transparent entry, if any.
    pub palette: ColorTable,
    /// One index per pixel.
    pub indices: Vec<u8>,
    /// Index that stands for fully transparent pixels.
    pub transparent: Option<u8>,
}

/// Maps RGBA pixels, `width` per row, to a palette of their own.
///
/// Pixels with alpha 0 use a transparent entry appended after the opaque colors. Other alpha
/// values are treated as opaque.
pub fn quantize_rgba(rgba: &[u8], width: usize, quantizer: &Quantizer, dither: bool) -> Quantized {
    let (palette, transparent) = build_palette([rgba], quantizer);
    let indices = remap(rgba, width, &palette, transparent, dither);
    Quantized {
        palette,
        indices,
        transparent,
    }
}

impl Frame<'static> {
    /// Creates a frame with a local palette from RGBA pixels.
    ///
    /// # Panics:
    /// *   If the length of pixels does not equal `width * height * 4`.
    pub fn from_rgba_quantized(
        width: u16,
        height: u16,
        rgba: &[u8],
        quantizer: &Quantizer,
        dither: bool,
    ) -> Frame<'static> {
        assert_eq!(
            usize::from(width) * usize::from(height) * 4,
            rgba.len(),
            "Too many or too little pixels for the given width and height to create a GIF Frame"
        );
        let q = quantize_rgba(rgba, usize::from(width), quantizer, dither);
        Frame::from_palette_pixels(width, height, q.indices, q.palette.as_rgb_bytes(), q.transparent)
    }
}

/// Builds one palette for all `images`, RGBA each.
///
/// Returns the palette and its transparent index. The transparent entry is the last one and
/// only present if some pixel has alpha 0. When the opaque pixels have few enough distinct
/// colors they are used as is, in first-occurrence order.
pub fn build_palette<'a>(
    images: impl IntoIterator<Item = &'a [u8]>,
    quantizer: &Quantizer,
) -> (ColorTable, Option<u8>) {
    let mut histogram: Vec<([u8; 3], u32)> = Vec::new();
    let mut seen: HashMap<[u8; 3], usize> = HashMap::new();
    let mut has_transparent = false;
    for px in images.into_iter().flat_map(|image| image.chunks_exact(4)) {
        if px[3] == 0 {
            has_transparent = true;
            continue;
        }
        let color = [px[0], px[1], px[2]];
        match seen.get(&color) {
            Some(&i) => histogram[i].1 += 1,
            None => {
                seen.insert(color, histogram.len());
                histogram.push((color, 1));
            }
        }
    }

    let budget = quantizer.max_colors - usize::from(has_transparent);
    let mut colors = quantizer.reduce(&histogram, budget);
    let transparent = if has_transparent {
        colors.push([0; 3]);
        Some((colors.len() - 1) as u8)
    } else {
        if colors.is_empty() {
            colors.push([0; 3]);
        }
        None
    };
    (ColorTable::from_reduced(colors), transparent)
}

/// Maps RGBA pixels, `width` per row, to the nearest colors of `palette`.
///
/// Pixels with alpha 0 map to `transparent`, which is never chosen for other pixels. With
/// `dither` the quantization error is diffused Floyd-Steinberg style.
pub fn remap(
    rgba: &[u8],
    width: usize,
    palette: &ColorTable,
    transparent: Option<u8>,
    dither: bool,
) -> Vec<u8> {
    let colors = palette.colors();
    let opaque = match transparent {
        Some(t) if usize::from(t) < colors.len() => &colors[..usize::from(t)],
        _ => colors,
    };
    let mut mapper = Mapper::new(opaque);
    if dither && !opaque.is_empty() {
        return floyd_steinberg(rgba, width, &mut mapper, transparent);
    }
    rgba.chunks_exact(4)
        .map(|px| match transparent {
            Some(t) if px[3] == 0 => t,
            _ => mapper.nearest([px[0], px[1], px[2]]),
        })
        .collect()
}

/// Nearest color lookups with a cache, ties to the lowest index.
struct Mapper<'a> {
    colors: &'a [[u8; 3]],
    cache: HashMap<[u8; 3], u8>,
}

impl<'a> Mapper<'a> {
    fn new(colors: &'a [[u8; 3]]) -> Self {
        Mapper {
            colors,
            cache: HashMap::new(),
        }
    }

    fn nearest(&mut self, rgb: [u8; 3]) -> u8 {
        let colors = self.colors;
        *self
            .cache
            .entry(rgb)
            .or_insert_with(|| nearest_index(colors, rgb) as u8)
    }
}

fn nearest_index(colors: &[[u8; 3]], rgb: [u8; 3]) -> usize {
    let mut best = 0;
    let mut best_dist = u32::MAX;
    for (i, &color) in colors.iter().enumerate() {
        let dist = distance(color, rgb);
        if dist < best_dist {
            best = i;
            best_dist = dist;
        }
    }
    best
}

#[derive(Debug, Clone)]
struct ColorBox {
    entries: Vec<([u8; 3], u32)>,
}

impl ColorBox {
    fn weight(&self) -> u64 {
        self.entries.iter().map(|&(_, w)| u64::from(w)).sum()
    }

    /// Channel with the widest range and that range.
    fn widest(&self) -> (usize, u8) {
        let mut lo = [u8::MAX; 3];
        let mut hi = [0u8; 3];
        for (color, _) in &self.entries {
            for c in 0..3 {
                lo[c] = lo[c].min(color[c]);
                hi[c] = hi[c].max(color[c]);
            }
        }
        let mut axis = 0;
        for c in 1..3 {
            if hi[c] - lo[c] > hi[axis] - lo[axis] {
                axis = c;
            }
        }
        (axis, hi[axis] - lo[axis])
    }

    fn priority(&self) -> u64 {
        self.weight() * u64::from(self.widest().1)
    }

    fn centroid(&self) -> [u8; 3] {
        mean(self.entries.iter().copied()).unwrap_or([0; 3])
    }

    fn split(mut self) -> (ColorBox, ColorBox) {
        let (axis, _) = self.widest();
        // stable, so equal values keep first-occurrence order
        self.entries.sort_by_key(|(color, _)| color[axis]);
        let half = self.weight() / 2;
        let mut accumulated = 0;
        let mut split = self.entries.len() - 1;
        for (i, &(_, w)) in self.entries.iter().enumerate() {
            accumulated += u64::from(w);
            if accumulated >= half {
                split = i + 1;
                break;
            }
        }
        let split = split.clamp(1, self.entries.len() - 1);
        let right = self.entries.split_off(split);
        (self, ColorBox { entries: right })
    }
}

fn mean(entries: impl Iterator<Item = ([u8; 3], u32)>) -> Option<[u8; 3]> {
    let mut sum = [0u64; 3];
    let mut total = 0u64;
    for (color, w) in entries {
        for c in 0..3 {
            sum[c] += u64::from(color[c]) * u64::from(w);
        }
        total += u64::from(w);
    }
    if total == 0 {
        return None;
    }
    Some(sum.map(|s| ((s + total / 2) / total) as u8))
}

fn median_cut(histogram: &[([u8; 3], u32)], max_colors: usize) -> Vec<[u8; 3]> {
    let mut boxes = vec![ColorBox {
        entries: histogram.to_vec(),
    }];
    while boxes.len() < max_colors {
        let mut best: Option<(usize, u64)> = None;
        for (i, b) in boxes.iter().enumerate() {
            if b.entries.len() < 2 {
                continue;
            }
            let priority = b.priority();
            if best.map_or(true, |(_, p)| priority > p) {
                best = Some((i, priority));
            }
        }
        let Some((idx, _)) = best else {
            break;
        };
        let (left, right) = boxes.remove(idx).split();
        boxes.insert(idx, right);
        boxes.insert(idx, left);
    }
    boxes.iter().map(ColorBox::centroid).collect()
}

/// Weighted k-means passes over the histogram.
fn refine(mut palette: Vec<[u8; 3]>, histogram: &[([u8; 3], u32)], passes: u8) -> Vec<[u8; 3]> {
    for _ in 0..passes {
        let mut members: Vec<Vec<([u8; 3], u32)>> = vec![Vec::new(); palette.len()];
        for &(color, w) in histogram {
            members[nearest_index(&palette, color)].push((color, w));
        }
        let mut changed = false;
        for (slot, entries) in palette.iter_mut().zip(members) {
            if let Some(centroid) = mean(entries.into_iter()) {
                changed |= *slot != centroid;
                *slot = centroid;
            }
        }
        if !changed {
            break;
        }
    }
    palette
}

fn fixed_buckets(histogram: &[([u8; 3], u32)], max_colors: usize) -> Vec<[u8; 3]> {
    let bucket_of = |c: [u8; 3]| {
        (usize::from(c[0] >> 5) << 5) | (usize::from(c[1] >> 5) << 2) | usize::from(c[2] >> 6)
    };
    let mut order: Vec<usize> = Vec::new();
    let mut members: Vec<Vec<([u8; 3], u32)>> = vec![Vec::new(); 256];
    for &(color, w) in histogram {
        let bucket = bucket_of(color);
        if members[bucket].is_empty() {
            order.push(bucket);
        }
        members[bucket].push((color, w));
    }
    if order.len() > max_colors {
        // keep the most populated buckets, earlier ones first on equal weight
        let weight = |b: usize| members[b].iter().map(|&(_, w)| u64::from(w)).sum::<u64>();
        let mut ranked = order.clone();
        ranked.sort_by_key(|&b| std::cmp::Reverse(weight(b)));
        ranked.truncate(max_colors);
        order.retain(|b| ranked.contains(b));
    }
    order
        .into_iter()
        .filter_map(|b| mean(members[b].iter().copied()))
        .collect()
}

/// Floyd-Steinberg error diffusion. Transparent pixels neither receive nor spread error.
fn floyd_steinberg(
    rgba: &[u8],
    width: usize,
    mapper: &mut Mapper<'_>,
    transparent: Option<u8>,
) -> Vec<u8> {
    let width = width.max(1);
    let mut indices = Vec::with_capacity(rgba.len() / 4);
    let mut current = vec![[0i32; 3]; width + 2];
    let mut next = vec![[0i32; 3]; width + 2];
    for row in rgba.chunks(width * 4) {
        for (x, px) in row.chunks_exact(4).enumerate() {
            if let (Some(t), 0) = (transparent, px[3]) {
                indices.push(t);
                continue;
            }
            let err = current[x + 1];
            let wanted = [0, 1, 2].map(|c| (i32::from(px[c]) + err[c] / 16).clamp(0, 255));
            let index = mapper.nearest(wanted.map(|v| v as u8));
            indices.push(index);
            let got = mapper.colors[usize::from(index)];
            for c in 0..3 {
                let e = wanted[c] - i32::from(got[c]);
                current[x + 2][c] += e * 7;
                next[x][c] += e * 3;
                next[x + 1][c] += e * 5;
                next[x + 2][c] += e;
            }
        }
        std::mem::swap(&mut current, &mut next);
        next.iter_mut().for_each(|e| *e = [0; 3]);
    }
    indices
}
