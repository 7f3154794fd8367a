//! Color tables
use std::fmt;

/// Largest color table GIF can address.
pub const MAX_COLORS: usize = 256;

/// Ordered RGB palette of 1 to 256 colors.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ColorTable {
    colors: Vec<[u8; 3]>,
}

impl fmt::Debug for ColorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ColorTable({} colors)", self.colors.len())
    }
}

impl ColorTable {
    /// Creates a table, or `None` if it is empty or holds more than 256 colors.
    pub fn new(colors: Vec<[u8; 3]>) -> Option<Self> {
        if colors.is_empty() || colors.len() > MAX_COLORS {
            return None;
        }
        Some(ColorTable { colors })
    }

    /// Wraps the output of the quantizer, which holds 1 to 256 colors.
    pub(crate) fn from_reduced(colors: Vec<[u8; 3]>) -> Self {
        debug_assert!((1..=MAX_COLORS).contains(&colors.len()));
        ColorTable { colors }
    }

    /// Creates a table from packed RGB triples.
    ///
    /// Returns `None` for an empty table, more than 256 colors or a trailing partial triple.
    pub fn from_rgb_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() % 3 != 0 {
            return None;
        }
        Self::new(bytes.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect())
    }

    /// Packed RGB triples, unpadded.
    pub fn as_rgb_bytes(&self) -> Vec<u8> {
        self.colors.iter().flatten().copied().collect()
    }

    /// Packed RGB triples padded with black to [`ColorTable::padded_len`] entries, as stored
    /// in a GIF file.
    pub fn padded_rgb_bytes(&self) -> Vec<u8> {
        let mut bytes = self.as_rgb_bytes();
        bytes.resize(self.padded_len() * 3, 0);
        bytes
    }

    /// Number of colors.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.colors.len()
    }

    /// The colors in table order.
    pub fn colors(&self) -> &[[u8; 3]] {
        &self.colors
    }

    /// Color at `index`.
    pub fn get(&self, index: u8) -> Option<[u8; 3]> {
        self.colors.get(usize::from(index)).copied()
    }

    /// Bits per index, 1 to 8.
    pub fn depth(&self) -> u8 {
        (self.colors.len().max(2).next_power_of_two().trailing_zeros() as u8).clamp(1, 8)
    }

    /// Entries in the stored table, a power of two.
    pub fn padded_len(&self) -> usize {
        1 << self.depth()
    }

    /// Appends a color and returns its index, or `None` if the table is full.
    pub fn push(&mut self, rgb: [u8; 3]) -> Option<u8> {
        if self.colors.len() >= MAX_COLORS {
            return None;
        }
        self.colors.push(rgb);
        Some((self.colors.len() - 1) as u8)
    }

    /// Index of the color closest to `rgb` by squared Euclidean distance.
    ///
    /// Exact ties go to the lowest index.
    pub fn nearest(&self, rgb: [u8; 3]) -> u8 {
        let mut best = 0;
        let mut best_dist = u32::MAX;
        for (i, &color) in self.colors.iter().enumerate() {
            let dist = distance(color, rgb);
            if dist < best_dist {
                best = i;
                best_dist = dist;
                if dist == 0 {
                    break;
                }
            }
        }
        best as u8
    }
}

/// Squared Euclidean distance in RGB.
#[inline]
pub fn distance(a: [u8; 3], b: [u8; 3]) -> u32 {
    a.iter()
        .zip(&b)
        .map(|(&x, &y)| {
            let d = i32::from(x) - i32::from(y);
            (d * d) as u32
        })
        .sum()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rejects_bad_sizes() {
        assert!(ColorTable::new(Vec::new()).is_none());
        assert!(ColorTable::new(vec![[0; 3]; 257]).is_none());
        assert!(ColorTable::from_rgb_bytes(&[1, 2, 3, 4]).is_none());
        assert!(ColorTable::new(vec![[0; 3]; 256]).is_some());
    }

    #[test]
    fn depth_and_padding() {
        for &(len, depth) in &[(1, 1), (2, 1), (3, 2), (4, 2), (5, 3), (129, 8), (256, 8)] {
            let table = ColorTable::new(vec![[7; 3]; len]).unwrap();
            assert_eq!(table.depth(), depth, "{len} colors");
            assert_eq!(table.padded_len(), 1 << depth);
        }
        let table = ColorTable::from_rgb_bytes(&[1, 2, 3, 4, 5, 6, 7, 8, 9]).unwrap();
        assert_eq!(
            table.padded_rgb_bytes(),
            [1, 2, 3, 4, 5, 6, 7, 8, 9, 0, 0, 0]
        );
    }

    #[test]
    fn nearest_prefers_lowest_index_on_ties() {
        let table = ColorTable::new(vec![[10, 0, 0], [0, 0, 0], [20, 0, 0], [0, 0, 0]]).unwrap();
        assert_eq!(table.nearest([0, 0, 0]), 1);
        // equidistant from 0 and 2
        assert_eq!(table.nearest([15, 0, 0]), 0);
        assert_eq!(table.nearest([19, 0, 0]), 2);
        assert_eq!(table.nearest([255, 255, 255]), 2);
    }

    #[test]
    fn push_until_full() {
        let mut table = ColorTable::new(vec![[0; 3]; 255]).unwrap();
        assert_eq!(table.push([1, 1, 1]), Some(255));
        assert_eq!(table.push([2, 2, 2]), None);
        assert_eq!(table.get(255), Some([1, 1, 1]));
    }
}
