//! Connected foreground regions of a [`Mask`].
//!
//! Regions are 8-connected.  A region's area is its pixel count, which for
//! solid blobs matches the contour area reported by polygon-based contour
//! finders up to the perimeter term.

use scrub_types::BoundingBox;

use crate::color::Mask;

/// One connected blob of foreground pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    /// Pixel count.
    pub area: f64,
    pub bounding_box: BoundingBox,
}

/// Label every 8-connected region of `mask`, in raster-scan order of their
/// first pixel.
pub fn find_regions(mask: &Mask) -> Vec<Region> {
    let (w, h) = (mask.width as usize, mask.height as usize);
    let mut visited = vec![false; w * h];
    let mut stack: Vec<usize> = Vec::new();
    let mut regions = Vec::new();

    for start in 0..w * h {
        if visited[start] || !mask.bits[start] {
            continue;
        }
        visited[start] = true;
        stack.push(start);

        let mut count = 0usize;
        let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
        let (mut max_x, mut max_y) = (0usize, 0usize);

        while let Some(idx) = stack.pop() {
            let (x, y) = (idx % w, idx / w);
            count += 1;
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);

            for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                    let n = ny * w + nx;
                    if !visited[n] && mask.bits[n] {
                        visited[n] = true;
                        stack.push(n);
                    }
                }
            }
        }

        regions.push(Region {
            area: count as f64,
            bounding_box: BoundingBox {
                x: min_x as u32,
                y: min_y as u32,
                width: (max_x - min_x + 1) as u32,
                height: (max_y - min_y + 1) as u32,
            },
        });
    }

    regions
}

/// Region with the greatest area; the first one wins a tie.
pub fn largest(regions: &[Region]) -> Option<&Region> {
    regions
        .iter()
        .fold(None, |best: Option<&Region>, r| match best {
            Some(b) if b.area >= r.area => Some(b),
            _ => Some(r),
        })
}
