//! Coarse presence detection: "is there a face-sized region in the frame".

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::camera::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

pub trait PresenceDetector: Send + Sync {
    fn detect(&self, frame: &Frame) -> Result<Vec<Region>>;
}

/// True when the largest region covers at least `min_fraction` of the frame.
pub fn has_presence(regions: &[Region], frame: &Frame, min_fraction: f32) -> bool {
    let frame_area = u64::from(frame.width()) * u64::from(frame.height());
    if frame_area == 0 {
        return false;
    }
    let largest = regions.iter().map(Region::area).max().unwrap_or(0);
    largest > 0 && largest as f64 >= f64::from(min_fraction) * frame_area as f64
}

/// Finds skin-coloured blobs with a face-like aspect ratio.
///
/// The frame is split into square cells; a cell counts as skin when most of
/// its pixels fall in the YCbCr skin range. Connected skin cells form a blob.
pub struct SkinToneDetector {
    cell: u32,
    min_cells: usize,
    skin_ratio: f32,
}

impl Default for SkinToneDetector {
    fn default() -> Self {
        Self {
            cell: 8,
            min_cells: 6,
            skin_ratio: 0.5,
        }
    }
}

impl SkinToneDetector {
    fn is_skin(r: u8, g: u8, b: u8) -> bool {
        let (r, g, b) = (f32::from(r), f32::from(g), f32::from(b));
        let y = 0.299 * r + 0.587 * g + 0.114 * b;
        let cb = 128.0 - 0.168_736 * r - 0.331_264 * g + 0.5 * b;
        let cr = 128.0 + 0.5 * r - 0.418_688 * g - 0.081_312 * b;
        y > 40.0 && (77.0..=127.0).contains(&cb) && (133.0..=173.0).contains(&cr)
    }

    fn skin_grid(&self, frame: &Frame) -> (Vec<bool>, usize, usize) {
        let cols = (frame.width() / self.cell) as usize;
        let rows = (frame.height() / self.cell) as usize;
        let mut grid = vec![false; cols * rows];
        let per_cell = (self.cell * self.cell) as f32;

        for row in 0..rows {
            for col in 0..cols {
                let (x0, y0) = (col as u32 * self.cell, row as u32 * self.cell);
                let mut hits = 0u32;
                for y in y0..y0 + self.cell {
                    for x in x0..x0 + self.cell {
                        let [r, g, b] = frame.get_pixel(x, y).0;
                        if Self::is_skin(r, g, b) {
                            hits += 1;
                        }
                    }
                }
                grid[row * cols + col] = hits as f32 / per_cell >= self.skin_ratio;
            }
        }

        (grid, cols, rows)
    }
}

impl PresenceDetector for SkinToneDetector {
    fn detect(&self, frame: &Frame) -> Result<Vec<Region>> {
        let (grid, cols, rows) = self.skin_grid(frame);
        let mut visited = vec![false; grid.len()];
        let mut regions = Vec::new();
        let mut stack = Vec::new();

        for start in 0..grid.len() {
            if !grid[start] || visited[start] {
                continue;
            }

            visited[start] = true;
            stack.push(start);
            let (mut min_c, mut min_r, mut max_c, mut max_r) = (cols, rows, 0, 0);
            let mut cells = 0usize;

            while let Some(index) = stack.pop() {
                let (r, c) = (index / cols, index % cols);
                cells += 1;
                min_c = min_c.min(c);
                max_c = max_c.max(c);
                min_r = min_r.min(r);
                max_r = max_r.max(r);

                let neighbours = [
                    (r > 0).then(|| index - cols),
                    (r + 1 < rows).then(|| index + cols),
                    (c > 0).then(|| index - 1),
                    (c + 1 < cols).then(|| index + 1),
                ];
                for next in neighbours.into_iter().flatten() {
                    if grid[next] && !visited[next] {
                        visited[next] = true;
                        stack.push(next);
                    }
                }
            }

            if cells < self.min_cells {
                continue;
            }
            let width = (max_c - min_c + 1) as u32 * self.cell;
            let height = (max_r - min_r + 1) as u32 * self.cell;
            let aspect = width as f32 / height as f32;
            if !(0.4..=2.5).contains(&aspect) {
                continue;
            }
            regions.push(Region {
                x: min_c as u32 * self.cell,
                y: min_r as u32 * self.cell,
                width,
                height,
            });
        }

        Ok(regions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    const SKIN: Rgb<u8> = Rgb([224, 172, 150]);
    const WALL: Rgb<u8> = Rgb([40, 90, 160]);

    fn frame_with_patch(w: u32, h: u32, patch: Option<(u32, u32, u32, u32)>) -> RgbImage {
        RgbImage::from_fn(w, h, |x, y| match patch {
            Some((px, py, pw, ph)) if x >= px && x < px + pw && y >= py && y < py + ph => SKIN,
            _ => WALL,
        })
    }

    #[test]
    fn skin_sample_is_classified() {
        let [r, g, b] = SKIN.0;
        assert!(SkinToneDetector::is_skin(r, g, b));
        let [r, g, b] = WALL.0;
        assert!(!SkinToneDetector::is_skin(r, g, b));
    }

    #[test]
    fn finds_face_sized_patch() {
        let frame = frame_with_patch(320, 240, Some((120, 64, 80, 96)));
        let regions = SkinToneDetector::default().detect(&frame).unwrap();
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].width, 80);
        assert_eq!(regions[0].height, 96);
        assert!(has_presence(&regions, &frame, 0.01));
    }

    #[test]
    fn empty_scene_has_no_regions() {
        let frame = frame_with_patch(320, 240, None);
        assert!(SkinToneDetector::default().detect(&frame).unwrap().is_empty());
    }

    #[test]
    fn thin_strip_is_rejected() {
        let frame = frame_with_patch(320, 240, Some((0, 100, 320, 16)));
        assert!(SkinToneDetector::default().detect(&frame).unwrap().is_empty());
    }

    #[test]
    fn tiny_region_does_not_count_as_presence() {
        let frame = RgbImage::new(640, 480);
        let distant = [Region { x: 0, y: 0, width: 40, height: 40 }];
        assert!(!has_presence(&distant, &frame, 0.01));
        let near = [Region { x: 0, y: 0, width: 64, height: 48 }];
        assert!(has_presence(&near, &frame, 0.01));
        assert!(!has_presence(&[], &frame, 0.01));
    }
}
