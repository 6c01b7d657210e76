use image::imageops::{self, FilterType};
use image::GrayImage;

use super::{Preprocess, SimilarityScorer, clamp_score};
use crate::thumbnail::ThumbnailRecord;

const WINDOW: u32 = 7;
const K1: f64 = 0.01;
const K2: f64 = 0.03;
const DYNAMIC_RANGE: f64 = 255.0;

/// Mean structural similarity over grayscale thumbnails.
#[derive(Debug, Clone, Default)]
pub struct SsimScorer {
    preprocess: Preprocess,
}

impl SsimScorer {
    pub fn new(preprocess: Preprocess) -> Self {
        Self { preprocess }
    }
}

impl SimilarityScorer for SsimScorer {
    type Features = GrayImage;

    fn prepare(&self, record: &ThumbnailRecord) -> GrayImage {
        self.preprocess.luma(record)
    }

    fn compare(&self, a: &GrayImage, b: &GrayImage) -> f64 {
        clamp_score(structural_similarity(a, b))
    }
}

/// Summed-area tables of x, y, x², y² and xy. Integer sums keep the
/// result independent of argument order.
struct Moments {
    stride: usize,
    x: Vec<u64>,
    y: Vec<u64>,
    xx: Vec<u64>,
    yy: Vec<u64>,
    xy: Vec<u64>,
}

impl Moments {
    fn new(a: &GrayImage, b: &GrayImage) -> Self {
        let (width, height) = a.dimensions();
        let stride = width as usize + 1;
        let len = stride * (height as usize + 1);
        let mut m = Moments {
            stride,
            x: vec![0; len],
            y: vec![0; len],
            xx: vec![0; len],
            yy: vec![0; len],
            xy: vec![0; len],
        };
        for row in 0..height as usize {
            let (mut rx, mut ry, mut rxx, mut ryy, mut rxy) = (0u64, 0u64, 0u64, 0u64, 0u64);
            for col in 0..width as usize {
                let pa = a.get_pixel(col as u32, row as u32)[0] as u64;
                let pb = b.get_pixel(col as u32, row as u32)[0] as u64;
                rx += pa;
                ry += pb;
                rxx += pa * pa;
                ryy += pb * pb;
                rxy += pa * pb;
                let above = row * stride + col + 1;
                let here = (row + 1) * stride + col + 1;
                m.x[here] = m.x[above] + rx;
                m.y[here] = m.y[above] + ry;
                m.xx[here] = m.xx[above] + rxx;
                m.yy[here] = m.yy[above] + ryy;
                m.xy[here] = m.xy[above] + rxy;
            }
        }
        m
    }

    fn window(table: &[u64], stride: usize, x0: usize, y0: usize, size: usize) -> f64 {
        let (x1, y1) = (x0 + size, y0 + size);
        let total = table[y1 * stride + x1] + table[y0 * stride + x0];
        let overlap = table[y0 * stride + x1] + table[y1 * stride + x0];
        (total - overlap) as f64
    }
}

/// Mean SSIM over every fully contained square window, with a uniform
/// 7×7 window and sample covariance. Ranges over `[-1, 1]`.
///
/// Images of different sizes are both resampled to the common minimum size.
pub fn structural_similarity(a: &GrayImage, b: &GrayImage) -> f64 {
    if a.dimensions() != b.dimensions() {
        let width = a.width().min(b.width());
        let height = a.height().min(b.height());
        let a = imageops::resize(a, width, height, FilterType::Triangle);
        let b = imageops::resize(b, width, height, FilterType::Triangle);
        return structural_similarity(&a, &b);
    }

    let (width, height) = a.dimensions();
    if width == 0 || height == 0 {
        return 0.0;
    }
    let mut win = WINDOW.min(width).min(height);
    if win % 2 == 0 {
        win -= 1;
    }
    let win = win as usize;
    let n = (win * win) as f64;
    let cov_norm = if win > 1 { n / (n - 1.0) } else { 1.0 };
    let c1 = (K1 * DYNAMIC_RANGE).powi(2);
    let c2 = (K2 * DYNAMIC_RANGE).powi(2);

    let m = Moments::new(a, b);
    let s = m.stride;
    let mut total = 0.0;
    let mut count = 0usize;
    for y0 in 0..=(height as usize - win) {
        for x0 in 0..=(width as usize - win) {
            let mx = Moments::window(&m.x, s, x0, y0, win) / n;
            let my = Moments::window(&m.y, s, x0, y0, win) / n;
            let vx = (Moments::window(&m.xx, s, x0, y0, win) / n - mx * mx) * cov_norm;
            let vy = (Moments::window(&m.yy, s, x0, y0, win) / n - my * my) * cov_norm;
            let cxy = (Moments::window(&m.xy, s, x0, y0, win) / n - mx * my) * cov_norm;

            let numerator = (2.0 * (mx * my) + c1) * (2.0 * cxy + c2);
            let denominator = (mx * mx + my * my + c1) * (vx + vy + c2);
            total += numerator / denominator;
            count += 1;
        }
    }
    total / count as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Luma, RgbImage};
    use std::path::PathBuf;
    use std::sync::Arc;

    fn gradient(width: u32, height: u32, shift: u32) -> GrayImage {
        ImageBuffer::from_fn(width, height, |x, y| Luma([((x * 3 + y + shift) % 256) as u8]))
    }

    fn noise(width: u32, height: u32, seed: u32) -> GrayImage {
        let mut state = seed.wrapping_mul(2_654_435_761).max(1);
        ImageBuffer::from_fn(width, height, |_, _| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            Luma([(state & 0xff) as u8])
        })
    }

    #[test]
    fn test_identical_images_score_one() {
        let img = gradient(40, 30, 0);
        let score = structural_similarity(&img, &img);
        assert!((score - 1.0).abs() < 1e-9, "got {score}");
    }

    #[test]
    fn test_unrelated_images_score_low() {
        let a = noise(48, 48, 1);
        let b = noise(48, 48, 2);
        assert!(structural_similarity(&a, &b) < 0.2);
    }

    #[test]
    fn test_small_shift_scores_between() {
        let a = gradient(48, 48, 0);
        let b = gradient(48, 48, 4);
        let score = structural_similarity(&a, &b);
        assert!(score > 0.5 && score < 1.0, "got {score}");
    }

    #[test]
    fn test_score_is_symmetric() {
        let scorer = SsimScorer::new(Preprocess { blur_sigma: Some(1.1) });
        let a = noise(50, 40, 7);
        let b = gradient(50, 40, 9);
        assert_eq!(scorer.compare(&a, &b), scorer.compare(&b, &a));

        let c = noise(50, 40, 8);
        assert_eq!(
            structural_similarity(&a, &c),
            structural_similarity(&c, &a)
        );
    }

    #[test]
    fn test_scores_stay_in_open_unit_interval() {
        let scorer = SsimScorer::default();
        let a: GrayImage = ImageBuffer::from_fn(20, 20, |x, _| Luma([if x % 2 == 0 { 0 } else { 255 }]));
        let b: GrayImage = ImageBuffer::from_fn(20, 20, |x, _| Luma([if x % 2 == 0 { 255 } else { 0 }]));
        let score = scorer.compare(&a, &b);
        assert!(score > 0.0 && score <= 1.0);
    }

    #[test]
    fn test_tiny_images_use_smaller_window() {
        let a = gradient(4, 4, 0);
        let score = structural_similarity(&a, &a);
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_record_scoring_goes_through_grayscale() {
        let rgb = RgbImage::from_fn(24, 24, |x, y| image::Rgb([(x * 10) as u8, (y * 10) as u8, 50]));
        let record = ThumbnailRecord {
            source_path: PathBuf::from("a.jpg"),
            thumbnail_path: PathBuf::from("a.thumb.jpg"),
            pixels: Arc::new(rgb),
        };
        let scorer = SsimScorer::default();
        assert!((scorer.score(&record, &record) - 1.0).abs() < 1e-9);
    }
}
