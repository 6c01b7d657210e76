use image::{GrayImage, imageops};

use super::{MIN_SCORE, Preprocess, SimilarityScorer, clamp_score};
use crate::thumbnail::ThumbnailRecord;

const FAST_THRESHOLD: i16 = 20;
const FAST_ARC: usize = 9;
const PATCH_RADIUS: i32 = 15;
const BORDER: u32 = PATCH_RADIUS as u32 + 1;
const MAX_KEYPOINTS: usize = 256;
const DESCRIPTOR_BITS: usize = 256;
const MAX_HAMMING: u32 = 64;
const DESCRIPTOR_SMOOTHING: f32 = 2.0;

/// Bresenham circle of radius 3 used by the FAST test.
const CIRCLE: [(i32, i32); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

type Descriptor = [u64; DESCRIPTOR_BITS / 64];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keypoint {
    pub x: u32,
    pub y: u32,
    pub response: u32,
}

#[derive(Debug, Clone, Default)]
pub struct KeypointFeatures {
    pub keypoints: Vec<Keypoint>,
    descriptors: Vec<Descriptor>,
}

impl KeypointFeatures {
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

/// FAST corners with binary intensity-comparison descriptors. The score is
/// the share of mutually nearest descriptor matches.
#[derive(Debug, Clone)]
pub struct KeypointScorer {
    preprocess: Preprocess,
    pattern: Vec<[(i32, i32); 2]>,
}

impl Default for KeypointScorer {
    fn default() -> Self {
        Self::new(Preprocess::default())
    }
}

impl KeypointScorer {
    pub fn new(preprocess: Preprocess) -> Self {
        Self {
            preprocess,
            pattern: sampling_pattern(),
        }
    }

    pub fn extract(&self, gray: &GrayImage) -> KeypointFeatures {
        let keypoints = detect_corners(gray);
        let smoothed = imageops::blur(gray, DESCRIPTOR_SMOOTHING);
        let descriptors = keypoints
            .iter()
            .map(|kp| self.describe(&smoothed, kp))
            .collect();
        KeypointFeatures {
            keypoints,
            descriptors,
        }
    }

    fn describe(&self, img: &GrayImage, kp: &Keypoint) -> Descriptor {
        let mut descriptor = [0u64; DESCRIPTOR_BITS / 64];
        for (bit, [(ax, ay), (bx, by)]) in self.pattern.iter().enumerate() {
            let a = img.get_pixel((kp.x as i32 + ax) as u32, (kp.y as i32 + ay) as u32)[0];
            let b = img.get_pixel((kp.x as i32 + bx) as u32, (kp.y as i32 + by) as u32)[0];
            if a < b {
                descriptor[bit / 64] |= 1 << (bit % 64);
            }
        }
        descriptor
    }
}

impl SimilarityScorer for KeypointScorer {
    type Features = KeypointFeatures;

    fn prepare(&self, record: &ThumbnailRecord) -> KeypointFeatures {
        self.extract(&self.preprocess.luma(record))
    }

    fn compare(&self, a: &KeypointFeatures, b: &KeypointFeatures) -> f64 {
        if a.is_empty() || b.is_empty() {
            return MIN_SCORE;
        }
        let matches = mutual_matches(&a.descriptors, &b.descriptors);
        clamp_score(matches as f64 / a.len().min(b.len()) as f64)
    }
}

fn hamming(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Index and distance of the nearest descriptor.
fn nearest(query: &Descriptor, candidates: &[Descriptor]) -> Option<(usize, u32)> {
    candidates
        .iter()
        .enumerate()
        .map(|(i, c)| (i, hamming(query, c)))
        .min_by_key(|&(i, d)| (d, i))
}

/// Pairs that are each other's nearest neighbour within the distance cutoff.
///
/// A pair is mutual when the back-match distance equals the forward one, so
/// repeated descriptors all count instead of only the first copy. Both
/// directions are counted and the smaller count is kept.
pub fn mutual_matches(a: &[Descriptor], b: &[Descriptor]) -> usize {
    let a_to_b: Vec<Option<(usize, u32)>> = a.iter().map(|d| nearest(d, b)).collect();
    let b_to_a: Vec<Option<(usize, u32)>> = b.iter().map(|d| nearest(d, a)).collect();
    matched_from(&a_to_b, &b_to_a).min(matched_from(&b_to_a, &a_to_b))
}

fn matched_from(forward: &[Option<(usize, u32)>], back: &[Option<(usize, u32)>]) -> usize {
    forward
        .iter()
        .filter(|m| match m {
            Some((j, dist)) if *dist <= MAX_HAMMING => {
                matches!(back[*j], Some((_, best)) if best == *dist)
            }
            _ => false,
        })
        .count()
}

/// FAST-9 corners with 3×3 non-maximum suppression, strongest first.
pub fn detect_corners(img: &GrayImage) -> Vec<Keypoint> {
    let (width, height) = img.dimensions();
    if width <= 2 * BORDER || height <= 2 * BORDER {
        return Vec::new();
    }

    let mut responses = vec![0u32; (width * height) as usize];
    for y in BORDER..height - BORDER {
        for x in BORDER..width - BORDER {
            responses[(y * width + x) as usize] = corner_response(img, x, y);
        }
    }

    let mut keypoints = Vec::new();
    for y in BORDER..height - BORDER {
        for x in BORDER..width - BORDER {
            let response = responses[(y * width + x) as usize];
            if response == 0 {
                continue;
            }
            let is_max = (-1i32..=1).all(|dy| {
                (-1i32..=1).all(|dx| {
                    let (nx, ny) = ((x as i32 + dx) as u32, (y as i32 + dy) as u32);
                    let other = responses[(ny * width + nx) as usize];
                    (dx == 0 && dy == 0) || other < response || (other == response && (ny, nx) > (y, x))
                })
            });
            if is_max {
                keypoints.push(Keypoint { x, y, response });
            }
        }
    }

    keypoints.sort_by(|a, b| b.response.cmp(&a.response).then((a.y, a.x).cmp(&(b.y, b.x))));
    keypoints.truncate(MAX_KEYPOINTS);
    keypoints
}

/// Zero unless `FAST_ARC` contiguous circle pixels are all brighter or all
/// darker than the centre by more than the threshold.
fn corner_response(img: &GrayImage, x: u32, y: u32) -> u32 {
    let centre = img.get_pixel(x, y)[0] as i16;
    let mut diffs = [0i16; 16];
    for (slot, (dx, dy)) in diffs.iter_mut().zip(CIRCLE.iter()) {
        let value = img.get_pixel((x as i32 + dx) as u32, (y as i32 + dy) as u32)[0] as i16;
        *slot = value - centre;
    }

    let has_arc = |brighter: bool| {
        let mut run = 0;
        for i in 0..16 + FAST_ARC {
            let d = diffs[i % 16];
            let hit = if brighter { d > FAST_THRESHOLD } else { d < -FAST_THRESHOLD };
            run = if hit { run + 1 } else { 0 };
            if run >= FAST_ARC {
                return true;
            }
        }
        false
    };

    let bright: u32 = diffs
        .iter()
        .filter(|&&d| d > FAST_THRESHOLD)
        .map(|&d| (d - FAST_THRESHOLD) as u32)
        .sum();
    let dark: u32 = diffs
        .iter()
        .filter(|&&d| d < -FAST_THRESHOLD)
        .map(|&d| (-d - FAST_THRESHOLD) as u32)
        .sum();

    match (has_arc(true), has_arc(false)) {
        (true, true) => bright.max(dark),
        (true, false) => bright,
        (false, true) => dark,
        (false, false) => 0,
    }
}

/// Fixed pseudo-random point pairs inside the descriptor patch.
fn sampling_pattern() -> Vec<[(i32, i32); 2]> {
    let mut state: u64 = 0x9E37_79B9_7F4A_7C15;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        (state % (2 * PATCH_RADIUS as u64 + 1)) as i32 - PATCH_RADIUS
    };
    (0..DESCRIPTOR_BITS)
        .map(|_| [(next(), next()), (next(), next())])
        .collect()
}
