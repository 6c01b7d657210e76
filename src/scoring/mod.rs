//! Pairwise similarity between thumbnails.
//!
//! Every scorer returns a value in `(0, 1]`, higher meaning more similar, and
//! is symmetric in its arguments. Scores from different scorers are not
//! comparable, so a threshold only means something for the scorer it was
//! tuned against.

use image::{GrayImage, imageops};

use crate::config::{BlurConfig, Config, ScorerKind};
use crate::thumbnail::ThumbnailRecord;

pub mod keypoint;
pub mod perceptual;
pub mod ssim;

pub use keypoint::KeypointScorer;
pub use perceptual::PerceptualHashScorer;
pub use ssim::SsimScorer;

/// Lowest score a scorer reports; keeps the range open at zero.
pub const MIN_SCORE: f64 = f64::MIN_POSITIVE;

pub trait SimilarityScorer: Send + Sync {
    /// Per-image data computed once and reused for every comparison.
    type Features: Send + Sync;

    fn prepare(&self, record: &ThumbnailRecord) -> Self::Features;

    fn compare(&self, a: &Self::Features, b: &Self::Features) -> f64;

    fn score(&self, a: &ThumbnailRecord, b: &ThumbnailRecord) -> f64 {
        self.compare(&self.prepare(a), &self.prepare(b))
    }
}

pub fn clamp_score(raw: f64) -> f64 {
    if raw.is_nan() {
        MIN_SCORE
    } else {
        raw.clamp(MIN_SCORE, 1.0)
    }
}

/// Optional smoothing applied to the intensity image before scoring.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Preprocess {
    pub blur_sigma: Option<f32>,
}

impl Preprocess {
    pub fn from_blur(blur: &BlurConfig) -> Self {
        Self {
            blur_sigma: blur.enabled.then(|| blur.sigma()),
        }
    }

    /// Single-channel intensity image of a thumbnail.
    pub fn luma(&self, record: &ThumbnailRecord) -> GrayImage {
        let gray = imageops::grayscale(record.pixels.as_ref());
        match self.blur_sigma {
            Some(sigma) => imageops::blur(&gray, sigma),
            None => gray,
        }
    }
}

/// Builds the configured scorer and hands it to `f`.
///
/// Scorers carry different feature types, so callers are written once
/// against the trait and instantiated here for each strategy.
pub trait WithScorer {
    type Output;
    fn run<S: SimilarityScorer>(self, scorer: &S) -> Self::Output;
}

pub fn with_configured_scorer<W: WithScorer>(config: &Config, job: W) -> W::Output {
    let preprocess = Preprocess::from_blur(&config.blur);
    match config.scorer {
        ScorerKind::Ssim => job.run(&SsimScorer::new(preprocess)),
        ScorerKind::Keypoint => job.run(&KeypointScorer::new(preprocess)),
        ScorerKind::PerceptualHash => job.run(&PerceptualHashScorer::new(preprocess)),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::SimilarityScorer;
    use crate::thumbnail::ThumbnailRecord;
    use image::RgbImage;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Arc;

    /// Scores looked up from a table keyed by file name pair.
    pub struct TableScorer {
        pub scores: HashMap<(String, String), f64>,
        pub default: f64,
    }

    impl TableScorer {
        pub fn new(pairs: &[(&str, &str, f64)], default: f64) -> Self {
            let mut scores = HashMap::new();
            for (a, b, s) in pairs {
                scores.insert((a.to_string(), b.to_string()), *s);
                scores.insert((b.to_string(), a.to_string()), *s);
            }
            Self { scores, default }
        }
    }

    impl SimilarityScorer for TableScorer {
        type Features = String;

        fn prepare(&self, record: &ThumbnailRecord) -> String {
            record.file_name()
        }

        fn compare(&self, a: &String, b: &String) -> f64 {
            self.scores
                .get(&(a.clone(), b.clone()))
                .copied()
                .unwrap_or(self.default)
        }
    }

    pub fn fake_record(name: &str) -> ThumbnailRecord {
        ThumbnailRecord {
            source_path: PathBuf::from(name),
            thumbnail_path: PathBuf::from(format!("{name}.thumb.jpg")),
            pixels: Arc::new(RgbImage::new(1, 1)),
        }
    }
}
