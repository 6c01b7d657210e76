use image::DynamicImage;
use image_hasher::{HashAlg, Hasher, HasherConfig, ImageHash};

use super::{Preprocess, SimilarityScorer, clamp_score};
use crate::thumbnail::ThumbnailRecord;

const HASH_SIDE: u32 = 16;

/// Gradient hash similarity: one minus the normalized Hamming distance.
pub struct PerceptualHashScorer {
    preprocess: Preprocess,
    hasher: Hasher,
}

impl Default for PerceptualHashScorer {
    fn default() -> Self {
        Self::new(Preprocess::default())
    }
}

impl PerceptualHashScorer {
    pub fn new(preprocess: Preprocess) -> Self {
        let hasher = HasherConfig::new()
            .hash_alg(HashAlg::Gradient)
            .hash_size(HASH_SIDE, HASH_SIDE)
            .to_hasher();
        Self { preprocess, hasher }
    }
}

impl SimilarityScorer for PerceptualHashScorer {
    type Features = ImageHash;

    fn prepare(&self, record: &ThumbnailRecord) -> ImageHash {
        let gray = DynamicImage::ImageLuma8(self.preprocess.luma(record));
        self.hasher.hash_image(&gray)
    }

    fn compare(&self, a: &ImageHash, b: &ImageHash) -> f64 {
        let bits = (a.as_bytes().len() * 8).max(1) as f64;
        clamp_score(1.0 - a.dist(b) as f64 / bits)
    }
}
