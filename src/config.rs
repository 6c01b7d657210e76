use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::thumbnail::RECOGNIZED_EXTENSIONS;

pub const DEFAULT_THUMBNAIL_SUFFIX: &str = ".thumb.jpg";
pub const DEFAULT_OUTPUT_DIR_NAME: &str = "Grouped";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Could not parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("No source directory given")]
    MissingSource,

    #[error("Threshold must be in (0, 1], got {0}")]
    Threshold(f64),

    #[error("Thumbnail size must be non-zero, got {0}x{1}")]
    ThumbnailSize(u32, u32),

    #[error("Worker pool size must be at least 1")]
    Workers,

    #[error("Blur kernel size must be odd and at least 3, got {0}")]
    BlurKernel(u32),

    #[error("Thumbnail suffix {0:?} must end in a writable image extension and differ from a plain image extension")]
    Suffix(String),

    #[error("Output root must differ from the source directory: {0}")]
    OutputIsSource(PathBuf),
}

/// Which similarity strategy the clustering engine uses.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ScorerKind {
    /// Structural similarity on grayscale thumbnails
    #[default]
    Ssim,
    /// Mutual keypoint descriptor matches
    Keypoint,
    /// Perceptual gradient hash distance
    #[serde(rename = "phash")]
    #[value(name = "phash")]
    PerceptualHash,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlurConfig {
    pub enabled: bool,
    pub kernel_size: u32,
}

impl Default for BlurConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            kernel_size: 5,
        }
    }
}

impl BlurConfig {
    /// Gaussian sigma for the configured kernel, as OpenCV derives it when
    /// no explicit sigma is given.
    pub fn sigma(&self) -> f32 {
        0.3 * ((self.kernel_size as f32 - 1.0) * 0.5 - 1.0) + 0.8
    }
}

/// Fully resolved settings handed to every component.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Config {
    pub source_dir: PathBuf,
    pub output_dir: PathBuf,
    pub thumbnail_size: (u32, u32),
    pub thumbnail_suffix: String,
    pub thumbnail_quality: u8,
    pub threshold: f64,
    pub workers: usize,
    pub scorer: ScorerKind,
    pub blur: BlurConfig,
    pub progress: bool,
}

/// One configuration layer. Every field is optional so layers can be stacked:
/// defaults, then the config file, then command-line flags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PartialConfig {
    pub source_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub thumbnail_size: Option<(u32, u32)>,
    pub thumbnail_suffix: Option<String>,
    pub thumbnail_quality: Option<u8>,
    pub threshold: Option<f64>,
    pub workers: Option<usize>,
    pub scorer: Option<ScorerKind>,
    pub blur: Option<BlurConfig>,
    pub progress: Option<bool>,
}

impl PartialConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Values set in `other` win.
    pub fn merge(self, other: PartialConfig) -> PartialConfig {
        PartialConfig {
            source_dir: other.source_dir.or(self.source_dir),
            output_dir: other.output_dir.or(self.output_dir),
            thumbnail_size: other.thumbnail_size.or(self.thumbnail_size),
            thumbnail_suffix: other.thumbnail_suffix.or(self.thumbnail_suffix),
            thumbnail_quality: other.thumbnail_quality.or(self.thumbnail_quality),
            threshold: other.threshold.or(self.threshold),
            workers: other.workers.or(self.workers),
            scorer: other.scorer.or(self.scorer),
            blur: other.blur.or(self.blur),
            progress: other.progress.or(self.progress),
        }
    }

    pub fn resolve(self) -> Result<Config, ConfigError> {
        let source_dir = self.source_dir.ok_or(ConfigError::MissingSource)?;
        let output_dir = self
            .output_dir
            .unwrap_or_else(|| source_dir.join(DEFAULT_OUTPUT_DIR_NAME));

        let config = Config {
            source_dir,
            output_dir,
            thumbnail_size: self.thumbnail_size.unwrap_or((200, 200)),
            thumbnail_suffix: self
                .thumbnail_suffix
                .unwrap_or_else(|| DEFAULT_THUMBNAIL_SUFFIX.to_string()),
            thumbnail_quality: self.thumbnail_quality.unwrap_or(85),
            threshold: self.threshold.unwrap_or(0.4),
            workers: self.workers.unwrap_or_else(num_cpus::get),
            scorer: self.scorer.unwrap_or_default(),
            blur: self.blur.unwrap_or_default(),
            progress: self.progress.unwrap_or(true),
        };
        config.validate()?;
        Ok(config)
    }
}

impl Config {
    /// A config with defaults for everything but the two directories.
    pub fn new(source_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            source_dir: source_dir.into(),
            output_dir: output_dir.into(),
            thumbnail_size: (200, 200),
            thumbnail_suffix: DEFAULT_THUMBNAIL_SUFFIX.to_string(),
            thumbnail_quality: 85,
            threshold: 0.4,
            workers: num_cpus::get(),
            scorer: ScorerKind::default(),
            blur: BlurConfig::default(),
            progress: true,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.threshold > 0.0 && self.threshold <= 1.0) {
            return Err(ConfigError::Threshold(self.threshold));
        }
        let (w, h) = self.thumbnail_size;
        if w == 0 || h == 0 {
            return Err(ConfigError::ThumbnailSize(w, h));
        }
        if self.workers == 0 {
            return Err(ConfigError::Workers);
        }
        if self.blur.enabled && (self.blur.kernel_size < 3 || self.blur.kernel_size % 2 == 0) {
            return Err(ConfigError::BlurKernel(self.blur.kernel_size));
        }
        if !suffix_is_valid(&self.thumbnail_suffix) {
            return Err(ConfigError::Suffix(self.thumbnail_suffix.clone()));
        }
        if self.output_dir == self.source_dir {
            return Err(ConfigError::OutputIsSource(self.output_dir.clone()));
        }
        Ok(())
    }

    /// Image format used to encode thumbnails, derived from the suffix.
    pub fn thumbnail_format(&self) -> ImageFormat {
        suffix_format(&self.thumbnail_suffix).unwrap_or(ImageFormat::Jpeg)
    }
}

/// `<config_dir>/burstsort/config.json`, if the platform has a config dir.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("burstsort").join("config.json"))
}

fn suffix_format(suffix: &str) -> Option<ImageFormat> {
    ImageFormat::from_path(Path::new(&format!("thumbnail{suffix}"))).ok()
}

fn suffix_is_valid(suffix: &str) -> bool {
    let lowered = suffix.to_lowercase();
    let bare_extension = RECOGNIZED_EXTENSIONS
        .iter()
        .any(|ext| lowered == format!(".{ext}"));
    if bare_extension || !lowered.starts_with('.') {
        return false;
    }
    matches!(
        suffix_format(suffix),
        Some(ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Bmp | ImageFormat::Tiff)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_resolve() {
        let config = PartialConfig {
            source_dir: Some(PathBuf::from("/photos")),
            ..Default::default()
        }
        .resolve()
        .unwrap();

        assert_eq!(config.output_dir, PathBuf::from("/photos/Grouped"));
        assert_eq!(config.thumbnail_size, (200, 200));
        assert_eq!(config.thumbnail_suffix, ".thumb.jpg");
        assert_eq!(config.threshold, 0.4);
        assert_eq!(config.scorer, ScorerKind::Ssim);
        assert!(!config.blur.enabled);
        assert!(config.workers >= 1);
        assert_eq!(config.thumbnail_format(), ImageFormat::Jpeg);
    }

    #[test]
    fn test_cli_layer_overrides_file_layer() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "source_dir": "/from-file",
                "threshold": 0.7,
                "workers": 3,
                "scorer": "phash",
                "blur": { "enabled": true, "kernel_size": 7 }
            }"#,
        )
        .unwrap();

        let file = PartialConfig::from_file(&path).unwrap();
        let cli = PartialConfig {
            source_dir: Some(PathBuf::from("/from-cli")),
            threshold: Some(0.5),
            ..Default::default()
        };
        let config = file.merge(cli).resolve().unwrap();

        assert_eq!(config.source_dir, PathBuf::from("/from-cli"));
        assert_eq!(config.threshold, 0.5);
        assert_eq!(config.workers, 3);
        assert_eq!(config.scorer, ScorerKind::PerceptualHash);
        assert_eq!(config.blur.kernel_size, 7);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, r#"{ "ssim_treshold": 0.3 }"#).unwrap();

        let result = PartialConfig::from_file(&path);
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let result = PartialConfig::default().resolve();
        assert!(matches!(result, Err(ConfigError::MissingSource)));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let base = Config::new("/photos", "/photos/Grouped");

        let mut config = base.clone();
        config.threshold = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Threshold(_))));

        let mut config = base.clone();
        config.thumbnail_size = (0, 100);
        assert!(matches!(config.validate(), Err(ConfigError::ThumbnailSize(0, 100))));

        let mut config = base.clone();
        config.workers = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Workers)));

        let mut config = base.clone();
        config.blur = BlurConfig {
            enabled: true,
            kernel_size: 4,
        };
        assert!(matches!(config.validate(), Err(ConfigError::BlurKernel(4))));

        let mut config = base.clone();
        config.output_dir = PathBuf::from("/photos");
        assert!(matches!(config.validate(), Err(ConfigError::OutputIsSource(_))));
    }

    #[test]
    fn test_suffix_validation() {
        assert!(suffix_is_valid(".thumb.jpg"));
        assert!(suffix_is_valid(".small.png"));
        assert!(!suffix_is_valid(".jpg"));
        assert!(!suffix_is_valid(".thumb"));
        assert!(!suffix_is_valid("thumb.jpg"));
    }

    #[test]
    fn test_blur_sigma_matches_kernel() {
        let blur = BlurConfig {
            enabled: true,
            kernel_size: 5,
        };
        assert!((blur.sigma() - 1.1).abs() < 1e-6);
    }
}
