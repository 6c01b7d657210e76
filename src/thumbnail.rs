use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::error::{DecodingError, ImageFormatHint};
use image::{ImageFormat, RgbImage};
use indicatif::ProgressBar;
use rayon::ThreadPool;
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::config::Config;
use crate::error::{ItemError, PipelineError};
use crate::hide::{FileHider, hide_or_warn};

const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// Extensions (lowercase) treated as groupable source images.
pub const RECOGNIZED_EXTENSIONS: [&str; 8] =
    ["jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp"];

/// A source image together with its cached fixed-size rendition.
#[derive(Debug, Clone)]
pub struct ThumbnailRecord {
    pub source_path: PathBuf,
    pub thumbnail_path: PathBuf,
    pub pixels: Arc<RgbImage>,
}

impl ThumbnailRecord {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn file_name(&self) -> String {
        self.source_path
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Created,
    Cached,
}

/// Result of ensuring thumbnails for a whole directory.
#[derive(Debug, Default)]
pub struct CacheOutcome {
    /// Records in directory listing order.
    pub records: Vec<ThumbnailRecord>,
    pub created: usize,
    pub cached: usize,
    pub errors: Vec<ItemError>,
}

#[derive(Debug, Default)]
pub struct PruneReport {
    pub deleted: Vec<PathBuf>,
    pub errors: Vec<ItemError>,
}

/// `<dir>/<stem><suffix>` for a source image.
pub fn thumbnail_path_for(source: &Path, suffix: &str) -> Option<PathBuf> {
    let stem = source.file_stem()?.to_str()?;
    let parent = source.parent().unwrap_or_else(|| Path::new(""));
    Some(parent.join(format!("{stem}{suffix}")))
}

pub fn is_thumbnail(path: &Path, suffix: &str) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name.len() > suffix.len() && name.ends_with(suffix))
}

/// The source stem a thumbnail file name belongs to.
pub fn thumbnail_stem<'a>(file_name: &'a str, suffix: &str) -> Option<&'a str> {
    file_name.strip_suffix(suffix).filter(|stem| !stem.is_empty())
}

pub fn is_recognized_image(path: &Path, suffix: &str) -> bool {
    if is_thumbnail(path, suffix) {
        return false;
    }
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| RECOGNIZED_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Regular files directly inside `dir`, sorted by file name.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
    if !dir.is_dir() {
        return Err(PipelineError::SourceMissing {
            path: dir.to_path_buf(),
        });
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        match entry {
            Ok(entry) if entry.file_type().is_file() => files.push(entry.into_path()),
            Ok(_) => {}
            Err(e) => {
                if e.depth() == 0 {
                    let source = e
                        .into_io_error()
                        .unwrap_or_else(|| io::Error::other("directory walk failed"));
                    return Err(PipelineError::ReadDir {
                        path: dir.to_path_buf(),
                        source,
                    });
                }
                log::warn!("Skipping unreadable entry in {}: {}", dir.display(), e);
            }
        }
    }
    Ok(files)
}

/// Produces and persists one small rendition per source image.
pub struct ThumbnailCache<'a> {
    size: (u32, u32),
    suffix: String,
    format: ImageFormat,
    quality: u8,
    hider: &'a dyn FileHider,
}

impl<'a> ThumbnailCache<'a> {
    pub fn new(config: &Config, hider: &'a dyn FileHider) -> Self {
        Self {
            size: config.thumbnail_size,
            suffix: config.thumbnail_suffix.clone(),
            format: config.thumbnail_format(),
            quality: config.thumbnail_quality,
            hider,
        }
    }

    /// Recognized source images directly inside `dir`, in listing order.
    pub fn list_source_images(&self, dir: &Path) -> Result<Vec<PathBuf>, PipelineError> {
        Ok(list_files(dir)?
            .into_iter()
            .filter(|path| is_recognized_image(path, &self.suffix))
            .collect())
    }

    /// Ensure a thumbnail exists for every source image in `dir`.
    ///
    /// Undecodable images are reported in [`CacheOutcome::errors`] and left
    /// out of the records; the batch always runs to completion.
    pub fn ensure_all(
        &self,
        dir: &Path,
        pool: &ThreadPool,
        bar: &ProgressBar,
    ) -> Result<CacheOutcome, PipelineError> {
        let mut outcome = CacheOutcome::default();
        let mut claimed: HashMap<PathBuf, PathBuf> = HashMap::new();
        let mut work = Vec::new();

        for source in self.list_source_images(dir)? {
            let Some(thumbnail) = thumbnail_path_for(&source, &self.suffix) else {
                log::warn!("Skipping {}: file name is not valid UTF-8", source.display());
                continue;
            };
            if let Some(existing) = claimed.get(&thumbnail) {
                log::warn!(
                    "Skipping {}: thumbnail name already used by {}",
                    source.display(),
                    existing.display()
                );
                outcome.errors.push(ItemError::NameCollision {
                    path: source,
                    existing: existing.clone(),
                });
                continue;
            }
            claimed.insert(thumbnail.clone(), source.clone());
            work.push((source, thumbnail));
        }

        bar.set_length(work.len() as u64);
        let results: Vec<Result<(ThumbnailRecord, CacheStatus), ItemError>> = pool.install(|| {
            work.par_iter()
                .map(|(source, thumbnail)| {
                    let result = self.ensure_at(source, thumbnail);
                    bar.inc(1);
                    result
                })
                .collect()
        });

        for result in results {
            match result {
                Ok((record, CacheStatus::Created)) => {
                    outcome.created += 1;
                    outcome.records.push(record);
                }
                Ok((record, CacheStatus::Cached)) => {
                    outcome.cached += 1;
                    outcome.records.push(record);
                }
                Err(e) => {
                    log::warn!("{}", e);
                    outcome.errors.push(e);
                }
            }
        }
        Ok(outcome)
    }

    /// Ensure the thumbnail for one source image.
    pub fn ensure(&self, source: &Path) -> Result<(ThumbnailRecord, CacheStatus), ItemError> {
        let thumbnail = thumbnail_path_for(source, &self.suffix).ok_or_else(|| ItemError::Io {
            path: source.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, "file name is not valid UTF-8"),
        })?;
        self.ensure_at(source, &thumbnail)
    }

    fn ensure_at(
        &self,
        source: &Path,
        thumbnail: &Path,
    ) -> Result<(ThumbnailRecord, CacheStatus), ItemError> {
        if thumbnail.exists() {
            match self.load_cached(thumbnail) {
                Ok(pixels) => {
                    let pixels = self.fit(pixels);
                    return Ok((self.record(source, thumbnail, pixels), CacheStatus::Cached));
                }
                Err(e) => {
                    log::warn!(
                        "Cached thumbnail {} is unreadable ({}); regenerating",
                        thumbnail.display(),
                        e
                    );
                }
            }
        }

        let img = image::open(source).map_err(|e| match e {
            image::ImageError::IoError(io_err) => ItemError::from_io(source, io_err),
            other => ItemError::Decode {
                path: source.to_path_buf(),
                source: other,
            },
        })?;
        let (width, height) = self.size;
        let resized = img.resize_exact(width, height, FilterType::Lanczos3).to_rgb8();

        let encoded = self.encode(&resized).map_err(|e| ItemError::Io {
            path: thumbnail.to_path_buf(),
            source: io::Error::other(e),
        })?;
        write_atomically(thumbnail, &encoded).map_err(|e| ItemError::from_io(thumbnail, e))?;
        hide_or_warn(self.hider, thumbnail);
        log::debug!("Created thumbnail {}", thumbnail.display());

        // Score against what was persisted so later cache hits see the same pixels.
        let pixels = match image::load_from_memory_with_format(&encoded, self.format) {
            Ok(img) => img.to_rgb8(),
            Err(_) => resized,
        };
        Ok((self.record(source, thumbnail, pixels), CacheStatus::Created))
    }

    /// Delete thumbnails in `dir` whose source image no longer exists.
    pub fn prune_orphans(&self, dir: &Path) -> Result<PruneReport, PipelineError> {
        let files = list_files(dir)?;
        let stems: HashSet<String> = files
            .iter()
            .filter(|path| is_recognized_image(path, &self.suffix))
            .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();

        let mut report = PruneReport::default();
        for path in files.iter().filter(|path| is_thumbnail(path, &self.suffix)) {
            let name = path.file_name().unwrap_or_default().to_string_lossy();
            let Some(stem) = thumbnail_stem(&name, &self.suffix) else {
                continue;
            };
            if stems.contains(stem) {
                continue;
            }
            match fs::remove_file(path) {
                Ok(()) => {
                    log::info!("Deleted orphaned thumbnail: {}", path.display());
                    report.deleted.push(path.clone());
                }
                Err(e) => report.errors.push(ItemError::from_io(path, e)),
            }
        }
        Ok(report)
    }

    /// Decode a cached thumbnail. A JPEG cut short before its end-of-image
    /// marker counts as unreadable even though the decoder would accept it.
    fn load_cached(&self, thumbnail: &Path) -> Result<RgbImage, image::ImageError> {
        let bytes = fs::read(thumbnail)?;
        if self.format == ImageFormat::Jpeg && !bytes.ends_with(&JPEG_EOI) {
            return Err(image::ImageError::Decoding(DecodingError::new(
                ImageFormatHint::Exact(ImageFormat::Jpeg),
                "truncated: missing end-of-image marker",
            )));
        }
        Ok(image::load_from_memory_with_format(&bytes, self.format)?.to_rgb8())
    }

    fn fit(&self, pixels: RgbImage) -> RgbImage {
        let (width, height) = self.size;
        if pixels.dimensions() == (width, height) {
            pixels
        } else {
            imageops::resize(&pixels, width, height, FilterType::Lanczos3)
        }
    }

    fn encode(&self, pixels: &RgbImage) -> Result<Vec<u8>, image::ImageError> {
        let mut buffer = Cursor::new(Vec::new());
        if self.format == ImageFormat::Jpeg {
            let encoder = JpegEncoder::new_with_quality(&mut buffer, self.quality);
            pixels.write_with_encoder(encoder)?;
        } else {
            pixels.write_to(&mut buffer, self.format)?;
        }
        Ok(buffer.into_inner())
    }

    fn record(&self, source: &Path, thumbnail: &Path, pixels: RgbImage) -> ThumbnailRecord {
        ThumbnailRecord {
            source_path: source.to_path_buf(),
            thumbnail_path: thumbnail.to_path_buf(),
            pixels: Arc::new(pixels),
        }
    }
}

/// Write `bytes` to a temporary sibling of `path`, then rename it into place,
/// so an interrupted run never leaves a partial file under the final name.
fn write_atomically(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".burstsort-")
        .suffix(".part")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
