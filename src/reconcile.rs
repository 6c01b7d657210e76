use indicatif::ProgressBar;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{ItemError, PipelineError};
use crate::fsops::move_file;
use crate::hide::{FileHider, hide_or_warn};
use crate::journal::MoveJournal;
use crate::materialize::parse_group_folder;
use crate::thumbnail::{is_recognized_image, is_thumbnail, list_files, thumbnail_stem};

#[derive(Debug, Default)]
pub struct ReconcileReport {
    pub folders_removed: Vec<PathBuf>,
    /// Folders that could not be emptied and were left in place.
    pub folders_kept: Vec<PathBuf>,
    pub files_restored: usize,
    pub orphans_deleted: Vec<PathBuf>,
    pub missing_thumbnails: Vec<PathBuf>,
    /// Groups the journal shows as started but never completed.
    pub interrupted_groups: Vec<String>,
    pub errors: Vec<ItemError>,
}

/// Moves everything in `group_<n>` folders back to the source directory.
pub struct ReconciliationPass<'a> {
    source_dir: PathBuf,
    output_root: PathBuf,
    suffix: String,
    hider: &'a dyn FileHider,
}

impl<'a> ReconciliationPass<'a> {
    pub fn new(config: &Config, hider: &'a dyn FileHider) -> Self {
        Self {
            source_dir: config.source_dir.clone(),
            output_root: config.output_dir.clone(),
            suffix: config.thumbnail_suffix.clone(),
            hider,
        }
    }

    /// Existing `group_<n>` folders in numeric order.
    pub fn group_folders(&self) -> Result<Vec<PathBuf>, PipelineError> {
        let entries = match fs::read_dir(&self.output_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(PipelineError::ReadDir {
                    path: self.output_root.clone(),
                    source,
                });
            }
        };
        let mut folders: Vec<(usize, PathBuf)> = entries
            .filter_map(Result::ok)
            .filter(|e| e.path().is_dir())
            .filter_map(|e| {
                let index = parse_group_folder(&e.file_name().to_string_lossy());
                if index.is_none() {
                    log::debug!("Leaving {} alone", e.path().display());
                }
                index.map(|n| (n, e.path()))
            })
            .collect();
        folders.sort();
        Ok(folders.into_iter().map(|(_, path)| path).collect())
    }

    pub fn run(&self, bar: &ProgressBar) -> Result<ReconcileReport, PipelineError> {
        let mut report = ReconcileReport::default();
        let folders = self.group_folders()?;
        if folders.is_empty() {
            log::info!("No group folders in {}", self.output_root.display());
            return Ok(report);
        }
        if !self.source_dir.is_dir() {
            return Err(PipelineError::SourceMissing {
                path: self.source_dir.clone(),
            });
        }

        let journal = MoveJournal::in_dir(&self.output_root);
        for record in journal.interrupted()? {
            log::warn!(
                "{} was only partly moved ({} file(s) planned); restoring what is there",
                record.folder,
                record.files.len()
            );
            report.interrupted_groups.push(record.folder);
        }

        bar.set_length(folders.len() as u64);
        for folder in folders {
            bar.set_message(folder.file_name().unwrap_or_default().to_string_lossy().into_owned());
            self.reconcile_folder(&folder, &mut report);
            bar.inc(1);
        }

        if report.folders_kept.is_empty() {
            journal.clear()?;
        }
        Ok(report)
    }

    fn reconcile_folder(&self, folder: &Path, report: &mut ReconcileReport) {
        let files = match list_files(folder) {
            Ok(files) => files,
            Err(e) => {
                log::warn!("Could not read {}: {}", folder.display(), e);
                report.errors.push(ItemError::Io {
                    path: folder.to_path_buf(),
                    source: io::Error::other(e.to_string()),
                });
                report.folders_kept.push(folder.to_path_buf());
                return;
            }
        };

        let (thumbnails, images): (Vec<PathBuf>, Vec<PathBuf>) = files
            .into_iter()
            .partition(|path| is_thumbnail(path, &self.suffix));
        let image_stems: HashSet<String> = images
            .iter()
            .filter(|p| is_recognized_image(p, &self.suffix))
            .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .collect();

        let mut remaining = Vec::with_capacity(thumbnails.len() + images.len());
        for thumb in thumbnails {
            let name = thumb.file_name().unwrap_or_default().to_string_lossy().into_owned();
            let has_image = thumbnail_stem(&name, &self.suffix)
                .is_some_and(|stem| image_stems.contains(stem));
            if has_image {
                remaining.push(thumb);
                continue;
            }
            match fs::remove_file(&thumb) {
                Ok(()) => {
                    log::info!("Deleted orphaned thumbnail: {}", thumb.display());
                    report.orphans_deleted.push(thumb);
                }
                Err(e) => {
                    report.errors.push(ItemError::from_io(&thumb, e));
                }
            }
        }

        for image in images {
            let stem = image.file_stem().unwrap_or_default().to_string_lossy();
            if is_recognized_image(&image, &self.suffix)
                && !folder.join(format!("{stem}{}", self.suffix)).exists()
            {
                log::warn!("Missing thumbnail for {}", image.display());
                report.missing_thumbnails.push(image.clone());
            }
            remaining.push(image);
        }

        let mut stuck = false;
        for path in remaining {
            let name = path.file_name().unwrap_or_default();
            let dest = self.source_dir.join(name);
            match move_file(&path, &dest) {
                Ok(()) => {
                    if is_thumbnail(&dest, &self.suffix) {
                        hide_or_warn(self.hider, &dest);
                    }
                    log::debug!("Moved {} back to {}", path.display(), self.source_dir.display());
                    report.files_restored += 1;
                }
                Err(e) => {
                    log::warn!("{}", e);
                    report.errors.push(e);
                    stuck = true;
                }
            }
        }

        if stuck {
            report.folders_kept.push(folder.to_path_buf());
            return;
        }
        match fs::remove_dir(folder) {
            Ok(()) => {
                log::info!("Removed empty group folder: {}", folder.display());
                report.folders_removed.push(folder.to_path_buf());
            }
            Err(e) => {
                log::warn!("Could not remove {}: {}", folder.display(), e);
                report.errors.push(ItemError::from_io(folder, e));
                report.folders_kept.push(folder.to_path_buf());
            }
        }
    }
}
