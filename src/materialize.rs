use indicatif::ProgressBar;
use std::fs;
use std::path::{Path, PathBuf};

use crate::cluster::Group;
use crate::config::Config;
use crate::error::{ItemError, PipelineError};
use crate::fsops::move_file;
use crate::hide::{FileHider, hide_or_warn};
use crate::journal::MoveJournal;

pub const GROUP_FOLDER_PREFIX: &str = "group_";

pub fn group_folder_name(index: usize) -> String {
    format!("{GROUP_FOLDER_PREFIX}{index}")
}

/// The `n` of a `group_<n>` folder name.
pub fn parse_group_folder(name: &str) -> Option<usize> {
    name.strip_prefix(GROUP_FOLDER_PREFIX)?.parse().ok()
}

#[derive(Debug, Clone)]
pub struct MaterializedGroup {
    /// Ordinal of the group in clustering order.
    pub ordinal: usize,
    pub folder: PathBuf,
    /// Source images now inside `folder`.
    pub moved: Vec<PathBuf>,
}

#[derive(Debug, Default)]
pub struct MaterializeReport {
    pub groups: Vec<MaterializedGroup>,
    pub singletons: usize,
    pub images_moved: usize,
    pub errors: Vec<ItemError>,
}

/// Moves every multi-member group into its own `group_<n>` folder.
pub struct GroupMaterializer<'a> {
    output_root: PathBuf,
    hider: &'a dyn FileHider,
    dry_run: bool,
}

impl<'a> GroupMaterializer<'a> {
    pub fn new(config: &Config, hider: &'a dyn FileHider) -> Self {
        Self {
            output_root: config.output_dir.clone(),
            hider,
            dry_run: false,
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn materialize(
        &self,
        groups: &[Group],
        bar: &ProgressBar,
    ) -> Result<MaterializeReport, PipelineError> {
        let mut report = MaterializeReport {
            singletons: groups.iter().filter(|g| g.len() <= 1).count(),
            ..Default::default()
        };
        let multi: Vec<&Group> = groups.iter().filter(|g| g.len() > 1).collect();
        bar.set_length(multi.len() as u64);
        if multi.is_empty() {
            return Ok(report);
        }

        if !self.dry_run {
            fs::create_dir_all(&self.output_root).map_err(|source| PipelineError::OutputRoot {
                path: self.output_root.clone(),
                source,
            })?;
        }
        let mut next_index = highest_group_index(&self.output_root) + 1;
        if next_index > 1 {
            log::warn!(
                "{} already holds group folders; numbering continues at {}",
                self.output_root.display(),
                group_folder_name(next_index)
            );
        }
        let journal = MoveJournal::in_dir(&self.output_root);

        for group in multi {
            let folder = self.output_root.join(group_folder_name(next_index));
            if self.dry_run {
                for member in &group.members {
                    log::info!(
                        "📦 [dry-run] MOVE {} → {}",
                        member.source_path.display(),
                        folder.display()
                    );
                }
                report.groups.push(MaterializedGroup {
                    ordinal: group.ordinal,
                    folder,
                    moved: Vec::new(),
                });
                next_index += 1;
                bar.inc(1);
                continue;
            }

            if let Err(e) = fs::create_dir_all(&folder) {
                log::warn!("Could not create {}: {}", folder.display(), e);
                report.errors.push(ItemError::from_io(&folder, e));
                bar.inc(1);
                continue;
            }
            next_index += 1;

            let moved = self.move_group(group, &folder, &journal, &mut report.errors)?;
            report.images_moved += moved.len();
            report.groups.push(MaterializedGroup {
                ordinal: group.ordinal,
                folder,
                moved,
            });
            bar.inc(1);
        }
        Ok(report)
    }

    /// Move each member's image and thumbnail into `folder` as one journaled
    /// operation. Returns the source images that were moved.
    fn move_group(
        &self,
        group: &Group,
        folder: &Path,
        journal: &MoveJournal,
        errors: &mut Vec<ItemError>,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        let folder_name = folder
            .file_name()
            .unwrap_or_default()
            .to_string_lossy()
            .into_owned();
        let planned = group
            .members
            .iter()
            .flat_map(|m| [file_name(&m.source_path), file_name(&m.thumbnail_path)])
            .collect();
        let mut op = journal.begin(&folder_name, planned)?;
        let mut moved = Vec::new();

        for member in &group.members {
            let image_name = file_name(&member.source_path);
            let thumb_name = file_name(&member.thumbnail_path);

            if let Err(e) = move_file(&member.source_path, &folder.join(&image_name)) {
                log::warn!("{}", e);
                op.record_failed(image_name);
                errors.push(e);
                continue;
            }
            op.record_moved(image_name);

            let thumb_dest = folder.join(&thumb_name);
            match move_file(&member.thumbnail_path, &thumb_dest) {
                Ok(()) => {
                    hide_or_warn(self.hider, &thumb_dest);
                    op.record_moved(thumb_name);
                }
                Err(e) => {
                    log::warn!("{}", e);
                    op.record_failed(thumb_name);
                    errors.push(e);
                }
            }
            log::debug!(
                "Moved {} and its thumbnail to {}",
                member.source_path.display(),
                folder.display()
            );
            moved.push(member.source_path.clone());
        }

        op.finish()?;
        log::info!("📦 {} ← {} file(s)", folder.display(), moved.len());
        Ok(moved)
    }
}

/// Highest `n` among existing `group_<n>` folders, or 0.
pub fn highest_group_index(output_root: &Path) -> usize {
    let Ok(entries) = fs::read_dir(output_root) else {
        return 0;
    };
    entries
        .filter_map(Result::ok)
        .filter(|e| e.path().is_dir())
        .filter_map(|e| parse_group_folder(&e.file_name().to_string_lossy()))
        .max()
        .unwrap_or(0)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned()
}
