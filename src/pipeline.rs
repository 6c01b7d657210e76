use rayon::ThreadPool;
use serde::Serialize;

use crate::cluster::{ClusteringEngine, Group};
use crate::config::Config;
use crate::error::{ItemError, ItemErrorReport, PipelineError};
use crate::hide::FileHider;
use crate::materialize::{GroupMaterializer, MaterializeReport};
use crate::progress::{benchmark, stage_bar};
use crate::reconcile::{ReconcileReport, ReconciliationPass};
use crate::scoring::{SimilarityScorer, WithScorer, with_configured_scorer};
use crate::thumbnail::{CacheOutcome, PruneReport, ThumbnailCache, ThumbnailRecord};

/// Final report of a grouping run.
#[derive(Debug, Default, Serialize)]
pub struct RunSummary {
    pub dry_run: bool,
    pub images_found: usize,
    pub thumbnails_created: usize,
    pub thumbnails_cached: usize,
    pub groups_formed: usize,
    pub singletons: usize,
    pub images_moved: usize,
    pub items_skipped: usize,
    pub items_errored: usize,
    pub group_folders: Vec<String>,
    pub errors: Vec<ItemErrorReport>,
}

#[derive(Debug, Default, Serialize)]
pub struct ReconcileSummary {
    pub folders_removed: usize,
    pub folders_kept: Vec<String>,
    pub files_restored: usize,
    pub orphans_deleted: Vec<String>,
    pub missing_thumbnails: Vec<String>,
    pub interrupted_groups: Vec<String>,
    pub errors: Vec<ItemErrorReport>,
}

impl From<&ReconcileReport> for ReconcileSummary {
    fn from(report: &ReconcileReport) -> Self {
        let lossy = |paths: &[std::path::PathBuf]| -> Vec<String> {
            paths
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect()
        };
        Self {
            folders_removed: report.folders_removed.len(),
            folders_kept: lossy(&report.folders_kept),
            files_restored: report.files_restored,
            orphans_deleted: lossy(&report.orphans_deleted),
            missing_thumbnails: lossy(&report.missing_thumbnails),
            interrupted_groups: report.interrupted_groups.clone(),
            errors: report.errors.iter().map(ItemError::to_report).collect(),
        }
    }
}

/// Drives the stages from a single thread, handing CPU-bound work to a
/// bounded worker pool.
pub struct Pipeline<'a> {
    config: &'a Config,
    hider: &'a dyn FileHider,
    pool: ThreadPool,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a Config, hider: &'a dyn FileHider) -> Result<Self, PipelineError> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.workers)
            .thread_name(|i| format!("burstsort-worker-{i}"))
            .build()?;
        Ok(Self {
            config,
            hider,
            pool,
        })
    }

    pub fn build_thumbnails(&self) -> Result<CacheOutcome, PipelineError> {
        let cache = ThumbnailCache::new(self.config, self.hider);
        let bar = stage_bar(0, "Thumbnails", self.config.progress);
        let outcome = benchmark("thumbnailing", || {
            cache.ensure_all(&self.config.source_dir, &self.pool, &bar)
        })?;
        bar.finish_and_clear();
        log::info!(
            "Loaded {} thumbnails from {} ({} created, {} cached, {} skipped)",
            outcome.records.len(),
            self.config.source_dir.display(),
            outcome.created,
            outcome.cached,
            outcome.errors.len()
        );
        Ok(outcome)
    }

    /// Cluster with the scorer named in the configuration.
    pub fn cluster(&self, records: Vec<ThumbnailRecord>) -> Vec<Group> {
        with_configured_scorer(self.config, ClusterJob {
            pipeline: self,
            records,
        })
    }

    pub fn cluster_with<S: SimilarityScorer>(
        &self,
        scorer: &S,
        records: Vec<ThumbnailRecord>,
    ) -> Vec<Group> {
        let engine = ClusteringEngine::new(scorer, self.config.threshold, &self.pool);
        let bar = stage_bar(records.len(), "Grouping", self.config.progress);
        let groups = benchmark("grouping", || engine.cluster(records, &bar));
        bar.finish_and_clear();
        groups
    }

    pub fn materialize(
        &self,
        groups: &[Group],
        dry_run: bool,
    ) -> Result<MaterializeReport, PipelineError> {
        let bar = stage_bar(0, "Moving", self.config.progress);
        let report = GroupMaterializer::new(self.config, self.hider)
            .dry_run(dry_run)
            .materialize(groups, &bar)?;
        bar.finish_and_clear();
        Ok(report)
    }

    /// Thumbnail, cluster and materialize with the configured scorer.
    pub fn group(&self, dry_run: bool) -> Result<RunSummary, PipelineError> {
        let outcome = self.build_thumbnails()?;
        let found = outcome.records.len() + outcome.errors.len();
        let groups = self.cluster(outcome.records);
        self.finish_grouping(found, outcome.created, outcome.cached, outcome.errors, groups, dry_run)
    }

    /// [`Pipeline::group`] with an explicit scorer.
    pub fn group_with<S: SimilarityScorer>(
        &self,
        scorer: &S,
        dry_run: bool,
    ) -> Result<RunSummary, PipelineError> {
        let outcome = self.build_thumbnails()?;
        let found = outcome.records.len() + outcome.errors.len();
        let groups = self.cluster_with(scorer, outcome.records);
        self.finish_grouping(found, outcome.created, outcome.cached, outcome.errors, groups, dry_run)
    }

    fn finish_grouping(
        &self,
        images_found: usize,
        thumbnails_created: usize,
        thumbnails_cached: usize,
        cache_errors: Vec<ItemError>,
        groups: Vec<Group>,
        dry_run: bool,
    ) -> Result<RunSummary, PipelineError> {
        for group in groups.iter().filter(|g| !g.is_singleton()) {
            log::info!("Group {}:", group.ordinal);
            for (j, member) in group.members.iter().enumerate() {
                log::info!("  {}: {}", j, member.file_name());
            }
        }

        let report = self.materialize(&groups, dry_run)?;
        let items_skipped = cache_errors.len();
        let errors: Vec<ItemErrorReport> = cache_errors
            .iter()
            .chain(report.errors.iter())
            .map(ItemError::to_report)
            .collect();

        Ok(RunSummary {
            dry_run,
            images_found,
            thumbnails_created,
            thumbnails_cached,
            groups_formed: report.groups.len(),
            singletons: report.singletons,
            images_moved: report.images_moved,
            items_skipped,
            items_errored: report.errors.len(),
            group_folders: report
                .groups
                .iter()
                .map(|g| g.folder.to_string_lossy().into_owned())
                .collect(),
            errors,
        })
    }

    pub fn reconcile(&self) -> Result<ReconcileReport, PipelineError> {
        let bar = stage_bar(0, "Restoring", self.config.progress);
        let report = ReconciliationPass::new(self.config, self.hider).run(&bar)?;
        bar.finish_and_clear();
        Ok(report)
    }

    pub fn prune(&self) -> Result<PruneReport, PipelineError> {
        ThumbnailCache::new(self.config, self.hider).prune_orphans(&self.config.source_dir)
    }
}

struct ClusterJob<'p, 'a> {
    pipeline: &'p Pipeline<'a>,
    records: Vec<ThumbnailRecord>,
}

impl WithScorer for ClusterJob<'_, '_> {
    type Output = Vec<Group>;

    fn run<S: SimilarityScorer>(self, scorer: &S) -> Vec<Group> {
        self.pipeline.cluster_with(scorer, self.records)
    }
}
