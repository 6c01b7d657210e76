//! Groups near-duplicate photos of a flat directory into `group_<n>` folders
//! and moves them back out again.
//!
//! The pipeline runs in stages: [`thumbnail`] caches a small rendition of
//! every image, [`cluster`] groups them with a [`scoring`] strategy,
//! [`materialize`] moves multi-member groups into folders, and [`reconcile`]
//! undoes that move.

pub mod cluster;
pub mod config;
pub mod error;
pub mod fsops;
pub mod hide;
pub mod journal;
pub mod materialize;
pub mod pipeline;
pub mod progress;
pub mod reconcile;
pub mod scoring;
pub mod thumbnail;

pub use cluster::{ClusteringEngine, Group};
pub use config::{BlurConfig, Config, ConfigError, PartialConfig, ScorerKind};
pub use error::{ItemError, PipelineError};
pub use hide::{FileHider, NoopHider, platform_hider};
pub use materialize::GroupMaterializer;
pub use pipeline::{Pipeline, ReconcileSummary, RunSummary};
pub use reconcile::ReconciliationPass;
pub use scoring::SimilarityScorer;
pub use thumbnail::{ThumbnailCache, ThumbnailRecord};
