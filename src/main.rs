use anyhow::{Context, Result};
use burstsort::config::{BlurConfig, PartialConfig, ScorerKind, default_config_path};
use burstsort::{Config, Pipeline, ReconcileSummary, RunSummary, platform_hider};
use clap::{Args, Parser, Subcommand};
use dialoguer::Confirm;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(
    name = "burstsort",
    version,
    about = "Group near-duplicate photos into folders and back"
)]
struct Cli {
    /// JSON config file (default: `<config dir>/burstsort/config.json` if present)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Hide progress bars
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Print the final summary as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Cache thumbnails, cluster, and move groups into `group_<n>` folders
    Group {
        #[command(flatten)]
        opts: RunArgs,
        /// Only show what would be moved
        #[arg(long)]
        dry_run: bool,
    },

    /// Move everything in group folders back to the source directory
    Reconcile {
        #[command(flatten)]
        opts: RunArgs,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Only build the thumbnail cache
    Thumbs {
        #[command(flatten)]
        opts: RunArgs,
    },

    /// Delete cached thumbnails whose source image is gone
    Prune {
        #[command(flatten)]
        opts: RunArgs,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Directory of photos
    #[arg(short, long, value_name = "DIR")]
    source: Option<PathBuf>,

    /// Where group folders go (default: `<source>/Grouped`)
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Thumbnail size as WIDTHxHEIGHT
    #[arg(long, value_name = "WxH", value_parser = parse_size)]
    thumb_size: Option<(u32, u32)>,

    /// File name suffix of cached thumbnails
    #[arg(long, value_name = "SUFFIX")]
    thumb_suffix: Option<String>,

    /// Minimum score (exclusive) to join a group
    #[arg(short, long)]
    threshold: Option<f64>,

    /// Worker threads for thumbnailing and scoring
    #[arg(short, long)]
    workers: Option<usize>,

    /// Similarity strategy
    #[arg(long, value_enum)]
    scorer: Option<ScorerKind>,

    /// Smooth thumbnails before scoring
    #[arg(long)]
    blur: bool,

    /// Odd Gaussian kernel size; implies --blur
    #[arg(long, value_name = "N")]
    blur_kernel: Option<u32>,
}

impl RunArgs {
    fn to_layer(&self, quiet: bool) -> PartialConfig {
        let blur = (self.blur || self.blur_kernel.is_some()).then(|| BlurConfig {
            enabled: true,
            kernel_size: self.blur_kernel.unwrap_or(BlurConfig::default().kernel_size),
        });
        PartialConfig {
            source_dir: self.source.clone(),
            output_dir: self.output.clone(),
            thumbnail_size: self.thumb_size,
            thumbnail_suffix: self.thumb_suffix.clone(),
            thumbnail_quality: None,
            threshold: self.threshold,
            workers: self.workers,
            scorer: self.scorer,
            blur,
            progress: quiet.then_some(false),
        }
    }
}

fn parse_size(raw: &str) -> Result<(u32, u32), String> {
    let (w, h) = raw
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got {raw:?}"))?;
    let w = w.trim().parse().map_err(|e| format!("bad width: {e}"))?;
    let h = h.trim().parse().map_err(|e| format!("bad height: {e}"))?;
    Ok((w, h))
}

fn load_config(cli: &Cli, opts: &RunArgs) -> Result<Config> {
    let file_layer = match &cli.config {
        Some(path) => PartialConfig::from_file(path)?,
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => {
                log::debug!("Using config file {}", path.display());
                PartialConfig::from_file(&path)?
            }
            None => PartialConfig::default(),
        },
    };
    let config = file_layer
        .merge(opts.to_layer(cli.quiet))
        .resolve()
        .context("Invalid configuration")?;
    Ok(config)
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();

    let hider = platform_hider();

    match &cli.command {
        Commands::Group { opts, dry_run } => {
            let config = load_config(&cli, opts)?;
            log::info!("▶ Grouping similar photos in: {}", config.source_dir.display());
            let pipeline = Pipeline::new(&config, hider.as_ref())?;
            let summary = pipeline.group(*dry_run)?;

            print!("{}", group_report(&summary, cli.json)?);
            if !cli.json {
                for err in &summary.errors {
                    eprintln!("⚠️  {}", err.message);
                }
            }
            Ok(exit_code(summary.items_errored))
        }

        Commands::Reconcile { opts, yes } => {
            let config = load_config(&cli, opts)?;
            let pipeline = Pipeline::new(&config, hider.as_ref())?;

            if !*yes {
                let proceed = Confirm::new()
                    .with_prompt(format!(
                        "Move everything in {} back to {}?",
                        config.output_dir.display(),
                        config.source_dir.display()
                    ))
                    .default(false)
                    .interact()
                    .context("Could not read confirmation; pass --yes to skip it")?;
                if !proceed {
                    println!("Aborted.");
                    return Ok(ExitCode::SUCCESS);
                }
            }

            let report = pipeline.reconcile()?;
            let summary = ReconcileSummary::from(&report);
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!(
                    "🔄 Restored {} file(s) from {} folder(s)",
                    summary.files_restored, summary.folders_removed
                );
                println!("🧹 Deleted {} orphaned thumbnail(s)", summary.orphans_deleted.len());
                for path in &summary.missing_thumbnails {
                    println!("   ⚠️  missing thumbnail: {}", path);
                }
                for folder in &summary.interrupted_groups {
                    println!("   🩹 repaired interrupted {}", folder);
                }
                for folder in &summary.folders_kept {
                    eprintln!("⚠️  {} could not be emptied", folder);
                }
                for err in &summary.errors {
                    eprintln!("⚠️  {}", err.message);
                }
            }
            Ok(exit_code(summary.errors.len()))
        }

        Commands::Thumbs { opts } => {
            let config = load_config(&cli, opts)?;
            let pipeline = Pipeline::new(&config, hider.as_ref())?;
            let outcome = pipeline.build_thumbnails()?;
            println!(
                "🖼  {} thumbnail(s): {} created, {} cached, {} skipped",
                outcome.records.len(),
                outcome.created,
                outcome.cached,
                outcome.errors.len()
            );
            for err in &outcome.errors {
                eprintln!("⚠️  {}", err);
            }
            Ok(ExitCode::SUCCESS)
        }

        Commands::Prune { opts } => {
            let config = load_config(&cli, opts)?;
            let pipeline = Pipeline::new(&config, hider.as_ref())?;
            let report = pipeline.prune()?;
            println!("🧹 Deleted {} orphaned thumbnail(s)", report.deleted.len());
            for err in &report.errors {
                eprintln!("⚠️  {}", err);
            }
            Ok(exit_code(report.errors.len()))
        }
    }
}

/// Everything `group` prints to stdout. With `json` this is the summary
/// document alone.
fn group_report(summary: &RunSummary, json: bool) -> Result<String> {
    if json {
        return Ok(format!("{}\n", serde_json::to_string_pretty(summary)?));
    }
    let mut out = format!(
        "\n✨ {} image(s): {} group(s) formed, {} singleton(s) left in place\n",
        summary.images_found, summary.groups_formed, summary.singletons
    );
    for folder in &summary.group_folders {
        out.push_str(&format!("   📁 {folder}\n"));
    }
    out.push_str(&format!(
        "   🖼  thumbnails: {} created, {} cached\n",
        summary.thumbnails_created, summary.thumbnails_cached
    ));
    out.push_str(&format!(
        "   📦 {} image(s) moved, {} skipped, {} errored\n",
        summary.images_moved, summary.items_skipped, summary.items_errored
    ));
    if summary.dry_run {
        out.push_str("\n⚠️  Dry-run only; no files were changed.\n");
    }
    Ok(out)
}

fn exit_code(errors: usize) -> ExitCode {
    if errors == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    }
}
