//! bitmap-reconcile CLI tool
//!
//! Command-line interface for registry comparison, conflict resolution and
//! duplicate cleanup.
//!
//! Exit codes: 0 when nothing needs attention, 1 when differences, conflicts
//! or duplicates were found, 2 on a fatal error.

use anyhow::{Context, Result};
use bitmap_reconcile::batch::{format_batch_report, BatchReconciler};
use bitmap_reconcile::config::{
    PartitionScheme, PipelineConfig, ProviderConfig, ReconcileConfig, RegistryLocation,
    ResolverConfig, DEFAULT_PARTITION_SIZE, DEFAULT_PARTITION_TEMPLATE,
};
use bitmap_reconcile::diff::{diff, format_diff_report};
use bitmap_reconcile::duplicates::{
    compete, load_authoritative_index, validate, CompetitionReport, Remover, ValidationReport,
};
use bitmap_reconcile::inscription::OrdClient;
use bitmap_reconcile::ledger::ChainLedger;
use bitmap_reconcile::logging;
use bitmap_reconcile::provider::ProviderRouter;
use bitmap_reconcile::registry::{open_source, KeyedDataset};
use bitmap_reconcile::report::{
    read_json, timestamped_path, write_atomic, write_json, write_verdict_text, VerdictReport,
};
use bitmap_reconcile::resolver::{Conflict, FifResolver, Winner};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "bitmap-reconcile")]
#[command(about = "Bitmap registry reconciliation and First-is-First conflict resolution")]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ProviderArgs {
    /// JSON provider list; defaults to mempool, blockstream, blockchain.info
    #[arg(long, env = "BITMAP_PROVIDERS")]
    providers: Option<PathBuf>,
    /// ord server used for sat and content lookups
    #[arg(long, env = "BITMAP_ORD_URL", default_value = "https://ordinals.com")]
    ord_url: String,
    /// Pause between successive resolutions, in milliseconds
    #[arg(long, default_value_t = 100)]
    resolution_spacing_ms: u64,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare two partition files
    Diff {
        file_a: PathBuf,
        file_b: PathBuf,
        #[arg(long, default_value = "A")]
        label_a: String,
        #[arg(long, default_value = "B")]
        label_b: String,
        /// Also write the full report as JSON
        #[arg(long)]
        json: Option<PathBuf>,
    },
    /// Compare two registries file by file
    Batch {
        /// Registry A: a directory or a listing URL
        #[arg(long, env = "BITMAP_SOURCE_A")]
        source_a: String,
        /// Registry B: a directory or a listing URL
        #[arg(long, env = "BITMAP_SOURCE_B")]
        source_b: String,
        #[arg(long, default_value = "A")]
        label_a: String,
        #[arg(long, default_value = "B")]
        label_b: String,
        /// Filename glob shared by both registries
        #[arg(long, default_value = "*.json")]
        pattern: String,
        #[arg(long, default_value_t = DEFAULT_PARTITION_SIZE)]
        partition_size: u64,
        #[arg(long, default_value = DEFAULT_PARTITION_TEMPLATE)]
        partition_template: String,
        #[arg(long, env = "BITMAP_REPORT_DIR", default_value = "reports")]
        report_dir: PathBuf,
        /// Resolve the block conflicts found
        #[arg(long)]
        resolve: bool,
        #[command(flatten)]
        provider: ProviderArgs,
    },
    /// Resolve conflicts listed in a JSON file
    Resolve {
        /// JSON array of conflicts, as written by `batch`
        conflicts: PathBuf,
        #[arg(long, default_value = "A")]
        label_a: String,
        #[arg(long, default_value = "B")]
        label_b: String,
        #[arg(long, env = "BITMAP_REPORT_DIR", default_value = "reports")]
        report_dir: PathBuf,
        #[command(flatten)]
        provider: ProviderArgs,
    },
    /// Find duplicate blocks and sats in a registry
    Validate {
        #[command(flatten)]
        registry: RegistryArgs,
    },
    /// Pick winners among duplicate blocks
    Compete {
        /// Validation report written by `validate`
        validation: PathBuf,
        /// Authoritative block → sat index
        #[arg(long, env = "BITMAP_INDEX")]
        index: PathBuf,
        #[arg(long, env = "BITMAP_REPORT_DIR", default_value = "reports")]
        report_dir: PathBuf,
    },
    /// Remove losing duplicates from a registry
    Remove {
        /// Competition report written by `compete`
        competition: PathBuf,
        #[command(flatten)]
        registry: RegistryArgs,
        /// Report what would be removed without rewriting files
        #[arg(long)]
        dry_run: bool,
    },
    /// Validate, compete and remove in one run
    Dedupe {
        #[command(flatten)]
        registry: RegistryArgs,
        /// Authoritative block → sat index
        #[arg(long, env = "BITMAP_INDEX")]
        index: PathBuf,
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Args)]
struct RegistryArgs {
    /// Registry directory
    #[arg(long, env = "BITMAP_REGISTRY_DIR")]
    registry_dir: PathBuf,
    #[arg(long, default_value = "*.json")]
    pattern: String,
    /// First block of the expected range (default 0)
    #[arg(long)]
    expected_start: Option<u64>,
    /// Last block of the expected range (default: highest observed)
    #[arg(long)]
    expected_end: Option<u64>,
    #[arg(long, env = "BITMAP_REPORT_DIR", default_value = "reports")]
    report_dir: PathBuf,
}

impl RegistryArgs {
    fn config(&self, dry_run: bool) -> PipelineConfig {
        let mut config = PipelineConfig::new(&self.registry_dir);
        config.pattern = self.pattern.clone();
        config.report_dir = self.report_dir.clone();
        config.dry_run = dry_run;
        config.expected_start = self.expected_start;
        config.expected_end = self.expected_end;
        config
    }
}

/// Whether a run found something that needs attention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Clean,
    Differences,
}

impl Outcome {
    fn from_flag(found: bool) -> Self {
        if found {
            Outcome::Differences
        } else {
            Outcome::Clean
        }
    }
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logging::init(cli.verbose, cli.quiet);

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: failed to start runtime: {}", err);
            return ExitCode::from(2);
        }
    };

    match runtime.block_on(run(cli.command)) {
        Ok(Outcome::Clean) => ExitCode::SUCCESS,
        Ok(Outcome::Differences) => ExitCode::from(1),
        Err(err) => {
            eprintln!("Error: {:#}", err);
            ExitCode::from(2)
        }
    }
}

async fn run(command: Commands) -> Result<Outcome> {
    match command {
        Commands::Diff {
            file_a,
            file_b,
            label_a,
            label_b,
            json,
        } => run_diff(&file_a, &file_b, &label_a, &label_b, json.as_deref()),
        Commands::Batch {
            source_a,
            source_b,
            label_a,
            label_b,
            pattern,
            partition_size,
            partition_template,
            report_dir,
            resolve,
            provider,
        } => {
            let source_a: RegistryLocation = source_a.parse()?;
            let source_b: RegistryLocation = source_b.parse()?;
            let mut config = ReconcileConfig::new(source_a, source_b);
            config.label_a = label_a;
            config.label_b = label_b;
            config.pattern = pattern;
            config.partition = PartitionScheme {
                size: partition_size,
                template: partition_template,
            };
            config.report_dir = report_dir;
            run_batch(config, resolve.then_some(provider)).await
        }
        Commands::Resolve {
            conflicts,
            label_a,
            label_b,
            report_dir,
            provider,
        } => {
            let conflicts: Vec<Conflict> = read_json(&conflicts)?;
            run_resolve(&conflicts, &label_a, &label_b, &report_dir, &provider).await
        }
        Commands::Validate { registry } => {
            let config = registry.config(false);
            let report = run_validate(&config)?;
            Ok(Outcome::from_flag(report.has_issues()))
        }
        Commands::Compete {
            validation,
            index,
            report_dir,
        } => {
            let validation: ValidationReport = read_json(&validation)?;
            let report = run_compete(&validation, &index, &report_dir)?;
            Ok(Outcome::from_flag(!report.unresolved.is_empty()))
        }
        Commands::Remove {
            competition,
            registry,
            dry_run,
        } => {
            let competition: CompetitionReport = read_json(&competition)?;
            run_remove(&competition, &registry.config(dry_run))
        }
        Commands::Dedupe {
            registry,
            index,
            dry_run,
        } => {
            let config = registry.config(dry_run);
            let validation = run_validate(&config)?;
            let competition = run_compete(&validation, &index, &config.report_dir)?;
            let removal = run_remove(&competition, &config)?;
            Ok(if validation.has_issues() { Outcome::Differences } else { removal })
        }
    }
}

fn load_dataset(path: &Path, label: &str) -> Result<KeyedDataset> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read registry file: {}", path.display()))?;
    let source_id = path.display().to_string();
    let (dataset, skipped) = KeyedDataset::from_json(label, &source_id, &text)?;
    for err in &skipped {
        tracing::warn!("{}", err);
    }
    Ok(dataset)
}

fn run_diff(
    file_a: &Path,
    file_b: &Path,
    label_a: &str,
    label_b: &str,
    json: Option<&Path>,
) -> Result<Outcome> {
    let a = load_dataset(file_a, label_a)?;
    let b = load_dataset(file_b, label_b)?;
    let report = diff(&a, &b);
    print!("{}", format_diff_report(&report, label_a, label_b));
    if let Some(path) = json {
        write_json(path, &report)?;
        println!("Report written to {}", path.display());
    }
    Ok(Outcome::from_flag(report.stats.has_differences()))
}

async fn run_batch(config: ReconcileConfig, resolve: Option<ProviderArgs>) -> Result<Outcome> {
    let a = open_source(&config.source_a, &config.label_a, config.fetch_timeout)?;
    let b = open_source(&config.source_b, &config.label_b, config.fetch_timeout)?;
    let report_dir = config.report_dir.clone();
    let (label_a, label_b) = (config.label_a.clone(), config.label_b.clone());

    let report = BatchReconciler::new(a, b, config).run().await?;
    print!("{}", format_batch_report(&report));

    let report_path = timestamped_path(&report_dir, "batch", "json");
    write_json(&report_path, &report)?;
    println!("Report written to {}", report_path.display());

    let conflicts = report.conflicts();
    if !conflicts.is_empty() {
        let conflicts_path = timestamped_path(&report_dir, "conflicts", "json");
        write_json(&conflicts_path, &conflicts)?;
        println!("Conflicts written to {}", conflicts_path.display());
    }

    if let Some(provider) = resolve {
        if !conflicts.is_empty() {
            run_resolve(&conflicts, &label_a, &label_b, &report_dir, &provider).await?;
        }
    }
    Ok(Outcome::from_flag(report.has_differences()))
}

async fn run_resolve(
    conflicts: &[Conflict],
    label_a: &str,
    label_b: &str,
    report_dir: &Path,
    args: &ProviderArgs,
) -> Result<Outcome> {
    let provider_config = match &args.providers {
        Some(path) => ProviderConfig::load(path)?,
        None => ProviderConfig::default(),
    };
    let resolver_config = ResolverConfig {
        ord_url: args.ord_url.clone(),
        resolution_spacing: Duration::from_millis(args.resolution_spacing_ms),
        ..ResolverConfig::default()
    };

    let ledger = ChainLedger::new(ProviderRouter::new(&provider_config)?);
    let ord = OrdClient::new(
        &resolver_config.ord_url,
        &provider_config,
        resolver_config.max_sat_pages,
    )?;
    let mut resolver = FifResolver::new(ledger, ord, resolver_config);

    tracing::info!(conflicts = conflicts.len(), "resolving block conflicts");
    let verdicts = resolver.resolve_all(conflicts).await;
    let report = VerdictReport::new(label_a, label_b, verdicts);

    let mut text = Vec::new();
    write_verdict_text(&mut text, &report).context("Failed to render verdict report")?;
    let text_path = timestamped_path(report_dir, "verdicts", "txt");
    write_atomic(&text_path, &text)?;
    let json_path = timestamped_path(report_dir, "verdicts", "json");
    write_json(&json_path, &report)?;

    print!("{}", String::from_utf8_lossy(&text));
    println!("Verdicts written to {} and {}", text_path.display(), json_path.display());

    let undecided = report
        .verdicts
        .iter()
        .any(|v| matches!(v.winner, Winner::Unknown | Winner::Neither));
    Ok(Outcome::from_flag(!conflicts.is_empty() || undecided))
}

fn run_validate(config: &PipelineConfig) -> Result<ValidationReport> {
    let report = validate(config)?;
    let path = timestamped_path(&config.report_dir, "validation", "json");
    write_json(&path, &report)?;
    println!(
        "Validated {} files ({} records): {} duplicate blocks, {} duplicate sats, {} invalid records, {} missing blocks",
        report.files_scanned,
        report.total_records,
        report.duplicate_blocks.len(),
        report.duplicate_sats.len(),
        report.invalid_records.len(),
        report.missing_blocks.len()
    );
    println!("Report written to {}", path.display());
    Ok(report)
}

fn run_compete(
    validation: &ValidationReport,
    index: &Path,
    report_dir: &Path,
) -> Result<CompetitionReport> {
    let index = load_authoritative_index(index)?;
    let report = compete(validation, &index);
    let path = timestamped_path(report_dir, "competition", "json");
    write_json(&path, &report)?;
    println!(
        "Competition: {} winners, {} losers, {} unresolved",
        report.winners.len(),
        report.losers.len(),
        report.unresolved.len()
    );
    for unresolved in &report.unresolved {
        println!("  unresolved block {}: {}", unresolved.block, unresolved.reason);
    }
    println!("Report written to {}", path.display());
    Ok(report)
}

fn run_remove(competition: &CompetitionReport, config: &PipelineConfig) -> Result<Outcome> {
    let report = Remover::new(config).remove(&competition.losers)?;
    let path = timestamped_path(&config.report_dir, "removal", "json");
    write_json(&path, &report)?;
    println!(
        "{}{} removed, {} failed, {} not found",
        if report.dry_run { "[dry run] " } else { "" },
        report.removed.len(),
        report.failed.len(),
        report.not_found.len()
    );
    for failed in &report.failed {
        println!(
            "  failed block {} in {}: {}",
            failed.loser.block, failed.loser.file, failed.reason
        );
    }
    println!("Report written to {}", path.display());
    Ok(Outcome::from_flag(!report.failed.is_empty()))
}
