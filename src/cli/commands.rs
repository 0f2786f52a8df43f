//! Command implementations for the segmerge CLI.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, anyhow, bail};
use serde::Deserialize;

use crate::catalog::Catalog;
use crate::cli::args::*;
use crate::cli::output::*;
use crate::config::{MergeConfig, MergePolicyConfig, ThrottlePolicy};
use crate::maintenance::IndexMaintainer;
use crate::merge::coordinator::scheduled_delay;
use crate::merge::policy::TieredMergePolicy;
use crate::segment::SegmentId;
use crate::segment::builder::{DocumentInput, SegmentBuilder};
use crate::segment::reader::scan_segment;
use crate::storage::Storage;
use crate::storage::file::{FileStorage, FileStorageConfig};

/// One line of an ingest file.
#[derive(Debug, Deserialize)]
struct IngestRecord {
    body: String,
    #[serde(default)]
    tokens: Vec<String>,
    #[serde(default)]
    terms: BTreeMap<String, Vec<u32>>,
    #[serde(default)]
    sort_keys: BTreeMap<String, i64>,
}

impl From<IngestRecord> for DocumentInput {
    fn from(record: IngestRecord) -> Self {
        let mut document = DocumentInput::new(record.body).with_tokens(&record.tokens);
        for (term, positions) in &record.terms {
            document = document.with_term(term.as_str(), positions);
        }
        for (field, key) in record.sort_keys {
            document = document.with_sort_key(field, key);
        }
        document
    }
}

/// Execute a CLI command.
pub fn execute_command(args: SegmergeArgs) -> Result<()> {
    match &args.command {
        Command::Init(init_args) => init_index(init_args, &args),
        Command::Ingest(ingest_args) => ingest_documents(ingest_args, &args),
        Command::Delete(delete_args) => delete_documents(delete_args, &args),
        Command::List => list_segments(&args),
        Command::Inspect(inspect_args) => inspect_segment(inspect_args, &args),
        Command::Plan(plan_args) => plan_merges(plan_args, &args),
        Command::Merge(merge_args) => merge_segments(merge_args, &args),
        Command::Purge => purge_segments(&args),
    }
}

fn open_storage(index: &Path) -> Result<Arc<dyn Storage>> {
    let storage = FileStorage::new(index, FileStorageConfig::new(index))
        .with_context(|| format!("cannot open index directory {}", index.display()))?;
    Ok(Arc::new(storage))
}

fn open_catalog(index: &Path) -> Result<Arc<Catalog>> {
    if !index.is_dir() {
        bail!("index directory {} does not exist", index.display());
    }
    let catalog = Catalog::open(open_storage(index)?)
        .with_context(|| format!("cannot open catalog in {}", index.display()))?;
    Ok(Arc::new(catalog))
}

fn parse_segment(text: &str) -> Result<SegmentId> {
    SegmentId::parse(text).ok_or_else(|| anyhow!("invalid segment id '{text}'"))
}

fn load_merge_config(path: Option<&Path>) -> Result<MergeConfig> {
    match path {
        Some(path) => MergeConfig::from_json_file(path)
            .with_context(|| format!("invalid merge configuration {}", path.display())),
        None => Ok(MergeConfig::default()),
    }
}

fn load_policy_config(path: Option<&Path>) -> Result<MergePolicyConfig> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            let config: MergePolicyConfig = serde_json::from_str(&text)
                .with_context(|| format!("invalid merge policy {}", path.display()))?;
            config.validate()?;
            Ok(config)
        }
        None => Ok(MergePolicyConfig::default()),
    }
}

/// Create an empty index.
fn init_index(args: &InitArgs, cli_args: &SegmergeArgs) -> Result<()> {
    let storage = open_storage(&cli_args.index)?;
    let catalog = Catalog::create(storage, args.sort_fields.clone())
        .with_context(|| format!("cannot create index in {}", cli_args.index.display()))?;

    output_result(
        "Index created",
        &InitResult {
            path: cli_args.index.display().to_string(),
            catalog_version: catalog.version(),
            sort_fields: catalog.sort_fields(),
        },
        cli_args,
    )?;
    Ok(())
}

/// Seal a JSONL file into one new segment.
fn ingest_documents(args: &IngestArgs, cli_args: &SegmergeArgs) -> Result<()> {
    let catalog = open_catalog(&cli_args.index)?;
    let started = Instant::now();

    let file = File::open(&args.document_file)
        .with_context(|| format!("cannot open {}", args.document_file.display()))?;
    let mut builder = SegmentBuilder::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.with_context(|| format!("cannot read line {}", number + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        let record: IngestRecord = serde_json::from_str(&line)
            .with_context(|| format!("invalid document on line {}", number + 1))?;
        builder.add_document(record.into());
    }
    if builder.is_empty() {
        bail!("{} contains no documents", args.document_file.display());
    }

    let config = MergeConfig {
        skip_interval: args.skip_interval,
        ..Default::default()
    };
    let maintainer = IndexMaintainer::new(catalog, config, MergePolicyConfig::default())?;
    let segment = maintainer
        .add_segment(builder)
        .context("cannot write segment")?;

    output_result(
        "Segment added",
        &IngestResult {
            segment,
            duration_ms: started.elapsed().as_millis() as u64,
        },
        cli_args,
    )?;
    Ok(())
}

/// Mark documents as deleted.
fn delete_documents(args: &DeleteArgs, cli_args: &SegmergeArgs) -> Result<()> {
    let catalog = open_catalog(&cli_args.index)?;
    let id = parse_segment(&args.segment)?;
    let newly_deleted = catalog
        .delete_documents(id, &args.doc_ids)
        .with_context(|| format!("cannot delete documents from {id}"))?;
    let meta = catalog
        .segment(id)
        .ok_or_else(|| anyhow!("{id} disappeared from the catalog"))?;

    output_result(
        "Documents deleted",
        &DeleteResult {
            segment: id,
            newly_deleted,
            deleted_count: meta.deleted_count,
            live_doc_count: meta.live_doc_count(),
        },
        cli_args,
    )?;
    Ok(())
}

/// List segments.
fn list_segments(cli_args: &SegmergeArgs) -> Result<()> {
    let catalog = open_catalog(&cli_args.index)?;
    output_segments(
        &ListResult {
            catalog: catalog.snapshot(),
            pending_deletions: catalog.pending_deletions(),
        },
        cli_args,
    )?;
    Ok(())
}

/// Fully decode one segment.
fn inspect_segment(args: &InspectArgs, cli_args: &SegmergeArgs) -> Result<()> {
    let catalog = open_catalog(&cli_args.index)?;
    let id = parse_segment(&args.segment)?;
    let segment = catalog
        .segment(id)
        .ok_or_else(|| anyhow!("{id} is not in the catalog"))?;
    let summary = scan_segment(catalog.storage().as_ref(), &segment)
        .with_context(|| format!("{id} failed validation"))?;

    output_result("Segment is valid", &InspectResult { segment, summary }, cli_args)?;
    Ok(())
}

/// Show policy candidates.
fn plan_merges(args: &PlanArgs, cli_args: &SegmergeArgs) -> Result<()> {
    let catalog = open_catalog(&cli_args.index)?;
    let policy = TieredMergePolicy::new(load_policy_config(args.policy.as_deref())?)?;
    let config = load_merge_config(args.config.as_deref())?;
    let snapshot = catalog.snapshot();
    let candidates = policy.find_merges(&snapshot);

    if cli_args.verbosity() > 1 {
        for candidate in &candidates {
            // Term counts of the sources bound the merged dictionary size.
            let terms: u64 = candidate
                .segments
                .iter()
                .filter_map(|id| snapshot.segment(*id))
                .map(|meta| meta.term_count)
                .sum();
            let delay = scheduled_delay(&config, terms, candidate.estimated_live_docs);
            println!(
                "{:?}: up to {:.1}s of throttling",
                candidate.segments,
                delay.as_secs_f64()
            );
        }
    }

    output_result(
        "Merge plan",
        &PlanResult {
            catalog_version: snapshot.version,
            candidates,
        },
        cli_args,
    )?;
    Ok(())
}

/// Run a merge.
fn merge_segments(args: &MergeArgs, cli_args: &SegmergeArgs) -> Result<()> {
    let catalog = open_catalog(&cli_args.index)?;

    let mut config = load_merge_config(args.config.as_deref())?;
    if args.delay_seconds.is_some() || args.batch_factor.is_some() {
        config.throttle = ThrottlePolicy::new(
            args.delay_seconds.unwrap_or(config.throttle.delay_seconds),
            args.batch_factor.unwrap_or(config.throttle.batch_factor),
        )?;
    }
    if args.no_verify {
        config.verify_after_merge = false;
    }
    let policy = load_policy_config(args.policy.as_deref())?;
    let maintainer = IndexMaintainer::new(catalog, config, policy)?;

    let merged = if args.all {
        maintainer.force_merge().context("merge failed")?
    } else if args.auto {
        maintainer.maybe_merge().context("merge failed")?
    } else {
        if args.segments.is_empty() {
            bail!("choose segments with --segments, or use --all or --auto");
        }
        let ids = args
            .segments
            .iter()
            .map(|text| parse_segment(text))
            .collect::<Result<Vec<_>>>()?;
        Some(
            maintainer
                .merge_with_retry(&ids, args.attempts)
                .context("merge failed")?,
        )
    };

    let message = if merged.is_some() {
        "Merge committed"
    } else {
        "Nothing to merge"
    };
    output_result(message, &MergeResult { merged }, cli_args)?;
    Ok(())
}

/// Remove replaced segments.
fn purge_segments(cli_args: &SegmergeArgs) -> Result<()> {
    let catalog = open_catalog(&cli_args.index)?;
    let purged = catalog.purge_pending().context("purge failed")?;
    output_result("Purge complete", &PurgeResult { purged }, cli_args)?;
    Ok(())
}
