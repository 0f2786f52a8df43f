//! Command line argument parsing for the segmerge CLI using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

/// segmerge - maintenance tool for segmented full-text indexes
#[derive(Parser, Debug, Clone)]
#[command(name = "segmerge")]
#[command(about = "Inspect and compact the segments of a full-text index")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct SegmergeArgs {
    /// Verbosity level (0=quiet, 1=normal, 2=verbose, 3=debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human", global = true)]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Index directory
    #[arg(short, long, env = "SEGMERGE_INDEX", value_name = "INDEX_DIR")]
    pub index: PathBuf,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl SegmergeArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1, // Default to normal
                n => n,
            }
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Create an empty index
    Init(InitArgs),

    /// Seal a file of pre-analyzed documents into a new segment
    Ingest(IngestArgs),

    /// Mark documents of a segment as deleted
    Delete(DeleteArgs),

    /// List the segments of the index
    List,

    /// Validate and summarize one segment
    Inspect(InspectArgs),

    /// Show the merges the tiered policy would run
    Plan(PlanArgs),

    /// Merge segments
    Merge(MergeArgs),

    /// Delete files of segments replaced by earlier merges
    Purge,
}

/// Arguments for creating an index
#[derive(Parser, Debug, Clone)]
pub struct InitArgs {
    /// Sortable fields (comma-separated)
    #[arg(long = "sort-field", value_delimiter = ',')]
    pub sort_fields: Vec<String>,
}

/// Arguments for ingesting documents
#[derive(Parser, Debug, Clone)]
pub struct IngestArgs {
    /// JSONL file, one document per line:
    /// {"body": "...", "tokens": ["..."], "sort_keys": {"field": 1}}
    #[arg(value_name = "DOCUMENT_FILE")]
    pub document_file: PathBuf,

    /// Postings per skip-table block
    #[arg(long, default_value = "16")]
    pub skip_interval: usize,
}

/// Arguments for deleting documents
#[derive(Parser, Debug, Clone)]
pub struct DeleteArgs {
    /// Segment id (`7` or `seg_00000007`)
    #[arg(value_name = "SEGMENT")]
    pub segment: String,

    /// Local document ids to delete
    #[arg(value_name = "DOC_ID", required = true)]
    pub doc_ids: Vec<u32>,
}

/// Arguments for inspecting a segment
#[derive(Parser, Debug, Clone)]
pub struct InspectArgs {
    /// Segment id (`7` or `seg_00000007`)
    #[arg(value_name = "SEGMENT")]
    pub segment: String,
}

/// Arguments for planning merges
#[derive(Parser, Debug, Clone)]
pub struct PlanArgs {
    /// Merge policy file (JSON)
    #[arg(long, value_name = "POLICY_FILE")]
    pub policy: Option<PathBuf>,

    /// Merge configuration file (JSON), used to estimate throttle time
    #[arg(long, value_name = "CONFIG_FILE")]
    pub config: Option<PathBuf>,
}

/// Arguments for merging
#[derive(Parser, Debug, Clone)]
pub struct MergeArgs {
    /// Segments to merge (comma-separated)
    #[arg(long, value_delimiter = ',', conflicts_with_all = ["all", "auto"])]
    pub segments: Vec<String>,

    /// Merge every segment into one
    #[arg(long)]
    pub all: bool,

    /// Run the most urgent merge the policy proposes
    #[arg(long, conflicts_with = "all")]
    pub auto: bool,

    /// Merge configuration file (JSON)
    #[arg(long, value_name = "CONFIG_FILE")]
    pub config: Option<PathBuf>,

    /// Merge policy file (JSON), used with --auto
    #[arg(long, value_name = "POLICY_FILE")]
    pub policy: Option<PathBuf>,

    /// Throttle pause in seconds (overrides the configuration)
    #[arg(long)]
    pub delay_seconds: Option<f64>,

    /// Terms per throttle batch (overrides the configuration)
    #[arg(long)]
    pub batch_factor: Option<usize>,

    /// Attempts when the catalog changes during the merge
    #[arg(long, default_value = "3")]
    pub attempts: usize,

    /// Skip re-reading the merged segment before committing it
    #[arg(long)]
    pub no_verify: bool,
}

/// Output formats
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_merge() {
        let args = SegmergeArgs::try_parse_from([
            "segmerge",
            "--index",
            "/tmp/idx",
            "merge",
            "--segments",
            "1,2,seg_00000003",
            "--delay-seconds",
            "0.5",
        ])
        .unwrap();

        match args.command {
            Command::Merge(merge) => {
                assert_eq!(merge.segments, vec!["1", "2", "seg_00000003"]);
                assert_eq!(merge.delay_seconds, Some(0.5));
                assert_eq!(merge.attempts, 3);
                assert!(!merge.all);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_segments_conflict_with_all() {
        let parsed = SegmergeArgs::try_parse_from([
            "segmerge", "--index", "/tmp/idx", "merge", "--all", "--segments", "1",
        ]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_verbosity() {
        let args =
            SegmergeArgs::try_parse_from(["segmerge", "-i", "/tmp/idx", "-vv", "list"]).unwrap();
        assert_eq!(args.verbosity(), 2);

        let args =
            SegmergeArgs::try_parse_from(["segmerge", "-i", "/tmp/idx", "-q", "-v", "list"])
                .unwrap();
        assert_eq!(args.verbosity(), 0);
    }

    #[test]
    fn test_init_sort_fields() {
        let args = SegmergeArgs::try_parse_from([
            "segmerge",
            "--index",
            "/tmp/idx",
            "--format",
            "json",
            "init",
            "--sort-field",
            "date,price",
        ])
        .unwrap();
        assert_eq!(args.output_format, OutputFormat::Json);
        match args.command {
            Command::Init(init) => assert_eq!(init.sort_fields, vec!["date", "price"]),
            other => panic!("unexpected command {other:?}"),
        }
    }
}
