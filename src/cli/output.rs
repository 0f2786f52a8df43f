//! Output formatting for CLI commands.

use serde::Serialize;

use crate::catalog::CatalogSnapshot;
use crate::cli::args::{OutputFormat, SegmergeArgs};
use crate::error::Result;
use crate::merge::coordinator::MergeOutcome;
use crate::merge::policy::MergeCandidate;
use crate::segment::reader::SegmentSummary;
use crate::segment::{SegmentId, SegmentMeta};

/// Result of `init`.
#[derive(Debug, Serialize)]
pub struct InitResult {
    pub path: String,
    pub catalog_version: u64,
    pub sort_fields: Vec<String>,
}

/// Result of `ingest`.
#[derive(Debug, Serialize)]
pub struct IngestResult {
    pub segment: SegmentMeta,
    pub duration_ms: u64,
}

/// Result of `delete`.
#[derive(Debug, Serialize)]
pub struct DeleteResult {
    pub segment: SegmentId,
    pub newly_deleted: u32,
    pub deleted_count: u32,
    pub live_doc_count: u32,
}

/// Result of `list`.
#[derive(Debug, Serialize)]
pub struct ListResult {
    pub catalog: CatalogSnapshot,
    pub pending_deletions: Vec<SegmentId>,
}

/// Result of `inspect`.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    pub segment: SegmentMeta,
    pub summary: SegmentSummary,
}

/// Result of `plan`.
#[derive(Debug, Serialize)]
pub struct PlanResult {
    pub catalog_version: u64,
    pub candidates: Vec<MergeCandidate>,
}

/// Result of `merge`.
#[derive(Debug, Serialize)]
pub struct MergeResult {
    pub merged: Option<MergeOutcome>,
}

/// Result of `purge`.
#[derive(Debug, Serialize)]
pub struct PurgeResult {
    pub purged: Vec<SegmentId>,
}

/// Output a result in the selected format.
pub fn output_result<T: Serialize>(message: &str, result: &T, args: &SegmergeArgs) -> Result<()> {
    match args.output_format {
        OutputFormat::Human => output_human(message, result, args),
        OutputFormat::Json => output_json(result, args),
    }
}

/// Print the segment table of `list`.
pub fn output_segments(result: &ListResult, args: &SegmergeArgs) -> Result<()> {
    if args.output_format == OutputFormat::Json {
        return output_json(result, args);
    }

    let catalog = &result.catalog;
    if args.verbosity() > 0 {
        println!(
            "Catalog version {}: {} segments, {} live of {} documents",
            catalog.version,
            catalog.segments.len(),
            catalog.live_doc_count(),
            catalog.doc_count()
        );
        println!();
    }
    println!(
        "{:<14} {:>10} {:>10} {:>10} {:>10}",
        "SEGMENT", "DOCS", "DELETED", "TERMS", "SIZE"
    );
    for meta in &catalog.segments {
        println!(
            "{:<14} {:>10} {:>10} {:>10} {:>10}",
            meta.id.to_string(),
            meta.doc_count,
            meta.deleted_count,
            meta.term_count,
            format_bytes(meta.size_bytes)
        );
    }
    if !result.pending_deletions.is_empty() {
        let pending: Vec<String> = result
            .pending_deletions
            .iter()
            .map(SegmentId::to_string)
            .collect();
        println!();
        println!("Pending deletion: {}", pending.join(", "));
    }
    Ok(())
}

/// Output in human-readable format.
fn output_human<T: Serialize>(message: &str, result: &T, args: &SegmergeArgs) -> Result<()> {
    if args.verbosity() > 0 {
        println!("{message}");
        println!();
    }
    let value = serde_json::to_value(result)?;
    print_value(&value, 0);
    Ok(())
}

/// Output in JSON format.
fn output_json<T: Serialize>(result: &T, args: &SegmergeArgs) -> Result<()> {
    let json = if args.pretty {
        serde_json::to_string_pretty(result)?
    } else {
        serde_json::to_string(result)?
    };

    println!("{json}");
    Ok(())
}

fn print_value(value: &serde_json::Value, indent: usize) {
    let pad = "  ".repeat(indent);
    match value {
        serde_json::Value::Object(obj) => {
            for (key, val) in obj {
                match val {
                    serde_json::Value::Object(_) => {
                        println!("{pad}{key}:");
                        print_value(val, indent + 1);
                    }
                    serde_json::Value::Array(items)
                        if items.iter().any(serde_json::Value::is_object) =>
                    {
                        println!("{pad}{key}:");
                        for item in items {
                            println!("{pad}  -");
                            print_value(item, indent + 2);
                        }
                    }
                    _ if key.ends_with("size_bytes") => {
                        let bytes = val.as_u64().unwrap_or(0);
                        println!("{pad}{key}: {}", format_bytes(bytes));
                    }
                    _ => println!("{pad}{key}: {}", format_value(val)),
                }
            }
        }
        _ => println!("{pad}{}", format_value(value)),
    }
}

fn format_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(format_value).collect();
            format!("[{}]", items.join(", "))
        }
        serde_json::Value::Object(_) => "{...}".to_string(),
        serde_json::Value::Null => "-".to_string(),
    }
}

/// Format bytes into human-readable format.
fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        let unit = UNITS[unit_index];
        format!("{bytes} {unit}")
    } else {
        let unit = UNITS[unit_index];
        format!("{size:.1} {unit}")
    }
}
