use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use tracetree::config::{load_config, save_config, ViewerConfig};
use tracetree::ingest::{extract_intervals, find_transaction, intervals_by_trace, read_trace_file};
use tracetree::replay::{extract_diff_mutations, parse_recording, FrameRange, VirtualDom};
use tracetree::span_tree::{RootSpan, SpanTree};
use tracetree::types::{stringify_interval, time_point_to_utc_string};
use tracetree::viewport::{select_window, Rect};

/// Rebuild span trees and replay diffs from exported data
#[derive(Parser, Debug)]
#[command(name = "tracetree")]
#[command(version)]
struct Args {
    /// Config file, defaults to the one in the user's data directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the span tree of each trace in an OTLP JSON export and print it
    Tree {
        /// OTLP JSON export, optionally gzip compressed
        file: PathBuf,

        /// Only show the trace with this (hex) id
        #[arg(long)]
        trace_id: Option<String>,

        /// Start of the time range to select a viewport for, in seconds relative to the trace start
        #[arg(long, requires = "range_end")]
        range_start: Option<f64>,

        /// End of the time range to select a viewport for, in seconds relative to the trace start
        #[arg(long, requires = "range_start")]
        range_end: Option<f64>,

        /// Viewport height in rows
        #[arg(long)]
        rows: Option<u32>,

        /// Gap (seconds) between siblings above which a missing instrumentation node is added
        #[arg(long)]
        threshold: Option<f64>,

        /// Store the effective settings in the config file
        #[arg(long)]
        save_config: bool,
    },
    /// Print the DOM changes made by each mutation frame of a replay recording
    ReplayDiff {
        /// Recording, a JSON array of recording events
        file: PathBuf,

        /// Start of the range in milliseconds since epoch, defaults to the first frame
        #[arg(long)]
        start: Option<f64>,

        /// End of the range in milliseconds since epoch, defaults to the last frame
        #[arg(long)]
        end: Option<f64>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Tree {
            file,
            trace_id,
            range_start,
            range_end,
            rows,
            threshold,
            save_config: should_save,
        } => {
            if let Some(threshold) = threshold {
                config.tree.missing_instrumentation_threshold = threshold;
            }
            if let Some(rows) = rows {
                config.viewport_rows = rows;
            }
            if should_save {
                save_config(&config, args.config.as_deref())?;
            }
            let range = range_start.zip(range_end);
            print_trees(&file, trace_id.as_deref(), range, &config)
        }
        Command::ReplayDiff { file, start, end } => print_replay_diff(&file, start, end),
    }
}

fn print_trees(
    file: &Path,
    trace_id: Option<&str>,
    range: Option<(f64, f64)>,
    config: &ViewerConfig,
) -> Result<()> {
    let requests = read_trace_file(file)?;
    let traces = intervals_by_trace(extract_intervals(&requests));
    info!("Loaded {} traces from {}", traces.len(), file.display());

    let mut printed = 0;
    for (id, intervals) in &traces {
        if trace_id.is_some_and(|wanted| wanted != id.as_str()) {
            continue;
        }
        printed += 1;

        let (root, spans) = match find_transaction(intervals) {
            Some(transaction) => {
                let spans: Vec<_> = intervals
                    .iter()
                    .filter(|interval| interval.span_id != transaction.span_id)
                    .cloned()
                    .collect();
                (RootSpan::from_transaction(transaction), spans)
            }
            None => (RootSpan::unbounded(), intervals.clone()),
        };
        let trace_start = intervals
            .iter()
            .map(|interval| interval.start_time)
            .fold(f64::INFINITY, f64::min);
        let trace_end = intervals
            .iter()
            .map(|interval| interval.end_time)
            .fold(trace_start, f64::max);
        let tree = SpanTree::build_with_config(root, &spans, &config.tree);

        println!(
            "Trace {} ({} spans, starts at {})",
            id,
            intervals.len(),
            time_point_to_utc_string(trace_start)
        );
        print!("{}", tree.render_text());
        println!(
            "{} missing instrumentation gaps, {} orphans",
            tree.missing_instrumentation().len(),
            tree.orphans().len()
        );
        for orphan in tree.orphans() {
            println!("  orphan: {}", stringify_interval(orphan));
        }

        if let Some((start, end)) = range {
            let full_view = Rect::new(
                trace_start,
                0.0,
                trace_end - trace_start,
                config.viewport_rows as f64,
            );
            let selection = select_window(&tree, full_view, trace_start + start, trace_start + end);
            println!(
                "Viewport for [{}, {}]: rows {}..{} ({:?})",
                start,
                end,
                selection.window.y,
                selection.window.y + selection.window.height,
                selection.mode
            );
        }
        println!();
    }

    if let Some(trace_id) = trace_id {
        if printed == 0 {
            bail!("Trace {} not found in {}", trace_id, file.display());
        }
    }
    Ok(())
}

fn print_replay_diff(file: &Path, start: Option<f64>, end: Option<f64>) -> Result<()> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let frames = parse_recording(&json)?;
    let Some(replay_start) = frames.iter().map(|frame| frame.timestamp).reduce(f64::min) else {
        info!("Recording {} is empty", file.display());
        return Ok(());
    };
    let replay_end = frames
        .iter()
        .map(|frame| frame.timestamp)
        .fold(replay_start, f64::max);

    let range = FrameRange {
        start: start.unwrap_or(replay_start),
        end: end.unwrap_or(replay_end),
    };
    let mut player = VirtualDom::new();
    let records = extract_diff_mutations(&frames, range, replay_start, &mut player);

    for (index, record) in &records {
        println!("Frame {} at +{:.0}ms", index, record.offset);
        for selector in record.removes.keys() {
            println!("  - {}", selector);
        }
        for selector in record.adds.keys() {
            println!("  + {}", selector);
        }
        for (selector, change) in &record.attributes {
            println!("  ~ {} [{}]", selector, change.changed.join(", "));
        }
    }
    Ok(())
}
