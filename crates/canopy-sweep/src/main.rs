/// Parameter sweep runner: segment the point cloud once per (radius, vres, min_points)
/// triple, score each run against the reference trees, and append one CSV row per run.
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use canopy_core::{ExternalSegmenter, Sweep, SweepConfig, UnitState};
use clap::{ArgAction, Parser};
use tracing_subscriber::{fmt, EnvFilter};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "canopy-sweep",
    about = "Run a segmentation parameter sweep and score every run against reference trees"
)]
struct Args {
    /// Sweep configuration (JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Worker threads (overrides the config; default: available cores)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Re-run triples that already have a row and supersede it
    #[arg(long)]
    overwrite: bool,

    /// Write labelled footprints per unit
    #[arg(long)]
    export_footprints: bool,

    /// Re-analyse earlier footprint exports instead of running the segmenter
    #[arg(long)]
    reuse_exports: bool,

    /// -v info, -vv debug, -vvv trace
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Also write the log to this file
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn init_logging(verbose: u8, log_file: Option<&Path>) -> Result<()> {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    match log_file {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("creating log file {}", path.display()))?;
            fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => fmt().with_env_filter(filter).with_writer(std::io::stderr).init(),
    }
    Ok(())
}

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose, args.log_file.as_deref())?;

    let mut config = SweepConfig::load(&args.config)
        .with_context(|| format!("loading sweep config {}", args.config.display()))?;
    if args.workers.is_some() {
        config.workers = args.workers;
    }
    config.overwrite |= args.overwrite;
    config.export_footprints |= args.export_footprints;
    config.reuse_footprint_exports |= args.reuse_exports;
    tracing::info!(path = %args.config.display(), output_dir = %config.output_dir.display(), "configuration loaded");

    let n_units = config.units().len();
    eprintln!(
        "Sweep '{}': {} units ({} radius × {} vres × {} min_points), mode {:?}",
        config.name,
        n_units,
        config.radius.len(),
        config.vres.len(),
        config.min_points.len(),
        config.write_mode(),
    );

    let segmenter = ExternalSegmenter::new(&config.segmenter)
        .with_args(config.segmenter_args.clone())
        .with_timeout(config.timeout());
    let sweep = Sweep::prepare(config, Box::new(segmenter)).context("preparing sweep inputs")?;
    let summary = sweep.run().context("running sweep")?;

    // ── Summary ──────────────────────────────────────────────────────────────
    eprintln!();
    eprintln!("{:<10} {:>6}", "state", "units");
    for state in UnitState::ALL {
        let n = summary.count(state);
        if n > 0 {
            eprintln!("{:<10} {:>6}", state.to_string(), n);
        }
    }

    let mut rows: Vec<_> = summary.outcomes.iter().filter_map(|o| o.row.as_ref()).collect();
    if !rows.is_empty() {
        rows.sort_by(|a, b| b.h1.cmp(&a.h1).then(a.it_id.cmp(&b.it_id)));
        eprintln!();
        eprintln!(
            "{:>5} {:>7} {:>7} {:>5} {:>6} {:>5} {:>5} {:>6} {:>8} {:>9}",
            "it_id", "R", "Vres", "minP", "hulls", "H0", "H1", "Hmulti", "OS_tree%", "runtime"
        );
        for r in rows.iter().take(10) {
            eprintln!(
                "{:>5} {:>7.3} {:>7.3} {:>5} {:>6} {:>5} {:>5} {:>6} {:>8.2} {:>8.2}s",
                r.it_id, r.radius, r.vres, r.min_points, r.n_hulls, r.h0, r.h1, r.h_multi, r.os_tree_pct, r.runtime
            );
        }
    }

    let failures: Vec<_> = summary.failures().collect();
    if !failures.is_empty() {
        eprintln!();
        eprintln!("Failed units:");
        for f in failures {
            eprintln!("  [{}] {}: {}", f.unit.it_id, f.unit.params, f.error.as_deref().unwrap_or("unknown error"));
        }
    }
    if summary.compacted > 0 {
        eprintln!("Removed {} superseded rows.", summary.compacted);
    }
    eprintln!("Results: {}", sweep.store().path().display());
    Ok(())
}
