/// Species matching tool: assign a species label to every cluster of one
/// segmentation table from the reference trees its footprint contains.
use std::fs::File;
use std::path::PathBuf;

use anyhow::{Context, Result};
use canopy_core::export::{labelled_features, write_footprints};
use canopy_core::footprint::DEFAULT_MIN_CLUSTER_POINTS;
use canopy_core::species::species_counts;
use canopy_core::{
    build_footprints, classify, clip_to_extent, load_reference_points, match_references, resolve, ContainmentPolicy,
    ReferenceFields, RunContext, SegmentationTable, SpeciesPolicy,
};
use clap::{ArgAction, Parser, ValueEnum};
use serde::Serialize;
use tracing_subscriber::{fmt, EnvFilter};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Policy {
    /// One match, not shared with any other cluster
    Strict,
    /// All matched trees carry the same species
    Consistent,
    /// Inverse-distance vote
    Weighted,
}

impl From<Policy> for SpeciesPolicy {
    fn from(p: Policy) -> Self {
        match p {
            Policy::Strict => SpeciesPolicy::StrictUnique,
            Policy::Consistent => SpeciesPolicy::Consistent,
            Policy::Weighted => SpeciesPolicy::Weighted,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "species_match", about = "Assign species labels to segmented clusters from reference trees")]
struct Args {
    /// Segmentation table: `cluster_id x y z` per line
    #[arg(short, long)]
    segmentation: PathBuf,

    /// Reference trees (GeoJSON points)
    #[arg(short, long)]
    reference: PathBuf,

    /// Resolution policy
    #[arg(short, long, value_enum, default_value = "strict")]
    policy: Policy,

    /// Per-cluster assignment CSV
    #[arg(short, long, default_value = "species.csv")]
    output: PathBuf,

    /// Species frequency CSV
    #[arg(long)]
    counts: Option<PathBuf>,

    /// Labelled footprint GeoJSON
    #[arg(long)]
    export: Option<PathBuf>,

    /// Exclude reference points lying exactly on a footprint edge
    #[arg(long)]
    interior_only: bool,

    /// Minimum cluster size for a footprint (never below 3)
    #[arg(long, default_value_t = DEFAULT_MIN_CLUSTER_POINTS)]
    min_cluster_points: usize,

    /// Cluster id of unclustered points
    #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
    noise_label: i64,

    /// Reference id property
    #[arg(long, default_value = "OBJECTID")]
    id_field: String,

    /// Reference species property
    #[arg(long, default_value = "BOOMSORTIMENT")]
    species_field: String,

    /// Species value meaning "unknown" (repeatable)
    #[arg(long = "unknown-label")]
    unknown_labels: Vec<String>,

    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Serialize)]
struct CountRow<'a> {
    species: &'a str,
    clusters: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let filter = match args.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let ctx = RunContext::new("species_match");
    let fields = ReferenceFields {
        id_field: args.id_field.clone(),
        species_field: args.species_field.clone(),
        unknown_labels: args.unknown_labels.clone(),
    };
    let containment = if args.interior_only { ContainmentPolicy::Interior } else { ContainmentPolicy::Inclusive };

    let table = SegmentationTable::read(&args.segmentation, Some(args.noise_label))
        .with_context(|| format!("reading {}", args.segmentation.display()))?;
    let layer = load_reference_points(&args.reference, &fields)
        .with_context(|| format!("reading {}", args.reference.display()))?;
    let references = match &table.extent {
        Some(extent) => clip_to_extent(layer.points, extent, &ctx),
        None => layer.points,
    };
    let set = build_footprints(&table.clusters, args.min_cluster_points, &ctx);
    let matches = match_references(&set.footprints, &references, containment, &ctx);
    let resolution = resolve(&set.footprints, &references, &matches, args.policy.into(), &ctx);

    for u in &resolution.unresolved {
        tracing::debug!(parent: ctx.span(), cluster_id = u.cluster_id, reason = %u.reason, "cluster left unresolved");
    }

    let mut w = csv::Writer::from_path(&args.output)
        .with_context(|| format!("creating {}", args.output.display()))?;
    for a in &resolution.assigned {
        w.serialize(a)?;
    }
    w.flush()?;

    let counts = species_counts(&resolution.assigned);
    if let Some(path) = &args.counts {
        let mut w = csv::Writer::from_writer(File::create(path).with_context(|| format!("creating {}", path.display()))?);
        for (species, &clusters) in &counts {
            w.serialize(CountRow { species, clusters })?;
        }
        w.flush()?;
    }

    if let Some(path) = &args.export {
        let classes = classify(&matches.per_footprint);
        let fc = labelled_features(&set.footprints, &classes, &matches, layer.crs);
        write_footprints(path, &fc).with_context(|| format!("writing {}", path.display()))?;
    }

    eprintln!(
        "{} clusters ({} without footprint), {} reference trees inside the cloud extent, {} in no footprint",
        table.clusters.len(),
        set.dropped.len(),
        references.len(),
        matches.skipped()
    );
    eprintln!(
        "Policy {:?}: {} assigned, {} unresolved -> {}",
        args.policy,
        resolution.assigned.len(),
        resolution.unresolved.len(),
        args.output.display()
    );
    for (species, n) in &counts {
        eprintln!("  {species:<30} {n:>5}");
    }
    Ok(())
}
