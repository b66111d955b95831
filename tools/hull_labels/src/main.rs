/// Hull labelling tool: bucket the footprints of an existing export by how many
/// reference trees each contains, and write them back with labels.
use std::path::PathBuf;

use anyhow::{Context, Result};
use canopy_core::export::{labelled_features, read_footprints, write_footprints};
use canopy_core::{
    classify, clip_to_extent, load_reference_points, match_references, Bucket, ContainmentPolicy, PointCloudExtent,
    ReferenceFields, RunContext,
};
use clap::{ArgAction, Parser};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "hull_labels", about = "Label exported footprints with their H0..H4+ bucket")]
struct Args {
    /// Footprint polygons (GeoJSON)
    #[arg(short, long)]
    footprints: PathBuf,

    /// Reference trees (GeoJSON points)
    #[arg(short, long)]
    reference: PathBuf,

    /// Point cloud (`x y z` per line) the footprints were segmented from; reference
    /// trees outside its extent are ignored
    #[arg(short, long)]
    cloud: PathBuf,

    /// Labelled output (GeoJSON)
    #[arg(short, long)]
    output: PathBuf,

    /// Exclude reference points lying exactly on a footprint edge
    #[arg(long)]
    interior_only: bool,

    /// Reference id property
    #[arg(long, default_value = "OBJECTID")]
    id_field: String,

    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let filter = match args.verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        _ => EnvFilter::new("debug"),
    };
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let ctx = RunContext::new("hull_labels");
    let fields = ReferenceFields { id_field: args.id_field.clone(), ..Default::default() };
    let containment = if args.interior_only { ContainmentPolicy::Interior } else { ContainmentPolicy::Inclusive };

    let set = read_footprints(&args.footprints).with_context(|| format!("reading {}", args.footprints.display()))?;
    if !set.dropped.is_empty() {
        tracing::warn!(parent: ctx.span(), dropped = set.dropped.len(), "footprints without area ignored");
    }
    let extent = PointCloudExtent::load_xyz(&args.cloud).with_context(|| format!("reading {}", args.cloud.display()))?;
    let layer = load_reference_points(&args.reference, &fields)
        .with_context(|| format!("reading {}", args.reference.display()))?;
    let references = clip_to_extent(layer.points, &extent, &ctx);

    let matches = match_references(&set.footprints, &references, containment, &ctx);
    let classes = classify(&matches.per_footprint);
    let fc = labelled_features(&set.footprints, &classes, &matches, layer.crs);
    write_footprints(&args.output, &fc).with_context(|| format!("writing {}", args.output.display()))?;

    eprintln!(
        "{} footprints, {} reference trees inside the cloud extent ({} in no footprint)",
        classes.total(),
        references.len(),
        matches.skipped()
    );
    for b in Bucket::ALL {
        eprintln!("  {:<4} {:>6}", b.label(), classes.count(b));
    }
    eprintln!("  {:<4} {:>6}", "multi", classes.multi());
    eprintln!("  shared references: {}", matches.shared_references());
    eprintln!("Wrote {}", args.output.display());
    Ok(())
}
