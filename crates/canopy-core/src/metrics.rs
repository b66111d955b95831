//! Per-unit evaluation: match, classify and detect over-segmentation, then fold
//! everything into one result row.

use serde::{Deserialize, Serialize};

use crate::classify::{classify, Bucket, Classification};
use crate::config::UnitSpec;
use crate::context::RunContext;
use crate::footprint::FootprintSet;
use crate::matching::{match_references, ContainmentPolicy, MatchSet};
use crate::overseg::{detect, DenominatorPolicy, OverSegmentation};
use crate::reference::ReferencePoint;

/// One persisted result row. Field names are the CSV column names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepRow {
    pub it_id: usize,
    #[serde(rename = "R")]
    pub radius: f64,
    #[serde(rename = "Vres")]
    pub vres: f64,
    #[serde(rename = "minP")]
    pub min_points: u32,
    /// Seconds spent in the segmenter and evaluation.
    pub runtime: f64,
    /// Percentage of input points not inside any footprint's cluster. Empty when the
    /// footprints came from an earlier export.
    #[serde(rename = "Pcd_loss")]
    pub pcd_loss: Option<f64>,
    /// Rows in the segmentation table. Empty for re-analysed exports.
    #[serde(rename = "N_points")]
    pub n_points: Option<usize>,
    #[serde(rename = "N_muni")]
    pub n_reference: usize,
    pub muni_skip: usize,
    #[serde(rename = "N_hulls")]
    pub n_hulls: usize,
    #[serde(rename = "N_dropped")]
    pub n_dropped: usize,
    #[serde(rename = "H0")]
    pub h0: usize,
    #[serde(rename = "H1")]
    pub h1: usize,
    #[serde(rename = "H2")]
    pub h2: usize,
    #[serde(rename = "H3")]
    pub h3: usize,
    #[serde(rename = "H4+")]
    pub h4_plus: usize,
    #[serde(rename = "Hmulti")]
    pub h_multi: usize,
    #[serde(rename = "OS_tree")]
    pub os_tree: usize,
    #[serde(rename = "OS_tree%")]
    pub os_tree_pct: f64,
    #[serde(rename = "OS_avg_per_tree")]
    pub os_avg_per_tree: f64,
    #[serde(rename = "OS2")]
    pub os2: usize,
    #[serde(rename = "OS2_avg")]
    pub os2_avg: f64,
    #[serde(rename = "OS3")]
    pub os3: usize,
    #[serde(rename = "OS3_avg")]
    pub os3_avg: f64,
    #[serde(rename = "OS4p")]
    pub os4p: usize,
    #[serde(rename = "OS4p_avg")]
    pub os4p_avg: f64,
    #[serde(rename = "OS_shared_match")]
    pub os_shared_match: usize,
    #[serde(rename = "OS_H1H0_overlap_ratio_mean")]
    pub overlap_ratio_mean: f64,
    #[serde(rename = "R0")]
    pub r0: usize,
    #[serde(rename = "R1")]
    pub r1: usize,
    #[serde(rename = "R2")]
    pub r2: usize,
    #[serde(rename = "R3")]
    pub r3: usize,
    #[serde(rename = "R4+")]
    pub r4_plus: usize,
}

/// Point counts of a freshly segmented unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointStats {
    /// Points in the input cloud.
    pub input_points: usize,
    /// Rows in the segmentation table.
    pub segmented_points: usize,
}

/// Everything computed for one unit; the row plus the intermediate structures the
/// export needs.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub row: SweepRow,
    pub matches: MatchSet,
    pub classes: Classification,
    pub overseg: OverSegmentation,
}

/// Point loss in percent, rounded to two decimals.
pub fn point_loss(kept: usize, total: usize) -> Option<f64> {
    if total == 0 {
        return None;
    }
    let pct = 100.0 * (1.0 - kept as f64 / total as f64);
    Some((pct.clamp(0.0, 100.0) * 100.0).round() / 100.0)
}

/// Evaluate one footprint set against the reference trees. `runtime` is left at zero
/// for the caller to fill in.
pub fn evaluate(
    unit: &UnitSpec,
    set: &FootprintSet,
    references: &[ReferencePoint],
    points: Option<PointStats>,
    containment: ContainmentPolicy,
    denominator: DenominatorPolicy,
    ctx: &RunContext,
) -> Evaluation {
    let matches = match_references(&set.footprints, references, containment, ctx);
    let classes = classify(&matches.per_footprint);
    let overseg = detect(&set.footprints, &classes, &matches, denominator, ctx);
    let coverage = matches.reference_coverage();

    let row = SweepRow {
        it_id: unit.it_id,
        radius: unit.params.radius,
        vres: unit.params.vres,
        min_points: unit.params.min_points,
        runtime: 0.0,
        pcd_loss: points.and_then(|p| point_loss(set.footprint_points(), p.input_points)),
        n_points: points.map(|p| p.segmented_points),
        n_reference: references.len(),
        muni_skip: matches.skipped(),
        n_hulls: set.footprints.len(),
        n_dropped: set.dropped.len(),
        h0: classes.count(Bucket::H0),
        h1: classes.count(Bucket::H1),
        h2: classes.count(Bucket::H2),
        h3: classes.count(Bucket::H3),
        h4_plus: classes.count(Bucket::H4Plus),
        h_multi: classes.multi(),
        os_tree: overseg.os_tree,
        os_tree_pct: overseg.os_tree_pct,
        os_avg_per_tree: overseg.os_avg_per_tree,
        os2: overseg.h2.contaminated(),
        os2_avg: overseg.h2.avg_per_contaminated(),
        os3: overseg.h3.contaminated(),
        os3_avg: overseg.h3.avg_per_contaminated(),
        os4p: overseg.h4_plus.contaminated(),
        os4p_avg: overseg.h4_plus.avg_per_contaminated(),
        os_shared_match: matches.shared_references(),
        overlap_ratio_mean: overseg.overlap_ratio_mean,
        r0: coverage[0],
        r1: coverage[1],
        r2: coverage[2],
        r3: coverage[3],
        r4_plus: coverage[4],
    };

    if !set.footprints.is_empty() && !references.is_empty() && row.muni_skip == references.len() {
        tracing::warn!(parent: ctx.span(), params = %unit.params, "no reference point matched any footprint");
    }

    Evaluation { row, matches, classes, overseg }
}
