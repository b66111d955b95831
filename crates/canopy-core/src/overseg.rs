//! Over-segmentation detector.
//!
//! A tree split into several footprints shows up as a matched footprint that
//! geometrically overlaps one or more empty (H0) footprints. The primary signal is
//! H1 against H0; the same test is repeated for H2, H3 and H4+ as diagnostics.

use geo::{Area, BooleanOps, Intersects};
use serde::{Deserialize, Serialize};

use crate::classify::{Bucket, Classification};
use crate::context::RunContext;
use crate::footprint::Footprint;
use crate::matching::MatchSet;
use crate::spatial::FootprintIndex;

/// What `OS_tree%` is divided by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenominatorPolicy {
    /// `N_reference - muni_skip`: only references some footprint actually contains.
    #[default]
    SkipAdjusted,
    /// `N_reference`.
    AllReferences,
}

/// H0 overlaps of every footprint in one source bucket.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BucketOverlap {
    /// `(footprint, overlapping H0 footprints)` per member of the source bucket, in
    /// member order. The H0 list is empty when nothing overlaps.
    pub overlaps: Vec<(usize, Vec<usize>)>,
}

impl BucketOverlap {
    /// Members with at least one H0 overlap.
    pub fn contaminated(&self) -> usize {
        self.overlaps.iter().filter(|(_, h0)| !h0.is_empty()).count()
    }

    /// Mean number of H0 overlaps among contaminated members; 0 if there are none.
    pub fn avg_per_contaminated(&self) -> f64 {
        let (n, total) = self
            .overlaps
            .iter()
            .filter(|(_, h0)| !h0.is_empty())
            .fold((0usize, 0usize), |(n, t), (_, h0)| (n + 1, t + h0.len()));
        if n == 0 {
            0.0
        } else {
            total as f64 / n as f64
        }
    }

    fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.overlaps.iter().flat_map(|(src, h0)| h0.iter().map(move |&z| (*src, z)))
    }
}

/// Over-segmentation metrics of one evaluated unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverSegmentation {
    pub h1: BucketOverlap,
    pub h2: BucketOverlap,
    pub h3: BucketOverlap,
    pub h4_plus: BucketOverlap,
    /// `OS_tree`: H1 footprints with at least one H0 overlap.
    pub os_tree: usize,
    /// `OS_tree%`, in `[0, 100]`.
    pub os_tree_pct: f64,
    /// `OS_avg_per_tree`.
    pub os_avg_per_tree: f64,
    /// Mean of `area(H1 ∩ H0) / area(H0)` over all contaminated H1/H0 pairs.
    pub overlap_ratio_mean: f64,
}

/// For every footprint in `sources`, the H0 footprints its polygon intersects.
///
/// Shared boundary counts as overlap. `h0_index` narrows candidates by envelope.
pub fn h0_overlaps(footprints: &[Footprint], sources: &[usize], h0_index: &FootprintIndex) -> BucketOverlap {
    let overlaps = sources
        .iter()
        .map(|&src| {
            let poly = &footprints[src].polygon;
            let mut hits: Vec<usize> = h0_index
                .candidates_touching(poly)
                .into_iter()
                .filter(|&z| z != src && poly.intersects(&footprints[z].polygon))
                .collect();
            hits.sort_unstable();
            (src, hits)
        })
        .collect();
    BucketOverlap { overlaps }
}

/// `area(a ∩ b) / area(b)`.
pub fn overlap_ratio(a: &Footprint, b: &Footprint) -> f64 {
    if b.area() <= 0.0 {
        return 0.0;
    }
    let inter = a.polygon.intersection(&b.polygon).unsigned_area();
    (inter / b.area()).clamp(0.0, 1.0)
}

/// Percentage with a zero-safe denominator, clamped into `[0, 100]`.
pub fn os_tree_percent(os_tree: usize, n_reference: usize, skipped: usize, policy: DenominatorPolicy) -> f64 {
    let denom = match policy {
        DenominatorPolicy::SkipAdjusted => n_reference.saturating_sub(skipped),
        DenominatorPolicy::AllReferences => n_reference,
    };
    if denom == 0 {
        return 0.0;
    }
    (100.0 * os_tree as f64 / denom as f64).clamp(0.0, 100.0)
}

/// Run the detector over one classified footprint set.
pub fn detect(
    footprints: &[Footprint],
    classes: &Classification,
    matches: &MatchSet,
    policy: DenominatorPolicy,
    ctx: &RunContext,
) -> OverSegmentation {
    let h0 = classes.members(Bucket::H0);
    let index = FootprintIndex::from_subset(footprints, h0.iter().copied());

    let h1 = h0_overlaps(footprints, classes.members(Bucket::H1), &index);
    let h2 = h0_overlaps(footprints, classes.members(Bucket::H2), &index);
    let h3 = h0_overlaps(footprints, classes.members(Bucket::H3), &index);
    let h4_plus = h0_overlaps(footprints, classes.members(Bucket::H4Plus), &index);

    let ratios: Vec<f64> = h1
        .pairs()
        .map(|(src, z)| overlap_ratio(&footprints[src], &footprints[z]))
        .collect();
    let overlap_ratio_mean = if ratios.is_empty() {
        0.0
    } else {
        ratios.iter().sum::<f64>() / ratios.len() as f64
    };

    let os_tree = h1.contaminated();
    let os_tree_pct = os_tree_percent(os_tree, matches.per_reference.len(), matches.skipped(), policy);
    let os_avg_per_tree = h1.avg_per_contaminated();

    tracing::debug!(
        parent: ctx.span(),
        h0 = h0.len(),
        os_tree,
        os_tree_pct,
        os_avg_per_tree,
        "over-segmentation detected"
    );

    OverSegmentation { h1, h2, h3, h4_plus, os_tree, os_tree_pct, os_avg_per_tree, overlap_ratio_mean }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;
    use crate::cluster::Cluster;
    use crate::footprint::build_footprint;
    use crate::matching::{match_references, ContainmentPolicy};
    use crate::reference::ReferencePoint;
    use approx::assert_relative_eq;

    fn square(id: i64, x0: f64, y0: f64, side: f64) -> Footprint {
        let pts = vec![[x0, y0, 0.0], [x0 + side, y0, 0.0], [x0 + side, y0 + side, 0.0], [x0, y0 + side, 0.0]];
        build_footprint(&Cluster::new(id, pts), 3).unwrap()
    }

    fn run(fps: &[Footprint], refs: &[ReferencePoint], policy: DenominatorPolicy) -> (Classification, OverSegmentation) {
        let ctx = RunContext::default();
        let m = match_references(fps, refs, ContainmentPolicy::Inclusive, &ctx);
        let c = classify(&m.per_footprint);
        let os = detect(fps, &c, &m, policy, &ctx);
        (c, os)
    }

    #[test]
    fn h1_overlapping_one_h0_counts_once() {
        // H1 footprint [0,4]² and an empty fragment [3,5]² overlapping its corner.
        let fps = vec![square(1, 0.0, 0.0, 4.0), square(2, 3.0, 3.0, 2.0)];
        let refs = vec![ReferencePoint::new(10, Some("Acer"), 1.0, 1.0)];
        let (c, os) = run(&fps, &refs, DenominatorPolicy::SkipAdjusted);

        assert_eq!(c.count(Bucket::H1), 1);
        assert_eq!(c.count(Bucket::H0), 1);
        assert_eq!(os.os_tree, 1);
        assert_relative_eq!(os.os_avg_per_tree, 1.0);
        assert_relative_eq!(os.os_tree_pct, 100.0);
        assert_eq!(os.h1.overlaps, vec![(0, vec![1])]);
        // Intersection [3,4]² = 1, H0 area 4.
        assert_relative_eq!(os.overlap_ratio_mean, 0.25, epsilon = 1e-9);
    }

    #[test]
    fn four_references_in_one_footprint_is_not_over_segmentation() {
        let fps = vec![square(1, 0.0, 0.0, 10.0), square(2, 9.0, 9.0, 3.0)];
        let refs: Vec<ReferencePoint> = [(1.0, 1.0), (2.0, 8.0), (8.0, 2.0), (5.0, 5.0)]
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| ReferencePoint::new(i as i64, Some("Tilia"), x, y))
            .collect();
        let (c, os) = run(&fps, &refs, DenominatorPolicy::SkipAdjusted);
        assert_eq!(c.count(Bucket::H4Plus), 1);
        assert_eq!(c.multi(), 1);
        assert_eq!(os.os_tree, 0);
        assert_eq!(os.h4_plus.contaminated(), 1);
        assert_relative_eq!(os.h4_plus.avg_per_contaminated(), 1.0);
    }

    #[test]
    fn touching_boundary_counts_as_overlap() {
        let fps = vec![square(1, 0.0, 0.0, 2.0), square(2, 2.0, 0.0, 2.0), square(3, 10.0, 10.0, 1.0)];
        let refs = vec![ReferencePoint::new(1, None, 0.5, 0.5)];
        let (_, os) = run(&fps, &refs, DenominatorPolicy::SkipAdjusted);
        assert_eq!(os.h1.overlaps, vec![(0, vec![1])]);
        assert_relative_eq!(os.overlap_ratio_mean, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn envelope_overlap_alone_is_not_enough() {
        // Two triangles whose bounding boxes overlap but whose interiors do not.
        let a = build_footprint(&Cluster::new(1, vec![[0.0, 0.0, 0.0], [4.0, 0.0, 0.0], [0.0, 4.0, 0.0]]), 3).unwrap();
        let b = build_footprint(&Cluster::new(2, vec![[4.0, 4.0, 0.0], [4.0, 2.5, 0.0], [2.5, 4.0, 0.0]]), 3).unwrap();
        let refs = vec![ReferencePoint::new(1, None, 0.5, 0.5)];
        let (_, os) = run(&[a, b], &refs, DenominatorPolicy::SkipAdjusted);
        assert_eq!(os.os_tree, 0);
        assert_eq!(os.os_avg_per_tree, 0.0);
    }

    #[test]
    fn no_h0_means_zero_percent() {
        let fps = vec![square(1, 0.0, 0.0, 2.0), square(2, 1.0, 1.0, 2.0)];
        let refs = vec![ReferencePoint::new(1, None, 0.5, 0.5), ReferencePoint::new(2, None, 2.5, 2.5)];
        let (c, os) = run(&fps, &refs, DenominatorPolicy::AllReferences);
        assert_eq!(c.count(Bucket::H0), 0);
        assert_eq!(os.os_tree, 0);
        assert_eq!(os.os_tree_pct, 0.0);
    }

    #[test]
    fn percent_denominators() {
        assert_relative_eq!(os_tree_percent(2, 10, 6, DenominatorPolicy::SkipAdjusted), 50.0);
        assert_relative_eq!(os_tree_percent(2, 10, 6, DenominatorPolicy::AllReferences), 20.0);
        assert_eq!(os_tree_percent(0, 5, 5, DenominatorPolicy::SkipAdjusted), 0.0);
        assert_eq!(os_tree_percent(3, 0, 0, DenominatorPolicy::AllReferences), 0.0);
        for os in 0..20 {
            for skip in 0..10 {
                let p = os_tree_percent(os, 10, skip, DenominatorPolicy::SkipAdjusted);
                assert!((0.0..=100.0).contains(&p));
            }
        }
    }
}
