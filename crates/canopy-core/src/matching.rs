//! Spatial matcher: which reference points fall inside which footprints.

use geo::{Contains, EuclideanDistance, Intersects};
use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::footprint::Footprint;
use crate::reference::ReferencePoint;
use crate::spatial::FootprintIndex;

/// Whether a reference point lying exactly on a footprint edge counts as contained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainmentPolicy {
    /// Interior or boundary.
    #[default]
    Inclusive,
    /// Interior only.
    Interior,
}

/// One footprint/reference containment relation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchEdge {
    /// Index into the footprint slice.
    pub footprint: usize,
    /// Index into the reference slice.
    pub reference: usize,
    /// Distance from the footprint centroid to the reference point.
    pub distance: f64,
}

/// All match edges of one run plus per-side multiplicities.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchSet {
    /// Sorted by `(footprint, reference)`.
    pub edges: Vec<MatchEdge>,
    /// Number of edges per footprint, indexed like the footprint slice.
    pub per_footprint: Vec<usize>,
    /// Number of edges per reference, indexed like the reference slice.
    pub per_reference: Vec<usize>,
}

impl MatchSet {
    /// Reference points contained in no footprint.
    pub fn skipped(&self) -> usize {
        self.per_reference.iter().filter(|&&n| n == 0).count()
    }

    /// Reference points contained in more than one footprint.
    pub fn shared_references(&self) -> usize {
        self.per_reference.iter().filter(|&&n| n > 1).count()
    }

    /// Histogram of containing-footprint counts per reference: `[0, 1, 2, 3, 4+]`.
    pub fn reference_coverage(&self) -> [usize; 5] {
        let mut hist = [0usize; 5];
        for &n in &self.per_reference {
            hist[n.min(4)] += 1;
        }
        hist
    }

    /// Edges of one footprint, in reference order.
    pub fn edges_of(&self, footprint: usize) -> &[MatchEdge] {
        let start = self.edges.partition_point(|e| e.footprint < footprint);
        let end = self.edges.partition_point(|e| e.footprint <= footprint);
        &self.edges[start..end]
    }

    /// Whether any reference of `footprint` is also contained in another footprint.
    pub fn is_shared(&self, footprint: usize) -> bool {
        self.edges_of(footprint).iter().any(|e| self.per_reference[e.reference] > 1)
    }
}

/// Join references against footprints.
///
/// Candidates come from an R-tree over footprint envelopes; each candidate then gets
/// the exact point-in-polygon test selected by `policy`.
pub fn match_references(
    footprints: &[Footprint],
    references: &[ReferencePoint],
    policy: ContainmentPolicy,
    ctx: &RunContext,
) -> MatchSet {
    let index = FootprintIndex::new(footprints);
    let mut edges = Vec::new();

    for (ri, reference) in references.iter().enumerate() {
        let p = reference.location;
        for fi in index.candidates_at(p.0) {
            let fp = &footprints[fi];
            let inside = match policy {
                ContainmentPolicy::Inclusive => fp.polygon.intersects(&p),
                ContainmentPolicy::Interior => fp.polygon.contains(&p),
            };
            if inside {
                edges.push(MatchEdge {
                    footprint: fi,
                    reference: ri,
                    distance: fp.centroid().euclidean_distance(&p),
                });
            }
        }
    }
    edges.sort_by_key(|e| (e.footprint, e.reference));

    let mut per_footprint = vec![0usize; footprints.len()];
    let mut per_reference = vec![0usize; references.len()];
    for e in &edges {
        per_footprint[e.footprint] += 1;
        per_reference[e.reference] += 1;
    }

    let set = MatchSet { edges, per_footprint, per_reference };
    tracing::debug!(
        parent: ctx.span(),
        footprints = footprints.len(),
        references = references.len(),
        edges = set.edges.len(),
        skipped = set.skipped(),
        "reference points matched"
    );
    set
}
