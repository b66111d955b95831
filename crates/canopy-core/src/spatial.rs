//! R-tree over footprint bounding boxes.
//!
//! The tree only narrows candidates by envelope; callers run the exact polygon
//! predicate on what it returns.

use geo::{BoundingRect, Coord, Polygon};
use rstar::{RTree, RTreeObject, AABB};

use crate::footprint::Footprint;

/// Bounding box of one footprint, tagged with its index in the footprint slice.
#[derive(Clone, Debug)]
pub struct IndexedEnvelope {
    pub index: usize,
    envelope: AABB<[f64; 2]>,
}

impl IndexedEnvelope {
    fn new(index: usize, polygon: &Polygon<f64>) -> Option<Self> {
        let rect = polygon.bounding_rect()?;
        let (min, max) = (rect.min(), rect.max());
        Some(Self { index, envelope: AABB::from_corners([min.x, min.y], [max.x, max.y]) })
    }
}

impl RTreeObject for IndexedEnvelope {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Envelope index over a subset of a footprint slice.
pub struct FootprintIndex {
    tree: RTree<IndexedEnvelope>,
}

impl FootprintIndex {
    /// Index every footprint.
    pub fn new(footprints: &[Footprint]) -> Self {
        Self::from_subset(footprints, 0..footprints.len())
    }

    /// Index only the footprints at `indices`; query results refer to positions in
    /// `footprints`, not in `indices`.
    pub fn from_subset<I>(footprints: &[Footprint], indices: I) -> Self
    where
        I: IntoIterator<Item = usize>,
    {
        let items: Vec<IndexedEnvelope> = indices
            .into_iter()
            .filter_map(|i| IndexedEnvelope::new(i, &footprints[i].polygon))
            .collect();
        Self { tree: RTree::bulk_load(items) }
    }

    pub fn len(&self) -> usize {
        self.tree.size()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Footprints whose envelope contains `c` (edge inclusive).
    pub fn candidates_at(&self, c: Coord<f64>) -> impl Iterator<Item = usize> + '_ {
        let query = AABB::from_point([c.x, c.y]);
        self.tree.locate_in_envelope_intersecting(&query).map(|e| e.index)
    }

    /// Footprints whose envelope touches the envelope of `polygon`.
    pub fn candidates_touching(&self, polygon: &Polygon<f64>) -> Vec<usize> {
        let Some(rect) = polygon.bounding_rect() else {
            return Vec::new();
        };
        let query = AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);
        self.tree.locate_in_envelope_intersecting(&query).map(|e| e.index).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Cluster;
    use crate::footprint::build_footprint;
    use geo::coord;

    fn square(id: i64, x0: f64, y0: f64, side: f64) -> Footprint {
        let pts = vec![[x0, y0, 0.0], [x0 + side, y0, 0.0], [x0 + side, y0 + side, 0.0], [x0, y0 + side, 0.0]];
        build_footprint(&Cluster::new(id, pts), 3).unwrap()
    }

    #[test]
    fn point_query_returns_envelopes_containing_point() {
        let fps = vec![square(1, 0.0, 0.0, 2.0), square(2, 1.0, 1.0, 2.0), square(3, 10.0, 10.0, 1.0)];
        let index = FootprintIndex::new(&fps);
        assert_eq!(index.len(), 3);

        let mut hits: Vec<usize> = index.candidates_at(coord! { x: 1.5, y: 1.5 }).collect();
        hits.sort_unstable();
        assert_eq!(hits, vec![0, 1]);

        // Envelope edge counts.
        let hits: Vec<usize> = index.candidates_at(coord! { x: 11.0, y: 10.5 }).collect();
        assert_eq!(hits, vec![2]);
        assert_eq!(index.candidates_at(coord! { x: 5.0, y: 5.0 }).count(), 0);
    }

    #[test]
    fn subset_index_reports_full_set_positions() {
        let fps = vec![square(1, 0.0, 0.0, 1.0), square(2, 5.0, 5.0, 1.0), square(3, 5.5, 5.5, 1.0)];
        let index = FootprintIndex::from_subset(&fps, [0, 2]);
        assert_eq!(index.len(), 2);
        let hits = index.candidates_touching(&fps[1].polygon);
        assert_eq!(hits, vec![2]);
    }
}
