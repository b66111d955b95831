//! Geometry builder: one convex footprint polygon per cluster.
//!
//! Clusters that are too small, or whose points are collinear or coincident, do not
//! get a footprint. They are returned as [`Degenerate`] records so the caller can
//! count the lost points; a zero-area polygon never reaches matching or overlap tests.

use geo::{Area, BoundingRect, Centroid, ConvexHull, MultiPoint, Point, Polygon};

use crate::cluster::Cluster;
use crate::context::RunContext;

/// Default minimum number of points for a cluster to get a footprint.
pub const DEFAULT_MIN_CLUSTER_POINTS: usize = 3;

/// Hull area below `MIN_RELATIVE_AREA * diagonal²` counts as collinear.
const MIN_RELATIVE_AREA: f64 = 1e-9;

/// Convex hull of one cluster's (x, y) projection.
#[derive(Debug, Clone, PartialEq)]
pub struct Footprint {
    pub cluster_id: i64,
    pub polygon: Polygon<f64>,
    /// Number of cluster points the hull was built from.
    pub point_count: usize,
    area: f64,
    centroid: Point<f64>,
}

impl Footprint {
    /// Wrap an existing polygon, e.g. one read back from an export.
    /// Returns None if the polygon has no positive area.
    pub fn from_polygon(cluster_id: i64, polygon: Polygon<f64>, point_count: usize) -> Option<Self> {
        let area = polygon.unsigned_area();
        let rect = polygon.bounding_rect()?;
        let diag2 = rect.width().powi(2) + rect.height().powi(2);
        if !(area > MIN_RELATIVE_AREA * diag2) {
            return None;
        }
        let centroid = polygon.centroid()?;
        Some(Self { cluster_id, polygon, point_count, area, centroid })
    }

    pub fn area(&self) -> f64 {
        self.area
    }

    /// Area centroid of the polygon.
    pub fn centroid(&self) -> Point<f64> {
        self.centroid
    }
}

/// Why a cluster produced no footprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Degenerate {
    TooFewPoints { cluster_id: i64, point_count: usize },
    Collinear { cluster_id: i64, point_count: usize },
}

impl Degenerate {
    pub fn cluster_id(&self) -> i64 {
        match *self {
            Degenerate::TooFewPoints { cluster_id, .. } | Degenerate::Collinear { cluster_id, .. } => {
                cluster_id
            }
        }
    }

    pub fn point_count(&self) -> usize {
        match *self {
            Degenerate::TooFewPoints { point_count, .. } | Degenerate::Collinear { point_count, .. } => {
                point_count
            }
        }
    }
}

/// Build the footprint of a single cluster.
pub fn build_footprint(cluster: &Cluster, min_points: usize) -> Result<Footprint, Degenerate> {
    let point_count = cluster.len();
    if point_count < min_points.max(3) {
        return Err(Degenerate::TooFewPoints { cluster_id: cluster.id, point_count });
    }

    let mp: MultiPoint<f64> = cluster.points.iter().map(|p| Point::new(p[0], p[1])).collect();
    let hull = mp.convex_hull();
    Footprint::from_polygon(cluster.id, hull, point_count)
        .ok_or(Degenerate::Collinear { cluster_id: cluster.id, point_count })
}

/// Footprints of one segmentation run plus the clusters that were left out.
#[derive(Debug, Clone, Default)]
pub struct FootprintSet {
    pub footprints: Vec<Footprint>,
    pub dropped: Vec<Degenerate>,
}

impl FootprintSet {
    /// Points that ended up inside some footprint's cluster.
    pub fn footprint_points(&self) -> usize {
        self.footprints.iter().map(|f| f.point_count).sum()
    }

    pub fn dropped_points(&self) -> usize {
        self.dropped.iter().map(Degenerate::point_count).sum()
    }
}

/// Build footprints for every cluster, keeping cluster order.
pub fn build_footprints(clusters: &[Cluster], min_points: usize, ctx: &RunContext) -> FootprintSet {
    let mut set = FootprintSet::default();
    for cluster in clusters {
        match build_footprint(cluster, min_points) {
            Ok(fp) => set.footprints.push(fp),
            Err(d) => {
                match d {
                    Degenerate::TooFewPoints { cluster_id, point_count } => tracing::warn!(
                        parent: ctx.span(),
                        cluster_id,
                        point_count,
                        "cluster below footprint threshold, skipped"
                    ),
                    Degenerate::Collinear { cluster_id, point_count } => tracing::warn!(
                        parent: ctx.span(),
                        cluster_id,
                        point_count,
                        "cluster hull has zero area, skipped"
                    ),
                }
                set.dropped.push(d);
            }
        }
    }
    if !set.dropped.is_empty() {
        tracing::info!(
            parent: ctx.span(),
            kept = set.footprints.len(),
            dropped = set.dropped.len(),
            dropped_points = set.dropped_points(),
            "footprints built"
        );
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn cluster(id: i64, xy: &[(f64, f64)]) -> Cluster {
        Cluster::new(id, xy.iter().map(|&(x, y)| [x, y, 0.0]).collect())
    }

    #[test]
    fn square_cluster_gives_unit_square_hull() {
        let c = cluster(4, &[(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.5, 0.5)]);
        let fp = build_footprint(&c, 3).unwrap();
        assert_eq!(fp.cluster_id, 4);
        assert_eq!(fp.point_count, 5);
        assert_relative_eq!(fp.area(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(fp.centroid().x(), 0.5, epsilon = 1e-12);
        assert_relative_eq!(fp.centroid().y(), 0.5, epsilon = 1e-12);
    }

    #[test]
    fn z_is_ignored() {
        let mut c = cluster(1, &[(0.0, 0.0), (2.0, 0.0), (0.0, 2.0)]);
        c.points[0][2] = 50.0;
        c.points[2][2] = -3.0;
        assert_relative_eq!(build_footprint(&c, 3).unwrap().area(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn small_clusters_are_dropped() {
        let c = cluster(9, &[(0.0, 0.0), (1.0, 1.0)]);
        assert_eq!(
            build_footprint(&c, 3),
            Err(Degenerate::TooFewPoints { cluster_id: 9, point_count: 2 })
        );
        // A threshold below three is raised to three: two points never make a polygon.
        assert!(build_footprint(&c, 1).is_err());
    }

    #[test]
    fn collinear_and_coincident_points_are_degenerate() {
        let line = cluster(2, &[(0.0, 0.0), (1.0, 1.0), (2.0, 2.0), (3.5, 3.5)]);
        assert_eq!(
            build_footprint(&line, 3),
            Err(Degenerate::Collinear { cluster_id: 2, point_count: 4 })
        );
        let dot = cluster(3, &[(5.0, 5.0), (5.0, 5.0), (5.0, 5.0)]);
        assert!(matches!(build_footprint(&dot, 3), Err(Degenerate::Collinear { .. })));
    }

    #[test]
    fn build_footprints_never_exceeds_cluster_count() {
        let clusters = vec![
            cluster(1, &[(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)]),
            cluster(2, &[(0.0, 0.0)]),
            cluster(3, &[(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)]),
            cluster(4, &[(3.0, 3.0), (4.0, 3.0), (4.0, 4.0), (3.0, 4.0)]),
        ];
        let set = build_footprints(&clusters, 3, &RunContext::default());
        assert!(set.footprints.len() <= clusters.len());
        let ids: Vec<i64> = set.footprints.iter().map(|f| f.cluster_id).collect();
        assert_eq!(ids, vec![1, 4]);
        assert_eq!(set.dropped.len(), 2);
        assert_eq!(set.footprint_points(), 7);
        assert_eq!(set.dropped_points(), 4);
        assert!(set.footprints.iter().all(|f| f.area() > 0.0));
    }

    #[derive(Clone, Default)]
    struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn small_clusters_are_reported_as_warnings() {
        let log = Captured::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, || {
            let clusters = vec![cluster(9, &[(0.0, 0.0), (1.0, 1.0)])];
            build_footprints(&clusters, 3, &RunContext::default())
        });

        let text = String::from_utf8(log.0.lock().unwrap().clone()).unwrap();
        assert!(text.contains("WARN"), "{text}");
        assert!(text.contains("below footprint threshold"), "{text}");
        assert!(text.contains("cluster_id=9"), "{text}");
    }
}
