//! Planar extent of the input point cloud.
//!
//! The extent serves two purposes: reference points outside it are dropped before
//! matching, and its point count is the denominator of the point-loss metric.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::InputError;

/// Axis-aligned bounding box plus point count of a point cloud.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointCloudExtent {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
    pub point_count: usize,
}

impl PointCloudExtent {
    pub fn new(min_x: f64, max_x: f64, min_y: f64, max_y: f64, point_count: usize) -> Self {
        Self { min_x, max_x, min_y, max_y, point_count }
    }

    /// Extent of an iterator of (x, y) pairs. Returns None for an empty iterator.
    pub fn from_xy<I: IntoIterator<Item = (f64, f64)>>(points: I) -> Option<Self> {
        let mut ext: Option<Self> = None;
        for (x, y) in points {
            Self::grow(&mut ext, x, y);
        }
        ext
    }

    /// Widen `ext` to cover one more point, starting it on the first.
    pub fn grow(ext: &mut Option<Self>, x: f64, y: f64) {
        match ext.as_mut() {
            None => *ext = Some(Self::new(x, x, y, y, 1)),
            Some(e) => {
                e.min_x = e.min_x.min(x);
                e.max_x = e.max_x.max(x);
                e.min_y = e.min_y.min(y);
                e.max_y = e.max_y.max(y);
                e.point_count += 1;
            }
        }
    }

    /// Scan a whitespace-separated `x y z [...]` point file, the same file handed to
    /// the segmenter. Blank lines are ignored; any other unparsable line is an error.
    pub fn load_xyz(path: &Path) -> Result<Self, InputError> {
        let io_err = |source| InputError::Io { path: path.to_path_buf(), source };
        let reader = BufReader::new(File::open(path).map_err(io_err)?);

        let mut coords = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line.map_err(io_err)?;
            let mut cols = line.split_whitespace();
            let (Some(xs), Some(ys)) = (cols.next(), cols.next()) else {
                if line.trim().is_empty() {
                    continue;
                }
                return Err(InputError::Malformed {
                    path: path.to_path_buf(),
                    line: i + 1,
                    reason: "expected at least x and y columns".into(),
                });
            };
            let parse = |s: &str| {
                s.parse::<f64>().map_err(|e| InputError::Malformed {
                    path: path.to_path_buf(),
                    line: i + 1,
                    reason: format!("`{s}`: {e}"),
                })
            };
            coords.push((parse(xs)?, parse(ys)?));
        }

        Self::from_xy(coords).ok_or_else(|| InputError::EmptyPointCloud(path.to_path_buf()))
    }

    /// Inclusive containment: points on the box edge are inside.
    #[inline]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn from_xy_tracks_bounds_and_count() {
        let ext = PointCloudExtent::from_xy([(1.0, 5.0), (-2.0, 3.0), (4.0, 9.0)]).unwrap();
        assert_eq!(ext, PointCloudExtent::new(-2.0, 4.0, 3.0, 9.0, 3));
        assert!(PointCloudExtent::from_xy(std::iter::empty()).is_none());
    }

    #[test]
    fn contains_is_edge_inclusive() {
        let ext = PointCloudExtent::new(0.0, 10.0, 0.0, 5.0, 1);
        assert!(ext.contains(0.0, 0.0));
        assert!(ext.contains(10.0, 5.0));
        assert!(ext.contains(3.0, 2.0));
        assert!(!ext.contains(10.0001, 2.0));
        assert!(!ext.contains(3.0, -0.5));
    }

    #[test]
    fn load_xyz_skips_blank_lines_and_extra_columns() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "1.0 2.0 3.0 255 0 0").unwrap();
        writeln!(f).unwrap();
        writeln!(f, "  4.5\t-1.0 0.0").unwrap();
        let ext = PointCloudExtent::load_xyz(f.path()).unwrap();
        assert_eq!(ext.point_count, 2);
        assert_eq!((ext.min_x, ext.max_x, ext.min_y, ext.max_y), (1.0, 4.5, -1.0, 2.0));
    }

    #[test]
    fn load_xyz_rejects_garbage_and_empty_files() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "1.0 abc 3.0").unwrap();
        assert!(matches!(
            PointCloudExtent::load_xyz(f.path()),
            Err(InputError::Malformed { line: 1, .. })
        ));

        let empty = tempfile::NamedTempFile::new().unwrap();
        assert!(matches!(
            PointCloudExtent::load_xyz(empty.path()),
            Err(InputError::EmptyPointCloud(_))
        ));
    }
}
