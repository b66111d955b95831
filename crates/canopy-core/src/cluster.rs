//! Segmenter output: per-point `(cluster_id, x, y, z)` table grouped into clusters.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::SegmentationError;
use crate::extent::PointCloudExtent;

/// Label the segmenter assigns to points that belong to no tree.
pub const DEFAULT_NOISE_LABEL: i64 = -1;

/// Points sharing one segmentation-derived identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Cluster {
    pub id: i64,
    /// `[x, y, z]` in input order. Only x and y feed the footprint geometry.
    pub points: Vec<[f64; 3]>,
}

impl Cluster {
    pub fn new(id: i64, points: Vec<[f64; 3]>) -> Self {
        Self { id, points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// A parsed segmentation table.
#[derive(Debug, Clone, Default)]
pub struct SegmentationTable {
    /// Clusters ordered by id.
    pub clusters: Vec<Cluster>,
    /// Total rows read, noise rows included.
    pub point_count: usize,
    /// Rows carrying the noise label; these never become clusters.
    pub noise_points: usize,
    /// Planar extent of every row, noise included. The table is a labelled copy of
    /// the input cloud, so this is the cloud's extent.
    pub extent: Option<PointCloudExtent>,
}

impl SegmentationTable {
    /// Group `(id, x, y, z)` rows into clusters ordered by id.
    pub fn from_rows<I>(rows: I, noise_label: Option<i64>) -> Self
    where
        I: IntoIterator<Item = (i64, [f64; 3])>,
    {
        let mut groups: BTreeMap<i64, Vec<[f64; 3]>> = BTreeMap::new();
        let mut point_count = 0usize;
        let mut noise_points = 0usize;
        let mut extent = None;
        for (id, p) in rows {
            point_count += 1;
            PointCloudExtent::grow(&mut extent, p[0], p[1]);
            if Some(id) == noise_label {
                noise_points += 1;
                continue;
            }
            groups.entry(id).or_default().push(p);
        }
        let clusters = groups.into_iter().map(|(id, points)| Cluster::new(id, points)).collect();
        Self { clusters, point_count, noise_points, extent }
    }

    /// Read the whitespace-separated table written by the segmenter.
    ///
    /// Extra trailing columns (colour, intensity, ...) are ignored. An empty file or
    /// any row with fewer than four parsable leading columns fails the unit.
    pub fn read(path: &Path, noise_label: Option<i64>) -> Result<Self, SegmentationError> {
        if !path.exists() {
            return Err(SegmentationError::MissingOutput(path.to_path_buf()));
        }
        let io_err = |source| SegmentationError::Io { path: path.to_path_buf(), source };
        let reader = BufReader::new(File::open(path).map_err(io_err)?);

        let mut rows = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line.map_err(io_err)?;
            if line.trim().is_empty() {
                continue;
            }
            rows.push(parse_row(&line).map_err(|reason| SegmentationError::Malformed {
                path: path.to_path_buf(),
                line: i + 1,
                reason,
            })?);
        }

        if rows.is_empty() {
            return Err(SegmentationError::EmptyOutput(path.to_path_buf()));
        }
        Ok(Self::from_rows(rows, noise_label))
    }

    /// Rows that ended up in a cluster (noise excluded).
    pub fn clustered_points(&self) -> usize {
        self.point_count - self.noise_points
    }
}

fn parse_row(line: &str) -> Result<(i64, [f64; 3]), String> {
    let mut cols = line.split_whitespace();
    let mut next = |name: &str| cols.next().ok_or_else(|| format!("missing {name} column"));

    let id_str = next("cluster_id")?;
    let id = match id_str.parse::<i64>() {
        Ok(id) => id,
        // Some writers emit integral ids as floats ("12.0").
        Err(_) => match id_str.parse::<f64>() {
            Ok(v) if v.fract() == 0.0 && v.is_finite() => v as i64,
            _ => return Err(format!("cluster_id `{id_str}` is not an integer")),
        },
    };

    let mut xyz = [0.0f64; 3];
    for (slot, name) in xyz.iter_mut().zip(["x", "y", "z"]) {
        let s = next(name)?;
        *slot = s.parse::<f64>().map_err(|e| format!("{name} `{s}`: {e}"))?;
    }
    Ok((id, xyz))
}
