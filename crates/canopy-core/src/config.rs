//! Sweep configuration: the parameter grid, inputs, and evaluation policies.

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cluster::DEFAULT_NOISE_LABEL;
use crate::error::InputError;
use crate::footprint::DEFAULT_MIN_CLUSTER_POINTS;
use crate::matching::ContainmentPolicy;
use crate::overseg::DenominatorPolicy;
use crate::reference::ReferenceFields;
use crate::store::WriteMode;

// ── Parameter triple ─────────────────────────────────────────────────────────

/// Segmenter parameters of one sweep unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamTriple {
    /// Clustering radius.
    pub radius: f64,
    /// Vertical resolution.
    pub vres: f64,
    /// Minimum points per cluster.
    pub min_points: u32,
}

impl ParamTriple {
    pub fn new(radius: f64, vres: f64, min_points: u32) -> Self {
        Self { radius, vres, min_points }
    }

    /// Hashable identity. `-0.0` and `0.0` are the same key.
    pub fn key(&self) -> ParamKey {
        let bits = |v: f64| if v == 0.0 { 0 } else { v.to_bits() };
        ParamKey(bits(self.radius), bits(self.vres), self.min_points)
    }
}

impl fmt::Display for ParamTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R={} Vres={} minP={}", self.radius, self.vres, self.min_points)
    }
}

/// Exact-bit key of a [`ParamTriple`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamKey(u64, u64, u32);

/// One unit of the sweep grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitSpec {
    /// Position in the grid; stable for an unchanged config.
    pub it_id: usize,
    pub params: ParamTriple,
}

// ── Config file ──────────────────────────────────────────────────────────────

/// Sweep configuration as read from JSON. Every field has a default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Name of the run; used as the logging scope.
    pub name: String,
    /// Point cloud handed to the segmenter, `x y z [...]` per line.
    pub input_xyz: PathBuf,
    /// Reference trees (GeoJSON points).
    pub reference: PathBuf,
    pub reference_fields: ReferenceFields,
    /// Segmenter executable: `exe input output radius vres min_points`.
    pub segmenter: PathBuf,
    /// Arguments placed before the positional ones, e.g. a script for an interpreter.
    pub segmenter_args: Vec<String>,
    /// Kill the segmenter after this many seconds.
    pub timeout_secs: Option<u64>,
    /// Per-unit segmentation tables and footprint exports.
    pub output_dir: PathBuf,
    /// Result store. Relative paths resolve against `output_dir`.
    pub results_csv: PathBuf,

    pub radius: Vec<f64>,
    pub vres: Vec<f64>,
    pub min_points: Vec<u32>,

    /// Worker threads; defaults to available cores.
    pub workers: Option<usize>,
    /// Re-run triples that already have a row and supersede it.
    pub overwrite: bool,
    /// Delete the per-unit segmentation table after a successful unit.
    pub delete_intermediate: bool,
    /// Write labelled footprints per unit.
    pub export_footprints: bool,
    /// Re-analyse earlier footprint exports instead of running the segmenter.
    pub reuse_footprint_exports: bool,

    pub containment: ContainmentPolicy,
    pub denominator: DenominatorPolicy,
    /// Clusters below this size get no footprint. Never lower than 3.
    pub min_cluster_points: usize,
    /// Segmenter label for unclustered points; `null` keeps every id.
    pub noise_label: Option<i64>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            name: "sweep".into(),
            input_xyz: PathBuf::from("data/forest.xyz"),
            reference: PathBuf::from("data/reference_trees.geojson"),
            reference_fields: ReferenceFields::default(),
            segmenter: PathBuf::from("segmenter"),
            segmenter_args: Vec::new(),
            timeout_secs: None,
            output_dir: PathBuf::from("output"),
            results_csv: PathBuf::from("results.csv"),
            radius: vec![1.0],
            vres: vec![0.5],
            min_points: vec![10],
            workers: None,
            overwrite: false,
            delete_intermediate: false,
            export_footprints: false,
            reuse_footprint_exports: false,
            containment: ContainmentPolicy::default(),
            denominator: DenominatorPolicy::default(),
            min_cluster_points: DEFAULT_MIN_CLUSTER_POINTS,
            noise_label: Some(DEFAULT_NOISE_LABEL),
        }
    }
}

impl SweepConfig {
    pub fn load(path: &Path) -> Result<Self, InputError> {
        let text = fs::read_to_string(path).map_err(|source| InputError::Io { path: path.to_path_buf(), source })?;
        serde_json::from_str(&text).map_err(|source| InputError::Json { path: path.to_path_buf(), source })
    }

    /// Cartesian product of the grid, radius outermost, min_points innermost.
    /// Repeated triples appear once.
    pub fn units(&self) -> Vec<UnitSpec> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(self.radius.len() * self.vres.len() * self.min_points.len());
        for &r in &self.radius {
            for &v in &self.vres {
                for &m in &self.min_points {
                    let params = ParamTriple::new(r, v, m);
                    if seen.insert(params.key()) {
                        out.push(UnitSpec { it_id: out.len(), params });
                    }
                }
            }
        }
        out
    }

    pub fn write_mode(&self) -> WriteMode {
        if self.overwrite {
            WriteMode::Supersede
        } else {
            WriteMode::Skip
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn results_path(&self) -> PathBuf {
        if self.results_csv.is_absolute() {
            self.results_csv.clone()
        } else {
            self.output_dir.join(&self.results_csv)
        }
    }

    /// Segmentation table written by the segmenter for one unit.
    pub fn segmentation_path(&self, it_id: usize) -> PathBuf {
        self.output_dir.join(format!("segmentation_{it_id}.xyz"))
    }

    /// Labelled footprint export of one unit.
    pub fn footprint_export_path(&self, it_id: usize) -> PathBuf {
        self.output_dir.join(format!("segmentation_hulls_{it_id}.geojson"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: SweepConfig = serde_json::from_str(
            r#"{
                "name": "plot7",
                "radius": [0.5, 1.0],
                "vres": [0.25],
                "min_points": [5, 10, 20],
                "containment": "interior",
                "denominator": "all_references",
                "reference_fields": {"species_field": "soort"}
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.name, "plot7");
        assert_eq!(cfg.containment, ContainmentPolicy::Interior);
        assert_eq!(cfg.denominator, DenominatorPolicy::AllReferences);
        assert_eq!(cfg.reference_fields.species_field, "soort");
        assert_eq!(cfg.reference_fields.id_field, "OBJECTID");
        assert_eq!(cfg.noise_label, Some(-1));
        assert_eq!(cfg.min_cluster_points, 3);
        assert_eq!(cfg.write_mode(), WriteMode::Skip);
    }

    #[test]
    fn grid_order_and_ids() {
        let cfg = SweepConfig {
            radius: vec![0.5, 1.0],
            vres: vec![0.25],
            min_points: vec![5, 10],
            ..Default::default()
        };
        let units = cfg.units();
        assert_eq!(units.len(), 4);
        assert_eq!(units[0].params, ParamTriple::new(0.5, 0.25, 5));
        assert_eq!(units[1].params, ParamTriple::new(0.5, 0.25, 10));
        assert_eq!(units[3].params, ParamTriple::new(1.0, 0.25, 10));
        assert!(units.iter().enumerate().all(|(i, u)| u.it_id == i));

        let dup = SweepConfig { radius: vec![1.0, 1.0], vres: vec![0.5], min_points: vec![3], ..Default::default() };
        assert_eq!(dup.units().len(), 1);
    }

    #[test]
    fn keys_compare_exact_values() {
        assert_eq!(ParamTriple::new(0.1 + 0.2, 1.0, 3).key(), ParamTriple::new(0.1 + 0.2, 1.0, 3).key());
        assert_ne!(ParamTriple::new(0.3, 1.0, 3).key(), ParamTriple::new(0.1 + 0.2, 1.0, 3).key());
        assert_eq!(ParamTriple::new(-0.0, 1.0, 3).key(), ParamTriple::new(0.0, 1.0, 3).key());
    }

    #[test]
    fn relative_results_path_lands_in_output_dir() {
        let cfg = SweepConfig { output_dir: PathBuf::from("/tmp/out"), ..Default::default() };
        assert_eq!(cfg.results_path(), PathBuf::from("/tmp/out/results.csv"));
        assert_eq!(cfg.segmentation_path(4), PathBuf::from("/tmp/out/segmentation_4.xyz"));
    }

    #[test]
    fn missing_config_is_an_input_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(SweepConfig::load(&dir.path().join("nope.json")), Err(InputError::Io { .. })));
    }
}
