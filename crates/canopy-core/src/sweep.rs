//! Sweep orchestrator: run every parameter triple of the grid on a bounded worker
//! pool and persist one row per successful unit.
//!
//! Unit life cycle: `Pending → Running → {Succeeded, Failed, Skipped}`. A unit that
//! was never started because the sweep was cancelled stays `Pending`. Failures are
//! isolated to their unit; only input and store errors abort the sweep.

use std::fmt;
use std::fs;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rayon::prelude::*;

use crate::cluster::SegmentationTable;
use crate::config::{SweepConfig, UnitSpec};
use crate::context::RunContext;
use crate::error::{SegmentationError, StoreError, SweepError};
use crate::export::{labelled_features, read_footprints, write_footprints};
use crate::extent::PointCloudExtent;
use crate::footprint::build_footprints;
use crate::metrics::{evaluate, PointStats, SweepRow};
use crate::reference::{clip_to_extent, load_reference_points, ReferencePoint};
use crate::segmenter::Segmenter;
use crate::store::{Appended, ResultStore, WriteMode};

// ── Unit state ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl UnitState {
    pub const ALL: [UnitState; 5] =
        [UnitState::Pending, UnitState::Running, UnitState::Succeeded, UnitState::Failed, UnitState::Skipped];

    pub fn is_terminal(self) -> bool {
        matches!(self, UnitState::Succeeded | UnitState::Failed | UnitState::Skipped)
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            UnitState::Pending => "pending",
            UnitState::Running => "running",
            UnitState::Succeeded => "succeeded",
            UnitState::Failed => "failed",
            UnitState::Skipped => "skipped",
        })
    }
}

/// Final state of one unit.
#[derive(Debug, Clone)]
pub struct UnitOutcome {
    pub unit: UnitSpec,
    pub state: UnitState,
    /// The persisted row, for succeeded units.
    pub row: Option<SweepRow>,
    /// Failure message, for failed units.
    pub error: Option<String>,
}

impl UnitOutcome {
    fn new(unit: UnitSpec, state: UnitState) -> Self {
        Self { unit, state, row: None, error: None }
    }
}

/// Result of a whole sweep, outcomes in grid order.
#[derive(Debug, Clone, Default)]
pub struct SweepSummary {
    pub outcomes: Vec<UnitOutcome>,
    /// Superseded rows removed by the final compaction.
    pub compacted: usize,
}

impl SweepSummary {
    pub fn count(&self, state: UnitState) -> usize {
        self.outcomes.iter().filter(|o| o.state == state).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &UnitOutcome> {
        self.outcomes.iter().filter(|o| o.state == UnitState::Failed)
    }
}

// ── Sweep ────────────────────────────────────────────────────────────────────

pub struct Sweep {
    config: SweepConfig,
    segmenter: Box<dyn Segmenter>,
    store: ResultStore,
    extent: PointCloudExtent,
    references: Vec<ReferencePoint>,
    crs: Option<serde_json::Value>,
    cancel: Arc<AtomicBool>,
    store_failure: Mutex<Option<StoreError>>,
    ctx: RunContext,
}

impl Sweep {
    /// Load the shared inputs and open the result store. Any failure here is fatal.
    pub fn prepare(config: SweepConfig, segmenter: Box<dyn Segmenter>) -> Result<Self, SweepError> {
        let ctx = RunContext::new(config.name.clone());

        fs::create_dir_all(&config.output_dir)
            .map_err(|source| SweepError::OutputDir { path: config.output_dir.clone(), source })?;

        let extent = PointCloudExtent::load_xyz(&config.input_xyz)?;
        let layer = load_reference_points(&config.reference, &config.reference_fields)?;
        let references = clip_to_extent(layer.points, &extent, &ctx);
        let store = ResultStore::open(&config.results_path())?;

        tracing::info!(
            parent: ctx.span(),
            points = extent.point_count,
            references = references.len(),
            stored_rows = store.len(),
            "sweep inputs loaded"
        );

        Ok(Self {
            config,
            segmenter,
            store,
            extent,
            references,
            crs: layer.crs,
            cancel: Arc::new(AtomicBool::new(false)),
            store_failure: Mutex::new(None),
            ctx,
        })
    }

    /// Setting the returned flag stops the sweep before the next unit starts.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn references(&self) -> &[ReferencePoint] {
        &self.references
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Run every unit of the grid, then compact the store.
    pub fn run(&self) -> Result<SweepSummary, SweepError> {
        let units = self.config.units();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers.unwrap_or(0))
            .build()?;

        tracing::info!(
            parent: self.ctx.span(),
            units = units.len(),
            workers = pool.current_num_threads(),
            mode = ?self.config.write_mode(),
            "sweep started"
        );

        let outcomes: Vec<UnitOutcome> = pool.install(|| units.par_iter().map(|u| self.run_unit(u)).collect());

        if let Some(err) = self.store_failure.lock().take() {
            return Err(err.into());
        }
        let compacted = self.store.compact()?;
        let summary = SweepSummary { outcomes, compacted };

        tracing::info!(
            parent: self.ctx.span(),
            succeeded = summary.count(UnitState::Succeeded),
            failed = summary.count(UnitState::Failed),
            skipped = summary.count(UnitState::Skipped),
            pending = summary.count(UnitState::Pending),
            "sweep finished"
        );
        Ok(summary)
    }

    fn run_unit(&self, unit: &UnitSpec) -> UnitOutcome {
        if self.cancel.load(Ordering::Relaxed) {
            return UnitOutcome::new(*unit, UnitState::Pending);
        }
        let mode = self.config.write_mode();
        if mode == WriteMode::Skip && self.store.contains(&unit.params) {
            tracing::debug!(parent: self.ctx.span(), it_id = unit.it_id, params = %unit.params, "already stored, skipped");
            return UnitOutcome::new(*unit, UnitState::Skipped);
        }

        let ctx = self.ctx.unit(unit.it_id);
        tracing::info!(parent: ctx.span(), params = %unit.params, state = %UnitState::Running, "unit started");

        let row = match self.analyse(unit, &ctx) {
            Ok(row) => row,
            Err(err) => {
                tracing::warn!(parent: ctx.span(), params = %unit.params, error = %err, "unit failed");
                let mut out = UnitOutcome::new(*unit, UnitState::Failed);
                out.error = Some(err.to_string());
                return out;
            }
        };

        match self.store.append(&row, mode) {
            Ok(Appended::Written) => {}
            Ok(Appended::AlreadyPresent) => return UnitOutcome::new(*unit, UnitState::Skipped),
            Err(err) => {
                tracing::error!(parent: ctx.span(), error = %err, "result store write failed, stopping sweep");
                self.cancel.store(true, Ordering::Relaxed);
                let mut out = UnitOutcome::new(*unit, UnitState::Failed);
                out.error = Some(err.to_string());
                self.store_failure.lock().get_or_insert(err);
                return out;
            }
        }

        if self.config.delete_intermediate && !self.config.reuse_footprint_exports {
            let path = self.config.segmentation_path(unit.it_id);
            if let Err(err) = fs::remove_file(&path) {
                tracing::warn!(parent: ctx.span(), path = %path.display(), error = %err, "could not delete segmentation table");
            }
        }

        tracing::info!(
            parent: ctx.span(),
            params = %unit.params,
            runtime = row.runtime,
            hulls = row.n_hulls,
            h1 = row.h1,
            os_tree = row.os_tree,
            "unit succeeded"
        );
        UnitOutcome { unit: *unit, state: UnitState::Succeeded, row: Some(row), error: None }
    }

    /// Produce the footprints of one unit, evaluate them, and export if configured.
    fn analyse(&self, unit: &UnitSpec, ctx: &RunContext) -> Result<SweepRow, SegmentationError> {
        let start = Instant::now();
        let export_path = self.config.footprint_export_path(unit.it_id);

        let (set, points) = if self.config.reuse_footprint_exports {
            (read_footprints(&export_path)?, None)
        } else {
            let table_path = self.config.segmentation_path(unit.it_id);
            // it_id is a grid position; a table left by an earlier sweep may belong to other parameters.
            match fs::remove_file(&table_path) {
                Ok(()) => tracing::debug!(parent: ctx.span(), path = %table_path.display(), "removed stale segmentation table"),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(SegmentationError::Io { path: table_path, source }),
            }
            self.segmenter.segment(&self.config.input_xyz, &table_path, &unit.params)?;
            let table = SegmentationTable::read(&table_path, self.config.noise_label)?;
            let set = build_footprints(&table.clusters, self.config.min_cluster_points, ctx);
            let points = PointStats { input_points: self.extent.point_count, segmented_points: table.point_count };
            (set, Some(points))
        };
        if set.footprints.is_empty() {
            let source = if self.config.reuse_footprint_exports {
                export_path
            } else {
                self.config.segmentation_path(unit.it_id)
            };
            return Err(SegmentationError::NoFootprints(source));
        }

        let eval = evaluate(
            unit,
            &set,
            &self.references,
            points,
            self.config.containment,
            self.config.denominator,
            ctx,
        );
        let mut row = eval.row;
        if !self.config.reuse_footprint_exports {
            row.runtime = (start.elapsed().as_secs_f64() * 100.0).round() / 100.0;

            if self.config.export_footprints {
                let fc = labelled_features(&set.footprints, &eval.classes, &eval.matches, self.crs.clone());
                if let Err(err) = write_footprints(&export_path, &fc) {
                    tracing::warn!(parent: ctx.span(), path = %export_path.display(), error = %err, "footprint export failed");
                }
            }
        }
        Ok(row)
    }
}
