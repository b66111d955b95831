//! Error taxonomy for the evaluation pipeline.
//!
//! Input errors abort a whole sweep, segmentation errors only fail the unit they
//! occurred in. Degenerate geometry is not an error at all; see
//! [`crate::footprint::Degenerate`].

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Missing or unusable inputs. Fatal to the whole sweep.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid GeoJSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path}: feature {index} is a {found} geometry, expected {expected}")]
    GeometryType {
        path: PathBuf,
        index: usize,
        expected: &'static str,
        found: String,
    },

    #[error("{path}: feature {index} has no usable `{field}` property")]
    MissingProperty {
        path: PathBuf,
        index: usize,
        field: String,
    },

    #[error("{path}: line {line}: {reason}")]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("point cloud {0} contains no points")]
    EmptyPointCloud(PathBuf),
}

/// Failure of one segmentation unit. The unit is marked failed, the batch continues.
#[derive(Debug, Error)]
pub enum SegmentationError {
    #[error("failed to launch segmenter {exe}: {source}")]
    Launch {
        exe: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("segmenter exited with {status}: {stderr}")]
    ExitStatus { status: String, stderr: String },

    #[error("segmenter did not finish within {0:?}")]
    Timeout(Duration),

    #[error("segmentation output {0} is missing")]
    MissingOutput(PathBuf),

    #[error("segmentation output {0} is empty")]
    EmptyOutput(PathBuf),

    #[error("segmentation output {path}, line {line}: {reason}")]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("no footprints could be built from {0}")]
    NoFootprints(PathBuf),

    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("reusing footprint export: {0}")]
    Export(#[from] InputError),
}

/// Failures of the persisted result store itself.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("result store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("result store {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// Errors that abort a sweep before or after its units run.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cannot prepare output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot build worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}
