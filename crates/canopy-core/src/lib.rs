//! Evaluation of tree segmentations against a reference tree registry.
//!
//! A segmentation run turns a point cloud into clusters; each cluster becomes a
//! convex footprint, footprints are matched against reference trees, bucketed by
//! match count, and scanned for over-segmentation. The sweep runs this for a grid
//! of segmenter parameters and records one row per parameter triple.

pub mod classify;
pub mod cluster;
pub mod config;
pub mod context;
pub mod error;
pub mod export;
pub mod extent;
pub mod footprint;
pub mod geojson;
pub mod matching;
pub mod metrics;
pub mod overseg;
pub mod reference;
pub mod segmenter;
pub mod spatial;
pub mod species;
pub mod store;
pub mod sweep;

pub use classify::{classify, Bucket, Classification};
pub use cluster::{Cluster, SegmentationTable};
pub use config::{ParamTriple, SweepConfig, UnitSpec};
pub use context::RunContext;
pub use error::{InputError, SegmentationError, StoreError, SweepError};
pub use extent::PointCloudExtent;
pub use footprint::{build_footprints, Footprint, FootprintSet};
pub use matching::{match_references, ContainmentPolicy, MatchEdge, MatchSet};
pub use metrics::SweepRow;
pub use overseg::DenominatorPolicy;
pub use reference::{clip_to_extent, load_reference_points, ReferenceFields, ReferenceLayer, ReferencePoint};
pub use segmenter::{ExternalSegmenter, Segmenter};
pub use species::{resolve, SpeciesAssignment, SpeciesPolicy};
pub use store::{ResultStore, WriteMode};
pub use sweep::{Sweep, SweepSummary, UnitState};
