use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a recoverable per-record error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
pub enum FeatureErrorKind {
    InvalidGeometry,
    ProjectionFailure,
}

impl fmt::Display for FeatureErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureErrorKind::InvalidGeometry => write!(f, "invalid geometry"),
            FeatureErrorKind::ProjectionFailure => write!(f, "projection failure"),
        }
    }
}

/// A single feature or point that could not be used. These are recovered
/// locally: the record is dropped and the batch continues.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeatureError {
    #[error("geometry has no coordinate reference system")]
    MissingCrs,
    #[error("EPSG:{0} is not a supported coordinate reference system")]
    UnsupportedCrs(u32),
    #[error("coordinate ({x}, {y}) is outside the valid domain of the transform")]
    OutOfDomain { x: f64, y: f64 },
    #[error("no transform from {from} to {to}")]
    NoTransform { from: String, to: String },
    #[error("geometry contains a non-finite coordinate")]
    NonFinite,
    #[error("geometry is empty")]
    Empty,
    #[error("geometry is degenerate (fewer than two distinct vertices)")]
    Degenerate,
    #[error("way references node {0} which is not present in the extract")]
    MissingNode(i64),
    #[error("{0} geometries are not line features")]
    UnsupportedGeometry(String),
}

impl FeatureError {
    pub fn kind(&self) -> FeatureErrorKind {
        match self {
            FeatureError::MissingCrs
            | FeatureError::UnsupportedCrs(_)
            | FeatureError::OutOfDomain { .. }
            | FeatureError::NoTransform { .. } => FeatureErrorKind::ProjectionFailure,
            FeatureError::NonFinite
            | FeatureError::Empty
            | FeatureError::Degenerate
            | FeatureError::MissingNode(_)
            | FeatureError::UnsupportedGeometry(_) => FeatureErrorKind::InvalidGeometry,
        }
    }
}

/// Fatal errors. Anything here aborts the run.
#[derive(Error, Debug)]
pub enum ProximityError {
    #[error(
        "resolver for subset '{subset}' produced {actual} rows for {expected} points"
    )]
    AlignmentFailure {
        subset: String,
        expected: usize,
        actual: usize,
    },
    #[error("point id {0} appears more than once in the observation set")]
    DuplicatePointId(usize),
    #[error("column '{0}' not found in observation header")]
    UnknownColumn(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("I/O error accessing path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("RON error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("OSM PBF error: {0}")]
    Osm(#[from] osmpbfreader::Error),
    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] geojson::Error),
}

macro_rules! io_err {
    ($path:expr, $err:expr) => {
        $crate::errors::ProximityError::Io {
            path: $path.to_path_buf(),
            source: $err,
        }
    };
}

pub(crate) use io_err;
