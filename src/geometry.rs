use crate::crs::Crs;
use crate::errors::FeatureError;
use geo::{Coord, LineString, MultiLineString, Point};
use rayon::prelude::*;
use serde::Serialize;
use std::fmt;

/// Stable identifier of an observation: its row position in the input table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PointId(pub usize);

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

/// A line feature as handed over by a reader, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawLine {
    pub source_id: i64,
    pub category: Option<String>,
    pub crs: Option<Crs>,
    /// One entry per part; single-part lines have exactly one.
    pub parts: Vec<Vec<(f64, f64)>>,
}

/// A validated line in the working CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct LineFeature {
    pub source_id: i64,
    pub category: Option<String>,
    pub geometry: MultiLineString<f64>,
}

/// A point observation as loaded, before reprojection.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub id: PointId,
    /// `None` when the row carried no usable coordinates.
    pub position: Option<(f64, f64)>,
    pub crs: Option<Crs>,
    /// Original column values, passed through untouched.
    pub attributes: Vec<String>,
}

/// An observation expressed in the working CRS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProjectedPoint {
    pub id: PointId,
    pub position: Option<Point<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rejected {
    pub source_id: i64,
    pub error: FeatureError,
}

pub struct NormalizedLines {
    pub crs: Crs,
    pub features: Vec<LineFeature>,
    pub rejected: Vec<Rejected>,
}

pub struct NormalizedPoints {
    pub crs: Crs,
    pub points: Vec<ProjectedPoint>,
    pub rejected: Vec<Rejected>,
}

/// Re-express every line in `target`, dropping the ones that are empty,
/// degenerate, lack a CRS or fall outside the transform's domain.
pub fn normalize_lines(raw: &[RawLine], target: Crs) -> NormalizedLines {
    let results: Vec<Result<LineFeature, Rejected>> = raw
        .par_iter()
        .map(|line| {
            normalize_line(line, target).map_err(|error| Rejected {
                source_id: line.source_id,
                error,
            })
        })
        .collect();

    let mut features = Vec::with_capacity(results.len());
    let mut rejected = Vec::new();

    for result in results {
        match result {
            Ok(feature) => features.push(feature),
            Err(r) => rejected.push(r),
        }
    }

    NormalizedLines {
        crs: target,
        features,
        rejected,
    }
}

pub fn normalize_line(line: &RawLine, target: Crs) -> Result<LineFeature, FeatureError> {
    let source = line.crs.ok_or(FeatureError::MissingCrs)?;

    if line.parts.iter().all(|part| part.is_empty()) {
        return Err(FeatureError::Empty);
    }

    let mut parts = Vec::with_capacity(line.parts.len());

    for part in &line.parts {
        let mut coords: Vec<Coord<f64>> = Vec::with_capacity(part.len());

        for &(x, y) in part {
            let (px, py) = source.transform(&target, x, y)?;
            let coord = Coord { x: px, y: py };
            // consecutive repeats add nothing to a line
            if coords.last() != Some(&coord) {
                coords.push(coord);
            }
        }

        if coords.len() >= 2 {
            parts.push(LineString::new(coords));
        }
    }

    if parts.is_empty() {
        return Err(FeatureError::Degenerate);
    }

    Ok(LineFeature {
        source_id: line.source_id,
        category: line.category.clone(),
        geometry: MultiLineString::new(parts),
    })
}

/// Project observations into `target`. Points that cannot be projected are
/// kept with no position so the output stays aligned with the input table.
pub fn normalize_points(
    observations: &[Observation],
    default_crs: Crs,
    target: Crs,
) -> NormalizedPoints {
    let mut points = Vec::with_capacity(observations.len());
    let mut rejected = Vec::new();

    for obs in observations {
        let projected = match obs.position {
            None => Err(FeatureError::Empty),
            Some((x, y)) => obs
                .crs
                .unwrap_or(default_crs)
                .transform(&target, x, y)
                .map(|(px, py)| Point::new(px, py)),
        };

        let position = match projected {
            Ok(p) => Some(p),
            Err(error) => {
                rejected.push(Rejected {
                    source_id: obs.id.0 as i64,
                    error,
                });
                None
            }
        };

        points.push(ProjectedPoint {
            id: obs.id,
            position,
        });
    }

    NormalizedPoints {
        crs: target,
        points,
        rejected,
    }
}
