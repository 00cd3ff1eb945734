// Minimum distance from every point to the nearest feature of one subset.
//
// The R-tree walk may report the same point several times (ties between
// features, several segments of one feature at the same distance). Those
// candidate rows are always reduced to a single minimum per point id and
// the result is re-aligned to the caller's point order before it is
// returned.

use crate::categories::NamedSubset;
use crate::errors::ProximityError;
use crate::geometry::{LineFeature, PointId, ProjectedPoint};
use crate::spatial_index::SegmentIndex;
use geo::{Distance, Euclidean, Point};
use itertools::Itertools;
use log::{debug, warn};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubsetStatus {
    Resolved,
    /// The subset had no features; every value is no-data.
    Empty,
}

/// One row of the nearest-neighbour join, before reduction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateRow {
    pub point: PointId,
    pub feature_source_id: i64,
    pub distance: f64,
}

/// Distances for one subset, in the same order as the points they were
/// computed for. `None` is no-data.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceColumn {
    pub subset: String,
    pub status: SubsetStatus,
    pub values: Vec<(PointId, Option<f64>)>,
}

impl DistanceColumn {
    pub fn numeric_values(&self) -> impl Iterator<Item = f64> + '_ {
        self.values.iter().filter_map(|(_, v)| *v)
    }

    pub fn no_data_count(&self) -> usize {
        self.values.iter().filter(|(_, v)| v.is_none()).count()
    }
}

/// Exact planar distance from `point` to any part of `feature`.
pub fn point_to_feature_distance(point: &Point<f64>, feature: &LineFeature) -> f64 {
    feature
        .geometry
        .0
        .iter()
        .map(|part| Euclidean.distance(point, part))
        .fold(f64::INFINITY, f64::min)
}

/// Nearest-neighbour join of `points` against `features`. Emits every tied
/// candidate, so a point can appear more than once.
pub fn nearest_join(points: &[ProjectedPoint], features: &[&LineFeature]) -> Vec<CandidateRow> {
    let index = SegmentIndex::build(features);
    debug!(
        "Indexed {} segments from {} features",
        index.segment_count(),
        index.feature_count()
    );

    let mut rows = Vec::with_capacity(points.len());

    for point in points {
        let Some(position) = point.position else {
            continue;
        };

        for candidate in index
            .nearest_candidates([position.x(), position.y()])
            .into_iter()
            .unique_by(|c| c.feature)
        {
            let feature = features[candidate.feature];
            rows.push(CandidateRow {
                point: point.id,
                feature_source_id: feature.source_id,
                distance: point_to_feature_distance(&position, feature),
            });
        }
    }

    rows
}

/// Resolve one subset. Fails only on an internal alignment error.
pub fn resolve(
    points: &[ProjectedPoint],
    subset: &NamedSubset,
) -> Result<DistanceColumn, ProximityError> {
    if subset.is_empty() {
        warn!(
            "No lines for {}, all {} distances will be no-data",
            subset.name,
            points.len()
        );
        return Ok(DistanceColumn {
            subset: subset.name.to_string(),
            status: SubsetStatus::Empty,
            values: points.iter().map(|p| (p.id, None)).collect(),
        });
    }

    let rows = nearest_join(points, &subset.features);
    let candidate_count = rows.len();

    let reduced = rows
        .into_iter()
        .map(|row| (row.point, row.distance))
        .into_grouping_map()
        .min_by(|_, a, b| a.total_cmp(b));

    debug!(
        "{}: reduced {} candidate rows to {} points",
        subset.name,
        candidate_count,
        reduced.len()
    );

    let positioned = points.iter().filter(|p| p.position.is_some()).count();
    if reduced.len() != positioned {
        return Err(ProximityError::AlignmentFailure {
            subset: subset.name.to_string(),
            expected: positioned,
            actual: reduced.len(),
        });
    }

    let values: Vec<(PointId, Option<f64>)> = points
        .iter()
        .map(|p| (p.id, reduced.get(&p.id).copied()))
        .collect();

    Ok(DistanceColumn {
        subset: subset.name.to_string(),
        status: SubsetStatus::Resolved,
        values,
    })
}
