// R-tree over the individual segments of a set of line features.
//
// Indexing segments rather than whole-feature bounding boxes keeps the
// envelopes tight, so the first hit of a nearest-neighbour walk is already
// an exact point-to-segment distance.

use crate::geometry::LineFeature;
use rstar::{AABB, PointDistance, RTree, RTreeObject};

/// Candidates further than the best hit by more than this (metres) are not collected.
pub const TIE_TOLERANCE_M: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexedSegment {
    /// Position of the owning feature in the slice the index was built from.
    pub feature: usize,
    pub start: [f64; 2],
    pub end: [f64; 2],
}

impl RTreeObject for IndexedSegment {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(self.start, self.end)
    }
}

impl PointDistance for IndexedSegment {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        segment_distance_2(self.start, self.end, *point)
    }
}

/// Squared distance from `p` to the closed segment `a`-`b`.
pub fn segment_distance_2(a: [f64; 2], b: [f64; 2], p: [f64; 2]) -> f64 {
    let dx = b[0] - a[0];
    let dy = b[1] - a[1];
    let len_2 = dx * dx + dy * dy;

    let t = if len_2 == 0.0 {
        0.0
    } else {
        (((p[0] - a[0]) * dx + (p[1] - a[1]) * dy) / len_2).clamp(0.0, 1.0)
    };

    let cx = a[0] + t * dx - p[0];
    let cy = a[1] + t * dy - p[1];
    cx * cx + cy * cy
}

/// A nearest-neighbour hit. The same feature may appear several times,
/// once per segment that ties for the minimum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub feature: usize,
    pub distance: f64,
}

pub struct SegmentIndex {
    tree: RTree<IndexedSegment>,
    feature_count: usize,
}

impl SegmentIndex {
    pub fn build(features: &[&LineFeature]) -> Self {
        let segments: Vec<IndexedSegment> = features
            .iter()
            .enumerate()
            .flat_map(|(feature, line)| {
                line.geometry.0.iter().flat_map(move |part| {
                    part.lines().map(move |segment| IndexedSegment {
                        feature,
                        start: [segment.start.x, segment.start.y],
                        end: [segment.end.x, segment.end.y],
                    })
                })
            })
            .collect();

        Self {
            tree: RTree::bulk_load(segments),
            feature_count: features.len(),
        }
    }

    pub fn feature_count(&self) -> usize {
        self.feature_count
    }

    pub fn segment_count(&self) -> usize {
        self.tree.size()
    }

    /// All segments whose distance to `point` is within tolerance of the
    /// nearest one. Empty only when the index is empty.
    pub fn nearest_candidates(&self, point: [f64; 2]) -> Vec<Candidate> {
        let mut iter = self.tree.nearest_neighbor_iter_with_distance_2(&point);

        let Some((first, best_2)) = iter.next() else {
            return Vec::new();
        };

        let best = best_2.sqrt();
        let bound = best + TIE_TOLERANCE_M;
        let bound_2 = bound * bound;

        let mut candidates = vec![Candidate {
            feature: first.feature,
            distance: best,
        }];

        for (segment, d2) in iter {
            if d2 > bound_2 {
                break;
            }
            candidates.push(Candidate {
                feature: segment.feature,
                distance: d2.sqrt(),
            });
        }

        candidates
    }
}
