use crate::categories::partition;
use crate::config::RunConfig;
use crate::errors::{FeatureErrorKind, ProximityError};
use crate::geometry::{PointId, Rejected, normalize_lines, normalize_points};
use crate::observations::ObservationTable;
use crate::resolver::{DistanceColumn, SubsetStatus, resolve};
use crate::road_sources::RoadExtract;
use crate::stats::SubsetStatistics;
use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};
use log::{info, warn};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    pub id: PointId,
    pub attributes: Vec<String>,
    /// One entry per subset, in configured order. `None` is no-data.
    pub distances: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultTable {
    pub headers: Vec<String>,
    pub distance_columns: Vec<String>,
    pub rows: Vec<ResultRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
    LineIngest,
    LineNormalization,
    PointNormalization,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::LineIngest => write!(f, "line ingest"),
            Stage::LineNormalization => write!(f, "line normalization"),
            Stage::PointNormalization => write!(f, "point normalization"),
        }
    }
}

/// Records dropped per stage and kind.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DropReport {
    counts: BTreeMap<(Stage, FeatureErrorKind), usize>,
}

impl DropReport {
    pub fn record(&mut self, stage: Stage, rejected: &[Rejected]) {
        for r in rejected {
            *self.counts.entry((stage, r.error.kind())).or_insert(0) += 1;
        }
    }

    pub fn count(&self, stage: Stage, kind: FeatureErrorKind) -> usize {
        self.counts.get(&(stage, kind)).copied().unwrap_or(0)
    }

    pub fn total(&self, stage: Stage) -> usize {
        self.counts
            .iter()
            .filter(|((s, _), _)| *s == stage)
            .map(|(_, n)| n)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

impl fmt::Display for DropReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.counts.is_empty() {
            return write!(f, "no records dropped");
        }
        let lines: Vec<String> = self
            .counts
            .iter()
            .map(|((stage, kind), n)| format!("{}: {} dropped ({})", stage, n, kind))
            .collect();
        write!(f, "{}", lines.join("\n"))
    }
}

pub struct PipelineOutput {
    pub table: ResultTable,
    pub statistics: Vec<SubsetStatistics>,
    pub drops: DropReport,
}

pub fn run(
    observations: &ObservationTable,
    roads: &RoadExtract,
    config: &RunConfig,
) -> Result<PipelineOutput, ProximityError> {
    config.validate()?;

    let mut seen = HashSet::with_capacity(observations.rows.len());
    for obs in &observations.rows {
        if !seen.insert(obs.id) {
            return Err(ProximityError::DuplicatePointId(obs.id.0));
        }
    }

    let mut drops = DropReport::default();
    drops.record(Stage::LineIngest, &roads.rejected);

    let points = normalize_points(&observations.rows, config.source_crs, config.target_crs);
    drops.record(Stage::PointNormalization, &points.rejected);

    let lines = normalize_lines(&roads.lines, config.target_crs);
    drops.record(Stage::LineNormalization, &lines.rejected);
    info!(
        "{} of {} lines usable in {}",
        lines.features.len(),
        roads.lines.len(),
        lines.crs
    );

    let subsets = partition(&lines.features, &config.categories);

    let columns: Vec<DistanceColumn> = if config.parallel {
        subsets
            .par_iter()
            .map(|subset| resolve(&points.points, subset))
            .collect::<Result<_, _>>()?
    } else {
        subsets
            .iter()
            .map(|subset| resolve(&points.points, subset))
            .collect::<Result<_, _>>()?
    };

    let table = assemble(observations, &columns, config)?;

    let statistics: Vec<SubsetStatistics> =
        columns.iter().map(SubsetStatistics::from_column).collect();

    for stats in &statistics {
        if stats.status == SubsetStatus::Empty {
            warn!(
                "Subset {} is empty; its statistics are undefined",
                stats.name
            );
        } else if stats.summary.is_none() {
            warn!(
                "Subset {} has no numeric distances; its statistics are undefined",
                stats.name
            );
        }
    }

    if drops.is_empty() {
        info!("No records dropped");
    } else {
        for line in drops.to_string().lines() {
            warn!("{}", line);
        }
    }

    Ok(PipelineOutput {
        table,
        statistics,
        drops,
    })
}

/// Attach each column to the row with the matching point id.
fn assemble(
    observations: &ObservationTable,
    columns: &[DistanceColumn],
    config: &RunConfig,
) -> Result<ResultTable, ProximityError> {
    let mut rows: Vec<ResultRow> = observations
        .rows
        .iter()
        .map(|obs| ResultRow {
            id: obs.id,
            attributes: obs.attributes.clone(),
            distances: vec![None; columns.len()],
        })
        .collect();

    let mut row_index: HashMap<PointId, usize> = HashMap::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        row_index.insert(row.id, i);
    }

    for (c, column) in columns.iter().enumerate() {
        if column.values.len() != rows.len() {
            return Err(ProximityError::AlignmentFailure {
                subset: column.subset.clone(),
                expected: rows.len(),
                actual: column.values.len(),
            });
        }

        for (id, value) in &column.values {
            let Some(&i) = row_index.get(id) else {
                return Err(ProximityError::AlignmentFailure {
                    subset: column.subset.clone(),
                    expected: rows.len(),
                    actual: column.values.len(),
                });
            };
            rows[i].distances[c] = *value;
        }
    }

    Ok(ResultTable {
        headers: observations.headers.clone(),
        distance_columns: columns
            .iter()
            .map(|column| config.column_name(&column.subset))
            .collect(),
        rows,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::categories::{CategorySpec, CategoryTable};
    use crate::crs::Crs;
    use crate::errors::FeatureError;
    use crate::geometry::{Observation, RawLine};

    fn planar_config(categories: CategoryTable) -> RunConfig {
        RunConfig {
            source_crs: Crs::Planar,
            target_crs: Crs::Planar,
            categories,
            parallel: false,
            ..RunConfig::default()
        }
    }

    fn observation(id: usize, x: f64, y: f64) -> Observation {
        Observation {
            id: PointId(id),
            position: Some((x, y)),
            crs: None,
            attributes: vec![format!("obs{}", id)],
        }
    }

    fn road(id: i64, class: &str, coords: Vec<(f64, f64)>) -> RawLine {
        RawLine {
            source_id: id,
            category: Some(class.to_string()),
            crs: Some(Crs::Planar),
            parts: vec![coords],
        }
    }

    #[test]
    fn test_columns_attached_by_id() {
        let observations = ObservationTable {
            headers: vec!["name".to_string()],
            rows: vec![observation(3, 0.0, 0.0), observation(1, 0.0, 20.0)],
        };
        let roads = RoadExtract {
            lines: vec![road(1, "trunk", vec![(10.0, 0.0), (10.0, 10.0)])],
            rejected: vec![],
        };
        let config = planar_config(CategoryTable(vec![
            CategorySpec::new("trunk_roads", &["trunk"]),
            CategorySpec::new("footways", &["footway"]),
        ]));

        let output = run(&observations, &roads, &config).unwrap();
        let table = output.table;

        assert_eq!(
            table.distance_columns,
            vec!["dist_to_trunk_roads", "dist_to_footways"]
        );
        assert_eq!(table.rows[0].id, PointId(3));
        assert_eq!(table.rows[0].distances, vec![Some(10.0), None]);
        assert_eq!(table.rows[1].attributes, vec!["obs1"]);
        let d = table.rows[1].distances[0].unwrap();
        assert!((d - 200f64.sqrt()).abs() < 1e-12);

        assert_eq!(output.statistics[1].status, SubsetStatus::Empty);
        assert!(output.statistics[1].summary.is_none());
    }

    #[test]
    fn test_duplicate_ids_are_fatal() {
        let observations = ObservationTable {
            headers: vec![],
            rows: vec![observation(0, 0.0, 0.0), observation(0, 1.0, 1.0)],
        };
        let config = planar_config(CategoryTable::default());
        assert!(matches!(
            run(&observations, &RoadExtract::default(), &config),
            Err(ProximityError::DuplicatePointId(0))
        ));
    }

    #[test]
    fn test_drop_report_counts_per_stage() {
        let observations = ObservationTable {
            headers: vec![],
            rows: vec![
                observation(0, 0.0, 0.0),
                Observation {
                    id: PointId(1),
                    position: None,
                    crs: None,
                    attributes: vec![],
                },
            ],
        };
        let mut lonely = road(9, "trunk", vec![(0.0, 0.0), (1.0, 0.0)]);
        lonely.crs = Some(Crs::Wgs84);
        let roads = RoadExtract {
            lines: vec![
                road(1, "trunk", vec![(0.0, 5.0), (1.0, 5.0)]),
                road(2, "trunk", vec![(3.0, 3.0)]),
                lonely,
            ],
            rejected: vec![Rejected {
                source_id: 4,
                error: FeatureError::MissingNode(40),
            }],
        };
        let config = planar_config(CategoryTable::default());

        let output = run(&observations, &roads, &config).unwrap();
        let drops = &output.drops;
        assert_eq!(drops.count(Stage::LineIngest, FeatureErrorKind::InvalidGeometry), 1);
        assert_eq!(
            drops.count(Stage::LineNormalization, FeatureErrorKind::InvalidGeometry),
            1
        );
        assert_eq!(
            drops.count(Stage::LineNormalization, FeatureErrorKind::ProjectionFailure),
            1
        );
        assert_eq!(drops.total(Stage::PointNormalization), 1);

        assert_eq!(output.table.rows[0].distances[0], Some(5.0));
        assert_eq!(output.table.rows[1].distances[0], None);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let observations = ObservationTable {
            headers: vec![],
            rows: (0..20).map(|i| observation(i, i as f64, (i * 7 % 5) as f64)).collect(),
        };
        let roads = RoadExtract {
            lines: vec![
                road(1, "trunk", vec![(0.0, -10.0), (30.0, -10.0)]),
                road(2, "primary", vec![(5.0, 8.0), (6.0, 9.0)]),
                road(3, "tertiary", vec![(12.0, 0.0), (12.0, 4.0)]),
            ],
            rejected: vec![],
        };
        let sequential = planar_config(CategoryTable::default());
        let parallel = RunConfig {
            parallel: true,
            ..sequential.clone()
        };

        let a = run(&observations, &roads, &sequential).unwrap();
        let b = run(&observations, &roads, &parallel).unwrap();
        assert_eq!(a.table, b.table);
        assert_eq!(a.statistics, b.statistics);
    }

    #[test]
    fn test_misaligned_columns_are_fatal() {
        let observations = ObservationTable {
            headers: vec![],
            rows: vec![observation(0, 0.0, 0.0), observation(1, 5.0, 0.0)],
        };
        let config = planar_config(CategoryTable(vec![CategorySpec::new(
            "trunk_roads",
            &["trunk"],
        )]));

        let short = DistanceColumn {
            subset: "trunk_roads".to_string(),
            status: SubsetStatus::Resolved,
            values: vec![(PointId(0), Some(1.0))],
        };
        assert!(matches!(
            assemble(&observations, &[short], &config),
            Err(ProximityError::AlignmentFailure {
                expected: 2,
                actual: 1,
                ..
            })
        ));

        let stranger = DistanceColumn {
            subset: "trunk_roads".to_string(),
            status: SubsetStatus::Resolved,
            values: vec![(PointId(0), Some(1.0)), (PointId(7), Some(2.0))],
        };
        match assemble(&observations, &[stranger], &config) {
            Err(ProximityError::AlignmentFailure { subset, .. }) => {
                assert_eq!(subset, "trunk_roads")
            }
            other => panic!("expected an alignment failure, got {:?}", other.map(|t| t.rows)),
        }

        let aligned = DistanceColumn {
            subset: "trunk_roads".to_string(),
            status: SubsetStatus::Resolved,
            values: vec![(PointId(1), Some(2.0)), (PointId(0), None)],
        };
        let table = assemble(&observations, &[aligned], &config).unwrap();
        assert_eq!(table.rows[0].distances, vec![None]);
        assert_eq!(table.rows[1].distances, vec![Some(2.0)]);
    }
}
