use crate::errors::{ProximityError, io_err};
use crate::resolver::{DistanceColumn, SubsetStatus};
use ordered_float::OrderedFloat;
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Summary {
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    /// Quartiles by linear interpolation between closest ranks.
    pub q1: f64,
    pub q3: f64,
    /// Most extreme observations within 1.5 IQR of the quartiles.
    pub lower_whisker: f64,
    pub upper_whisker: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubsetStatistics {
    pub name: String,
    pub status: SubsetStatus,
    pub count: usize,
    pub no_data: usize,
    /// `None` when the column has no numeric values at all.
    pub summary: Option<Summary>,
}

impl SubsetStatistics {
    pub fn from_column(column: &DistanceColumn) -> Self {
        let values: Vec<f64> = column.numeric_values().collect();
        Self {
            name: column.subset.clone(),
            status: column.status,
            count: values.len(),
            no_data: column.no_data_count(),
            summary: summarize(&values),
        }
    }
}

impl fmt::Display for SubsetStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}:", self.name)?;
        match &self.summary {
            Some(s) => {
                writeln!(f, "Average: {:.1}", s.mean)?;
                writeln!(f, "Median:  {:.1}", s.median)?;
                writeln!(f, "Max:     {:.1}", s.max)?;
                write!(f, "Min:     {:.1}", s.min)
            }
            None => write!(f, "no data ({} points without a distance)", self.no_data),
        }
    }
}

/// Summarise finite values. Returns `None` for an empty input rather than
/// producing NaN.
pub fn summarize(values: &[f64]) -> Option<Summary> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by_key(|v| OrderedFloat(*v));

    let n = sorted.len();
    let mean = sorted.iter().sum::<f64>() / n as f64;
    let q1 = quantile_sorted(&sorted, 0.25);
    let median = quantile_sorted(&sorted, 0.5);
    let q3 = quantile_sorted(&sorted, 0.75);

    let iqr = q3 - q1;
    let low_fence = q1 - 1.5 * iqr;
    let high_fence = q3 + 1.5 * iqr;

    let lower_whisker = sorted
        .iter()
        .copied()
        .find(|v| *v >= low_fence)
        .unwrap_or(sorted[0]);
    let upper_whisker = sorted
        .iter()
        .rev()
        .copied()
        .find(|v| *v <= high_fence)
        .unwrap_or(sorted[n - 1]);

    Some(Summary {
        mean,
        median,
        min: sorted[0],
        max: sorted[n - 1],
        q1,
        q3,
        lower_whisker,
        upper_whisker,
    })
}

/// Write statistics as JSON for the chart renderer.
pub fn write_statistics<W: Write>(
    writer: W,
    statistics: &[SubsetStatistics],
) -> Result<(), ProximityError> {
    serde_json::to_writer_pretty(writer, statistics)?;
    Ok(())
}

pub fn write_statistics_path(
    path: &Path,
    statistics: &[SubsetStatistics],
) -> Result<(), ProximityError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| io_err!(parent, e))?;
        }
    }
    let file = File::create(path).map_err(|e| io_err!(path, e))?;
    let mut writer = BufWriter::new(file);
    write_statistics(&mut writer, statistics)?;
    writer.flush().map_err(|e| io_err!(path, e))?;
    Ok(())
}

fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}
