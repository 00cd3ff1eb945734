// CSV loading of point observations and writing of the joined result table

use crate::errors::{ProximityError, io_err};
use crate::geometry::{Observation, PointId};
use crate::pipeline::ResultTable;
use log::{info, warn};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct ObservationTable {
    pub headers: Vec<String>,
    pub rows: Vec<Observation>,
}

/// Read observations from CSV. Every column is carried through; rows whose
/// coordinates do not parse, or that are cut short, are kept without a
/// position. Ragged rows are padded or cut to the header width.
pub fn read_observations<R: Read>(
    reader: R,
    longitude_column: &str,
    latitude_column: &str,
) -> Result<ObservationTable, ProximityError> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(reader);

    let headers: Vec<String> = rdr.headers()?.iter().map(|h| h.to_string()).collect();

    let column_index = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim() == name)
            .ok_or_else(|| ProximityError::UnknownColumn(name.to_string()))
    };
    let lon_idx = column_index(longitude_column)?;
    let lat_idx = column_index(latitude_column)?;

    let mut rows = Vec::new();
    let mut unparsed: usize = 0;
    let mut ragged: usize = 0;

    for (i, record) in rdr.records().enumerate() {
        let record = record?;

        let parse = |idx: usize| record.get(idx).and_then(|v| v.trim().parse::<f64>().ok());
        let position = match (parse(lon_idx), parse(lat_idx)) {
            (Some(lon), Some(lat)) => Some((lon, lat)),
            _ => {
                unparsed += 1;
                None
            }
        };

        let mut attributes: Vec<String> = record.iter().map(|v| v.to_string()).collect();
        if attributes.len() != headers.len() {
            ragged += 1;
            attributes.resize(headers.len(), String::new());
        }

        rows.push(Observation {
            id: PointId(i),
            position,
            crs: None,
            attributes,
        });
    }

    if ragged > 0 {
        warn!("{} observations do not match the header width", ragged);
    }
    if unparsed > 0 {
        warn!("{} observations have unreadable coordinates", unparsed);
    }
    info!("Loaded {} observations", rows.len());

    Ok(ObservationTable { headers, rows })
}

pub fn read_observations_path(
    path: &Path,
    longitude_column: &str,
    latitude_column: &str,
) -> Result<ObservationTable, ProximityError> {
    let file = File::open(path).map_err(|e| io_err!(path, e))?;
    read_observations(file, longitude_column, latitude_column)
}

/// Write the joined table: original columns, then one distance column per
/// subset. No-data is an empty cell.
pub fn write_results<W: Write>(writer: W, table: &ResultTable) -> Result<(), ProximityError> {
    let mut wtr = csv::Writer::from_writer(writer);

    let header: Vec<&str> = table
        .headers
        .iter()
        .chain(table.distance_columns.iter())
        .map(|s| s.as_str())
        .collect();
    wtr.write_record(&header)?;

    for row in &table.rows {
        let distances = row
            .distances
            .iter()
            .map(|d| d.map(|v| v.to_string()).unwrap_or_default());

        let record: Vec<String> = row.attributes.iter().cloned().chain(distances).collect();
        wtr.write_record(&record)?;
    }

    wtr.flush().map_err(|e| io_err!(Path::new("<csv output>"), e))?;
    Ok(())
}

pub fn write_results_path(path: &Path, table: &ResultTable) -> Result<(), ProximityError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| io_err!(parent, e))?;
        }
    }
    let file = File::create(path).map_err(|e| io_err!(path, e))?;
    write_results(file, table)
}
