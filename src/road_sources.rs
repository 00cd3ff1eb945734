// Readers that turn road extracts into raw line features.
//
// OSM PBF extracts are read in two passes: the first keeps every way
// carrying the category key and remembers which nodes it needs, the second
// loads coordinates for exactly those nodes.

use crate::crs::Crs;
use crate::errors::{FeatureError, ProximityError, io_err};
use crate::geometry::{RawLine, Rejected};
use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};
use geojson::{Feature, GeoJson, Value, feature::Id};
use log::{info, warn};
use osmpbfreader::{OsmObj, OsmPbfReader};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

#[derive(Debug, Default)]
pub struct RoadExtract {
    pub lines: Vec<RawLine>,
    pub rejected: Vec<Rejected>,
}

struct TaggedWay {
    id: i64,
    category: String,
    nodes: Vec<i64>,
}

/// Load every way tagged with `tag_key` from an OSM PBF file.
pub fn read_osm_pbf(path: &Path, tag_key: &str) -> Result<RoadExtract, ProximityError> {
    info!("Loading OSM ways tagged {} from {:?}", tag_key, path);

    let (ways, node_ids) = collect_tagged_ways(path, tag_key)?;
    info!(
        "Pass 1 complete: {} ways, {} referenced nodes",
        ways.len(),
        node_ids.len()
    );

    let nodes = load_node_coordinates(path, &node_ids)?;
    info!("Pass 2 complete: {} nodes loaded", nodes.len());

    let mut extract = RoadExtract::default();

    for way in ways {
        let coords: Result<Vec<(f64, f64)>, FeatureError> = way
            .nodes
            .iter()
            .map(|id| nodes.get(id).copied().ok_or(FeatureError::MissingNode(*id)))
            .collect();

        match coords {
            Ok(coords) => extract.lines.push(RawLine {
                source_id: way.id,
                category: Some(way.category),
                crs: Some(Crs::Wgs84),
                parts: vec![coords],
            }),
            Err(error) => extract.rejected.push(Rejected {
                source_id: way.id,
                error,
            }),
        }
    }

    if !extract.rejected.is_empty() {
        warn!(
            "{} ways reference nodes missing from the extract",
            extract.rejected.len()
        );
    }
    info!("Loaded {} ways", extract.lines.len());

    Ok(extract)
}

fn open_pbf(path: &Path) -> Result<OsmPbfReader<BufReader<File>>, ProximityError> {
    let file = File::open(path).map_err(|e| io_err!(path, e))?;
    Ok(OsmPbfReader::new(BufReader::new(file)))
}

fn collect_tagged_ways(
    path: &Path,
    tag_key: &str,
) -> Result<(Vec<TaggedWay>, HashSet<i64>), ProximityError> {
    let mut reader = open_pbf(path)?;

    let mut ways = Vec::new();
    let mut node_ids = HashSet::new();

    for obj in reader.iter() {
        if let OsmObj::Way(way) = obj? {
            let Some(category) = way.tags.get(tag_key) else {
                continue;
            };

            let nodes: Vec<i64> = way.nodes.iter().map(|n| n.0).collect();
            node_ids.extend(nodes.iter().copied());

            ways.push(TaggedWay {
                id: way.id.0,
                category: category.to_string(),
                nodes,
            });
        }
    }

    Ok((ways, node_ids))
}

fn load_node_coordinates(
    path: &Path,
    node_ids: &HashSet<i64>,
) -> Result<HashMap<i64, (f64, f64)>, ProximityError> {
    let mut reader = open_pbf(path)?;
    let mut nodes = HashMap::with_capacity(node_ids.len());

    for obj in reader.iter() {
        if let OsmObj::Node(node) = obj? {
            if node_ids.contains(&node.id.0) {
                nodes.insert(node.id.0, (node.lon(), node.lat()));
            }
        }
    }

    Ok(nodes)
}

/// Load line features from a GeoJSON document. The category is read from
/// the `tag_key` property, or from a nested `tags` object when the property
/// is absent.
pub fn read_geojson(text: &str, tag_key: &str, crs: Crs) -> Result<RoadExtract, ProximityError> {
    let features: Vec<Feature> = match text.parse::<GeoJson>()? {
        GeoJson::FeatureCollection(collection) => collection.features,
        GeoJson::Feature(feature) => vec![feature],
        GeoJson::Geometry(geometry) => vec![Feature {
            bbox: None,
            geometry: Some(geometry),
            id: None,
            properties: None,
            foreign_members: None,
        }],
    };

    let mut extract = RoadExtract::default();

    for (i, feature) in features.iter().enumerate() {
        let source_id = feature_id(feature).unwrap_or(i as i64);

        match feature_parts(feature) {
            Ok(parts) => extract.lines.push(RawLine {
                source_id,
                category: feature_category(feature, tag_key),
                crs: Some(crs),
                parts,
            }),
            Err(error) => extract.rejected.push(Rejected { source_id, error }),
        }
    }

    info!(
        "Loaded {} line features from GeoJSON ({} skipped)",
        extract.lines.len(),
        extract.rejected.len()
    );

    Ok(extract)
}

pub fn read_geojson_path(path: &Path, tag_key: &str, crs: Crs) -> Result<RoadExtract, ProximityError> {
    let text = std::fs::read_to_string(path).map_err(|e| io_err!(path, e))?;
    read_geojson(&text, tag_key, crs)
}

fn feature_id(feature: &Feature) -> Option<i64> {
    match feature.id.as_ref()? {
        Id::Number(n) => n.as_i64(),
        Id::String(s) => s.trim_start_matches(['w', 'W']).parse().ok(),
    }
}

fn feature_category(feature: &Feature, tag_key: &str) -> Option<String> {
    if let Some(value) = feature.property(tag_key) {
        return value.as_str().map(|s| s.to_string());
    }

    feature
        .property("tags")
        .and_then(|tags| tags.get(tag_key))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

fn feature_parts(feature: &Feature) -> Result<Vec<Vec<(f64, f64)>>, FeatureError> {
    let geometry = feature.geometry.as_ref().ok_or(FeatureError::Empty)?;

    let to_pairs = |positions: &Vec<Vec<f64>>| -> Result<Vec<(f64, f64)>, FeatureError> {
        positions
            .iter()
            .map(|p| match p.as_slice() {
                [x, y, ..] => Ok((*x, *y)),
                _ => Err(FeatureError::Degenerate),
            })
            .collect()
    };

    match &geometry.value {
        Value::LineString(positions) => Ok(vec![to_pairs(positions)?]),
        Value::MultiLineString(lines) => lines.iter().map(to_pairs).collect(),
        Value::Point(_) => Err(FeatureError::UnsupportedGeometry("Point".to_string())),
        Value::MultiPoint(_) => Err(FeatureError::UnsupportedGeometry("MultiPoint".to_string())),
        Value::Polygon(_) => Err(FeatureError::UnsupportedGeometry("Polygon".to_string())),
        Value::MultiPolygon(_) => Err(FeatureError::UnsupportedGeometry(
            "MultiPolygon".to_string(),
        )),
        Value::GeometryCollection(_) => Err(FeatureError::UnsupportedGeometry(
            "GeometryCollection".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROADS: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "id": "w101",
                "properties": { "highway": "trunk" },
                "geometry": { "type": "LineString", "coordinates": [[84.0, 27.5], [84.1, 27.5]] }
            },
            {
                "type": "Feature",
                "id": 202,
                "properties": { "tags": { "highway": "primary", "name": "Mahendra" } },
                "geometry": {
                    "type": "MultiLineString",
                    "coordinates": [[[84.0, 27.6], [84.1, 27.6]], [[84.2, 27.6], [84.3, 27.7]]]
                }
            },
            {
                "type": "Feature",
                "properties": { "highway": "bus_stop" },
                "geometry": { "type": "Point", "coordinates": [84.0, 27.5] }
            },
            {
                "type": "Feature",
                "properties": { "highway": "track" },
                "geometry": null
            }
        ]
    }"#;

    #[test]
    fn test_reads_lines_and_categories() {
        let extract = read_geojson(ROADS, "highway", Crs::Wgs84).unwrap();
        assert_eq!(extract.lines.len(), 2);

        assert_eq!(extract.lines[0].source_id, 101);
        assert_eq!(extract.lines[0].category.as_deref(), Some("trunk"));
        assert_eq!(extract.lines[0].crs, Some(Crs::Wgs84));

        assert_eq!(extract.lines[1].source_id, 202);
        assert_eq!(extract.lines[1].category.as_deref(), Some("primary"));
        assert_eq!(extract.lines[1].parts.len(), 2);
    }

    #[test]
    fn test_non_lines_are_rejected() {
        let extract = read_geojson(ROADS, "highway", Crs::Wgs84).unwrap();
        assert_eq!(extract.rejected.len(), 2);
        assert_eq!(extract.rejected[0].source_id, 2);
        assert_eq!(
            extract.rejected[0].error,
            FeatureError::UnsupportedGeometry("Point".to_string())
        );
        assert_eq!(extract.rejected[1].error, FeatureError::Empty);
    }

    #[test]
    fn test_invalid_document() {
        assert!(matches!(
            read_geojson("{ not json", "highway", Crs::Wgs84),
            Err(ProximityError::GeoJson(_))
        ));
    }
}
