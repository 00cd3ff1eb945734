use crate::categories::CategoryTable;
use crate::crs::Crs;
use crate::errors::{ProximityError, io_err};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// OSM key whose value is the road class
    pub tag_key: String,
    /// CRS assumed for inputs that do not declare one
    pub source_crs: Crs,
    /// Working CRS; must be projected so distances come out in metres
    pub target_crs: Crs,
    pub longitude_column: String,
    pub latitude_column: String,
    pub column_prefix: String,
    pub categories: CategoryTable,
    pub parallel: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            tag_key: "highway".to_string(),
            source_crs: Crs::Wgs84,
            // UTM 45N covers Nepal
            target_crs: Crs::Utm {
                zone: 45,
                north: true,
            },
            longitude_column: "longitude".to_string(),
            latitude_column: "latitude".to_string(),
            column_prefix: "dist_to_".to_string(),
            categories: CategoryTable::default(),
            parallel: true,
        }
    }
}

impl RunConfig {
    /// Read a config file. `.ron` is parsed as RON, anything else as JSON.
    pub fn load(path: &Path) -> Result<Self, ProximityError> {
        let text = std::fs::read_to_string(path).map_err(|e| io_err!(path, e))?;

        let config: RunConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("ron") => ron::from_str(&text)?,
            _ => serde_json::from_str(&text)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ProximityError> {
        if !self.target_crs.is_projected() {
            return Err(ProximityError::Config(format!(
                "target CRS {} is geographic; distances need a projected CRS",
                self.target_crs
            )));
        }
        if self.tag_key.is_empty() {
            return Err(ProximityError::Config("tag_key must not be empty".to_string()));
        }
        self.categories.validate()
    }

    pub fn column_name(&self, subset: &str) -> String {
        format!("{}{}", self.column_prefix, subset)
    }
}
