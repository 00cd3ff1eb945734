// Road class subsets, configured as name -> accepted tag values

use crate::errors::ProximityError;
use crate::geometry::LineFeature;
use ahash::{AHashSet, HashSet, HashSetExt};
use log::{info, warn};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySpec {
    pub name: String,
    pub tags: Vec<String>,
}

impl CategorySpec {
    pub fn new(name: &str, tags: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// Ordered table of subsets. Order is the output column order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryTable(pub Vec<CategorySpec>);

impl Default for CategoryTable {
    /// The road classes used for the Nepal study. Note that the
    /// secondary and tertiary lists deliberately skip the classes in between;
    /// they are kept exactly as they were configured.
    fn default() -> Self {
        CategoryTable(vec![
            CategorySpec::new("trunk_roads", &["trunk"]),
            CategorySpec::new("primary_roads_and_above", &["trunk", "primary"]),
            CategorySpec::new("secondary_roads_and_above", &["trunk", "secondary"]),
            CategorySpec::new("tertiary_roads_and_above", &["trunk", "tertiary"]),
            CategorySpec::new("all_roads", &["trunk", "tertiary", "unclassified"]),
        ])
    }
}

impl CategoryTable {
    pub fn validate(&self) -> Result<(), ProximityError> {
        if self.0.is_empty() {
            return Err(ProximityError::Config(
                "category table has no entries".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for spec in &self.0 {
            if spec.name.trim().is_empty() {
                return Err(ProximityError::Config(
                    "category name must not be empty".to_string(),
                ));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(ProximityError::Config(format!(
                    "category '{}' is listed twice",
                    spec.name
                )));
            }
        }

        Ok(())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|spec| spec.name.as_str())
    }

    /// Every tag value mentioned anywhere in the table.
    pub fn all_tags(&self) -> AHashSet<&str> {
        self.0
            .iter()
            .flat_map(|spec| spec.tags.iter().map(|t| t.as_str()))
            .collect()
    }
}

/// Features selected for one configured subset. May be empty.
#[derive(Debug, Clone)]
pub struct NamedSubset<'a> {
    pub name: &'a str,
    pub features: Vec<&'a LineFeature>,
}

impl NamedSubset<'_> {
    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Split `features` into one subset per table entry, in table order. A
/// feature lands in every subset whose tag list contains its category.
pub fn partition<'a>(features: &'a [LineFeature], table: &'a CategoryTable) -> Vec<NamedSubset<'a>> {
    table
        .0
        .iter()
        .map(|spec| {
            let accepted: AHashSet<&str> = spec.tags.iter().map(|t| t.as_str()).collect();

            let selected: Vec<&LineFeature> = features
                .iter()
                .filter(|f| {
                    f.category
                        .as_deref()
                        .is_some_and(|category| accepted.contains(category))
                })
                .collect();

            if selected.is_empty() {
                warn!("Subset {} matched no features", spec.name);
            } else {
                info!("{}: {} features", spec.name, selected.len());
            }

            NamedSubset {
                name: spec.name.as_str(),
                features: selected,
            }
        })
        .collect()
}
