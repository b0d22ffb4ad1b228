use std::{fs, path::Path};

use anyhow::{Context as _, Result};
use indexmap::IndexMap;
use serde::Deserialize;

pub const UNKNOWN_LOCATION: &str = "Unknown";

const TEMPERATURES: &str = "temperatures";

const MEASUREMENTS: [(&str, &str); 4] = [
    ("LaCrosse-TX", TEMPERATURES),
    ("LaCrosse-TX29IT", TEMPERATURES),
    ("Acurite-606TX", TEMPERATURES),
    ("Acurite-Tower", TEMPERATURES),
];

const LOCATIONS: [(&str, &[(u32, &str)]); 4] = [
    ("LaCrosse-TX", &[(14, "Server Room")]),
    ("LaCrosse-TX29IT", &[(49, "Backdoor")]),
    ("Acurite-606TX", &[(93, "Outside Shade")]),
    (
        "Acurite-Tower",
        &[
            (8413, "Work Office"),
            (16018, "Personal Office"),
            (3162, "Master Bedroom"),
            (14340, "Workshop"),
        ],
    ),
];

const TAGS: [&str; 2] = ["channel", "id"];

const FIELDS: [&str; 3] = ["temperature_F", "humidity", "battery_ok"];

pub type LocationTable = IndexMap<String, IndexMap<String, String>>;

#[derive(Debug, Clone, PartialEq)]
pub struct Mappings {
    measurements: IndexMap<String, String>,
    locations: LocationTable,
    tags: Vec<String>,
    fields: Vec<String>,
}

// Omitted keys keep the built-in tables
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct MappingsFile {
    measurements: Option<IndexMap<String, String>>,
    locations: Option<LocationTable>,
    tags: Option<Vec<String>>,
    fields: Option<Vec<String>>,
}

impl Default for Mappings {
    fn default() -> Self {
        let measurements = MEASUREMENTS
            .iter()
            .map(|&(model, measurement)| (model.to_string(), measurement.to_string()))
            .collect();
        let locations = LOCATIONS
            .iter()
            .map(|&(model, sensors)| {
                let sensors = sensors
                    .iter()
                    .map(|&(id, location)| (id.to_string(), location.to_string()))
                    .collect();
                (model.to_string(), sensors)
            })
            .collect();

        Self {
            measurements,
            locations,
            tags: TAGS.iter().map(|t| t.to_string()).collect(),
            fields: FIELDS.iter().map(|f| f.to_string()).collect(),
        }
    }
}

impl Mappings {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read mappings file: {}", path.display()))?;

        Self::from_json(&contents)
            .with_context(|| format!("failed to parse mappings file: {}", path.display()))
    }

    pub fn from_json(contents: &str) -> Result<Self> {
        let file: MappingsFile =
            serde_json::from_str(contents).context("invalid mappings JSON")?;
        let defaults = Self::default();

        Ok(Self {
            measurements: file.measurements.unwrap_or(defaults.measurements),
            locations: file.locations.unwrap_or(defaults.locations),
            tags: file.tags.unwrap_or(defaults.tags),
            fields: file.fields.unwrap_or(defaults.fields),
        })
    }

    /// Unmapped models name themselves.
    pub fn measurement_name<'a>(&'a self, model: &'a str) -> &'a str {
        self.measurements
            .get(model)
            .map(String::as_str)
            .unwrap_or(model)
    }

    pub fn location(&self, model: &str, id: Option<&str>) -> &str {
        id.and_then(|id| self.locations.get(model)?.get(id))
            .map(String::as_str)
            .unwrap_or(UNKNOWN_LOCATION)
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }
}
