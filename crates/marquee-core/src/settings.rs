//! Per-add-on settings persistence.
//!
//! One JSON document per add-on id. Values are validated against the
//! manifest's settings schema on save; corrupt documents on disk are
//! reported and treated as empty rather than failing the load.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use tracing::warn;

use crate::addon::manifest::SettingsSchema;
use crate::error::{Error, Result};

#[derive(Clone)]
pub struct SettingsStore {
    data_dir: PathBuf,
}

impl SettingsStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Result<Self> {
        let data_dir = data_dir.into();
        fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    pub fn with_default_dir() -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "could not find home directory",
            ))
        })?;
        Self::new(home.join(".marquee").join("data"))
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn path_for(&self, addon_id: &str) -> PathBuf {
        self.data_dir.join(format!("{addon_id}-settings.json"))
    }

    /// Stored values for `addon_id`; empty when nothing is stored or the
    /// document does not parse.
    pub fn load(&self, addon_id: &str) -> IndexMap<String, serde_json::Value> {
        let path = self.path_for(addon_id);
        if !path.exists() {
            return IndexMap::new();
        }
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) => {
                warn!(addon = %addon_id, path = %path.display(), "settings unreadable: {err}");
                return IndexMap::new();
            }
        };
        match serde_json::from_str(&content) {
            Ok(values) => values,
            Err(err) => {
                warn!(addon = %addon_id, path = %path.display(), "settings corrupt, ignoring: {err}");
                IndexMap::new()
            }
        }
    }

    /// Schema defaults overlaid with whatever is stored. This is what the
    /// host hands an add-on on first load.
    pub fn load_or_defaults(
        &self,
        addon_id: &str,
        schema: Option<&SettingsSchema>,
    ) -> IndexMap<String, serde_json::Value> {
        let mut values = schema.map(SettingsSchema::defaults).unwrap_or_default();
        for (key, value) in self.load(addon_id) {
            values.insert(key, value);
        }
        values
    }

    /// Validate `values` against the schema and persist them.
    pub fn save(
        &self,
        addon_id: &str,
        values: &IndexMap<String, serde_json::Value>,
        schema: Option<&SettingsSchema>,
    ) -> Result<()> {
        if let Some(schema) = schema {
            let schema_doc = schema.to_json_schema();
            let validator =
                jsonschema::validator_for(&schema_doc).map_err(|e| Error::InvalidSettings {
                    id: addon_id.to_string(),
                    reason: e.to_string(),
                })?;
            let doc = serde_json::to_value(values)?;
            if let Err(err) = validator.validate(&doc) {
                return Err(Error::InvalidSettings {
                    id: addon_id.to_string(),
                    reason: err.to_string(),
                });
            }
        }
        let content = serde_json::to_string_pretty(values)?;
        fs::write(self.path_for(addon_id), content)?;
        Ok(())
    }
}
