use indexmap::IndexMap;
use marquee_addon::{ApiVersion, InstanceKind};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Platform identifier, e.g. "linux-x64", "darwin-arm64", "win32-x64".
pub type Platform = String;

/// One interface the add-on implements, with the API version it was built
/// against. The loaded library's descriptor table must agree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvidedInterface {
    pub kind: InstanceKind,
    pub api: ApiVersion,
}

/// Where the shared library lives inside the package, per platform.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformLibraries {
    /// Platform-specific relative library paths.
    #[serde(default)]
    pub platforms: IndexMap<Platform, String>,
    /// Legacy single library path, used when no platform entry matches.
    #[serde(default)]
    pub library: Option<String>,
}

impl PlatformLibraries {
    /// Relative library path for the platform this host was built for.
    pub fn for_current_platform(&self) -> Option<&str> {
        if let Some(lib) = self.platforms.get(&Self::current_platform()) {
            return Some(lib.as_str());
        }
        self.library.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.platforms.is_empty() && self.library.is_none()
    }

    /// Identifier of the platform this host was built for.
    pub fn current_platform() -> Platform {
        #[cfg(all(target_os = "macos", target_arch = "aarch64"))]
        return "darwin-arm64".to_string();

        #[cfg(all(target_os = "macos", target_arch = "x86_64"))]
        return "darwin-x64".to_string();

        #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
        return "linux-x64".to_string();

        #[cfg(all(target_os = "linux", target_arch = "aarch64"))]
        return "linux-arm64".to_string();

        #[cfg(all(target_os = "windows", target_arch = "x86_64"))]
        return "win32-x64".to_string();

        #[cfg(not(any(
            all(target_os = "macos", target_arch = "aarch64"),
            all(target_os = "macos", target_arch = "x86_64"),
            all(target_os = "linux", target_arch = "x86_64"),
            all(target_os = "linux", target_arch = "aarch64"),
            all(target_os = "windows", target_arch = "x86_64"),
        )))]
        return "unknown".to_string();
    }
}

/// Option for select fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: String,
    pub label: String,
}

/// One field of an add-on's settings dialog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum SettingField {
    #[serde(rename = "bool")]
    Bool {
        label: String,
        #[serde(default)]
        default: Option<bool>,
    },
    #[serde(rename = "int")]
    Int {
        label: String,
        #[serde(default)]
        default: Option<i64>,
        #[serde(default)]
        min: Option<i64>,
        #[serde(default)]
        max: Option<i64>,
    },
    #[serde(rename = "float")]
    Float {
        label: String,
        #[serde(default)]
        default: Option<f64>,
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    #[serde(rename = "string")]
    String {
        label: String,
        #[serde(default)]
        default: Option<String>,
    },
    #[serde(rename = "select")]
    Select {
        label: String,
        #[serde(default)]
        default: Option<String>,
        options: Vec<SelectOption>,
    },
}

impl SettingField {
    /// Default value declared by the field, as JSON.
    pub fn default_value(&self) -> Option<serde_json::Value> {
        match self {
            SettingField::Bool { default, .. } => default.map(serde_json::Value::from),
            SettingField::Int { default, .. } => default.map(serde_json::Value::from),
            SettingField::Float { default, .. } => default.map(serde_json::Value::from),
            SettingField::String { default, .. } => {
                default.clone().map(serde_json::Value::from)
            }
            SettingField::Select { default, .. } => {
                default.clone().map(serde_json::Value::from)
            }
        }
    }

    /// JSON Schema fragment validating one stored value of this field.
    fn json_schema(&self) -> serde_json::Value {
        match self {
            SettingField::Bool { .. } => serde_json::json!({"type": "boolean"}),
            SettingField::Int { min, max, .. } => {
                let mut schema = serde_json::json!({"type": "integer"});
                if let Some(min) = min {
                    schema["minimum"] = (*min).into();
                }
                if let Some(max) = max {
                    schema["maximum"] = (*max).into();
                }
                schema
            }
            SettingField::Float { min, max, .. } => {
                let mut schema = serde_json::json!({"type": "number"});
                if let Some(min) = min {
                    schema["minimum"] = (*min).into();
                }
                if let Some(max) = max {
                    schema["maximum"] = (*max).into();
                }
                schema
            }
            SettingField::String { .. } => serde_json::json!({"type": "string"}),
            SettingField::Select { options, .. } => {
                let values: Vec<&str> = options.iter().map(|o| o.value.as_str()).collect();
                serde_json::json!({"enum": values})
            }
        }
    }
}

/// Settings schema embedded in the manifest; declaration order is the
/// dialog order, so the map keeps it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsSchema {
    #[serde(default = "default_schema_version")]
    pub version: u32,
    #[serde(default)]
    pub schema: IndexMap<String, SettingField>,
}

fn default_schema_version() -> u32 {
    1
}

impl SettingsSchema {
    /// JSON Schema document validating a full stored settings object.
    pub fn to_json_schema(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        for (key, field) in &self.schema {
            properties.insert(key.clone(), field.json_schema());
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "additionalProperties": false,
        })
    }

    /// First-run values synthesised from the declared defaults.
    pub fn defaults(&self) -> IndexMap<String, serde_json::Value> {
        self.schema
            .iter()
            .filter_map(|(key, field)| field.default_value().map(|v| (key.clone(), v)))
            .collect()
    }
}

/// The `addon.json` at the root of every installed add-on package.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddonManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub summary: String,
    pub provides: Vec<ProvidedInterface>,
    #[serde(default)]
    pub library: PlatformLibraries,
    #[serde(default)]
    pub settings: Option<SettingsSchema>,
    /// Set by the repository when the add-on is known broken; such add-ons
    /// stay listed but refuse to load.
    #[serde(default)]
    pub broken: Option<String>,
}

impl AddonManifest {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::ManifestParse(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(Error::InvalidManifest("id is required".to_string()));
        }
        if self.name.is_empty() {
            return Err(Error::InvalidManifest("name is required".to_string()));
        }
        if self.version.is_empty() {
            return Err(Error::InvalidManifest("version is required".to_string()));
        }
        if self.provides.is_empty() {
            return Err(Error::InvalidManifest(format!(
                "{} provides no interfaces",
                self.id
            )));
        }
        let mut seen = std::collections::HashSet::new();
        for provided in &self.provides {
            if !seen.insert(provided.kind) {
                return Err(Error::InvalidManifest(format!(
                    "{} declares {} twice",
                    self.id, provided.kind
                )));
            }
        }
        if self.library.is_empty() {
            return Err(Error::InvalidManifest(format!(
                "{} names no library",
                self.id
            )));
        }
        Ok(())
    }

    /// Whether the add-on declares an implementation of `kind`.
    pub fn provides(&self, kind: InstanceKind) -> bool {
        self.provides.iter().any(|p| p.kind == kind)
    }

    /// Declared API version for `kind`.
    pub fn api_for(&self, kind: InstanceKind) -> Option<ApiVersion> {
        self.provides.iter().find(|p| p.kind == kind).map(|p| p.api)
    }
}
