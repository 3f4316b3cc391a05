//! 应用清单：用 TOML 声明切片树与提供者
//!
//! ```toml
//! name = "bookshelf"
//! boot_mode = "lazy"
//!
//! [settings]
//! database_url = "mem://bookshelf"
//!
//! [[providers]]
//! name = "db"
//!
//! [[slices]]
//! name = "admin"
//! import_families = ["db"]
//!
//! [[slices.imports]]
//! from = "app"
//! keys = ["greeting"]
//! ```

use super::Settings;
use crate::app::{Application, BootMode, DEFAULT_SHARED_COMPONENT_KEYS};
use crate::errors::{ContainerError, Result};
use crate::provider::ProviderBuilder;
use crate::slice::{Import, Slice};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppManifest {
    pub name: String,
    #[serde(default)]
    pub boot_mode: BootMode,
    #[serde(default = "default_shared_keys")]
    pub shared_component_keys: Vec<String>,
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub providers: Vec<ProviderManifest>,
    #[serde(default)]
    pub slices: Vec<SliceManifest>,
}

fn default_shared_keys() -> Vec<String> {
    DEFAULT_SHARED_COMPONENT_KEYS.iter().map(|key| key.to_string()).collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SliceManifest {
    pub name: String,
    /// 父切片路径，缺省为根
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub imports: Vec<ImportManifest>,
    #[serde(default)]
    pub exports: Option<Vec<String>>,
    #[serde(default)]
    pub import_families: Vec<String>,
    #[serde(default)]
    pub inherit_config: BTreeMap<String, bool>,
    #[serde(default)]
    pub providers: Vec<ProviderManifest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImportManifest {
    pub from: String,
    #[serde(default)]
    pub keys: Vec<String>,
    #[serde(default)]
    pub all: bool,
    #[serde(default, rename = "as")]
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderManifest {
    pub name: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub extensions: Option<Vec<String>>,
    #[serde(default)]
    pub plugins: Option<Vec<String>>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

fn default_kind() -> String {
    "database".to_string()
}

impl AppManifest {
    pub fn from_toml_str(content: &str, origin: &str) -> Result<Self> {
        toml::from_str(content).map_err(|err| ContainerError::Manifest {
            origin: origin.to_string(),
            reason: err.to_string(),
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let origin = path.display().to_string();
        let content = fs::read_to_string(path).map_err(|err| ContainerError::Manifest {
            origin: origin.clone(),
            reason: err.to_string(),
        })?;
        debug!(path = %origin, "loaded application manifest");
        Self::from_toml_str(&content, &origin)
    }

    /// 构建应用：先按声明顺序建立全部切片与提供者，再登记导入
    pub fn build(&self) -> Result<Application> {
        let app = Application::builder(self.name.clone())
            .settings(self.settings.clone())
            .boot_mode(self.boot_mode)
            .shared_component_keys(self.shared_component_keys.clone())
            .build()?;

        for provider in &self.providers {
            app.root().register_provider(provider.to_builder(&self.name)?)?;
        }

        let mut declared = Vec::with_capacity(self.slices.len());
        for manifest in &self.slices {
            let parent = match &manifest.parent {
                Some(path) => app.slice(path)?,
                None => app.root().clone(),
            };
            let slice = parent.register_slice(manifest.name.clone())?;
            manifest.apply(&slice)?;
            declared.push((manifest, slice));
        }

        for (manifest, slice) in declared {
            for import in &manifest.imports {
                slice.import(import.to_import(slice.qualified_name())?)?;
            }
        }
        Ok(app)
    }
}

impl SliceManifest {
    fn apply(&self, slice: &Slice) -> Result<()> {
        if let Some(exports) = &self.exports {
            slice.export(exports.iter().cloned());
        }
        for family in &self.import_families {
            slice.enable_import(family.clone());
        }
        for (family, inherit) in &self.inherit_config {
            slice.set_inherit_config(family.clone(), *inherit);
        }
        for provider in &self.providers {
            slice.register_provider(provider.to_builder(slice.qualified_name())?)?;
        }
        Ok(())
    }
}

impl ImportManifest {
    fn to_import(&self, slice: &str) -> Result<Import> {
        let mut import = Import::from_slice(self.from.clone());
        import = match (self.all, self.keys.is_empty()) {
            (true, true) => import.all(),
            (false, false) => import.keys(self.keys.iter().cloned()),
            (true, false) => {
                return Err(ContainerError::Manifest {
                    origin: slice.to_string(),
                    reason: format!("import from '{}' sets both 'all' and 'keys'", self.from),
                })
            }
            (false, true) => {
                return Err(ContainerError::Manifest {
                    origin: slice.to_string(),
                    reason: format!("import from '{}' selects no keys", self.from),
                })
            }
        };
        if let Some(namespace) = &self.namespace {
            import = import.as_namespace(namespace.clone());
        }
        Ok(import)
    }
}

impl ProviderManifest {
    fn to_builder(&self, slice: &str) -> Result<ProviderBuilder> {
        if self.kind != "database" {
            return Err(ContainerError::Manifest {
                origin: format!("{}:{}", slice, self.name),
                reason: format!("unsupported provider kind '{}'", self.kind),
            });
        }

        let mut builder = ProviderBuilder::database_named(self.name.clone());
        if let Some(family) = &self.family {
            builder = builder.family(family.clone());
        }

        let mut config = Map::new();
        if let Some(target) = &self.target {
            config.insert("target".to_string(), Value::String(target.clone()));
        }
        if let Some(extensions) = &self.extensions {
            config.insert("extensions".to_string(), string_array(extensions));
        }
        if let Some(plugins) = &self.plugins {
            config.insert("plugins".to_string(), string_array(plugins));
        }
        builder = builder.config(Value::Object(config));

        for dependency in &self.depends_on {
            builder = builder.depends_on(dependency.clone());
        }
        Ok(builder)
    }
}

fn string_array(items: &[String]) -> Value {
    Value::Array(items.iter().cloned().map(Value::String).collect())
}
