use crate::errors::{ContainerError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// 规范化后的网关配置
///
/// 扩展与插件使用有序集合，声明顺序不影响指纹。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub target: String,
    #[serde(default)]
    pub extensions: BTreeSet<String>,
    #[serde(default)]
    pub plugins: BTreeSet<String>,
    #[serde(default)]
    pub options: BTreeMap<String, Value>,
}

impl GatewayConfig {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: normalize_target(&target.into()),
            ..Self::default()
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extensions.insert(extension.into());
        self
    }

    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugins.insert(plugin.into());
        self
    }

    /// 从提供者的最终配置中读取
    pub fn from_value(provider: &str, value: &Value) -> Result<Self> {
        let target = match value.get("target") {
            Some(Value::String(target)) if !target.trim().is_empty() => target,
            Some(Value::String(_)) | None | Some(Value::Null) => {
                return Err(ContainerError::Configuration {
                    provider: provider.to_string(),
                    setting: "target".to_string(),
                    reason: "a connection target is required".to_string(),
                })
            }
            Some(other) => {
                return Err(ContainerError::Configuration {
                    provider: provider.to_string(),
                    setting: "target".to_string(),
                    reason: format!("expected a string, found {}", other),
                })
            }
        };

        let mut config = GatewayConfig::new(target.as_str());
        config.extensions = string_set(provider, "extensions", value.get("extensions"))?;
        config.plugins = string_set(provider, "plugins", value.get("plugins"))?;
        if let Some(Value::Object(options)) = value.get("options") {
            config.options = options.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        }
        Ok(config)
    }

    /// 计算指纹
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(self)
    }

    pub fn scheme(&self) -> Option<&str> {
        self.target.split_once("://").map(|(scheme, _)| scheme)
    }
}

fn string_set(provider: &str, setting: &str, value: Option<&Value>) -> Result<BTreeSet<String>> {
    match value {
        None | Some(Value::Null) => Ok(BTreeSet::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(name) => Ok(name.trim().to_string()),
                other => Err(ContainerError::Configuration {
                    provider: provider.to_string(),
                    setting: setting.to_string(),
                    reason: format!("expected a list of names, found {}", other),
                }),
            })
            .collect(),
        Some(other) => Err(ContainerError::Configuration {
            provider: provider.to_string(),
            setting: setting.to_string(),
            reason: format!("expected a list of names, found {}", other),
        }),
    }
}

/// 连接目标规范化：去除空白与末尾的 `/`，协议名小写
pub fn normalize_target(target: &str) -> String {
    let trimmed = target.trim().trim_end_matches('/');
    match trimmed.split_once("://") {
        Some((scheme, rest)) => format!("{}://{}", scheme.to_ascii_lowercase(), rest),
        None => trimmed.to_string(),
    }
}

/// 网关配置的规范哈希
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(config: &GatewayConfig) -> Self {
        // JSON 编码保证各元素的边界不会混淆，例如 ["a,b"] 与 ["a", "b"]
        let canonical = serde_json::json!([
            normalize_target(&config.target),
            config.extensions,
            config.plugins,
            config.options,
        ]);
        Fingerprint(format!("{:x}", md5::compute(canonical.to_string().as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", &self.0[..12.min(self.0.len())])
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extension_order_does_not_matter() {
        let a = GatewayConfig::new("mem://x")
            .with_extension("pg_json")
            .with_extension("pg_array");
        let b = GatewayConfig::new("mem://x")
            .with_extension("pg_array")
            .with_extension("pg_json");
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn one_extra_extension_changes_fingerprint() {
        let a = GatewayConfig::new("mem://x");
        let b = GatewayConfig::new("mem://x").with_extension("strict_mode");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn separators_inside_names_do_not_collide() {
        let joined = GatewayConfig::new("mem://x").with_extension("a,b");
        let split = GatewayConfig::new("mem://x").with_extension("a").with_extension("b");
        assert_ne!(joined.fingerprint(), split.fingerprint());

        let shifted = GatewayConfig::new("mem://x").with_plugin("a");
        let extension = GatewayConfig::new("mem://x").with_extension("a");
        assert_ne!(shifted.fingerprint(), extension.fingerprint());
    }

    #[test]
    fn targets_are_normalized() {
        assert_eq!(normalize_target("  MEM://x/ "), "mem://x");
        assert_eq!(
            GatewayConfig::new("mem://x/").fingerprint(),
            GatewayConfig::new("MEM://x").fingerprint()
        );
    }

    #[test]
    fn from_value_requires_target() {
        let err = GatewayConfig::from_value("db", &json!({ "extensions": [] })).unwrap_err();
        assert!(matches!(err, ContainerError::Configuration { ref setting, .. } if setting == "target"));
    }

    #[test]
    fn from_value_reads_sets() {
        let config = GatewayConfig::from_value(
            "db",
            &json!({ "target": "mem://x", "extensions": ["b", "a", "b"], "plugins": ["timestamps"] }),
        )
        .unwrap();
        assert_eq!(config.extensions.iter().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(config.plugins.contains("timestamps"));
        assert_eq!(config.scheme(), Some("mem"));
    }
}
