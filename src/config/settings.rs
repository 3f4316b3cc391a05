//! 外部提供的键值配置
//!
//! 由环境配置协作方解析好后传入（连接目标、扩展开关等），
//! 容器本身不读取环境变量或配置文件。

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings {
    values: BTreeMap<String, String>,
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            values: pairs
                .into_iter()
                .map(|(key, value)| (key.into(), value.into()))
                .collect(),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// 仅查找切片限定的键 `<slice>.<key>`
    pub fn get_scoped(&self, slice: &str, key: &str) -> Option<&str> {
        self.get(&format!("{}.{}", slice, key))
    }

    /// 先查切片限定的键，再回退到全局键
    pub fn lookup(&self, slice: &str, key: &str) -> Option<&str> {
        self.get_scoped(slice, key).or_else(|| self.get(key))
    }

    /// 逗号分隔的列表值，例如 `extensions = "pg_array, pg_json"`
    pub fn list(value: &str) -> Vec<String> {
        value
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoped_lookup_falls_back_to_global() {
        let settings = Settings::new()
            .with("database_url", "mem://global")
            .with("admin.database_url", "mem://admin");

        assert_eq!(settings.lookup("admin", "database_url"), Some("mem://admin"));
        assert_eq!(settings.lookup("main", "database_url"), Some("mem://global"));
        assert_eq!(settings.get_scoped("main", "database_url"), None);
    }

    #[test]
    fn list_values_are_trimmed() {
        assert_eq!(
            Settings::list(" pg_array, ,pg_json "),
            vec!["pg_array".to_string(), "pg_json".to_string()]
        );
    }
}
