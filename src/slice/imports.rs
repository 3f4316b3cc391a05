use super::Slice;
use std::sync::Weak;

/// 导入声明
///
/// ```ignore
/// admin.import(Import::from_slice("app").keys(["greeting"]))?;
/// admin.import(Import::from_slice("app").all().as_namespace("core"))?;
/// ```
#[derive(Debug, Clone)]
pub struct Import {
    pub(crate) from: String,
    pub(crate) keys: ImportKeys,
    pub(crate) namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportKeys {
    Only(Vec<String>),
    /// 祖先导出的全部键
    All,
}

impl Import {
    pub fn from_slice(path: impl Into<String>) -> Self {
        Self {
            from: path.into(),
            keys: ImportKeys::Only(Vec::new()),
            namespace: None,
        }
    }

    pub fn keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut selected = match self.keys {
            ImportKeys::Only(existing) => existing,
            ImportKeys::All => Vec::new(),
        };
        selected.extend(keys.into_iter().map(Into::into));
        self.keys = ImportKeys::Only(selected);
        self
    }

    pub fn all(mut self) -> Self {
        self.keys = ImportKeys::All;
        self
    }

    /// 本地键加前缀，`greeting` 导入为 `<namespace>.greeting`
    pub fn as_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

pub(crate) struct ImportRule {
    pub(crate) source: Weak<Slice>,
    pub(crate) source_path: String,
    pub(crate) keys: ImportKeys,
    pub(crate) namespace: Option<String>,
}

impl ImportRule {
    /// 本地键对应的远端键；不属于本规则时返回 `None`
    pub(crate) fn remote_key(&self, local: &str) -> Option<String> {
        let stripped = match &self.namespace {
            Some(namespace) => local.strip_prefix(namespace.as_str())?.strip_prefix('.')?,
            None => local,
        };
        match &self.keys {
            ImportKeys::All => Some(stripped.to_string()),
            ImportKeys::Only(keys) => keys.iter().find(|key| key.as_str() == stripped).cloned(),
        }
    }

    /// 显式列出的本地键
    pub(crate) fn local_keys(&self) -> Vec<String> {
        match &self.keys {
            ImportKeys::All => Vec::new(),
            ImportKeys::Only(keys) => keys.iter().map(|key| self.localize(key)).collect(),
        }
    }

    pub(crate) fn localize(&self, remote: &str) -> String {
        match &self.namespace {
            Some(namespace) => format!("{}.{}", namespace, remote),
            None => remote.to_string(),
        }
    }

    pub(crate) fn is_wildcard(&self) -> bool {
        self.keys == ImportKeys::All
    }
}
