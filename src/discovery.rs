//! 按文件约定自动注册组件
//!
//! 文件扫描本身由调用方完成；这里只把相对源路径换算成组件键，
//! 并跳过约定中不属于组件的目录。

use crate::container::Resolution;
use crate::errors::Result;
use crate::inflector::Inflector;
use crate::slice::Slice;
use std::path::{Component as PathComponent, Path};
use std::sync::Arc;

/// 不注册为组件的目录
pub const DEFAULT_EXCLUDED_DIRS: &[&str] = &["entities", "structs", "sql"];

/// 发现的组件：键与加载方式
pub struct DiscoveredComponent {
    pub key: String,
    pub loader: Resolution,
}

impl DiscoveredComponent {
    pub fn new(key: impl Into<String>, loader: Resolution) -> Self {
        Self {
            key: key.into(),
            loader,
        }
    }
}

pub struct AutoRegistration {
    inflector: Arc<dyn Inflector>,
    excluded_dirs: Vec<String>,
}

impl AutoRegistration {
    pub fn new(inflector: Arc<dyn Inflector>) -> Self {
        Self {
            inflector,
            excluded_dirs: DEFAULT_EXCLUDED_DIRS.iter().map(|dir| dir.to_string()).collect(),
        }
    }

    pub fn exclude(mut self, dir: impl Into<String>) -> Self {
        self.excluded_dirs.push(dir.into());
        self
    }

    /// `repos/BookRepo.rs` -> `repos.book_repo`
    ///
    /// 位于排除目录下的文件、模块入口文件（`mod.rs`、`lib.rs`）以及非 `.rs` 文件返回 `None`。
    pub fn key_for_path(&self, relative: &Path) -> Option<String> {
        if relative.extension().and_then(|ext| ext.to_str()) != Some("rs") {
            return None;
        }
        let stem = relative.file_stem()?.to_str()?;
        if stem == "mod" || stem == "lib" {
            return None;
        }

        let mut segments = Vec::new();
        if let Some(parent) = relative.parent() {
            for component in parent.components() {
                let PathComponent::Normal(dir) = component else {
                    return None;
                };
                let dir = dir.to_str()?;
                if self.excluded_dirs.iter().any(|excluded| excluded == dir) {
                    return None;
                }
                segments.push(self.inflector.underscore(dir));
            }
        }
        segments.push(self.inflector.underscore(stem));
        Some(segments.join("."))
    }

    /// 为每个可注册的路径生成组件
    pub fn discover<I, P, F>(&self, paths: I, loader: F) -> Vec<DiscoveredComponent>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
        F: Fn(&str) -> Resolution,
    {
        paths
            .into_iter()
            .filter_map(|path| {
                let key = self.key_for_path(path.as_ref());
                if key.is_none() {
                    tracing::trace!(path = %path.as_ref().display(), "skipping non-component file");
                }
                key
            })
            .map(|key| {
                let resolution = loader(&key);
                DiscoveredComponent::new(key, resolution)
            })
            .collect()
    }

    pub fn register_all(&self, slice: &Slice, components: Vec<DiscoveredComponent>) -> Result<usize> {
        slice.auto_register(components)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Application;
    use crate::inflector::DefaultInflector;

    fn auto() -> AutoRegistration {
        AutoRegistration::new(Arc::new(DefaultInflector::new()))
    }

    #[test]
    fn paths_map_to_dotted_keys() {
        let auto = auto();
        assert_eq!(auto.key_for_path(Path::new("repos/BookRepo.rs")).as_deref(), Some("repos.book_repo"));
        assert_eq!(auto.key_for_path(Path::new("operations/create_book.rs")).as_deref(), Some("operations.create_book"));
        assert_eq!(auto.key_for_path(Path::new("mailer.rs")).as_deref(), Some("mailer"));
    }

    #[test]
    fn excluded_and_non_component_files_are_skipped() {
        let auto = auto().exclude("templates");
        assert_eq!(auto.key_for_path(Path::new("entities/book.rs")), None);
        assert_eq!(auto.key_for_path(Path::new("db/sql/books.rs")), None);
        assert_eq!(auto.key_for_path(Path::new("templates/index.rs")), None);
        assert_eq!(auto.key_for_path(Path::new("repos/mod.rs")), None);
        assert_eq!(auto.key_for_path(Path::new("schema.sql")), None);
        assert_eq!(auto.key_for_path(Path::new("../outside.rs")), None);
    }

    #[test]
    fn discovered_components_are_marked_auto_registered() {
        let app = Application::builder("app").build().unwrap();
        let auto = auto();
        let components = auto.discover(
            ["repos/book_repo.rs", "entities/book.rs", "views/show.rs"],
            |key| Resolution::value(key.to_string()),
        );
        assert_eq!(components.len(), 2);

        let count = auto.register_all(app.root(), components).unwrap();
        assert_eq!(count, 2);

        let record = app.root().registry().record("repos.book_repo").unwrap();
        assert!(record.is_auto_registered());
        assert_eq!(*app.root().resolve_as::<String>("views.show").unwrap(), "views.show");
    }
}
