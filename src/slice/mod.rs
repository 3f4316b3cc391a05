//! 切片：应用树上的命名空间节点
//!
//! 每个切片独占一个注册表，通过显式导入、按家族共享的提供者组件
//! 以及资源去重索引与祖先切片共享组件。兄弟切片之间从不直接共享注册表。
//!
//! 树结构（子切片、导入、导出、提供者）在单线程的配置阶段建立，
//! 之后只读；锁只用于保证并发读取的安全。

pub mod imports;

pub use imports::{Import, ImportKeys};

use crate::app::AppContext;
use crate::container::{Component, Registry, Resolution, Resolver};
use crate::discovery::DiscoveredComponent;
use crate::errors::{ContainerError, Result};
use crate::provider::{Provider, ProviderBuilder, ProviderState};
use imports::ImportRule;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, trace};

pub struct Slice {
    name: String,
    path: Vec<String>,
    qualified_name: String,
    registry: Registry,
    parent: Option<Weak<Slice>>,
    this: Weak<Slice>,
    children: RwLock<Vec<Arc<Slice>>>,
    imports: RwLock<Vec<ImportRule>>,
    /// `None` 表示导出全部键
    exports: RwLock<Option<BTreeSet<String>>>,
    family_imports: RwLock<BTreeSet<String>>,
    inherit_config: RwLock<HashMap<String, bool>>,
    providers: RwLock<Vec<Arc<Provider>>>,
    context: Arc<AppContext>,
    synthesized: bool,
}

impl Slice {
    pub(crate) fn new_root(name: impl Into<String>, context: Arc<AppContext>) -> Arc<Self> {
        let name = name.into();
        Self::create(name.clone(), vec![name], None, context, false)
    }

    fn create(
        name: String,
        path: Vec<String>,
        parent: Option<Weak<Slice>>,
        context: Arc<AppContext>,
        synthesized: bool,
    ) -> Arc<Self> {
        let qualified_name = path.join("/");
        Arc::new_cyclic(|this| Slice {
            registry: Registry::new(qualified_name.clone()),
            name,
            path,
            qualified_name,
            parent,
            this: this.clone(),
            children: RwLock::new(Vec::new()),
            imports: RwLock::new(Vec::new()),
            exports: RwLock::new(None),
            family_imports: RwLock::new(BTreeSet::new()),
            inherit_config: RwLock::new(HashMap::new()),
            providers: RwLock::new(Vec::new()),
            context,
            synthesized,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 从根开始的路径，例如 `["app", "admin"]`
    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// `app/admin`
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn context(&self) -> &AppContext {
        &self.context
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// 未显式声明、在按名称引用时合成的切片
    pub fn is_synthesized(&self) -> bool {
        self.synthesized
    }

    pub fn parent(&self) -> Option<Arc<Slice>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// 祖先切片，由近及远
    pub fn ancestors(&self) -> Vec<Arc<Slice>> {
        let mut ancestors = Vec::new();
        let mut current = self.parent();
        while let Some(slice) = current {
            current = slice.parent();
            ancestors.push(slice);
        }
        ancestors
    }

    pub fn children(&self) -> Vec<Arc<Slice>> {
        self.children.read().clone()
    }

    /// 以当前切片为根的先序遍历
    pub fn descendants(&self) -> Vec<Arc<Slice>> {
        let mut out = Vec::new();
        for child in self.children() {
            out.push(child.clone());
            out.extend(child.descendants());
        }
        out
    }

    fn handle(&self) -> Result<Arc<Slice>> {
        self.this.upgrade().ok_or_else(|| ContainerError::SliceLoad {
            path: self.qualified_name.clone(),
            reason: "slice has been dropped".to_string(),
        })
    }

    // ---- 树结构 ----

    /// 声明子切片；同名切片已存在时报错
    pub fn register_slice(&self, name: impl Into<String>) -> Result<Arc<Slice>> {
        self.add_child(name.into(), false)
    }

    fn add_child(&self, name: String, synthesized: bool) -> Result<Arc<Slice>> {
        if name.is_empty() || name.contains('/') {
            return Err(ContainerError::SliceLoad {
                path: format!("{}/{}", self.qualified_name, name),
                reason: "slice names must be non-empty and cannot contain '/'".to_string(),
            });
        }

        let mut children = self.children.write();
        if children.iter().any(|child| child.name == name) {
            return Err(ContainerError::SliceLoad {
                path: format!("{}/{}", self.qualified_name, name),
                reason: "a slice with this name is already declared".to_string(),
            });
        }

        let mut path = self.path.clone();
        path.push(name.clone());
        let child = Self::create(name, path, Some(self.this.clone()), self.context.clone(), synthesized);
        debug!(slice = %child.qualified_name, synthesized, "declared slice");
        children.push(child.clone());
        Ok(child)
    }

    pub fn child(&self, name: &str) -> Result<Arc<Slice>> {
        self.children
            .read()
            .iter()
            .find(|child| child.name == name)
            .cloned()
            .ok_or_else(|| ContainerError::SliceLoad {
                path: format!("{}/{}", self.qualified_name, name),
                reason: "slice was never declared".to_string(),
            })
    }

    /// 按名称取子切片，不存在时合成一个默认切片
    pub fn child_or_default(&self, name: &str) -> Result<Arc<Slice>> {
        match self.child(name) {
            Ok(child) => Ok(child),
            Err(_) => self.add_child(name.to_string(), true),
        }
    }

    /// 按路径查找切片：`app/admin` 从根开始，`admin` 相对于根
    pub fn lookup(&self, path: &str) -> Result<Arc<Slice>> {
        let root = match self.ancestors().pop() {
            Some(root) => root,
            None => self.handle()?,
        };

        let mut segments = path.split('/').filter(|segment| !segment.is_empty()).peekable();
        if segments.peek() == Some(&root.name.as_str()) {
            segments.next();
        }

        let mut current = root;
        for segment in segments {
            current = current.child(segment).map_err(|_| ContainerError::SliceLoad {
                path: path.to_string(),
                reason: format!("'{}' has no slice named '{}'", current.qualified_name, segment),
            })?;
        }
        Ok(current)
    }

    fn is_descendant_of(&self, ancestor: &Slice) -> bool {
        self.ancestors().iter().any(|a| std::ptr::eq(Arc::as_ptr(a), ancestor))
    }

    // ---- 导入与导出 ----

    /// 声明从祖先切片导入键；只允许从祖先链导入
    pub fn import(&self, import: Import) -> Result<()> {
        let source = self.lookup(&import.from)?;
        if !self.is_descendant_of(&source) {
            return Err(ContainerError::InvalidImport {
                slice: self.qualified_name.clone(),
                source_path: source.qualified_name.clone(),
                reason: "keys can only be imported from an ancestor slice".to_string(),
            });
        }
        if import.keys == ImportKeys::Only(Vec::new()) {
            return Err(ContainerError::InvalidImport {
                slice: self.qualified_name.clone(),
                source_path: source.qualified_name.clone(),
                reason: "no keys selected; list keys or import all".to_string(),
            });
        }

        debug!(
            slice = %self.qualified_name,
            from = %source.qualified_name,
            keys = ?import.keys,
            namespace = ?import.namespace,
            "declared import"
        );
        self.imports.write().push(ImportRule {
            source: Arc::downgrade(&source),
            source_path: source.qualified_name.clone(),
            keys: import.keys,
            namespace: import.namespace,
        });
        Ok(())
    }

    /// 限制后代可导入的键
    pub fn export<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut exports = self.exports.write();
        exports
            .get_or_insert_with(BTreeSet::new)
            .extend(keys.into_iter().map(Into::into));
    }

    pub fn is_exported(&self, key: &str) -> bool {
        match &*self.exports.read() {
            None => true,
            Some(exports) => exports.contains(key),
        }
    }

    /// 允许从祖先共享某个提供者家族（例如 `db`）的组件
    pub fn enable_import(&self, family: impl Into<String>) {
        self.family_imports.write().insert(family.into());
    }

    pub fn imports_family(&self, family: &str) -> bool {
        self.family_imports.read().contains(family)
    }

    /// 是否继承祖先同家族提供者的配置，默认继承
    pub fn set_inherit_config(&self, family: impl Into<String>, inherit: bool) {
        self.inherit_config.write().insert(family.into(), inherit);
    }

    pub fn inherits_config(&self, family: &str) -> bool {
        self.inherit_config.read().get(family).copied().unwrap_or(true)
    }

    /// 显式导入的本地键，急切启动时逐一校验
    pub fn declared_imports(&self) -> Vec<String> {
        self.imports
            .read()
            .iter()
            .flat_map(ImportRule::local_keys)
            .collect()
    }

    fn import_for(&self, key: &str) -> Result<Option<(Arc<Slice>, String)>> {
        let imports = self.imports.read();
        for rule in imports.iter() {
            let Some(remote) = rule.remote_key(key) else {
                continue;
            };
            let source = rule.source.upgrade().ok_or_else(|| ContainerError::SliceLoad {
                path: rule.source_path.clone(),
                reason: "import source has been dropped".to_string(),
            })?;

            if rule.is_wildcard() {
                if source.is_exported(&remote) && Resolver::contains(&*source, &remote) {
                    return Ok(Some((source, remote)));
                }
                continue;
            }

            if !source.is_exported(&remote) {
                return Err(ContainerError::InvalidImport {
                    slice: self.qualified_name.clone(),
                    source_path: rule.source_path.clone(),
                    reason: format!("'{}' is not exported", remote),
                });
            }
            return Ok(Some((source, remote)));
        }
        Ok(None)
    }

    fn is_shared_component(&self, key: &str) -> bool {
        !self.is_root() && self.context.shared_component_keys().iter().any(|shared| shared == key)
    }

    // ---- 提供者 ----

    /// 注册提供者；同一切片内名称与家族都必须唯一
    pub fn register_provider(&self, builder: ProviderBuilder) -> Result<Arc<Provider>> {
        let mut providers = self.providers.write();
        if let Some(existing) = providers
            .iter()
            .find(|p| p.name() == builder.name() || p.family() == builder.family_name())
        {
            return Err(ContainerError::DuplicateKey {
                key: format!("provider {}", existing.name()),
                slice: self.qualified_name.clone(),
            });
        }

        let provider = Arc::new(builder.build(self.this.clone(), &self.qualified_name));
        debug!(provider = %provider.qualified_name(), family = %provider.family(), "registered provider");
        providers.push(provider.clone());
        Ok(provider)
    }

    pub fn provider(&self, name: &str) -> Option<Arc<Provider>> {
        self.providers.read().iter().find(|p| p.name() == name).cloned()
    }

    pub fn providers(&self) -> Vec<Arc<Provider>> {
        self.providers.read().clone()
    }

    fn provider_for_family(&self, family: &str) -> Option<Arc<Provider>> {
        self.providers.read().iter().find(|p| p.family() == family).cloned()
    }

    /// 按名称在自身及祖先中查找提供者
    pub fn find_provider(&self, name: &str) -> Option<Arc<Provider>> {
        self.provider(name)
            .or_else(|| self.ancestors().iter().find_map(|slice| slice.provider(name)))
    }

    /// 最近的拥有该家族提供者的祖先切片上的提供者（不含自身）
    pub fn ancestor_provider(&self, family: &str) -> Option<Arc<Provider>> {
        self.ancestors()
            .iter()
            .find_map(|slice| slice.provider_for_family(family))
    }

    // ---- 注册与解析 ----

    pub fn register(&self, key: impl Into<String>, resolution: Resolution) -> Result<()> {
        self.registry.register(key, resolution)
    }

    pub fn register_value<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) -> Result<()> {
        self.registry.register_value(key, value)
    }

    /// 注册发现协作方给出的组件
    pub fn auto_register<I>(&self, components: I) -> Result<usize>
    where
        I: IntoIterator<Item = DiscoveredComponent>,
    {
        let mut count = 0;
        for component in components {
            self.registry.auto_register(component.key, component.loader)?;
            count += 1;
        }
        debug!(slice = %self.qualified_name, count, "auto-registered components");
        Ok(count)
    }

    pub fn freeze(&self) {
        self.registry.freeze();
    }

    /// 解析组件
    ///
    /// 顺序：自身注册表、显式导入、共享的应用组件、祖先的同家族提供者组件、
    /// 按需启动自身的提供者。都不满足时返回带有定义位置提示的错误。
    pub fn resolve(&self, key: &str) -> Result<Component> {
        if self.registry.contains_key(key) {
            return self.registry.resolve_with(key, self);
        }

        if let Some((source, remote)) = self.import_for(key)? {
            trace!(slice = %self.qualified_name, key, from = %source.qualified_name, "resolving through import");
            return source.resolve(&remote);
        }

        if self.is_shared_component(key) {
            if let Some(root) = self.ancestors().pop() {
                return root.resolve(key);
            }
        }

        let family = key.split('.').next().unwrap_or(key);
        let own_provider = self.provider_for_family(family);

        if own_provider.is_none() && self.imports_family(family) {
            if let Some(ancestor) = self.ancestor_provider(family) {
                ancestor.start()?;
                let owner = ancestor.slice()?;
                let component = owner.resolve(key).map_err(|err| match err {
                    ContainerError::ComponentNotFound { .. } => self.not_found(key),
                    other => other,
                })?;
                debug!(
                    slice = %self.qualified_name,
                    key,
                    from = %owner.qualified_name,
                    "sharing ancestor provider component"
                );
                return Ok(self.registry.mirror(key, component));
            }
        }

        if let Some(provider) = own_provider {
            if provider.state() < ProviderState::Started {
                debug!(slice = %self.qualified_name, key, provider = %provider.name(), "starting provider on demand");
                provider.start()?;
                if self.registry.contains_key(key) {
                    return self.registry.resolve_with(key, self);
                }
            }
        }

        Err(self.not_found(key))
    }

    pub fn resolve_as<T: Any + Send + Sync>(&self, key: &str) -> Result<Arc<T>> {
        crate::container::component::downcast(key, self.resolve(key)?)
    }

    /// 在阻塞线程池中解析，并施加超时
    ///
    /// 超时后调用方立即得到错误，正在执行的工厂或钩子仍会在后台跑完。
    pub async fn resolve_with_timeout(self: &Arc<Self>, key: &str, timeout: Duration) -> Result<Component> {
        let slice = self.clone();
        let owned_key = key.to_string();
        let task = tokio::task::spawn_blocking(move || slice.resolve(&owned_key));

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(ContainerError::FactoryFailed {
                key: key.to_string(),
                source: Box::new(join_error),
            }),
            Err(_) => Err(ContainerError::Timeout {
                operation: format!("resolve '{}' in '{}'", key, self.qualified_name),
                elapsed: timeout,
            }),
        }
    }

    /// 当前切片可见的键（注册表、显式导入、共享组件）
    pub fn visible_keys(&self) -> Vec<String> {
        let mut keys = self.registry.keys();
        keys.extend(self.declared_imports());
        if !self.is_root() {
            keys.extend(self.context.shared_component_keys().iter().cloned());
        }
        keys
    }

    fn not_found(&self, key: &str) -> ContainerError {
        let inflector = self.context.inflector();
        let relative = key.replace('.', "/");
        let expected_path = if self.is_root() {
            format!("app/{}.rs", relative)
        } else {
            format!("slices/{}/{}.rs", self.path[1..].join("/"), relative)
        };

        let expected_type = std::iter::once(self.name.as_str())
            .chain(key.split('.'))
            .map(|segment| inflector.camelize(segment))
            .collect::<Vec<_>>()
            .join("::");

        let available = self.visible_keys();
        let suggestion = available
            .iter()
            .filter(|candidate| strsim::levenshtein(key, candidate) <= 3)
            .min_by_key(|candidate| strsim::levenshtein(key, candidate))
            .cloned();

        ContainerError::ComponentNotFound {
            key: key.to_string(),
            slice: self.qualified_name.clone(),
            expected_path,
            expected_type,
            available,
            suggestion,
        }
    }

    /// 清空注册表并让提供者回到初始状态（测试隔离用）
    pub(crate) fn reset(&self) {
        self.registry.clear();
        for provider in self.providers() {
            provider.reset();
        }
    }
}

impl Resolver for Slice {
    fn resolve(&self, key: &str) -> Result<Component> {
        Slice::resolve(self, key)
    }

    fn contains(&self, key: &str) -> bool {
        if self.registry.contains_key(key) || self.is_shared_component(key) {
            return true;
        }
        if matches!(self.import_for(key), Ok(Some(_))) {
            return true;
        }
        let family = key.split('.').next().unwrap_or(key);
        self.provider_for_family(family).is_some()
            || (self.imports_family(family) && self.ancestor_provider(family).is_some())
    }
}

impl fmt::Debug for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slice")
            .field("name", &self.qualified_name)
            .field("children", &self.children.read().iter().map(|c| c.name.clone()).collect::<Vec<_>>())
            .field("providers", &self.providers.read().iter().map(|p| p.name().to_string()).collect::<Vec<_>>())
            .field("components", &self.registry.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::Application;

    fn app() -> Application {
        Application::builder("app").build().unwrap()
    }

    #[test]
    fn duplicate_slice_declaration_is_rejected() {
        let app = app();
        app.root().register_slice("admin").unwrap();
        let err = app.root().register_slice("admin").unwrap_err();
        assert!(matches!(err, ContainerError::SliceLoad { .. }));
    }

    #[test]
    fn undeclared_slice_fails_but_can_be_synthesized() {
        let app = app();
        assert!(matches!(
            app.root().child("reports").unwrap_err(),
            ContainerError::SliceLoad { .. }
        ));

        let reports = app.root().child_or_default("reports").unwrap();
        assert!(reports.is_synthesized());
        assert_eq!(reports.qualified_name(), "app/reports");
        assert!(Arc::ptr_eq(&reports, &app.root().child_or_default("reports").unwrap()));
    }

    #[test]
    fn lookup_accepts_absolute_and_relative_paths() {
        let app = app();
        let admin = app.root().register_slice("admin").unwrap();
        let users = admin.register_slice("users").unwrap();

        assert!(Arc::ptr_eq(&users.lookup("app/admin").unwrap(), &admin));
        assert!(Arc::ptr_eq(&admin.lookup("admin/users").unwrap(), &users));
        assert!(Arc::ptr_eq(&users.lookup("app").unwrap(), app.root()));
        assert!(matches!(
            admin.lookup("app/billing").unwrap_err(),
            ContainerError::SliceLoad { .. }
        ));
    }

    #[test]
    fn imports_must_come_from_ancestors() {
        let app = app();
        let admin = app.root().register_slice("admin").unwrap();
        let main = app.root().register_slice("main").unwrap();

        let err = admin.import(Import::from_slice("app/main").keys(["x"])).unwrap_err();
        assert!(matches!(err, ContainerError::InvalidImport { .. }));

        let err = app.root().import(Import::from_slice("app/admin").keys(["x"])).unwrap_err();
        assert!(matches!(err, ContainerError::InvalidImport { .. }));

        let err = main.import(Import::from_slice("app")).unwrap_err();
        assert!(matches!(err, ContainerError::InvalidImport { .. }));
    }

    #[test]
    fn not_found_names_the_expected_location() {
        let app = app();
        let admin = app.root().register_slice("admin").unwrap();
        admin.register_value("repos.book_repo", 1u32).unwrap();

        match admin.resolve("repos.book_rep").unwrap_err() {
            ContainerError::ComponentNotFound {
                expected_path,
                expected_type,
                suggestion,
                ..
            } => {
                assert_eq!(expected_path, "slices/admin/repos/book_rep.rs");
                assert_eq!(expected_type, "Admin::Repos::BookRep");
                assert_eq!(suggestion.as_deref(), Some("repos.book_repo"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        match app.root().resolve("mailers.welcome").unwrap_err() {
            ContainerError::ComponentNotFound { expected_path, .. } => {
                assert_eq!(expected_path, "app/mailers/welcome.rs");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn family_import_misses_are_reported_for_the_requesting_slice() {
        let app = app();
        app.root()
            .register_provider(ProviderBuilder::new("search").on_start(|ctx| {
                ctx.register_value("index", "books");
                Ok(())
            }))
            .unwrap();
        let admin = app.root().register_slice("admin").unwrap();
        admin.enable_import("search");

        assert_eq!(*admin.resolve_as::<&str>("search.index").unwrap(), "books");
        match admin.resolve("search.shards").unwrap_err() {
            ContainerError::ComponentNotFound { slice, expected_path, .. } => {
                assert_eq!(slice, "app/admin");
                assert_eq!(expected_path, "slices/admin/search/shards.rs");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn shared_component_keys_resolve_from_the_root() {
        let app = app();
        let admin = app.root().register_slice("admin").unwrap();
        let root_settings = app.root().resolve("settings").unwrap();
        let admin_settings = admin.resolve("settings").unwrap();
        assert!(Arc::ptr_eq(&root_settings, &admin_settings));
        assert!(!admin.registry().contains_key("settings"));
    }

    #[test]
    fn export_restricts_explicit_imports() {
        let app = app();
        app.root().register_value("greeting", "hello").unwrap();
        app.root().register_value("secret", "s3cr3t").unwrap();
        app.root().export(["greeting"]);

        let admin = app.root().register_slice("admin").unwrap();
        admin.import(Import::from_slice("app").keys(["greeting", "secret"])).unwrap();

        assert_eq!(*admin.resolve_as::<&str>("greeting").unwrap(), "hello");
        assert!(matches!(
            admin.resolve("secret").unwrap_err(),
            ContainerError::InvalidImport { .. }
        ));
    }

    #[test]
    fn wildcard_import_with_namespace() {
        let app = app();
        app.root().register_value("clock", 42u64).unwrap();
        let admin = app.root().register_slice("admin").unwrap();
        admin.import(Import::from_slice("app").all().as_namespace("core")).unwrap();

        assert_eq!(*admin.resolve_as::<u64>("core.clock").unwrap(), 42);
        assert!(admin.resolve("clock").unwrap_err().is_not_found());
        assert!(admin.resolve("core.missing").unwrap_err().is_not_found());
    }
}
