//! 提供者：挂在切片上的带副作用的初始化单元
//!
//! 状态只向前推进（`Registered → Prepared → Started`，`Started → Stopped`），
//! 重复推进到已到达的阶段是空操作。

pub mod context;
pub mod database;
pub mod lifecycle;
pub mod source;

pub use context::ProviderContext;
pub use database::DatabaseProvider;
pub use source::ProviderSource;

use crate::errors::{BoxError, ContainerError, Phase, Result};
use crate::slice::Slice;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// 提供者状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProviderState {
    /// 已注册，尚无副作用
    Registered,
    /// 配置已合并并校验，尚未打开外部资源
    Prepared,
    /// 启动钩子已执行，组件已注册
    Started,
    /// 停止钩子已执行
    Stopped,
}

impl fmt::Display for ProviderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderState::Registered => "registered",
            ProviderState::Prepared => "prepared",
            ProviderState::Started => "started",
            ProviderState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// 钩子相对于阶段主体的执行时机
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Timing {
    Before,
    On,
    After,
}

pub type Hook = Arc<dyn Fn(&mut ProviderContext<'_>) -> std::result::Result<(), BoxError> + Send + Sync>;

#[derive(Clone, Default)]
pub(crate) struct Hooks {
    entries: HashMap<(Phase, Timing), Vec<Hook>>,
}

impl Hooks {
    fn push(&mut self, phase: Phase, timing: Timing, hook: Hook) {
        self.entries.entry((phase, timing)).or_default().push(hook);
    }

    pub(crate) fn get(&self, phase: Phase, timing: Timing) -> &[Hook] {
        self.entries
            .get(&(phase, timing))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// 从外部键值配置为某个设置项取默认值
#[derive(Debug, Clone)]
pub(crate) struct SettingBinding {
    pub setting: String,
    pub settings_key: String,
    pub list: bool,
}

impl SettingBinding {
    pub(crate) fn layer(&self, raw: &str) -> Value {
        let value = if self.list {
            Value::Array(
                crate::config::Settings::list(raw)
                    .into_iter()
                    .map(Value::String)
                    .collect(),
            )
        } else {
            Value::String(raw.to_string())
        };
        let mut layer = Map::new();
        layer.insert(self.setting.clone(), value);
        Value::Object(layer)
    }
}

/// 提供者声明
pub struct ProviderBuilder {
    name: String,
    family: Option<String>,
    defaults: Value,
    overrides: Value,
    bindings: Vec<SettingBinding>,
    required: Vec<String>,
    dependencies: Vec<String>,
    source: Option<Arc<dyn ProviderSource>>,
    hooks: Hooks,
}

impl ProviderBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            family: None,
            defaults: Value::Object(Map::new()),
            overrides: Value::Object(Map::new()),
            bindings: Vec::new(),
            required: Vec::new(),
            dependencies: Vec::new(),
            source: None,
            hooks: Hooks::default(),
        }
    }

    /// 数据库提供者：键前缀 `db`，`target` 必填且可由 `database_url` 设置提供
    pub fn database() -> Self {
        Self::database_named("db")
    }

    pub fn database_named(name: impl Into<String>) -> Self {
        Self::new(name)
            .defaults(serde_json::json!({ "extensions": [], "plugins": [] }))
            .setting_from("target", "database_url")
            .list_setting_from("extensions", "database_extensions")
            .require("target")
            .source(DatabaseProvider::new())
    }

    /// 该提供者管理的键前缀，默认与名称相同
    pub fn family(mut self, family: impl Into<String>) -> Self {
        self.family = Some(family.into());
        self
    }

    /// 框架默认配置
    pub fn defaults(mut self, defaults: Value) -> Self {
        self.defaults = defaults;
        self
    }

    /// 切片自身的显式配置
    pub fn config(mut self, config: Value) -> Self {
        crate::config::merge_layer(&mut self.overrides, &config);
        self
    }

    pub fn setting_from(mut self, setting: impl Into<String>, settings_key: impl Into<String>) -> Self {
        self.bindings.push(SettingBinding {
            setting: setting.into(),
            settings_key: settings_key.into(),
            list: false,
        });
        self
    }

    pub fn list_setting_from(mut self, setting: impl Into<String>, settings_key: impl Into<String>) -> Self {
        self.bindings.push(SettingBinding {
            setting: setting.into(),
            settings_key: settings_key.into(),
            list: true,
        });
        self
    }

    pub fn require(mut self, setting: impl Into<String>) -> Self {
        self.required.push(setting.into());
        self
    }

    pub fn depends_on(mut self, provider: impl Into<String>) -> Self {
        self.dependencies.push(provider.into());
        self
    }

    pub fn source(mut self, source: impl ProviderSource + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn on_prepare<F>(self, hook: F) -> Self
    where
        F: Fn(&mut ProviderContext<'_>) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.hook(Phase::Prepare, Timing::On, hook)
    }

    pub fn on_start<F>(self, hook: F) -> Self
    where
        F: Fn(&mut ProviderContext<'_>) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.hook(Phase::Start, Timing::On, hook)
    }

    pub fn on_stop<F>(self, hook: F) -> Self
    where
        F: Fn(&mut ProviderContext<'_>) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.hook(Phase::Stop, Timing::On, hook)
    }

    pub fn before<F>(self, phase: Phase, hook: F) -> Self
    where
        F: Fn(&mut ProviderContext<'_>) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.hook(phase, Timing::Before, hook)
    }

    pub fn after<F>(self, phase: Phase, hook: F) -> Self
    where
        F: Fn(&mut ProviderContext<'_>) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.hook(phase, Timing::After, hook)
    }

    fn hook<F>(mut self, phase: Phase, timing: Timing, hook: F) -> Self
    where
        F: Fn(&mut ProviderContext<'_>) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.hooks.push(phase, timing, Arc::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn family_name(&self) -> &str {
        self.family.as_deref().unwrap_or(&self.name)
    }

    pub(crate) fn build(self, slice: Weak<Slice>, slice_name: &str) -> Provider {
        let family = self.family.unwrap_or_else(|| self.name.clone());
        Provider {
            qualified_name: format!("{}:{}", slice_name, self.name),
            name: self.name,
            family,
            slice,
            state: RwLock::new(ProviderState::Registered),
            transition: Mutex::new(()),
            defaults: self.defaults,
            overrides: RwLock::new(self.overrides),
            finalized: RwLock::new(None),
            bindings: self.bindings,
            required: self.required,
            dependencies: self.dependencies,
            source: self.source,
            hooks: self.hooks,
            registered_keys: RwLock::new(Vec::new()),
        }
    }
}

pub struct Provider {
    name: String,
    family: String,
    qualified_name: String,
    slice: Weak<Slice>,
    state: RwLock<ProviderState>,
    /// 串行化状态迁移；持有期间执行钩子
    pub(crate) transition: Mutex<()>,
    defaults: Value,
    overrides: RwLock<Value>,
    finalized: RwLock<Option<Value>>,
    pub(crate) bindings: Vec<SettingBinding>,
    pub(crate) required: Vec<String>,
    dependencies: Vec<String>,
    pub(crate) source: Option<Arc<dyn ProviderSource>>,
    pub(crate) hooks: Hooks,
    registered_keys: RwLock<Vec<String>>,
}

impl Provider {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn family(&self) -> &str {
        &self.family
    }

    /// `app/admin:db` 形式的全名
    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    pub fn state(&self) -> ProviderState {
        *self.state.read()
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn slice(&self) -> Result<Arc<Slice>> {
        self.slice.upgrade().ok_or_else(|| ContainerError::SliceLoad {
            path: self.qualified_name.clone(),
            reason: "owning slice has been dropped".to_string(),
        })
    }

    /// 修改自身配置；只允许在 `prepare` 之前
    pub fn configure(&self, layer: Value) -> Result<()> {
        let _transition = self.transition.lock();
        let state = self.state();
        if state >= ProviderState::Prepared {
            return Err(ContainerError::Configuration {
                provider: self.qualified_name.clone(),
                setting: "*".to_string(),
                reason: format!("configuration is locked once the provider is {}", state),
            });
        }
        crate::config::merge_layer(&mut self.overrides.write(), &layer);
        Ok(())
    }

    pub(crate) fn defaults(&self) -> &Value {
        &self.defaults
    }

    pub(crate) fn overrides(&self) -> Value {
        self.overrides.read().clone()
    }

    /// `prepare` 之后的最终配置
    pub fn finalized_config(&self) -> Option<Value> {
        self.finalized.read().clone()
    }

    /// 启动时注册进切片的键
    pub fn registered_keys(&self) -> Vec<String> {
        self.registered_keys.read().clone()
    }

    pub(crate) fn set_state(&self, state: ProviderState) {
        *self.state.write() = state;
    }

    pub(crate) fn set_finalized(&self, config: Value) {
        *self.finalized.write() = Some(config);
    }

    pub(crate) fn record_keys(&self, keys: Vec<String>) {
        self.registered_keys.write().extend(keys);
    }

    /// 测试隔离用：回到初始状态
    pub(crate) fn reset(&self) {
        let _transition = self.transition.lock();
        self.set_state(ProviderState::Registered);
        *self.finalized.write() = None;
        self.registered_keys.write().clear();
        if let Some(source) = &self.source {
            source.reset();
        }
    }

    pub fn prepare(self: &Arc<Self>) -> Result<()> {
        lifecycle::prepare(self)
    }

    pub fn start(self: &Arc<Self>) -> Result<()> {
        lifecycle::start(self)
    }

    pub fn stop(self: &Arc<Self>) -> Result<()> {
        lifecycle::stop(self)
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("name", &self.qualified_name)
            .field("family", &self.family)
            .field("state", &self.state())
            .field("dependencies", &self.dependencies)
            .finish()
    }
}
