use super::Provider;
use crate::config::Settings;
use crate::container::{Component, Resolution, Resolver};
use crate::errors::{Phase, Result};
use crate::gateway::{DriverRegistry, ResourceIndex};
use crate::slice::Slice;
use serde_json::Value;
use std::any::Any;
use std::sync::Arc;

/// 钩子执行时可见的上下文
///
/// 注册操作先缓存在上下文中，钩子全部成功后才提交到切片注册表，
/// 失败的 `start` 不会留下部分注册的组件。
pub struct ProviderContext<'a> {
    provider: &'a Provider,
    slice: &'a Slice,
    phase: Phase,
    config: Value,
    pending: Vec<(String, Resolution)>,
}

impl<'a> ProviderContext<'a> {
    pub(crate) fn new(provider: &'a Provider, slice: &'a Slice, phase: Phase, config: Value) -> Self {
        Self {
            provider,
            slice,
            phase,
            config,
            pending: Vec::new(),
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.qualified_name()
    }

    pub fn family(&self) -> &str {
        self.provider.family()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// 提供者所属的切片
    pub fn slice(&self) -> &Slice {
        self.slice
    }

    pub fn config(&self) -> &Value {
        &self.config
    }

    /// 只有 `prepare` 阶段的修改会成为最终配置
    pub fn config_mut(&mut self) -> &mut Value {
        &mut self.config
    }

    pub fn setting(&self, name: &str) -> Option<&Value> {
        self.config.get(name)
    }

    pub fn settings(&self) -> &Settings {
        self.slice.context().settings()
    }

    pub fn resources(&self) -> &ResourceIndex {
        self.slice.context().resources()
    }

    pub fn drivers(&self) -> &DriverRegistry {
        self.slice.context().drivers()
    }

    /// 在提供者的键前缀下注册组件，`gateway` 会成为 `db.gateway`
    pub fn register(&mut self, key: &str, resolution: Resolution) {
        let key = self.qualify(key);
        self.pending.push((key, resolution));
    }

    pub fn register_value<T: Any + Send + Sync>(&mut self, key: &str, value: T) {
        self.register(key, Resolution::value(value));
    }

    /// 通过所属切片解析其他组件
    pub fn resolve(&self, key: &str) -> Result<Component> {
        Resolver::resolve(self.slice, key)
    }

    pub fn resolve_as<T: Any + Send + Sync>(&self, key: &str) -> Result<Arc<T>> {
        self.slice.resolve_as::<T>(key)
    }

    fn qualify(&self, key: &str) -> String {
        let family = self.provider.family();
        if key == family || key.starts_with(&format!("{}.", family)) {
            key.to_string()
        } else {
            format!("{}.{}", family, key)
        }
    }

    pub(crate) fn into_parts(self) -> (Value, Vec<(String, Resolution)>) {
        (self.config, self.pending)
    }
}
