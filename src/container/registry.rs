//! 切片私有的组件注册表
//!
//! 注册顺序决定 `keys()` 的枚举顺序；工厂在首次解析时执行且只执行一次。

use super::component::{downcast, Component, ComponentRecord, Resolution, Resolver};
use crate::errors::{ContainerError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// 注册表统计信息
#[derive(Debug, Clone, Default)]
pub struct RegistryStats {
    pub total_resolutions: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
}

impl RegistryStats {
    /// 获取缓存命中率
    pub fn hit_rate(&self) -> f64 {
        if self.total_resolutions == 0 {
            0.0
        } else {
            self.cache_hits as f64 / self.total_resolutions as f64
        }
    }
}

#[derive(Default)]
struct InnerStats {
    total_resolutions: AtomicUsize,
    cache_hits: AtomicUsize,
    cache_misses: AtomicUsize,
}

pub struct Registry {
    /// 所属切片的限定名，用于错误信息
    owner: String,
    entries: DashMap<String, Arc<ComponentRecord>>,
    sequence: AtomicU64,
    frozen: AtomicBool,
    allow_override: AtomicBool,
    stats: InnerStats,
}

impl Registry {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            entries: DashMap::new(),
            sequence: AtomicU64::new(0),
            frozen: AtomicBool::new(false),
            allow_override: AtomicBool::new(false),
            stats: InnerStats::default(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// 注册组件
    pub fn register(&self, key: impl Into<String>, resolution: Resolution) -> Result<()> {
        self.insert(key.into(), resolution, false)
    }

    /// 以自动注册（约定扫描）的身份注册组件
    pub fn auto_register(&self, key: impl Into<String>, resolution: Resolution) -> Result<()> {
        self.insert(key.into(), resolution, true)
    }

    /// 注册一个已构造好的值
    pub fn register_value<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) -> Result<()> {
        self.register(key, Resolution::value(value))
    }

    fn insert(&self, key: String, resolution: Resolution, auto_register: bool) -> Result<()> {
        if self.is_frozen() {
            return Err(ContainerError::FrozenRegistry {
                key,
                slice: self.owner.clone(),
            });
        }

        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if !self.allow_override.load(Ordering::Acquire) {
                    return Err(ContainerError::DuplicateKey {
                        key: occupied.key().clone(),
                        slice: self.owner.clone(),
                    });
                }
                // 覆盖时保留原有的枚举位置
                let sequence = occupied.get().sequence;
                let record = ComponentRecord::new(occupied.key().clone(), resolution, auto_register, sequence);
                tracing::debug!(key = %occupied.key(), slice = %self.owner, "overriding component");
                occupied.insert(Arc::new(record));
            }
            Entry::Vacant(vacant) => {
                let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
                let record = ComponentRecord::new(vacant.key().clone(), resolution, auto_register, sequence);
                tracing::trace!(key = %vacant.key(), slice = %self.owner, auto_register, "registered component");
                vacant.insert(Arc::new(record));
            }
        }
        Ok(())
    }

    /// 镜像祖先切片的组件引用；绕过冻结检查，已存在时返回现有值
    pub(crate) fn mirror(&self, key: &str, component: Component) -> Component {
        let record = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| {
                let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
                Arc::new(ComponentRecord::new(
                    key.to_string(),
                    Resolution::Value(component.clone()),
                    false,
                    sequence,
                ))
            })
            .value()
            .clone();
        match record.resolve_value() {
            Some(existing) => existing,
            None => component,
        }
    }

    pub fn record(&self, key: &str) -> Option<Arc<ComponentRecord>> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// 使用给定解析器（通常是所属切片）解析组件
    pub fn resolve_with(&self, key: &str, resolver: &dyn Resolver) -> Result<Component> {
        self.stats.total_resolutions.fetch_add(1, Ordering::Relaxed);

        // 先克隆记录再解析，避免工厂执行期间持有分片锁
        let record = self.record(key).ok_or_else(|| ContainerError::UnknownKey {
            key: key.to_string(),
            slice: self.owner.clone(),
        })?;

        let (component, hit) = record.resolve(resolver, &self.owner)?;
        if hit {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);
        }
        Ok(component)
    }

    pub fn resolve_as<T: Any + Send + Sync>(&self, key: &str) -> Result<Arc<T>> {
        downcast(key, Resolver::resolve(self, key)?)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// 按注册顺序返回全部键
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<(u64, String)> = self
            .entries
            .iter()
            .map(|entry| (entry.value().sequence, entry.key().clone()))
            .collect();
        keys.sort_unstable_by_key(|(sequence, _)| *sequence);
        keys.into_iter().map(|(_, key)| key).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn freeze(&self) {
        if !self.frozen.swap(true, Ordering::AcqRel) {
            tracing::debug!(slice = %self.owner, components = self.len(), "registry frozen");
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    /// 允许（或禁止）覆盖已注册的键，主要用于测试替身
    pub fn set_allow_override(&self, allow: bool) {
        self.allow_override.store(allow, Ordering::Release);
    }

    /// 清空全部记录并解除冻结
    pub fn clear(&self) {
        self.entries.clear();
        self.frozen.store(false, Ordering::Release);
        self.allow_override.store(false, Ordering::Release);
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            total_resolutions: self.stats.total_resolutions.load(Ordering::Relaxed),
            cache_hits: self.stats.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.stats.cache_misses.load(Ordering::Relaxed),
        }
    }
}

impl Resolver for Registry {
    fn resolve(&self, key: &str) -> Result<Component> {
        self.resolve_with(key, self)
    }

    fn contains(&self, key: &str) -> bool {
        self.contains_key(key)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("owner", &self.owner)
            .field("keys", &self.keys())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}
