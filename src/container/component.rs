use super::ActiveGuard;
use crate::errors::{BoxError, ContainerError, Result};
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// 已解析的组件（类型擦除）
pub type Component = Arc<dyn Any + Send + Sync>;

/// 延迟计算的组件工厂，接收发起解析的切片（或注册表）
pub type Factory = Arc<dyn Fn(&dyn Resolver) -> std::result::Result<Component, BoxError> + Send + Sync>;

/// 按键解析组件的能力
///
/// 工厂通过它获取自己的依赖，从而把依赖集合显式地写在构造代码里。
pub trait Resolver: Send + Sync {
    fn resolve(&self, key: &str) -> Result<Component>;

    fn contains(&self, key: &str) -> bool;
}

impl<'a> dyn Resolver + 'a {
    /// 解析并向下转型为具体类型
    pub fn resolve_as<T: Any + Send + Sync>(&self, key: &str) -> Result<Arc<T>> {
        downcast(key, self.resolve(key)?)
    }
}

pub(crate) fn downcast<T: Any + Send + Sync>(key: &str, component: Component) -> Result<Arc<T>> {
    component
        .downcast::<T>()
        .map_err(|_| ContainerError::TypeMismatch {
            key: key.to_string(),
            expected: std::any::type_name::<T>(),
        })
}

/// 组件的解析方式
#[derive(Clone)]
pub enum Resolution {
    Value(Component),
    Factory(Factory),
}

impl Resolution {
    pub fn value<T: Any + Send + Sync>(value: T) -> Self {
        Resolution::Value(Arc::new(value))
    }

    pub fn factory<T, F>(factory: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&dyn Resolver) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        Resolution::Factory(Arc::new(move |resolver| {
            let component: Component = Arc::new(factory(resolver)?);
            Ok(component)
        }))
    }
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Value(_) => f.write_str("Value"),
            Resolution::Factory(_) => f.write_str("Factory"),
        }
    }
}

/// 注册表中的一条组件记录
pub struct ComponentRecord {
    key: String,
    resolution: Resolution,
    memoized: OnceLock<Component>,
    /// 只保护首次计算路径，已记忆化的读取不会触碰它
    init_lock: Mutex<()>,
    auto_register: bool,
    pub(crate) sequence: u64,
}

impl ComponentRecord {
    pub(crate) fn new(key: String, resolution: Resolution, auto_register: bool, sequence: u64) -> Self {
        Self {
            key,
            resolution,
            memoized: OnceLock::new(),
            init_lock: Mutex::new(()),
            auto_register,
            sequence,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_auto_registered(&self) -> bool {
        self.auto_register
    }

    pub fn is_factory(&self) -> bool {
        matches!(self.resolution, Resolution::Factory(_))
    }

    /// 工厂是否已经执行过
    pub fn is_memoized(&self) -> bool {
        match self.resolution {
            Resolution::Value(_) => true,
            Resolution::Factory(_) => self.memoized.get().is_some(),
        }
    }

    /// 不触发工厂，仅返回已有的值
    pub(crate) fn resolve_value(&self) -> Option<Component> {
        match &self.resolution {
            Resolution::Value(value) => Some(value.clone()),
            Resolution::Factory(_) => self.memoized.get().cloned(),
        }
    }

    /// 解析组件；第二个返回值表示是否命中缓存
    pub(crate) fn resolve(&self, resolver: &dyn Resolver, owner: &str) -> Result<(Component, bool)> {
        let factory = match &self.resolution {
            Resolution::Value(value) => return Ok((value.clone(), true)),
            Resolution::Factory(factory) => factory,
        };

        if let Some(value) = self.memoized.get() {
            return Ok((value.clone(), true));
        }

        let _cycle = ActiveGuard::enter(
            self as *const Self as usize,
            format!("{}:{}", owner, self.key),
        )?;
        let _init = self.init_lock.lock();

        // 等待期间可能已由其他线程完成
        if let Some(value) = self.memoized.get() {
            return Ok((value.clone(), true));
        }

        tracing::debug!(key = %self.key, slice = %owner, "invoking component factory");
        let value = factory(resolver).map_err(|err| ContainerError::from_factory(&self.key, err))?;
        let _ = self.memoized.set(value.clone());
        Ok((value, false))
    }
}

impl fmt::Debug for ComponentRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRecord")
            .field("key", &self.key)
            .field("resolution", &self.resolution)
            .field("memoized", &self.is_memoized())
            .field("auto_register", &self.auto_register)
            .finish()
    }
}
