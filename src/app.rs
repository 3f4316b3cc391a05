//! 应用：切片树的根与整棵树的生命周期入口

use crate::config::{AppManifest, Settings};
use crate::container::Resolution;
use crate::errors::{ContainerError, Result};
use crate::gateway::{Driver, DriverRegistry, ResourceIndex};
use crate::inflector::{DefaultInflector, Inflector};
use crate::logging::OperationTimer;
use crate::provider::{lifecycle, Provider};
use crate::slice::Slice;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// 默认由根切片提供、所有切片隐式可见的框架组件
pub const DEFAULT_SHARED_COMPONENT_KEYS: &[&str] = &["settings", "inflector"];

/// 启动模式
///
/// 只影响缺失组件错误暴露的时机：`Eager` 在启动时解析全部组件，
/// `Lazy` 推迟到第一次解析。解析算法本身不变。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BootMode {
    #[default]
    Lazy,
    Eager,
}

impl fmt::Display for BootMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootMode::Lazy => f.write_str("lazy"),
            BootMode::Eager => f.write_str("eager"),
        }
    }
}

/// 整棵切片树共享的上下文
pub struct AppContext {
    settings: Settings,
    inflector: Arc<dyn Inflector>,
    resources: ResourceIndex,
    drivers: DriverRegistry,
    boot_mode: BootMode,
    shared_component_keys: Vec<String>,
}

impl AppContext {
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn inflector(&self) -> &dyn Inflector {
        self.inflector.as_ref()
    }

    pub fn resources(&self) -> &ResourceIndex {
        &self.resources
    }

    pub fn drivers(&self) -> &DriverRegistry {
        &self.drivers
    }

    pub fn boot_mode(&self) -> BootMode {
        self.boot_mode
    }

    pub fn shared_component_keys(&self) -> &[String] {
        &self.shared_component_keys
    }
}

pub struct ApplicationBuilder {
    name: String,
    settings: Settings,
    inflector: Arc<dyn Inflector>,
    drivers: Vec<Arc<dyn Driver>>,
    boot_mode: BootMode,
    shared_component_keys: Vec<String>,
}

impl ApplicationBuilder {
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.set(key, value);
        self
    }

    pub fn inflector(mut self, inflector: impl Inflector + 'static) -> Self {
        self.inflector = Arc::new(inflector);
        self
    }

    pub fn driver(mut self, driver: Arc<dyn Driver>) -> Self {
        self.drivers.push(driver);
        self
    }

    pub fn boot_mode(mut self, mode: BootMode) -> Self {
        self.boot_mode = mode;
        self
    }

    pub fn shared_component_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.shared_component_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn build(self) -> Result<Application> {
        let drivers = DriverRegistry::with_defaults();
        for driver in self.drivers {
            drivers.register(driver);
        }

        let context = Arc::new(AppContext {
            settings: self.settings,
            inflector: self.inflector,
            resources: ResourceIndex::new(),
            drivers,
            boot_mode: self.boot_mode,
            shared_component_keys: self.shared_component_keys,
        });

        let root = Slice::new_root(self.name, context.clone());
        let app = Application {
            root,
            context,
            booted: Arc::new(AtomicBool::new(false)),
        };
        app.register_framework_components()?;
        Ok(app)
    }
}

/// 应用句柄，克隆开销很小
#[derive(Clone)]
pub struct Application {
    root: Arc<Slice>,
    context: Arc<AppContext>,
    booted: Arc<AtomicBool>,
}

impl Application {
    pub fn builder(name: impl Into<String>) -> ApplicationBuilder {
        ApplicationBuilder {
            name: name.into(),
            settings: Settings::new(),
            inflector: Arc::new(DefaultInflector::new()),
            drivers: Vec::new(),
            boot_mode: BootMode::Lazy,
            shared_component_keys: DEFAULT_SHARED_COMPONENT_KEYS
                .iter()
                .map(|key| key.to_string())
                .collect(),
        }
    }

    /// 按清单构建应用
    pub fn from_manifest(manifest: &AppManifest) -> Result<Self> {
        manifest.build()
    }

    pub fn name(&self) -> &str {
        self.root.name()
    }

    pub fn root(&self) -> &Arc<Slice> {
        &self.root
    }

    pub fn context(&self) -> &AppContext {
        &self.context
    }

    pub fn slice(&self, path: &str) -> Result<Arc<Slice>> {
        self.root.lookup(path)
    }

    /// 先序遍历的全部切片（含根）
    pub fn slices(&self) -> Vec<Arc<Slice>> {
        let mut slices = vec![self.root.clone()];
        slices.extend(self.root.descendants());
        slices
    }

    /// 按切片先序、切片内声明顺序排列的全部提供者
    pub fn providers(&self) -> Vec<Arc<Provider>> {
        self.slices().iter().flat_map(|slice| slice.providers()).collect()
    }

    pub fn is_booted(&self) -> bool {
        self.booted.load(Ordering::Acquire)
    }

    /// 准备全部提供者（不打开任何外部资源）
    pub fn prepare(&self) -> Result<()> {
        for provider in self.providers() {
            provider.prepare()?;
        }
        Ok(())
    }

    /// 急切启动整棵树
    ///
    /// 在执行任何启动钩子之前先检查依赖环；`Eager` 模式下随后解析每个切片的
    /// 全部组件与显式导入。最后冻结所有注册表。
    pub fn boot(&self) -> Result<()> {
        if self.is_booted() {
            return Ok(());
        }

        let timer = OperationTimer::new("app.boot")
            .with_metadata("app", self.name())
            .with_metadata("mode", &self.context.boot_mode.to_string());

        let providers = self.providers();
        for provider in &providers {
            lifecycle::check_dependencies(provider)?;
        }
        for provider in &providers {
            provider.start()?;
        }

        let slices = self.slices();
        if self.context.boot_mode == BootMode::Eager {
            for slice in &slices {
                for key in slice.registry().keys() {
                    slice.resolve(&key)?;
                }
                for key in slice.declared_imports() {
                    slice.resolve(&key)?;
                }
            }
        }

        for slice in &slices {
            slice.freeze();
        }

        self.booted.store(true, Ordering::Release);
        timer.finish();
        info!(
            app = %self.name(),
            slices = slices.len(),
            providers = providers.len(),
            resources = self.context.resources.len(),
            "application booted"
        );
        Ok(())
    }

    /// 在阻塞线程池中启动，并施加超时
    pub async fn boot_with_timeout(&self, timeout: Duration) -> Result<()> {
        let app = self.clone();
        let task = tokio::task::spawn_blocking(move || app.boot());

        match tokio::time::timeout(timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(ContainerError::HookFailed {
                provider: self.name().to_string(),
                phase: crate::errors::Phase::Start,
                source: Box::new(join_error),
            }),
            Err(_) => Err(ContainerError::Timeout {
                operation: format!("boot '{}'", self.name()),
                elapsed: timeout,
            }),
        }
    }

    /// 按启动的逆序停止全部提供者；全部执行完后返回第一个错误
    pub fn shutdown(&self) -> Result<()> {
        let mut first_error = None;
        for provider in self.providers().iter().rev() {
            if let Err(err) = provider.stop() {
                err.log();
                first_error.get_or_insert(err);
            }
        }
        self.booted.store(false, Ordering::Release);
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// 停止全部提供者并清空全部注册表与资源索引（测试隔离用）
    ///
    /// 切片树与提供者声明保留，提供者回到 `Registered`。
    pub fn reset(&self) -> Result<()> {
        if let Err(err) = self.shutdown() {
            warn!(app = %self.name(), error = %err, "provider failed to stop during reset");
        }
        for slice in self.slices() {
            slice.reset();
        }
        self.context.resources.clear();
        self.register_framework_components()?;
        info!(app = %self.name(), "application reset");
        Ok(())
    }

    fn register_framework_components(&self) -> Result<()> {
        self.root.register_value("settings", self.context.settings.clone())?;
        self.root
            .register("inflector", Resolution::value(self.context.inflector.clone()))?;
        Ok(())
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.name())
            .field("boot_mode", &self.context.boot_mode)
            .field("booted", &self.is_booted())
            .field("root", &self.root)
            .finish()
    }
}
