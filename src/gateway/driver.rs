use super::{Gateway, GatewayConfig, MemoryDriver};
use crate::errors::BoxError;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

/// 按连接协议选择的网关驱动
pub trait Driver: Send + Sync {
    /// 处理的协议名，例如 `postgres`
    fn scheme(&self) -> &str;

    /// 驱动所依赖的外部库名称，用于缺失时的错误信息
    fn library(&self) -> &str;

    fn open(&self, config: &GatewayConfig) -> Result<Arc<dyn Gateway>, BoxError>;
}

pub struct DriverRegistry {
    drivers: RwLock<BTreeMap<String, Arc<dyn Driver>>>,
}

impl DriverRegistry {
    /// 空注册表
    pub fn empty() -> Self {
        Self {
            drivers: RwLock::new(BTreeMap::new()),
        }
    }

    /// 内置 `mem://` 驱动的注册表
    pub fn with_defaults() -> Self {
        let registry = Self::empty();
        registry.register(Arc::new(MemoryDriver::new()));
        registry
    }

    pub fn register(&self, driver: Arc<dyn Driver>) {
        let scheme = driver.scheme().to_ascii_lowercase();
        tracing::debug!(scheme = %scheme, library = %driver.library(), "registered gateway driver");
        self.drivers.write().insert(scheme, driver);
    }

    pub fn get(&self, scheme: &str) -> Option<Arc<dyn Driver>> {
        self.drivers.read().get(&scheme.to_ascii_lowercase()).cloned()
    }

    pub fn driver_for(&self, config: &GatewayConfig) -> Option<Arc<dyn Driver>> {
        config.scheme().and_then(|scheme| self.get(scheme))
    }

    pub fn schemes(&self) -> Vec<String> {
        self.drivers.read().keys().cloned().collect()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drivers_are_selected_by_scheme() {
        let registry = DriverRegistry::with_defaults();
        assert!(registry.driver_for(&GatewayConfig::new("MEM://x")).is_some());
        assert!(registry.driver_for(&GatewayConfig::new("postgres://localhost/db")).is_none());
        assert!(registry.driver_for(&GatewayConfig::new("no-scheme")).is_none());
        assert_eq!(registry.schemes(), vec!["mem".to_string()]);
    }
}
