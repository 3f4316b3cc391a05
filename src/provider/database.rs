//! 数据库提供者
//!
//! `prepare` 只校验最终配置；`start` 通过资源索引获取（或复用）网关并注册
//! `db.gateway` 与 `db.config`；`stop` 归还持有的网关引用。

use super::{ProviderContext, ProviderSource};
use crate::errors::{BoxError, ContainerError};
use crate::gateway::{Fingerprint, GatewayConfig};
use parking_lot::Mutex;

#[derive(Default)]
pub struct DatabaseProvider {
    acquired: Mutex<Option<Fingerprint>>,
}

impl DatabaseProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProviderSource for DatabaseProvider {
    fn prepare(&self, ctx: &mut ProviderContext<'_>) -> Result<(), BoxError> {
        // 缺少 target 时交给必填项校验报告，这里只检查已有值的形状
        if ctx.setting("target").is_some() {
            GatewayConfig::from_value(ctx.provider_name(), ctx.config())?;
        }
        Ok(())
    }

    fn start(&self, ctx: &mut ProviderContext<'_>) -> Result<(), BoxError> {
        let config = GatewayConfig::from_value(ctx.provider_name(), ctx.config())?;

        let driver = ctx.drivers().driver_for(&config).ok_or_else(|| {
            ContainerError::MissingDependencyLibrary {
                provider: ctx.provider_name().to_string(),
                library: format!("{} driver", config.scheme().unwrap_or("unknown")),
            }
        })?;

        let handle = ctx
            .resources()
            .acquire(config.clone(), |config| driver.open(config))?;

        let mut acquired = self.acquired.lock();
        // 重启时先归还旧引用
        if let Some(previous) = acquired.replace(handle.fingerprint().clone()) {
            ctx.resources().release(&previous);
        }
        drop(acquired);

        tracing::debug!(
            provider = %ctx.provider_name(),
            fingerprint = %handle.fingerprint(),
            library = %driver.library(),
            "database gateway ready"
        );

        ctx.register_value("gateway", handle);
        ctx.register_value("config", config);
        Ok(())
    }

    fn stop(&self, ctx: &mut ProviderContext<'_>) -> Result<(), BoxError> {
        if let Some(fingerprint) = self.acquired.lock().take() {
            ctx.resources().release(&fingerprint);
        }
        Ok(())
    }

    fn reset(&self) {
        // 资源索引随应用一起清空，这里只丢弃旧的指纹
        self.acquired.lock().take();
    }
}
