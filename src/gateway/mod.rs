//! 外部资源网关
//!
//! 提供者把最终配置规范化为指纹，经由 `ResourceIndex` 在整棵切片树内共享同一个底层资源。

pub mod driver;
pub mod fingerprint;
pub mod index;
pub mod memory;

pub use driver::{Driver, DriverRegistry};
pub use fingerprint::{Fingerprint, GatewayConfig};
pub use index::ResourceIndex;
pub use memory::{MemoryDriver, MemoryGateway};

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// 已打开的外部资源（例如连接池）
pub trait Gateway: Send + Sync + fmt::Debug {
    fn target(&self) -> &str;

    /// 释放底层资源；最后一个持有者释放时调用
    fn disconnect(&self) {}

    fn as_any(&self) -> &dyn Any;
}

/// 注册进切片的网关句柄
#[derive(Clone)]
pub struct GatewayHandle {
    fingerprint: Fingerprint,
    config: Arc<GatewayConfig>,
    resource: Arc<dyn Gateway>,
}

impl GatewayHandle {
    pub(crate) fn new(fingerprint: Fingerprint, config: Arc<GatewayConfig>, resource: Arc<dyn Gateway>) -> Self {
        Self {
            fingerprint,
            config,
            resource,
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn resource(&self) -> &Arc<dyn Gateway> {
        &self.resource
    }

    /// 两个句柄是否指向同一个底层资源（引用相等）
    pub fn same_resource(&self, other: &GatewayHandle) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.resource) as *const (),
            Arc::as_ptr(&other.resource) as *const (),
        )
    }

    pub fn downcast<T: Any>(&self) -> Option<&T> {
        self.resource.as_any().downcast_ref::<T>()
    }
}

impl fmt::Debug for GatewayHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayHandle")
            .field("fingerprint", &self.fingerprint)
            .field("target", &self.config.target)
            .field("extensions", &self.config.extensions)
            .finish()
    }
}
