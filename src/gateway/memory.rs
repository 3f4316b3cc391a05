//! 进程内网关，`mem://` 目标使用，主要服务于测试与示例

use super::{Driver, Gateway, GatewayConfig};
use crate::errors::BoxError;
use std::any::Any;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub struct MemoryGateway {
    target: String,
    extensions: BTreeSet<String>,
    connected: AtomicBool,
}

impl MemoryGateway {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            target: config.target.clone(),
            extensions: config.extensions.clone(),
            connected: AtomicBool::new(true),
        }
    }

    pub fn extensions(&self) -> &BTreeSet<String> {
        &self.extensions
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

impl Gateway for MemoryGateway {
    fn target(&self) -> &str {
        &self.target
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug, Default)]
pub struct MemoryDriver {
    opened: AtomicUsize,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已打开的连接数
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::Relaxed)
    }
}

impl Driver for MemoryDriver {
    fn scheme(&self) -> &str {
        "mem"
    }

    fn library(&self) -> &str {
        "memory"
    }

    fn open(&self, config: &GatewayConfig) -> Result<Arc<dyn Gateway>, BoxError> {
        self.opened.fetch_add(1, Ordering::Relaxed);
        Ok(Arc::new(MemoryGateway::new(config)))
    }
}
