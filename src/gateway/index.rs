//! 资源去重索引
//!
//! 指纹 → 资源槽。查找与插入在同一个分片锁内完成；资源的打开在锁外进行，
//! 由槽内的初始化锁保证每个指纹只打开一次。

use super::{Fingerprint, Gateway, GatewayConfig, GatewayHandle};
use crate::errors::BoxError;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

struct ResourceSlot {
    handle: OnceLock<GatewayHandle>,
    init_lock: Mutex<()>,
    holders: AtomicUsize,
}

impl ResourceSlot {
    fn new() -> Self {
        Self {
            handle: OnceLock::new(),
            init_lock: Mutex::new(()),
            holders: AtomicUsize::new(0),
        }
    }
}

#[derive(Default)]
pub struct ResourceIndex {
    slots: DashMap<Fingerprint, Arc<ResourceSlot>>,
    opened: AtomicUsize,
}

impl ResourceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取与配置等价的资源；未命中时调用 `open` 创建
    ///
    /// 每次成功获取都会增加一个持有者计数，对应一次 `release`。
    pub fn acquire<F>(&self, config: GatewayConfig, open: F) -> Result<GatewayHandle, BoxError>
    where
        F: FnOnce(&GatewayConfig) -> Result<Arc<dyn Gateway>, BoxError>,
    {
        let fingerprint = config.fingerprint();
        let slot = {
            let entry = self
                .slots
                .entry(fingerprint.clone())
                .or_insert_with(|| Arc::new(ResourceSlot::new()));
            // 在分片锁内登记持有者，与 release 的摘除互斥
            entry.holders.fetch_add(1, Ordering::AcqRel);
            entry.value().clone()
        };

        if let Some(handle) = slot.handle.get() {
            tracing::debug!(fingerprint = %fingerprint, target = %config.target, "reusing shared gateway");
            return Ok(handle.clone());
        }

        let _init = slot.init_lock.lock();
        if let Some(handle) = slot.handle.get() {
            tracing::debug!(fingerprint = %fingerprint, target = %config.target, "reusing shared gateway");
            return Ok(handle.clone());
        }

        match open(&config) {
            Ok(resource) => {
                let handle = GatewayHandle::new(fingerprint.clone(), Arc::new(config), resource);
                let _ = slot.handle.set(handle.clone());
                self.opened.fetch_add(1, Ordering::Relaxed);
                tracing::info!(fingerprint = %fingerprint, target = %handle.config().target, "opened gateway");
                Ok(handle)
            }
            Err(err) => {
                drop(_init);
                self.release_slot(&fingerprint);
                Err(err)
            }
        }
    }

    /// 释放一次持有；最后一个持有者释放时断开资源并移除指纹
    pub fn release(&self, fingerprint: &Fingerprint) {
        if let Some(handle) = self.release_slot(fingerprint) {
            tracing::info!(fingerprint = %fingerprint, target = %handle.config().target, "closing gateway");
            handle.resource().disconnect();
        }
    }

    fn release_slot(&self, fingerprint: &Fingerprint) -> Option<GatewayHandle> {
        let (_, slot) = self
            .slots
            .remove_if(fingerprint, |_, slot| slot.holders.fetch_sub(1, Ordering::AcqRel) == 1)?;
        slot.handle.get().cloned()
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<GatewayHandle> {
        self.slots
            .get(fingerprint)
            .and_then(|slot| slot.handle.get().cloned())
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.get(fingerprint).is_some()
    }

    pub fn holders(&self, fingerprint: &Fingerprint) -> usize {
        self.slots
            .get(fingerprint)
            .map(|slot| slot.holders.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// 当前存活的资源数量
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| slot.handle.get().is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 累计打开过的资源数量
    pub fn opened_count(&self) -> usize {
        self.opened.load(Ordering::Relaxed)
    }

    /// 断开并移除全部资源（测试隔离用）
    pub fn clear(&self) {
        let fingerprints: Vec<Fingerprint> = self.slots.iter().map(|slot| slot.key().clone()).collect();
        for fingerprint in fingerprints {
            if let Some((_, slot)) = self.slots.remove(&fingerprint) {
                if let Some(handle) = slot.handle.get() {
                    handle.resource().disconnect();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryGateway;

    fn open(config: &GatewayConfig) -> Result<Arc<dyn Gateway>, BoxError> {
        Ok(Arc::new(MemoryGateway::new(config)))
    }

    #[test]
    fn equal_configs_share_one_resource() {
        let index = ResourceIndex::new();
        let a = index
            .acquire(GatewayConfig::new("mem://x").with_extension("a").with_extension("b"), open)
            .unwrap();
        let b = index
            .acquire(GatewayConfig::new("mem://x").with_extension("b").with_extension("a"), open)
            .unwrap();

        assert!(a.same_resource(&b));
        assert_eq!(index.opened_count(), 1);
        assert_eq!(index.holders(a.fingerprint()), 2);
    }

    #[test]
    fn last_release_disconnects() {
        let index = ResourceIndex::new();
        let a = index.acquire(GatewayConfig::new("mem://x"), open).unwrap();
        let _b = index.acquire(GatewayConfig::new("mem://x"), open).unwrap();

        index.release(a.fingerprint());
        assert!(index.contains(a.fingerprint()));
        assert!(a.downcast::<MemoryGateway>().unwrap().is_connected());

        index.release(a.fingerprint());
        assert!(!index.contains(a.fingerprint()));
        assert!(!a.downcast::<MemoryGateway>().unwrap().is_connected());
    }

    #[test]
    fn failed_open_leaves_no_entry() {
        let index = ResourceIndex::new();
        let err = index
            .acquire(GatewayConfig::new("mem://x"), |_| Err("refused".into()))
            .unwrap_err();
        assert_eq!(err.to_string(), "refused");
        assert!(index.is_empty());
        assert_eq!(index.holders(&GatewayConfig::new("mem://x").fingerprint()), 0);

        let handle = index.acquire(GatewayConfig::new("mem://x"), open).unwrap();
        assert_eq!(index.holders(handle.fingerprint()), 1);
    }

    #[test]
    fn concurrent_acquire_opens_once() {
        let index = Arc::new(ResourceIndex::new());
        let opens = Arc::new(AtomicUsize::new(0));

        let handles: Vec<GatewayHandle> = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    let index = index.clone();
                    let opens = opens.clone();
                    scope.spawn(move || {
                        index
                            .acquire(GatewayConfig::new("mem://shared"), |config| {
                                opens.fetch_add(1, Ordering::SeqCst);
                                std::thread::sleep(std::time::Duration::from_millis(5));
                                open(config)
                            })
                            .unwrap()
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).collect()
        });

        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert!(handles.windows(2).all(|pair| pair[0].same_resource(&pair[1])));
    }
}
