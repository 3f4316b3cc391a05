//! 组件容器
//!
//! 基于字符串键的组件注册表：值或工厂、首次解析时记忆化、冻结保护。

pub mod component;
pub mod registry;

pub use component::{Component, ComponentRecord, Factory, Resolution, Resolver};
pub use registry::{Registry, RegistryStats};

use crate::errors::{ContainerError, Result};
use std::cell::RefCell;

thread_local! {
    /// 当前线程上正在进行的解析/启动链
    static ACTIVE: RefCell<Vec<(usize, String)>> = const { RefCell::new(Vec::new()) };
}

/// 解析链守卫
///
/// 同一线程上再次进入同一个节点（组件工厂或提供者启动）意味着循环依赖，
/// 直接报错而不是在初始化锁上死锁。
pub(crate) struct ActiveGuard {
    id: usize,
}

impl ActiveGuard {
    pub(crate) fn enter(id: usize, label: impl Into<String>) -> Result<Self> {
        let label = label.into();
        ACTIVE.with(|active| {
            let mut active = active.borrow_mut();
            if let Some(position) = active.iter().position(|(entry, _)| *entry == id) {
                let mut chain: Vec<String> =
                    active[position..].iter().map(|(_, l)| l.clone()).collect();
                chain.push(label);
                return Err(ContainerError::CircularDependency { chain });
            }
            active.push((id, label));
            Ok(ActiveGuard { id })
        })
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        ACTIVE.with(|active| {
            let mut active = active.borrow_mut();
            if let Some(position) = active.iter().rposition(|(entry, _)| *entry == self.id) {
                active.remove(position);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reentering_the_same_node_reports_the_chain() {
        let _a = ActiveGuard::enter(1, "a").unwrap();
        let _b = ActiveGuard::enter(2, "b").unwrap();
        let err = ActiveGuard::enter(1, "a").err().unwrap();
        match err {
            ContainerError::CircularDependency { chain } => {
                assert_eq!(chain, vec!["a", "b", "a"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn guard_releases_on_drop() {
        {
            let _a = ActiveGuard::enter(7, "a").unwrap();
        }
        assert!(ActiveGuard::enter(7, "a").is_ok());
    }
}
