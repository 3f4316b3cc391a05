use super::ProviderContext;
use crate::errors::BoxError;

/// 可复用的提供者实现
///
/// 每个阶段的默认实现都是空操作；闭包钩子在对应阶段的主体之后执行。
pub trait ProviderSource: Send + Sync {
    fn prepare(&self, _ctx: &mut ProviderContext<'_>) -> Result<(), BoxError> {
        Ok(())
    }

    fn start(&self, _ctx: &mut ProviderContext<'_>) -> Result<(), BoxError> {
        Ok(())
    }

    fn stop(&self, _ctx: &mut ProviderContext<'_>) -> Result<(), BoxError> {
        Ok(())
    }

    /// 提供者回到 `Registered` 时丢弃实现自身持有的状态
    fn reset(&self) {}
}
