//! slicekit：分层组件容器
//!
//! 应用被拆分为一棵切片树，每个切片拥有自己的组件注册表；提供者负责
//! 数据库连接等带副作用的初始化，等价的外部资源配置在整棵树内只打开一次。

pub mod app;
pub mod config;
pub mod container;
pub mod discovery;
pub mod errors;
pub mod gateway;
pub mod inflector;
pub mod logging;
pub mod provider;
pub mod slice;

// Re-export commonly used items for convenience
pub use app::{AppContext, Application, ApplicationBuilder, BootMode};
pub use config::{AppManifest, Settings};
pub use container::{Component, Registry, Resolution, Resolver};
pub use errors::{BoxError, ContainerError, Phase, Result};
pub use gateway::{GatewayConfig, GatewayHandle};
pub use provider::{Provider, ProviderBuilder, ProviderContext, ProviderSource, ProviderState};
pub use slice::{Import, Slice};
