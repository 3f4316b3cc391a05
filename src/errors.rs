//! 容器错误类型
//!
//! 所有错误都在触发它们的调用（`resolve`、`prepare`、`start`）中同步返回，
//! 容器本身不做任何自动重试。

use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

/// 用户工厂与生命周期钩子返回的错误类型
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 结果类型别名
pub type Result<T> = std::result::Result<T, ContainerError>;

/// 提供者生命周期阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    Prepare,
    Start,
    Stop,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Prepare => "prepare",
            Phase::Start => "start",
            Phase::Stop => "stop",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Component '{key}' is already registered in '{slice}'")]
    DuplicateKey { key: String, slice: String },

    #[error("Cannot register '{key}': the registry of '{slice}' is frozen")]
    FrozenRegistry { key: String, slice: String },

    #[error("Unknown key '{key}' in registry of '{slice}'")]
    UnknownKey { key: String, slice: String },

    #[error("{}", format_not_found(.key, .slice, .expected_path, .expected_type, .suggestion))]
    ComponentNotFound {
        key: String,
        slice: String,
        expected_path: String,
        expected_type: String,
        available: Vec<String>,
        suggestion: Option<String>,
    },

    #[error("Provider '{provider}' configuration error on '{setting}': {reason}")]
    Configuration {
        provider: String,
        setting: String,
        reason: String,
    },

    #[error("Circular provider dependency detected: {}", .chain.join(" -> "))]
    CircularDependency { chain: Vec<String> },

    #[error("Provider '{provider}' requires the '{library}' library, which is not available")]
    MissingDependencyLibrary { provider: String, library: String },

    #[error("Could not load slice '{path}': {reason}")]
    SliceLoad { path: String, reason: String },

    #[error("Slice '{slice}' cannot import from '{source_path}': {reason}")]
    InvalidImport {
        slice: String,
        source_path: String,
        reason: String,
    },

    #[error("Provider '{name}' is not registered in '{slice}'")]
    ProviderNotFound { name: String, slice: String },

    #[error("Factory for '{key}' failed: {source}")]
    FactoryFailed {
        key: String,
        #[source]
        source: BoxError,
    },

    #[error("Provider '{provider}' failed during {phase}: {source}")]
    HookFailed {
        provider: String,
        phase: Phase,
        #[source]
        source: BoxError,
    },

    #[error("Component '{key}' is not of type {expected}")]
    TypeMismatch { key: String, expected: &'static str },

    #[error("Operation '{operation}' timed out after {elapsed:?}")]
    Timeout { operation: String, elapsed: Duration },

    #[error("Invalid manifest '{origin}': {reason}")]
    Manifest { origin: String, reason: String },
}

fn format_not_found(
    key: &str,
    slice: &str,
    expected_path: &str,
    expected_type: &str,
    suggestion: &Option<String>,
) -> String {
    let mut message = format!(
        "Component '{}' not found in '{}'; define {} at {}",
        key, slice, expected_type, expected_path
    );
    if let Some(suggestion) = suggestion {
        message.push_str(&format!(". Did you mean '{}'?", suggestion));
    }
    message
}

impl ContainerError {
    /// 工厂或钩子返回的错误若本身就是容器错误，则原样传递
    pub(crate) fn from_factory(key: &str, err: BoxError) -> Self {
        match err.downcast::<ContainerError>() {
            Ok(inner) => *inner,
            Err(source) => ContainerError::FactoryFailed {
                key: key.to_string(),
                source,
            },
        }
    }

    pub(crate) fn from_hook(provider: &str, phase: Phase, err: BoxError) -> Self {
        match err.downcast::<ContainerError>() {
            Ok(inner) => *inner,
            Err(source) => ContainerError::HookFailed {
                provider: provider.to_string(),
                phase,
                source,
            },
        }
    }

    /// 是否属于“找不到”一类，路由层可以将其转换为请求级失败
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ContainerError::ComponentNotFound { .. }
                | ContainerError::UnknownKey { .. }
                | ContainerError::SliceLoad { .. }
        )
    }

    /// 获取用户友好的错误消息
    pub fn user_message(&self) -> String {
        match self {
            ContainerError::ComponentNotFound {
                expected_path,
                expected_type,
                ..
            } => format!(
                "❌ {}\n💡 提示: 在 {} 中定义 {}，或在父切片中导出并导入该组件",
                self, expected_path, expected_type
            ),
            ContainerError::Configuration { setting, .. } => {
                format!("❌ {}\n💡 提示: 请设置 '{}' 后重试", self, setting)
            }
            ContainerError::MissingDependencyLibrary { library, .. } => {
                format!("❌ {}\n💡 提示: 请先注册 '{}' 驱动", self, library)
            }
            ContainerError::CircularDependency { .. } => {
                format!("❌ {}\n💡 提示: 检查提供者声明的依赖关系", self)
            }
            ContainerError::FrozenRegistry { .. } => {
                format!("❌ {}\n💡 提示: 组件必须在启动完成前注册", self)
            }
            ContainerError::SliceLoad { .. } => {
                format!("❌ {}\n💡 提示: 请先声明该切片", self)
            }
            _ => format!("❌ {}", self),
        }
    }

    /// 记录错误到日志
    pub fn log(&self) {
        match self {
            ContainerError::CircularDependency { .. }
            | ContainerError::FrozenRegistry { .. }
            | ContainerError::MissingDependencyLibrary { .. } => {
                error!(error = %self, "container error");
            }
            ContainerError::ComponentNotFound { .. } | ContainerError::UnknownKey { .. } => {
                debug!(error = %self, "component lookup failed");
            }
            _ => {
                warn!(error = %self, "container error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_errors_pass_through_factory_boundary() {
        let inner: BoxError = Box::new(ContainerError::SliceLoad {
            path: "admin".to_string(),
            reason: "never declared".to_string(),
        });
        let err = ContainerError::from_factory("repos.users", inner);
        assert!(matches!(err, ContainerError::SliceLoad { path, .. } if path == "admin"));
    }

    #[test]
    fn foreign_errors_are_wrapped_with_key() {
        let inner: BoxError = "connection refused".into();
        let err = ContainerError::from_factory("db.gateway", inner);
        assert_eq!(
            err.to_string(),
            "Factory for 'db.gateway' failed: connection refused"
        );
    }

    #[test]
    fn not_found_message_names_location_and_suggestion() {
        let err = ContainerError::ComponentNotFound {
            key: "repos.user_repo".to_string(),
            slice: "app/admin".to_string(),
            expected_path: "slices/admin/repos/user_repo.rs".to_string(),
            expected_type: "Admin::Repos::UserRepo".to_string(),
            available: vec!["repos.user_repos".to_string()],
            suggestion: Some("repos.user_repos".to_string()),
        };
        let message = err.to_string();
        assert!(message.contains("slices/admin/repos/user_repo.rs"));
        assert!(message.contains("Admin::Repos::UserRepo"));
        assert!(message.contains("Did you mean 'repos.user_repos'?"));
        assert!(err.is_not_found());
    }
}
