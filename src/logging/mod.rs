use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 日志环境配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoggingEnvironment {
    /// 开发环境
    Development,
    /// 测试环境
    Testing,
    /// 生产环境
    Production,
}

/// 日志格式配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// 人类可读格式
    Pretty,
    /// 紧凑格式
    Compact,
}

/// 日志配置
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub environment: LoggingEnvironment,
    /// 默认级别；设置了 `RUST_LOG` 时以环境变量为准
    pub level: Level,
    pub format: LogFormat,
    pub show_target: bool,
    pub show_thread_ids: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            environment: LoggingEnvironment::Development,
            level: Level::INFO,
            format: LogFormat::Pretty,
            show_target: true,
            show_thread_ids: false,
        }
    }
}

impl LoggingConfig {
    /// 创建开发环境配置
    pub fn development() -> Self {
        Self {
            environment: LoggingEnvironment::Development,
            level: Level::DEBUG,
            format: LogFormat::Pretty,
            show_target: true,
            show_thread_ids: true,
        }
    }

    /// 创建生产环境配置
    pub fn production() -> Self {
        Self {
            environment: LoggingEnvironment::Production,
            level: Level::INFO,
            format: LogFormat::Compact,
            show_target: false,
            show_thread_ids: false,
        }
    }

    /// 创建测试环境配置
    pub fn testing() -> Self {
        Self {
            environment: LoggingEnvironment::Testing,
            level: Level::ERROR,
            format: LogFormat::Compact,
            show_target: false,
            show_thread_ids: false,
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("slicekit={}", self.level)))
    }
}

/// 初始化日志系统
///
/// 全局订阅者已存在时返回错误，测试中可以忽略。
pub fn init_logging(config: LoggingConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ansi = config.environment != LoggingEnvironment::Production;
    match config.format {
        LogFormat::Pretty => {
            let fmt_layer = fmt::layer()
                .pretty()
                .with_target(config.show_target)
                .with_thread_ids(config.show_thread_ids)
                .with_ansi(ansi);

            tracing_subscriber::registry()
                .with(config.filter())
                .with(fmt_layer)
                .try_init()?;
        }
        LogFormat::Compact => {
            let fmt_layer = fmt::layer()
                .compact()
                .with_target(config.show_target)
                .with_thread_ids(config.show_thread_ids)
                .with_ansi(ansi);

            tracing_subscriber::registry()
                .with(config.filter())
                .with(fmt_layer)
                .try_init()?;
        }
    }

    tracing::debug!(
        environment = ?config.environment,
        level = %config.level,
        format = ?config.format,
        "logging initialized"
    );
    Ok(())
}

/// 操作计时器
///
/// 调用 `finish` 记录一条 info 日志；未完成就被丢弃（例如提前用 `?` 返回）时记录 debug 日志。
pub struct OperationTimer {
    start: Instant,
    operation: String,
    metadata: BTreeMap<String, String>,
    finished: bool,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            start: Instant::now(),
            operation: operation.to_string(),
            metadata: BTreeMap::new(),
            finished: false,
        }
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.insert(key.to_string(), value.to_string());
        self
    }

    pub fn finish(mut self) -> Duration {
        self.finished = true;
        let duration = self.start.elapsed();
        tracing::info!(
            operation = %self.operation,
            duration_ms = duration.as_millis() as u64,
            metadata = ?self.metadata,
            "operation completed"
        );
        duration
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        if !self.finished {
            tracing::debug!(
                operation = %self.operation,
                duration_ms = self.start.elapsed().as_millis() as u64,
                metadata = ?self.metadata,
                "operation abandoned"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_differ_by_environment() {
        let dev = LoggingConfig::development();
        assert_eq!(dev.level, Level::DEBUG);
        assert_eq!(dev.format, LogFormat::Pretty);

        let prod = LoggingConfig::production();
        assert_eq!(prod.environment, LoggingEnvironment::Production);
        assert!(!prod.show_target);

        let test = LoggingConfig::testing().with_level(Level::WARN);
        assert_eq!(test.level, Level::WARN);
        assert_eq!(test.format, LogFormat::Compact);
    }

    #[test]
    fn timer_records_metadata_and_elapsed_time() {
        let timer = OperationTimer::new("provider.start").with_metadata("provider", "app:db");
        assert_eq!(timer.metadata.get("provider").map(String::as_str), Some("app:db"));

        std::thread::sleep(Duration::from_millis(2));
        assert!(timer.finish() >= Duration::from_millis(2));
    }

    #[test]
    fn second_initialization_is_reported() {
        let _ = init_logging(LoggingConfig::testing());
        assert!(init_logging(LoggingConfig::testing()).is_err());
    }
}
