//! 日志模块
//!
//! 控制台输出始终开启（除非整体禁用）；配置了日志目录时额外写入
//! 按天轮转的日志文件。

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogConfig {
    /// 是否启用日志记录
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// 日志级别: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_level")]
    pub level: String,
    /// 日志文件目录，缺省只输出到控制台
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

fn default_enabled() -> bool {
    true
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            level: default_level(),
            dir: None,
        }
    }
}

impl LogConfig {
    /// 将配置的日志级别转换为 tracing Level
    pub fn tracing_level(&self) -> tracing::Level {
        match self.level.to_lowercase().as_str() {
            "error" => tracing::Level::ERROR,
            "warn" => tracing::Level::WARN,
            "debug" => tracing::Level::DEBUG,
            "trace" => tracing::Level::TRACE,
            _ => tracing::Level::INFO,
        }
    }
}

/// 初始化日志系统
///
/// 返回的 guard 需要持有到进程结束，否则文件日志的后台写入线程会提前退出。
pub fn init_logging(config: &LogConfig) -> Option<WorkerGuard> {
    if !config.enabled {
        let _ = tracing::subscriber::set_global_default(tracing_subscriber::registry());
        return None;
    }

    let env_filter = EnvFilter::from_default_env().add_directive(config.tracing_level().into());

    // 控制台层在各分支内各自构建：fmt 层的类型随所在的订阅者栈而不同
    match &config.dir {
        Some(dir) => {
            let _ = std::fs::create_dir_all(dir);
            let appender = tracing_appender::rolling::daily(dir, "syncbridge.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);

            let file_layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false);

            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(file_layer)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_thread_ids(false)
                        .with_thread_names(false),
                );
            let _ = tracing::subscriber::set_global_default(subscriber);

            Some(guard)
        }
        None => {
            let subscriber = tracing_subscriber::registry().with(env_filter).with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_thread_names(false),
            );
            let _ = tracing::subscriber::set_global_default(subscriber);

            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_level() {
        let mut config = LogConfig::default();
        assert_eq!(config.tracing_level(), tracing::Level::INFO);

        config.level = "debug".to_string();
        assert_eq!(config.tracing_level(), tracing::Level::DEBUG);

        // 未知级别回退到 info
        config.level = "verbose".to_string();
        assert_eq!(config.tracing_level(), tracing::Level::INFO);
    }

    #[test]
    fn test_init_console_only_has_no_guard() {
        let config = LogConfig::default();
        assert!(init_logging(&config).is_none());
    }

    #[test]
    fn test_init_with_dir_returns_guard() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            dir: Some(dir.path().to_path_buf()),
            ..LogConfig::default()
        };
        // 文件层启用时必须返回 guard，调用方持有到进程结束
        assert!(init_logging(&config).is_some());
    }
}
