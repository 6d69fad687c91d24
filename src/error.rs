//! 错误类型定义
//!
//! 配置类错误对单个同步组是致命的，会从协调器向上抛出；
//! 位置级的临时故障（共享目录断开、FTP 套接字超时）在适配器内部
//! 记录日志后恢复，不会中断整个周期。

use thiserror::Error;

/// 配置层面的错误
#[derive(Debug, Error)]
pub enum SyncError {
    /// 同步组至少需要两个位置才有意义
    #[error("同步组 \"{0}\" 配置的位置少于 2 个")]
    TooFewLocations(String),

    /// kind 为 ftp 的位置必须带 ftp 端点配置
    #[error("FTP 位置 \"{0}\" 缺少 ftp 端点配置")]
    MissingFtpEndpoint(String),

    #[error("配置无效: {0}")]
    InvalidConfig(String),
}
