//! 同步配置模块
//!
//! 配置从一个 JSON 文件整体加载，进程内只读。核心引擎不负责调度，
//! 只要求配置在一次周期开始前已完整解析并通过结构校验。

use crate::error::SyncError;
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// 位置类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LocationKind {
    Local,
    FileShare,
    Ftp,
}

/// FTP 端点，仅 kind 为 ftp 的位置需要
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FtpEndpoint {
    pub host: String,
    #[serde(default = "default_ftp_port")]
    pub port: u16,
    /// 服务器时区相对 UTC 的偏移（分钟），MDTM 返回的本地时间据此换算成 UTC
    #[serde(default)]
    pub utc_offset_minutes: i32,
}

fn default_ftp_port() -> u16 {
    21
}

/// 扩展名重命名映射
///
/// 文件跨越位置与缓存边界时按声明顺序取第一个命中的映射：
/// 拉取方向 from -> to，推送方向反向应用。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameMapping {
    pub from: String,
    pub to: String,
}

/// 参与同步的存储位置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub path: String,
    pub kind: LocationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ftp: Option<FtpEndpoint>,
    #[serde(default)]
    pub rename_mappings: Vec<RenameMapping>,
}

impl Location {
    /// 位置描述（用于日志）
    pub fn describe(&self) -> String {
        match self.kind {
            LocationKind::Local => format!("local:{}", self.path),
            LocationKind::FileShare => format!("share:{}", self.path),
            LocationKind::Ftp => {
                let endpoint = self
                    .ftp
                    .as_ref()
                    .map(|e| format!("{}:{}", e.host, e.port))
                    .unwrap_or_else(|| "?".to_string());
                format!("ftp://{}{}", endpoint, self.path)
            }
        }
    }
}

/// 同步组：一组位置 + 扩展名过滤，对应一个缓存子目录
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSetting {
    /// 组名，唯一，用作缓存子目录名
    pub name: String,
    /// 纳入同步的扩展名（空表示不限制）
    #[serde(default)]
    pub extensions: Vec<String>,
    /// 参与的位置，按配置顺序依次处理，至少 2 个
    pub locations: Vec<Location>,
}

/// 进程级同步配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfiguration {
    /// 缓存根目录，每个同步组在其下拥有一个子目录
    pub cache_root: PathBuf,
    /// 覆盖前保留的备份份数
    #[serde(default = "default_max_backups")]
    pub max_backups: usize,
    /// 单个同步组一次周期的总时限（秒）
    #[serde(default = "default_cycle_timeout_secs")]
    pub cycle_timeout_secs: u64,
    #[serde(default)]
    pub log: LogConfig,
    pub settings: Vec<SyncSetting>,
}

fn default_max_backups() -> usize {
    5
}

fn default_cycle_timeout_secs() -> u64 {
    3600
}

impl SyncConfiguration {
    /// 从 JSON 配置文件加载并校验
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: SyncConfiguration = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// 结构校验：位置数量、FTP 端点的有无必须与 kind 一致
    pub fn validate(&self) -> Result<(), SyncError> {
        for setting in &self.settings {
            if setting.name.trim().is_empty() {
                return Err(SyncError::InvalidConfig("同步组名称不能为空".to_string()));
            }
            if setting.locations.len() < 2 {
                return Err(SyncError::TooFewLocations(setting.name.clone()));
            }
            for location in &setting.locations {
                match location.kind {
                    LocationKind::Ftp if location.ftp.is_none() => {
                        return Err(SyncError::MissingFtpEndpoint(location.path.clone()));
                    }
                    LocationKind::Local | LocationKind::FileShare if location.ftp.is_some() => {
                        return Err(SyncError::InvalidConfig(format!(
                            "非 FTP 位置 \"{}\" 不应配置 ftp 端点",
                            location.path
                        )));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}
