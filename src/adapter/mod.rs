//! 位置适配器
//!
//! 每个适配器负责一个位置与共享缓存目录之间的单向同步：
//! 拉取（远端 -> 缓存）与推送（缓存 -> 远端）。适配器在每次周期内
//! 重新构建，自身不跨周期持有任何状态。

pub mod filesystem;
pub mod ftp;

use crate::config::{Location, LocationKind, RenameMapping};
use crate::error::SyncError;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub use filesystem::FilesystemAdapter;
pub use ftp::FtpAdapter;

// ============ 公共常量 ============

/// 控制类操作超时（秒）- 连接、列表、MDTM 等
pub const OP_TIMEOUT_SECS: u64 = 30;
/// 传输类操作超时（秒）- 下载、上传
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 单次枚举产生的文件记录
///
/// 只在一次拉取/推送调用内有效，不在周期之间持久化。
#[derive(Debug, Clone)]
pub struct FileRecord {
    /// 相对路径，统一使用 /
    pub path: String,
    /// 最后修改时间（UTC）
    pub modified: DateTime<Utc>,
    /// 内容哈希，惰性计算
    pub checksum: Option<String>,
}

/// 单方向同步的统计
#[derive(Debug, Clone, Default)]
pub struct PhaseSummary {
    pub examined: usize,
    pub copied: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl PhaseSummary {
    pub fn merge(&mut self, other: &PhaseSummary) {
        self.examined += other.examined;
        self.copied += other.copied;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// 位置同步能力
///
/// 临时故障（共享目录断开、FTP 套接字超时）在实现内部记录并恢复，
/// 只有意外错误才会通过 Err 上抛；协调器对 Err 也只记日志、不中断周期。
#[async_trait]
pub trait LocationAdapter: Send + Sync {
    /// 远端 -> 缓存：把比缓存新且内容确实不同的文件拉入缓存
    async fn pull_latest(&self) -> Result<PhaseSummary>;

    /// 缓存 -> 远端：把比远端新且内容确实不同的文件推送出去
    async fn push_latest(&self) -> Result<PhaseSummary>;

    /// 位置描述（用于日志）
    fn name(&self) -> &str;
}

/// 根据位置类型创建同步适配器
pub fn create_adapter(
    cache_dir: &Path,
    location: &Location,
    extensions: &[String],
    max_backups: usize,
    cancelled: Arc<AtomicBool>,
) -> Result<Box<dyn LocationAdapter>, SyncError> {
    match location.kind {
        LocationKind::Local | LocationKind::FileShare => {
            tracing::debug!("创建文件系统适配器: {}", location.describe());
            Ok(Box::new(FilesystemAdapter::new(
                cache_dir,
                location,
                extensions,
                max_backups,
                cancelled,
            )))
        }
        LocationKind::Ftp => {
            let endpoint = location
                .ftp
                .clone()
                .ok_or_else(|| SyncError::MissingFtpEndpoint(location.path.clone()))?;
            tracing::debug!("创建 FTP 适配器: {}:{}", endpoint.host, endpoint.port);
            Ok(Box::new(FtpAdapter::new(
                cache_dir,
                location,
                endpoint,
                extensions,
                max_backups,
                cancelled,
            )))
        }
    }
}

// ============ 共享辅助 ============

/// 规范化扩展名：去掉前导点并统一小写
pub fn normalize_extensions(extensions: &[String]) -> Vec<String> {
    extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_lowercase())
        .collect()
}

/// 判断文件名是否命中扩展名集合（集合为空表示不限制）
pub fn matches_extensions(name: &str, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    extensions.iter().any(|e| *e == ext)
}

/// 应用重命名映射
///
/// 源文件名以映射中的扩展名结尾时替换为目标扩展名，按声明顺序取第一个
/// 命中的映射，未命中的原样返回。推送方向 reverse 为 true，映射反向应用。
pub fn apply_rename(path: &str, mappings: &[RenameMapping], reverse: bool) -> String {
    for mapping in mappings {
        let (from, to) = if reverse {
            (&mapping.to, &mapping.from)
        } else {
            (&mapping.from, &mapping.to)
        };
        let suffix = format!(".{}", from.trim_start_matches('.'));
        if let Some(stem) = strip_suffix_ignore_ascii_case(path, &suffix) {
            return format!("{}.{}", stem, to.trim_start_matches('.'));
        }
    }
    path.to_string()
}

/// 在原始字节上做 ASCII 大小写不敏感的后缀匹配，命中返回去掉后缀的前段
///
/// 不对整串做 to_lowercase：个别字符小写后字节长度会变，按变换后的
/// 长度切原串会切出错位的前段。
fn strip_suffix_ignore_ascii_case<'a>(path: &'a str, suffix: &str) -> Option<&'a str> {
    if path.len() < suffix.len() || !path.is_char_boundary(path.len() - suffix.len()) {
        return None;
    }
    let (stem, tail) = path.split_at(path.len() - suffix.len());
    tail.eq_ignore_ascii_case(suffix).then_some(stem)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FtpEndpoint;

    fn mapping(from: &str, to: &str) -> RenameMapping {
        RenameMapping {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    #[test]
    fn test_matches_extensions() {
        let exts = normalize_extensions(&[".TXT".to_string(), "pdf".to_string()]);
        assert!(matches_extensions("docs/a.txt", &exts));
        assert!(matches_extensions("b.PDF", &exts));
        assert!(!matches_extensions("c.tmp", &exts));
        assert!(!matches_extensions("noext", &exts));
        // 空集合不限制
        assert!(matches_extensions("anything.bin", &[]));
    }

    #[test]
    fn test_apply_rename_first_match_wins() {
        let mappings = vec![mapping("tmp", "pdf"), mapping("tmp", "txt")];
        assert_eq!(apply_rename("report.tmp", &mappings, false), "report.pdf");
    }

    #[test]
    fn test_apply_rename_reverse() {
        let mappings = vec![mapping("tmp", "pdf")];
        assert_eq!(apply_rename("report.pdf", &mappings, true), "report.tmp");
        // 反向时未命中的也原样通过
        assert_eq!(apply_rename("report.tmp", &mappings, true), "report.tmp");
    }

    #[test]
    fn test_apply_rename_passthrough() {
        let mappings = vec![mapping("tmp", "pdf")];
        assert_eq!(apply_rename("notes/a.txt", &mappings, false), "notes/a.txt");
        assert_eq!(apply_rename("sub/dir/b.tmp", &mappings, false), "sub/dir/b.pdf");
    }

    #[test]
    fn test_apply_rename_non_ascii() {
        let mappings = vec![mapping("tmk", "pdf")];
        // 开尔文符号 K 不是 ASCII 的 K，后缀不命中，原样通过且前段不被切坏
        assert_eq!(apply_rename("a.tm\u{212A}", &mappings, false), "a.tm\u{212A}");
        assert_eq!(apply_rename("b.TMK", &mappings, false), "b.pdf");
        // 多字节字符只出现在前段时照常命中
        let mappings = vec![mapping("tmp", "pdf")];
        assert_eq!(apply_rename("résumé.TMP", &mappings, false), "résumé.pdf");
    }

    #[test]
    fn test_create_adapter_requires_ftp_endpoint() {
        let location = Location {
            path: "/pub".to_string(),
            kind: LocationKind::Ftp,
            username: None,
            password: None,
            ftp: None,
            rename_mappings: Vec::new(),
        };

        let result = create_adapter(
            Path::new("/tmp/cache"),
            &location,
            &[],
            5,
            Arc::new(AtomicBool::new(false)),
        );
        assert!(matches!(result, Err(SyncError::MissingFtpEndpoint(_))));
    }

    #[test]
    fn test_create_adapter_by_kind() {
        let cancelled = Arc::new(AtomicBool::new(false));

        for kind in [LocationKind::Local, LocationKind::FileShare] {
            let location = Location {
                path: "/srv/data".to_string(),
                kind,
                username: None,
                password: None,
                ftp: None,
                rename_mappings: Vec::new(),
            };
            let adapter =
                create_adapter(Path::new("/tmp/cache"), &location, &[], 5, cancelled.clone())
                    .unwrap();
            assert!(adapter.name().contains("/srv/data"));
        }

        let ftp_location = Location {
            path: "/pub".to_string(),
            kind: LocationKind::Ftp,
            username: Some("user".to_string()),
            password: Some("secret".to_string()),
            ftp: Some(FtpEndpoint {
                host: "ftp.example.com".to_string(),
                port: 21,
                utc_offset_minutes: 60,
            }),
            rename_mappings: Vec::new(),
        };
        let adapter =
            create_adapter(Path::new("/tmp/cache"), &ftp_location, &[], 5, cancelled).unwrap();
        assert!(adapter.name().starts_with("ftp://"));
    }
}
