//! 备份轮转
//!
//! 覆盖目标文件前先把它复制为 `<原名>.<UTC时间戳>.bak`，随后只保留
//! 最新的 max_backups 份。时间戳为定宽的 yyyyMMddHHmmss，文件名的
//! 字典序即时间序。这是系统里唯一有删除行为的保留策略。

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{debug, warn};

const BACKUP_EXTENSION: &str = "bak";
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const TIMESTAMP_LEN: usize = 14;

/// 生成备份文件名：`report.pdf` -> `report.pdf.20240131094500.bak`
pub fn backup_file_name(file_name: &str, at: DateTime<Utc>) -> String {
    format!(
        "{}.{}.{}",
        file_name,
        at.format(TIMESTAMP_FORMAT),
        BACKUP_EXTENSION
    )
}

/// 判断 candidate 是否为 base 的备份文件
pub fn is_backup_of(base: &str, candidate: &str) -> bool {
    let Some(rest) = candidate.strip_prefix(base) else {
        return false;
    };
    let Some(stamp) = rest
        .strip_prefix('.')
        .and_then(|r| r.strip_suffix(BACKUP_EXTENSION))
        .and_then(|r| r.strip_suffix('.'))
    else {
        return false;
    };
    stamp.len() == TIMESTAMP_LEN && stamp.bytes().all(|b| b.is_ascii_digit())
}

/// 判断文件名本身是否为某个文件的备份（枚举时跳过备份文件用）
///
/// 尾部按字节检查，原名里的多字节字符不参与切片。
pub fn is_backup_name(name: &str) -> bool {
    let Some(rest) = name
        .strip_suffix(BACKUP_EXTENSION)
        .and_then(|r| r.strip_suffix('.'))
    else {
        return false;
    };

    let bytes = rest.as_bytes();
    // 原名至少 1 个字节，加上点号和定宽时间戳
    if bytes.len() < TIMESTAMP_LEN + 2 {
        return false;
    }
    let stamp_start = bytes.len() - TIMESTAMP_LEN;
    bytes[stamp_start..].iter().all(|b| b.is_ascii_digit()) && bytes[stamp_start - 1] == b'.'
}

/// 覆盖前备份现有目标文件，并把备份份数裁剪到 max_backups
pub fn rotate_backups(path: &Path, max_backups: usize) -> Result<()> {
    rotate_backups_at(path, max_backups, Utc::now())
}

/// 同上，备份时间戳可注入（测试用）
pub fn rotate_backups_at(path: &Path, max_backups: usize, at: DateTime<Utc>) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
        return Ok(());
    };

    let backup_name = backup_file_name(file_name, at);
    std::fs::copy(path, parent.join(&backup_name))?;
    debug!("已备份 {} -> {}", path.display(), backup_name);

    prune_backups(parent, file_name, max_backups)
}

/// 只保留最新 max_backups 份备份，删除更早的
fn prune_backups(dir: &Path, file_name: &str, max_backups: usize) -> Result<()> {
    let mut backups: Vec<String> = std::fs::read_dir(dir)?
        .flatten()
        .filter_map(|entry| entry.file_name().to_str().map(String::from))
        .filter(|name| is_backup_of(file_name, name))
        .collect();

    // 定宽时间戳：按文件名倒序即按时间倒序
    backups.sort_unstable_by(|a, b| b.cmp(a));

    for stale in backups.iter().skip(max_backups) {
        if let Err(e) = std::fs::remove_file(dir.join(stale)) {
            warn!("删除过期备份失败 {}: {}", stale, e);
        }
    }

    Ok(())
}
