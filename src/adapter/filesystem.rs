//! 文件系统适配器
//!
//! 覆盖本地目录与挂载的网络共享两种位置。共享目录随时可能断开，
//! 其 I/O 错误视为临时不可达，静默跳过本周期；本地目录的错误记录
//! 日志后返回。

use crate::adapter::{
    apply_rename, matches_extensions, normalize_extensions, FileRecord, LocationAdapter,
    PhaseSummary,
};
use crate::config::{Location, LocationKind, RenameMapping};
use crate::core::{backup, hasher};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use filetime::FileTime;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, error};
use walkdir::WalkDir;

pub struct FilesystemAdapter {
    cache_dir: PathBuf,
    root: PathBuf,
    kind: LocationKind,
    extensions: Vec<String>,
    rename_mappings: Vec<RenameMapping>,
    max_backups: usize,
    cancelled: Arc<AtomicBool>,
    name: String,
}

impl FilesystemAdapter {
    pub fn new(
        cache_dir: &Path,
        location: &Location,
        extensions: &[String],
        max_backups: usize,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            cache_dir: cache_dir.to_path_buf(),
            root: PathBuf::from(&location.path),
            kind: location.kind,
            extensions: normalize_extensions(extensions),
            rename_mappings: location.rename_mappings.clone(),
            max_backups,
            cancelled,
            name: location.describe(),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// 递归枚举命中扩展名的文件，跳过备份文件
    async fn enumerate(root: &Path, extensions: &[String]) -> Result<Vec<FileRecord>> {
        if !root.exists() {
            return Ok(Vec::new());
        }

        let root = root.to_path_buf();
        let extensions = extensions.to_vec();

        // 使用 spawn_blocking 避免阻塞 async runtime
        let records = tokio::task::spawn_blocking(move || {
            WalkDir::new(&root)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter_map(|entry| {
                    let rel = entry
                        .path()
                        .strip_prefix(&root)
                        .ok()?
                        .to_str()?
                        .replace('\\', "/");

                    if backup::is_backup_name(&rel) || !matches_extensions(&rel, &extensions) {
                        return None;
                    }

                    let modified = entry.metadata().ok()?.modified().ok()?;
                    Some(FileRecord {
                        path: rel,
                        modified: DateTime::<Utc>::from(modified),
                        checksum: None,
                    })
                })
                .collect::<Vec<_>>()
        })
        .await?;

        Ok(records)
    }

    /// 目标文件的修改时间；不存在时返回 None（比较时视作纪元起点）
    async fn dest_modified(path: &Path) -> Result<Option<DateTime<Utc>>> {
        match fs::metadata(path).await {
            Ok(meta) => Ok(Some(DateTime::<Utc>::from(meta.modified()?))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 单方向同步：把 src_root 里较新且内容不同的文件复制到 dst_root
    async fn sync_direction(
        &self,
        src_root: &Path,
        dst_root: &Path,
        reverse_rename: bool,
    ) -> Result<PhaseSummary> {
        let mut summary = PhaseSummary::default();

        let records = match Self::enumerate(src_root, &self.extensions).await {
            Ok(records) => records,
            Err(e) if self.kind == LocationKind::FileShare => {
                // 共享不可达是常态，跳过本周期即可
                debug!("共享位置 {} 不可达，跳过本周期: {:#}", self.name, e);
                return Ok(summary);
            }
            Err(e) => {
                return Err(e).with_context(|| format!("枚举 {} 失败", src_root.display()));
            }
        };

        for record in records {
            if self.is_cancelled() {
                debug!("同步已取消，停止处理 {}", self.name);
                break;
            }
            summary.examined += 1;

            let dest_rel = apply_rename(&record.path, &self.rename_mappings, reverse_rename);
            let src_path = src_root.join(&record.path);
            let dst_path = dst_root.join(&dest_rel);

            match self.sync_one(&src_path, &dst_path, record.modified).await {
                Ok(true) => summary.copied += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) if self.kind == LocationKind::FileShare => {
                    debug!("共享位置 {} 出现 I/O 错误，跳过本周期: {:#}", self.name, e);
                    summary.failed += 1;
                    return Ok(summary);
                }
                Err(e) => {
                    // 单个文件失败不影响其余文件
                    error!(
                        "同步文件失败 {} -> {}: {:#}",
                        src_path.display(),
                        dst_path.display(),
                        e
                    );
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }

    /// 同步单个文件，返回是否发生了复制
    async fn sync_one(
        &self,
        src: &Path,
        dst: &Path,
        src_modified: DateTime<Utc>,
    ) -> Result<bool> {
        let dst_modified = Self::dest_modified(dst).await?;

        if let Some(dst_time) = dst_modified {
            // 时间戳优先：目标不旧于源时直接跳过
            if dst_time >= src_modified {
                return Ok(false);
            }
            // 时间戳更新但内容一致时不复制，避免时钟偏差造成的无谓覆盖
            if hasher::hash_file(src).await? == hasher::hash_file(dst).await? {
                debug!("内容一致，跳过: {}", dst.display());
                return Ok(false);
            }
            backup::rotate_backups(dst, self.max_backups)?;
        }

        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(src, dst).await?;
        // 把目标修改时间对齐到源，后续周期的比较才站得住
        filetime::set_file_mtime(dst, FileTime::from_system_time(src_modified.into()))?;

        debug!("复制: {} -> {}", src.display(), dst.display());
        Ok(true)
    }
}

#[async_trait]
impl LocationAdapter for FilesystemAdapter {
    async fn pull_latest(&self) -> Result<PhaseSummary> {
        debug!("拉取阶段开始: {}", self.name);
        self.sync_direction(&self.root, &self.cache_dir, false).await
    }

    async fn push_latest(&self) -> Result<PhaseSummary> {
        debug!("推送阶段开始: {}", self.name);
        self.sync_direction(&self.cache_dir, &self.root, true).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}
