//! FTP 适配器
//!
//! 每次拉取/推送打开一条控制连接，调用结束时无条件断开，不跨周期
//! 复用。命令走控制套接字，其读写超时约束了列表、MDTM、上传、下载
//! 等每一步操作，单个不可达的主机拖不垮整个周期。
//!
//! FTP 无法设置远端文件的修改时间，推送后远端时间戳是服务器落盘
//! 时间；后续周期依靠内容哈希短路，不会来回重复传输。

use crate::adapter::{
    apply_rename, matches_extensions, normalize_extensions, LocationAdapter, PhaseSummary,
    IO_TIMEOUT_SECS, OP_TIMEOUT_SECS,
};
use crate::config::{FtpEndpoint, Location, RenameMapping};
use crate::core::{backup, hasher};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use filetime::FileTime;
use std::io::Cursor;
use std::net::ToSocketAddrs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Mode};
use tracing::{debug, error, warn};
use walkdir::WalkDir;

#[derive(Clone)]
pub struct FtpAdapter {
    cache_dir: PathBuf,
    remote_root: String,
    endpoint: FtpEndpoint,
    username: String,
    password: String,
    extensions: Vec<String>,
    rename_mappings: Vec<RenameMapping>,
    max_backups: usize,
    cancelled: Arc<AtomicBool>,
    name: String,
}

impl FtpAdapter {
    pub fn new(
        cache_dir: &Path,
        location: &Location,
        endpoint: FtpEndpoint,
        extensions: &[String],
        max_backups: usize,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            cache_dir: cache_dir.to_path_buf(),
            remote_root: location.path.trim_end_matches('/').to_string(),
            endpoint,
            username: location
                .username
                .clone()
                .unwrap_or_else(|| "anonymous".to_string()),
            password: location.password.clone().unwrap_or_default(),
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

    /// 建立控制连接：有界连接超时 + 控制套接字读写超时
    fn connect(&self) -> Result<FtpStream> {
        let addr = format!("{}:{}", self.endpoint.host, self.endpoint.port)
            .to_socket_addrs()?
            .next()
            .with_context(|| format!("无法解析 FTP 地址 {}", self.endpoint.host))?;

        let mut ftp = FtpStream::connect_timeout(addr, Duration::from_secs(OP_TIMEOUT_SECS))?;
        ftp.get_ref()
            .set_read_timeout(Some(Duration::from_secs(IO_TIMEOUT_SECS)))?;
        ftp.get_ref()
            .set_write_timeout(Some(Duration::from_secs(IO_TIMEOUT_SECS)))?;

        ftp.login(&self.username, &self.password)?;
        ftp.transfer_type(FileType::Binary)?;
        ftp.set_mode(Mode::Passive);

        Ok(ftp)
    }

    /// MDTM 返回的是服务器本地时间，按配置的时区偏移换算成 UTC
    fn to_utc(&self, naive: NaiveDateTime) -> DateTime<Utc> {
        let offset = chrono::Duration::minutes(self.endpoint.utc_offset_minutes as i64);
        Utc.from_utc_datetime(&(naive - offset))
    }

    /// 远端文件修改时间；550 一类的响应视为文件不存在
    fn remote_modified(&self, ftp: &mut FtpStream, path: &str) -> Result<Option<DateTime<Utc>>> {
        match ftp.mdtm(path) {
            Ok(naive) => Ok(Some(self.to_utc(naive))),
            Err(FtpError::UnexpectedResponse(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn join_remote(&self, rel: &str) -> String {
        if self.remote_root.is_empty() {
            rel.to_string()
        } else {
            format!("{}/{}", self.remote_root, rel)
        }
    }

    /// 列出远端根目录下命中扩展名的文件名（FTP 列表不递归）
    fn list_remote(&self, ftp: &mut FtpStream) -> Result<Vec<String>> {
        let listing = if self.remote_root.is_empty() {
            ftp.nlst(None)?
        } else {
            ftp.nlst(Some(&self.remote_root))?
        };

        Ok(listing
            .into_iter()
            .filter_map(|entry| {
                // 部分服务器返回完整路径，只取最后一段
                let name = entry.rsplit('/').next().unwrap_or(&entry).to_string();
                (!name.is_empty()
                    && !backup::is_backup_name(&name)
                    && matches_extensions(&name, &self.extensions))
                .then_some(name)
            })
            .collect())
    }

    /// 逐段创建远端目录，已存在的报错直接忽略
    fn ensure_remote_dirs(&self, ftp: &mut FtpStream, rel_parent: &str) {
        let mut current = self.remote_root.clone();
        for part in rel_parent.split('/').filter(|s| !s.is_empty()) {
            current = if current.is_empty() {
                part.to_string()
            } else {
                format!("{}/{}", current, part)
            };
            let _ = ftp.mkdir(&current);
        }
    }

    /// 覆盖远端文件前把旧内容重新上传为 .bak，并裁剪备份份数
    fn rotate_remote_backups(
        &self,
        ftp: &mut FtpStream,
        remote_dir: &str,
        file_name: &str,
        old_data: &[u8],
    ) -> Result<()> {
        let backup_name = backup::backup_file_name(file_name, Utc::now());
        let backup_path = if remote_dir.is_empty() {
            backup_name.clone()
        } else {
            format!("{}/{}", remote_dir, backup_name)
        };
        ftp.put_file(&backup_path, &mut Cursor::new(old_data))?;
        debug!("已备份远端文件 -> {}", backup_path);

        let listing = if remote_dir.is_empty() {
            ftp.nlst(None)?
        } else {
            ftp.nlst(Some(remote_dir))?
        };
        let mut backups: Vec<String> = listing
            .into_iter()
            .filter_map(|entry| {
                let name = entry.rsplit('/').next().unwrap_or(&entry).to_string();
                backup::is_backup_of(file_name, &name).then_some(name)
            })
            .collect();
        backups.sort_unstable_by(|a, b| b.cmp(a));

        for stale in backups.iter().skip(self.max_backups) {
            let path = if remote_dir.is_empty() {
                stale.clone()
            } else {
                format!("{}/{}", remote_dir, stale)
            };
            if let Err(e) = ftp.rm(&path) {
                warn!("删除远端过期备份失败 {}: {}", path, e);
            }
        }

        Ok(())
    }

    /// 拉取循环主体（阻塞，跑在 spawn_blocking 里）
    fn run_pull(&self) -> Result<PhaseSummary> {
        let mut summary = PhaseSummary::default();

        let ftp = match self.connect() {
            Ok(ftp) => ftp,
            Err(e) => {
                // 主机不可达是临时故障，跳过本周期
                warn!("FTP {} 连接失败，跳过本周期: {:#}", self.name, e);
                return Ok(summary);
            }
        };
        // 无论成败，控制连接都在离开作用域时断开
        let mut ftp = scopeguard::guard(ftp, |mut ftp| {
            let _ = ftp.quit();
        });

        let names = match self.list_remote(&mut ftp) {
            Ok(names) => names,
            Err(e) => {
                warn!("FTP {} 列表失败，跳过本周期: {:#}", self.name, e);
                return Ok(summary);
            }
        };

        for name in names {
            if self.is_cancelled() {
                debug!("同步已取消，停止处理 {}", self.name);
                break;
            }
            summary.examined += 1;

            match self.pull_one(&mut ftp, &name) {
                Ok(true) => summary.copied += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    summary.failed += 1;
                    if is_transient(&e) {
                        warn!("FTP {} 连接中断，跳过本周期剩余文件: {:#}", self.name, e);
                        break;
                    }
                    error!("拉取 {} 的 {} 失败: {:#}", self.name, name, e);
                }
            }
        }

        Ok(summary)
    }

    /// 拉取单个文件，返回是否发生了复制
    fn pull_one(&self, ftp: &mut FtpStream, name: &str) -> Result<bool> {
        let remote_path = self.join_remote(name);
        let Some(remote_time) = self.remote_modified(ftp, &remote_path)? else {
            // 刚列出的条目拿不到 MDTM，多半是目录
            debug!("跳过无 MDTM 的条目: {}", remote_path);
            return Ok(false);
        };

        let cache_rel = apply_rename(name, &self.rename_mappings, false);
        let cache_path = self.cache_dir.join(&cache_rel);

        let cache_time = match std::fs::metadata(&cache_path) {
            Ok(meta) => Some(DateTime::<Utc>::from(meta.modified()?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };

        if let Some(cache_time) = cache_time {
            if cache_time >= remote_time {
                return Ok(false);
            }
        }

        let data = ftp.retr_as_buffer(&remote_path)?.into_inner();

        if cache_time.is_some() {
            if hasher::hash_bytes(&data) == hasher::hash_file_blocking(&cache_path)? {
                debug!("内容一致，跳过: {}", cache_path.display());
                return Ok(false);
            }
            backup::rotate_backups(&cache_path, self.max_backups)?;
        }

        if let Some(parent) = cache_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&cache_path, &data)?;
        filetime::set_file_mtime(
            &cache_path,
            FileTime::from_system_time(remote_time.into()),
        )?;

        debug!("拉取: {} -> {}", remote_path, cache_path.display());
        Ok(true)
    }

    /// 推送循环主体（阻塞，跑在 spawn_blocking 里）
    fn run_push(&self) -> Result<PhaseSummary> {
        let mut summary = PhaseSummary::default();

        // 先枚举缓存，缓存为空时连连接都不必开
        let cache_files = self.enumerate_cache();
        if cache_files.is_empty() {
            return Ok(summary);
        }

        let ftp = match self.connect() {
            Ok(ftp) => ftp,
            Err(e) => {
                warn!("FTP {} 连接失败，跳过本周期: {:#}", self.name, e);
                return Ok(summary);
            }
        };
        let mut ftp = scopeguard::guard(ftp, |mut ftp| {
            let _ = ftp.quit();
        });

        for (rel, modified) in cache_files {
            if self.is_cancelled() {
                debug!("同步已取消，停止处理 {}", self.name);
                break;
            }
            summary.examined += 1;

            match self.push_one(&mut ftp, &rel, modified) {
                Ok(true) => summary.copied += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    summary.failed += 1;
                    if is_transient(&e) {
                        warn!("FTP {} 连接中断，跳过本周期剩余文件: {:#}", self.name, e);
                        break;
                    }
                    error!("推送 {} 的 {} 失败: {:#}", self.name, rel, e);
                }
            }
        }

        Ok(summary)
    }

    /// 枚举缓存目录里命中扩展名的文件（相对路径 + 修改时间）
    fn enumerate_cache(&self) -> Vec<(String, DateTime<Utc>)> {
        if !self.cache_dir.exists() {
            return Vec::new();
        }

        WalkDir::new(&self.cache_dir)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|entry| {
                let rel = entry
                    .path()
                    .strip_prefix(&self.cache_dir)
                    .ok()?
                    .to_str()?
                    .replace('\\', "/");

                if backup::is_backup_name(&rel) || !matches_extensions(&rel, &self.extensions) {
                    return None;
                }

                let modified = entry.metadata().ok()?.modified().ok()?;
                Some((rel, DateTime::<Utc>::from(modified)))
            })
            .collect()
    }

    /// 推送单个缓存文件，返回是否发生了上传
    fn push_one(
        &self,
        ftp: &mut FtpStream,
        cache_rel: &str,
        cache_time: DateTime<Utc>,
    ) -> Result<bool> {
        let remote_rel = apply_rename(cache_rel, &self.rename_mappings, true);
        let remote_path = self.join_remote(&remote_rel);

        let remote_time = self.remote_modified(ftp, &remote_path)?;
        if let Some(remote_time) = remote_time {
            if remote_time >= cache_time {
                return Ok(false);
            }
        }

        let data = std::fs::read(self.cache_dir.join(cache_rel))?;

        let (remote_dir, file_name) = match remote_rel.rsplit_once('/') {
            Some((dir, name)) => (self.join_remote(dir), name),
            None => (self.remote_root.clone(), remote_rel.as_str()),
        };

        if remote_time.is_some() {
            let old_data = ftp.retr_as_buffer(&remote_path)?.into_inner();
            if hasher::hash_bytes(&old_data) == hasher::hash_bytes(&data) {
                debug!("内容一致，跳过: {}", remote_path);
                return Ok(false);
            }
            self.rotate_remote_backups(ftp, &remote_dir, file_name, &old_data)?;
        } else if let Some((parent, _)) = remote_rel.rsplit_once('/') {
            self.ensure_remote_dirs(ftp, parent);
        }

        ftp.put_file(&remote_path, &mut Cursor::new(data))?;

        debug!("推送: {} -> {}", cache_rel, remote_path);
        Ok(true)
    }
}

/// 套接字/超时类错误：该位置本周期跳过，不上报为失败
fn is_transient(e: &anyhow::Error) -> bool {
    match e.downcast_ref::<FtpError>() {
        Some(FtpError::ConnectionError(_)) => true,
        Some(_) => false,
        None => e.downcast_ref::<std::io::Error>().is_some_and(|io| {
            matches!(
                io.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
            )
        }),
    }
}

#[async_trait]
impl LocationAdapter for FtpAdapter {
    async fn pull_latest(&self) -> Result<PhaseSummary> {
        debug!("拉取阶段开始: {}", self.name);
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.run_pull()).await?
    }

    async fn push_latest(&self) -> Result<PhaseSummary> {
        debug!("推送阶段开始: {}", self.name);
        let this = self.clone();
        tokio::task::spawn_blocking(move || this.run_push()).await?
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocationKind;

    fn adapter(host: &str, port: u16, offset_minutes: i32) -> FtpAdapter {
        let location = Location {
            path: "/pub".to_string(),
            kind: LocationKind::Ftp,
            username: None,
            password: None,
            ftp: Some(FtpEndpoint {
                host: host.to_string(),
                port,
                utc_offset_minutes: offset_minutes,
            }),
            rename_mappings: Vec::new(),
        };
        let endpoint = location.ftp.clone().unwrap();
        FtpAdapter::new(
            Path::new("/tmp/cache"),
            &location,
            endpoint,
            &["txt".to_string()],
            5,
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[test]
    fn test_to_utc_applies_server_offset() {
        // 服务器在 UTC+8：本地 12:00 对应 UTC 04:00
        let adapter = adapter("ftp.example.com", 21, 480);
        let naive = NaiveDateTime::parse_from_str("2024-06-01 12:00:00", "%Y-%m-%d %H:%M:%S")
            .unwrap();
        let utc = adapter.to_utc(naive);
        assert_eq!(utc, Utc.with_ymd_and_hms(2024, 6, 1, 4, 0, 0).unwrap());
    }

    #[test]
    fn test_join_remote() {
        let adapter = adapter("ftp.example.com", 21, 0);
        assert_eq!(adapter.join_remote("a.txt"), "/pub/a.txt");
    }

    #[test]
    fn test_anonymous_credentials_by_default() {
        let adapter = adapter("ftp.example.com", 21, 0);
        assert_eq!(adapter.username, "anonymous");
        assert_eq!(adapter.password, "");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_swallowed() {
        // 拒绝连接的端口：适配器吞掉故障，返回空统计
        let adapter = adapter("127.0.0.1", 1, 0);
        let summary = adapter.pull_latest().await.unwrap();
        assert_eq!(summary.examined, 0);
        assert_eq!(summary.failed, 0);
    }
}
