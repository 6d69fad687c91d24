//! 同步协调器
//!
//! 每个同步组对应缓存根目录下的一个子目录，该子目录是组内所有位置
//! 的唯一汇合点。一次周期严格分两个阶段：先对每个位置做拉取
//! （远端 -> 缓存），全部位置拉取完毕后再对每个位置做推送
//! （缓存 -> 远端）。两个阶段顺序执行，位置之间也顺序执行，
//! 文件从不在两个位置之间直接移动。

use crate::adapter::{create_adapter, LocationAdapter, PhaseSummary};
use crate::config::{SyncConfiguration, SyncSetting};
use crate::error::SyncError;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// 一个同步组跑完一次周期的结果
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub setting: String,
    pub pull: PhaseSummary,
    pub push: PhaseSummary,
    pub duration: Duration,
}

pub struct SyncCoordinator {
    cache_root: PathBuf,
    max_backups: usize,
    cycle_timeout: Duration,
    cancelled: Arc<AtomicBool>,
}

impl SyncCoordinator {
    pub fn new(cache_root: PathBuf, max_backups: usize, cycle_timeout: Duration) -> Self {
        Self {
            cache_root,
            max_backups,
            cycle_timeout,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn from_configuration(config: &SyncConfiguration) -> Self {
        Self::new(
            config.cache_root.clone(),
            config.max_backups,
            Duration::from_secs(config.cycle_timeout_secs),
        )
    }

    /// 请求取消，正在进行的周期在下一个文件边界停下
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }

    /// 对一个同步组执行一次完整周期
    ///
    /// 配置错误（位置不足、FTP 端点缺失）在做任何 I/O 之前返回 Err；
    /// 周期内单个位置或单个文件的故障只记日志，周期继续。
    pub async fn synchronize(&self, setting: &SyncSetting) -> Result<CycleReport, SyncError> {
        if setting.locations.len() < 2 {
            return Err(SyncError::TooFewLocations(setting.name.clone()));
        }

        let cache_dir = self.cache_root.join(&setting.name);

        // 周期内部的停止标志：超时只叫停本周期，不波及后续同步组
        let cycle_flag = Arc::new(AtomicBool::new(false));

        // 先构建全部适配器，配置问题在创建缓存目录之前暴露
        let mut adapters: Vec<Box<dyn LocationAdapter>> = Vec::with_capacity(setting.locations.len());
        for location in &setting.locations {
            adapters.push(create_adapter(
                &cache_dir,
                location,
                &setting.extensions,
                self.max_backups,
                cycle_flag.clone(),
            )?);
        }

        std::fs::create_dir_all(&cache_dir)
            .map_err(|e| SyncError::InvalidConfig(format!("无法创建缓存目录: {}", e)))?;

        let started = Instant::now();
        let deadline = started + self.cycle_timeout;
        info!("同步组 \"{}\" 周期开始，位置数 {}", setting.name, adapters.len());

        let mut pull = PhaseSummary::default();
        for adapter in &adapters {
            pull.merge(
                &self
                    .phase_step(adapter.as_ref(), true, deadline, &cycle_flag)
                    .await,
            );
        }

        let mut push = PhaseSummary::default();
        for adapter in &adapters {
            push.merge(
                &self
                    .phase_step(adapter.as_ref(), false, deadline, &cycle_flag)
                    .await,
            );
        }

        let duration = started.elapsed();
        info!(
            "同步组 \"{}\" 周期结束: 拉取 复制 {}/检查 {}，推送 复制 {}/检查 {}，耗时 {:.1}s",
            setting.name,
            pull.copied,
            pull.examined,
            push.copied,
            push.examined,
            duration.as_secs_f64()
        );

        Ok(CycleReport {
            setting: setting.name.clone(),
            pull,
            push,
            duration,
        })
    }

    /// 跑一个位置的单个阶段，受周期截止时间约束
    async fn phase_step(
        &self,
        adapter: &dyn LocationAdapter,
        is_pull: bool,
        deadline: Instant,
        cycle_flag: &Arc<AtomicBool>,
    ) -> PhaseSummary {
        // 进程级取消传导到周期内部的停止标志
        if self.cancelled.load(Ordering::Relaxed) {
            cycle_flag.store(true, Ordering::Relaxed);
        }
        if cycle_flag.load(Ordering::Relaxed) {
            return PhaseSummary::default();
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            warn!("周期超时，跳过 {}", adapter.name());
            cycle_flag.store(true, Ordering::Relaxed);
            return PhaseSummary::default();
        }

        let fut = if is_pull {
            adapter.pull_latest()
        } else {
            adapter.push_latest()
        };

        match tokio::time::timeout(remaining, fut).await {
            Ok(Ok(summary)) => summary,
            Ok(Err(e)) => {
                // 单个位置的意外错误不中断周期
                error!("位置 {} 同步失败: {:#}", adapter.name(), e);
                PhaseSummary::default()
            }
            Err(_) => {
                warn!("位置 {} 超出周期时限", adapter.name());
                // 只叫停本周期，游离的阻塞任务也据此退出
                cycle_flag.store(true, Ordering::Relaxed);
                PhaseSummary::default()
            }
        }
    }
}
