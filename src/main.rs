use std::path::PathBuf;
use std::process::ExitCode;
use syncbridge::logging::init_logging;
use syncbridge::{SyncConfiguration, SyncCoordinator};
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.json"));

    let config = match SyncConfiguration::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("加载配置 {} 失败: {:#}", config_path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    // 日志守卫存活到进程结束，确保缓冲的文件日志写完
    let _log_guard = init_logging(&config.log);
    info!("配置加载完成，共 {} 个同步组", config.settings.len());

    let coordinator = SyncCoordinator::from_configuration(&config);

    // Ctrl+C 触发取消，周期在文件边界停下
    let cancel_flag = coordinator.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("收到中断信号，正在取消同步");
            cancel_flag.store(true, std::sync::atomic::Ordering::Relaxed);
        }
    });

    let mut failed = false;
    for setting in &config.settings {
        match coordinator.synchronize(setting).await {
            Ok(report) => {
                info!(
                    "同步组 \"{}\": 拉取 {} 个，推送 {} 个",
                    report.setting, report.pull.copied, report.push.copied
                );
            }
            Err(e) => {
                error!("同步组 \"{}\" 配置错误: {}", setting.name, e);
                failed = true;
            }
        }
    }

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
