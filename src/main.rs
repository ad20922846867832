use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use jobrunner::app::Application;
use jobrunner::shutdown::{wait_for_shutdown_signal, ShutdownManager};
use jobrunner_core::logging::init_logging;
use jobrunner_core::AppConfig;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("jobrunner")
        .version(env!("CARGO_PKG_VERSION"))
        .about("异步作业调度与执行状态跟踪引擎")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，缺省时依次查找 config/jobrunner.toml、jobrunner.toml"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，覆盖配置文件")
                .value_parser(["trace", "debug", "info", "warn", "error"]),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式，覆盖配置文件")
                .value_parser(["json", "pretty"]),
        )
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(String::as_str);
    let mut config = AppConfig::load(config_path).with_context(|| {
        format!("加载配置失败: {}", config_path.unwrap_or("<默认路径>"))
    })?;

    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }

    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    )?;

    info!("启动作业调度引擎: {}", config.scheduler.instance_name);
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    if config.observability.metrics_enabled {
        init_metrics(&config.observability.metrics_bind_address)?;
    }

    let shutdown_timeout = Duration::from_secs(config.scheduler.shutdown_timeout_seconds);
    let app = Arc::new(Application::new(config).await?);
    let shutdown_manager = ShutdownManager::new();

    let status_logger = app.spawn_status_logger(shutdown_manager.subscribe().await);
    let app_handle = {
        let app = Arc::clone(&app);
        let shutdown_rx = shutdown_manager.subscribe().await;
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {e:#}");
            }
        })
    };

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    // 应用内部已按配置限时等待，这里多留一点余量
    match tokio::time::timeout(shutdown_timeout + Duration::from_secs(5), app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }
    let _ = status_logger.await;

    info!("作业调度引擎已退出");
    Ok(())
}

/// 安装Prometheus指标导出器
fn init_metrics(bind_address: &str) -> Result<()> {
    let addr: std::net::SocketAddr = bind_address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {bind_address}"))?;
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("安装Prometheus指标导出器失败: {e}"))?;
    info!("Prometheus指标导出器已监听: {addr}");
    Ok(())
}
