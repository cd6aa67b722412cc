use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, Command};
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use jobsched::{Application, ShutdownManager};
use jobsched_core::{config::ObservabilityConfig, AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("jobsched")
        .version(env!("CARGO_PKG_VERSION"))
        .about("分布式定时作业调度引擎")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径，不指定时按默认路径查找"),
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
    let mut config = AppConfig::load(config_path).with_context(|| match config_path {
        Some(path) => format!("加载配置文件失败: {path}"),
        None => "加载配置失败".to_string(),
    })?;
    if let Some(level) = matches.get_one::<String>("log-level") {
        config.observability.log_level = level.clone();
    }
    if let Some(format) = matches.get_one::<String>("log-format") {
        config.observability.log_format = format.clone();
    }

    init_logging(&config.observability)?;
    info!("启动 jobsched {}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = config_path {
        info!("配置文件: {path}");
    }

    if config.observability.metrics_enabled {
        init_metrics(&config.observability)?;
    }

    let app = Application::new(config).await?;
    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let shutdown_manager = shutdown_manager.clone();
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_manager).await {
                error!("应用运行失败: {e:#}");
            }
        })
    };

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");
    shutdown_manager.shutdown().await;

    match tokio::time::timeout(Duration::from_secs(60), app_handle).await {
        Ok(Ok(())) => info!("应用已优雅关闭"),
        Ok(Err(e)) => error!("应用关闭时发生错误: {e}"),
        Err(_) => warn!("应用关闭超时，强制退出"),
    }

    Ok(())
}

/// 初始化日志系统，`RUST_LOG` 优先于配置的级别
fn init_logging(config: &ObservabilityConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match config.log_format.as_str() {
        "json" => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .context("初始化JSON日志格式失败")?,
        "pretty" => registry
            .with(tracing_subscriber::fmt::layer().pretty())
            .try_init()
            .context("初始化Pretty日志格式失败")?,
        other => return Err(anyhow::anyhow!("不支持的日志格式: {other}")),
    }

    Ok(())
}

/// 安装 Prometheus 导出器，指标通过 HTTP 暴露
fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    let address: SocketAddr = config
        .metrics_bind_address
        .parse()
        .with_context(|| format!("无效的指标监听地址: {}", config.metrics_bind_address))?;

    PrometheusBuilder::new()
        .with_http_listener(address)
        .install()
        .context("安装Prometheus导出器失败")?;

    info!("Prometheus指标已在 {address} 暴露");
    Ok(())
}

/// 等待 Ctrl+C 或 SIGTERM
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("收到Ctrl+C信号"),
        _ = terminate => info!("收到SIGTERM信号"),
    }
}
