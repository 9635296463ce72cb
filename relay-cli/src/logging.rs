//! CLI 日志系统初始化
//!
//! 基于 `tracing-subscriber` 实现分组件日志控制。stdout 承载协议，
//! 日志只写 stderr 和可选的日志文件。

use std::fs::OpenOptions;
use std::io;
use std::sync::Mutex;

use relay_config::Phase;
use serde::Deserialize;
use tracing_subscriber::{
    filter::Targets, fmt, fmt::MakeWriter, layer::SubscriberExt, util::SubscriberInitExt, Layer,
    Registry,
};

use crate::config::LogConfig;

/// CLI 自身的日志目标
pub const CLI_TARGET: &str = "relay::cli";

/// 日志输出格式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// 彩色格式化（开发使用）
    Pretty,
    /// 紧凑格式
    Compact,
    /// JSON 格式（工具集成）
    Json,
}

/// Per-phase filter built from the configuration
pub fn targets(log_config: &LogConfig) -> Targets {
    Phase::ALL
        .into_iter()
        .fold(Targets::new().with_default(log_config.global), |targets, phase| {
            targets.with_target(phase.target(), log_config.level_for(phase))
        })
        .with_target(CLI_TARGET, log_config.global)
}

/// 使用日志配置初始化日志系统
pub fn init(log_config: &LogConfig) -> Result<(), String> {
    let targets = targets(log_config);

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = vec![format_layer(
        log_config.format,
        io::stderr,
        true,
    )
    .with_filter(targets.clone())
    .boxed()];

    // If file specified, output to both stderr and file
    if let Some(path) = &log_config.file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| format!("无法打开日志文件 '{}': {}", path.display(), e))?;
        layers.push(
            format_layer(log_config.format, Mutex::new(file), false)
                .with_filter(targets)
                .boxed(),
        );
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| format!("日志系统初始化失败: {e}"))
}

/// Create formatter layer based on format
fn format_layer<W>(format: LogFormat, make_writer: W, ansi: bool) -> Box<dyn Layer<Registry> + Send + Sync>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    match format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_ansi(ansi)
            .with_target(true)
            .with_timer(fmt::time::time())
            .with_writer(make_writer)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_ansi(ansi)
            .with_target(true)
            .without_time()
            .with_writer(make_writer)
            .boxed(),
        LogFormat::Json => fmt::layer()
            .json()
            .with_target(true)
            .with_timer(fmt::time::time())
            .with_writer(make_writer)
            .boxed(),
    }
}
