//! Relay CLI - kernel host process
//!
//! Speaks the kernel protocol on stdin/stdout, one JSON object per line.
//! Logs go to stderr (and optionally a file) so they never mix with replies.

use clap::Parser;
use std::io;
use std::path::PathBuf;
use std::process;

mod config;
mod logging;

use crate::config::{parse_level, FileConfig, LogConfig};
use crate::logging::{LogFormat, CLI_TARGET};
use relay_api::{serve, Dispatcher};
use relay_config::KernelConfig;
use relay_core::{FileSource, Kernel};
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "relay",
    about = "Relay kernel - object reference runtime served over stdio",
    version
)]
struct Cli {
    /// Configuration file (JSON with optional `kernel`, `log` and `manifest_root` sections)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory that non-builtin manifest locations are resolved against
    #[arg(long, value_name = "DIR")]
    manifest_root: Option<PathBuf>,

    /// Log level: silent, error, warn, info, debug, trace
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    /// Also append logs to this file
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Do not register the built-in `calc` library
    #[arg(long)]
    no_builtins: bool,
}

/// 合并后的运行设置
struct Settings {
    kernel: KernelConfig,
    log: LogConfig,
    manifest_root: Option<PathBuf>,
    builtins: bool,
}

fn main() {
    let cli = Cli::parse();

    let settings = match resolve_settings(cli) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(2);
        }
    };

    if let Err(e) = logging::init(&settings.log) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    let mut dispatcher = Dispatcher::new(build_kernel(settings));

    let stdin = io::stdin();
    let stdout = io::stdout();
    match serve(stdin.lock(), stdout.lock(), &mut dispatcher) {
        Ok(answered) => {
            info!(target: CLI_TARGET, answered, stats = ?dispatcher.kernel().stats(), "shutting down");
        }
        Err(e) => {
            error!(target: CLI_TARGET, error = %e, "transport failed");
            process::exit(1);
        }
    }
}

/// Configuration file first, then command line flags on top
fn resolve_settings(cli: Cli) -> Result<Settings, String> {
    let file = match &cli.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };

    let mut log = LogConfig::from_section(&file.log)?;
    if let Some(level) = &cli.log_level {
        log.global = parse_level(level)?;
    }
    if let Some(format) = cli.log_format {
        log.format = format;
    }
    if cli.log_file.is_some() {
        log.file = cli.log_file;
    }

    Ok(Settings {
        kernel: file.kernel,
        log,
        manifest_root: cli.manifest_root.or(file.manifest_root),
        builtins: !cli.no_builtins,
    })
}

fn build_kernel(settings: Settings) -> Kernel {
    let mut kernel = if settings.builtins {
        Kernel::with_builtins(settings.kernel)
    } else {
        Kernel::new(settings.kernel)
    };
    if let Some(root) = settings.manifest_root {
        info!(target: CLI_TARGET, root = %root.display(), "manifest root");
        kernel = kernel.with_source(FileSource::new(root));
    }
    kernel
}
