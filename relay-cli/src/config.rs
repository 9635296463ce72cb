//! CLI 配置
//!
//! 配置文件（JSON）与命令行参数的组合；命令行参数优先。

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use relay_config::{KernelConfig, Phase};
use serde::Deserialize;
use tracing::Level;

use crate::logging::LogFormat;

/// 配置文件结构
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    /// 内核配置
    pub kernel: KernelConfig,
    /// 日志配置
    pub log: LogSection,
    /// 清单根目录（相对于配置文件所在目录）
    pub manifest_root: Option<PathBuf>,
}

/// 配置文件中的日志部分
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// 日志级别: "silent", "error", "warn", "info", "debug", "trace"
    pub level: Option<String>,
    /// 按组件覆盖级别，如 `{"coordinator": "trace"}`
    pub phases: HashMap<String, String>,
    pub format: Option<LogFormat>,
    pub file: Option<PathBuf>,
}

impl FileConfig {
    /// Read and parse a configuration file
    pub fn load(path: &Path) -> Result<FileConfig, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("无法读取 '{}': {}", path.display(), e))?;
        let mut config: FileConfig = serde_json::from_str(&content)
            .map_err(|e| format!("解析 '{}' 失败: {}", path.display(), e))?;

        let base_dir = path.parent().unwrap_or(Path::new("."));
        if let Some(root) = config.manifest_root.take() {
            config.manifest_root = Some(base_dir.join(root));
        }
        Ok(config)
    }
}

/// CLI 日志配置
#[derive(Debug, Clone)]
pub struct LogConfig {
    pub global: Level,
    pub phases: HashMap<Phase, Level>,
    pub format: LogFormat,
    pub file: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            global: Level::INFO,
            phases: HashMap::new(),
            format: LogFormat::Compact,
            file: None,
        }
    }
}

impl LogConfig {
    /// Build from the file section; unknown phase names are rejected
    pub fn from_section(section: &LogSection) -> Result<LogConfig, String> {
        let mut config = LogConfig::default();
        if let Some(level) = &section.level {
            config.global = parse_level(level)?;
        }
        for (name, level) in &section.phases {
            let phase = Phase::from_name(name).ok_or_else(|| format!("未知的日志组件 '{name}'"))?;
            config.phases.insert(phase, parse_level(level)?);
        }
        if let Some(format) = section.format {
            config.format = format;
        }
        config.file = section.file.clone();
        Ok(config)
    }

    /// Get log level for a specific phase
    pub fn level_for(&self, phase: Phase) -> Level {
        self.phases.get(&phase).copied().unwrap_or(self.global)
    }
}

/// Parse log level string
pub fn parse_level(s: &str) -> Result<Level, String> {
    match s.to_lowercase().as_str() {
        "silent" => Ok(Level::ERROR), // silent = only errors
        "error" => Ok(Level::ERROR),
        "warn" => Ok(Level::WARN),
        "info" => Ok(Level::INFO),
        "debug" => Ok(Level::DEBUG),
        "trace" => Ok(Level::TRACE),
        other => Err(format!("无效的日志级别 '{other}'")),
    }
}
