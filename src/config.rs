//! Application configuration module / 应用配置模块
//!
//! Engine tunables and the storages to mount, loaded from `blobstream.json`
//! (or the file named by `BLOBSTREAM_CONFIG`).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::storage::{DriverConfig, MountRequest, Root};

/// Environment variable overriding the config file path / 配置文件路径环境变量
pub const CONFIG_ENV: &str = "BLOBSTREAM_CONFIG";

/// Default chunk size of buffered streams (8 MiB) / 默认缓冲区大小
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024 * 1024;

/// Application configuration / 应用配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Buffered engine settings / 缓冲引擎配置
    #[serde(default)]
    pub engine: EngineConfig,
    /// Storages mounted at startup / 启动时挂载的存储
    #[serde(default)]
    pub mounts: Vec<MountConfig>,
}

/// Buffered engine configuration / 缓冲引擎配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Chunk size in bytes / 分片大小
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Outstanding chunks per stream, 0 = unbounded (write) or whole object (read)
    #[serde(default)]
    pub max_buffers: usize,
    /// Worker pool size, `min(32, cpus + 4)` when absent / 并发数
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            max_buffers: 0,
            max_workers: None,
        }
    }
}

/// One storage to mount / 挂载配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MountConfig {
    /// Provider name, inferred from `root` when absent / 驱动类型
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Path or URL the storage is mounted for / 挂载路径
    pub root: String,
    /// Driver parameters / 驱动参数
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsecure: Option<bool>,
    /// Additional root served by the same driver / 额外根路径
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_root: Option<String>,
    /// Treat `extra_root` as a regular expression / 额外根路径为正则
    #[serde(default)]
    pub pattern: bool,
}

impl MountConfig {
    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            parameters: self.parameters.clone(),
            unsecure: self.unsecure,
        }
    }

    pub fn to_request(&self) -> Result<MountRequest> {
        let mut request = MountRequest::new(self.root.clone()).config(self.driver_config());
        if let Some(provider) = &self.provider {
            request = request.provider(provider.clone());
        }
        if let Some(extra) = &self.extra_root {
            let root = if self.pattern {
                Root::pattern(extra)?
            } else {
                Root::prefix(extra.clone())
            };
            request = request.extra_root(root);
        }
        Ok(request)
    }
}

/// Get the config file path / 获取配置文件路径
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join("blobstream.json")
}

/// Load configuration from file; a missing file yields the defaults / 加载配置文件
pub fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        tracing::debug!("No configuration at {:?}, using defaults", path);
        return Ok(AppConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
    let config: AppConfig = serde_json::from_str(&content)
        .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;

    tracing::info!("Loaded configuration from {:?}", path);
    Ok(config)
}

/// Save configuration to file / 保存配置到文件
pub fn save_config(config: &AppConfig, path: &Path) -> Result<()> {
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
    std::fs::write(path, content)
        .map_err(|e| Error::Config(format!("Failed to write config file: {}", e)))?;
    Ok(())
}
