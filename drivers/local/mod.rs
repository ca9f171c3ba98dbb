//! Local filesystem driver / 本地驱动
//!
//! Serves `file://` paths below a configured root directory.

mod driver;

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::{DriverBox, DriverConfig, DriverFactory};

pub use driver::LocalDriver;

/// Local driver parameters / 本地驱动配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Directory `file://` paths are relative to / 根目录
    #[serde(default = "default_root")]
    pub root: String,
}

fn default_root() -> String {
    "/".to_string()
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self { root: default_root() }
    }
}

/// Local driver factory / 本地驱动工厂
pub struct LocalDriverFactory;

impl DriverFactory for LocalDriverFactory {
    fn driver_type(&self) -> &'static str {
        "file"
    }

    fn create_driver(&self, config: &DriverConfig) -> Result<DriverBox> {
        let config: LocalConfig = config.parse()?;
        Ok(Arc::new(LocalDriver::new(PathBuf::from(config.root))))
    }
}
