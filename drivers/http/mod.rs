//! Read-only HTTP(S) driver / HTTP只读驱动

mod driver;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::{DriverBox, DriverConfig, DriverFactory};

pub use driver::HttpDriver;

/// HTTP driver parameters / HTTP驱动配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Request timeout in seconds / 请求超时（秒）
    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

fn default_timeout() -> u64 {
    60
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self { timeout: default_timeout() }
    }
}

/// HTTP driver factory / HTTP驱动工厂
pub struct HttpDriverFactory;

impl DriverFactory for HttpDriverFactory {
    fn driver_type(&self) -> &'static str {
        "http"
    }

    fn create_driver(&self, config: &DriverConfig) -> Result<DriverBox> {
        let http_config: HttpConfig = config.parse()?;
        Ok(Arc::new(HttpDriver::new(http_config, config.is_unsecure())?))
    }
}
