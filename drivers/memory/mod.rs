//! In-process object store / 内存驱动
//!
//! Serves `mem://locator/key`. Every driver created by one factory shares the
//! same store, so a driver built for a per-call configuration sees the
//! objects of the mounted one.

mod driver;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::storage::{BlobKind, DriverBox, DriverConfig, DriverFactory};

pub use driver::{MemoryBackend, MemoryDriver};

/// Memory driver parameters / 内存驱动配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Smallest chunk accepted by `write_chunk`
    #[serde(default = "default_minimum_buffer_size")]
    pub minimum_buffer_size: usize,
    #[serde(default)]
    pub default_blob_kind: BlobKind,
}

fn default_minimum_buffer_size() -> usize {
    1
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            minimum_buffer_size: default_minimum_buffer_size(),
            default_blob_kind: BlobKind::default(),
        }
    }
}

/// Memory driver factory / 内存驱动工厂
pub struct MemoryDriverFactory {
    backend: Arc<MemoryBackend>,
}

impl MemoryDriverFactory {
    pub fn new() -> Self {
        Self { backend: Arc::new(MemoryBackend::default()) }
    }
}

impl Default for MemoryDriverFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl DriverFactory for MemoryDriverFactory {
    fn driver_type(&self) -> &'static str {
        "mem"
    }

    fn create_driver(&self, config: &DriverConfig) -> Result<DriverBox> {
        let config: MemoryConfig = config.parse()?;
        Ok(Arc::new(MemoryDriver::new(self.backend.clone(), config)))
    }
}
