pub mod config;
pub mod error;
pub mod io;
pub mod ops;
pub mod storage;

// Driver modules (point to project root drivers via path attribute) / 驱动模块
#[path = "../drivers/mod.rs"]
pub mod drivers;

pub use config::{AppConfig, EngineConfig, MountConfig};
pub use error::{Error, Result};
pub use io::{BufferedStream, ObjectIo, ObjectStream, OpenMode, OpenOptions, RawStream, StreamKind};
pub use storage::{classify_path, DriverConfig, PathKind, Registry, Root, StorageDriver};

/// Registry with the bundled drivers registered and the configured storages mounted
/// 按配置创建注册表
pub fn registry_from_config(config: &AppConfig) -> Result<Registry> {
    let registry = Registry::with_default_drivers(config.engine.clone());
    registry.mount_all(&config.mounts)?;
    Ok(registry)
}
