// Driver package / 驱动包
pub mod http;
pub mod local;
pub mod memory;
pub mod s3;

use std::sync::Arc;

use crate::storage::Registry;

/// Register all bundled drivers / 注册所有驱动
pub fn register_all(registry: &Registry) {
    // In-process object store / 内存驱动
    registry.register_factory(Arc::new(memory::MemoryDriverFactory::new()));
    // Local filesystem / 本地驱动
    registry.register_factory(Arc::new(local::LocalDriverFactory));
    // S3 compatible object storage / S3对象存储驱动
    registry.register_factory(Arc::new(s3::S3DriverFactory));
    // Read-only HTTP(S) / HTTP只读驱动
    registry.register_factory(Arc::new(http::HttpDriverFactory));
}
