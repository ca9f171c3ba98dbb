//! S3驱动工厂

use std::sync::Arc;

use super::config::S3Config;
use super::driver::S3Driver;
use crate::error::Result;
use crate::storage::{DriverBox, DriverConfig, DriverFactory};

/// S3驱动工厂
pub struct S3DriverFactory;

impl DriverFactory for S3DriverFactory {
    fn driver_type(&self) -> &'static str {
        "s3"
    }

    fn create_driver(&self, config: &DriverConfig) -> Result<DriverBox> {
        let s3_config: S3Config = config.parse()?;
        Ok(Arc::new(S3Driver::new(s3_config, config.is_unsecure())?))
    }
}
