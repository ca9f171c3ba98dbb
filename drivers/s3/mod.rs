//! S3 compatible object storage / S3对象存储驱动
//!
//! Serves `s3://bucket/key`. Chunked writes become multipart uploads with
//! part number `sequence + 1`.

mod config;
mod driver;
mod factory;

pub use config::{S3Config, MINIMUM_PART_SIZE};
pub use driver::S3Driver;
pub use factory::S3DriverFactory;
