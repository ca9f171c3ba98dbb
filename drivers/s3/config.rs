//! S3驱动配置

use serde::{Deserialize, Serialize};

/// S3 minimum multipart part size (5 MiB) / S3最小分片
pub const MINIMUM_PART_SIZE: usize = 5 * 1024 * 1024;

/// S3配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    /// S3端点地址
    /// AWS: https://s3.{region}.amazonaws.com (empty = AWS)
    /// MinIO: http://localhost:9000
    #[serde(default)]
    pub endpoint: String,
    /// 区域
    #[serde(default = "default_region")]
    pub region: String,
    /// Access Key ID
    #[serde(default)]
    pub access_key_id: String,
    /// Secret Access Key
    #[serde(default)]
    pub secret_access_key: String,
    /// Session Token（用于临时凭证）
    #[serde(default)]
    pub session_token: String,
    /// 强制使用路径风格（而非虚拟主机风格）
    /// MinIO等需要设置为true
    #[serde(default)]
    pub force_path_style: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            region: default_region(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            session_token: String::new(),
            force_path_style: false,
        }
    }
}

impl S3Config {
    /// Endpoint URL; AWS regional endpoint when none is configured
    pub fn endpoint_url(&self, unsecure: bool) -> String {
        let scheme = if unsecure { "http" } else { "https" };
        if self.endpoint.is_empty() {
            format!("{}://s3.{}.amazonaws.com", scheme, self.region)
        } else if self.endpoint.contains("://") {
            self.endpoint.clone()
        } else {
            format!("{}://{}", scheme, self.endpoint)
        }
    }
}
