use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

pub mod manager;
pub mod path;

pub use manager::{DriverFactory, MountEntry, MountRequest, Registry, Resolved};
pub use path::{classify_path, PathKind, Root};

/// Shared driver handle / 驱动句柄
pub type DriverBox = Arc<dyn StorageDriver>;

/// Lazy listing result: `(relative name, metadata)` pairs / 列表结果流
pub type ListStream = BoxStream<'static, Result<(String, ObjectMeta)>>;

/// Driver configuration: provider parameters plus transport flags / 驱动配置
///
/// Two configurations are the same driver configuration when they compare
/// equal; the registry caches one driver instance per mounted configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Provider specific parameters (credentials, endpoint, ...) / 驱动参数
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Disable TLS where the provider allows it / 禁用TLS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unsecure: Option<bool>,
}

impl DriverConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parameter(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    pub fn unsecure(mut self, unsecure: bool) -> Self {
        self.unsecure = Some(unsecure);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty() && self.unsecure.is_none()
    }

    pub fn is_unsecure(&self) -> bool {
        self.unsecure.unwrap_or(false)
    }

    /// Merge `self` over `fallback`: keys set here always win, keys only
    /// present in `fallback` are copied over / 合并配置
    pub fn merged_over(&self, fallback: &DriverConfig) -> DriverConfig {
        let mut parameters = self.parameters.clone();
        for (key, value) in &fallback.parameters {
            parameters.entry(key.clone()).or_insert_with(|| value.clone());
        }
        DriverConfig {
            parameters,
            unsecure: self.unsecure.or(fallback.unsecure),
        }
    }

    /// Deserialize the parameters into a driver specific config struct
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.parameters.clone()))
            .map_err(|e| Error::Config(format!("invalid driver parameters: {}", e)))
    }
}

/// Object flavour for providers distinguishing blob types / 对象类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobKind {
    #[default]
    Block,
    Page,
    Append,
}

/// Pick the blob kind of a stream: explicit request first, then the kind of
/// the existing object, then the provider default.
pub fn select_blob_kind(
    explicit: Option<BlobKind>,
    existing: Option<&ObjectMeta>,
    provider_default: BlobKind,
) -> BlobKind {
    explicit
        .or_else(|| existing.and_then(|meta| meta.blob_kind))
        .unwrap_or(provider_default)
}

/// Object metadata returned by head/list / 对象元数据
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default)]
    pub is_dir: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_kind: Option<BlobKind>,
    /// Raw provider headers/properties / 原始属性
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl ObjectMeta {
    pub fn file(size: u64) -> Self {
        Self { size, ..Default::default() }
    }

    pub fn dir() -> Self {
        Self { is_dir: true, ..Default::default() }
    }
}

/// Completion token of one uploaded chunk / 分片上传凭证
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkToken {
    /// Submission order, starting at 0
    pub sequence: u64,
    /// Provider receipt (ETag, block id, ...)
    pub etag: String,
}

/// Driver capability declaration / 驱动能力声明
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capability {
    /// Support range reading / 支持范围读取
    pub can_range_read: bool,
    /// Support writing objects / 支持写入
    pub can_write: bool,
    /// Support chunked upload with commit / 支持分片上传
    pub can_multipart_upload: bool,
    /// Support server-side copy / 支持服务端复制
    pub can_server_side_copy: bool,
    /// Support listing / 支持列表
    pub can_list: bool,
}

/// Storage driver interface: the primitive operations every backend
/// provides. Paths are relative to the mount root (see [`path`]).
/// 存储驱动接口
#[async_trait]
pub trait StorageDriver: Send + Sync {
    /// Driver name / 驱动名称
    fn name(&self) -> &str;

    /// Driver capabilities / 驱动能力
    fn capabilities(&self) -> Capability;

    /// Canonical roots served by this driver / 驱动根路径
    fn roots(&self) -> Vec<Root>;

    /// Driver-relative path of `name` under `root`
    fn relpath(&self, root: &Root, name: &str) -> String {
        root.relpath(name)
    }

    /// Smallest chunk the provider accepts for chunked uploads
    fn minimum_buffer_size(&self) -> usize {
        1
    }

    fn default_blob_kind(&self) -> BlobKind {
        BlobKind::Block
    }

    /// Object metadata, `Error::NotFound` if absent / 获取对象元数据
    async fn head_object(&self, path: &str) -> Result<ObjectMeta>;

    /// Locator (bucket, container) metadata
    async fn head_locator(&self, locator: &str) -> Result<ObjectMeta> {
        let _ = locator;
        Err(Error::unsupported("head locator"))
    }

    /// Objects under the prefix `path` (whole tree), names relative to it.
    /// Directories end with `/`. `NotFound` if the locator does not exist
    /// 列出对象
    async fn list_objects(&self, path: &str, max_entries: Option<usize>) -> Result<ListStream> {
        let _ = (path, max_entries);
        Err(Error::unsupported("list"))
    }

    /// Bytes in `[start, end)`; a range past the end yields fewer bytes and
    /// an empty buffer at end of object / 范围读取
    async fn read_range(&self, path: &str, start: u64, end: Option<u64>) -> Result<Bytes>;

    /// Whole object content / 读取完整对象
    async fn read_all(&self, path: &str) -> Result<Bytes> {
        self.read_range(path, 0, None).await
    }

    /// Upload one chunk of a multi-part object / 上传分片
    async fn write_chunk(&self, path: &str, data: Bytes, sequence: u64) -> Result<ChunkToken> {
        let _ = (path, data, sequence);
        Err(Error::unsupported("multipart upload"))
    }

    /// Single shot upload / 整体上传
    async fn write_whole(&self, path: &str, data: Bytes, kind: BlobKind) -> Result<()> {
        let _ = (path, data, kind);
        Err(Error::unsupported("write"))
    }

    /// Assemble uploaded chunks in the order of `tokens` / 完成分片上传
    async fn commit(&self, path: &str, tokens: Vec<ChunkToken>, kind: BlobKind) -> Result<()> {
        let _ = (path, tokens, kind);
        Err(Error::unsupported("multipart upload"))
    }

    /// Discard uploaded chunks after a failed transfer / 取消分片上传
    async fn abort(&self, path: &str) -> Result<()> {
        let _ = path;
        Ok(())
    }

    /// Create a directory marker / 创建目录
    async fn make_dir(&self, path: &str) -> Result<()> {
        let _ = path;
        Err(Error::unsupported("mkdir"))
    }

    /// Remove an object / 删除对象
    async fn remove(&self, path: &str) -> Result<()> {
        let _ = path;
        Err(Error::unsupported("remove"))
    }

    /// Server-side copy; `Ok(false)` lets the caller fall back to streaming
    /// 服务端复制
    async fn copy(&self, src: &str, dst: &str) -> Result<bool> {
        let _ = (src, dst);
        Ok(false)
    }
}
