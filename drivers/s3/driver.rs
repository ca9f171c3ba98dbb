//! S3驱动核心实现
//!
//! - 路径格式: `bucket/key`，Bucket客户端按需创建并缓存
//! - 分片上传: write_chunk → put_multipart_chunk，commit → complete_multipart_upload
//! - 状态码手动检查（未启用 fail-on-err）

use std::collections::{BTreeMap, HashMap};

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::serde_types::Part;
use s3::Region;

use super::config::{S3Config, MINIMUM_PART_SIZE};
use crate::error::{Error, Result};
use crate::storage::path::split_locator;
use crate::storage::{BlobKind, Capability, ChunkToken, ListStream, ObjectMeta, Root, StorageDriver};

const CONTENT_TYPE: &str = "application/octet-stream";

/// S3驱动
pub struct S3Driver {
    config: S3Config,
    region: Region,
    credentials: Credentials,
    buckets: Mutex<HashMap<String, Box<Bucket>>>,
    /// Object path -> multipart upload id
    uploads: tokio::sync::Mutex<HashMap<String, String>>,
}

impl S3Driver {
    /// 创建新的S3驱动实例
    pub fn new(config: S3Config, unsecure: bool) -> Result<Self> {
        let credentials = if config.access_key_id.is_empty() {
            Credentials::anonymous()
        } else {
            Credentials::new(
                Some(&config.access_key_id),
                Some(&config.secret_access_key),
                if config.session_token.is_empty() { None } else { Some(&config.session_token) },
                None,
                None,
            )
        }
        .map_err(|e| anyhow!("创建S3凭证失败: {}", e))?;

        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.endpoint_url(unsecure),
        };

        Ok(Self {
            config,
            region,
            credentials,
            buckets: Mutex::new(HashMap::new()),
            uploads: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Bucket客户端（缓存）
    fn bucket(&self, name: &str) -> Result<Box<Bucket>> {
        let mut buckets = self.buckets.lock();
        if let Some(bucket) = buckets.get(name) {
            return Ok(bucket.clone());
        }
        let bucket = Bucket::new(name, self.region.clone(), self.credentials.clone())
            .map_err(|e| anyhow!("创建S3 Bucket失败: {}", e))?;
        let bucket = if self.config.force_path_style {
            bucket.with_path_style()
        } else {
            bucket
        };
        buckets.insert(name.to_string(), bucket.clone());
        Ok(bucket)
    }

    /// Bucket client and object key of a driver path
    fn locate<'a>(&self, path: &'a str) -> Result<(Box<Bucket>, &'a str)> {
        let (bucket, key) = split_locator(path);
        if bucket.is_empty() || key.is_empty() {
            return Err(Error::InvalidArgument(format!("{:?} is not a bucket/key path", path)));
        }
        Ok((self.bucket(bucket)?, key))
    }

    /// Multipart upload id of `path`, initiating the upload on first use
    async fn upload_id(&self, bucket: &Bucket, path: &str, key: &str) -> Result<String> {
        let mut uploads = self.uploads.lock().await;
        if let Some(upload_id) = uploads.get(path) {
            return Ok(upload_id.clone());
        }
        let response = bucket
            .initiate_multipart_upload(key, CONTENT_TYPE)
            .await
            .map_err(|e| anyhow!("初始化分片上传失败: {}", e))?;
        tracing::debug!("S3分片上传开始: key={}, upload_id={}", key, response.upload_id);
        uploads.insert(path.to_string(), response.upload_id.clone());
        Ok(response.upload_id)
    }
}

fn check_status(status: u16, path: &str, action: &str) -> Result<()> {
    match status {
        200..=299 => Ok(()),
        404 => Err(Error::not_found(path)),
        401 | 403 => Err(Error::PermissionDenied(path.to_string())),
        _ => Err(Error::Transfer(anyhow!("S3 {} {} failed: HTTP {}", action, path, status))),
    }
}

/// List results carry RFC 3339 dates, HEAD responses HTTP dates
fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_rfc2822(value))
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

#[async_trait]
impl StorageDriver for S3Driver {
    fn name(&self) -> &str {
        "s3"
    }

    fn capabilities(&self) -> Capability {
        Capability {
            can_range_read: true,
            can_write: true,
            can_multipart_upload: true,
            can_server_side_copy: true,
            can_list: true,
        }
    }

    fn roots(&self) -> Vec<Root> {
        vec![Root::prefix("s3://")]
    }

    fn minimum_buffer_size(&self) -> usize {
        MINIMUM_PART_SIZE
    }

    async fn head_object(&self, path: &str) -> Result<ObjectMeta> {
        let (bucket, key) = self.locate(path)?;
        let (head, status) = bucket
            .head_object(key)
            .await
            .map_err(|e| anyhow!("获取S3对象信息失败: {}", e))?;
        check_status(status, path, "HEAD")?;

        let mut properties = BTreeMap::new();
        if let Some(content_type) = &head.content_type {
            properties.insert("content-type".to_string(), content_type.clone());
        }
        Ok(ObjectMeta {
            size: head.content_length.unwrap_or(0).max(0) as u64,
            modified: head.last_modified.as_deref().and_then(parse_date),
            etag: head.e_tag.clone(),
            is_dir: key.ends_with('/'),
            blob_kind: None,
            properties,
        })
    }

    async fn head_locator(&self, locator: &str) -> Result<ObjectMeta> {
        let name = locator.trim_end_matches('/');
        let exists = self
            .bucket(name)?
            .exists()
            .await
            .map_err(|e| anyhow!("检查S3存储桶失败: {}", e))?;
        if !exists {
            return Err(Error::not_found(name));
        }
        Ok(ObjectMeta::dir())
    }

    async fn list_objects(&self, path: &str, max_entries: Option<usize>) -> Result<ListStream> {
        let (bucket_name, prefix) = split_locator(path);
        if bucket_name.is_empty() {
            return Err(Error::unsupported("listing S3 buckets"));
        }
        let bucket = self.bucket(bucket_name)?;
        let results = bucket
            .list(prefix.to_string(), None)
            .await
            .map_err(|e| anyhow!("列出S3对象失败: {}", e))?;

        let mut entries = Vec::new();
        for result in results {
            for object in result.contents {
                let Some(name) = object.key.strip_prefix(prefix) else {
                    continue;
                };
                if name.is_empty() {
                    continue;
                }
                let meta = if name.ends_with('/') {
                    ObjectMeta::dir()
                } else {
                    ObjectMeta {
                        size: object.size as u64,
                        modified: parse_date(&object.last_modified),
                        etag: object.e_tag.clone(),
                        ..Default::default()
                    }
                };
                entries.push(Ok((name.to_string(), meta)));
            }
        }

        if entries.is_empty() && !prefix.is_empty() {
            return Err(Error::not_found(path));
        }
        let limit = max_entries.unwrap_or(usize::MAX);
        Ok(stream::iter(entries).take(limit).boxed())
    }

    async fn read_range(&self, path: &str, start: u64, end: Option<u64>) -> Result<Bytes> {
        if matches!(end, Some(end) if end <= start) {
            return Ok(Bytes::new());
        }
        let (bucket, key) = self.locate(path)?;
        // rust-s3 ranges are inclusive
        let response = bucket
            .get_object_range(key, start, end.map(|end| end - 1))
            .await
            .map_err(|e| anyhow!("获取S3对象失败: {}", e))?;
        if response.status_code() == 416 {
            return Ok(Bytes::new());
        }
        check_status(response.status_code(), path, "GET")?;
        Ok(Bytes::copy_from_slice(response.bytes()))
    }

    async fn read_all(&self, path: &str) -> Result<Bytes> {
        let (bucket, key) = self.locate(path)?;
        let response = bucket
            .get_object(key)
            .await
            .map_err(|e| anyhow!("获取S3对象失败: {}", e))?;
        check_status(response.status_code(), path, "GET")?;
        Ok(Bytes::copy_from_slice(response.bytes()))
    }

    async fn write_chunk(&self, path: &str, data: Bytes, sequence: u64) -> Result<ChunkToken> {
        let (bucket, key) = self.locate(path)?;
        let upload_id = self.upload_id(&bucket, path, key).await?;
        let part_number = (sequence + 1) as u32;

        tracing::debug!("S3上传分片: key={}, part={}, size={}", key, part_number, data.len());
        let part = bucket
            .put_multipart_chunk(data.to_vec(), key, part_number, &upload_id, CONTENT_TYPE)
            .await
            .map_err(|e| anyhow!("上传分片失败: part={}, error={}", part_number, e))?;

        Ok(ChunkToken { sequence, etag: part.etag })
    }

    async fn write_whole(&self, path: &str, data: Bytes, _kind: BlobKind) -> Result<()> {
        let (bucket, key) = self.locate(path)?;
        let response = bucket
            .put_object_with_content_type(key, &data, CONTENT_TYPE)
            .await
            .map_err(|e| anyhow!("上传S3对象失败: {}", e))?;
        check_status(response.status_code(), path, "PUT")
    }

    async fn commit(&self, path: &str, tokens: Vec<ChunkToken>, _kind: BlobKind) -> Result<()> {
        let (bucket, key) = self.locate(path)?;
        let upload_id = self
            .uploads
            .lock()
            .await
            .remove(path)
            .ok_or_else(|| Error::Transfer(anyhow!("no multipart upload in progress for {}", path)))?;

        let parts: Vec<Part> = tokens
            .into_iter()
            .map(|token| Part {
                part_number: (token.sequence + 1) as u32,
                etag: token.etag,
            })
            .collect();
        let response = bucket
            .complete_multipart_upload(key, &upload_id, parts)
            .await
            .map_err(|e| anyhow!("完成分片上传失败: {}", e))?;
        check_status(response.status_code(), path, "complete multipart upload")?;

        tracing::debug!("S3分片上传完成: key={}", key);
        Ok(())
    }

    async fn abort(&self, path: &str) -> Result<()> {
        let Some(upload_id) = self.uploads.lock().await.remove(path) else {
            return Ok(());
        };
        let (bucket, key) = self.locate(path)?;
        bucket
            .abort_upload(key, &upload_id)
            .await
            .map_err(|e| anyhow!("取消分片上传失败: {}", e))?;
        tracing::debug!("S3分片上传取消: key={}", key);
        Ok(())
    }

    async fn make_dir(&self, path: &str) -> Result<()> {
        let (bucket_name, key) = split_locator(path);
        if key.is_empty() {
            return Err(Error::unsupported(format!("creating bucket {}", bucket_name)));
        }
        let marker = format!("{}/", key.trim_end_matches('/'));
        let response = self
            .bucket(bucket_name)?
            .put_object(&marker, &[])
            .await
            .map_err(|e| anyhow!("创建S3目录失败: {}", e))?;
        check_status(response.status_code(), path, "PUT")
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let (bucket, key) = self.locate(path)?;
        let response = bucket
            .delete_object(key)
            .await
            .map_err(|e| anyhow!("删除S3对象失败: {}", e))?;
        check_status(response.status_code(), path, "DELETE")
    }

    /// S3 CopyObject，仅支持同一存储桶内复制
    async fn copy(&self, src: &str, dst: &str) -> Result<bool> {
        let (src_bucket, src_key) = split_locator(src);
        let (dst_bucket, dst_key) = split_locator(dst);
        if src_bucket != dst_bucket || src_key.is_empty() || dst_key.is_empty() {
            return Ok(false);
        }

        // copy_object_internal的from参数需要URL编码（中文等非ASCII字符）
        let encoded_src = urlencoding::encode(src_key);
        tracing::debug!("S3 CopyObject: src_key={}, dst_key={}", src_key, dst_key);
        let status = self
            .bucket(src_bucket)?
            .copy_object_internal(&encoded_src, dst_key)
            .await
            .map_err(|e| anyhow!("S3 CopyObject失败: {}", e))?;
        check_status(status, src, "CopyObject")?;
        Ok(true)
    }
}
