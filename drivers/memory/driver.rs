use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use parking_lot::{Mutex, RwLock};

use super::MemoryConfig;
use crate::error::{Error, Result};
use crate::storage::path::{is_locator, split_locator};
use crate::storage::{BlobKind, Capability, ChunkToken, ListStream, ObjectMeta, Root, StorageDriver};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    modified: DateTime<Utc>,
    kind: BlobKind,
}

impl StoredObject {
    fn meta(&self) -> ObjectMeta {
        ObjectMeta {
            size: self.data.len() as u64,
            modified: Some(self.modified),
            etag: Some(etag(&self.data)),
            is_dir: false,
            blob_kind: Some(self.kind),
            properties: BTreeMap::new(),
        }
    }
}

fn etag(data: &[u8]) -> String {
    hex::encode(md5::compute(data).0)
}

/// Objects keyed by `locator/key`, plus the chunks staged by unfinished uploads
#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    locators: RwLock<BTreeSet<String>>,
    staged: Mutex<HashMap<String, BTreeMap<u64, Bytes>>>,
}

impl MemoryBackend {
    fn put(&self, path: &str, data: Bytes, kind: BlobKind) {
        let (locator, _) = split_locator(path);
        self.locators.write().insert(locator.to_string());
        self.objects.write().insert(
            path.to_string(),
            StoredObject { data, modified: Utc::now(), kind },
        );
    }

    fn get(&self, path: &str) -> Result<StoredObject> {
        self.objects
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| Error::not_found(path))
    }
}

/// Memory driver / 内存驱动
pub struct MemoryDriver {
    backend: Arc<MemoryBackend>,
    config: MemoryConfig,
}

impl MemoryDriver {
    pub fn new(backend: Arc<MemoryBackend>, config: MemoryConfig) -> Self {
        Self { backend, config }
    }
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    fn name(&self) -> &str {
        "mem"
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
        vec![Root::prefix("mem://")]
    }

    fn minimum_buffer_size(&self) -> usize {
        self.config.minimum_buffer_size
    }

    fn default_blob_kind(&self) -> BlobKind {
        self.config.default_blob_kind
    }

    async fn head_object(&self, path: &str) -> Result<ObjectMeta> {
        let mut meta = self.backend.get(path)?.meta();
        // directory markers are empty objects named `prefix/`
        meta.is_dir = path.ends_with('/');
        Ok(meta)
    }

    async fn head_locator(&self, locator: &str) -> Result<ObjectMeta> {
        let locator = locator.trim_end_matches('/');
        if self.backend.locators.read().contains(locator) {
            Ok(ObjectMeta::dir())
        } else {
            Err(Error::not_found(locator))
        }
    }

    async fn list_objects(&self, path: &str, max_entries: Option<usize>) -> Result<ListStream> {
        let entries: Vec<Result<(String, ObjectMeta)>> = if path.is_empty() {
            self.backend
                .locators
                .read()
                .iter()
                .map(|locator| Ok((format!("{}/", locator), ObjectMeta::dir())))
                .collect()
        } else {
            let (locator, _) = split_locator(path);
            if !self.backend.locators.read().contains(locator) {
                return Err(Error::not_found(locator));
            }
            let prefix = if is_locator(path) {
                format!("{}/", locator)
            } else {
                path.to_string()
            };
            let objects = self.backend.objects.read();
            let entries: Vec<_> = objects
                .range(prefix.clone()..)
                .take_while(|(name, _)| name.starts_with(&prefix))
                .filter(|(name, _)| name.len() > prefix.len())
                .map(|(name, object)| {
                    let relative = name[prefix.len()..].to_string();
                    let meta = if relative.ends_with('/') {
                        ObjectMeta::dir()
                    } else {
                        object.meta()
                    };
                    Ok((relative, meta))
                })
                .collect();
            // an empty directory still has its marker
            if entries.is_empty() && !is_locator(path) && !objects.contains_key(&prefix) {
                return Err(Error::not_found(path));
            }
            entries
        };

        let limit = max_entries.unwrap_or(usize::MAX);
        Ok(stream::iter(entries).take(limit).boxed())
    }

    async fn read_range(&self, path: &str, start: u64, end: Option<u64>) -> Result<Bytes> {
        let data = self.backend.get(path)?.data;
        let len = data.len() as u64;
        let start = start.min(len);
        let end = end.unwrap_or(len).clamp(start, len);
        Ok(data.slice(start as usize..end as usize))
    }

    async fn write_chunk(&self, path: &str, data: Bytes, sequence: u64) -> Result<ChunkToken> {
        let token = ChunkToken { sequence, etag: etag(&data) };
        self.backend
            .staged
            .lock()
            .entry(path.to_string())
            .or_default()
            .insert(sequence, data);
        Ok(token)
    }

    async fn write_whole(&self, path: &str, data: Bytes, kind: BlobKind) -> Result<()> {
        self.backend.put(path, data, kind);
        Ok(())
    }

    async fn commit(&self, path: &str, tokens: Vec<ChunkToken>, kind: BlobKind) -> Result<()> {
        let staged = self
            .backend
            .staged
            .lock()
            .remove(path)
            .ok_or_else(|| Error::Transfer(anyhow!("no upload in progress for {}", path)))?;

        let mut data = BytesMut::new();
        for token in &tokens {
            let chunk = staged.get(&token.sequence).ok_or_else(|| {
                Error::Transfer(anyhow!("chunk {} of {} was never uploaded", token.sequence, path))
            })?;
            if etag(chunk) != token.etag {
                return Err(Error::Transfer(anyhow!(
                    "chunk {} of {} does not match its token",
                    token.sequence,
                    path
                )));
            }
            data.extend_from_slice(chunk);
        }
        self.backend.put(path, data.freeze(), kind);
        Ok(())
    }

    async fn abort(&self, path: &str) -> Result<()> {
        self.backend.staged.lock().remove(path);
        Ok(())
    }

    async fn make_dir(&self, path: &str) -> Result<()> {
        let (locator, _) = split_locator(path);
        self.backend.locators.write().insert(locator.to_string());
        if !is_locator(path) {
            self.backend.put(path, Bytes::new(), BlobKind::Block);
        }
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.backend
            .objects
            .write()
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| Error::not_found(path))
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<bool> {
        let object = self.backend.get(src)?;
        self.backend.put(dst, object.data, object.kind);
        Ok(true)
    }
}
