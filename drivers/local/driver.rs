use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};

use crate::error::{Error, Result};
use crate::storage::{BlobKind, Capability, ChunkToken, ListStream, ObjectMeta, Root, StorageDriver};

/// Suffix of the directory holding the chunks of an unfinished upload
const PARTS_SUFFIX: &str = ".blobstream-parts";

pub struct LocalDriver {
    root: PathBuf,
}

impl LocalDriver {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// Get root directory / 获取根目录
    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Normalize path to prevent directory traversal / 规范化路径
    fn normalize_path(&self, path: &str) -> Result<PathBuf> {
        let path = path.trim_start_matches('/').replace('\\', "/");

        let normalized: Vec<&str> = path.split('/').filter(|s| !s.is_empty() && *s != ".").collect();
        if normalized.iter().any(|component| *component == "..") {
            return Err(Error::PermissionDenied(format!("{} leaves the root directory", path)));
        }

        Ok(self.root.join(normalized.join("/")))
    }

    fn parts_dir(full_path: &Path) -> PathBuf {
        let mut name = full_path.as_os_str().to_os_string();
        name.push(PARTS_SUFFIX);
        PathBuf::from(name)
    }
}

/// Map an I/O error of `path` onto the library error kinds
fn fs_error(path: &str, error: io::Error) -> Error {
    match error.kind() {
        io::ErrorKind::NotFound => Error::not_found(path),
        io::ErrorKind::PermissionDenied => Error::PermissionDenied(path.to_string()),
        _ => Error::Transfer(anyhow!(error).context(format!("local I/O on {}", path))),
    }
}

/// Run blocking filesystem work off the runtime / 使用同步IO
async fn blocking<T, F>(path: &str, work: F) -> Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Transfer(anyhow!("blocking task failed: {}", e)))?
        .map_err(|e| fs_error(path, e))
}

fn meta_of(metadata: &std::fs::Metadata) -> ObjectMeta {
    let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
    ObjectMeta {
        size: if metadata.is_dir() { 0 } else { metadata.len() },
        modified,
        is_dir: metadata.is_dir(),
        ..Default::default()
    }
}

/// Walk `dir` recursively, names relative to `base`
fn walk(base: &Path, dir: &Path, out: &mut Vec<(String, ObjectMeta)>) -> io::Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<io::Result<_>>()?;
    entries.sort_by_key(|entry| entry.file_name());
    for entry in entries {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        if name.ends_with(PARTS_SUFFIX) {
            continue;
        }
        let metadata = entry.metadata()?;
        let relative = path
            .strip_prefix(base)
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or(name);
        if metadata.is_dir() {
            out.push((format!("{}/", relative), meta_of(&metadata)));
            walk(base, &path, out)?;
        } else {
            out.push((relative, meta_of(&metadata)));
        }
    }
    Ok(())
}

#[async_trait]
impl StorageDriver for LocalDriver {
    fn name(&self) -> &str {
        "file"
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
        vec![Root::prefix("file://")]
    }

    async fn head_object(&self, path: &str) -> Result<ObjectMeta> {
        let full_path = self.normalize_path(path)?;
        let expect_dir = path.ends_with('/');
        let metadata = blocking(path, move || std::fs::metadata(full_path)).await?;
        if expect_dir && !metadata.is_dir() {
            return Err(Error::not_found(path));
        }
        Ok(meta_of(&metadata))
    }

    async fn head_locator(&self, locator: &str) -> Result<ObjectMeta> {
        let meta = self.head_object(locator).await?;
        if !meta.is_dir {
            return Err(Error::not_found(locator));
        }
        Ok(meta)
    }

    async fn list_objects(&self, path: &str, max_entries: Option<usize>) -> Result<ListStream> {
        let full_path = self.normalize_path(path)?;
        let entries = blocking(path, move || {
            let mut out = Vec::new();
            walk(&full_path, &full_path, &mut out)?;
            Ok(out)
        })
        .await?;

        let limit = max_entries.unwrap_or(usize::MAX);
        Ok(stream::iter(entries.into_iter().map(Ok)).take(limit).boxed())
    }

    async fn read_range(&self, path: &str, start: u64, end: Option<u64>) -> Result<Bytes> {
        let full_path = self.normalize_path(path)?;
        let data = blocking(path, move || {
            let mut file = std::fs::File::open(&full_path)?;
            file.seek(SeekFrom::Start(start))?;
            let mut data = Vec::new();
            match end {
                Some(end) => {
                    file.take(end.saturating_sub(start)).read_to_end(&mut data)?;
                }
                None => {
                    file.read_to_end(&mut data)?;
                }
            }
            Ok(data)
        })
        .await?;
        Ok(Bytes::from(data))
    }

    async fn write_chunk(&self, path: &str, data: Bytes, sequence: u64) -> Result<ChunkToken> {
        let parts = Self::parts_dir(&self.normalize_path(path)?);
        let etag = hex::encode(md5::compute(&data).0);
        blocking(path, move || {
            std::fs::create_dir_all(&parts)?;
            std::fs::write(parts.join(sequence.to_string()), &data)
        })
        .await?;
        Ok(ChunkToken { sequence, etag })
    }

    async fn write_whole(&self, path: &str, data: Bytes, _kind: BlobKind) -> Result<()> {
        let full_path = self.normalize_path(path)?;
        blocking(path, move || {
            // Ensure parent directory exists / 确保父目录存在
            if let Some(parent) = full_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&full_path, &data)
        })
        .await
    }

    async fn commit(&self, path: &str, tokens: Vec<ChunkToken>, _kind: BlobKind) -> Result<()> {
        let full_path = self.normalize_path(path)?;
        let parts = Self::parts_dir(&full_path);
        blocking(path, move || {
            if let Some(parent) = full_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = std::fs::File::create(&full_path)?;
            for token in &tokens {
                let chunk = std::fs::read(parts.join(token.sequence.to_string()))?;
                file.write_all(&chunk)?;
            }
            file.sync_all()?;
            std::fs::remove_dir_all(&parts)
        })
        .await
    }

    async fn abort(&self, path: &str) -> Result<()> {
        let parts = Self::parts_dir(&self.normalize_path(path)?);
        blocking(path, move || match std::fs::remove_dir_all(&parts) {
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        })
        .await
    }

    async fn make_dir(&self, path: &str) -> Result<()> {
        let full_path = self.normalize_path(path)?;
        blocking(path, move || std::fs::create_dir_all(full_path)).await
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let full_path = self.normalize_path(path)?;
        blocking(path, move || {
            if full_path.is_dir() {
                std::fs::remove_dir_all(&full_path)
            } else {
                std::fs::remove_file(&full_path)
            }
        })
        .await
    }

    /// Server-side copy / 服务端复制
    async fn copy(&self, src: &str, dst: &str) -> Result<bool> {
        let src_full = self.normalize_path(src)?;
        let dst_full = self.normalize_path(dst)?;
        blocking(src, move || {
            if let Some(parent) = dst_full.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&src_full, &dst_full).map(|_| ())
        })
        .await?;
        Ok(true)
    }
}
