//! Unbuffered object stream: one driver call per read, whole-object upload on flush
//! 原始对象流

use std::io::SeekFrom;

use async_trait::async_trait;
use bytes::Bytes;

use super::base::{ObjectTarget, OpenMode, StreamBase};
use super::ObjectIo;
use crate::error::{Error, Result};
use crate::storage::{select_blob_kind, BlobKind};

pub struct RawStream {
    base: StreamBase,
    target: ObjectTarget,
    blob_kind: BlobKind,
    /// Whole object content in write mode
    buffer: Vec<u8>,
    dirty: bool,
}

impl RawStream {
    /// Open `target`. Read mode checks the object exists; append mode loads
    /// its current content.
    pub async fn open(target: ObjectTarget, mode: OpenMode, blob_kind: Option<BlobKind>) -> Result<Self> {
        let provider_default = target.driver.default_blob_kind();
        let mut buffer = Vec::new();
        let (seekable, kind) = match mode {
            OpenMode::Read => {
                let meta = target.meta().await?;
                (
                    target.driver.capabilities().can_range_read,
                    select_blob_kind(blob_kind, Some(&meta), provider_default),
                )
            }
            OpenMode::Write => (true, select_blob_kind(blob_kind, None, provider_default)),
            OpenMode::Append => {
                let meta = match target.meta().await {
                    Ok(meta) => Some(meta),
                    Err(e) if e.is_not_found() => None,
                    Err(e) => return Err(e),
                };
                if meta.is_some() {
                    buffer = target.driver.read_all(&target.path).await?.to_vec();
                }
                (true, select_blob_kind(blob_kind, meta.as_ref(), provider_default))
            }
        };

        let base = StreamBase::new(target.name.clone(), mode, seekable);
        base.set_position(buffer.len() as u64);
        Ok(Self {
            base,
            target,
            blob_kind: kind,
            buffer,
            // a fresh writer truncates the object even if nothing is written
            dirty: mode == OpenMode::Write,
        })
    }

    pub fn blob_kind(&self) -> BlobKind {
        self.blob_kind
    }
}

#[async_trait]
impl ObjectIo for RawStream {
    fn base(&self) -> &StreamBase {
        &self.base
    }

    async fn read(&mut self, size: Option<usize>) -> Result<Bytes> {
        self.base.ensure_readable()?;
        let position = self.base.position();
        let data = match size {
            Some(0) => Bytes::new(),
            Some(n) => {
                self.target
                    .raw_read_range(position, Some(position.saturating_add(n as u64)))
                    .await?
            }
            None if position == 0 => self.target.driver.read_all(&self.target.path).await?,
            None => self.target.raw_read_range(position, None).await?,
        };
        self.base.advance(data.len());
        Ok(data)
    }

    async fn readinto(&mut self, buf: &mut [u8]) -> Result<usize> {
        let data = self.read(Some(buf.len())).await?;
        let count = data.len().min(buf.len());
        buf[..count].copy_from_slice(&data[..count]);
        Ok(count)
    }

    async fn peek(&mut self, size: usize) -> Result<Bytes> {
        self.base.ensure_readable()?;
        let position = self.base.position();
        self.target
            .raw_read_range(position, Some(position.saturating_add(size as u64)))
            .await
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.base.ensure_writable()?;
        let position = self.base.position();
        let end = usize::try_from(position)
            .ok()
            .and_then(|start| start.checked_add(data.len()))
            .filter(|end| *end <= isize::MAX as usize)
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "write of {} bytes at {} exceeds the addressable size of {}",
                    data.len(),
                    position,
                    self.base.name()
                ))
            })?;
        let start = end - data.len();
        if self.buffer.len() < end {
            self.buffer.resize(end, 0);
        }
        self.buffer[start..end].copy_from_slice(data);
        self.base.advance(data.len());
        self.dirty = true;
        Ok(data.len())
    }

    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.base.ensure_open()?;
        if !self.base.seekable() {
            return Err(Error::unsupported(format!("seek on {}", self.base.name())));
        }
        let size = match pos {
            SeekFrom::End(_) if self.base.writable() => self.buffer.len() as u64,
            SeekFrom::End(_) => self.target.size().await?,
            _ => 0,
        };
        let position = self.base.seek_target(pos, size)?;
        self.base.set_position(position);
        Ok(position)
    }

    async fn flush(&mut self) -> Result<()> {
        self.base.ensure_open()?;
        if self.base.writable() && self.dirty {
            tracing::debug!("Uploading {} ({} bytes)", self.base.name(), self.buffer.len());
            self.target
                .driver
                .write_whole(&self.target.path, Bytes::copy_from_slice(&self.buffer), self.blob_kind)
                .await?;
            self.dirty = false;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.base.closed() {
            return Ok(());
        }
        let flushed = self.flush().await;
        self.base.mark_closed();
        self.buffer = Vec::new();
        flushed
    }
}

impl Drop for RawStream {
    fn drop(&mut self) {
        if self.dirty && !self.base.closed() {
            tracing::error!(
                "{} dropped without close, {} buffered bytes were not uploaded",
                self.base.name(),
                self.buffer.len()
            );
        }
    }
}
