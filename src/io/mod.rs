//! Object streams / 对象流
//!
//! [`RawStream`] issues one driver call per operation, [`BufferedStream`]
//! splits transfers into fixed-size chunks run on a bounded worker pool.
//! Both implement [`ObjectIo`].

use std::io::SeekFrom;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::storage::{BlobKind, DriverConfig};

pub mod base;
pub mod buffered;
pub mod pool;
pub mod raw;

pub use base::{Memoized, ObjectTarget, OpenMode, StreamBase};
pub use buffered::{BufferedOptions, BufferedStream};
pub use pool::WorkerPool;
pub use raw::RawStream;

/// Boxed stream returned by [`Registry::open`](crate::storage::Registry::open)
pub type ObjectStream = Box<dyn ObjectIo>;

/// File-like stream over a stored object / 对象流接口
#[async_trait]
pub trait ObjectIo: Send {
    fn base(&self) -> &StreamBase;

    fn name(&self) -> &str {
        self.base().name()
    }

    fn mode(&self) -> OpenMode {
        self.base().mode()
    }

    fn readable(&self) -> bool {
        self.base().readable()
    }

    fn writable(&self) -> bool {
        self.base().writable()
    }

    fn seekable(&self) -> bool {
        self.base().seekable()
    }

    fn closed(&self) -> bool {
        self.base().closed()
    }

    fn tell(&self) -> Result<u64> {
        self.base().tell()
    }

    /// Up to `size` bytes, or everything to the end of the object
    async fn read(&mut self, size: Option<usize>) -> Result<Bytes>;

    /// Fill `buf` from the current position; fewer bytes near the end, 0 at EOF
    async fn readinto(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Bytes at the current position without moving it
    async fn peek(&mut self, size: usize) -> Result<Bytes>;

    async fn write(&mut self, data: &[u8]) -> Result<usize>;

    async fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    async fn flush(&mut self) -> Result<()>;

    /// Flush pending data and release the stream; calling it again is a no-op
    async fn close(&mut self) -> Result<()>;
}

/// Stream implementation to open / 流类型
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamKind {
    Raw,
    #[default]
    Buffered,
}

/// Options of [`Registry::open`](crate::storage::Registry::open) / 打开选项
///
/// Unset engine settings fall back to the registry's
/// [`EngineConfig`](crate::config::EngineConfig).
#[derive(Debug, Clone)]
pub struct OpenOptions {
    pub mode: String,
    pub kind: StreamKind,
    pub buffer_size: Option<usize>,
    pub max_buffers: Option<usize>,
    pub max_workers: Option<usize>,
    pub blob_kind: Option<BlobKind>,
    /// Per-call driver configuration, merged over the mounted one
    pub config: Option<DriverConfig>,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self::new("rb")
    }
}

impl OpenOptions {
    pub fn new(mode: impl Into<String>) -> Self {
        Self {
            mode: mode.into(),
            kind: StreamKind::default(),
            buffer_size: None,
            max_buffers: None,
            max_workers: None,
            blob_kind: None,
            config: None,
        }
    }

    pub fn read() -> Self {
        Self::new("rb")
    }

    pub fn write() -> Self {
        Self::new("wb")
    }

    pub fn append() -> Self {
        Self::new("ab")
    }

    pub fn raw(mut self) -> Self {
        self.kind = StreamKind::Raw;
        self
    }

    pub fn buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }

    pub fn max_buffers(mut self, count: usize) -> Self {
        self.max_buffers = Some(count);
        self
    }

    pub fn max_workers(mut self, count: usize) -> Self {
        self.max_workers = Some(count);
        self
    }

    pub fn blob_kind(mut self, kind: BlobKind) -> Self {
        self.blob_kind = Some(kind);
        self
    }

    pub fn config(mut self, config: DriverConfig) -> Self {
        self.config = Some(config);
        self
    }
}
