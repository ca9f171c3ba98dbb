//! Instrumented in-memory driver for engine tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use blobstream::error::{Error, Result};
use blobstream::storage::{
    BlobKind, Capability, ChunkToken, DriverBox, DriverConfig, DriverFactory, ObjectMeta, Root,
    StorageDriver,
};

#[derive(Default)]
pub struct MockDriver {
    pub objects: Mutex<HashMap<String, Bytes>>,
    pub staged: Mutex<HashMap<u64, Bytes>>,

    pub minimum_buffer_size: usize,
    pub range_read: bool,
    pub server_side_copy: bool,
    /// Delay of every chunk upload
    pub chunk_delay: Duration,
    /// Chunk `s` of `n` sleeps `(n - s) * chunk_delay`, so chunks finish in reverse
    pub reverse_of: Option<u64>,
    pub fail_sequence: Option<u64>,
    /// Tokens carry ids counting down from `u64::MAX` instead of the sequence
    pub descending_token_ids: bool,
    /// Range reads starting at this offset fail
    pub fail_read_at: Option<u64>,

    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub chunk_calls: AtomicUsize,
    pub whole_writes: AtomicUsize,
    pub range_reads: AtomicUsize,
    pub aborts: AtomicUsize,
    pub copies: AtomicUsize,
    pub completion_order: Mutex<Vec<u64>>,
    /// Sequences passed to each commit
    pub commits: Mutex<Vec<Vec<u64>>>,
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            minimum_buffer_size: 1,
            range_read: true,
            server_side_copy: true,
            ..Default::default()
        }
    }

    pub fn with_object(self, path: &str, data: impl Into<Bytes>) -> Self {
        self.objects.lock().insert(path.to_string(), data.into());
        self
    }

    pub fn object(&self, path: &str) -> Option<Bytes> {
        self.objects.lock().get(path).cloned()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageDriver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    fn capabilities(&self) -> Capability {
        Capability {
            can_range_read: self.range_read,
            can_write: true,
            can_multipart_upload: true,
            can_server_side_copy: self.server_side_copy,
            can_list: false,
        }
    }

    fn roots(&self) -> Vec<Root> {
        vec![Root::prefix("mock://")]
    }

    fn minimum_buffer_size(&self) -> usize {
        self.minimum_buffer_size
    }

    async fn head_object(&self, path: &str) -> Result<ObjectMeta> {
        self.object(path)
            .map(|data| ObjectMeta::file(data.len() as u64))
            .ok_or_else(|| Error::not_found(path))
    }

    async fn read_range(&self, path: &str, start: u64, end: Option<u64>) -> Result<Bytes> {
        self.range_reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_read_at == Some(start) {
            return Err(Error::Transfer(anyhow!("injected failure reading {} at {}", path, start)));
        }
        let data = self.object(path).ok_or_else(|| Error::not_found(path))?;
        let len = data.len() as u64;
        let start = start.min(len);
        let end = end.unwrap_or(len).clamp(start, len);
        Ok(data.slice(start as usize..end as usize))
    }

    async fn write_chunk(&self, _path: &str, data: Bytes, sequence: u64) -> Result<ChunkToken> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.chunk_calls.fetch_add(1, Ordering::SeqCst);

        let delay = match self.reverse_of {
            Some(total) => self.chunk_delay * total.saturating_sub(sequence) as u32,
            None => self.chunk_delay,
        };
        tokio::time::sleep(delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.fail_sequence == Some(sequence) {
            return Err(Error::Transfer(anyhow!("injected failure on chunk {}", sequence)));
        }
        self.completion_order.lock().push(sequence);
        let id = if self.descending_token_ids { u64::MAX - sequence } else { sequence };
        self.staged.lock().insert(id, data);
        Ok(ChunkToken { sequence: id, etag: format!("etag-{}", sequence) })
    }

    async fn write_whole(&self, path: &str, data: Bytes, _kind: BlobKind) -> Result<()> {
        self.whole_writes.fetch_add(1, Ordering::SeqCst);
        self.objects.lock().insert(path.to_string(), data);
        Ok(())
    }

    async fn commit(&self, path: &str, tokens: Vec<ChunkToken>, _kind: BlobKind) -> Result<()> {
        self.commits
            .lock()
            .push(tokens.iter().map(|token| token.sequence).collect());
        let staged = std::mem::take(&mut *self.staged.lock());
        let mut data = BytesMut::new();
        for token in &tokens {
            let chunk = staged
                .get(&token.sequence)
                .ok_or_else(|| Error::Transfer(anyhow!("missing chunk {}", token.sequence)))?;
            data.extend_from_slice(chunk);
        }
        self.objects.lock().insert(path.to_string(), data.freeze());
        Ok(())
    }

    async fn abort(&self, _path: &str) -> Result<()> {
        self.aborts.fetch_add(1, Ordering::SeqCst);
        self.staged.lock().clear();
        Ok(())
    }

    async fn copy(&self, src: &str, dst: &str) -> Result<bool> {
        if !self.server_side_copy {
            return Ok(false);
        }
        self.copies.fetch_add(1, Ordering::SeqCst);
        let data = self.object(src).ok_or_else(|| Error::not_found(src))?;
        self.objects.lock().insert(dst.to_string(), data);
        Ok(true)
    }
}

/// Factory handing out one shared mock instance
pub struct MockFactory(pub Arc<MockDriver>);

impl DriverFactory for MockFactory {
    fn driver_type(&self) -> &'static str {
        "mock"
    }

    fn create_driver(&self, _config: &DriverConfig) -> Result<DriverBox> {
        Ok(self.0.clone())
    }
}

/// Deterministic test payload
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
