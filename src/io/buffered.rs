//! Buffered object stream / 缓冲对象流
//!
//! Writes are cut into `buffer_size` chunks uploaded concurrently with
//! `write_chunk` and assembled by `commit`, ordered by sequence. At most
//! `max_buffers` chunks are in flight; `write` waits for one to finish once
//! the bound is reached. An object that fits in one chunk is uploaded with a
//! single `write_whole`.
//!
//! Reads are served from a window of `max_buffers` prefetched chunks aligned
//! on `buffer_size`. A fully consumed chunk is dropped and the chunk
//! `max_buffers` positions further is requested; a read or seek outside the
//! window re-centres it and aborts the chunks that fell out.

use std::collections::BTreeMap;
use std::io::SeekFrom;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::stream::{FuturesUnordered, StreamExt};

use super::base::{ObjectTarget, OpenMode, StreamBase};
use super::pool::{joined, Pending, WorkerPool};
use super::ObjectIo;
use crate::config::DEFAULT_BUFFER_SIZE;
use crate::error::{Error, Result};
use crate::storage::{select_blob_kind, BlobKind, ChunkToken};

/// Engine settings of one buffered stream / 缓冲参数
#[derive(Debug, Clone)]
pub struct BufferedOptions {
    pub buffer_size: usize,
    /// 0: unbounded when writing, whole object when reading
    pub max_buffers: usize,
    pub max_workers: Option<usize>,
    pub blob_kind: Option<BlobKind>,
}

impl Default for BufferedOptions {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_buffers: 0,
            max_workers: None,
            blob_kind: None,
        }
    }
}

/// Everything a chunk task needs
struct Transfer {
    target: ObjectTarget,
    pool: WorkerPool,
    buffer_size: usize,
    max_buffers: usize,
    blob_kind: BlobKind,
}

enum Slot {
    Pending(Pending<Bytes>),
    Ready(Bytes),
}

struct ReadState {
    size: u64,
    /// Chunk start offset -> chunk
    window: BTreeMap<u64, Slot>,
}

impl ReadState {
    fn submit(&mut self, transfer: &Transfer, start: u64) {
        let end = start.saturating_add(transfer.buffer_size as u64).min(self.size);
        let driver = transfer.target.driver.clone();
        let path = transfer.target.path.clone();
        tracing::debug!("Prefetching {} [{}, {})", transfer.target.name, start, end);
        let handle = transfer
            .pool
            .submit(async move { driver.read_range(&path, start, Some(end)).await });
        self.window.insert(start, Slot::Pending(handle));
    }

    /// Move the window to the chunk holding `position`
    fn recentre(&mut self, transfer: &Transfer, position: u64) {
        let chunk = transfer.buffer_size as u64;
        let first = position - position % chunk;
        let wanted: Vec<u64> = (0..transfer.max_buffers as u64)
            .map(|i| first + i * chunk)
            .take_while(|start| *start < self.size)
            .collect();

        self.window.retain(|start, slot| {
            let keep = wanted.contains(start);
            if !keep {
                if let Slot::Pending(handle) = slot {
                    handle.abort();
                }
            }
            keep
        });
        for start in wanted {
            if !self.window.contains_key(&start) {
                self.submit(transfer, start);
            }
        }
    }

    /// Wait for the chunk at `start`
    async fn chunk(&mut self, start: u64) -> Result<Bytes> {
        let slot = self
            .window
            .get_mut(&start)
            .ok_or_else(|| Error::Transfer(anyhow!("chunk at {} is not in the read window", start)))?;
        let result = match slot {
            Slot::Ready(data) => return Ok(data.clone()),
            Slot::Pending(handle) => joined(handle.await),
        };
        match result {
            Ok(data) => {
                *slot = Slot::Ready(data.clone());
                Ok(data)
            }
            Err(e) => {
                self.window.remove(&start);
                Err(e)
            }
        }
    }

    /// Slide the window past a fully consumed chunk
    fn consumed(&mut self, transfer: &Transfer, start: u64) {
        self.window.remove(&start);
        let span = (transfer.buffer_size as u64).saturating_mul(transfer.max_buffers as u64);
        let next = start.saturating_add(span);
        if next < self.size && !self.window.contains_key(&next) {
            self.submit(transfer, next);
        }
    }

    fn clear(&mut self) {
        for slot in self.window.values() {
            if let Slot::Pending(handle) = slot {
                handle.abort();
            }
        }
        self.window.clear();
    }
}

struct WriteState {
    buffer: BytesMut,
    /// Next chunk sequence; also the number of chunks submitted
    sequence: u64,
    pending: FuturesUnordered<Pending<(u64, ChunkToken)>>,
    /// Finished chunks keyed by the sequence assigned at submission
    tokens: Vec<(u64, ChunkToken)>,
    failed: bool,
}

impl WriteState {
    fn new(buffer_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(buffer_size),
            sequence: 0,
            pending: FuturesUnordered::new(),
            tokens: Vec::new(),
            failed: false,
        }
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.failed {
            return Err(Error::Transfer(anyhow!("a previous chunk upload of this stream failed")));
        }
        Ok(())
    }

    /// Freeze the accumulator into the next chunk and hand it to the pool
    async fn submit(&mut self, transfer: &Transfer) -> Result<()> {
        if transfer.max_buffers > 0 {
            while self.pending.len() >= transfer.max_buffers {
                self.complete_one(transfer).await?;
            }
        }

        let chunk = self.buffer.split().freeze();
        self.buffer.reserve(transfer.buffer_size);
        let sequence = self.sequence;
        self.sequence += 1;

        let driver = transfer.target.driver.clone();
        let path = transfer.target.path.clone();
        tracing::debug!(
            "Submitting chunk {} of {} ({} bytes)",
            sequence,
            transfer.target.name,
            chunk.len()
        );
        self.pending.push(
            transfer
                .pool
                .submit(async move {
                    let token = driver.write_chunk(&path, chunk, sequence).await?;
                    Ok((sequence, token))
                }),
        );
        Ok(())
    }

    /// Collect the next finished chunk, false when nothing is pending
    async fn complete_one(&mut self, transfer: &Transfer) -> Result<bool> {
        let Some(result) = self.pending.next().await else {
            return Ok(false);
        };
        match joined(result) {
            Ok(finished) => {
                self.tokens.push(finished);
                Ok(true)
            }
            Err(e) => {
                self.fail(transfer).await;
                Err(e)
            }
        }
    }

    async fn drain(&mut self, transfer: &Transfer) -> Result<()> {
        while self.complete_one(transfer).await? {}
        Ok(())
    }

    async fn fail(&mut self, transfer: &Transfer) {
        self.failed = true;
        for handle in self.pending.iter() {
            handle.abort();
        }
        self.pending.clear();
        self.buffer.clear();
        if let Err(e) = transfer.target.driver.abort(&transfer.target.path).await {
            tracing::warn!("Failed to abort upload of {}: {}", transfer.target.name, e);
        }
    }

    async fn finish(&mut self, transfer: &Transfer) -> Result<()> {
        self.ensure_usable()?;
        let target = &transfer.target;

        if self.sequence == 0 {
            let data = self.buffer.split().freeze();
            tracing::debug!("Uploading {} in one piece ({} bytes)", target.name, data.len());
            return target.driver.write_whole(&target.path, data, transfer.blob_kind).await;
        }

        if !self.buffer.is_empty() {
            self.submit(transfer).await?;
        }
        self.drain(transfer).await?;

        let mut finished = std::mem::take(&mut self.tokens);
        finished.sort_by_key(|(sequence, _)| *sequence);
        let tokens: Vec<ChunkToken> = finished.into_iter().map(|(_, token)| token).collect();
        tracing::debug!("Committing {} chunks of {}", tokens.len(), target.name);
        if let Err(e) = target.driver.commit(&target.path, tokens, transfer.blob_kind).await {
            self.fail(transfer).await;
            return Err(e);
        }
        Ok(())
    }

    fn has_unflushed(&self) -> bool {
        !self.failed && (!self.buffer.is_empty() || self.sequence > 0)
    }
}

enum State {
    Read(ReadState),
    Write(WriteState),
}

/// Chunked stream over a worker pool / 分片并发对象流
pub struct BufferedStream {
    base: StreamBase,
    transfer: Transfer,
    state: State,
}

impl BufferedStream {
    /// Open `target`. Read mode fetches the object size (missing object is
    /// `NotFound`); append mode re-feeds the existing content through the
    /// write path.
    pub async fn open(target: ObjectTarget, mode: OpenMode, options: BufferedOptions) -> Result<Self> {
        let driver = target.driver.clone();
        let minimum = driver.minimum_buffer_size();
        let requested = if options.buffer_size == 0 {
            DEFAULT_BUFFER_SIZE
        } else {
            options.buffer_size
        };
        let buffer_size = if requested < minimum {
            tracing::debug!(
                "Buffer size {} below the {} minimum, using {}",
                requested,
                driver.name(),
                minimum
            );
            minimum
        } else {
            requested
        };
        let pool = WorkerPool::new(options.max_workers);
        let provider_default = driver.default_blob_kind();

        if mode == OpenMode::Read {
            if !driver.capabilities().can_range_read {
                return Err(Error::unsupported(format!(
                    "buffered read of {}: {} has no range reads",
                    target.name,
                    driver.name()
                )));
            }
            let meta = target.meta().await?;
            let max_buffers = if options.max_buffers == 0 {
                (meta.size.div_ceil(buffer_size as u64) as usize).max(1)
            } else {
                options.max_buffers
            };
            let blob_kind = select_blob_kind(options.blob_kind, Some(&meta), provider_default);
            return Ok(Self {
                base: StreamBase::new(target.name.clone(), mode, true),
                transfer: Transfer { target, pool, buffer_size, max_buffers, blob_kind },
                state: State::Read(ReadState { size: meta.size, window: BTreeMap::new() }),
            });
        }

        let existing = if mode == OpenMode::Append {
            match target.meta().await {
                Ok(meta) => Some(meta),
                Err(e) if e.is_not_found() => None,
                Err(e) => return Err(e),
            }
        } else {
            None
        };
        let blob_kind = select_blob_kind(options.blob_kind, existing.as_ref(), provider_default);
        let mut stream = Self {
            base: StreamBase::new(target.name.clone(), mode, true),
            transfer: Transfer {
                target,
                pool,
                buffer_size,
                max_buffers: options.max_buffers,
                blob_kind,
            },
            state: State::Write(WriteState::new(buffer_size)),
        };

        if existing.map_or(false, |meta| meta.size > 0) {
            let content = driver.read_all(&stream.transfer.target.path).await?;
            stream.write(&content).await?;
        }
        Ok(stream)
    }

    /// Effective chunk size
    pub fn buffer_size(&self) -> usize {
        self.transfer.buffer_size
    }

    pub fn max_buffers(&self) -> usize {
        self.transfer.max_buffers
    }

    pub fn max_workers(&self) -> usize {
        self.transfer.pool.size()
    }

    pub fn blob_kind(&self) -> BlobKind {
        self.transfer.blob_kind
    }

    /// Start offsets of the chunks currently in the read-ahead window
    pub fn prefetched(&self) -> Vec<u64> {
        match &self.state {
            State::Read(state) => state.window.keys().copied().collect(),
            State::Write(_) => Vec::new(),
        }
    }
}

#[async_trait]
impl ObjectIo for BufferedStream {
    fn base(&self) -> &StreamBase {
        &self.base
    }

    async fn read(&mut self, size: Option<usize>) -> Result<Bytes> {
        self.base.ensure_readable()?;
        let remaining = match &self.state {
            State::Read(state) => state.size.saturating_sub(self.base.position()),
            State::Write(_) => 0,
        };
        let wanted = match size {
            Some(n) => (n as u64).min(remaining) as usize,
            None => remaining as usize,
        };
        let mut buf = vec![0u8; wanted];
        let count = self.readinto(&mut buf).await?;
        buf.truncate(count);
        Ok(Bytes::from(buf))
    }

    async fn readinto(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.base.ensure_readable()?;
        let State::Read(state) = &mut self.state else {
            return Err(Error::unsupported("read on a write stream"));
        };
        let transfer = &self.transfer;
        let chunk_size = transfer.buffer_size as u64;

        let mut position = self.base.position();
        let mut filled = 0;
        while filled < buf.len() && position < state.size {
            let start = position - position % chunk_size;
            if !state.window.contains_key(&start) {
                state.recentre(transfer, position);
            }
            let chunk = state.chunk(start).await?;
            let offset = (position - start) as usize;
            if offset >= chunk.len() {
                // object shorter than announced
                break;
            }

            let count = (chunk.len() - offset).min(buf.len() - filled);
            buf[filled..filled + count].copy_from_slice(&chunk[offset..offset + count]);
            filled += count;
            position += count as u64;
            self.base.set_position(position);

            if offset + count == chunk.len() {
                state.consumed(transfer, start);
            }
        }
        Ok(filled)
    }

    async fn peek(&mut self, size: usize) -> Result<Bytes> {
        self.base.ensure_readable()?;
        let position = self.base.position();
        self.transfer
            .target
            .raw_read_range(position, Some(position.saturating_add(size as u64)))
            .await
    }

    async fn write(&mut self, data: &[u8]) -> Result<usize> {
        self.base.ensure_writable()?;
        let State::Write(state) = &mut self.state else {
            return Err(Error::unsupported("write on a read stream"));
        };
        state.ensure_usable()?;

        let transfer = &self.transfer;
        let mut rest = data;
        while !rest.is_empty() {
            // a full chunk is only sent once more data shows up
            if state.buffer.len() >= transfer.buffer_size {
                state.submit(transfer).await?;
            }
            let take = (transfer.buffer_size - state.buffer.len()).min(rest.len());
            state.buffer.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
        }
        self.base.advance(data.len());
        Ok(data.len())
    }

    async fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.base.ensure_open()?;
        match &mut self.state {
            State::Read(state) => {
                let position = self.base.seek_target(pos, state.size)?;
                self.base.set_position(position);
                state.recentre(&self.transfer, position);
                Ok(position)
            }
            State::Write(_) => {
                let current = self.base.position();
                if self.base.seek_target(pos, current)? != current {
                    return Err(Error::unsupported(format!(
                        "seek in {} opened for writing",
                        self.base.name()
                    )));
                }
                Ok(current)
            }
        }
    }

    async fn flush(&mut self) -> Result<()> {
        self.base.ensure_open()?;
        if let State::Write(state) = &mut self.state {
            state.ensure_usable()?;
            // the partial chunk becomes a part of its own, `close` commits
            if !state.buffer.is_empty() {
                state.submit(&self.transfer).await?;
            }
            state.drain(&self.transfer).await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.base.closed() {
            return Ok(());
        }
        let result = match &mut self.state {
            State::Write(state) => state.finish(&self.transfer).await,
            State::Read(state) => {
                state.clear();
                Ok(())
            }
        };
        self.base.mark_closed();
        result
    }
}

impl Drop for BufferedStream {
    fn drop(&mut self) {
        match &mut self.state {
            State::Read(state) => state.clear(),
            State::Write(state) => {
                if !self.base.closed() && state.has_unflushed() {
                    tracing::error!(
                        "{} dropped without close, {} chunks and {} buffered bytes were not committed",
                        self.base.name(),
                        state.sequence,
                        state.buffer.len()
                    );
                }
                for handle in state.pending.iter() {
                    handle.abort();
                }
            }
        }
    }
}
