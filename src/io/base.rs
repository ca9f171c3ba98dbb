//! Seekable stream state shared by the raw and buffered streams / 流基础状态

use std::future::Future;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::OnceCell;

use crate::error::{Error, Result};
use crate::storage::{DriverBox, ObjectMeta, Resolved};

/// Open mode / 打开模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpenMode {
    Read,
    Write,
    Append,
}

impl OpenMode {
    /// Parse a Python-style mode string. `w` and `a` win over `r`; `b`, `t`
    /// and `+` are accepted and ignored.
    pub fn parse(mode: &str) -> Result<Self> {
        if mode.contains('w') {
            Ok(OpenMode::Write)
        } else if mode.contains('a') {
            Ok(OpenMode::Append)
        } else if mode.contains('r') {
            Ok(OpenMode::Read)
        } else {
            Err(Error::InvalidMode(mode.to_string()))
        }
    }

    pub fn is_readable(self) -> bool {
        self == OpenMode::Read
    }

    pub fn is_writable(self) -> bool {
        matches!(self, OpenMode::Write | OpenMode::Append)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OpenMode::Read => "rb",
            OpenMode::Write => "wb",
            OpenMode::Append => "ab",
        }
    }
}

/// Compute-once cell for values assumed immutable for a stream's lifetime
/// (object size, mtime, blob kind).
#[derive(Debug)]
pub struct Memoized<T> {
    cell: OnceCell<T>,
}

impl<T> Default for Memoized<T> {
    fn default() -> Self {
        Self { cell: OnceCell::new() }
    }
}

impl<T: Clone> Memoized<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cell already holding `value`
    pub fn with_value(value: T) -> Self {
        Self { cell: OnceCell::new_with(Some(value)) }
    }

    /// Cached value, computing it with `init` on first access. A failed
    /// computation is not cached.
    pub async fn get_or_try_init<F, Fut>(&self, init: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.cell.get_or_try_init(init).await.cloned()
    }

    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }
}

/// Object a stream operates on: full name, driver-relative path and the
/// driver serving it / 流目标
pub struct ObjectTarget {
    pub name: String,
    pub path: String,
    pub driver: DriverBox,
    meta: Memoized<ObjectMeta>,
}

impl ObjectTarget {
    pub fn new(name: impl Into<String>, path: impl Into<String>, driver: DriverBox) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            driver,
            meta: Memoized::new(),
        }
    }

    /// Memoized `head_object` / 对象元数据（缓存）
    pub async fn meta(&self) -> Result<ObjectMeta> {
        self.meta
            .get_or_try_init(|| self.driver.head_object(&self.path))
            .await
    }

    pub async fn size(&self) -> Result<u64> {
        Ok(self.meta().await?.size)
    }

    /// Direct range read, bypassing any stream buffering
    pub async fn raw_read_range(&self, start: u64, end: Option<u64>) -> Result<Bytes> {
        self.driver.read_range(&self.path, start, end).await
    }
}

impl From<Resolved> for ObjectTarget {
    fn from(resolved: Resolved) -> Self {
        Self::new(resolved.name, resolved.path, resolved.driver)
    }
}

/// Name, mode, capability flags and position of a stream / 流状态
#[derive(Debug)]
pub struct StreamBase {
    name: String,
    mode: OpenMode,
    seekable: bool,
    position: Mutex<u64>,
    closed: bool,
}

impl StreamBase {
    pub fn new(name: impl Into<String>, mode: OpenMode, seekable: bool) -> Self {
        Self {
            name: name.into(),
            mode,
            seekable,
            position: Mutex::new(0),
            closed: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn readable(&self) -> bool {
        self.mode.is_readable()
    }

    pub fn writable(&self) -> bool {
        self.mode.is_writable()
    }

    pub fn seekable(&self) -> bool {
        self.seekable
    }

    pub fn closed(&self) -> bool {
        self.closed
    }

    /// Current position / 当前位置
    pub fn tell(&self) -> Result<u64> {
        if !self.seekable {
            return Err(Error::unsupported("tell on a non-seekable stream"));
        }
        Ok(*self.position.lock())
    }

    /// Position without the seekable check, for the engines themselves
    pub(crate) fn position(&self) -> u64 {
        *self.position.lock()
    }

    pub(crate) fn set_position(&self, position: u64) {
        *self.position.lock() = position;
    }

    pub(crate) fn advance(&self, count: usize) -> u64 {
        let mut position = self.position.lock();
        *position += count as u64;
        *position
    }

    pub(crate) fn mark_closed(&mut self) {
        self.closed = true;
    }

    pub(crate) fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    pub(crate) fn ensure_readable(&self) -> Result<()> {
        self.ensure_open()?;
        if !self.readable() {
            return Err(Error::unsupported(format!("read on {} opened for writing", self.name)));
        }
        Ok(())
    }

    pub(crate) fn ensure_writable(&self) -> Result<()> {
        self.ensure_open()?;
        if !self.writable() {
            return Err(Error::unsupported(format!("write on {} opened for reading", self.name)));
        }
        Ok(())
    }

    /// Absolute position for a seek, `size` is only consulted for `End`
    pub(crate) fn seek_target(&self, pos: std::io::SeekFrom, size: u64) -> Result<u64> {
        let (base, offset) = match pos {
            std::io::SeekFrom::Start(offset) => return Ok(offset),
            std::io::SeekFrom::Current(offset) => (self.position(), offset),
            std::io::SeekFrom::End(offset) => (size, offset),
        };
        let target = base as i128 + offset as i128;
        if target < 0 {
            return Err(Error::InvalidArgument(format!("negative seek position {}", target)));
        }
        u64::try_from(target)
            .map_err(|_| Error::InvalidArgument(format!("seek position {} out of range", target)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::SeekFrom;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_parse_mode() {
        assert_eq!(OpenMode::parse("rb").unwrap(), OpenMode::Read);
        assert_eq!(OpenMode::parse("wb").unwrap(), OpenMode::Write);
        assert_eq!(OpenMode::parse("a").unwrap(), OpenMode::Append);
        assert_eq!(OpenMode::parse("r+w").unwrap(), OpenMode::Write);
        assert!(matches!(OpenMode::parse("xb"), Err(Error::InvalidMode(m)) if m == "xb"));
        assert!(matches!(OpenMode::parse(""), Err(Error::InvalidMode(_))));
    }

    #[test]
    fn test_flags_follow_mode() {
        let base = StreamBase::new("mem://b/k", OpenMode::Read, true);
        assert!(base.readable() && !base.writable());
        let base = StreamBase::new("mem://b/k", OpenMode::Append, true);
        assert!(!base.readable() && base.writable());
        assert!(base.ensure_readable().is_err());
    }

    #[test]
    fn test_tell_requires_seekable() {
        let base = StreamBase::new("http://h/f", OpenMode::Read, false);
        assert!(base.tell().unwrap_err().is_unsupported());

        let base = StreamBase::new("mem://b/k", OpenMode::Read, true);
        base.advance(40);
        assert_eq!(base.tell().unwrap(), 40);
    }

    #[test]
    fn test_seek_target() {
        let base = StreamBase::new("mem://b/k", OpenMode::Read, true);
        base.set_position(10);
        assert_eq!(base.seek_target(SeekFrom::Start(3), 100).unwrap(), 3);
        assert_eq!(base.seek_target(SeekFrom::Current(-4), 100).unwrap(), 6);
        assert_eq!(base.seek_target(SeekFrom::End(-1), 100).unwrap(), 99);
        assert!(matches!(
            base.seek_target(SeekFrom::Current(-11), 100),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_memoized_computes_once() {
        let calls = AtomicUsize::new(0);
        let memo: Memoized<u64> = Memoized::new();
        for _ in 0..3 {
            let value = memo
                .get_or_try_init(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                })
                .await
                .unwrap();
            assert_eq!(value, 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(Memoized::with_value(7u64).get(), Some(&7));
    }

    #[tokio::test]
    async fn test_memoized_does_not_cache_errors() {
        let memo: Memoized<u64> = Memoized::new();
        let err = memo
            .get_or_try_init(|| async { Err(Error::not_found("k")) })
            .await;
        assert!(err.is_err());
        let value = memo.get_or_try_init(|| async { Ok(1) }).await.unwrap();
        assert_eq!(value, 1);
    }
}
