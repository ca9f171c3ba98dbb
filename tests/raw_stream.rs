mod common;

use std::io::SeekFrom;
use std::sync::Arc;

use blobstream::io::{ObjectIo, ObjectTarget, OpenMode, RawStream};
use blobstream::{Error, OpenOptions, Registry};

use common::{payload, MockDriver};

async fn open(driver: &Arc<MockDriver>, mode: OpenMode) -> RawStream {
    let target = ObjectTarget::new("mock://bucket/object", "bucket/object", driver.clone());
    RawStream::open(target, mode, None).await.unwrap()
}

#[tokio::test]
async fn test_flush_uploads_once_per_change() {
    let driver = Arc::new(MockDriver::new());
    let mut stream = open(&driver, OpenMode::Write).await;

    stream.write(b"abc").await.unwrap();
    stream.flush().await.unwrap();
    stream.flush().await.unwrap();
    assert_eq!(MockDriver::count(&driver.whole_writes), 1);

    stream.write(b"d").await.unwrap();
    stream.flush().await.unwrap();
    assert_eq!(MockDriver::count(&driver.whole_writes), 2);

    stream.close().await.unwrap();
    stream.close().await.unwrap();
    assert_eq!(MockDriver::count(&driver.whole_writes), 2);
    assert_eq!(driver.object("bucket/object").unwrap(), &b"abcd"[..]);
    assert!(matches!(stream.write(b"e").await, Err(Error::Closed)));
}

#[tokio::test]
async fn test_new_writer_truncates_on_close() {
    let driver = Arc::new(MockDriver::new().with_object("bucket/object", payload(50)));
    let mut stream = open(&driver, OpenMode::Write).await;
    stream.close().await.unwrap();
    assert!(driver.object("bucket/object").unwrap().is_empty());
}

#[tokio::test]
async fn test_readinto_sequence_until_eof() {
    let data = payload(100);
    let driver = Arc::new(MockDriver::new().with_object("bucket/object", data.clone()));
    let mut stream = open(&driver, OpenMode::Read).await;

    let mut buf = vec![0u8; 40];
    assert_eq!(stream.readinto(&mut buf).await.unwrap(), 40);
    assert_eq!(stream.tell().unwrap(), 40);
    assert_eq!(stream.readinto(&mut buf).await.unwrap(), 40);
    assert_eq!(stream.tell().unwrap(), 80);
    assert_eq!(stream.readinto(&mut buf).await.unwrap(), 20);
    assert_eq!(&buf[..20], &data[80..]);
    assert_eq!(stream.tell().unwrap(), 100);

    let before = buf.clone();
    assert_eq!(stream.readinto(&mut buf).await.unwrap(), 0);
    assert_eq!(buf, before);
    assert_eq!(stream.tell().unwrap(), 100);
}

#[tokio::test]
async fn test_append_preloads_existing_content() {
    let driver = Arc::new(MockDriver::new().with_object("bucket/object", &b"hello"[..]));
    let mut stream = open(&driver, OpenMode::Append).await;
    assert_eq!(stream.tell().unwrap(), 5);

    stream.write(b" world").await.unwrap();
    stream.close().await.unwrap();
    assert_eq!(driver.object("bucket/object").unwrap(), &b"hello world"[..]);
}

#[tokio::test]
async fn test_append_to_missing_object() {
    let driver = Arc::new(MockDriver::new());
    let mut stream = open(&driver, OpenMode::Append).await;
    assert_eq!(stream.tell().unwrap(), 0);
    stream.write(b"new").await.unwrap();
    stream.close().await.unwrap();
    assert_eq!(driver.object("bucket/object").unwrap(), &b"new"[..]);
}

#[tokio::test]
async fn test_seek_overwrites_and_zero_fills() {
    let driver = Arc::new(MockDriver::new());
    let mut stream = open(&driver, OpenMode::Write).await;

    stream.write(b"0123456789").await.unwrap();
    assert_eq!(stream.seek(SeekFrom::End(-5)).await.unwrap(), 5);
    stream.write(b"XY").await.unwrap();
    assert_eq!(stream.seek(SeekFrom::Start(12)).await.unwrap(), 12);
    stream.write(b"Z").await.unwrap();
    stream.close().await.unwrap();

    assert_eq!(driver.object("bucket/object").unwrap(), &b"01234XY789\0\0Z"[..]);
}

#[tokio::test]
async fn test_seek_in_read_mode() {
    let data = payload(64);
    let driver = Arc::new(MockDriver::new().with_object("bucket/object", data.clone()));
    let mut stream = open(&driver, OpenMode::Read).await;

    assert_eq!(stream.seek(SeekFrom::End(-4)).await.unwrap(), 60);
    assert_eq!(stream.read(None).await.unwrap(), &data[60..]);
    assert_eq!(stream.seek(SeekFrom::Current(-10)).await.unwrap(), 54);
    assert_eq!(stream.peek(3).await.unwrap(), &data[54..57]);
    assert_eq!(stream.tell().unwrap(), 54);
    assert!(matches!(
        stream.seek(SeekFrom::Current(-100)).await,
        Err(Error::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn test_far_seek_reads_nothing_and_rejects_writes() {
    let driver = Arc::new(MockDriver::new().with_object("bucket/object", payload(10)));
    let mut stream = open(&driver, OpenMode::Read).await;

    let far = u64::MAX - 2;
    assert_eq!(stream.seek(SeekFrom::Start(far)).await.unwrap(), far);
    assert!(stream.read(Some(10)).await.unwrap().is_empty());
    assert!(stream.peek(10).await.unwrap().is_empty());
    assert_eq!(stream.tell().unwrap(), far);
    assert!(matches!(
        stream.seek(SeekFrom::Current(i64::MAX)).await,
        Err(Error::InvalidArgument(_))
    ));

    let mut writer = open(&driver, OpenMode::Write).await;
    writer.seek(SeekFrom::Start(far)).await.unwrap();
    assert!(matches!(writer.write(b"abc").await, Err(Error::InvalidArgument(_))));
    assert_eq!(writer.tell().unwrap(), far);
}

#[tokio::test]
async fn test_no_range_reads_means_not_seekable() {
    let data = payload(30);
    let driver = Arc::new(MockDriver {
        range_read: false,
        ..MockDriver::new().with_object("bucket/object", data.clone())
    });
    let mut stream = open(&driver, OpenMode::Read).await;

    assert!(!stream.seekable());
    assert!(stream.tell().unwrap_err().is_unsupported());
    assert!(stream.seek(SeekFrom::Start(1)).await.unwrap_err().is_unsupported());
    assert_eq!(stream.read(None).await.unwrap(), &data[..]);
}

#[tokio::test]
async fn test_raw_stream_through_registry() {
    let registry = Registry::with_default_drivers(Default::default());

    let mut writer = registry
        .open("mem://bucket/raw.txt", OpenOptions::write().raw())
        .await
        .unwrap();
    assert!(writer.writable() && !writer.readable());
    writer.write(b"raw content").await.unwrap();
    writer.close().await.unwrap();
    assert!(writer.closed());

    let mut reader = registry
        .open("mem://bucket/raw.txt", OpenOptions::read().raw())
        .await
        .unwrap();
    assert_eq!(reader.name(), "mem://bucket/raw.txt");
    assert_eq!(reader.read(Some(3)).await.unwrap(), &b"raw"[..]);
    assert_eq!(reader.read(None).await.unwrap(), &b" content"[..]);
    assert!(reader.write(b"x").await.unwrap_err().is_unsupported());
}
