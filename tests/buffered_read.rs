mod common;

use std::io::SeekFrom;
use std::sync::Arc;

use blobstream::io::{BufferedOptions, BufferedStream, ObjectIo, ObjectTarget, OpenMode};
use blobstream::{EngineConfig, Error, OpenOptions, Registry};

use common::{payload, MockDriver};

fn target(driver: &Arc<MockDriver>) -> ObjectTarget {
    ObjectTarget::new("mock://bucket/object", "bucket/object", driver.clone())
}

async fn reader(driver: &Arc<MockDriver>, buffer_size: usize, max_buffers: usize) -> BufferedStream {
    let options = BufferedOptions {
        buffer_size,
        max_buffers,
        max_workers: Some(4),
        blob_kind: None,
    };
    BufferedStream::open(target(driver), OpenMode::Read, options).await.unwrap()
}

#[tokio::test]
async fn test_readinto_sequence_until_eof() {
    let data = payload(100);
    let driver = Arc::new(MockDriver::new().with_object("bucket/object", data.clone()));
    let mut stream = reader(&driver, 40, 0).await;
    assert_eq!(stream.max_buffers(), 3);

    let mut buf = vec![0u8; 40];
    assert_eq!(stream.readinto(&mut buf).await.unwrap(), 40);
    assert_eq!(stream.tell().unwrap(), 40);
    assert_eq!(buf, &data[..40]);

    assert_eq!(stream.readinto(&mut buf).await.unwrap(), 40);
    assert_eq!(stream.tell().unwrap(), 80);
    assert_eq!(buf, &data[40..80]);

    assert_eq!(stream.readinto(&mut buf).await.unwrap(), 20);
    assert_eq!(stream.tell().unwrap(), 100);
    assert_eq!(&buf[..20], &data[80..]);

    let before = buf.clone();
    assert_eq!(stream.readinto(&mut buf).await.unwrap(), 0);
    assert_eq!(stream.tell().unwrap(), 100);
    assert_eq!(buf, before);
    stream.close().await.unwrap();
}

#[tokio::test]
async fn test_reads_spanning_chunks() {
    let data = payload(100);
    let driver = Arc::new(MockDriver::new().with_object("bucket/object", data.clone()));
    let mut stream = reader(&driver, 30, 2).await;

    let mut buf = vec![0u8; 40];
    assert_eq!(stream.readinto(&mut buf).await.unwrap(), 40);
    assert_eq!(buf, &data[..40]);
    assert_eq!(stream.readinto(&mut buf).await.unwrap(), 40);
    assert_eq!(buf, &data[40..80]);
    assert_eq!(stream.readinto(&mut buf).await.unwrap(), 20);
    assert_eq!(&buf[..20], &data[80..]);
    assert_eq!(stream.readinto(&mut buf).await.unwrap(), 0);

    // 4 chunks, each fetched once
    assert_eq!(MockDriver::count(&driver.range_reads), 4);
}

#[tokio::test]
async fn test_window_slides_after_consumed_chunk() {
    let driver = Arc::new(MockDriver::new().with_object("bucket/object", payload(160)));
    let mut stream = reader(&driver, 16, 3).await;
    assert!(stream.prefetched().is_empty());

    stream.read(Some(1)).await.unwrap();
    assert_eq!(stream.prefetched(), vec![0, 16, 32]);

    stream.read(Some(15)).await.unwrap();
    assert_eq!(stream.prefetched(), vec![16, 32, 48]);

    stream.read(Some(32)).await.unwrap();
    assert_eq!(stream.prefetched(), vec![48, 64, 80]);
}

#[tokio::test]
async fn test_seek_outside_window_recentres() {
    let data = payload(160);
    let driver = Arc::new(MockDriver::new().with_object("bucket/object", data.clone()));
    let mut stream = reader(&driver, 16, 3).await;

    stream.read(Some(4)).await.unwrap();
    assert_eq!(stream.prefetched(), vec![0, 16, 32]);

    assert_eq!(stream.seek(SeekFrom::Start(130)).await.unwrap(), 130);
    assert_eq!(stream.prefetched(), vec![128, 144]);
    assert_eq!(stream.read(Some(10)).await.unwrap(), &data[130..140]);

    assert_eq!(stream.seek(SeekFrom::End(-10)).await.unwrap(), 150);
    assert_eq!(stream.read(None).await.unwrap(), &data[150..]);

    assert_eq!(stream.seek(SeekFrom::Start(0)).await.unwrap(), 0);
    assert_eq!(stream.prefetched(), vec![0, 16, 32]);
}

#[tokio::test]
async fn test_read_to_end_and_peek() {
    let data = payload(100);
    let driver = Arc::new(MockDriver::new().with_object("bucket/object", data.clone()));
    let mut stream = reader(&driver, 32, 0).await;

    assert_eq!(stream.peek(5).await.unwrap(), &data[..5]);
    assert_eq!(stream.tell().unwrap(), 0);

    stream.seek(SeekFrom::Start(10)).await.unwrap();
    let rest = stream.read(None).await.unwrap();
    assert_eq!(rest, &data[10..]);
    assert!(stream.read(Some(10)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_far_seek_reads_nothing() {
    let driver = Arc::new(MockDriver::new().with_object("bucket/object", payload(10)));
    let mut stream = reader(&driver, 4, 2).await;

    let far = u64::MAX - 2;
    assert_eq!(stream.seek(SeekFrom::Start(far)).await.unwrap(), far);
    assert!(stream.prefetched().is_empty());
    assert!(stream.peek(10).await.unwrap().is_empty());
    assert!(stream.read(Some(10)).await.unwrap().is_empty());
    let mut buf = [0u8; 4];
    assert_eq!(stream.readinto(&mut buf).await.unwrap(), 0);
    assert_eq!(stream.tell().unwrap(), far);
}

#[tokio::test]
async fn test_missing_object_is_not_found() {
    let driver = Arc::new(MockDriver::new());
    let err = BufferedStream::open(target(&driver), OpenMode::Read, BufferedOptions::default())
        .await
        .err()
        .unwrap();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_failed_chunk_surfaces_on_read() {
    let data = payload(64);
    let driver = Arc::new(MockDriver {
        fail_read_at: Some(16),
        ..MockDriver::new().with_object("bucket/object", data.clone())
    });
    let mut stream = reader(&driver, 16, 2).await;

    let mut buf = vec![0u8; 10];
    assert_eq!(stream.readinto(&mut buf).await.unwrap(), 10);
    assert_eq!(buf, &data[..10]);

    let mut buf = vec![0u8; 20];
    assert!(matches!(stream.readinto(&mut buf).await, Err(Error::Transfer(_))));
    assert_eq!(stream.tell().unwrap(), 16);

    // later chunks are unaffected
    stream.seek(SeekFrom::Start(32)).await.unwrap();
    assert_eq!(stream.read(None).await.unwrap(), &data[32..]);
}

#[tokio::test]
async fn test_object_removed_after_open_is_not_found() {
    let driver = Arc::new(MockDriver::new().with_object("bucket/object", payload(64)));
    let mut stream = reader(&driver, 16, 2).await;
    driver.objects.lock().clear();

    let mut buf = vec![0u8; 8];
    let err = stream.readinto(&mut buf).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(stream.tell().unwrap(), 0);
}

#[tokio::test]
async fn test_buffered_read_needs_range_reads() {
    let driver = Arc::new(MockDriver {
        range_read: false,
        ..MockDriver::new().with_object("bucket/object", payload(10))
    });
    let err = BufferedStream::open(target(&driver), OpenMode::Read, BufferedOptions::default())
        .await
        .err()
        .unwrap();
    assert!(err.is_unsupported());
}

#[tokio::test]
async fn test_write_then_read_through_registry() {
    let registry = Registry::with_default_drivers(EngineConfig {
        buffer_size: 16,
        max_buffers: 0,
        max_workers: Some(4),
    });

    for len in [0usize, 15, 16, 17, 72] {
        let name = format!("mem://bucket/object-{}", len);
        let data = payload(len);

        let mut writer = registry.open(&name, OpenOptions::write()).await.unwrap();
        writer.write(&data).await.unwrap();
        assert_eq!(writer.tell().unwrap(), len as u64);
        writer.close().await.unwrap();

        let mut reader = registry.open(&name, OpenOptions::read().max_buffers(2)).await.unwrap();
        assert_eq!(reader.read(None).await.unwrap(), &data[..], "length {}", len);
        reader.close().await.unwrap();
    }
}
