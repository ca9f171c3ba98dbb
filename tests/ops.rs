mod common;

use std::sync::Arc;

use blobstream::{ops, EngineConfig, Error, ObjectIo, OpenOptions, Registry};

use common::{payload, MockDriver, MockFactory};

fn registry() -> Registry {
    Registry::with_default_drivers(EngineConfig {
        buffer_size: 16,
        max_buffers: 0,
        max_workers: Some(4),
    })
}

async fn put(registry: &Registry, name: &str, data: &[u8]) {
    let mut writer = registry.open(name, OpenOptions::write()).await.unwrap();
    writer.write(data).await.unwrap();
    writer.close().await.unwrap();
}

async fn populated() -> Registry {
    let registry = registry();
    put(&registry, "mem://bucket/top.txt", b"top").await;
    put(&registry, "mem://bucket/dir/a.txt", &payload(40)).await;
    put(&registry, "mem://bucket/dir/sub/b.txt", b"b").await;
    registry
}

#[tokio::test]
async fn test_stat_and_sizes() {
    let registry = populated().await;

    assert!(ops::exists(&registry, "mem://bucket/dir/a.txt").await.unwrap());
    assert!(!ops::exists(&registry, "mem://bucket/nope.txt").await.unwrap());
    assert!(!ops::exists(&registry, "mem://nobucket/key").await.unwrap());
    assert_eq!(ops::getsize(&registry, "mem://bucket/dir/a.txt").await.unwrap(), 40);
    assert!(ops::getmtime(&registry, "mem://bucket/top.txt").await.is_ok());

    let meta = ops::stat(&registry, "mem://bucket/top.txt").await.unwrap();
    assert_eq!(meta.size, 3);
    assert!(meta.etag.is_some());
    assert!(ops::stat(&registry, "mem://bucket/nope.txt").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_files_and_directories() {
    let registry = populated().await;

    assert!(ops::isfile(&registry, "mem://bucket/dir/a.txt").await.unwrap());
    assert!(!ops::isfile(&registry, "mem://bucket/dir").await.unwrap());
    assert!(!ops::isfile(&registry, "mem://bucket/dir/").await.unwrap());

    assert!(ops::isdir(&registry, "mem://bucket").await.unwrap());
    assert!(ops::isdir(&registry, "mem://bucket/dir").await.unwrap());
    assert!(ops::isdir(&registry, "mem://bucket/dir/sub/").await.unwrap());
    assert!(!ops::isdir(&registry, "mem://bucket/dir/a.txt").await.unwrap());
    assert!(!ops::isdir(&registry, "mem://bucket/missing").await.unwrap());
}

#[tokio::test]
async fn test_listdir_first_level() {
    let registry = populated().await;

    assert_eq!(ops::listdir(&registry, "mem://").await.unwrap(), vec!["bucket/"]);
    assert_eq!(
        ops::listdir(&registry, "mem://bucket").await.unwrap(),
        vec!["dir/", "top.txt"]
    );
    assert_eq!(
        ops::listdir(&registry, "mem://bucket/dir/").await.unwrap(),
        vec!["a.txt", "sub/"]
    );
    assert!(ops::listdir(&registry, "mem://missing").await.unwrap_err().is_not_found());
    assert!(ops::listdir(&registry, "mem://bucket/nope").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_make_dir_and_remove() {
    let registry = populated().await;

    ops::make_dir(&registry, "mem://fresh").await.unwrap();
    assert!(ops::isdir(&registry, "mem://fresh").await.unwrap());

    ops::make_dir(&registry, "mem://bucket/empty").await.unwrap();
    assert!(ops::isdir(&registry, "mem://bucket/empty").await.unwrap());
    assert!(ops::listdir(&registry, "mem://bucket/empty").await.unwrap().is_empty());
    assert_eq!(
        ops::listdir(&registry, "mem://bucket").await.unwrap(),
        vec!["dir/", "empty/", "top.txt"]
    );

    ops::remove(&registry, "mem://bucket/top.txt").await.unwrap();
    assert!(!ops::exists(&registry, "mem://bucket/top.txt").await.unwrap());
    assert!(ops::remove(&registry, "mem://bucket/top.txt").await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_copy_within_memory_store() {
    let registry = populated().await;
    ops::copy(&registry, "mem://bucket/dir/a.txt", "mem://other/a.txt").await.unwrap();

    let mut reader = registry.open("mem://other/a.txt", OpenOptions::read()).await.unwrap();
    assert_eq!(reader.read(None).await.unwrap(), &payload(40)[..]);
}

#[tokio::test]
async fn test_copy_uses_server_side_copy() {
    let registry = registry();
    let driver = Arc::new(MockDriver::new().with_object("bucket/src", payload(40)));
    registry.register_factory(Arc::new(MockFactory(driver.clone())));

    ops::copy(&registry, "mock://bucket/src", "mock://bucket/dst").await.unwrap();
    assert_eq!(MockDriver::count(&driver.copies), 1);
    assert_eq!(MockDriver::count(&driver.chunk_calls), 0);
    assert_eq!(driver.object("bucket/dst").unwrap(), &payload(40)[..]);
}

#[tokio::test]
async fn test_copy_falls_back_to_streams() {
    let registry = registry();
    let driver = Arc::new(MockDriver {
        server_side_copy: false,
        ..MockDriver::new().with_object("bucket/src", payload(40))
    });
    registry.register_factory(Arc::new(MockFactory(driver.clone())));

    ops::copy(&registry, "mock://bucket/src", "mock://bucket/dst").await.unwrap();
    assert_eq!(MockDriver::count(&driver.copies), 0);
    assert_eq!(driver.object("bucket/dst").unwrap(), &payload(40)[..]);
}

#[tokio::test]
async fn test_getmtime_without_timestamp() {
    let registry = registry();
    let driver = Arc::new(MockDriver::new().with_object("bucket/src", payload(4)));
    registry.register_factory(Arc::new(MockFactory(driver)));

    assert!(matches!(
        ops::getmtime(&registry, "mock://bucket/src").await,
        Err(Error::Unsupported(_))
    ));
}
