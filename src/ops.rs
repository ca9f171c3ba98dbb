//! Path level helpers on top of a [`Registry`] / 路径操作

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::StreamExt;

use crate::error::{Error, Result};
use crate::io::OpenOptions;
use crate::storage::path::{ensure_dir_path, is_locator, split_locator};
use crate::storage::{ObjectMeta, Registry, Resolved};

async fn stat_resolved(resolved: &Resolved) -> Result<ObjectMeta> {
    let path = resolved.path.as_str();
    if path.is_empty() {
        return Ok(ObjectMeta::dir());
    }
    if is_locator(path) {
        let (locator, _) = split_locator(path);
        let mut meta = resolved.driver.head_locator(locator).await?;
        meta.is_dir = true;
        return Ok(meta);
    }
    match resolved.driver.head_object(path).await {
        Err(e) if e.is_not_found() && path.ends_with('/') => {
            // no marker object, but the prefix may still hold objects
            let mut entries = resolved.driver.list_objects(path, Some(1)).await?;
            match entries.next().await {
                Some(entry) => entry.map(|_| ObjectMeta::dir()),
                None => Err(Error::not_found(resolved.name.clone())),
            }
        }
        other => other,
    }
}

/// Object metadata / 获取元数据
pub async fn stat(registry: &Registry, name: &str) -> Result<ObjectMeta> {
    let resolved = registry.resolve(name, None)?;
    stat_resolved(&resolved).await
}

pub async fn exists(registry: &Registry, name: &str) -> Result<bool> {
    match stat(registry, name).await {
        Ok(_) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

pub async fn getsize(registry: &Registry, name: &str) -> Result<u64> {
    Ok(stat(registry, name).await?.size)
}

pub async fn getmtime(registry: &Registry, name: &str) -> Result<DateTime<Utc>> {
    stat(registry, name)
        .await?
        .modified
        .ok_or_else(|| Error::unsupported(format!("modification time of {}", name)))
}

pub async fn isfile(registry: &Registry, name: &str) -> Result<bool> {
    if name.ends_with('/') {
        return Ok(false);
    }
    match stat(registry, name).await {
        Ok(meta) => Ok(!meta.is_dir),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

pub async fn isdir(registry: &Registry, name: &str) -> Result<bool> {
    let resolved = registry.resolve(name, None)?;
    let resolved = Resolved {
        path: ensure_dir_path(&resolved.path),
        ..resolved
    };
    match stat_resolved(&resolved).await {
        Ok(meta) => Ok(meta.is_dir),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

/// First level entries of a directory, sub directories end with `/` / 列出目录
pub async fn listdir(registry: &Registry, name: &str) -> Result<Vec<String>> {
    let resolved = registry.resolve(name, None)?;
    let prefix = if resolved.path.is_empty() {
        String::new()
    } else {
        format!("{}/", resolved.path.trim_end_matches('/'))
    };

    let mut names = BTreeSet::new();
    let mut entries = resolved.driver.list_objects(&prefix, None).await?;
    while let Some(entry) = entries.next().await {
        let (relative, _) = entry?;
        let first = match relative.split_once('/') {
            Some((dir, _)) => format!("{}/", dir),
            None => relative,
        };
        if !first.is_empty() && first != "/" {
            names.insert(first);
        }
    }
    Ok(names.into_iter().collect())
}

/// Create a directory marker / 创建目录
pub async fn make_dir(registry: &Registry, name: &str) -> Result<()> {
    let resolved = registry.resolve(name, None)?;
    resolved.driver.make_dir(&ensure_dir_path(&resolved.path)).await
}

pub async fn remove(registry: &Registry, name: &str) -> Result<()> {
    let resolved = registry.resolve(name, None)?;
    resolved.driver.remove(&resolved.path).await
}

/// Copy an object, server side when both paths share a driver that supports
/// it, otherwise through a read and a write stream / 复制
pub async fn copy(registry: &Registry, src: &str, dst: &str) -> Result<()> {
    let source = registry.resolve(src, None)?;
    let destination = registry.resolve(dst, None)?;

    if Arc::ptr_eq(&source.driver, &destination.driver)
        && source.driver.capabilities().can_server_side_copy
    {
        match source.driver.copy(&source.path, &destination.path).await {
            Ok(true) => {
                tracing::debug!("Server-side copy {} -> {}", src, dst);
                return Ok(());
            }
            Ok(false) => {}
            Err(e) if e.is_unsupported() => {}
            Err(e) => return Err(e),
        }
    }

    tracing::debug!("Stream copy {} -> {}", src, dst);
    let chunk = registry.engine().buffer_size;
    let mut reader = registry.open(src, OpenOptions::read()).await?;
    let mut writer = registry.open(dst, OpenOptions::write()).await?;
    loop {
        let data = reader.read(Some(chunk)).await?;
        if data.is_empty() {
            break;
        }
        writer.write(&data).await?;
    }
    reader.close().await?;
    writer.close().await
}
