use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, CONTENT_LENGTH, ETAG, LAST_MODIFIED, RANGE};
use reqwest::{Client, StatusCode};

use super::HttpConfig;
use crate::error::{Error, Result};
use crate::storage::{Capability, ObjectMeta, Root, StorageDriver};

/// Objects addressed by their full URL, read with range requests
pub struct HttpDriver {
    client: Client,
}

impl HttpDriver {
    pub fn new(config: HttpConfig, unsecure: bool) -> Result<Self> {
        let client = Client::builder()
            .danger_accept_invalid_certs(unsecure)
            .timeout(Duration::from_secs(config.timeout))
            .connect_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            .build()
            .context("创建HTTP客户端失败")?;
        Ok(Self { client })
    }
}

fn check_status(status: StatusCode, url: &str) -> Result<()> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => Err(Error::not_found(url)),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::PermissionDenied(url.to_string())),
        _ => Err(Error::Transfer(anyhow!("HTTP GET {} failed: {}", url, status))),
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: reqwest::header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}

fn meta_from_headers(headers: &HeaderMap) -> ObjectMeta {
    let properties: BTreeMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| Some((name.to_string(), value.to_str().ok()?.to_string())))
        .collect();
    ObjectMeta {
        size: header_str(headers, CONTENT_LENGTH)
            .and_then(|value| value.parse().ok())
            .unwrap_or(0),
        modified: header_str(headers, LAST_MODIFIED)
            .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
            .map(|date| date.with_timezone(&Utc)),
        etag: header_str(headers, ETAG).map(str::to_string),
        is_dir: false,
        blob_kind: None,
        properties,
    }
}

#[async_trait]
impl StorageDriver for HttpDriver {
    fn name(&self) -> &str {
        "http"
    }

    fn capabilities(&self) -> Capability {
        Capability {
            can_range_read: true,
            ..Default::default()
        }
    }

    fn roots(&self) -> Vec<Root> {
        vec![Root::prefix("http://"), Root::prefix("https://")]
    }

    /// The full URL is the object path
    fn relpath(&self, _root: &Root, name: &str) -> String {
        name.to_string()
    }

    async fn head_object(&self, path: &str) -> Result<ObjectMeta> {
        let response = self
            .client
            .head(path)
            .send()
            .await
            .with_context(|| format!("HTTP HEAD {}", path))?;
        check_status(response.status(), path)?;
        Ok(meta_from_headers(response.headers()))
    }

    async fn read_range(&self, path: &str, start: u64, end: Option<u64>) -> Result<Bytes> {
        if matches!(end, Some(end) if end <= start) {
            return Ok(Bytes::new());
        }
        let range = match end {
            Some(end) => format!("bytes={}-{}", start, end - 1),
            None => format!("bytes={}-", start),
        };
        let response = self
            .client
            .get(path)
            .header(RANGE, range)
            .send()
            .await
            .with_context(|| format!("HTTP GET {}", path))?;

        let status = response.status();
        if status == StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(Bytes::new());
        }
        check_status(status, path)?;
        let body = response
            .bytes()
            .await
            .with_context(|| format!("HTTP GET {}", path))?;

        if status == StatusCode::PARTIAL_CONTENT {
            return Ok(body);
        }
        // server ignored the range and sent the whole object
        let len = body.len() as u64;
        let from = start.min(len) as usize;
        let to = end.unwrap_or(len).min(len) as usize;
        Ok(body.slice(from..to.max(from)))
    }

    async fn read_all(&self, path: &str) -> Result<Bytes> {
        let response = self
            .client
            .get(path)
            .send()
            .await
            .with_context(|| format!("HTTP GET {}", path))?;
        check_status(response.status(), path)?;
        Ok(response
            .bytes()
            .await
            .with_context(|| format!("HTTP GET {}", path))?)
    }
}
