//! Root matching and object path helpers / 路径工具
//!
//! Relative paths handled here are what drivers receive: the object name with
//! its mount root removed, e.g. `bucket/dir/key` for `s3://bucket/dir/key`.
//! The first segment of a relative path is the *locator* (bucket, container,
//! host, ...).

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

static SCHEME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([A-Za-z][A-Za-z0-9+.\-]*)://").expect("scheme regex is valid")
});

/// Mount root: literal prefix or pattern anchored at the start of the path / 挂载根
#[derive(Debug, Clone)]
pub enum Root {
    Prefix(String),
    Pattern(Regex),
}

impl Root {
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Root::Prefix(prefix.into())
    }

    pub fn pattern(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(Root::Pattern)
            .map_err(|e| Error::Config(format!("invalid root pattern {:?}: {}", pattern, e)))
    }

    /// Comparable form used for ordering and equality
    pub fn as_str(&self) -> &str {
        match self {
            Root::Prefix(prefix) => prefix,
            Root::Pattern(regex) => regex.as_str(),
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        self.strip(path).is_some()
    }

    /// Remainder of `path` after the root, if the root applies
    pub fn strip<'a>(&self, path: &'a str) -> Option<&'a str> {
        match self {
            Root::Prefix(prefix) => path.strip_prefix(prefix.as_str()),
            Root::Pattern(regex) => regex
                .find(path)
                .filter(|m| m.start() == 0)
                .map(|m| &path[m.end()..]),
        }
    }

    /// Path relative to this root. `/` is stripped only at the start since a
    /// trailing `/` marks directories on most providers.
    pub fn relpath(&self, path: &str) -> String {
        self.strip(path).unwrap_or(path).trim_start_matches('/').to_string()
    }
}

impl PartialEq for Root {
    fn eq(&self, other: &Self) -> bool {
        matches!(
            (self, other),
            (Root::Prefix(_), Root::Prefix(_)) | (Root::Pattern(_), Root::Pattern(_))
        ) && self.as_str() == other.as_str()
    }
}

impl Eq for Root {}

impl fmt::Display for Root {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a path lives / 路径分类
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathKind {
    Local,
    Remote { provider: String },
}

/// Classify a path without touching any registry state.
///
/// Anything carrying a `scheme://` prefix is remote; the provider is the
/// lowercased scheme, with `https` served by the `http` provider.
pub fn classify_path(path: &str) -> PathKind {
    match infer_provider(path) {
        Some(provider) => PathKind::Remote { provider },
        None => PathKind::Local,
    }
}

pub fn infer_provider(path: &str) -> Option<String> {
    let scheme = SCHEME.captures(path)?.get(1)?.as_str().to_lowercase();
    if scheme == "https" {
        Some("http".to_string())
    } else {
        Some(scheme)
    }
}

/// True if the relative path designates a locator (bucket, container, ...)
pub fn is_locator(relative: &str) -> bool {
    !relative.is_empty() && !relative.trim_end_matches('/').contains('/')
}

/// Split a relative path into `(locator, key)`
pub fn split_locator(relative: &str) -> (&str, &str) {
    match relative.split_once('/') {
        Some((locator, key)) => (locator, key),
        None => (relative, ""),
    }
}

/// Directory form of a relative path: locators lose their trailing `/`,
/// other non-empty paths gain one.
pub fn ensure_dir_path(relative: &str) -> String {
    if is_locator(relative) {
        relative.trim_end_matches('/').to_string()
    } else if relative.is_empty() {
        String::new()
    } else {
        format!("{}/", relative.trim_end_matches('/'))
    }
}

/// Last path segment, ignoring a trailing `/`
pub fn basename(path: &str) -> &str {
    path.trim_end_matches('/').rsplit('/').next().unwrap_or("")
}
