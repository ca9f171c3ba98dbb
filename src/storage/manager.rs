use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use super::path::{self, PathKind, Root};
use super::{DriverBox, DriverConfig};
use crate::config::{EngineConfig, MountConfig};
use crate::error::{Error, Result};
use crate::io::{BufferedOptions, BufferedStream, ObjectStream, ObjectTarget, OpenMode, OpenOptions, RawStream, StreamKind};

/// Driver factory trait / 驱动工厂 trait
pub trait DriverFactory: Send + Sync {
    /// Provider name, also the URL scheme it is inferred from / 驱动类型名称
    fn driver_type(&self) -> &'static str;

    /// Create a driver instance / 创建驱动实例
    fn create_driver(&self, config: &DriverConfig) -> Result<DriverBox>;
}

/// One mounted root and the cached driver serving it / 挂载项
#[derive(Clone)]
pub struct MountEntry {
    pub root: Root,
    pub provider: String,
    /// Cached instance shared by every root of the same mount
    pub driver: DriverBox,
    pub config: DriverConfig,
    /// All roots mounted together with this one
    pub roots: Arc<Vec<Root>>,
}

impl fmt::Debug for MountEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountEntry")
            .field("root", &self.root)
            .field("provider", &self.provider)
            .field("driver", &self.driver.name())
            .field("config", &self.config)
            .finish()
    }
}

/// Mount parameters / 挂载参数
#[derive(Debug, Clone, Default)]
pub struct MountRequest {
    /// Provider name; inferred from the URL scheme of `name` when absent
    pub provider: Option<String>,
    /// Path or URL the mount is for
    pub name: String,
    pub config: DriverConfig,
    /// Additional root, e.g. a short alias for a long endpoint URL
    pub extra_root: Option<Root>,
}

impl MountRequest {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn config(mut self, config: DriverConfig) -> Self {
        self.config = config;
        self
    }

    pub fn extra_root(mut self, root: Root) -> Self {
        self.extra_root = Some(root);
        self
    }
}

/// Result of a path lookup / 路径解析结果
#[derive(Clone)]
pub struct Resolved {
    pub driver: DriverBox,
    /// Full name as given by the caller
    pub name: String,
    /// Driver-relative path
    pub path: String,
    pub root: Root,
    pub provider: String,
    /// Effective configuration of `driver`
    pub config: DriverConfig,
    /// True when `driver` is the registry's cached instance
    pub cached: bool,
}

impl fmt::Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolved")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("root", &self.root)
            .field("provider", &self.provider)
            .field("cached", &self.cached)
            .finish()
    }
}

/// Mount registry (routes paths to driver instances) / 挂载注册表
///
/// Mounting and resolving share one lock, so a resolve that has to mount
/// implicitly is atomic with respect to other lookups.
pub struct Registry {
    factories: RwLock<HashMap<String, Arc<dyn DriverFactory>>>,
    /// Sorted: longer roots first
    mounted: Mutex<Vec<MountEntry>>,
    engine: EngineConfig,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_engine(EngineConfig::default())
    }

    pub fn with_engine(engine: EngineConfig) -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
            mounted: Mutex::new(Vec::new()),
            engine,
        }
    }

    /// Registry with every bundled driver registered / 注册所有内置驱动
    pub fn with_default_drivers(engine: EngineConfig) -> Self {
        let registry = Self::with_engine(engine);
        crate::drivers::register_all(&registry);
        registry
    }

    pub fn engine(&self) -> &EngineConfig {
        &self.engine
    }

    /// Register driver factory / 注册驱动工厂
    pub fn register_factory(&self, factory: Arc<dyn DriverFactory>) {
        let driver_type = factory.driver_type().to_string();
        self.factories.write().insert(driver_type.clone(), factory);
        tracing::info!("Driver factory registered: {}", driver_type);
    }

    /// List all available driver types / 列出所有可用的驱动类型
    pub fn driver_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.read().keys().cloned().collect();
        types.sort();
        types
    }

    fn factory(&self, provider: &str) -> Result<Arc<dyn DriverFactory>> {
        self.factories
            .read()
            .get(provider)
            .cloned()
            .ok_or_else(|| Error::ProviderNotFound(provider.to_string()))
    }

    /// Mount a storage / 挂载存储
    pub fn mount(&self, request: MountRequest) -> Result<MountEntry> {
        let mut mounted = self.mounted.lock();
        self.mount_locked(&mut mounted, request)
    }

    /// Mount every configured storage / 挂载配置中的存储
    pub fn mount_all(&self, mounts: &[MountConfig]) -> Result<()> {
        for mount in mounts {
            self.mount(mount.to_request()?)?;
        }
        Ok(())
    }

    fn mount_locked(&self, mounted: &mut Vec<MountEntry>, request: MountRequest) -> Result<MountEntry> {
        let provider = match request.provider {
            Some(provider) => provider.to_lowercase(),
            None => path::infer_provider(&request.name).ok_or_else(|| {
                Error::Config(format!(
                    "no storage specified and unable to infer it from {:?}",
                    request.name
                ))
            })?,
        };

        let factory = self.factory(&provider)?;
        let driver = factory.create_driver(&request.config)?;

        let mut roots = driver.roots();
        if let Some(extra) = request.extra_root {
            roots.push(extra);
        }
        if roots.is_empty() {
            return Err(Error::Config(format!("driver {} declares no root", provider)));
        }
        let roots = Arc::new(roots);

        for root in roots.iter() {
            mounted.retain(|entry| entry.root != *root);
            mounted.push(MountEntry {
                root: root.clone(),
                provider: provider.clone(),
                driver: driver.clone(),
                config: request.config.clone(),
                roots: roots.clone(),
            });
        }
        sort_mounts(mounted);

        tracing::info!(
            "Storage mounted: {} ({})",
            roots.iter().map(|r| r.as_str()).collect::<Vec<_>>().join(", "),
            provider
        );

        let entry = mounted
            .iter()
            .find(|entry| Arc::ptr_eq(&entry.roots, &roots) && entry.root.matches(&request.name))
            .or_else(|| mounted.iter().find(|entry| Arc::ptr_eq(&entry.roots, &roots)))
            .cloned()
            .ok_or_else(|| Error::Config(format!("mount of {} produced no entry", provider)))?;
        Ok(entry)
    }

    /// Resolve a path to its driver / 根据路径解析到对应的驱动
    ///
    /// Without `config`, or with a config equal to the mounted one, the
    /// cached driver is returned. A different config builds a fresh driver
    /// from the caller keys merged over the mounted config; the cache is left
    /// untouched.
    pub fn resolve(&self, name: &str, config: Option<&DriverConfig>) -> Result<Resolved> {
        let entry = {
            let mut mounted = self.mounted.lock();
            match mounted.iter().find(|entry| entry.root.matches(name)).cloned() {
                Some(entry) => entry,
                None => {
                    let request = MountRequest::new(name).config(config.cloned().unwrap_or_default());
                    self.mount_locked(&mut mounted, request)?;
                    mounted
                        .iter()
                        .find(|entry| entry.root.matches(name))
                        .cloned()
                        .ok_or_else(|| {
                            Error::Config(format!("no mounted root matches {:?}", name))
                        })?
                }
            }
        };

        let (driver, config, cached) = match config {
            Some(config) if !config.is_empty() && *config != entry.config => {
                let merged = config.merged_over(&entry.config);
                let driver = self.factory(&entry.provider)?.create_driver(&merged)?;
                tracing::debug!("Fresh {} driver for {} (config differs from mount)", entry.provider, name);
                (driver, merged, false)
            }
            _ => (entry.driver.clone(), entry.config.clone(), true),
        };

        Ok(Resolved {
            path: driver.relpath(&entry.root, name),
            driver,
            name: name.to_string(),
            root: entry.root,
            provider: entry.provider,
            config,
            cached,
        })
    }

    /// Open an object stream / 打开对象流
    pub async fn open(&self, name: &str, options: OpenOptions) -> Result<ObjectStream> {
        let mode = OpenMode::parse(&options.mode)?;
        let resolved = self.resolve(name, options.config.as_ref())?;
        let target = ObjectTarget::from(resolved);

        let stream: ObjectStream = match options.kind {
            StreamKind::Raw => Box::new(RawStream::open(target, mode, options.blob_kind).await?),
            StreamKind::Buffered => {
                let settings = BufferedOptions {
                    buffer_size: options.buffer_size.unwrap_or(self.engine.buffer_size),
                    max_buffers: options.max_buffers.unwrap_or(self.engine.max_buffers),
                    max_workers: options.max_workers.or(self.engine.max_workers),
                    blob_kind: options.blob_kind,
                };
                Box::new(BufferedStream::open(target, mode, settings).await?)
            }
        };
        Ok(stream)
    }

    /// Remove a mounted root, returns whether it existed / 卸载
    pub fn unmount(&self, root: &str) -> bool {
        let mut mounted = self.mounted.lock();
        let before = mounted.len();
        mounted.retain(|entry| entry.root.as_str() != root);
        let removed = mounted.len() != before;
        if removed {
            tracing::info!("Storage unmounted: {}", root);
        }
        removed
    }

    /// Drop every mount (factories stay registered)
    pub fn reset(&self) {
        self.mounted.lock().clear();
    }

    /// Mounted entries in lookup order / 列出挂载项
    pub fn mounts(&self) -> Vec<MountEntry> {
        self.mounted.lock().clone()
    }

    /// True if `name` is served by a mounted root or looks like a storage URL
    pub fn is_storage(&self, name: &str) -> bool {
        self.mounted.lock().iter().any(|entry| entry.root.matches(name))
            || matches!(path::classify_path(name), PathKind::Remote { .. })
    }
}

/// Longer (more specific) roots first; equal lengths in descending order
fn sort_mounts(mounted: &mut [MountEntry]) {
    mounted.sort_by(|a, b| {
        b.root
            .as_str()
            .len()
            .cmp(&a.root.as_str().len())
            .then_with(|| b.root.as_str().cmp(a.root.as_str()))
    });
}
