//! Cached module metadata resolution.
//!
//! [`ModuleResolver`] turns a `(source, kind)` pair into a [`ModuleInfo`].
//! Results are cached per pair and remote packages are cached per package
//! address, so modules sharing a repository trigger a single download. Both
//! caches are safe under concurrent use: callers racing on the same key wait
//! for one in-flight load instead of starting their own. Failed loads are not
//! cached.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use super::fetcher::FetcherRegistry;
use super::info::ModuleInfo;
use super::metadata::get_metadata_safe;
use super::reader::ReaderRegistry;
use super::source::{classify, split_package, SourceKind};
use crate::config::ModuleKind;
use crate::error::{ClusterkitError, ConfigError, FetchError, Result};

/// Environment variable overriding the embedded module tree location.
pub const MODULES_ROOT_ENV: &str = "CLUSTERKIT_MODULES_ROOT";

/// Directory name of a package inside its download directory.
const PACKAGE_DIR: &str = "module";

type InfoCell = Arc<OnceCell<Arc<ModuleInfo>>>;
type DownloadCell = Arc<OnceCell<Arc<TempDir>>>;

/// Resolves and caches module schemas.
#[derive(Debug)]
pub struct ModuleResolver {
    /// Root of the embedded module tree.
    embedded_root: PathBuf,
    /// Remote package fetchers.
    fetchers: FetcherRegistry,
    /// Schema readers per kind.
    readers: ReaderRegistry,
    /// `(source, kind)` -> schema.
    info_cache: Mutex<HashMap<(String, ModuleKind), InfoCell>>,
    /// Package address -> download directory.
    downloads: Mutex<HashMap<String, DownloadCell>>,
}

/// Returns the embedded module root from the environment, falling back to the
/// user data directory.
#[must_use]
pub fn embedded_root_from_env() -> PathBuf {
    std::env::var_os(MODULES_ROOT_ENV).map_or_else(
        || {
            dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("clusterkit")
        },
        PathBuf::from,
    )
}

impl Default for ModuleResolver {
    fn default() -> Self {
        Self::new(embedded_root_from_env())
    }
}

impl ModuleResolver {
    /// Creates a resolver with the default fetchers and readers.
    #[must_use]
    pub fn new(embedded_root: impl Into<PathBuf>) -> Self {
        Self {
            embedded_root: embedded_root.into(),
            fetchers: FetcherRegistry::default(),
            readers: ReaderRegistry::default(),
            info_cache: Mutex::new(HashMap::new()),
            downloads: Mutex::new(HashMap::new()),
        }
    }

    /// Replaces the fetchers.
    #[must_use]
    pub fn with_fetchers(mut self, fetchers: FetcherRegistry) -> Self {
        self.fetchers = fetchers;
        self
    }

    /// Replaces the readers.
    #[must_use]
    pub fn with_readers(mut self, readers: ReaderRegistry) -> Self {
        self.readers = readers;
        self
    }

    /// Returns the embedded module root.
    #[must_use]
    pub fn embedded_root(&self) -> &Path {
        &self.embedded_root
    }

    /// Seeds the schema cache for a `(source, kind)` pair.
    pub async fn set_info(&self, source: &str, kind: ModuleKind, info: ModuleInfo) {
        let cell = Arc::new(OnceCell::new_with(Some(Arc::new(info))));
        self.info_cache
            .lock()
            .await
            .insert((source.to_string(), kind), cell);
    }

    /// Resolves the schema of a module.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be located, downloaded or read.
    pub async fn get_info(&self, source: &str, kind: ModuleKind) -> Result<Arc<ModuleInfo>> {
        let cell = {
            let mut cache = self.info_cache.lock().await;
            Arc::clone(
                cache
                    .entry((source.to_string(), kind))
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        cell.get_or_try_init(|| self.load(source, kind))
            .await
            .map(Arc::clone)
    }

    async fn load(&self, source: &str, kind: ModuleKind) -> Result<Arc<ModuleInfo>> {
        let module_dir = match classify(source) {
            SourceKind::Embedded => self.embedded_root.join(source),
            SourceKind::Local => {
                if self.is_under_embedded_root(Path::new(source)) {
                    return Err(ConfigError::EmbeddedLocalPath {
                        source_path: source.to_string(),
                    }
                    .into());
                }
                PathBuf::from(source)
            }
            SourceKind::Remote => {
                let (package, subdir) = split_package(source);
                let download = self.download(&package).await.map_err(|err| match err {
                    ClusterkitError::Fetch(inner)
                        if kind == ModuleKind::Packer && !subdir.is_empty() =>
                    {
                        ClusterkitError::Fetch(FetchError::PackerSubdir {
                            source_addr: source.to_string(),
                            inner: Box::new(inner),
                        })
                    }
                    other => other,
                })?;
                download.path().join(PACKAGE_DIR).join(subdir)
            }
        };

        debug!("Reading {kind} module {source} from {}", module_dir.display());
        let reader = self.readers.get(kind);
        let info = tokio::task::spawn_blocking(move || {
            let mut info = reader.get_info(&module_dir)?;
            info.metadata = get_metadata_safe(&module_dir);
            Ok::<_, ClusterkitError>(info)
        })
        .await
        .map_err(|e| ClusterkitError::internal(format!("module reader task failed: {e}")))??;

        Ok(Arc::new(info))
    }

    async fn download(&self, package: &str) -> Result<Arc<TempDir>> {
        let cell = {
            let mut downloads = self.downloads.lock().await;
            Arc::clone(
                downloads
                    .entry(package.to_string())
                    .or_insert_with(|| Arc::new(OnceCell::new())),
            )
        };

        cell.get_or_try_init(|| async {
            let tmp = tempfile::Builder::new()
                .prefix("module-")
                .tempdir()
                .map_err(|e| FetchError::io("failed to create download directory", e))?;
            info!("Downloading module package {package}");
            self.fetchers
                .fetch(package, &tmp.path().join(PACKAGE_DIR))
                .await?;
            Ok::<_, ClusterkitError>(Arc::new(tmp))
        })
        .await
        .map(Arc::clone)
    }

    fn is_under_embedded_root(&self, path: &Path) -> bool {
        let (Ok(root), Ok(path)) = (self.embedded_root.canonicalize(), path.canonicalize()) else {
            return false;
        };
        path.starts_with(root)
    }
}
