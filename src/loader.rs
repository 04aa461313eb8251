use std::fs;
use std::io;
use std::path::Path;
use std::sync::{Arc, LazyLock};

use anyhow::{Context, Result};
use dashmap::DashMap;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::HamlError;
use crate::options::LoaderOptions;
use crate::tpl::cache::TemplateCache;
use crate::tpl::engine::{Renderer, compile};

/// Process-wide loader rooted at the current directory.
pub static LOADER: LazyLock<Loader> = LazyLock::new(|| Loader::new(LoaderOptions::default()));

/// Resolves template identifiers to cached renderers. Sources come from
/// registered in-memory assets first, then from files under the root.
pub struct Loader {
    options: LoaderOptions,
    assets: DashMap<String, String>,
    cache: TemplateCache,
}

impl Loader {
    pub fn new(options: LoaderOptions) -> Self {
        Self {
            options,
            assets: DashMap::new(),
            cache: TemplateCache::new(),
        }
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    pub fn get_renderer(&self, id: &str) -> Result<Arc<Renderer>, HamlError> {
        self.cache.get_or_compile(id, || {
            let source = self.read_source(id)?;
            self.build(id, &source)
        })
    }

    /// Like [`Loader::get_renderer`], reading template files without blocking.
    pub async fn get_renderer_async(&self, id: &str) -> Result<Arc<Renderer>, HamlError> {
        if let Some(renderer) = self.cache.get(id) {
            return Ok(renderer);
        }
        let source = match self.asset(id) {
            Some(source) => source,
            None => {
                let path = self.options.root.join(id);
                tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| io_error(id, e))?
            }
        };
        self.cache.get_or_compile(id, || self.build(id, &source))
    }

    /// Registers an in-memory template. A cached renderer for the same
    /// identifier is evicted once the new source is visible.
    pub fn register(&self, id: impl Into<String>, source: impl Into<String>) {
        let id = id.into();
        self.assets.insert(id.clone(), source.into());
        self.cache.remove(&id);
    }

    pub fn register_assets<I, K, V>(&self, assets: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (id, source) in assets {
            self.register(id, source);
        }
    }

    /// Compiles every template file under `dir`, keyed by its path relative
    /// to `dir` with `/` separators. Returns how many were loaded.
    pub fn load_from_path(&self, dir: &Path) -> Result<usize> {
        let mut loaded = 0;
        for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
            let path = entry.path();
            let matches = path
                .extension()
                .is_some_and(|ext| ext == self.options.extension.as_str());
            if !path.is_file() || !matches {
                continue;
            }
            let relative = path.strip_prefix(dir).unwrap_or(path);
            let id = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let source = fs::read_to_string(path)
                .with_context(|| format!("failed to read template file: {}", path.display()))?;
            self.register(id.clone(), source);
            self.get_renderer(&id)
                .with_context(|| format!("failed to compile template: {}", path.display()))?;
            loaded += 1;
        }
        debug!(dir = %dir.display(), loaded, "loaded templates");
        Ok(loaded)
    }

    /// Evicts one cached renderer; its source stays registered.
    pub fn remove(&self, id: &str) -> bool {
        self.cache.remove(id)
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }

    fn asset(&self, id: &str) -> Option<String> {
        self.assets.get(id).map(|s| s.value().clone())
    }

    fn read_source(&self, id: &str) -> Result<String, HamlError> {
        if let Some(source) = self.asset(id) {
            return Ok(source);
        }
        fs::read_to_string(self.options.root.join(id)).map_err(|e| io_error(id, e))
    }

    fn build(&self, id: &str, source: &str) -> Result<Renderer, HamlError> {
        compile(id, source, &self.options.optimizer).map(Renderer::new)
    }
}

fn io_error(id: &str, e: io::Error) -> HamlError {
    if e.kind() == io::ErrorKind::NotFound {
        HamlError::TemplateNotFound(id.to_string())
    } else {
        HamlError::Io {
            id: id.to_string(),
            source: e,
        }
    }
}

/// Loads a renderer through the global loader.
pub fn get_renderer(id: &str) -> Result<Arc<Renderer>, HamlError> {
    LOADER.get_renderer(id)
}

/// Registers in-memory templates with the global loader.
pub fn register_assets<I, K, V>(assets: I)
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<String>,
{
    LOADER.register_assets(assets);
}

/// Compiles every template under `dir` into the global loader.
pub fn load_from_path(dir: &Path) -> Result<usize> {
    LOADER.load_from_path(dir)
}
