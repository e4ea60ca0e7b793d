// Copyright The OpenTelemetry Authors
// SPDX-License-Identifier: Apache-2.0

//! Process-wide cache of loaded images.
//!
//! Loading an image parses the whole `.debug_info` section, so it is done at
//! most once per path. The cache holds a single lock across the
//! load-or-fetch step: concurrent callers asking for the same path wait for
//! the first load and then share its result.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::{fmt, fs};

use crate::{debug, DebugImage, LoadError};

/// Function used by an [`ImageCache`] to load images.
type Loader = dyn Fn(&Path) -> Result<DebugImage, LoadError> + Send + Sync;

/// Cache mapping file paths to loaded images.
///
/// Paths are canonicalized before the lookup so that different spellings of
/// the same path share one entry. Failed loads are not cached: the next call
/// for the same path tries again.
pub struct ImageCache {
    images: Mutex<HashMap<PathBuf, Arc<DebugImage>>>,
    loader: Box<Loader>,
    loads: AtomicUsize,
}

impl fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageCache")
            .field("images", &self.len())
            .field("loads", &self.load_count())
            .finish()
    }
}

impl Default for ImageCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ImageCache {
    /// Create an empty cache that loads images via [`DebugImage::load`].
    pub fn new() -> Self {
        Self::with_loader(|path| DebugImage::load(path))
    }

    /// Create an empty cache with a custom loader function.
    pub fn with_loader(
        loader: impl Fn(&Path) -> Result<DebugImage, LoadError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            images: Mutex::new(HashMap::new()),
            loader: Box::new(loader),
            loads: AtomicUsize::new(0),
        }
    }

    /// Get the image for the given path, loading it on first use.
    pub fn get(&self, path: impl AsRef<Path>) -> Result<Arc<DebugImage>, LoadError> {
        let path = path.as_ref();
        let key = cache_key(path);

        // Loaders don't panic while holding the lock in practice, but if they
        // did the map itself is still consistent.
        let mut images = self.images.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(image) = images.get(&key) {
            return Ok(Arc::clone(image));
        }

        debug!("loading debug info from `{}`", key.display());
        self.loads.fetch_add(1, Ordering::Relaxed);
        let image = Arc::new((self.loader)(path)?);
        images.insert(key, Arc::clone(&image));

        Ok(image)
    }

    /// Checks whether an image for the given path is cached.
    pub fn contains(&self, path: impl AsRef<Path>) -> bool {
        let key = cache_key(path.as_ref());
        let images = self.images.lock().unwrap_or_else(PoisonError::into_inner);
        images.contains_key(&key)
    }

    /// Number of cached images.
    pub fn len(&self) -> usize {
        let images = self.images.lock().unwrap_or_else(PoisonError::into_inner);
        images.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of times the loader was invoked, including failed attempts.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }
}

/// Canonical form of a path, or the path itself if it can't be resolved.
fn cache_key(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_owned())
}

/// Process-wide cache used by [`open_image`].
pub fn global() -> &'static ImageCache {
    static CACHE: OnceLock<ImageCache> = OnceLock::new();
    CACHE.get_or_init(ImageCache::new)
}

/// Open the image at the given path through the process-wide cache.
///
/// Repeated calls with the same path return the same [`DebugImage`]
/// instance without parsing the file again.
pub fn open_image(path: impl AsRef<Path>) -> Result<Arc<DebugImage>, LoadError> {
    global().get(path)
}
