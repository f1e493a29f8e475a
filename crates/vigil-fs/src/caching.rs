//! Caching decorator for file providers.

use std::{num::NonZeroUsize, sync::Arc};

use lru::LruCache;
use parking_lot::Mutex;
use vigil_token::{ChangeToken, ChangeTokenExt as _, Subscription};

use crate::{DirectoryContents, FileInfo, FileProvider};

/// Cache capacity used when none is configured, per cache.
pub const DEFAULT_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(512) {
    Some(n) => n,
    None => unreachable!(),
};

/// Caches metadata and directory lookups of a wrapped provider.
///
/// Two bounded LRU caches, file infos and directory listings, keyed by the case-sensitive
/// subpath. With an invalidation filter the provider watches the base and clears both caches
/// every time the token fires. Watch calls always delegate to the base provider.
pub struct CachingFileProvider {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    base: Arc<dyn FileProvider>,
    files: Mutex<LruCache<String, FileInfo>>,
    dirs: Mutex<LruCache<String, DirectoryContents>>,
    invalidation_filter: Option<String>,
    watch: Mutex<WatchState>,
}

#[derive(Default)]
struct WatchState {
    armed: bool,
    _sub: Option<Subscription>,
}

impl CachingFileProvider {
    /// New cache over `base` with the [`DEFAULT_CACHE_CAPACITY`] and no invalidation.
    pub fn new(base: Arc<dyn FileProvider>) -> Self {
        Self::with_capacity(base, DEFAULT_CACHE_CAPACITY)
    }

    /// New cache over `base` bounded to `capacity` entries per cache.
    pub fn with_capacity(base: Arc<dyn FileProvider>, capacity: NonZeroUsize) -> Self {
        Self::new_inner(base, None, capacity)
    }

    /// New cache that clears itself every time `base.watch(invalidation_filter)` fires.
    pub fn with_invalidation(base: Arc<dyn FileProvider>, invalidation_filter: impl Into<String>, capacity: NonZeroUsize) -> Self {
        Self::new_inner(base, Some(invalidation_filter.into()), capacity)
    }

    fn new_inner(base: Arc<dyn FileProvider>, invalidation_filter: Option<String>, capacity: NonZeroUsize) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                base,
                files: Mutex::new(LruCache::new(capacity)),
                dirs: Mutex::new(LruCache::new(capacity)),
                invalidation_filter,
                watch: Mutex::new(WatchState::default()),
            }),
        }
    }

    /// The wrapped provider.
    pub fn base(&self) -> &Arc<dyn FileProvider> {
        &self.inner.base
    }
}
impl FileProvider for CachingFileProvider {
    fn get_file_info(&self, subpath: &str) -> FileInfo {
        ensure_invalidation(&self.inner);

        if let Some(hit) = self.inner.files.lock().get(subpath) {
            return hit.clone();
        }
        let info = self.inner.base.get_file_info(subpath);
        self.inner.files.lock().put(subpath.to_owned(), info.clone());
        info
    }

    fn get_directory_contents(&self, subpath: &str) -> DirectoryContents {
        ensure_invalidation(&self.inner);

        if let Some(hit) = self.inner.dirs.lock().get(subpath) {
            return hit.clone();
        }
        let dir = self.inner.base.get_directory_contents(subpath);
        self.inner.dirs.lock().put(subpath.to_owned(), dir.clone());
        dir
    }

    fn watch(&self, filter: &str) -> Arc<dyn ChangeToken> {
        self.inner.base.watch(filter)
    }
}

/// Subscribe the cache clear to the base provider's token.
///
/// Tokens are single-use, the subscription disarms on fire and the next lookup re-arms with a
/// fresh token. The watch lock is never held across base calls, a token that fires during
/// registration invokes the callback synchronously on this thread.
fn ensure_invalidation(inner: &Arc<CacheInner>) {
    let Some(filter) = &inner.invalidation_filter else {
        return;
    };
    {
        let mut watch = inner.watch.lock();
        if watch.armed {
            return;
        }
        watch.armed = true;
    }

    let token = inner.base.watch(filter);
    if !token.active_callbacks() {
        // the base can never notify, stay armed without a subscription
        return;
    }
    if token.has_changed() {
        clear(inner);
        inner.watch.lock().armed = false;
        return;
    }

    let weak = Arc::downgrade(inner);
    let sub = token.on_change(move || {
        if let Some(inner) = weak.upgrade() {
            clear(&inner);
            let mut watch = inner.watch.lock();
            watch.armed = false;
            watch._sub = None;
        }
    });

    let mut watch = inner.watch.lock();
    if watch.armed {
        watch._sub = Some(sub);
    }
}

fn clear(inner: &CacheInner) {
    inner.files.lock().clear();
    inner.dirs.lock().clear();
}
