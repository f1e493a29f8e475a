//! Polling change detection, for file systems without usable OS events.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, SystemTime},
};

use dashmap::DashMap;
use parking_lot::Mutex;
use path_absolutize::Absolutize as _;
use sha2::{Digest as _, Sha256};
use vigil_token::{CancellationSource, ChangeCallback, ChangeToken, NoopChangeToken, Subscription};

use crate::filter::{self, PathMatcher};

/// Interval between polling scans when none is configured.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(4);

/// Enforced lower bound for the polling interval.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Source of "now", injectable for tests.
pub trait Clock: Send + Sync {
    /// Current UTC time.
    fn utc_now(&self) -> SystemTime;
}

/// The real time [`Clock`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;
impl Clock for SystemClock {
    fn utc_now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// One-shot token that reports a change when the tracked file's last-write time moves away
/// from the snapshot taken at construction.
///
/// The token never scans on its own, [`update_has_changed`] is driven by the owning
/// [`PollingFileWatcher`] timer. Reading [`has_changed`] is I/O free.
///
/// [`update_has_changed`]: PollingFileChangeToken::update_has_changed
/// [`has_changed`]: ChangeToken::has_changed
pub struct PollingFileChangeToken {
    path: PathBuf,
    initial_write_utc: Option<SystemTime>,
    changed: AtomicBool,
    source: CancellationSource,
}
impl PollingFileChangeToken {
    /// New token tracking `path`, backed by the watcher owned `source`.
    ///
    /// Snapshots the file's current last-write time, an absent file snapshots as "never".
    pub fn new(path: impl Into<PathBuf>, source: CancellationSource) -> Self {
        let path = path.into();
        Self {
            initial_write_utc: last_write_utc(&path),
            path,
            changed: AtomicBool::new(false),
            source,
        }
    }

    /// Refresh the file's last-write time and accumulate the change flag.
    ///
    /// Once the flag is set it stays set, further scans are skipped.
    pub fn update_has_changed(&self) -> bool {
        if self.changed.load(Ordering::SeqCst) {
            return true;
        }
        if last_write_utc(&self.path) != self.initial_write_utc {
            self.changed.store(true, Ordering::SeqCst);
        }
        self.changed.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.source.cancel();
    }
}
impl ChangeToken for PollingFileChangeToken {
    fn has_changed(&self) -> bool {
        self.changed.load(Ordering::SeqCst)
    }

    fn active_callbacks(&self) -> bool {
        true
    }

    fn register_callback(&self, callback: ChangeCallback) -> Subscription {
        self.source.token().register_callback(callback)
    }
}

fn last_write_utc(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// One-shot token that reports a change when the set of files matching a pattern changes in
/// identity or last-write time.
///
/// Each scan enumerates the matched files in a fixed case-insensitive order and hashes
/// `(path, last-write)` pairs, a different digest or a write newer than the previous scan
/// sets the change flag. The first scan only establishes the baseline and never reports a
/// change. Like [`PollingFileChangeToken`] the scan is driven by the watcher timer.
pub struct PollingWildCardChangeToken {
    root: PathBuf,
    matcher: PathMatcher,
    clock: Arc<dyn Clock>,
    scan: Mutex<ScanState>,
    changed: AtomicBool,
    source: CancellationSource,
}

struct ScanState {
    last_scan_utc: SystemTime,
    previous_hash: Option<[u8; 32]>,
}

impl PollingWildCardChangeToken {
    /// New token matching `pattern` under `root`, backed by the watcher owned `source`.
    pub fn new(
        root: impl Into<PathBuf>,
        pattern: &str,
        clock: Arc<dyn Clock>,
        source: CancellationSource,
    ) -> Result<Self, glob::PatternError> {
        let last_scan_utc = clock.utc_now();
        Ok(Self {
            root: root.into(),
            matcher: PathMatcher::compile(pattern)?,
            clock,
            scan: Mutex::new(ScanState {
                last_scan_utc,
                previous_hash: None,
            }),
            changed: AtomicBool::new(false),
            source,
        })
    }

    /// Scan the matched file set and accumulate the change flag.
    pub fn update_has_changed(&self) -> bool {
        if self.changed.load(Ordering::SeqCst) {
            return true;
        }

        let mut scan = self.scan.lock();

        let mut files: Vec<(String, SystemTime)> = vec![];
        for item in walkdir::WalkDir::new(&self.root).min_depth(1).into_iter().flatten() {
            if !item.file_type().is_file() {
                continue;
            }
            let Ok(relative) = item.path().strip_prefix(&self.root) else {
                continue;
            };
            let relative = filter::normalize_event_path(relative);
            if !self.matcher.matches(&relative) {
                continue;
            }
            let Some(modified) = item.metadata().ok().and_then(|m| m.modified().ok()) else {
                continue;
            };
            files.push((relative, modified));
        }
        // deterministic order, enumeration order is OS dependent
        files.sort_by_cached_key(|(path, _)| path.to_lowercase());

        let mut changed = false;
        let mut hasher = Sha256::new();
        for (path, modified) in &files {
            if *modified > scan.last_scan_utc {
                changed = true;
            }
            for unit in path.encode_utf16() {
                hasher.update(unit.to_le_bytes());
            }
            hasher.update(HASH_SEPARATOR);
            hasher.update(write_time_ticks(*modified).to_le_bytes());
            hasher.update(HASH_SEPARATOR);
        }
        let hash: [u8; 32] = hasher.finalize().into();

        match &scan.previous_hash {
            Some(previous) => {
                if *previous != hash {
                    changed = true;
                }
            }
            // first scan establishes the baseline
            None => changed = false,
        }

        scan.previous_hash = Some(hash);
        scan.last_scan_utc = self.clock.utc_now();
        drop(scan);

        if changed {
            self.changed.store(true, Ordering::SeqCst);
        }
        self.changed.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.source.cancel();
    }
}
impl ChangeToken for PollingWildCardChangeToken {
    fn has_changed(&self) -> bool {
        self.changed.load(Ordering::SeqCst)
    }

    fn active_callbacks(&self) -> bool {
        true
    }

    fn register_callback(&self, callback: ChangeCallback) -> Subscription {
        self.source.token().register_callback(callback)
    }
}

const HASH_SEPARATOR: [u8; 2] = [b'|', 0];

fn write_time_ticks(t: SystemTime) -> u64 {
    // 100ns ticks since the unix epoch, pre-epoch times saturate to zero
    match t.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => (d.as_nanos() / 100) as u64,
        Err(_) => 0,
    }
}

/// Watches a directory by periodically evaluating polling tokens.
///
/// Fulfils the same token contract as [`PhysicalFilesWatcher`] without OS events, a worker
/// thread ticks every [`interval`] and evaluates every registered token, firing and removing
/// the ones that report a change.
///
/// [`PhysicalFilesWatcher`]: crate::PhysicalFilesWatcher
/// [`interval`]: PollingFileWatcher::interval
pub struct PollingFileWatcher {
    shared: Arc<PollShared>,
    interval: Duration,
    stop: flume::Sender<()>,
    worker: Option<thread::JoinHandle<()>>,
}

struct PollShared {
    root: PathBuf,
    clock: Arc<dyn Clock>,
    tokens: DashMap<String, PolledToken>,
}

impl PollingFileWatcher {
    /// New watcher over `root` with the [`DEFAULT_POLL_INTERVAL`].
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_interval(root, DEFAULT_POLL_INTERVAL)
    }

    /// New watcher over `root` ticking every `interval`.
    ///
    /// The interval is clamped to [`MIN_POLL_INTERVAL`].
    pub fn with_interval(root: impl Into<PathBuf>, interval: Duration) -> Self {
        Self::with_clock(root, interval, Arc::new(SystemClock))
    }

    /// New watcher with an injected clock, scan times are read from it.
    pub fn with_clock(root: impl Into<PathBuf>, interval: Duration, clock: Arc<dyn Clock>) -> Self {
        let root = root.into();
        let root = match root.absolutize() {
            Ok(r) => r.into_owned(),
            Err(e) => {
                tracing::error!("cannot absolutize `{}`, {e}", root.display());
                root
            }
        };
        let interval = interval.max(MIN_POLL_INTERVAL);

        let shared = Arc::new(PollShared {
            root,
            clock,
            tokens: DashMap::new(),
        });

        let (stop, stopped) = flume::bounded(1);
        let worker = thread::Builder::new()
            .name("polling-watcher".into())
            .spawn({
                let shared = shared.clone();
                move || {
                    loop {
                        match stopped.recv_timeout(interval) {
                            Ok(()) | Err(flume::RecvTimeoutError::Disconnected) => return,
                            Err(flume::RecvTimeoutError::Timeout) => {}
                        }
                        shared.poll();
                    }
                }
            })
            .expect("failed to spawn polling-watcher thread");

        Self {
            shared,
            interval,
            stop,
            worker: Some(worker),
        }
    }

    /// The watched root directory.
    pub fn root(&self) -> &Path {
        &self.shared.root
    }

    /// The effective polling interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Gets a token that fires when a path selected by `filter` changes, detected by polling.
    ///
    /// Filters that contain `*` or end in a separator track the whole matched file set,
    /// everything else tracks a single file's last-write time. Registering the same filter
    /// again returns the stored token while it has not changed yet.
    ///
    /// Absolute filters and filters that escape the root return the no-op token.
    pub fn watch(&self, filter: &str) -> Arc<dyn ChangeToken> {
        let Some(filter) = filter::normalize_filter(filter) else {
            tracing::debug!("invalid watch filter `{filter}`, no-op token");
            return NoopChangeToken::shared();
        };

        use dashmap::mapref::entry::Entry;
        match self.shared.tokens.entry(filter.clone()) {
            Entry::Occupied(mut e) => {
                if !e.get().has_changed() {
                    return e.get().as_change_token();
                }
                match self.shared.new_token(&filter) {
                    Some(token) => {
                        e.insert(token.clone());
                        token.as_change_token()
                    }
                    None => NoopChangeToken::shared(),
                }
            }
            Entry::Vacant(e) => match self.shared.new_token(&filter) {
                Some(token) => {
                    e.insert(token.clone());
                    token.as_change_token()
                }
                None => NoopChangeToken::shared(),
            },
        }
    }

    /// Evaluate all registered tokens now, in addition to the periodic timer.
    pub fn poll_now(&self) {
        self.shared.poll();
    }
}
impl Drop for PollingFileWatcher {
    fn drop(&mut self) {
        let _ = self.stop.send(());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                tracing::error!("polling-watcher thread panicked");
            }
        }
    }
}

impl PollShared {
    fn new_token(&self, filter: &str) -> Option<PolledToken> {
        let source = CancellationSource::new();
        if filter::is_pattern(filter) {
            match PollingWildCardChangeToken::new(&self.root, filter, self.clock.clone(), source) {
                Ok(t) => {
                    // baseline scan, the timer only reports changes after it
                    t.update_has_changed();
                    Some(PolledToken::WildCard(Arc::new(t)))
                }
                Err(e) => {
                    tracing::debug!("invalid watch pattern `{filter}`, {e}");
                    None
                }
            }
        } else {
            Some(PolledToken::File(Arc::new(PollingFileChangeToken::new(self.root.join(filter), source))))
        }
    }

    fn poll(&self) {
        let keys: Vec<String> = self.tokens.iter().map(|t| t.key().clone()).collect();
        for key in keys {
            let Some(token) = self.tokens.get(&key).map(|t| t.value().clone()) else {
                continue;
            };
            if token.update_has_changed() {
                // the fire consumes the entry, a new watch call starts a fresh snapshot
                if let Some((_, token)) = self.tokens.remove(&key) {
                    token.cancel();
                }
            }
        }
    }
}

#[derive(Clone)]
enum PolledToken {
    File(Arc<PollingFileChangeToken>),
    WildCard(Arc<PollingWildCardChangeToken>),
}
impl PolledToken {
    fn has_changed(&self) -> bool {
        match self {
            PolledToken::File(t) => t.has_changed(),
            PolledToken::WildCard(t) => t.has_changed(),
        }
    }

    fn update_has_changed(&self) -> bool {
        match self {
            PolledToken::File(t) => t.update_has_changed(),
            PolledToken::WildCard(t) => t.update_has_changed(),
        }
    }

    fn cancel(&self) {
        match self {
            PolledToken::File(t) => t.cancel(),
            PolledToken::WildCard(t) => t.cancel(),
        }
    }

    fn as_change_token(&self) -> Arc<dyn ChangeToken> {
        match self {
            PolledToken::File(t) => t.clone(),
            PolledToken::WildCard(t) => t.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{io::Write as _, sync::mpsc, time::Duration};

    use vigil_token::ChangeTokenExt as _;

    use super::*;

    struct ManualClock(Mutex<SystemTime>);
    impl ManualClock {
        fn new() -> Arc<Self> {
            Arc::new(Self(Mutex::new(SystemTime::now())))
        }

        fn advance(&self, by: Duration) {
            let mut t = self.0.lock();
            *t += by;
        }
    }
    impl Clock for ManualClock {
        fn utc_now(&self) -> SystemTime {
            *self.0.lock()
        }
    }

    fn write(path: &Path, contents: &str) {
        let mut f = fs::File::create(path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    fn wildcard(root: &Path, pattern: &str, clock: Arc<dyn Clock>) -> PollingWildCardChangeToken {
        let t = PollingWildCardChangeToken::new(root, pattern, clock, CancellationSource::new()).unwrap();
        t.update_has_changed(); // baseline
        t
    }

    #[test]
    fn wildcard_baseline_reports_no_change() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("1.txt"), "one");
        write(&dir.path().join("2.txt"), "two");

        let clock = ManualClock::new();
        let t = PollingWildCardChangeToken::new(dir.path(), "**/*.txt", clock, CancellationSource::new()).unwrap();
        assert!(!t.update_has_changed());
        assert!(!t.has_changed());
    }

    #[test]
    fn wildcard_stable_set_reports_no_change() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("1.txt"), "one");
        write(&dir.path().join("2.txt"), "two");

        let clock = ManualClock::new();
        let t = wildcard(dir.path(), "**/*.txt", clock.clone());
        clock.advance(Duration::from_secs(4));
        assert!(!t.update_has_changed());
        assert!(!t.update_has_changed());
    }

    #[test]
    fn wildcard_detects_new_file() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("1.txt"), "one");

        let t = wildcard(dir.path(), "**/*.txt", ManualClock::new());
        write(&dir.path().join("2.txt"), "two");
        assert!(t.update_has_changed());
        // and the flag is monotone
        fs::remove_file(dir.path().join("2.txt")).unwrap();
        assert!(t.update_has_changed());
        assert!(t.has_changed());
    }

    #[test]
    fn wildcard_detects_removed_file() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("1.txt"), "one");
        write(&dir.path().join("2.txt"), "two");

        let t = wildcard(dir.path(), "*.txt", ManualClock::new());
        fs::remove_file(dir.path().join("2.txt")).unwrap();
        assert!(t.update_has_changed());
    }

    #[test]
    fn wildcard_detects_rewritten_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("1.txt");
        write(&file, "one");

        let t = wildcard(dir.path(), "*.txt", ManualClock::new());

        let f = fs::File::options().write(true).open(&file).unwrap();
        f.set_modified(SystemTime::now() + Duration::from_secs(5)).unwrap();
        assert!(t.update_has_changed());
    }

    #[test]
    fn wildcard_ignores_unmatched_files() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("1.txt"), "one");

        let t = wildcard(dir.path(), "*.txt", ManualClock::new());
        write(&dir.path().join("ignored.log"), "log");
        assert!(!t.update_has_changed());
    }

    #[test]
    fn file_token_detects_creation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");

        let t = PollingFileChangeToken::new(&path, CancellationSource::new());
        assert!(!t.update_has_changed());

        write(&path, "created");
        assert!(t.update_has_changed());
        assert!(t.has_changed());
    }

    #[test]
    fn file_token_detects_modified_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        write(&path, "content");

        let t = PollingFileChangeToken::new(&path, CancellationSource::new());
        assert!(!t.update_has_changed());

        let f = fs::File::options().write(true).open(&path).unwrap();
        f.set_modified(SystemTime::now() + Duration::from_secs(5)).unwrap();
        assert!(t.update_has_changed());
    }

    #[test]
    fn watcher_fires_and_removes_on_tick() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        let watcher = PollingFileWatcher::with_interval(dir.path(), Duration::from_secs(60));

        let token = watcher.watch("a.txt");
        let (tx, rx) = mpsc::channel();
        let _sub = token.on_change(move || {
            let _ = tx.send(());
        });

        watcher.poll_now();
        assert!(!token.has_changed());

        write(&path, "created");
        watcher.poll_now();
        watcher.poll_now();

        assert!(token.has_changed());
        rx.recv_timeout(Duration::from_secs(5)).expect("callback not invoked");
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err(), "callback invoked twice");
    }

    #[test]
    fn watcher_shares_unchanged_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = PollingFileWatcher::with_interval(dir.path(), Duration::from_secs(60));

        let a = watcher.watch("a.txt");
        let b = watcher.watch("a.txt");

        write(&dir.path().join("a.txt"), "created");
        watcher.poll_now();

        assert!(a.has_changed());
        assert!(b.has_changed());

        // a fired token is replaced on the next watch call
        let c = watcher.watch("a.txt");
        assert!(!c.has_changed());
    }

    #[test]
    fn interval_floor_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = PollingFileWatcher::with_interval(dir.path(), Duration::from_millis(1));
        assert_eq!(watcher.interval(), MIN_POLL_INTERVAL);
    }
}
