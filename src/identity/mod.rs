//! Broker connection identifier allocation.
//!
//! Scripts sharing one gateway need distinct client ids. Well-known scripts
//! get a fixed id from a static table; everything else draws from a counter
//! persisted in a JSON state file shared between processes.
//!
//! ## Locking
//! - The lock is a file created with `create_new` holding a unique owner token
//! - A lock older than the timeout is treated as abandoned. Clearing it needs a
//!   second `create_new` breaker file, and the token and age are re-read under
//!   the breaker, so a lock replaced in the meantime is never removed
//! - The guard removes the lock on drop only while it still carries its token

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

use crate::error::ScalperError;

/// Ids held by long-running tools and never handed out or released.
pub const RESERVED_IDS: [u32; 3] = [1, 2, 3];

/// First id issued by the dynamic counter.
const FIRST_DYNAMIC_ID: u32 = 10;

const STATE_FILE: &str = "client_ids.json";
const LOCK_FILE: &str = "client_ids.lock";
const BREAKER_FILE: &str = "client_ids.lock.break";
const LOCK_POLL: Duration = Duration::from_millis(50);

const STATIC_IDS: &[(&str, u32)] = &[
    ("futures_bot_live.py", 10),
    ("momentum_auto_switching_live.py", 11),
    ("theta_auto_switching_live.py", 12),
    ("volatility_auto_switching_live.py", 13),
    ("execute_iron_condor_demo.py", 14),
    ("run_iron_butterfly.py", 15),
    ("run_credit_spread.py", 16),
    ("run_butterfly.py", 17),
    ("run_futures_ema.py", 18),
    ("run_defense_auto.py", 19),
    ("close_all_positions.py", 20),
    ("run_iron_condor_auto.py", 21),
    ("show_risk_metrics.py", 22),
    ("analyze_market_conditions.py", 23),
    ("select_best_strategy_simple.py", 24),
    ("show_position_pnl_chart.py", 25),
    ("monitor_account_clean.py", 26),
];

static LOCK_SEQ: AtomicU64 = AtomicU64::new(0);

/// Persisted allocator state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct AllocatorState {
    in_use: Vec<u32>,
    counter: u32,
}

impl Default for AllocatorState {
    fn default() -> Self {
        Self {
            in_use: RESERVED_IDS.to_vec(),
            counter: FIRST_DYNAMIC_ID,
        }
    }
}

/// A resolved client id and whether it must be released on exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedId {
    pub id: u32,
    pub dynamic: bool,
}

pub struct ClientIdAllocator {
    state_path: PathBuf,
    lock_path: PathBuf,
    breaker_path: PathBuf,
    lock_timeout: Duration,
    stale_clears: AtomicUsize,
}

impl ClientIdAllocator {
    pub fn new(dir: impl AsRef<Path>, lock_timeout: Duration) -> Self {
        let dir = dir.as_ref();
        Self {
            state_path: dir.join(STATE_FILE),
            lock_path: dir.join(LOCK_FILE),
            breaker_path: dir.join(BREAKER_FILE),
            lock_timeout,
            stale_clears: AtomicUsize::new(0),
        }
    }

    /// Fixed id for a well-known script. Only the file name is considered.
    pub fn static_id(script_name: &str) -> Option<u32> {
        let file_name = Path::new(script_name)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(script_name);

        STATIC_IDS
            .iter()
            .find(|(name, _)| *name == file_name)
            .map(|(_, id)| *id)
    }

    /// Static id if listed, otherwise a freshly allocated one.
    pub fn resolve(&self, script_name: &str) -> Result<ResolvedId> {
        if let Some(id) = Self::static_id(script_name) {
            debug!(%script_name, id, "Using static client id");
            return Ok(ResolvedId { id, dynamic: false });
        }

        let id = self.allocate()?;
        Ok(ResolvedId { id, dynamic: true })
    }

    pub fn allocate(&self) -> Result<u32> {
        let id = self.with_state(|state| {
            let id = state.counter;
            state.counter += 1;
            state.in_use.push(id);
            Ok(id)
        })?;

        info!(client_id = id, "Client id allocated");
        Ok(id)
    }

    /// Return an id to the pool. Reserved ids are never released.
    pub fn release(&self, id: u32) -> Result<()> {
        if RESERVED_IDS.contains(&id) {
            debug!(client_id = id, "Reserved client id not released");
            return Ok(());
        }

        self.with_state(|state| {
            state.in_use.retain(|held| *held != id);
            Ok(())
        })?;

        info!(client_id = id, "Client id released");
        Ok(())
    }

    /// Delete all allocator state.
    pub fn reset(&self) -> Result<()> {
        for path in [&self.state_path, &self.lock_path, &self.breaker_path] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to remove {}", path.display()))
                }
            }
        }
        warn!("All client ids reset");
        Ok(())
    }

    /// Ids currently marked in use.
    pub fn in_use(&self) -> Result<Vec<u32>> {
        let _guard = self.acquire()?;
        Ok(self.load()?.in_use)
    }

    /// Number of abandoned locks this allocator force-cleared.
    pub fn stale_clears(&self) -> usize {
        self.stale_clears.load(Ordering::SeqCst)
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut AllocatorState) -> Result<T>) -> Result<T> {
        let _guard = self.acquire()?;
        let mut state = self.load()?;
        let out = f(&mut state)?;
        self.store(&state)?;
        Ok(out)
    }

    fn load(&self) -> Result<AllocatorState> {
        match fs::read_to_string(&self.state_path) {
            Ok(raw) => serde_json::from_str(&raw)
                .with_context(|| format!("Corrupt client id state in {}", self.state_path.display())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(AllocatorState::default()),
            Err(e) => Err(e).context("Failed to read client id state"),
        }
    }

    fn store(&self, state: &AllocatorState) -> Result<()> {
        let raw = serde_json::to_string_pretty(state)?;
        fs::write(&self.state_path, raw).context("Failed to write client id state")
    }

    fn acquire(&self) -> Result<LockGuard> {
        if let Some(dir) = self.lock_path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        let started = Instant::now();
        // Stale locks clear after one timeout; anything beyond a few is a stuck clock
        let give_up = self.lock_timeout * 4 + Duration::from_secs(1);

        loop {
            match create_lock(&self.lock_path) {
                Ok(guard) => return Ok(guard),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if let Some((token, age)) = read_lock(&self.lock_path) {
                        if age > self.lock_timeout && self.clear_stale_lock(&token) {
                            continue;
                        }
                    }
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("Failed to create {}", self.lock_path.display()))
                }
            }

            if started.elapsed() > give_up {
                return Err(ScalperError::AllocatorLock(format!(
                    "{} held for more than {:?}",
                    self.lock_path.display(),
                    give_up
                ))
                .into());
            }
            std::thread::sleep(LOCK_POLL);
        }
    }

    /// Remove an abandoned lock still carrying `expected`. Returns true only
    /// for the contender that removed it.
    fn clear_stale_lock(&self, expected: &str) -> bool {
        let Some(_breaker) = self.take_breaker() else {
            return false;
        };

        // Re-check under the breaker through a fresh handle
        match read_lock(&self.lock_path) {
            Some((token, age)) if token == expected && age > self.lock_timeout => {}
            _ => return false,
        }

        let tombstone = self.lock_path.with_extension(format!(
            "lock.stale-{}-{}",
            std::process::id(),
            LOCK_SEQ.fetch_add(1, Ordering::SeqCst)
        ));
        if fs::rename(&self.lock_path, &tombstone).is_err() {
            return false;
        }

        if read_lock(&tombstone).map(|(token, _)| token).as_deref() != Some(expected) {
            // Holder released and a new lock appeared between check and rename
            if fs::hard_link(&tombstone, &self.lock_path).is_err() {
                warn!(lock = %self.lock_path.display(), "Could not restore live client id lock");
            }
            let _ = fs::remove_file(&tombstone);
            return false;
        }

        let _ = fs::remove_file(&tombstone);
        self.stale_clears.fetch_add(1, Ordering::SeqCst);
        warn!(
            lock = %self.lock_path.display(),
            token = %expected,
            timeout_secs = self.lock_timeout.as_secs(),
            "Force-cleared abandoned client id lock"
        );
        true
    }

    /// Serializes stale-lock clearing. Held only for a few file operations,
    /// so one older than the lock timeout was abandoned.
    fn take_breaker(&self) -> Option<LockGuard> {
        match create_lock(&self.breaker_path) {
            Ok(guard) => Some(guard),
            Err(_) => {
                if let Some((token, age)) = read_lock(&self.breaker_path) {
                    if age > self.lock_timeout && remove_if_owned(&self.breaker_path, &token) {
                        warn!(breaker = %self.breaker_path.display(), "Removed abandoned lock breaker");
                    }
                }
                None
            }
        }
    }
}

/// Create a lock file and stamp it with a fresh owner token.
fn create_lock(path: &Path) -> std::io::Result<LockGuard> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;

    let token = format!(
        "{}-{}-{}",
        std::process::id(),
        LOCK_SEQ.fetch_add(1, Ordering::SeqCst),
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default()
    );
    if let Err(e) = file.write_all(token.as_bytes()).and_then(|_| file.sync_all()) {
        let _ = fs::remove_file(path);
        return Err(e);
    }

    Ok(LockGuard {
        path: path.to_path_buf(),
        token,
    })
}

/// Owner token and age of a lock, both taken from one open handle.
fn read_lock(path: &Path) -> Option<(String, Duration)> {
    let mut file = fs::File::open(path).ok()?;
    let modified = file.metadata().ok()?.modified().ok()?;
    let mut token = String::new();
    file.read_to_string(&mut token).ok()?;

    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or(Duration::ZERO);
    Some((token.trim().to_string(), age))
}

fn remove_if_owned(path: &Path, token: &str) -> bool {
    match read_lock(path) {
        Some((held, _)) if held == token => fs::remove_file(path).is_ok(),
        _ => false,
    }
}

struct LockGuard {
    path: PathBuf,
    token: String,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !remove_if_owned(&self.path, &self.token) {
            warn!(lock = %self.path.display(), "Lock no longer ours, left in place");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "options-scalper-ids-{}-{}",
            name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_static_table() {
        assert_eq!(ClientIdAllocator::static_id("futures_bot_live.py"), Some(10));
        assert_eq!(ClientIdAllocator::static_id("/opt/bots/run_defense_auto.py"), Some(19));
        assert_eq!(ClientIdAllocator::static_id("monitor_account_clean.py"), Some(26));
        assert_eq!(ClientIdAllocator::static_id("options_scalper.py"), None);
    }

    #[test]
    fn test_fresh_state_starts_at_counter() {
        let dir = scratch_dir("fresh");
        let allocator = ClientIdAllocator::new(&dir, Duration::from_secs(5));

        assert_eq!(allocator.allocate().unwrap(), 10);
        assert_eq!(allocator.allocate().unwrap(), 11);
        assert_eq!(allocator.in_use().unwrap(), vec![1, 2, 3, 10, 11]);
        assert!(!dir.join(LOCK_FILE).exists());
    }

    #[test]
    fn test_release_keeps_reserved_ids() {
        let dir = scratch_dir("release");
        let allocator = ClientIdAllocator::new(&dir, Duration::from_secs(5));

        let id = allocator.allocate().unwrap();
        allocator.release(id).unwrap();
        allocator.release(2).unwrap();

        assert_eq!(allocator.in_use().unwrap(), vec![1, 2, 3]);
        // The counter never rewinds
        assert_eq!(allocator.allocate().unwrap(), id + 1);
    }

    #[test]
    fn test_resolve_prefers_static_ids() {
        let dir = scratch_dir("resolve");
        let allocator = ClientIdAllocator::new(&dir, Duration::from_secs(5));

        assert_eq!(
            allocator.resolve("run_butterfly.py").unwrap(),
            ResolvedId { id: 17, dynamic: false }
        );
        assert_eq!(
            allocator.resolve("options_scalper.py").unwrap(),
            ResolvedId { id: 10, dynamic: true }
        );
    }

    #[test]
    fn test_reset_clears_state() {
        let dir = scratch_dir("reset");
        let allocator = ClientIdAllocator::new(&dir, Duration::from_secs(5));
        allocator.allocate().unwrap();
        allocator.allocate().unwrap();

        allocator.reset().unwrap();
        assert_eq!(allocator.allocate().unwrap(), 10);
    }

    #[test]
    fn test_concurrent_allocations_are_unique() {
        let dir = scratch_dir("concurrent");
        let allocator = Arc::new(ClientIdAllocator::new(&dir, Duration::from_secs(5)));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let allocator = allocator.clone();
                std::thread::spawn(move || {
                    (0..5)
                        .map(|_| allocator.allocate().unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "id {} issued twice", id);
            }
        }
        assert_eq!(seen.len(), 40);
    }

    #[test]
    fn test_stale_lock_cleared_exactly_once() {
        let dir = scratch_dir("stale");
        let allocator = Arc::new(ClientIdAllocator::new(&dir, Duration::from_secs(1)));

        let lock = dir.join(LOCK_FILE);
        fs::write(&lock, "99999").unwrap();
        let abandoned = SystemTime::now() - Duration::from_secs(60);
        fs::File::options()
            .write(true)
            .open(&lock)
            .unwrap()
            .set_modified(abandoned)
            .unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let allocator = allocator.clone();
                std::thread::spawn(move || allocator.allocate().unwrap())
            })
            .collect();

        let ids: HashSet<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(ids.len(), 4);
        assert_eq!(allocator.stale_clears(), 1);
        assert!(!dir.join(BREAKER_FILE).exists());
    }

    fn age_file(path: &Path, by: Duration) {
        fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(SystemTime::now() - by)
            .unwrap();
    }

    #[test]
    fn test_replaced_lock_is_not_cleared() {
        let dir = scratch_dir("replaced");
        let allocator = ClientIdAllocator::new(&dir, Duration::from_secs(1));

        // Another contender cleared the abandoned lock and took a new one
        let lock = dir.join(LOCK_FILE);
        fs::write(&lock, "4242-0-1").unwrap();
        age_file(&lock, Duration::from_secs(60));

        assert!(!allocator.clear_stale_lock("99999"));
        assert_eq!(fs::read_to_string(&lock).unwrap(), "4242-0-1");
        assert_eq!(allocator.stale_clears(), 0);
    }

    #[test]
    fn test_held_breaker_blocks_clearing() {
        let dir = scratch_dir("breaker");
        let allocator = ClientIdAllocator::new(&dir, Duration::from_secs(1));

        let lock = dir.join(LOCK_FILE);
        fs::write(&lock, "99999").unwrap();
        age_file(&lock, Duration::from_secs(60));
        fs::write(dir.join(BREAKER_FILE), "4242-0-1").unwrap();

        assert!(!allocator.clear_stale_lock("99999"));
        assert!(lock.exists());

        // An abandoned breaker is removed and the next attempt succeeds
        age_file(&dir.join(BREAKER_FILE), Duration::from_secs(60));
        assert!(!allocator.clear_stale_lock("99999"));
        assert!(allocator.clear_stale_lock("99999"));
        assert!(!lock.exists());
    }

    #[test]
    fn test_guard_leaves_foreign_lock() {
        let dir = scratch_dir("foreign");
        let allocator = ClientIdAllocator::new(&dir, Duration::from_secs(5));

        let guard = allocator.acquire().unwrap();
        let lock = dir.join(LOCK_FILE);
        assert_eq!(fs::read_to_string(&lock).unwrap(), guard.token);

        // Lock was force-cleared and retaken while we still held the guard
        fs::write(&lock, "4242-0-1").unwrap();
        drop(guard);
        assert_eq!(fs::read_to_string(&lock).unwrap(), "4242-0-1");
    }
}
