//! IP access cache.
//!
//! Backs the banned-IP set, the allowed-IP set and the user-agent pattern
//! list used elsewhere in the crate — all three are instances of the same
//! structure: an exact-match map ordered lexicographically on the entry's
//! text, plus a list of glob-style wildcard patterns, with lazy expiry and
//! an optional file-backed reload.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use glob::Pattern;
use parking_lot::RwLock;

/// Result of a [`IpAccessCache::contains`] lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// Matched a wildcard pattern or a live literal entry.
    Match,
    /// The cache has entries, but none matched.
    NoMatch,
    /// The cache has no backing data at all (no file configured, nothing added).
    NoData,
}

#[derive(Debug, Clone, Copy)]
struct BanEntry {
    /// 0 means permanent.
    timeout: u64,
}

/// Current wall-clock time in seconds, passed explicitly rather than read
/// internally so callers can reuse one timestamp across several checks.
pub fn now_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

/// The soft-renewal window: a just-observed entry within this many seconds
/// of expiry has its timeout pushed out, so it doesn't lapse immediately
/// after being checked.
const RENEWAL_WINDOW_SECS: u64 = 300;
/// Entries expired by more than this are candidates for opportunistic
/// eviction during an unrelated lookup.
const OPPORTUNISTIC_EVICT_AGE_SECS: u64 = 60;
/// Bound on how many neighboring map entries are inspected for opportunistic
/// eviction per call — models the handful of comparator invocations a
/// balanced-tree descent would touch.
const OPPORTUNISTIC_SCAN_WIDTH: usize = 4;

struct Inner {
    literals: BTreeMap<String, BanEntry>,
    wildcards: Vec<Pattern>,
    backing_file: Option<PathBuf>,
    has_data: bool,
}

/// The access cache itself. Cheaply cloneable (internally `Arc`-free; callers
/// share one instance behind their own `Arc` as the listener profiles do).
pub struct IpAccessCache {
    inner: RwLock<Inner>,
}

impl Default for IpAccessCache {
    fn default() -> Self {
        Self::new()
    }
}

impl IpAccessCache {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                literals: BTreeMap::new(),
                wildcards: Vec::new(),
                backing_file: None,
                has_data: false,
            }),
        }
    }

    /// Classify `entry` as wildcard or literal and add it (`add`).
    pub fn add(&self, entry: &str, now: u64) {
        let mut inner = self.inner.write();
        inner.has_data = true;
        if is_wildcard(entry) {
            if let Ok(pattern) = Pattern::new(entry) {
                // "prepend to wildcard list"
                inner.wildcards.insert(0, pattern);
            }
            return;
        }
        inner.literals.insert(entry.to_string(), BanEntry { timeout: now });
    }

    /// Convenience insert used by the accept loop to temporarily ban a peer
    /// (`add_with_duration`).
    pub fn add_with_duration(&self, ip: &str, seconds: i64, now: u64) {
        let mut desired = if seconds <= 0 { 0 } else { now + seconds as u64 };
        let mut inner = self.inner.write();
        inner.has_data = true;
        if let Some(existing) = inner.literals.get(ip) {
            if existing.timeout != 0 && existing.timeout.saturating_sub(now) < RENEWAL_WINDOW_SECS {
                let renewed = now + RENEWAL_WINDOW_SECS;
                desired = if desired == 0 { 0 } else { desired.max(renewed) };
            }
        }
        inner.literals.insert(ip.to_string(), BanEntry { timeout: desired });
    }

    /// Look `ip` up (`contains`).
    pub fn contains(&self, ip: &str, now: u64) -> Lookup {
        {
            let inner = self.inner.read();
            for pattern in &inner.wildcards {
                if pattern.matches(ip) {
                    return Lookup::Match;
                }
            }
            if let Some(entry) = inner.literals.get(ip) {
                if entry.timeout == 0 || entry.timeout > now {
                    // live entry; fall through to the write-locked renewal/evict pass
                } else {
                    // expired; fall through to remove it
                }
            } else if !inner.has_data {
                return Lookup::NoData;
            } else {
                // no direct hit; still check for an opportunistic eviction candidate
            }
        }

        let mut inner = self.inner.write();
        let mut result = Lookup::NoMatch;
        if let Some(entry) = inner.literals.get_mut(ip) {
            if entry.timeout == 0 || entry.timeout > now {
                if entry.timeout != 0 && now + RENEWAL_WINDOW_SECS > entry.timeout {
                    entry.timeout = now + RENEWAL_WINDOW_SECS;
                }
                result = Lookup::Match;
            } else {
                inner.literals.remove(ip);
            }
        }

        if result == Lookup::NoMatch {
            if let Some(stale) = opportunistic_candidate(&inner.literals, ip, now) {
                inner.literals.remove(&stale);
            }
        }

        result
    }

    /// Count of literal entries, exposed for observability.
    pub fn banned_count(&self) -> usize {
        self.inner.read().literals.len()
    }

    /// Replace the cache's contents from a newline-delimited file. Each
    /// non-empty, non-comment line becomes a permanent entry via [`Self::add`].
    pub fn reload_from_file(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let now = now_secs();
        let mut inner = self.inner.write();
        inner.literals.clear();
        inner.wildcards.clear();
        inner.backing_file = Some(path.to_path_buf());
        inner.has_data = true;
        drop(inner);
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            self.add(line, now);
        }
        Ok(())
    }
}

fn is_wildcard(s: &str) -> bool {
    s.contains(['*', '?', '['])
}

/// Find at most one entry, other than `skip`, whose timeout is more than
/// [`OPPORTUNISTIC_EVICT_AGE_SECS`] in the past, scanning a small window of
/// entries lexicographically adjacent to `skip`.
fn opportunistic_candidate(map: &BTreeMap<String, BanEntry>, skip: &str, now: u64) -> Option<String> {
    let is_stale = |timeout: u64| timeout != 0 && timeout + OPPORTUNISTIC_EVICT_AGE_SECS < now;

    let before = map.range(..skip.to_string()).rev().take(OPPORTUNISTIC_SCAN_WIDTH / 2);
    let after = map.range(skip.to_string()..).filter(|(k, _)| k.as_str() != skip).take(OPPORTUNISTIC_SCAN_WIDTH / 2);

    for (ip, entry) in before.chain(after) {
        if is_stale(entry.timeout) {
            return Some(ip.clone());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_data_until_something_is_added() {
        let cache = IpAccessCache::new();
        assert_eq!(cache.contains("10.0.0.1", now_secs()), Lookup::NoData);
    }

    #[test]
    fn permanent_literal_always_matches() {
        let cache = IpAccessCache::new();
        cache.add("10.0.0.5", 0);
        assert_eq!(cache.contains("10.0.0.5", now_secs()), Lookup::Match);
        assert_eq!(cache.contains("10.0.0.6", now_secs()), Lookup::NoMatch);
    }

    #[test]
    fn wildcard_entry_matches_glob() {
        let cache = IpAccessCache::new();
        cache.add("192.168.*", 0);
        assert_eq!(cache.contains("192.168.1.5", now_secs()), Lookup::Match);
        assert_eq!(cache.contains("10.0.0.1", now_secs()), Lookup::NoMatch);
    }

    #[test]
    fn duration_expires_after_soft_renewal_window() {
        let cache = IpAccessCache::new();
        let now = 1_000_000u64;
        cache.add_with_duration("1.2.3.4", 10, now);
        assert_eq!(cache.contains("1.2.3.4", now + 5), Lookup::Match);
        // past duration + the 300s soft-renewal grace
        assert_eq!(cache.contains("1.2.3.4", now + 10 + 300 + 1), Lookup::NoMatch);
    }

    #[test]
    fn add_with_duration_then_contains_is_match() {
        let cache = IpAccessCache::new();
        let now = now_secs();
        cache.add_with_duration("8.8.8.8", 60, now);
        assert_eq!(cache.contains("8.8.8.8", now), Lookup::Match);
    }

    #[test]
    fn expired_entry_is_removed_on_lookup() {
        let cache = IpAccessCache::new();
        let now = 1_000_000u64;
        cache.add_with_duration("9.9.9.9", 1, now);
        // well past expiry + renewal window
        assert_eq!(cache.contains("9.9.9.9", now + 1000), Lookup::NoMatch);
        assert_eq!(cache.banned_count(), 0);
    }

    #[test]
    fn reload_from_file_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("banned.txt");
        std::fs::write(&path, "10.0.0.1\n# comment\n192.168.*\n").unwrap();
        let cache = IpAccessCache::new();
        cache.reload_from_file(&path).unwrap();
        assert_eq!(cache.contains("10.0.0.1", now_secs()), Lookup::Match);
        assert_eq!(cache.contains("192.168.5.5", now_secs()), Lookup::Match);
        assert_eq!(cache.banned_count(), 1);
    }
}
