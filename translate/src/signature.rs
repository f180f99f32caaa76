//! Thinking-signature cache.
//!
//! The upstream requires every historical thinking block to carry the opaque
//! signature it was issued with, but clients almost never persist that field.
//! The cache remembers signatures observed on responses, keyed by a stable
//! fingerprint of the conversation plus a short hash of the thinking text, so
//! a replay of the same conversation prefix finds the same bucket.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::RngExt;
use sha2::{Digest, Sha256};
use slipstream_types::{Content, Role};

/// Sentinel recorded where a signature slot must exist but no real value is
/// known. Never sent upstream.
pub const PLACEHOLDER_SIGNATURE: &str = "placeholder";

/// Sentinel the upstream validator accepts as "skip signature validation".
/// Used for synthesized thinking stubs and for tool calls whose turn carried
/// no signed thinking.
pub const SKIP_SIGNATURE_SENTINEL: &str = "skip_thought_signature_validator";

/// Signatures shorter than this are truncation artifacts, not real values.
const MIN_SIGNATURE_LEN: usize = 16;

const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);
const DEFAULT_SESSION_CAP: usize = 100;

/// How many characters of the first user message feed the session hash.
const SESSION_PREFIX_LEN: usize = 200;

/// True for signatures that may be cached or replayed upstream.
#[must_use]
pub fn is_valid_signature(signature: &str) -> bool {
    signature.len() >= MIN_SIGNATURE_LEN
        && signature != PLACEHOLDER_SIGNATURE
        && signature != SKIP_SIGNATURE_SENTINEL
}

/// Short fingerprint of a thinking text: first 16 hex chars of its SHA-256.
#[must_use]
pub fn fingerprint(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(16);
    for byte in &digest[..8] {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Derive the stable session id for a transcript.
///
/// Keyed on the first user text so replays of the same conversation prefix
/// land in the same bucket: a 32-bit rolling hash of the first 200
/// characters, rendered `-<abs(hash)>`. Transcripts with no user text get a
/// random 12-digit id (the 12-digit scheme stays inside f64-exact integer
/// range, which matters to clients that echo the id through JSON).
#[must_use]
pub fn derive_session_id(contents: &[Content]) -> String {
    let seed = contents
        .iter()
        .filter(|c| c.role == Role::User)
        .flat_map(|c| c.parts.iter())
        .find_map(|p| p.as_text().filter(|t| !t.is_empty()));

    match seed {
        Some(text) => {
            let mut hash: i32 = 0;
            for ch in text.chars().take(SESSION_PREFIX_LEN) {
                hash = hash.wrapping_mul(31).wrapping_add(ch as i32);
            }
            format!("-{}", hash.unsigned_abs())
        }
        None => {
            let fallback: u64 = rand::rng().random_range(100_000_000_000..1_000_000_000_000);
            format!("-{fallback}")
        }
    }
}

struct CacheEntry {
    signature: String,
    inserted: Instant,
}

/// Process-wide map from (session, thinking fingerprint) to signature.
///
/// Safe for concurrent readers and writers; each session bucket mutates
/// atomically under its `DashMap` shard lock. Bounded by a per-session cap
/// with oldest-25 % eviction and a TTL enforced on read and by the
/// background sweeper.
pub struct SignatureCache {
    sessions: DashMap<String, HashMap<String, CacheEntry>>,
    ttl: Duration,
    session_cap: usize,
}

impl Default for SignatureCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SignatureCache {
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_TTL, DEFAULT_SESSION_CAP)
    }

    #[must_use]
    pub fn with_limits(ttl: Duration, session_cap: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            ttl,
            session_cap,
        }
    }

    /// Record a signature observed on a response. Ignores empty arguments and
    /// anything that fails [`is_valid_signature`].
    pub fn set(&self, session_id: &str, thinking_text: &str, signature: &str) {
        if session_id.is_empty() || thinking_text.is_empty() || !is_valid_signature(signature) {
            return;
        }

        let key = fingerprint(thinking_text);
        let mut bucket = self.sessions.entry(session_id.to_string()).or_default();

        if bucket.len() >= self.session_cap && !bucket.contains_key(&key) {
            let ttl = self.ttl;
            bucket.retain(|_, entry| entry.inserted.elapsed() <= ttl);
            if bucket.len() >= self.session_cap {
                evict_oldest_quarter(&mut bucket);
            }
        }

        bucket.insert(
            key,
            CacheEntry {
                signature: signature.to_string(),
                inserted: Instant::now(),
            },
        );
    }

    /// Look up the signature for a thinking text; expired entries are evicted
    /// on the way out.
    #[must_use]
    pub fn get(&self, session_id: &str, thinking_text: &str) -> Option<String> {
        let key = fingerprint(thinking_text);
        let mut bucket = self.sessions.get_mut(session_id)?;

        if let Some(entry) = bucket.get(&key) {
            if entry.inserted.elapsed() <= self.ttl {
                return Some(entry.signature.clone());
            }
            bucket.remove(&key);
        }
        None
    }

    /// Drop expired entries and empty session buckets.
    pub fn sweep(&self) {
        let ttl = self.ttl;
        for mut bucket in self.sessions.iter_mut() {
            bucket.retain(|_, entry| entry.inserted.elapsed() <= ttl);
        }
        self.sessions.retain(|_, bucket| !bucket.is_empty());
    }

    /// Number of live sessions (post-sweep view, used by tests and logs).
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Spawn the cooperative sweeper. Runs until the cache is dropped by all
    /// holders; request handling never waits on it.
    pub fn spawn_sweeper(cache: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let weak = Arc::downgrade(cache);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                cache.sweep();
            }
        })
    }
}

fn evict_oldest_quarter(bucket: &mut HashMap<String, CacheEntry>) {
    let drop_count = (bucket.len() / 4).max(1);
    let mut by_age: Vec<(String, Instant)> = bucket
        .iter()
        .map(|(k, v)| (k.clone(), v.inserted))
        .collect();
    by_age.sort_by_key(|(_, inserted)| *inserted);
    for (key, _) in by_age.into_iter().take(drop_count) {
        bucket.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slipstream_types::Part;

    fn sig(n: usize) -> String {
        "s".repeat(MIN_SIGNATURE_LEN + n)
    }

    #[test]
    fn round_trips_a_signature() {
        let cache = SignatureCache::new();
        cache.set("-1", "thinking about it", &sig(0));
        assert_eq!(cache.get("-1", "thinking about it"), Some(sig(0)));
        assert_eq!(cache.get("-1", "different text"), None);
        assert_eq!(cache.get("-2", "thinking about it"), None);
    }

    #[test]
    fn rejects_short_and_sentinel_signatures() {
        assert!(!is_valid_signature(""));
        assert!(!is_valid_signature("short"));
        assert!(!is_valid_signature(PLACEHOLDER_SIGNATURE));
        assert!(!is_valid_signature(SKIP_SIGNATURE_SENTINEL));
        assert!(is_valid_signature(&sig(0)));

        let cache = SignatureCache::new();
        cache.set("-1", "text", "tiny");
        assert_eq!(cache.get("-1", "text"), None);
    }

    #[test]
    fn ignores_empty_arguments() {
        let cache = SignatureCache::new();
        cache.set("", "text", &sig(0));
        cache.set("-1", "", &sig(0));
        assert_eq!(cache.session_count(), 0);
    }

    #[test]
    fn expired_entries_are_evicted_on_read() {
        let cache = SignatureCache::with_limits(Duration::from_millis(1), 100);
        cache.set("-1", "text", &sig(0));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get("-1", "text"), None);
    }

    #[test]
    fn overflow_drops_oldest_quarter() {
        let cache = SignatureCache::with_limits(DEFAULT_TTL, 8);
        for i in 0..8 {
            cache.set("-1", &format!("thought {i}"), &sig(i));
            std::thread::sleep(Duration::from_millis(1));
        }
        cache.set("-1", "one more", &sig(9));

        // The two oldest entries were evicted to make room.
        assert_eq!(cache.get("-1", "thought 0"), None);
        assert_eq!(cache.get("-1", "thought 1"), None);
        assert_eq!(cache.get("-1", "thought 7"), Some(sig(7)));
        assert_eq!(cache.get("-1", "one more"), Some(sig(9)));
    }

    #[test]
    fn sweep_removes_empty_buckets() {
        let cache = SignatureCache::with_limits(Duration::from_millis(1), 100);
        cache.set("-1", "text", &sig(0));
        std::thread::sleep(Duration::from_millis(5));
        cache.sweep();
        assert_eq!(cache.session_count(), 0);
    }

    #[test]
    fn fingerprint_is_sixteen_hex_chars() {
        let fp = fingerprint("some thinking text");
        assert_eq!(fp.len(), 16);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(fp, fingerprint("some thinking text"));
        assert_ne!(fp, fingerprint("other text"));
    }

    #[test]
    fn session_id_is_stable_for_identical_first_user_text() {
        let a = vec![Content::user(vec![Part::text("Hello there")])];
        let b = vec![
            Content::user(vec![Part::text("Hello there")]),
            Content::model(vec![Part::text("Hi!")]),
            Content::user(vec![Part::text("More")]),
        ];
        assert_eq!(derive_session_id(&a), derive_session_id(&b));
    }

    #[test]
    fn session_id_only_hashes_the_first_two_hundred_chars() {
        let long_a = format!("{}{}", "x".repeat(250), "tail-a");
        let long_b = format!("{}{}", "x".repeat(250), "tail-b");
        let a = vec![Content::user(vec![Part::text(long_a)])];
        let b = vec![Content::user(vec![Part::text(long_b)])];
        assert_eq!(derive_session_id(&a), derive_session_id(&b));
    }

    #[test]
    fn empty_transcript_gets_a_twelve_digit_fallback() {
        let id = derive_session_id(&[]);
        let digits = id.strip_prefix('-').unwrap();
        assert_eq!(digits.len(), 12);
        assert!(digits.chars().all(|c| c.is_ascii_digit()));
    }
}
