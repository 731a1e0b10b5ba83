//! In-process [`KeyValueStore`].
//!
//! Backs single-process deployments (distributed dedup with no shared
//! server) and tests. Expiry is lazy: expired keys are dropped when touched
//! or enumerated. Time comes from `tokio::time::Instant`, so paused-clock
//! tests can advance TTLs deterministically.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::StoreError;
use crate::traits::KeyValueStore;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    Set(HashSet<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

fn wrong_type(op: &'static str) -> StoreError {
    StoreError::command(
        op,
        "WRONGTYPE Operation against a key holding the wrong kind of value",
    )
}

/// Drops `key` if it has expired, then returns the live entry (if any).
fn live_entry<'a>(map: &'a mut HashMap<String, Entry>, key: &str) -> Option<&'a mut Entry> {
    if map
        .get(key)
        .is_some_and(|entry| entry.is_expired(Instant::now()))
    {
        map.remove(key);
    }
    map.get_mut(key)
}

/// Shared in-memory store. Clones share the same keyspace.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remaining time to live, `None` for missing or persistent keys.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let mut map = self.entries.lock().await;
        let entry = live_entry(&mut map, key)?;
        entry
            .expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let mut map = self.entries.lock().await;
        let now = Instant::now();
        map.retain(|_, entry| !entry.is_expired(now));
        map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl KeyValueStore for MemoryStore {
    async fn create_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
    ) -> Result<bool, StoreError> {
        let mut map = self.entries.lock().await;
        if live_entry(&mut map, key).is_some() {
            return Ok(false);
        }
        map.insert(
            key.to_string(),
            Entry::new(Value::Str(value.to_string()), ttl),
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut map = self.entries.lock().await;
        match live_entry(&mut map, key) {
            None => Ok(None),
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type("GET")),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError> {
        let mut map = self.entries.lock().await;
        map.insert(
            key.to_string(),
            Entry::new(Value::Str(value.to_string()), ttl),
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut map = self.entries.lock().await;
        let existed = live_entry(&mut map, key).is_some();
        map.remove(key);
        Ok(existed)
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut map = self.entries.lock().await;
        Ok(live_entry(&mut map, key).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut map = self.entries.lock().await;
        match live_entry(&mut map, key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn keys_matching(&self, pattern: &str) -> Result<HashSet<String>, StoreError> {
        let mut map = self.entries.lock().await;
        let now = Instant::now();
        map.retain(|_, entry| !entry.is_expired(now));
        Ok(map
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut map = self.entries.lock().await;
        if live_entry(&mut map, key).is_none() {
            map.insert(key.to_string(), Entry::new(Value::Set(HashSet::new()), None));
        }
        match map.get_mut(key).map(|entry| &mut entry.value) {
            Some(Value::Set(members)) => Ok(members.insert(member.to_string())),
            _ => Err(wrong_type("SADD")),
        }
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut map = self.entries.lock().await;
        match live_entry(&mut map, key).map(|entry| &entry.value) {
            None => Ok(false),
            Some(Value::Set(members)) => Ok(members.contains(member)),
            Some(_) => Err(wrong_type("SISMEMBER")),
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut map = self.entries.lock().await;
        let (removed, now_empty) = match live_entry(&mut map, key).map(|entry| &mut entry.value) {
            None => return Ok(false),
            Some(Value::Set(members)) => (members.remove(member), members.is_empty()),
            Some(_) => return Err(wrong_type("SREM")),
        };
        if now_empty {
            map.remove(key);
        }
        Ok(removed)
    }

    async fn set_size(&self, key: &str) -> Result<u64, StoreError> {
        let mut map = self.entries.lock().await;
        match live_entry(&mut map, key).map(|entry| &entry.value) {
            None => Ok(0),
            Some(Value::Set(members)) => Ok(members.len() as u64),
            Some(_) => Err(wrong_type("SCARD")),
        }
    }

    async fn set_members(&self, key: &str) -> Result<HashSet<String>, StoreError> {
        let mut map = self.entries.lock().await;
        match live_entry(&mut map, key).map(|entry| &entry.value) {
            None => Ok(HashSet::new()),
            Some(Value::Set(members)) => Ok(members.clone()),
            Some(_) => Err(wrong_type("SMEMBERS")),
        }
    }

    async fn increment(&self, key: &str, by: i64) -> Result<i64, StoreError> {
        let mut map = self.entries.lock().await;
        if live_entry(&mut map, key).is_none() {
            map.insert(key.to_string(), Entry::new(Value::Str("0".into()), None));
        }
        let Some(Value::Str(current)) = map.get_mut(key).map(|entry| &mut entry.value) else {
            return Err(wrong_type("INCRBY"));
        };
        let parsed: i64 = current.parse().map_err(|_| {
            StoreError::command("INCRBY", "value is not an integer or out of range")
        })?;
        let next = parsed
            .checked_add(by)
            .ok_or_else(|| StoreError::command("INCRBY", "increment or decrement would overflow"))?;
        *current = next.to_string();
        Ok(next)
    }
}

/// Redis-style glob matching: `*`, `?`, `[abc]`, `[a-z]`, `[^a]` and `\` escapes.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] == '*' {
            backtrack = Some((pi + 1, ti));
            pi += 1;
            continue;
        }
        if pi < p.len()
            && let Some(next) = token_matches(&p, pi, t[ti])
        {
            pi = next;
            ti += 1;
            continue;
        }
        match backtrack {
            Some((star_pi, star_ti)) => {
                pi = star_pi;
                ti = star_ti + 1;
                backtrack = Some((star_pi, star_ti + 1));
            }
            None => return false,
        }
    }

    p[pi..].iter().all(|c| *c == '*')
}

/// If the single (non-star) token at `pi` matches `ch`, the index after it.
fn token_matches(p: &[char], pi: usize, ch: char) -> Option<usize> {
    match p[pi] {
        '?' => Some(pi + 1),
        '\\' if pi + 1 < p.len() => (p[pi + 1] == ch).then_some(pi + 2),
        '[' => match class_end(p, pi) {
            Some(end) => class_matches(&p[pi + 1..end], ch).then_some(end + 1),
            None => (ch == '[').then_some(pi + 1),
        },
        c => (c == ch).then_some(pi + 1),
    }
}

fn class_end(p: &[char], open: usize) -> Option<usize> {
    let mut i = open + 1;
    while i < p.len() {
        match p[i] {
            '\\' => i += 2,
            ']' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

fn class_matches(class: &[char], ch: char) -> bool {
    let (negate, class) = match class.first() {
        Some('^') => (true, &class[1..]),
        _ => (false, class),
    };
    let mut hit = false;
    let mut i = 0;
    while i < class.len() {
        let lo = if class[i] == '\\' && i + 1 < class.len() {
            i += 1;
            class[i]
        } else {
            class[i]
        };
        if i + 2 < class.len() && class[i + 1] == '-' {
            if (lo..=class[i + 2]).contains(&ch) {
                hit = true;
            }
            i += 3;
        } else {
            if lo == ch {
                hit = true;
            }
            i += 1;
        }
    }
    hit != negate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_patterns() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("ns:*", "ns:https://a.example/x"));
        assert!(!glob_match("ns:*", "other:https://a.example/x"));
        assert!(glob_match("h?llo", "hello"));
        assert!(glob_match("h[ae]llo", "hallo"));
        assert!(!glob_match("h[^e]llo", "hello"));
        assert!(glob_match("h[a-c]llo", "hbllo"));
        assert!(glob_match("a\\*b", "a*b"));
        assert!(!glob_match("a\\*b", "axb"));
        assert!(glob_match("*:meta:*", "cg:content:meta:abc"));
        assert!(glob_match("a*b*c", "aXXbYYc"));
        assert!(!glob_match("a*b*c", "aXXbYY"));
    }

    #[tokio::test]
    async fn create_if_absent_wins_once() {
        let store = MemoryStore::new();
        assert!(store.create_if_absent("k", "v1", None).await.unwrap());
        assert!(!store.create_if_absent("k", "v2", None).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v1"));
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expires_keys() {
        let store = MemoryStore::new();
        store
            .set("k", "v", Some(Duration::from_secs(10)))
            .await
            .unwrap();
        assert!(store.exists("k").await.unwrap());
        assert_eq!(store.ttl("k").await, Some(Duration::from_secs(10)));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!store.exists("k").await.unwrap());
        // Expired keys can be claimed again.
        assert!(store.create_if_absent("k", "v2", None).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn expire_updates_ttl_only_for_live_keys() {
        let store = MemoryStore::new();
        assert!(!store.expire("missing", Duration::from_secs(1)).await.unwrap());
        store.set("k", "v", None).await.unwrap();
        assert!(store.expire("k", Duration::from_secs(1)).await.unwrap());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let store = MemoryStore::new();
        store.set("k", "v", None).await.unwrap();
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn set_operations() {
        let store = MemoryStore::new();
        assert!(store.set_add("s", "a").await.unwrap());
        assert!(!store.set_add("s", "a").await.unwrap());
        assert!(store.set_add("s", "b").await.unwrap());
        assert_eq!(store.set_size("s").await.unwrap(), 2);
        assert!(store.set_contains("s", "a").await.unwrap());
        assert!(store.set_remove("s", "a").await.unwrap());
        assert!(!store.set_remove("s", "a").await.unwrap());
        assert_eq!(
            store.set_members("s").await.unwrap(),
            HashSet::from(["b".to_string()])
        );
        store.set_remove("s", "b").await.unwrap();
        assert!(!store.exists("s").await.unwrap());
    }

    #[tokio::test]
    async fn type_mismatch_is_a_store_error() {
        let store = MemoryStore::new();
        store.set("k", "v", None).await.unwrap();
        assert!(matches!(
            store.set_add("k", "m").await,
            Err(StoreError::Command { op: "SADD", .. })
        ));
        store.set_add("s", "m").await.unwrap();
        assert!(store.get("s").await.is_err());
    }

    #[tokio::test]
    async fn increment_counts_from_zero() {
        let store = MemoryStore::new();
        assert_eq!(store.increment("c", 1).await.unwrap(), 1);
        assert_eq!(store.increment("c", 5).await.unwrap(), 6);
        assert_eq!(store.increment("c", -2).await.unwrap(), 4);
        store.set("bad", "x", None).await.unwrap();
        assert!(store.increment("bad", 1).await.is_err());
    }

    #[tokio::test]
    async fn keys_matching_filters_by_pattern() {
        let store = MemoryStore::new();
        store.set("cg:a:1", "", None).await.unwrap();
        store.set("cg:a:2", "", None).await.unwrap();
        store.set("cg:b:1", "", None).await.unwrap();
        let keys = store.keys_matching("cg:a:*").await.unwrap();
        assert_eq!(
            keys,
            HashSet::from(["cg:a:1".to_string(), "cg:a:2".to_string()])
        );
    }
}
