// SPDX-License-Identifier: Apache-2.0, MIT

//! The ordered-set / hash-map key-value primitives spec.md §6 requires of
//! the index store, abstracted behind [`IndexStore`] so [`crate::index`]
//! (C5) doesn't care whether it's backed by an embedded engine or, one
//! day, a networked one (spec.md §9: "a production implementation may
//! substitute a local embedded index as long as the same commands are
//! available with the same semantics").
//!
//! Grounded in the teacher's multi-backend `Store` trait
//! (`forest_db::Store`, historically `lib.rs`) and its range-scannable
//! `sled` backend (historically `sled.rs`): [`SledIndexStore`] encodes
//! ordered-set members as `<key>\0<8-byte-BE-score>\0<member>` inside a
//! single `sled::Tree`, the same way `forest_db`'s `ProxyStore` buckets
//! blocks by epoch — sled's native lexicographic scan over a byte-ordered
//! key gives score order for free. [`MemoryIndexStore`] plays the same
//! role `MemoryDB` plays relative to `SledDb`/`RocksDb`: a fast,
//! dependency-free stand-in used by default in tests.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::StoreError;

/// A single member of an ordered set, with its score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredMember {
    pub score: i64,
    pub member: String,
}

/// The ordered-set / hash-map commands spec.md §6 lists: add/remove a
/// scored member, rank- and score-bounded range queries in either
/// direction, cardinality, and hash get/set/multi-set.
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// `zadd`: insert or update `member`'s score in the ordered set
    /// `key`.
    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), StoreError>;

    /// `zrem`: remove `member` from the ordered set `key`.
    async fn zrem(&self, key: &str, member: &str) -> Result<(), StoreError>;

    /// `zrangebyscore`: members of `key` with `min <= score <= max`,
    /// ascending.
    async fn zrangebyscore(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<Vec<ScoredMember>, StoreError>;

    /// `zrevrange`: up to `limit` members of `key` with `score <= max`,
    /// in descending score order.
    async fn zrevrange(
        &self,
        key: &str,
        max: i64,
        limit: usize,
    ) -> Result<Vec<ScoredMember>, StoreError>;

    /// `zcard`: number of members in the ordered set `key`.
    async fn zcard(&self, key: &str) -> Result<u64, StoreError>;

    /// `zrange`: all members of `key`, ascending by score.
    async fn zrange_all(&self, key: &str) -> Result<Vec<ScoredMember>, StoreError> {
        self.zrangebyscore(key, i64::MIN, i64::MAX).await
    }

    /// `hget`: a single field of hash `key`.
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    /// `hset`: a single field of hash `key`.
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    /// `hmset`: multiple fields of hash `key`, atomically from the
    /// caller's point of view.
    async fn hmset(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError>;

    /// `hkeys`: every field name currently set on hash `key`.
    async fn hkeys(&self, key: &str) -> Result<Vec<String>, StoreError>;
}

/// In-process, `BTreeMap`-backed [`IndexStore`] used by default in tests
/// (mirrors `forest_db::MemoryDB`'s role as the dependency-free backend).
#[derive(Debug, Default, Clone)]
pub struct MemoryIndexStore {
    zsets: Arc<RwLock<BTreeMap<String, BTreeMap<String, i64>>>>,
    hashes: Arc<RwLock<BTreeMap<String, BTreeMap<String, String>>>>,
}

impl MemoryIndexStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IndexStore for MemoryIndexStore {
    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), StoreError> {
        self.zsets
            .write()
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        if let Some(set) = self.zsets.write().get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn zrangebyscore(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<Vec<ScoredMember>, StoreError> {
        let zsets = self.zsets.read();
        let mut out: Vec<ScoredMember> = zsets
            .get(key)
            .into_iter()
            .flat_map(|set| set.iter())
            .filter(|(_, &score)| score >= min && score <= max)
            .map(|(member, &score)| ScoredMember {
                score,
                member: member.clone(),
            })
            .collect();
        out.sort_by_key(|m| m.score);
        Ok(out)
    }

    async fn zrevrange(
        &self,
        key: &str,
        max: i64,
        limit: usize,
    ) -> Result<Vec<ScoredMember>, StoreError> {
        let zsets = self.zsets.read();
        let mut out: Vec<ScoredMember> = zsets
            .get(key)
            .into_iter()
            .flat_map(|set| set.iter())
            .filter(|(_, &score)| score <= max)
            .map(|(member, &score)| ScoredMember {
                score,
                member: member.clone(),
            })
            .collect();
        out.sort_by(|a, b| b.score.cmp(&a.score));
        out.truncate(limit);
        Ok(out)
    }

    async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        Ok(self.zsets.read().get(key).map(|s| s.len()).unwrap_or(0) as u64)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .hashes
            .read()
            .get(key)
            .and_then(|h| h.get(field))
            .cloned())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.hashes
            .write()
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hmset(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError> {
        let mut hashes = self.hashes.write();
        let h = hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            h.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hkeys(&self, key: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .hashes
            .read()
            .get(key)
            .map(|h| h.keys().cloned().collect())
            .unwrap_or_default())
    }
}

/// A `sled`-backed [`IndexStore`]: one `Tree` for ordered sets, keyed
/// `<set>\0<8-byte-BE-score-plus-offset>\0<member>` so a lexicographic
/// range scan is a score range scan; one `Tree` for hashes, keyed
/// `<hash>\0<field>`.
#[derive(Debug, Clone)]
pub struct SledIndexStore {
    zsets: sled::Tree,
    hashes: sled::Tree,
}

/// Scores are stored as `score XOR i64::MIN` so their big-endian byte
/// representation sorts the same way the signed integers do.
fn score_key_bytes(score: i64) -> [u8; 8] {
    ((score as i128 - i64::MIN as i128) as u64).to_be_bytes()
}

fn decode_score(bytes: &[u8]) -> i64 {
    let raw = u64::from_be_bytes(bytes.try_into().unwrap_or([0; 8]));
    (raw as i128 + i64::MIN as i128) as i64
}

fn zset_entry_key(set: &str, score: i64, member: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(set.len() + 1 + 8 + 1 + member.len());
    k.extend_from_slice(set.as_bytes());
    k.push(0);
    k.extend_from_slice(&score_key_bytes(score));
    k.push(0);
    k.extend_from_slice(member.as_bytes());
    k
}

fn zset_prefix(set: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(set.len() + 1);
    k.extend_from_slice(set.as_bytes());
    k.push(0);
    k
}

fn decode_zset_entry(prefix_len: usize, key: &[u8]) -> Option<ScoredMember> {
    let rest = key.get(prefix_len..)?;
    let score = decode_score(rest.get(..8)?);
    let member = std::str::from_utf8(rest.get(9..)?).ok()?.to_string();
    Some(ScoredMember { score, member })
}

fn hash_field_key(hash: &str, field: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(hash.len() + 1 + field.len());
    k.extend_from_slice(hash.as_bytes());
    k.push(0);
    k.extend_from_slice(field.as_bytes());
    k
}

impl SledIndexStore {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        Self::from_db(&db)
    }

    pub fn temporary() -> Result<Self, StoreError> {
        let db = sled::Config::default().temporary(true).open()?;
        Self::from_db(&db)
    }

    fn from_db(db: &sled::Db) -> Result<Self, StoreError> {
        Ok(Self {
            zsets: db.open_tree("fm_zsets")?,
            hashes: db.open_tree("fm_hashes")?,
        })
    }

    /// First, find any existing entry for `member` in `set` (need to
    /// remove the old score key before inserting the new one — sled
    /// trees are keyed by the full score-prefixed key, so changing a
    /// member's score means a different key).
    fn find_existing_score(&self, set: &str, member: &str) -> Result<Option<i64>, StoreError> {
        let prefix = zset_prefix(set);
        for item in self.zsets.scan_prefix(&prefix) {
            let (k, _) = item?;
            if let Some(entry) = decode_zset_entry(prefix.len(), &k) {
                if entry.member == member {
                    return Ok(Some(entry.score));
                }
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl IndexStore for SledIndexStore {
    async fn zadd(&self, key: &str, member: &str, score: i64) -> Result<(), StoreError> {
        if let Some(old_score) = self.find_existing_score(key, member)? {
            if old_score == score {
                return Ok(());
            }
            self.zsets.remove(zset_entry_key(key, old_score, member))?;
        }
        self.zsets.insert(zset_entry_key(key, score, member), &[])?;
        Ok(())
    }

    async fn zrem(&self, key: &str, member: &str) -> Result<(), StoreError> {
        if let Some(score) = self.find_existing_score(key, member)? {
            self.zsets.remove(zset_entry_key(key, score, member))?;
        }
        Ok(())
    }

    async fn zrangebyscore(
        &self,
        key: &str,
        min: i64,
        max: i64,
    ) -> Result<Vec<ScoredMember>, StoreError> {
        let prefix = zset_prefix(key);
        let mut out = Vec::new();
        for item in self.zsets.scan_prefix(&prefix) {
            let (k, _) = item?;
            if let Some(entry) = decode_zset_entry(prefix.len(), &k) {
                if entry.score >= min && entry.score <= max {
                    out.push(entry);
                }
            }
        }
        out.sort_by_key(|m| m.score);
        Ok(out)
    }

    async fn zrevrange(
        &self,
        key: &str,
        max: i64,
        limit: usize,
    ) -> Result<Vec<ScoredMember>, StoreError> {
        let prefix = zset_prefix(key);
        let mut out = Vec::new();
        for item in self.zsets.scan_prefix(&prefix) {
            let (k, _) = item?;
            if let Some(entry) = decode_zset_entry(prefix.len(), &k) {
                if entry.score <= max {
                    out.push(entry);
                }
            }
        }
        out.sort_by(|a, b| b.score.cmp(&a.score));
        out.truncate(limit);
        Ok(out)
    }

    async fn zcard(&self, key: &str) -> Result<u64, StoreError> {
        let prefix = zset_prefix(key);
        Ok(self.zsets.scan_prefix(&prefix).count() as u64)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let k = hash_field_key(key, field);
        Ok(self
            .hashes
            .get(k)?
            .map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.hashes
            .insert(hash_field_key(key, field), value.as_bytes())?;
        Ok(())
    }

    async fn hmset(&self, key: &str, fields: &[(String, String)]) -> Result<(), StoreError> {
        let mut batch = sled::Batch::default();
        for (field, value) in fields {
            batch.insert(hash_field_key(key, field), value.as_bytes());
        }
        self.hashes.apply_batch(batch)?;
        Ok(())
    }

    async fn hkeys(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let prefix = {
            let mut p = key.as_bytes().to_vec();
            p.push(0);
            p
        };
        let mut out = Vec::new();
        for item in self.hashes.scan_prefix(&prefix) {
            let (k, _) = item?;
            if let Some(field) = k.get(prefix.len()..) {
                if let Ok(field) = std::str::from_utf8(field) {
                    out.push(field.to_string());
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exercises_zset_order(store: &impl IndexStore) {
        store.zadd("k", "a", 30).await.unwrap();
        store.zadd("k", "b", 10).await.unwrap();
        store.zadd("k", "c", 20).await.unwrap();
        let asc = store.zrangebyscore("k", i64::MIN, i64::MAX).await.unwrap();
        assert_eq!(
            asc.iter().map(|m| m.member.as_str()).collect::<Vec<_>>(),
            vec!["b", "c", "a"]
        );
        let desc = store.zrevrange("k", i64::MAX, 2).await.unwrap();
        assert_eq!(
            desc.iter().map(|m| m.member.as_str()).collect::<Vec<_>>(),
            vec!["a", "c"]
        );
        assert_eq!(store.zcard("k").await.unwrap(), 3);
        store.zrem("k", "a").await.unwrap();
        assert_eq!(store.zcard("k").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn memory_store_orders_by_score() {
        exercises_zset_order(&MemoryIndexStore::new()).await;
    }

    #[tokio::test]
    async fn sled_store_orders_by_score() {
        exercises_zset_order(&SledIndexStore::temporary().unwrap()).await;
    }

    #[tokio::test]
    async fn sled_store_handles_negative_scores() {
        let store = SledIndexStore::temporary().unwrap();
        store.zadd("k", "neg", -5).await.unwrap();
        store.zadd("k", "zero", 0).await.unwrap();
        store.zadd("k", "pos", 5).await.unwrap();
        let asc = store.zrangebyscore("k", i64::MIN, i64::MAX).await.unwrap();
        assert_eq!(
            asc.iter().map(|m| m.member.as_str()).collect::<Vec<_>>(),
            vec!["neg", "zero", "pos"]
        );
    }

    #[tokio::test]
    async fn hash_fields_round_trip() {
        let store = MemoryIndexStore::new();
        store.hset("h", "a", "1").await.unwrap();
        store
            .hmset("h", &[("b".into(), "2".into()), ("c".into(), "3".into())])
            .await
            .unwrap();
        assert_eq!(store.hget("h", "a").await.unwrap(), Some("1".into()));
        assert_eq!(store.hget("h", "b").await.unwrap(), Some("2".into()));
        assert_eq!(store.hget("h", "missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn hkeys_lists_fields_for_both_backends() {
        for store in [
            Box::new(MemoryIndexStore::new()) as Box<dyn IndexStore>,
            Box::new(SledIndexStore::temporary().unwrap()) as Box<dyn IndexStore>,
        ] {
            store.hset("h", "a", "1").await.unwrap();
            store.hset("h", "b", "2").await.unwrap();
            store.hset("other", "c", "3").await.unwrap();

            let mut keys = store.hkeys("h").await.unwrap();
            keys.sort();
            assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
        }
    }
}
