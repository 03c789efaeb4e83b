// SPDX-License-Identifier: Apache-2.0, MIT

//! C5 — Index Keeper: maintains the ordered-set index of devices, live
//! blocks, archived blocks, and the per-device last-good-value hash
//! (spec.md §3, §4.5).
//!
//! Built on [`crate::index_store::IndexStore`] the way `forest_db`'s
//! `RollingDB` layers bookkeeping (current/next epoch sets) on top of a
//! plain `Store` backend: the keeper never touches bytes on disk itself,
//! it only ever round-trips key/score/field triples through the index
//! store.

use crate::error::StoreError;
use crate::index_store::IndexStore;
use crate::model::{DevState, LastGoodValue, ResolvedMetric};

const DEVICES_KEY: &str = "fm:devices";

fn live_blocks_key(devid: u32) -> String {
    format!("fm:blk:{devid}")
}

fn archived_blocks_key(devid: u32) -> String {
    format!("fm:_blk:{devid}")
}

fn lgv_key(devid: u32) -> String {
    format!("fm:lgv:{devid}")
}

/// Keeps `fm:devices`, `fm:blk:<devid>`, `fm:_blk:<devid>`, and
/// `fm:lgv:<devid>` consistent with what's been written and archived.
pub struct IndexKeeper<S: IndexStore> {
    store: S,
}

impl<S: IndexStore> IndexKeeper<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Records that `devid` now has a live record in `block`, updates
    /// its last-good-value hash, and — only on first write of this file
    /// — adds `devid` to `fm:devices`.
    ///
    /// Ordering matches spec.md §4.5: LGV update, then block-index
    /// insert, then (conditionally) the devices-set insert. The caller
    /// (C4) has already committed the file rename by the time this runs,
    /// so any error here leaves an orphan record — tolerated per spec.md
    /// §7, recovered by a subsequent successful write of the same
    /// `(devid, ticktime)`.
    pub async fn put_device_state(
        &self,
        devid: u32,
        block: i64,
        ticktime_secs: u64,
        state: &DevState,
        new_file: bool,
    ) -> Result<(), StoreError> {
        self.update_lgv(devid, state, ticktime_secs).await?;
        self.store
            .zadd(&live_blocks_key(devid), &block.to_string(), block)
            .await?;
        if new_file {
            self.store
                .zadd(DEVICES_KEY, &devid.to_string(), devid as i64)
                .await?;
        }
        Ok(())
    }

    /// For each metric in `state`, overwrite its LGV entry if absent or
    /// strictly older than `ticktime_secs` (first-write-wins at a tie,
    /// spec.md §4.5). Afterward, if any metric was actually overwritten
    /// and the hash's global `ticktime` is absent or `<=` the incoming
    /// value, bump it.
    ///
    /// The global gate is `>=` rather than the per-metric `>`
    /// deliberately: spec.md's REDESIGN FLAGS note calls this out
    /// explicitly as intentional, so the global `ticktime` field is set
    /// exactly once per distinct ticktime value even when every metric
    /// at that ticktime was itself a no-op overwrite of an identical
    /// repeat.
    pub async fn update_lgv(
        &self,
        devid: u32,
        state: &DevState,
        ticktime_secs: u64,
    ) -> Result<(), StoreError> {
        let key = lgv_key(devid);
        let mut any_modified = false;

        for metric in &state.metrics {
            let field = format!("{}_ticktime", metric.id);
            let existing = self.store.hget(&key, &field).await?;
            let existing_ticktime: Option<u64> = existing.and_then(|s| s.parse().ok());

            let should_overwrite = match existing_ticktime {
                None => true,
                Some(prev) => prev < ticktime_secs,
            };
            if !should_overwrite {
                continue;
            }
            any_modified = true;

            let mut fields = vec![
                (format!("{}_ticktime", metric.id), ticktime_secs.to_string()),
                (format!("{}_status", metric.id), metric.status.to_string()),
                (format!("{}_value", metric.id), metric.value.to_string()),
                (format!("{}_scale", metric.id), metric.scale.to_string()),
            ];
            if let Some(ts) = metric.timestamp {
                fields.push((format!("{}_timestamp", metric.id), ts.to_string()));
            }
            self.store.hmset(&key, &fields).await?;
        }

        if any_modified {
            let current_global: Option<u64> =
                self.store.hget(&key, "ticktime").await?.and_then(|s| s.parse().ok());
            let should_bump = match current_global {
                None => true,
                Some(prev) => prev <= ticktime_secs,
            };
            if should_bump {
                self.store
                    .hset(&key, "ticktime", &ticktime_secs.to_string())
                    .await?;
            }
        }

        Ok(())
    }

    /// Moves `block` from the live set to the archived set for `devid`.
    pub async fn mark_device_block_archived(&self, devid: u32, block: i64) -> Result<(), StoreError> {
        self.store
            .zadd(&archived_blocks_key(devid), &block.to_string(), block)
            .await
    }

    /// Removes `block` from the live set for `devid`.
    pub async fn remove_device_block_index(&self, devid: u32, block: i64) -> Result<(), StoreError> {
        self.store
            .zrem(&live_blocks_key(devid), &block.to_string())
            .await
    }

    pub async fn devices(&self) -> Result<Vec<u32>, StoreError> {
        Ok(self
            .store
            .zrange_all(DEVICES_KEY)
            .await?
            .into_iter()
            .filter_map(|m| m.member.parse().ok())
            .collect())
    }

    pub async fn live_blocks(&self, devid: u32) -> Result<Vec<i64>, StoreError> {
        Ok(self
            .store
            .zrange_all(&live_blocks_key(devid))
            .await?
            .into_iter()
            .map(|m| m.score)
            .collect())
    }

    pub async fn archived_blocks(&self, devid: u32) -> Result<Vec<i64>, StoreError> {
        Ok(self
            .store
            .zrange_all(&archived_blocks_key(devid))
            .await?
            .into_iter()
            .map(|m| m.score)
            .collect())
    }

    pub async fn is_block_archived(&self, devid: u32, block: i64) -> Result<bool, StoreError> {
        Ok(self
            .store
            .zrangebyscore(&archived_blocks_key(devid), block, block)
            .await?
            .into_iter()
            .any(|m| m.member == block.to_string()))
    }

    /// Live blocks for `devid` with index strictly greater than `now_block`
    /// (housekeeping's future-pruning candidates, spec.md §4.9).
    pub async fn live_blocks_after(&self, devid: u32, now_block: i64) -> Result<Vec<i64>, StoreError> {
        if now_block == i64::MAX {
            return Ok(Vec::new());
        }
        Ok(self
            .store
            .zrangebyscore(&live_blocks_key(devid), now_block + 1, i64::MAX)
            .await?
            .into_iter()
            .map(|m| m.score)
            .collect())
    }

    /// The `count` lowest-indexed live blocks for `devid`, ascending.
    pub async fn oldest_live_blocks(&self, devid: u32, count: usize) -> Result<Vec<i64>, StoreError> {
        let mut all = self.live_blocks(devid).await?;
        all.sort_unstable();
        all.truncate(count);
        Ok(all)
    }

    /// Decodes `fm:lgv:<devid>` into a [`LastGoodValue`]. Field-id
    /// discovery scans the hash's keys, grouping by the numeric prefix
    /// before each `_`.
    pub async fn last_good_value(&self, devid: u32) -> Result<LastGoodValue, StoreError> {
        let key = lgv_key(devid);
        let last_ticktime = self
            .store
            .hget(&key, "ticktime")
            .await?
            .and_then(|s| s.parse().ok());

        let mut ids = std::collections::BTreeSet::new();
        for field in self.store.hkeys(&key).await? {
            if let Some(id_part) = field.strip_suffix("_ticktime") {
                if let Ok(id) = id_part.parse::<u32>() {
                    ids.insert(id);
                }
            }
        }

        let mut metrics = Vec::new();
        for id in ids {
            if let Some(m) = self.resolve_metric(&key, id).await? {
                metrics.push(m);
            }
        }
        Ok(LastGoodValue {
            last_ticktime,
            metrics,
        })
    }

    async fn resolve_metric(&self, key: &str, id: u32) -> Result<Option<ResolvedMetric>, StoreError> {
        let ticktime: Option<u64> = self
            .store
            .hget(key, &format!("{id}_ticktime"))
            .await?
            .and_then(|s| s.parse().ok());
        let Some(ticktime) = ticktime else {
            return Ok(None);
        };
        let status = self
            .store
            .hget(key, &format!("{id}_status"))
            .await?
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let value = self
            .store
            .hget(key, &format!("{id}_value"))
            .await?
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let scale = self
            .store
            .hget(key, &format!("{id}_scale"))
            .await?
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let timestamp = self
            .store
            .hget(key, &format!("{id}_timestamp"))
            .await?
            .and_then(|s| s.parse().ok());
        Ok(Some(ResolvedMetric {
            id,
            status,
            value,
            scale,
            timestamp,
            ticktime,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index_store::MemoryIndexStore;
    use crate::model::Metric;

    fn state(devid: u32, metrics: Vec<Metric>) -> DevState {
        DevState {
            devid,
            timestamp: 1_700_000_000,
            metrics,
        }
    }

    fn metric(id: u32, value: i32) -> Metric {
        Metric {
            id,
            status: 0,
            value,
            scale: 0,
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn put_device_state_populates_index_and_lgv() {
        let keeper = IndexKeeper::new(MemoryIndexStore::new());
        keeper
            .put_device_state(7, 2023111410, 1_700_000_000, &state(7, vec![metric(1, 100)]), true)
            .await
            .unwrap();

        assert_eq!(keeper.devices().await.unwrap(), vec![7]);
        assert_eq!(keeper.live_blocks(7).await.unwrap(), vec![2023111410]);

        let lgv = keeper.last_good_value(7).await.unwrap();
        assert_eq!(lgv.last_ticktime, Some(1_700_000_000));
        assert_eq!(lgv.metrics.len(), 1);
        assert_eq!(lgv.metrics[0].value, 100);
        assert_eq!(lgv.metrics[0].ticktime, 1_700_000_000);
    }

    #[tokio::test]
    async fn lgv_keeps_newest_value_under_out_of_order_writes() {
        let keeper = IndexKeeper::new(MemoryIndexStore::new());
        keeper
            .update_lgv(1, &state(1, vec![metric(1, 0xA)]), 1000)
            .await
            .unwrap();
        keeper
            .update_lgv(1, &state(1, vec![metric(1, 0xB)]), 500)
            .await
            .unwrap();

        let lgv = keeper.last_good_value(1).await.unwrap();
        assert_eq!(lgv.metrics[0].value, 0xA);
        assert_eq!(lgv.metrics[0].ticktime, 1000);
    }

    #[tokio::test]
    async fn lgv_does_not_overwrite_on_exact_tie() {
        let keeper = IndexKeeper::new(MemoryIndexStore::new());
        keeper
            .update_lgv(1, &state(1, vec![metric(1, 1)]), 1000)
            .await
            .unwrap();
        keeper
            .update_lgv(1, &state(1, vec![metric(1, 2)]), 1000)
            .await
            .unwrap();

        let lgv = keeper.last_good_value(1).await.unwrap();
        assert_eq!(lgv.metrics[0].value, 1);
    }

    #[tokio::test]
    async fn archive_and_remove_move_blocks_between_sets() {
        let keeper = IndexKeeper::new(MemoryIndexStore::new());
        keeper
            .put_device_state(4, 100, 1, &state(4, vec![metric(1, 1)]), true)
            .await
            .unwrap();

        keeper.mark_device_block_archived(4, 100).await.unwrap();
        keeper.remove_device_block_index(4, 100).await.unwrap();

        assert!(keeper.live_blocks(4).await.unwrap().is_empty());
        assert_eq!(keeper.archived_blocks(4).await.unwrap(), vec![100]);
        assert!(keeper.is_block_archived(4, 100).await.unwrap());
    }

    #[tokio::test]
    async fn live_blocks_after_and_oldest_blocks() {
        let keeper = IndexKeeper::new(MemoryIndexStore::new());
        for block in [10, 20, 30, 2099010100] {
            keeper
                .put_device_state(9, block, block as u64, &state(9, vec![metric(1, 1)]), true)
                .await
                .unwrap();
        }

        let future = keeper.live_blocks_after(9, 30).await.unwrap();
        assert_eq!(future, vec![2099010100]);

        let oldest = keeper.oldest_live_blocks(9, 2).await.unwrap();
        assert_eq!(oldest, vec![10, 20]);
    }
}
