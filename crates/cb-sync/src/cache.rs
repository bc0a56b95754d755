//! Lookup response cache
//!
//! Keyed by page URL. Entries expire a fixed time after their last read or
//! write; a periodic sweep drops expired entries and, when the cache has
//! grown past its high-water mark, the least recently used ones.
//!
//! Configuration changes do not invalidate entries. Responses can be stale
//! for at most one TTL after a change.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub ttl: Duration,
    pub sweep_period: Duration,
    pub high_water: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(120),
            sweep_period: Duration::from_secs(60),
            high_water: 1200,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub before: usize,
    pub expired: usize,
    pub evicted: usize,
    pub after: usize,
}

struct Entry<V> {
    value: V,
    touched: Instant,
}

pub struct ResponseCache<V> {
    entries: DashMap<String, Entry<V>>,
    settings: CacheSettings,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(settings: CacheSettings) -> Self {
        Self {
            entries: DashMap::new(),
            settings,
        }
    }

    pub fn settings(&self) -> CacheSettings {
        self.settings
    }

    /// Returns the cached value and refreshes its timestamp.
    ///
    /// An entry past its TTL that the sweeper has not reached yet is a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let ttl = self.settings.ttl;
        {
            let mut entry = self.entries.get_mut(key)?;
            if entry.touched.elapsed() < ttl {
                entry.touched = Instant::now();
                return Some(entry.value.clone());
            }
        }
        self.entries.remove_if(key, |_, entry| entry.touched.elapsed() >= ttl);
        None
    }

    pub fn set(&self, key: impl Into<String>, value: V) {
        self.entries.insert(
            key.into(),
            Entry {
                value,
                touched: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries. When the cache started above its high-water
    /// mark, also drop the oldest entries until
    /// `max(size / 2, size - high_water)` entries were cut in total.
    pub fn sweep(&self) -> SweepStats {
        let before = self.entries.len();
        let now = Instant::now();
        let ttl = self.settings.ttl;

        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.touched) < ttl);
        let expired = before - self.entries.len();

        let mut evicted = 0;
        if before > self.settings.high_water {
            let cut = (before / 2).max(before - self.settings.high_water);
            let remaining = cut.saturating_sub(expired);
            if remaining > 0 {
                let mut ages: Vec<(String, Instant)> = self
                    .entries
                    .iter()
                    .map(|entry| (entry.key().clone(), entry.value().touched))
                    .collect();
                ages.sort_by_key(|(_, touched)| *touched);

                for (key, _) in ages.into_iter().take(remaining) {
                    if self.entries.remove(&key).is_some() {
                        evicted += 1;
                    }
                }
            }
            log::warn!(
                "Lookup cache grew to {} entries (high water {}), cut {}",
                before,
                self.settings.high_water,
                expired + evicted
            );
        }

        let stats = SweepStats {
            before,
            expired,
            evicted,
            after: self.entries.len(),
        };
        log::debug!("Cache sweep: {:?}", stats);
        stats
    }
}

impl<V: Clone + Send + Sync + 'static> ResponseCache<V> {
    /// Sweep every `sweep_period` until the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);
        let period = self.settings.sweep_period;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                cache.sweep();
            }
        })
    }
}
