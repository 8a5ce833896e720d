use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

/// Sorted-set shaped counter storage used by the sliding-window limiter.
/// Entries are (score, member) pairs per key with an optional key TTL. The
/// limiter treats any error here as a signal to fail open, so implementations
/// are free to be best-effort.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn range_by_score(&self, key: &str, min: i64, max: i64) -> anyhow::Result<Vec<i64>>;
    async fn add_scored(&self, key: &str, score: i64, member: String) -> anyhow::Result<()>;
    async fn remove_range_by_score(&self, key: &str, min: i64, max: i64) -> anyhow::Result<u64>;
    async fn expire(&self, key: &str, seconds: u64) -> anyhow::Result<()>;
}

#[derive(Default)]
struct Window {
    entries: Vec<(i64, String)>,
    deadline: Option<Instant>,
}

/// In-process counter store. Rate-limit windows have no durability
/// requirement; losing this state only resets limits.
#[derive(Default)]
pub struct MemoryCounterStore {
    windows: Mutex<HashMap<String, Window>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_live_window<T>(&self, key: &str, f: impl FnOnce(&mut Window) -> T) -> T {
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(window) = windows.get(key) {
            if window.deadline.is_some_and(|d| d <= Instant::now()) {
                windows.remove(key);
            }
        }
        f(windows.entry(key.to_string()).or_default())
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn range_by_score(&self, key: &str, min: i64, max: i64) -> anyhow::Result<Vec<i64>> {
        Ok(self.with_live_window(key, |w| {
            w.entries
                .iter()
                .filter(|(score, _)| (min..=max).contains(score))
                .map(|(score, _)| *score)
                .collect()
        }))
    }

    async fn add_scored(&self, key: &str, score: i64, member: String) -> anyhow::Result<()> {
        self.with_live_window(key, |w| w.entries.push((score, member)));
        Ok(())
    }

    async fn remove_range_by_score(&self, key: &str, min: i64, max: i64) -> anyhow::Result<u64> {
        Ok(self.with_live_window(key, |w| {
            let before = w.entries.len();
            w.entries.retain(|(score, _)| !(min..=max).contains(score));
            (before - w.entries.len()) as u64
        }))
    }

    async fn expire(&self, key: &str, seconds: u64) -> anyhow::Result<()> {
        self.with_live_window(key, |w| {
            w.deadline = Some(Instant::now() + Duration::from_secs(seconds));
        });
        Ok(())
    }
}
