use serde::{Deserialize, Serialize};

use super::kv::KvStore;
use crate::events::{ChangeEvent, EventBus};

pub const STATS_KEY: &str = "imagine2api_stats";

/// Running dispatch counters. `total == success + failed` after every update.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub total_time: f64,
}

impl Stats {
    /// Whole percent; 100 before anything was dispatched.
    pub fn success_rate(&self) -> u64 {
        if self.total == 0 {
            return 100;
        }
        (self.success as f64 / self.total as f64 * 100.0).round() as u64
    }

    /// Average seconds per successful image, rounded.
    pub fn average_duration(&self) -> u64 {
        if self.success == 0 {
            return 0;
        }
        (self.total_time / self.success as f64).round() as u64
    }
}

#[derive(Debug)]
pub struct StatsTracker {
    stats: Stats,
    kv: KvStore,
    bus: EventBus,
}

impl StatsTracker {
    pub fn load(kv: KvStore, bus: EventBus) -> Self {
        let stats = match kv.get::<Stats>(STATS_KEY) {
            Ok(stats) => stats.unwrap_or_default(),
            Err(err) => {
                tracing::warn!("stats could not be loaded, starting from zero: {err:#}");
                Stats::default()
            }
        };
        Self { stats, kv, bus }
    }

    pub fn stats(&self) -> Stats {
        self.stats
    }

    pub fn record_success(&mut self, count: u64, duration: f64) -> anyhow::Result<()> {
        self.stats.total += count;
        self.stats.success += count;
        self.stats.total_time += duration.max(0.0);
        self.commit()
    }

    pub fn record_failure(&mut self) -> anyhow::Result<()> {
        self.stats.total += 1;
        self.stats.failed += 1;
        self.commit()
    }

    fn commit(&mut self) -> anyhow::Result<()> {
        self.bus.publish(ChangeEvent::StatsChanged(self.stats));
        self.kv.set(STATS_KEY, &self.stats)?;
        Ok(())
    }
}
