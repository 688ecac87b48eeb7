//! Statistics snapshot (C10, §6) and CSV export, mirroring the teacher's
//! `metrics::logger::MetricsLogger` (one `csv::Writer<File>`, `serialize`
//! per snapshot).

use anyhow::Result;
use csv::Writer;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TinStats {
    pub rate_bps: u64,
    pub target_us: u64,
    pub interval_us: u64,
    pub packets: u64,
    pub bytes: u64,
    pub dropped: u64,
    pub ecn_marked: u64,
    pub backlog_bytes: u64,
    pub bulk_flow_count: u32,
    /// Present for shape-compatibility; never computed (spec §9 open
    /// question).
    pub peak_delay_us: u64,
    pub avg_delay_us: u64,
    pub way_hits: u64,
    pub way_misses: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalStats {
    pub memory_limit: u64,
    pub memory_used: u64,
    pub tins: Vec<TinStats>,
}

pub struct StatsLogger {
    writer: Writer<File>,
}

impl StatsLogger {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self { writer: Writer::from_path(path)? })
    }

    /// Flattens one row per tin, tagging each with `tick` and `tin_index`
    /// so a single CSV file can be diffed across many `dump_stats` calls.
    pub fn log(&mut self, tick: u64, stats: &GlobalStats) -> Result<()> {
        #[derive(Serialize)]
        struct Row<'a> {
            tick: u64,
            tin_index: usize,
            memory_limit: u64,
            memory_used: u64,
            #[serde(flatten)]
            tin: &'a TinStats,
        }
        for (i, tin) in stats.tins.iter().enumerate() {
            self.writer.serialize(Row {
                tick,
                tin_index: i,
                memory_limit: stats.memory_limit,
                memory_used: stats.memory_used,
                tin,
            })?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
