//! Snapshot history, the boundary with the CI host. The host persists one
//! JSON array across builds; this module appends the current build's
//! snapshot and loads the slice the trending engine consumes.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::error::{LoadCtlError, Result};
use crate::model::TrendingSnapshot;

/// One build's snapshot, as stored in the history file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub build_id: u32,
    pub build_date: String,
    pub snapshot: TrendingSnapshot,
}

/// Read the raw history. A missing or unreadable file is an empty history,
/// not an error: the first build has nothing to trend against.
pub fn load_history(path: &Path) -> Vec<HistoryEntry> {
    match std::fs::read_to_string(path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("Failed to parse history file {path:?}: {e}, starting fresh");
            Vec::new()
        }),
        Err(_) => Vec::new(),
    }
}

/// Append an entry and write the file back.
pub fn append_entry(path: &Path, entry: HistoryEntry) -> Result<()> {
    let mut entries = load_history(path);
    entries.push(entry);
    let json = serde_json::to_string_pretty(&entries)
        .map_err(|e| LoadCtlError::Protocol(format!("failed to serialize history: {e}")))?;
    std::fs::write(path, json)?;
    Ok(())
}

/// The slice the engine consumes: newest build first, same test and
/// tenant as the anchor entry, at most `runs_count` entries. The engine
/// itself does not re-validate identity.
pub fn select_for_analysis(mut entries: Vec<HistoryEntry>, runs_count: u32) -> Vec<HistoryEntry> {
    entries.sort_by(|a, b| b.build_id.cmp(&a.build_id));

    let Some(anchor) = entries.first() else {
        return entries;
    };
    let test_id = anchor.snapshot.test_id;
    let tenant_id = anchor.snapshot.tenant_id.clone();

    entries
        .into_iter()
        .filter(|e| e.snapshot.test_id == test_id && e.snapshot.tenant_id == tenant_id)
        .take(runs_count as usize)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_snapshot(run_id: u32, test_id: u32, tenant: &str) -> TrendingSnapshot {
        TrendingSnapshot {
            run_id,
            test_id,
            test_name: "t".to_string(),
            status: "PASSED".to_string(),
            vusers: 1,
            duration: 60.0,
            percentile: 90,
            avg_throughput: 0.0,
            total_throughput: 0.0,
            avg_hits: 0.0,
            total_hits: 0.0,
            total_tx_passed: 1,
            total_tx_failed: 0,
            errors_per_sec: 0.0,
            start_time: "0".to_string(),
            transactions: Vec::new(),
            tenant_id: tenant.to_string(),
            benchmark_id: None,
            benchmark: None,
        }
    }

    fn make_entry(build_id: u32, run_id: u32, test_id: u32, tenant: &str) -> HistoryEntry {
        HistoryEntry {
            build_id,
            build_date: "2026.01.01 00:00:00".to_string(),
            snapshot: make_snapshot(run_id, test_id, tenant),
        }
    }

    #[test]
    fn test_select_orders_newest_first_and_truncates() {
        let entries = vec![
            make_entry(1, 10, 7, "a"),
            make_entry(3, 30, 7, "a"),
            make_entry(2, 20, 7, "a"),
        ];
        let selected = select_for_analysis(entries, 2);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].build_id, 3);
        assert_eq!(selected[1].build_id, 2);
    }

    #[test]
    fn test_select_filters_other_tests_and_tenants() {
        let entries = vec![
            make_entry(4, 40, 7, "a"),
            make_entry(3, 30, 8, "a"),
            make_entry(2, 20, 7, "b"),
            make_entry(1, 10, 7, "a"),
        ];
        let selected = select_for_analysis(entries, 10);
        assert_eq!(selected.len(), 2);
        assert_eq!(selected[0].snapshot.run_id, 40);
        assert_eq!(selected[1].snapshot.run_id, 10);
    }

    #[test]
    fn test_select_empty_history() {
        assert!(select_for_analysis(Vec::new(), 5).is_empty());
    }

    #[test]
    fn test_history_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");

        assert!(load_history(&path).is_empty());

        append_entry(&path, make_entry(1, 10, 7, "a")).unwrap();
        append_entry(&path, make_entry(2, 20, 7, "a")).unwrap();

        let entries = load_history(&path);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].build_id, 1);
        assert_eq!(entries[1].snapshot.run_id, 20);
    }

    #[test]
    fn test_corrupt_history_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(load_history(&path).is_empty());
    }
}
