use std::collections::VecDeque;

use crate::protocol::HistoryEntry;

pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Fixed-capacity log of completed tool invocations. Appends past capacity
/// evict the oldest entry.
#[derive(Debug)]
pub struct HistoryLog {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl HistoryLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Appends `entry`, returning how many entries were evicted.
    pub fn push(&mut self, entry: HistoryEntry) -> usize {
        self.entries.push_back(entry);
        let mut evicted = 0;
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// The most recent `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<HistoryEntry> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn snapshot(&self) -> Vec<HistoryEntry> {
        self.entries.iter().cloned().collect()
    }
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

/// Truncates `value` to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(n: usize) -> HistoryEntry {
        HistoryEntry {
            timestamp: Utc::now(),
            tool_name: format!("tool-{n}"),
            tool_input_summary: String::new(),
            result_summary: String::new(),
            handle: None,
        }
    }

    fn names(entries: &[HistoryEntry]) -> Vec<String> {
        entries.iter().map(|entry| entry.tool_name.clone()).collect()
    }

    #[test]
    fn keeps_most_recent_entries_in_arrival_order() {
        let capacity = 5;
        for extra in [0usize, 1, 3, 12] {
            let mut log = HistoryLog::new(capacity);
            for n in 0..capacity + extra {
                log.push(entry(n));
            }
            assert_eq!(log.len(), capacity);
            let expected: Vec<String> = (extra..capacity + extra)
                .map(|n| format!("tool-{n}"))
                .collect();
            assert_eq!(names(&log.snapshot()), expected);
        }
    }

    #[test]
    fn push_reports_evictions() {
        let mut log = HistoryLog::new(2);
        assert_eq!(log.push(entry(0)), 0);
        assert_eq!(log.push(entry(1)), 0);
        assert_eq!(log.push(entry(2)), 1);
        assert_eq!(names(&log.snapshot()), vec!["tool-1", "tool-2"]);
    }

    #[test]
    fn recent_is_bounded_by_length() {
        let mut log = HistoryLog::default();
        assert!(log.recent(20).is_empty());
        for n in 0..3 {
            log.push(entry(n));
        }
        assert_eq!(names(&log.recent(20)), vec!["tool-0", "tool-1", "tool-2"]);
        assert_eq!(names(&log.recent(2)), vec!["tool-1", "tool-2"]);
    }

    #[test]
    fn zero_capacity_retains_nothing() {
        let mut log = HistoryLog::new(0);
        assert_eq!(log.push(entry(0)), 1);
        assert!(log.is_empty());
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("한국어입니다", 2), "한국");
        assert_eq!(truncate_chars("", 0), "");
    }
}
