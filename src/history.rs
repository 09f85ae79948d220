//! Bounded in-memory run history for operators.

use std::sync::Mutex;

use crate::report::LogEntry;

pub const DEFAULT_CAPACITY: usize = 2000;

#[derive(Debug)]
pub struct History {
    inner: Mutex<Vec<LogEntry>>,
    cap: usize,
}

impl Default for History {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl History {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.clamp(1, 10_000);
        Self {
            inner: Mutex::new(Vec::with_capacity(cap)),
            cap,
        }
    }

    /// Oldest entries fall off once the cap is reached.
    pub fn push(&self, entry: LogEntry) {
        let mut v = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        v.push(entry);
        if v.len() > self.cap {
            let excess = v.len() - self.cap;
            v.drain(0..excess);
        }
    }

    /// Last `n` entries, oldest first.
    pub fn snapshot_last_n(&self, n: usize) -> Vec<LogEntry> {
        let v = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let start = v.len().saturating_sub(n);
        v[start..].to_vec()
    }

    /// Last `n` entries for one watch label, oldest first.
    pub fn for_label(&self, label: &str, n: usize) -> Vec<LogEntry> {
        let v = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut out: Vec<LogEntry> = v.iter().rev().filter(|e| e.label == label).take(n).cloned().collect();
        out.reverse();
        out
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::LogLevel;

    fn entry(label: &str, msg: &str) -> LogEntry {
        LogEntry {
            timestamp: chrono::Utc::now(),
            label: label.into(),
            level: LogLevel::Info,
            message: msg.into(),
            details: String::new(),
        }
    }

    #[test]
    fn capacity_drops_oldest() {
        let h = History::with_capacity(3);
        for i in 0..5 {
            h.push(entry("a", &i.to_string()));
        }
        let msgs: Vec<_> = h.snapshot_last_n(10).into_iter().map(|e| e.message).collect();
        assert_eq!(msgs, vec!["2", "3", "4"]);
    }

    #[test]
    fn label_filter_keeps_order() {
        let h = History::default();
        h.push(entry("a", "1"));
        h.push(entry("b", "2"));
        h.push(entry("a", "3"));
        let msgs: Vec<_> = h.for_label("a", 10).into_iter().map(|e| e.message).collect();
        assert_eq!(msgs, vec!["1", "3"]);
        assert_eq!(h.for_label("a", 1)[0].message, "3");
    }
}
