//! Operation counters.

use parking_lot::Mutex;
use std::collections::BTreeMap;

/// Invocation counts keyed `"<operation>:<table>"`.
#[derive(Debug, Default)]
pub struct Insights {
    counters: Mutex<BTreeMap<String, u64>>,
}

impl Insights {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, operation: &str, table: &str) {
        *self
            .counters
            .lock()
            .entry(format!("{}:{}", operation, table))
            .or_insert(0) += 1;
    }

    pub fn count(&self, operation: &str, table: &str) -> u64 {
        self.counters
            .lock()
            .get(&format!("{}:{}", operation, table))
            .copied()
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counters.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_per_operation_and_table() {
        let insights = Insights::new();
        insights.record("elf:teach", "todo");
        insights.record("elf:teach", "todo");
        insights.record("elf:learn", "todo");

        assert_eq!(insights.count("elf:teach", "todo"), 2);
        assert_eq!(insights.count("elf:teach", "other"), 0);
        assert_eq!(insights.snapshot().get("elf:learn:todo"), Some(&1));
    }
}
