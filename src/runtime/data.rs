//! Test data feeders
//!
//! Each iteration pulls exactly one record. A feeder returning `None` is
//! exhausted, which is fatal for the iteration that asked.

use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::Value;

/// Source of per-iteration data records
pub trait DataFeeder: Send + Sync {
    /// Next record, or `None` once exhausted
    fn feed(&self) -> Option<Value>;
}

/// Feeder over an in-memory list of records
#[derive(Debug)]
pub struct TestData {
    records: Vec<Value>,
    circular: bool,
    cursor: AtomicUsize,
}

impl Default for TestData {
    /// Yields `{}` forever
    fn default() -> Self {
        Self::from_records(vec![Value::Object(Default::default())]).circular(true)
    }
}

impl TestData {
    pub fn from_records(records: Vec<Value>) -> Self {
        Self {
            records,
            circular: false,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Wrap around to the first record instead of reporting exhaustion
    pub fn circular(mut self, circular: bool) -> Self {
        self.circular = circular;
        self
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl DataFeeder for TestData {
    fn feed(&self) -> Option<Value> {
        if self.records.is_empty() {
            return None;
        }
        let index = self.cursor.fetch_add(1, Ordering::SeqCst);
        if self.circular {
            Some(self.records[index % self.records.len()].clone())
        } else {
            self.records.get(index).cloned()
        }
    }
}
