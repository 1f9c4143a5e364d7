//! Batches serialized records under dual size/count ceilings and seals a
//! batch for transmission when it would overflow (spec.md 4.4).

use crate::errors::{Error, Result};

pub const MAX_BATCH_COUNT: usize = 500;
pub const MAX_BATCH_BYTES: usize = 4 * 1024 * 1024;
pub const MAX_RECORD_BYTES: usize = 1000 * 1024;

/// One record inside a `Batch`. Carried verbatim; re-aggregation on
/// partial-failure retry never re-serializes this payload.
#[derive(Debug, Clone)]
pub struct BatchRecord {
    pub data: Vec<u8>,
    /// The LSN of the RawMessage that produced this record, used by the
    /// supervisor to pick the feedback point once the whole batch lands.
    pub lsn: u64,
}

#[derive(Debug, Default, Clone)]
pub struct Batch {
    records: Vec<BatchRecord>,
    bytes: usize,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn records(&self) -> &[BatchRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<BatchRecord> {
        self.records
    }

    /// LSN of the record that would trigger feedback once this batch lands:
    /// the last one contributed, per spec.md 9(ii).
    pub fn last_lsn(&self) -> Option<u64> {
        self.records.last().map(|r| r.lsn)
    }

    fn push(&mut self, record: BatchRecord) {
        self.bytes += record.data.len();
        self.records.push(record);
    }
}

#[derive(Debug)]
pub struct Aggregator {
    current: Batch,
    max_batch_count: usize,
    max_batch_bytes: usize,
    max_record_bytes: usize,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl Aggregator {
    pub fn new() -> Self {
        Self::with_limits(MAX_BATCH_COUNT, MAX_BATCH_BYTES, MAX_RECORD_BYTES)
    }

    pub fn with_limits(max_batch_count: usize, max_batch_bytes: usize, max_record_bytes: usize) -> Self {
        Self {
            current: Batch::default(),
            max_batch_count,
            max_batch_bytes,
            max_record_bytes,
        }
    }

    /// Adds one record. Returns the sealed batch if adding `record` would
    /// overflow the current one; the new current batch then contains only
    /// `record`. Returns `None` when `record` was simply appended.
    pub fn add(&mut self, record: BatchRecord) -> Result<Option<Batch>> {
        if record.data.len() > self.max_record_bytes {
            return Err(Error::OversizedRecord(record.data.len(), self.max_record_bytes));
        }

        let would_overflow = self.current.count() >= self.max_batch_count
            || self.current.bytes() + record.data.len() > self.max_batch_bytes;

        if would_overflow {
            let sealed = std::mem::take(&mut self.current);
            self.current.push(record);
            Ok(Some(sealed))
        } else {
            self.current.push(record);
            Ok(None)
        }
    }

    /// Returns and clears the current batch regardless of fill level.
    pub fn flush(&mut self) -> Batch {
        std::mem::take(&mut self.current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(bytes: &[u8], lsn: u64) -> BatchRecord {
        BatchRecord {
            data: bytes.to_vec(),
            lsn,
        }
    }

    #[test]
    fn dual_ceiling_seals_on_overflow() {
        // spec.md 8 scenario 4: MAX_BATCH_COUNT=5, MAX_BATCH_BYTES=20, MAX_RECORD_BYTES=10.
        let mut agg = Aggregator::with_limits(5, 20, 10);
        let words: [&[u8]; 5] = [b"f\xc3\xb8\xc3\xb8", b"bar", b"baz", b"fizz", b"buzz"];
        for (i, w) in words.iter().enumerate() {
            let sealed = agg.add(record(w, i as u64)).unwrap();
            assert!(sealed.is_none());
        }
        assert_eq!(agg.current.count(), 5);
        assert_eq!(agg.current.bytes(), 4 + 3 + 3 + 4 + 4);

        let sealed = agg.add(record(b"next", 5)).unwrap();
        let sealed = sealed.expect("sixth add should have sealed the full batch");
        assert_eq!(sealed.count(), 5);
        assert_eq!(agg.current.count(), 1);
    }

    #[test]
    fn oversized_record_is_rejected() {
        let mut agg = Aggregator::with_limits(5, 20, 10);
        let err = agg.add(record(b"blaaaaaaaaaaaaaaaaaaaaaaaah", 0)).unwrap_err();
        assert!(matches!(err, Error::OversizedRecord(_, _)));
    }

    #[test]
    fn flush_returns_partial_batch_and_clears_it() {
        let mut agg = Aggregator::new();
        agg.add(record(b"x", 0)).unwrap();
        let flushed = agg.flush();
        assert_eq!(flushed.count(), 1);
        assert_eq!(agg.current.count(), 0);
    }

    #[test]
    fn records_remain_in_arrival_order() {
        let mut agg = Aggregator::new();
        agg.add(record(b"a", 0)).unwrap();
        agg.add(record(b"b", 1)).unwrap();
        agg.add(record(b"c", 2)).unwrap();
        let batch = agg.flush();
        let lsns: Vec<u64> = batch.records().iter().map(|r| r.lsn).collect();
        assert_eq!(lsns, vec![0, 1, 2]);
    }

    #[test]
    fn byte_ceiling_seals_before_count_ceiling() {
        let mut agg = Aggregator::new();
        agg.add(record(&vec![b'a'; MAX_BATCH_BYTES - 1], 0)).unwrap();
        let sealed = agg.add(record(b"xy", 1)).unwrap();
        assert!(sealed.is_some());
    }
}
