//! Minimal big-endian binary helpers for the handful of fixed-width fields
//! in the replication protocol's CopyData envelopes (XLogData, keepalive,
//! standby status update). Everything else in the stream is plugin payload
//! bytes that the formatter owns.

use crate::errors::{Error, Result};

pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() < self.pos + n {
            return Err(Error::protocol("truncated replication message"));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        Ok(i64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }

    /// Remaining bytes, consuming the rest of the buffer.
    pub fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }
}

/// Encodes a standby status update (`r` message): write/flush/apply LSN,
/// a client timestamp in the Postgres epoch, and a reply-requested flag.
pub fn encode_feedback(flush_lsn: u64, client_time: i64) -> [u8; 34] {
    let mut buf = [0u8; 34];
    buf[0] = b'r';
    buf[1..9].copy_from_slice(&flush_lsn.to_be_bytes());
    buf[9..17].copy_from_slice(&flush_lsn.to_be_bytes());
    buf[17..25].copy_from_slice(&flush_lsn.to_be_bytes());
    buf[25..33].copy_from_slice(&client_time.to_be_bytes());
    buf[33] = 0;
    buf
}

const PG_EPOCH_OFFSET_SECS: i64 = 946_684_800;

/// Microseconds since the Postgres epoch (2000-01-01), as required by the
/// replication protocol's timestamp fields.
pub fn now_pg_micros() -> i64 {
    chrono::Utc::now().timestamp_micros() - PG_EPOCH_OFFSET_SECS * 1_000_000
}

/// Renders a protocol timestamp field (microseconds since the Postgres
/// epoch) as a human-readable UTC string, for log lines.
pub fn format_pg_micros(ts: i64) -> String {
    let secs = ts.div_euclid(1_000_000) + PG_EPOCH_OFFSET_SECS;
    let nsecs = ts.rem_euclid(1_000_000) * 1_000;
    match chrono::DateTime::from_timestamp(secs, nsecs as u32) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S%.3f UTC").to_string(),
        None => format!("<invalid pg timestamp {ts}>"),
    }
}
