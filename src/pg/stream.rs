//! The replication COPY BOTH loop: dispatches keepalive ('k') and XLogData
//! ('w') messages off the wire and turns confirmed progress into standby
//! status update feedback (spec.md 4.2, 4.4).

use tracing::{debug, trace};

use crate::errors::{Error, Result};
use crate::pg::connection::Connection;
use crate::pg::wire::{encode_feedback, format_pg_micros, now_pg_micros, Reader};

/// A decoded row of plugin output, with the LSNs needed to acknowledge it.
pub struct RawMessage {
    pub payload: Vec<u8>,
    pub data_start_lsn: u64,
    pub wal_end_lsn: u64,
    pub send_time: i64,
}

pub struct ReplicationStream {
    conn: Connection,
}

impl ReplicationStream {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Blocks for the next payload row. Transparently answers keepalives
    /// that request an immediate reply; returns `Ok(None)` only if the
    /// server ends the COPY cleanly (it never does in normal operation).
    pub fn next_message(&self) -> Result<Option<RawMessage>> {
        loop {
            let data = match self.conn.get_copy_data()? {
                Some(data) => data,
                None => return Ok(None),
            };
            if data.is_empty() {
                return Err(Error::protocol("empty CopyData message"));
            }

            let mut reader = Reader::new(&data);
            match reader.read_u8()? {
                b'k' => {
                    let wal_end = reader.read_u64()?;
                    let send_time = reader.read_i64()?;
                    let reply_requested = reader.read_u8()? != 0;
                    trace!(
                        wal_end,
                        sent_at = %format_pg_micros(send_time),
                        reply_requested,
                        "keepalive"
                    );
                    if reply_requested {
                        self.send_feedback(wal_end)?;
                    }
                }
                b'w' => {
                    let data_start_lsn = reader.read_u64()?;
                    let wal_end_lsn = reader.read_u64()?;
                    let send_time = reader.read_i64()?;
                    let payload = reader.rest().to_vec();
                    return Ok(Some(RawMessage {
                        payload,
                        data_start_lsn,
                        wal_end_lsn,
                        send_time,
                    }));
                }
                other => {
                    return Err(Error::protocol(format!(
                        "unexpected CopyData message type {other:?}"
                    )));
                }
            }
        }
    }

    /// Sends a standby status update acknowledging everything up to and
    /// including `flush_lsn`. Write/flush/apply all report the same LSN:
    /// the bridge has no concept of a separate "applied" position.
    pub fn send_feedback(&self, flush_lsn: u64) -> Result<()> {
        let msg = encode_feedback(flush_lsn, now_pg_micros());
        self.conn.put_copy_data(&msg)?;
        self.conn.flush()?;
        debug!(flush_lsn, "sent standby status update");
        Ok(())
    }
}
