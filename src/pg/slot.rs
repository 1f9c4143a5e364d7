//! Replication slot lifecycle: create/drop are idempotent administrative
//! acts, acquire retries through the transient "object in use" window left
//! by a not-yet-reaped prior consumer (spec.md 4.1).

use std::thread::sleep;
use std::time::Duration;

use tracing::{info, warn};

use crate::errors::{Error, Result};
use crate::pg::connection::Connection;

const DUPLICATE_OBJECT: &str = "42710";
const UNDEFINED_OBJECT: &str = "42704";
const OBJECT_IN_USE: &str = "55006";

const SLOT_IN_USE_RETRY_INTERVAL: Duration = Duration::from_secs(30);
const SLOT_IN_USE_RETRY_LIMIT: u32 = 30;

pub fn create(conn: &Connection, name: &str, plugin: &str) -> Result<()> {
    info!(slot = name, plugin, "creating replication slot");
    let sql = format!("CREATE_REPLICATION_SLOT \"{name}\" LOGICAL \"{plugin}\"");
    let result = conn.exec(&sql)?;
    if result.is_ok() {
        return Ok(());
    }
    match result.sqlstate().as_deref() {
        Some(DUPLICATE_OBJECT) => {
            info!(slot = name, "slot already present");
            Ok(())
        }
        _ => Err(Error::protocol(format!(
            "failed to create slot \"{name}\": {}",
            result.error_message().unwrap_or_default()
        ))),
    }
}

pub fn drop_slot(conn: &Connection, name: &str) -> Result<()> {
    info!(slot = name, "dropping replication slot");
    let sql = format!("DROP_REPLICATION_SLOT \"{name}\"");
    let result = conn.exec(&sql)?;
    if result.is_ok() {
        return Ok(());
    }
    match result.sqlstate().as_deref() {
        Some(UNDEFINED_OBJECT) => {
            info!(slot = name, "slot was not found");
            Ok(())
        }
        _ => Err(Error::protocol(format!(
            "failed to drop slot \"{name}\": {}",
            result.error_message().unwrap_or_default()
        ))),
    }
}

/// Opens the replication stream on `name`, retrying while the slot is held
/// by a prior consumer. Returns once `START_REPLICATION` reports
/// `PGRES_COPY_BOTH`.
pub fn acquire(conn: &Connection, name: &str, options: &str) -> Result<()> {
    let sql = format!("START_REPLICATION SLOT \"{name}\" LOGICAL 0/0{options}");

    for attempt in 0..SLOT_IN_USE_RETRY_LIMIT {
        let result = conn.exec(&sql)?;
        if result.status() == libpq_sys::ExecStatusType::PGRES_COPY_BOTH {
            info!(slot = name, "replication started");
            return Ok(());
        }
        match result.sqlstate().as_deref() {
            Some(OBJECT_IN_USE) => {
                warn!(
                    slot = name,
                    attempt,
                    "slot in use, retrying in {:?}",
                    SLOT_IN_USE_RETRY_INTERVAL
                );
                sleep(SLOT_IN_USE_RETRY_INTERVAL);
            }
            _ => {
                return Err(Error::protocol(format!(
                    "failed to start replication on \"{name}\": {}",
                    result.error_message().unwrap_or_default()
                )));
            }
        }
    }

    Err(Error::SlotAcquireExhausted(
        name.to_string(),
        SLOT_IN_USE_RETRY_LIMIT,
    ))
}

/// Builds the plugin-options clause appended to `START_REPLICATION`, per
/// spec.md 4.2.
pub fn plugin_options(plugin: &str, write_in_chunks: bool) -> String {
    if plugin != "wal2json" {
        return String::new();
    }
    if write_in_chunks {
        " (\"include-xids\" '1', \"include-timestamp\" '1', \"write-in-chunks\" '1')".to_string()
    } else {
        " (\"include-xids\" '1', \"include-timestamp\" '1')".to_string()
    }
}
