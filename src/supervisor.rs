//! The top-level session loop: wires PK-Catalog, Formatter, Aggregator and
//! SinkClient together, owns the flush timer, and restarts the session on
//! recoverable transport loss (spec.md 4.6).

use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::aggregator::{Aggregator, BatchRecord};
use crate::config::Config;
use crate::errors::Result;
use crate::formatter::Formatter;
use crate::pg::{connection::Connection, slot, stream::ReplicationStream};
use crate::sink::{RawPut, SinkClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Connecting,
    Acquiring,
    Streaming,
}

/// Runs sessions until a shutdown flag is set or a fatal error occurs.
/// Transport loss matching "server closed the connection unexpectedly"
/// restarts from `Connecting`, preserving the slot; anything else is fatal.
pub fn run<P: RawPut>(cfg: &Config, sink: &SinkClient<P>, shutdown: &std::sync::atomic::AtomicBool) -> Result<()> {
    loop {
        if shutdown.load(std::sync::atomic::Ordering::SeqCst) {
            return Ok(());
        }

        match run_session(cfg, sink, shutdown) {
            Ok(()) => return Ok(()),
            Err(e) if e.is_connection_lost() => {
                warn!(error = %e, "connection lost, restarting session");
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

fn run_session<P: RawPut>(
    cfg: &Config,
    sink: &SinkClient<P>,
    shutdown: &std::sync::atomic::AtomicBool,
) -> Result<()> {
    info!(state = ?SessionState::Connecting, "opening source connections");
    let handle = Handle::current();

    let meta_conn = Connection::connect(&cfg.conninfo)?;
    let repl_conninfo = format!("{} replication=database", cfg.conninfo);
    let repl_conn = Connection::connect(&repl_conninfo)?;
    info!(state = ?SessionState::Acquiring, "connections open");

    if cfg.recreate_slot {
        slot::drop_slot(&repl_conn, &cfg.slot_name)?;
    }
    if cfg.create_slot || cfg.recreate_slot {
        slot::create(&repl_conn, &cfg.slot_name, cfg.plugin.as_str())?;
    }

    let catalog = crate::pg::catalog::load(&meta_conn)?;
    drop(meta_conn);

    let pk_patterns = crate::formatter::PkPatterns::build(&catalog)?;
    let mut formatter = Formatter::new(
        cfg.dialect,
        cfg.table_regex.clone(),
        cfg.full_change,
        pk_patterns,
    )?;

    let options = slot::plugin_options(cfg.plugin.as_str(), cfg.chunk_mode);
    slot::acquire(&repl_conn, &cfg.slot_name, &options)?;
    info!(state = ?SessionState::Streaming, "replication session established");

    let stream = ReplicationStream::new(repl_conn);
    let mut aggregator = Aggregator::new();
    let mut last_send = Instant::now();

    loop {
        if shutdown.load(std::sync::atomic::Ordering::SeqCst) {
            return Ok(());
        }

        if last_send.elapsed() > Duration::from_secs(cfg.send_window_secs) {
            flush_and_submit(sink, &handle, &mut aggregator, &stream, &mut last_send)?;
        }

        let message = match stream.next_message() {
            Ok(Some(m)) => m,
            Ok(None) => return Ok(()),
            Err(e) => return Err(e),
        };

        let emitted = formatter.process(&message.payload)?;
        for change in emitted {
            let bytes = cfg.serializer.serialize(&change)?;
            let record = BatchRecord {
                data: bytes,
                lsn: message.data_start_lsn,
            };
            if let Some(sealed) = aggregator.add(record)? {
                submit_and_ack(sink, &handle, sealed, &stream)?;
                last_send = Instant::now();
            }
        }
    }
}

fn flush_and_submit<P: RawPut>(
    sink: &SinkClient<P>,
    handle: &Handle,
    aggregator: &mut Aggregator,
    stream: &ReplicationStream,
    last_send: &mut Instant,
) -> Result<()> {
    let batch = aggregator.flush();
    if batch.is_empty() {
        *last_send = Instant::now();
        return Ok(());
    }
    submit_and_ack(sink, handle, batch, stream)?;
    *last_send = Instant::now();
    Ok(())
}

/// Submits `batch` and, only on unqualified success, advances feedback to
/// the LSN of the last contributing record (spec.md 4.6, 9(ii)).
fn submit_and_ack<P: RawPut>(
    sink: &SinkClient<P>,
    handle: &Handle,
    batch: crate::aggregator::Batch,
    stream: &ReplicationStream,
) -> Result<()> {
    let flush_lsn = batch.last_lsn();
    handle.block_on(sink.submit(batch))?;
    if let Some(lsn) = flush_lsn {
        stream.send_feedback(lsn)?;
    }
    Ok(())
}
