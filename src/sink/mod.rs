//! Transmits sealed batches to the downstream record-delivery service with
//! geometric backoff and per-record partial-failure retry (spec.md 4.5).

pub mod firehose;

use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::aggregator::{Batch, BatchRecord};
use crate::errors::{Error, Result};

pub use firehose::FirehoseClient;

const INITIAL_BACKOFF: Duration = Duration::from_millis(50);
const DEFAULT_BACKOFF_LIMIT: Duration = Duration::from_secs(60);

/// One record's outcome from a batch-put response, in request order.
pub enum PutOutcome {
    Ok,
    Failed,
}

pub struct PutResponse {
    pub outcomes: Vec<PutOutcome>,
}

impl PutResponse {
    pub fn failed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, PutOutcome::Failed))
            .count()
    }
}

/// The transport primitive a concrete sink backend implements. `SinkClient`
/// layers backoff and reconciliation on top of this.
#[async_trait]
pub trait RawPut: Send + Sync {
    /// Existence probe, run once at construction. Failure is fatal.
    async fn probe(&self) -> Result<()>;

    /// Issues one batch write. `PutError::Throttled` tells the caller to
    /// back off and retry; `PutError::Fatal` propagates immediately.
    async fn put_records(&self, records: &[BatchRecord]) -> std::result::Result<PutResponse, PutError>;
}

pub enum PutError {
    Throttled,
    Fatal(Error),
}

pub struct SinkClient<P: RawPut> {
    raw: P,
    backoff_limit: Duration,
}

impl<P: RawPut> SinkClient<P> {
    pub async fn new(raw: P) -> Result<Self> {
        Self::with_backoff_limit(raw, DEFAULT_BACKOFF_LIMIT).await
    }

    pub async fn with_backoff_limit(raw: P, backoff_limit: Duration) -> Result<Self> {
        raw.probe().await?;
        Ok(Self { raw, backoff_limit })
    }

    /// Submits `batch`, retrying partial failures and backing off on
    /// throttling, until the whole batch lands or the backoff ceiling is
    /// exceeded.
    pub async fn submit(&self, batch: Batch) -> Result<()> {
        let mut pending = batch.into_records();
        let mut backoff = INITIAL_BACKOFF;

        loop {
            if pending.is_empty() {
                return Ok(());
            }

            match self.raw.put_records(&pending).await {
                Ok(response) => {
                    let failed = response.failed_count();
                    if failed == 0 {
                        return Ok(());
                    }
                    info!(failed, total = pending.len(), "partial put failure, retrying failed records");
                    pending = reaggregate(pending, &response);
                }
                Err(PutError::Fatal(e)) => return Err(e),
                Err(PutError::Throttled) => {
                    warn!(?backoff, "sink throttled");
                }
            }

            if backoff > self.backoff_limit {
                return Err(Error::BackoffExhausted);
            }
            tokio::time::sleep(backoff).await;
            backoff *= 2;
            if backoff > self.backoff_limit {
                return Err(Error::BackoffExhausted);
            }
        }
    }
}

/// Keeps exactly the records whose response carried a failure, preserving
/// original order (spec.md 4.5, 8 "Retry correctness").
fn reaggregate(records: Vec<BatchRecord>, response: &PutResponse) -> Vec<BatchRecord> {
    records
        .into_iter()
        .zip(response.outcomes.iter())
        .filter_map(|(record, outcome)| match outcome {
            PutOutcome::Failed => Some(record),
            PutOutcome::Ok => None,
        })
        .collect()
}
