//! Concrete `RawPut` backend for the managed record-delivery service
//! (spec.md 6): AWS Kinesis Data Firehose's `PutRecordBatch`.

use async_trait::async_trait;
use aws_sdk_firehose::primitives::Blob;
use aws_sdk_firehose::types::Record;
use aws_sdk_firehose::Client;

use crate::aggregator::BatchRecord;
use crate::errors::{Error, Result};
use crate::sink::{PutError, PutOutcome, PutResponse, RawPut};

pub struct FirehoseClient {
    client: Client,
    stream_name: String,
}

impl FirehoseClient {
    pub async fn new(stream_name: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        Self {
            client: Client::new(&config),
            stream_name: stream_name.into(),
        }
    }
}

#[async_trait]
impl RawPut for FirehoseClient {
    async fn probe(&self) -> Result<()> {
        self.client
            .describe_delivery_stream()
            .delivery_stream_name(&self.stream_name)
            .send()
            .await
            .map_err(|e| Error::sink(format!("delivery stream \"{}\" unreachable: {e}", self.stream_name)))?;
        Ok(())
    }

    async fn put_records(
        &self,
        records: &[BatchRecord],
    ) -> std::result::Result<PutResponse, PutError> {
        let entries: std::result::Result<Vec<Record>, _> = records
            .iter()
            .map(|r| Record::builder().data(Blob::new(r.data.clone())).build())
            .collect();
        let entries = entries.map_err(|e| PutError::Fatal(Error::sink(e.to_string())))?;

        let result = self
            .client
            .put_record_batch()
            .delivery_stream_name(&self.stream_name)
            .set_records(Some(entries))
            .send()
            .await;

        let output = match result {
            Ok(output) => output,
            Err(err) => {
                if is_throttle(&err) {
                    return Err(PutError::Throttled);
                }
                return Err(PutError::Fatal(Error::sink(err.to_string())));
            }
        };

        let outcomes = output
            .request_responses()
            .iter()
            .map(|entry| {
                if entry.error_code().is_some() {
                    PutOutcome::Failed
                } else {
                    PutOutcome::Ok
                }
            })
            .collect();

        Ok(PutResponse { outcomes })
    }
}

fn is_throttle(
    err: &aws_sdk_firehose::error::SdkError<
        aws_sdk_firehose::operation::put_record_batch::PutRecordBatchError,
    >,
) -> bool {
    // ServiceUnavailableException is Firehose's throttle signal (spec.md 4.5).
    err.as_service_error()
        .is_some_and(|e| e.is_service_unavailable_exception())
}
