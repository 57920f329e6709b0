use async_trait::async_trait;

use crate::crawler::models::Record;

pub mod postgres;

/// Per-destination outcome of one bulk write. Duplicates are expected on
/// re-crawls and are not failures.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteReport {
    pub inserted: usize,
    pub duplicates: usize,
    pub errors: usize,
}

/// Storage boundary the ingestion pipeline flushes into: one unordered
/// bulk insert per destination group, reporting per-record outcomes.
#[async_trait]
pub trait RecordSink: Send + Sync {
    async fn insert_batch(
        &self,
        destination: &str,
        records: &[Record],
    ) -> anyhow::Result<WriteReport>;
}
