use std::collections::HashMap;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

use crate::crawler::models::Record;
use crate::storage::RecordSink;

#[derive(Debug)]
enum Message {
    Record(Record),
    Close,
}

/// Producer handle for the ingestion pipeline. Cloneable; extractors may
/// send concurrently. `send` blocks once the intake queue is full.
#[derive(Clone)]
pub struct Intake {
    tx: mpsc::Sender<Message>,
}

impl Intake {
    pub async fn send(&self, record: Record) -> anyhow::Result<()> {
        self.tx
            .send(Message::Record(record))
            .await
            .map_err(|_| anyhow!("ingestion consumer is gone"))
    }

    /// Signals that no further records will be produced. Send exactly once,
    /// after the last record; then await the consumer's join handle before
    /// tearing down storage.
    pub async fn close(&self) -> anyhow::Result<()> {
        self.tx
            .send(Message::Close)
            .await
            .map_err(|_| anyhow!("ingestion consumer is gone"))
    }
}

/// Starts the single consumer task and returns the producer handle plus the
/// consumer's join handle.
pub fn start(
    sink: Arc<dyn RecordSink>,
    queue_capacity: usize,
    flush_interval: Duration,
) -> (Intake, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(queue_capacity);
    let handle = tokio::spawn(consume(rx, sink, flush_interval));
    (Intake { tx }, handle)
}

async fn consume(
    mut rx: mpsc::Receiver<Message>,
    sink: Arc<dyn RecordSink>,
    flush_interval: Duration,
) {
    let mut ticker = interval(flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let mut closing = false;
        let mut groups: HashMap<&'static str, Vec<Record>> = HashMap::new();
        loop {
            match rx.try_recv() {
                Ok(Message::Record(record)) => {
                    groups.entry(record.destination()).or_default().push(record);
                }
                Ok(Message::Close) => {
                    closing = true;
                    break;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    // All producers dropped without a close signal; treat it
                    // as one so the loop still terminates.
                    closing = true;
                    break;
                }
            }
        }

        for (destination, records) in groups {
            match sink.insert_batch(destination, &records).await {
                Ok(report) => info!(
                    destination,
                    inserted = report.inserted,
                    duplicates = report.duplicates,
                    errors = report.errors,
                    "flushed batch"
                ),
                Err(e) => error!(destination, error = %e, "bulk write failed"),
            }
        }

        if closing {
            break;
        }
    }
    info!("ingestion consumer stopped");
}
