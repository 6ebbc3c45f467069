//! Bounded ingest queue.
//!
//! Upload handlers [`submit`](IngestQueue::submit) jobs into a bounded
//! `tokio::sync::mpsc` channel; a fixed pool of worker tasks drains it,
//! running [`store_chunks`] for each job and recording the outcome in the
//! [`StatusRegistry`]. Submission waits for capacity when the queue is full.
//!
//! The queue closes when every [`IngestQueue`] handle is dropped. Workers
//! finish the jobs already queued and then exit; [`WorkerPool::join`] waits
//! for that.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::index::ChunkIndex;
use crate::ingest::{store_chunks, IngestJob};
use crate::models::UploadState;
use crate::status::StatusRegistry;

/// Cloneable submission handle.
#[derive(Clone)]
pub struct IngestQueue {
    tx: mpsc::Sender<IngestJob>,
    statuses: Arc<StatusRegistry>,
}

/// Handles of the spawned worker tasks.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
}

impl IngestQueue {
    /// Creates the queue and spawns `workers` worker tasks on the current
    /// tokio runtime.
    pub fn start(
        capacity: usize,
        workers: usize,
        index: Arc<dyn ChunkIndex>,
        statuses: Arc<StatusRegistry>,
    ) -> (IngestQueue, WorkerPool) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|worker| {
                tokio::spawn(run_worker(
                    worker,
                    rx.clone(),
                    index.clone(),
                    statuses.clone(),
                ))
            })
            .collect();

        (IngestQueue { tx, statuses }, WorkerPool { handles })
    }

    /// Marks the upload `queued` and hands the job to the workers.
    ///
    /// Fails only when the queue has been closed; the upload is then marked
    /// `failed`.
    pub async fn submit(&self, job: IngestJob) -> Result<()> {
        let upload_id = job.upload_id;
        self.statuses.set(upload_id, UploadState::Queued);

        if self.tx.send(job).await.is_err() {
            let message = "ingest queue is closed".to_string();
            self.statuses.set(
                upload_id,
                UploadState::Failed {
                    error: message.clone(),
                },
            );
            return Err(anyhow!(message));
        }
        Ok(())
    }
}

impl WorkerPool {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Waits for every worker to exit. Returns once all queue handles are
    /// dropped and the remaining jobs are processed.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "ingest worker panicked");
            }
        }
    }
}

async fn run_worker(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<IngestJob>>>,
    index: Arc<dyn ChunkIndex>,
    statuses: Arc<StatusRegistry>,
) {
    loop {
        // Hold the lock only while waiting for the next job.
        let job = { rx.lock().await.recv().await };
        let Some(job) = job else {
            break;
        };

        statuses.set(job.upload_id, UploadState::Processing);

        match store_chunks(&job, index.as_ref()).await {
            Ok(report) => {
                info!(
                    worker,
                    upload_id = %report.upload_id,
                    chunks = report.chunks,
                    bytes = report.bytes,
                    "upload chunked"
                );
                statuses.set(
                    job.upload_id,
                    UploadState::Completed {
                        chunks: report.chunks,
                        bytes: report.bytes,
                    },
                );
            }
            Err(e) => {
                let message = format!("{:#}", e);
                error!(worker, upload_id = %job.upload_id, error = %message, "ingest failed");
                statuses.set(job.upload_id, UploadState::Failed { error: message });
            }
        }
    }
}
