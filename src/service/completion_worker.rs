//! Background worker for completed uploads
//!
//! Subscribes to the handler's completion channel and records every upload
//! that received all of its declared bytes.

use crate::storage::FileInfo;
use log::{info, warn};
use tokio::sync::broadcast::{self, error::RecvError};

/// Background completion worker
pub struct CompletionWorker {
    receiver: broadcast::Receiver<FileInfo>,
    processed: u64,
}

impl CompletionWorker {
    pub fn new(receiver: broadcast::Receiver<FileInfo>) -> Self {
        Self {
            receiver,
            processed: 0,
        }
    }

    /// Start the completion worker as a background task (non-blocking)
    pub fn start_background(self) -> tokio::task::JoinHandle<u64> {
        info!("Starting completion worker");
        tokio::spawn(self.run())
    }

    /// Process completions until the channel closes, returns how many were seen
    pub async fn run(mut self) -> u64 {
        loop {
            match self.receiver.recv().await {
                Ok(upload) => self.process_completion(&upload),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Completion worker fell behind, {} uploads not reported", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
        info!("Completion worker stopped after {} uploads", self.processed);
        self.processed
    }

    fn process_completion(&mut self, upload: &FileInfo) {
        self.processed += 1;
        let kind = if upload.is_final {
            "final"
        } else if upload.is_partial {
            "partial"
        } else {
            "regular"
        };
        info!(
            "Upload {} completed: {} bytes, {} upload, metadata {:?}",
            upload.id, upload.size, kind, upload.metadata
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_worker_counts_completions_until_closed() {
        let (tx, rx) = broadcast::channel(8);
        let worker = CompletionWorker::new(rx).start_background();

        for n in 0..3 {
            let mut info = FileInfo::new(n);
            info.id = format!("upload{}", n);
            tx.send(info).unwrap();
        }
        drop(tx);

        assert_eq!(worker.await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_worker_survives_lag() {
        let (tx, rx) = broadcast::channel(2);
        for n in 0..5 {
            tx.send(FileInfo::new(n)).unwrap();
        }
        drop(tx);

        // Only the last two are still buffered.
        assert_eq!(CompletionWorker::new(rx).run().await, 2);
    }
}
