//! Request batching: callers add single requests, the processor sees batches.
//!
//! A batch is flushed when it reaches `batch_size`, when a waiter has waited
//! `2 * batch_timeout`, or on an explicit [`BatchProcessor::flush`].

use std::future::Future;
use std::mem;
use std::time::Duration;

use tokio::sync::{Mutex, oneshot};
use tracing::debug;

use super::BedrockError;

type Reply<Resp> = oneshot::Sender<Result<Resp, BedrockError>>;

pub struct BatchProcessor<Req, Resp, F> {
    batch_size: usize,
    batch_timeout: Duration,
    processor: F,
    pending: Mutex<Vec<(Req, Reply<Resp>)>>,
}

impl<Req, Resp, F, Fut> BatchProcessor<Req, Resp, F>
where
    F: Fn(Vec<Req>) -> Fut,
    Fut: Future<Output = Result<Vec<Resp>, BedrockError>>,
{
    pub fn new(batch_size: usize, batch_timeout: Duration, processor: F) -> Self {
        Self {
            batch_size: batch_size.max(1),
            batch_timeout,
            processor,
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Queue `request` and wait for its result.
    pub async fn add_request(&self, request: Req) -> Result<Resp, BedrockError> {
        let (tx, mut rx) = oneshot::channel();

        let full = {
            let mut pending = self.pending.lock().await;
            pending.push((request, tx));
            if pending.len() >= self.batch_size {
                Some(mem::take(&mut *pending))
            } else {
                None
            }
        };
        if let Some(batch) = full {
            self.run(batch).await;
        }

        match tokio::time::timeout(self.batch_timeout * 2, &mut rx).await {
            Ok(reply) => reply.unwrap_or_else(|_| Err(dropped())),
            Err(_) => {
                self.flush().await;
                rx.await.unwrap_or_else(|_| Err(dropped()))
            }
        }
    }

    /// Process whatever is pending now.
    pub async fn flush(&self) {
        let batch = mem::take(&mut *self.pending.lock().await);
        if !batch.is_empty() {
            self.run(batch).await;
        }
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.lock().await.len()
    }

    async fn run(&self, batch: Vec<(Req, Reply<Resp>)>) {
        debug!(size = batch.len(), "processing batch");
        let (requests, replies): (Vec<Req>, Vec<Reply<Resp>>) = batch.into_iter().unzip();
        match (self.processor)(requests).await {
            Ok(results) => {
                let mut results = results.into_iter();
                for reply in replies {
                    let r = results.next().ok_or_else(|| {
                        BedrockError::model("Batch processing returned insufficient results")
                    });
                    let _ = reply.send(r);
                }
            }
            Err(e) => {
                for reply in replies {
                    let _ = reply.send(Err(e.clone()));
                }
            }
        }
    }
}

fn dropped() -> BedrockError {
    BedrockError::model("batch request dropped before completion")
}
