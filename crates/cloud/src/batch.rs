/*
 * SPDX-FileCopyrightText: Copyright (c) 2025 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
 * SPDX-License-Identifier: LicenseRef-NvidiaProprietary
 *
 * NVIDIA CORPORATION, its affiliates and licensors retain all intellectual
 * property and proprietary rights in and to this material, related
 * documentation and any modifications thereto. Any use, reproduction,
 * disclosure or distribution of this material and related documentation
 * without an express license agreement from NVIDIA CORPORATION or
 * its affiliates is strictly prohibited.
 */
//! Request coalescing for describe RPCs.
//!
//! Describe traffic on a busy host is dominated by many callers asking about
//! a handful of resources at nearly the same moment. A [`BatchDescriber`]
//! owns a worker that gathers lookups over a short window (or until the
//! batch is full), issues one hedged RPC for the whole batch, and fans the
//! descriptions back out to the waiters.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::hedge::hedge;
use crate::provider::{record_cloud_failure, CloudError};

/// Stagger applied to describe RPCs issued by the session layer.
pub(crate) const DESCRIBE_HEDGE_DELAYS: [Duration; 2] = [Duration::ZERO, Duration::from_millis(300)];

const REQUEST_CHANNEL_CAPACITY: usize = 128;

/// A describe call that accepts many ids at once.
#[async_trait]
pub trait BatchFetch: Send + Sync + 'static {
    type Item: Clone + Send + 'static;

    /// Resource kind for error reporting, e.g. "network interface".
    fn kind() -> &'static str;

    fn key_of(item: &Self::Item) -> &str;

    /// Describe every id in `keys`. Ids unknown to the provider are simply
    /// absent from the result, not errors.
    async fn fetch(&self, keys: &[String]) -> Result<Vec<Self::Item>, CloudError>;
}

struct Request<T> {
    key: String,
    respond: oneshot::Sender<Result<T, CloudError>>,
}

/// Handle to a batching worker. Dropping the last handle stops the worker.
pub struct BatchDescriber<F: BatchFetch> {
    tx: mpsc::Sender<Request<F::Item>>,
}

impl<F: BatchFetch> BatchDescriber<F> {
    pub fn new(fetcher: F, window: Duration, max_batch: usize) -> Self {
        let (tx, rx) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        tokio::spawn(run_batches(fetcher, rx, window, max_batch));
        Self { tx }
    }

    pub async fn describe(&self, key: &str) -> Result<F::Item, CloudError> {
        let (respond, response) = oneshot::channel();
        self.tx
            .send(Request {
                key: key.to_string(),
                respond,
            })
            .await
            .map_err(|_| CloudError::Transport("batch describe worker stopped".to_string()))?;
        response
            .await
            .map_err(|_| CloudError::Transport("batch describe worker dropped request".to_string()))?
    }
}

async fn run_batches<F: BatchFetch>(
    fetcher: F,
    mut rx: mpsc::Receiver<Request<F::Item>>,
    window: Duration,
    max_batch: usize,
) {
    while let Some(first) = rx.recv().await {
        let mut pending = vec![first];
        let deadline = tokio::time::sleep(window);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => break,
                more = rx.recv() => match more {
                    Some(request) => {
                        pending.push(request);
                        if pending.len() >= max_batch {
                            break;
                        }
                    }
                    // Every handle is gone; answer what we already have.
                    None => break,
                },
            }
        }

        let mut keys: Vec<String> = pending.iter().map(|request| request.key.clone()).collect();
        keys.sort();
        keys.dedup();
        tracing::debug!(kind = F::kind(), waiters = pending.len(), keys = keys.len(), "flushing describe batch");

        match hedge(|| fetcher.fetch(&keys), &DESCRIBE_HEDGE_DELAYS).await {
            Ok(items) => {
                let by_key: HashMap<&str, &F::Item> =
                    items.iter().map(|item| (F::key_of(item), item)).collect();
                for request in pending {
                    let result = match by_key.get(request.key.as_str()) {
                        Some(item) => Ok((*item).clone()),
                        None => Err(CloudError::NotFound {
                            kind: F::kind(),
                            id: request.key.clone(),
                        }),
                    };
                    let _ = request.respond.send(result);
                }
            }
            Err(err) => {
                record_cloud_failure("batch_describe", &err);
                for request in pending {
                    let _ = request.respond.send(Err(err.clone()));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Clone)]
    struct StubFetch {
        calls: Arc<AtomicUsize>,
        seen_keys: Arc<Mutex<Vec<Vec<String>>>>,
        known: Vec<String>,
        fail: bool,
    }

    #[async_trait]
    impl BatchFetch for StubFetch {
        type Item = String;

        fn kind() -> &'static str {
            "stub"
        }

        fn key_of(item: &Self::Item) -> &str {
            item
        }

        async fn fetch(&self, keys: &[String]) -> Result<Vec<String>, CloudError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_keys.lock().unwrap().push(keys.to_vec());
            if self.fail {
                return Err(CloudError::Transport("stub outage".to_string()));
            }
            Ok(keys
                .iter()
                .filter(|key| self.known.contains(key))
                .cloned()
                .collect())
        }
    }

    fn stub(known: &[&str], fail: bool) -> StubFetch {
        StubFetch {
            calls: Arc::new(AtomicUsize::new(0)),
            seen_keys: Arc::new(Mutex::new(Vec::new())),
            known: known.iter().map(|key| key.to_string()).collect(),
            fail,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_lookups_share_one_rpc() {
        let fetcher = stub(&["eni-1", "eni-2"], false);
        let calls = fetcher.calls.clone();
        let describer = BatchDescriber::new(fetcher, Duration::from_secs(1), 50);

        let (a, b, c) = tokio::join!(
            describer.describe("eni-1"),
            describer.describe("eni-2"),
            describer.describe("eni-1"),
        );
        assert_eq!(a.unwrap(), "eni-1");
        assert_eq!(b.unwrap(), "eni-2");
        assert_eq!(c.unwrap(), "eni-1");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn full_batch_flushes_before_the_window() {
        let fetcher = stub(&["eni-1", "eni-2"], false);
        let calls = fetcher.calls.clone();
        // Window far longer than the test; only the batch-size limit can
        // trigger the flush.
        let describer = BatchDescriber::new(fetcher, Duration::from_secs(3600), 2);

        let (a, b) = tokio::join!(describer.describe("eni-1"), describer.describe("eni-2"));
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_key_is_not_found_for_that_waiter_only() {
        let describer = BatchDescriber::new(stub(&["eni-1"], false), Duration::from_secs(1), 50);

        let (known, unknown) =
            tokio::join!(describer.describe("eni-1"), describer.describe("eni-404"));
        assert!(known.is_ok());
        assert_eq!(
            unknown.unwrap_err(),
            CloudError::NotFound {
                kind: "stub",
                id: "eni-404".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rpc_failure_reaches_every_waiter() {
        let describer = BatchDescriber::new(stub(&[], true), Duration::from_secs(1), 50);

        let (a, b) = tokio::join!(describer.describe("eni-1"), describer.describe("eni-2"));
        assert!(matches!(a, Err(CloudError::Transport(_))));
        assert!(matches!(b, Err(CloudError::Transport(_))));
    }
}
