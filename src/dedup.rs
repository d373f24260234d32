use std::{
    collections::HashMap,
    future::Future,
    sync::{Arc, Mutex},
};

use futures::{
    channel::oneshot,
    future::{BoxFuture, FutureExt, Shared},
};

use crate::{util::lock_unpoisoned, ApiError, ApiResponse, Payload, Result};

type PendingTransfer = Shared<BoxFuture<'static, Result<ApiResponse<Payload>>>>;

/// Removes its key from the registry when dropped, which happens when the
/// transfer task ends, panics included.
struct Release {
    registry: Arc<Mutex<HashMap<String, PendingTransfer>>>,
    key: String,
}

impl Drop for Release {
    fn drop(&mut self) {
        lock_unpoisoned(&self.registry).remove(&self.key);
    }
}

/// Registry of in-flight transfers.
///
/// Concurrent calls with the same key share one transfer and observe the
/// same outcome, success or failure. Transfers run as their own tasks, so
/// they settle even when every caller stops waiting. The key is released as
/// soon as the transfer settles, so a later call starts a fresh one.
#[derive(Clone, Default)]
pub struct Deduplicator {
    pending: Arc<Mutex<HashMap<String, PendingTransfer>>>,
}

impl std::fmt::Debug for Deduplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Deduplicator")
            .field("pending", &self.len())
            .finish()
    }
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Joins the in-flight transfer for `key`, or starts one with `factory`.
    ///
    /// `factory` is only invoked when no transfer is pending for `key`.
    /// Must be called within a Tokio runtime.
    pub async fn dedupe<F, Fut>(&self, key: String, factory: F) -> Result<ApiResponse<Payload>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ApiResponse<Payload>>> + Send + 'static,
    {
        let (transfer, sender) = {
            let mut pending = lock_unpoisoned(&self.pending);
            match pending.get(&key) {
                Some(existing) => {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(key = %key, "joining in-flight request");

                    (existing.clone(), None)
                }
                None => {
                    let (sender, receiver) = oneshot::channel::<Result<ApiResponse<Payload>>>();
                    let transfer = receiver
                        .map(|received| received.unwrap_or_else(|lost| Err(ApiError::application(lost))))
                        .boxed()
                        .shared();
                    pending.insert(key.clone(), transfer.clone());
                    (transfer, Some(sender))
                }
            }
        };

        if let Some(sender) = sender {
            let release = Release {
                registry: Arc::clone(&self.pending),
                key,
            };
            let operation = factory();
            tokio::spawn(async move {
                let outcome = operation.await;
                drop(release);
                let _ = sender.send(outcome);
            });
        }

        transfer.await
    }

    /// Number of transfers currently in flight.
    pub fn len(&self) -> usize {
        lock_unpoisoned(&self.pending).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
