//! Rescan worker for shader configuration discovery.
//!
//! Watch callbacks and settings changes never scan directly; they enqueue a
//! [`RescanRequest`] on the scanner's queue. This worker drains the queue,
//! coalesces bursts into one request, and starts a scan under a fresh
//! generation id.
//!
//! # Design
//! - Requests queued while the worker is busy collapse into one; the last mode wins
//! - A file change or a mode switch closes every config watch and drops cached
//!   config text before the new scan registers fresh watches
//! - Scans run as their own tasks and may overlap; the scanner's generation
//!   check decides which result is published
//! - A file change reported by a watch of another mode comes from a scan that
//!   was already superseded and is dropped

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::scanner::{ConfigScanner, RescanReason, RescanRequest};
use crate::config::ScanMode;

/// Drains rescan requests for one scanner
pub struct RescanWorker {
    worker_handle: Mutex<Option<JoinHandle<()>>>,
    cancellation_token: CancellationToken,
}

impl RescanWorker {
    /// Starts the worker on the current tokio runtime
    pub fn spawn(
        scanner: Arc<ConfigScanner>,
        mut requests: mpsc::UnboundedReceiver<RescanRequest>,
    ) -> Self {
        let token = CancellationToken::new();
        let worker_token = token.clone();

        let handle = tokio::spawn(async move {
            log::info!("Config rescan worker started");
            let mut last_mode: Option<ScanMode> = None;

            loop {
                let request = tokio::select! {
                    _ = worker_token.cancelled() => break,
                    next = requests.recv() => match next {
                        Some(request) => request,
                        None => break,
                    },
                };

                let mut batch = vec![request];
                while let Ok(later) = requests.try_recv() {
                    batch.push(later);
                }
                let Some(request) = coalesce(batch, last_mode.as_ref()) else {
                    continue;
                };

                let mode_switched = last_mode.as_ref().is_some_and(|m| *m != request.mode);
                if matches!(request.reason, RescanReason::FileChanged(_)) || mode_switched {
                    scanner.close_watches();
                    scanner.invalidate_contents();
                }
                last_mode = Some(request.mode.clone());

                let generation = scanner.begin_generation();
                log::trace!(
                    "Rescan {} requested ({:?}, mode {:?})",
                    generation,
                    request.reason,
                    request.mode
                );
                let scanner = scanner.clone();
                tokio::spawn(async move {
                    scanner.run(generation, &request.mode).await;
                });
            }

            log::info!("Config rescan worker stopped");
        });

        Self {
            worker_handle: Mutex::new(Some(handle)),
            cancellation_token: token,
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker_handle
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Stops the worker. Scans already started run to completion.
    pub fn shutdown(&self) {
        self.cancellation_token.cancel();
        if let Some(handle) = self.worker_handle.lock().take() {
            handle.abort();
        }
    }
}

/// Merge a batch of queued requests, dropping file changes whose mode is not
/// the one in effect when they are reached.
fn coalesce(batch: Vec<RescanRequest>, current: Option<&ScanMode>) -> Option<RescanRequest> {
    let mut merged: Option<RescanRequest> = None;
    for request in batch {
        let expected = merged.as_ref().map(|r| &r.mode).or(current);
        let stale = matches!(request.reason, RescanReason::FileChanged(_))
            && expected.is_some_and(|mode| *mode != request.mode);
        if stale {
            log::trace!("Dropping file change from a superseded {:?} scan", request.mode);
            continue;
        }
        merged = Some(match merged {
            Some(earlier) => earlier.merge(request),
            None => request,
        });
    }
    merged
}

impl Drop for RescanWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
