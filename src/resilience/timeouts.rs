//! Timeout and cancellation enforcement.
//!
//! # Responsibilities
//! - Bound a dispatch by the request's timeout
//! - Settle immediately when the caller aborts, before or during dispatch
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout and abort settle to the same outcome: [`DispatchError::Aborted`]
//! - The in-flight work is dropped on settlement, so late answers are discarded

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;

use crate::mediator::handler::{DispatchError, DispatchResult};

/// Drive `work` until it settles, the timeout elapses or `cancelled` flips.
pub async fn settle_within<F>(work: F, timeout: Option<Duration>, mut cancelled: watch::Receiver<bool>) -> DispatchResult
where
    F: Future<Output = DispatchResult>,
{
    if *cancelled.borrow_and_update() {
        return Err(DispatchError::Aborted);
    }

    let bounded = async {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::debug!(timeout = ?limit, "Request timed out");
                    Err(DispatchError::Aborted)
                }
            },
            None => work.await,
        }
    };

    let aborted = async move {
        // All senders gone means nobody can abort any more.
        if cancelled.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        biased;
        () = aborted => {
            tracing::debug!("Request aborted");
            Err(DispatchError::Aborted)
        }
        result = bounded => result,
    }
}
