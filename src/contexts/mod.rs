pub mod dashboard;
pub mod page;
pub mod popup;

use crate::errors::{AppError, AppResult};
use crate::store::StoreHandle;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

// Destructive actions resolve their confirmation before the protocol's
// fresh read, never in the middle of a read-merge-write window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    Dismissed,
}

impl Confirmation {
    pub fn is_confirmed(self) -> bool {
        matches!(self, Self::Confirmed)
    }
}

// Issued store and collaborator calls cannot be cancelled; re-entry is
// prevented instead. The guard re-enables the control on drop, whatever the
// outcome was.
#[derive(Clone, Default)]
pub struct InFlight {
    busy: Arc<AtomicBool>,
}

impl InFlight {
    pub fn try_begin(&self) -> Option<InFlightGuard> {
        if self.busy.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(InFlightGuard {
                busy: self.busy.clone(),
            })
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

pub struct InFlightGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

// The change channel only says "something changed", so the response is
// always a full reload. A notification triggered by this context's own
// write re-reads what was just written, which is a correct no-op.
pub fn spawn_refresh_on_change<F, Fut>(
    store: &StoreHandle,
    refresh: F,
) -> tokio::task::JoinHandle<()>
where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = AppResult<()>> + Send,
{
    let mut changes = store.subscribe();
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "change notifications lagged; refreshing once");
                }
                Err(RecvError::Closed) => break,
            }
            if let Err(error) = refresh().await {
                tracing::warn!(error = %error, "refresh after store change failed");
            }
        }
    })
}

pub(crate) fn failure_notice(error: &AppError) -> String {
    match error {
        AppError::StoreUnavailable(_) => {
            "Storage is unavailable. Reload this view to continue.".to_string()
        }
        AppError::CollaboratorUnreachable(_) => {
            "Could not reach the background checker. Try again.".to_string()
        }
        other => format!("The last change was not saved ({other})"),
    }
}
