//! Query Timeout Module
//!
//! Time limits and cancellation for running queries.
//!
//! ## Design
//!
//! Uses a shared atomic flag for cooperative cancellation. The data source
//! executor calls [`QueryTimeout::check`] between units of work; the
//! coordinator flips the flag through a [`CancelHandle`] when a job is
//! cancelled. The flag records why execution stopped so the job ends up
//! `Cancelled` or `Failed` accordingly.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const RUNNING: u8 = 0;
const CANCELLED: u8 = 1;
const TIMED_OUT: u8 = 2;

/// Why a query stopped before finishing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Interrupted {
    #[error("Query cancelled by user.")]
    Cancelled,

    #[error("Query exceeded execution time limit.")]
    TimedOut {
        /// The limit that was exceeded
        limit: Duration,
        /// How long the query actually ran
        elapsed: Duration,
    },
}

/// Query timeout controller
///
/// Shared between the worker running a job and whoever may cancel it.
#[derive(Clone, Debug)]
pub struct QueryTimeout {
    state: Arc<AtomicU8>,
    start_time: Instant,
    limit: Option<Duration>,
}

impl QueryTimeout {
    pub fn new(limit: Option<Duration>) -> Self {
        QueryTimeout {
            state: Arc::new(AtomicU8::new(RUNNING)),
            start_time: Instant::now(),
            limit,
        }
    }

    /// Controller with no time limit
    pub fn unlimited() -> Self {
        QueryTimeout::new(None)
    }

    /// Check if the query has been cancelled or ran out of time.
    ///
    /// Executors should call this periodically and stop on `Err`.
    pub fn check(&self) -> Result<(), Interrupted> {
        match self.state.load(Ordering::Acquire) {
            CANCELLED => return Err(Interrupted::Cancelled),
            TIMED_OUT => {
                return Err(Interrupted::TimedOut {
                    limit: self.limit.unwrap_or(Duration::ZERO),
                    elapsed: self.elapsed(),
                })
            }
            _ => {}
        }

        if let Some(limit) = self.limit {
            let elapsed = self.start_time.elapsed();
            if elapsed > limit {
                // A cancel that raced in first wins.
                let _ = self.state.compare_exchange(
                    RUNNING,
                    TIMED_OUT,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                );
                return self.check_flag(limit, elapsed);
            }
        }

        Ok(())
    }

    fn check_flag(&self, limit: Duration, elapsed: Duration) -> Result<(), Interrupted> {
        if self.state.load(Ordering::Acquire) == CANCELLED {
            Err(Interrupted::Cancelled)
        } else {
            Err(Interrupted::TimedOut { limit, elapsed })
        }
    }

    /// Cancel the query explicitly
    pub fn cancel(&self) {
        self.cancel_handle().cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn limit(&self) -> Option<Duration> {
        self.limit
    }

    /// Get the remaining time before the limit (if any)
    pub fn remaining(&self) -> Option<Duration> {
        self.limit
            .map(|limit| limit.saturating_sub(self.start_time.elapsed()))
    }

    /// Get a handle that can be used to cancel from another thread
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for QueryTimeout {
    fn default() -> Self {
        QueryTimeout::unlimited()
    }
}

/// Handle for cancelling a query from another thread
#[derive(Clone, Debug)]
pub struct CancelHandle {
    state: Arc<AtomicU8>,
}

impl CancelHandle {
    /// Cancel the associated query. Has no effect once it timed out.
    pub fn cancel(&self) {
        let _ = self
            .state
            .compare_exchange(RUNNING, CANCELLED, Ordering::AcqRel, Ordering::Acquire);
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }
}
