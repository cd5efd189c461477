// SPDX-License-Identifier: MIT OR Apache-2.0
//! Busy-retry policy for write transactions.

use kai_error::Result;
use std::time::Duration;
use tracing::debug;

/// Base delay before the first retry.
const BASE_DELAY: Duration = Duration::from_millis(50);
/// Total attempts (the first try plus four retries).
const MAX_ATTEMPTS: u32 = 5;

/// Run `op`, retrying transient (`database_busy`) failures with exponential
/// backoff. Non-transient errors surface immediately.
pub(crate) fn with_backoff<T>(mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut delay = BASE_DELAY;
    let mut attempt = 1;
    loop {
        match op() {
            Err(err) if err.is_transient() && attempt < MAX_ATTEMPTS => {
                debug!(attempt, delay_ms = delay.as_millis() as u64, "database busy, retrying");
                std::thread::sleep(delay);
                delay *= 2;
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kai_error::{ErrorCode, KaiError};
    use std::cell::Cell;

    #[test]
    fn succeeds_first_try() {
        let calls = Cell::new(0);
        let out = with_backoff(|| {
            calls.set(calls.get() + 1);
            Ok(7)
        })
        .unwrap();
        assert_eq!(out, 7);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn retries_transient_until_success() {
        let calls = Cell::new(0);
        let out = with_backoff(|| {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(KaiError::new(ErrorCode::DatabaseBusy, "locked"))
            } else {
                Ok("done")
            }
        })
        .unwrap();
        assert_eq!(out, "done");
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn non_transient_errors_surface_immediately() {
        let calls = Cell::new(0);
        let err = with_backoff::<()>(|| {
            calls.set(calls.get() + 1);
            Err(KaiError::new(ErrorCode::NodeNotFound, "missing"))
        })
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::NodeNotFound);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn gives_up_after_max_attempts() {
        let calls = Cell::new(0);
        let err = with_backoff::<()>(|| {
            calls.set(calls.get() + 1);
            Err(KaiError::new(ErrorCode::DatabaseBusy, "still locked"))
        })
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::DatabaseBusy);
        assert_eq!(calls.get(), 5);
    }
}
