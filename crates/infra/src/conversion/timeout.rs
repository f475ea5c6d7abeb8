use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::time::Duration;

use chrono::NaiveDate;

use bursar_expenses::{Conversion, Currency, Money};

use super::{ConversionError, CurrencyConverter};

/// Workers allowed to run at once unless overridden.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 32;

/// Bounds every call to an inner converter by a deadline.
///
/// Each call runs on a short-lived worker thread; the caller waits at most
/// `timeout` for its answer. A call that misses the deadline is abandoned,
/// but its worker cannot be cancelled: it keeps running until the inner
/// converter returns. A backend that hangs therefore pins one thread per
/// abandoned call. At most `max_in_flight` workers exist at a time; further
/// calls fail fast with `ConversionError::Backend` until one finishes.
#[derive(Debug)]
pub struct TimeoutConverter<C> {
    inner: Arc<C>,
    timeout: Duration,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: usize,
}

impl<C> TimeoutConverter<C> {
    pub fn new(inner: C, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(inner),
            timeout,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
        }
    }

    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Workers still running, including ones whose caller gave up.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn reserve_worker(&self) -> Result<WorkerSlot, ConversionError> {
        self.in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                (n < self.max_in_flight).then_some(n + 1)
            })
            .map_err(|n| {
                ConversionError::Backend(format!("{n} conversions already in flight"))
            })?;
        Ok(WorkerSlot(Arc::clone(&self.in_flight)))
    }
}

/// Releases one in-flight reservation when dropped, including on panic.
struct WorkerSlot(Arc<AtomicUsize>);

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<C> CurrencyConverter for TimeoutConverter<C>
where
    C: CurrencyConverter + 'static,
{
    fn convert(
        &self,
        amount: Money,
        to: Currency,
        as_of: NaiveDate,
    ) -> Result<Conversion, ConversionError> {
        let slot = self.reserve_worker()?;
        let (tx, rx) = mpsc::channel();
        let inner = Arc::clone(&self.inner);

        std::thread::Builder::new()
            .name("bursar-conversion".to_string())
            .spawn(move || {
                let _slot = slot;
                // The receiver is gone if the caller already timed out.
                let _ = tx.send(inner.convert(amount, to, as_of));
            })
            .map_err(|e| {
                ConversionError::Backend(format!("failed to spawn conversion worker: {e}"))
            })?;

        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(ConversionError::Timeout(self.timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(ConversionError::Backend(
                "conversion worker exited without a result".to_string(),
            )),
        }
    }
}
