//! Time and interruptible sleeping.
//!
//! Everything in the crate that depends on time gets a [`Clock`] handed to
//! it. The daemon uses the [`SystemClock`], tests use a [`TestClock`] they
//! can move at will.

use std::{fmt, thread};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use chrono::{DateTime, TimeDelta, Utc};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use crate::constants::SLEEP_SLICE;


//------------ Clock ---------------------------------------------------------

/// A source of the current time.
pub trait Clock: fmt::Debug + Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;

    /// Sleeps for `duration` unless interrupted.
    ///
    /// Returns early with [`Sleep::Interrupted`] as soon as a stop is
    /// requested through `interrupt`.
    fn sleep(&self, duration: Duration, interrupt: &Interrupt) -> Sleep;
}


//------------ Sleep ---------------------------------------------------------

/// How a sleep ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Sleep {
    Elapsed,
    Interrupted,
}


//------------ SystemClock ---------------------------------------------------

/// The clock of the operating system.
///
/// Sleeping happens in slices of at most [`SLEEP_SLICE`] so that a stop
/// request is noticed promptly even during long periods.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration, interrupt: &Interrupt) -> Sleep {
        let deadline = Instant::now() + duration;
        loop {
            if interrupt.is_stop_requested() {
                return Sleep::Interrupted
            }
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return Sleep::Elapsed
            }
            match interrupt.stop.recv_timeout(left.min(SLEEP_SLICE)) {
                Err(RecvTimeoutError::Timeout) => { }
                _ => return Sleep::Interrupted
            }
        }
    }
}


//------------ TestClock -----------------------------------------------------

/// A clock that only moves when told to.
///
/// Clones share the same time, so a test can keep one clone and hand the
/// others to the nodes it runs. Sleeping on a test clock moves the clock
/// forward by the duration instead of waiting.
#[derive(Clone, Debug)]
pub struct TestClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl TestClock {
    /// Creates a clock starting at the given time.
    pub fn new(start: DateTime<Utc>) -> Self {
        TestClock { now: Arc::new(Mutex::new(start)) }
    }

    /// Moves the clock forward.
    pub fn advance(&self, duration: Duration) {
        let delta = TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX);
        let mut now = self.now.lock().expect("poisoned lock");
        *now = now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC);
    }

    /// Sets the clock to the given time, which may be in the past.
    pub fn set(&self, time: DateTime<Utc>) {
        *self.now.lock().expect("poisoned lock") = time;
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("poisoned lock")
    }

    fn sleep(&self, duration: Duration, interrupt: &Interrupt) -> Sleep {
        if interrupt.is_stop_requested() {
            return Sleep::Interrupted
        }
        self.advance(duration);
        thread::yield_now();
        Sleep::Elapsed
    }
}


//------------ Interrupt -----------------------------------------------------

/// The receiving side of stop and abort requests.
///
/// A stop asks a thread to finish at its next convenient point, most
/// notably any sleep. An abort additionally asks long running work to give
/// up early.
#[derive(Clone, Debug)]
pub struct Interrupt {
    stop: Receiver<()>,
    abort: Arc<AtomicBool>,
}

impl Interrupt {
    /// Creates a new interrupt and the handle for triggering it.
    pub fn new() -> (InterruptHandle, Self) {
        let (tx, rx) = crossbeam_channel::bounded(0);
        let abort = Arc::new(AtomicBool::new(false));
        (
            InterruptHandle { stop: Some(tx), abort: abort.clone() },
            Interrupt { stop: rx, abort }
        )
    }

    /// Creates an interrupt that never fires.
    pub fn never() -> Self {
        Interrupt {
            stop: crossbeam_channel::never(),
            abort: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        matches!(
            self.stop.try_recv(),
            Ok(()) | Err(TryRecvError::Disconnected)
        )
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }

    /// Returns a receiver that becomes ready once a stop is requested.
    ///
    /// Use this to wait for a stop together with other channels.
    pub fn stop_receiver(&self) -> &Receiver<()> {
        &self.stop
    }
}


//------------ InterruptHandle -----------------------------------------------

/// The triggering side of an [`Interrupt`].
///
/// Dropping the handle requests a stop.
#[derive(Debug)]
pub struct InterruptHandle {
    stop: Option<Sender<()>>,
    abort: Arc<AtomicBool>,
}

impl InterruptHandle {
    pub fn request_stop(&mut self) {
        self.stop = None;
    }

    /// Requests a stop and raises the abort flag.
    pub fn abort(&mut self) {
        self.request_stop();
        self.abort.store(true, Ordering::Relaxed);
    }
}


//============ Tests =========================================================
