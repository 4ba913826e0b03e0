//! One-shot timers for the CDM's `SetTimer` host callback.
//!
//! A single worker thread owns a deadline heap, sleeps until the earliest
//! deadline and fires `TimerExpired` with the CDM-provided context. The
//! worker shuts down with its host; undelivered timers are dropped then.

use core::ffi::c_void;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::sync::Mutex;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender, unbounded};
use tracing::debug;

use crate::instance::CdmSlot;

/// Opaque CDM timer context. The CDM hands it over in `SetTimer` and expects
/// it back verbatim in `TimerExpired`.
struct TimerContext(*mut c_void);

// SAFETY: the context is an opaque token round-tripped to the CDM, which
// tolerates timer delivery from any thread.
unsafe impl Send for TimerContext {}

struct TimerJob {
    deadline: Instant,
    seq: u64,
    context: TimerContext,
}

impl PartialEq for TimerJob {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerJob {}

impl PartialOrd for TimerJob {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerJob {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.deadline
            .cmp(&other.deadline)
            .then(self.seq.cmp(&other.seq))
    }
}

enum TimerCommand {
    Schedule(TimerJob),
    Shutdown,
}

pub(crate) struct Timers {
    tx: Sender<TimerCommand>,
    seq: std::sync::atomic::AtomicU64,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl Timers {
    pub(crate) fn spawn(cdm: Arc<CdmSlot>) -> std::io::Result<Self> {
        let (tx, rx) = unbounded();
        let join = std::thread::Builder::new()
            .name("opencdm-timer".to_string())
            .spawn(move || run_timer_loop(rx, cdm))?;
        Ok(Self {
            tx,
            seq: std::sync::atomic::AtomicU64::new(0),
            join: Mutex::new(Some(join)),
        })
    }

    pub(crate) fn schedule(&self, delay_ms: i64, context: *mut c_void) {
        let delay = Duration::from_millis(delay_ms.max(0) as u64);
        let job = TimerJob {
            deadline: Instant::now() + delay,
            seq: self
                .seq
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed),
            context: TimerContext(context),
        };
        let _ = self.tx.send(TimerCommand::Schedule(job));
    }

    /// Stops the worker and waits for it; in-flight `TimerExpired` delivery
    /// completes before this returns.
    pub(crate) fn shutdown(&self) {
        let _ = self.tx.send(TimerCommand::Shutdown);
        if let Some(join) = self.join.lock().expect("timer join poisoned").take() {
            let _ = join.join();
        }
    }
}

impl Drop for Timers {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_timer_loop(rx: crossbeam_channel::Receiver<TimerCommand>, cdm: Arc<CdmSlot>) {
    let mut pending = BinaryHeap::<Reverse<TimerJob>>::new();
    loop {
        let command = match pending.peek() {
            Some(Reverse(job)) => {
                let wait = job.deadline.saturating_duration_since(Instant::now());
                match rx.recv_timeout(wait) {
                    Ok(command) => command,
                    Err(RecvTimeoutError::Timeout) => {
                        fire_due_jobs(&mut pending, &cdm);
                        continue;
                    },
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            },
            None => match rx.recv() {
                Ok(command) => command,
                Err(_) => break,
            },
        };
        match command {
            TimerCommand::Schedule(job) => pending.push(Reverse(job)),
            TimerCommand::Shutdown => break,
        }
    }
    if !pending.is_empty() {
        debug!(target: "opencdm::timer", dropped = pending.len(), "discarding undelivered timers");
    }
}

fn fire_due_jobs(pending: &mut BinaryHeap<Reverse<TimerJob>>, cdm: &CdmSlot) {
    let now = Instant::now();
    while let Some(Reverse(job)) = pending.peek() {
        if job.deadline > now {
            break;
        }
        let Reverse(job) = pending.pop().expect("peeked job");
        match cdm.get() {
            Some(cdm) => cdm.timer_expired(job.context.0),
            None => {
                debug!(target: "opencdm::timer", "timer fired after cdm teardown, dropping");
            },
        }
    }
}
