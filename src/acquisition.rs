//! The periodic acquisition loop shared by record and watch mode.
//!
//! A run samples the registry once per period until the operator cancels.
//! Cancellation is the normal way a run ends; whatever was collected up to
//! that point is handed back with timestamps re-based to the run start.

use std::{
    fmt::Display,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use log::{debug, info, warn};

use crate::{
    registry::Registry,
    sampler::{self, Plan, Record, Tick, sample_all},
};

/// Time between the starts of two ticks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Period(Duration);

impl Period {
    pub fn from_secs(secs: f64) -> Result<Period, String> {
        let invalid = || format!("period must be a positive number of seconds, got {secs}");
        if !(secs > 0.0) {
            return Err(invalid());
        }
        match Duration::try_from_secs_f64(secs) {
            Ok(duration) if !duration.is_zero() => Ok(Period(duration)),
            Ok(_) => Err(format!("period {secs} is below one nanosecond")),
            Err(_) => Err(invalid()),
        }
    }

    pub fn parse(text: &str) -> Result<Period, String> {
        let secs = text
            .trim()
            .parse::<f64>()
            .map_err(|e| format!("invalid period {text:?}: {e}"))?;
        Period::from_secs(secs)
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

/// What an interrupt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// No run was active.
    Ignored,
    /// The active run will stop.
    Cancelled,
    /// The active run was already stopping.
    Repeated,
}

const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Cancellation flag shared between the Ctrl-C handler and the running loop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        CancelToken::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Entry point for the signal handler.
    pub fn interrupt(&self) -> Interrupt {
        if !self.active.load(Ordering::Relaxed) {
            return Interrupt::Ignored;
        }
        if self.cancelled.swap(true, Ordering::Relaxed) {
            Interrupt::Repeated
        } else {
            Interrupt::Cancelled
        }
    }

    /// Sleep for `duration` or until cancelled. Returns false if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }

    fn arm(&self) -> Armed<'_> {
        self.active.store(true, Ordering::Relaxed);
        Armed(self)
    }
}

/// Clears the token when a run ends, however it ends.
struct Armed<'a>(&'a CancelToken);

impl Drop for Armed<'_> {
    fn drop(&mut self) {
        self.0.active.store(false, Ordering::Relaxed);
        self.0.cancelled.store(false, Ordering::Relaxed);
    }
}

/// Records of one run, with their column labels.
#[derive(Debug, Clone, Default)]
pub struct SampleSet {
    labels: Vec<String>,
    records: Vec<Record>,
}

impl SampleSet {
    pub fn new(labels: Vec<String>) -> SampleSet {
        SampleSet {
            labels,
            records: Vec::new(),
        }
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    /// Shift every timestamp so that `start` becomes zero.
    pub fn rebase(&mut self, start: f64) {
        for record in &mut self.records {
            record.timestamp -= start;
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A finished run.
#[derive(Debug)]
pub struct Run {
    pub plan: Plan,
    pub samples: SampleSet,
    /// Set when a device error ended the run before cancellation.
    pub error: Option<sampler::Error>,
}

/// Sample `plan` every `period` until `cancel` fires or a read fails.
///
/// `observer` sees every appended record with its time since run start. A
/// tick interrupted by cancellation is dropped. When a tick takes longer
/// than the period the next one starts right away.
pub fn acquire(
    registry: &mut Registry,
    plan: Plan,
    period: Period,
    cancel: &CancelToken,
    observer: &mut dyn FnMut(f64, &[f64]),
) -> Run {
    let _armed = cancel.arm();
    let mut samples = SampleSet::new(plan.labels());
    let mut error = None;

    info!(
        "starting run over {} with {} columns every {:?}",
        plan.selector(),
        plan.columns().len(),
        period.as_duration()
    );
    let start = sampler::now();

    while !cancel.is_cancelled() {
        let tick_start = Instant::now();
        match sample_all(registry, &plan, cancel) {
            Ok(Tick::Sampled(record)) => {
                observer(record.timestamp - start, &record.values);
                samples.push(record);
            }
            Ok(Tick::Idle) => debug!("no connected devices, skipping tick"),
            Ok(Tick::Cancelled) => break,
            Err(e) => {
                warn!("run ended by device error: {}", e);
                error = Some(e);
                break;
            }
        }

        let elapsed = tick_start.elapsed();
        match period.as_duration().checked_sub(elapsed) {
            Some(rest) => {
                if !cancel.sleep(rest) {
                    break;
                }
            }
            None => warn!(
                "tick took {:?}, longer than the {:?} period",
                elapsed,
                period.as_duration()
            ),
        }
    }

    samples.rebase(start);
    info!("run finished with {} records", samples.len());
    Run {
        plan,
        samples,
        error,
    }
}

/// Status line content for an active run.
#[derive(Clone)]
pub struct Progress {
    message: &'static str,
    samples: Arc<AtomicU64>,
}

impl Progress {
    pub fn new(message: &'static str) -> Progress {
        Progress {
            message,
            samples: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn tick(&self) {
        self.samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }
}

impl Display for Progress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} \t Samples: {}", self.message, self.samples())
    }
}
