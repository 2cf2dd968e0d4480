//! Latest-wins frame scheduler
//!
//! Couples a fast producer (the camera) to a slow asynchronous consumer (the
//! detection backend). Two slots live behind one mutex: `pending`, the newest
//! undelivered frame, and the dispatch phase, which tracks the single frame in
//! flight. Submitting never waits on detection; a newer frame simply replaces
//! (and releases) the pending one.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crossbeam::utils::CachePadded;
use futures::FutureExt;
use tokio::runtime::Handle;
use tracing::{debug, trace, warn};

use super::transform;
use crate::capture::Frame;
use crate::detector::{Barcode, DetectionBackend, ResultSink};
use crate::error::DetectionError;

/// Observable scheduler state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Nothing pending, nothing in flight
    Idle,
    /// A frame waits but has not been dispatched yet
    PendingOnly,
    /// One frame is being transformed or detected
    Dispatching,
    /// A detection just completed; pending is about to be re-checked
    Draining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Dispatching { sequence: u64 },
    Draining,
}

struct Slots {
    pending: Option<Frame>,
    phase: Phase,
    /// Next dispatch uses the inverted representation
    invert_next: bool,
}

#[derive(Default)]
struct Stats {
    submitted: AtomicU64,
    superseded: AtomicU64,
    dispatched: AtomicU64,
    stale: AtomicU64,
    failures: AtomicU64,
    barcodes: AtomicU64,
}

/// Snapshot of scheduler counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub submitted: u64,
    /// Pending frames released because a newer frame replaced them
    pub superseded: u64,
    pub dispatched: u64,
    pub stale: u64,
    pub failures: u64,
    pub barcodes: u64,
}

struct Inner {
    slots: Mutex<Slots>,
    backend: Arc<dyn DetectionBackend>,
    sink: Arc<dyn ResultSink>,
    support_inverted: bool,
    runtime: Handle,
    stats: CachePadded<Stats>,
}

/// Handle to the scheduler; cheap to clone and safe to share between the
/// capture thread and detection completions.
#[derive(Clone)]
pub struct FrameScheduler {
    inner: Arc<Inner>,
}

impl FrameScheduler {
    /// Create a scheduler whose detection futures run on `runtime`.
    pub fn new(
        backend: Arc<dyn DetectionBackend>,
        sink: Arc<dyn ResultSink>,
        support_inverted: bool,
        runtime: Handle,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(Slots {
                    pending: None,
                    phase: Phase::Idle,
                    invert_next: false,
                }),
                backend,
                sink,
                support_inverted,
                runtime,
                stats: CachePadded::new(Stats::default()),
            }),
        }
    }

    /// Hand over a freshly captured frame.
    ///
    /// Replaces (and releases) any pending frame and starts a dispatch when
    /// nothing is in flight. Never waits on detection.
    pub fn submit(&self, frame: Frame) {
        let inner = &self.inner;
        inner.stats.submitted.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("qrscan_frames_submitted").increment(1);

        let idle = {
            let mut slots = inner.lock();
            if let Some(old) = slots.pending.replace(frame) {
                trace!(sequence = old.sequence(), "Superseding pending frame");
                inner.stats.superseded.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("qrscan_frames_superseded").increment(1);
                drop(old);
            }
            slots.phase == Phase::Idle
        };

        if idle {
            inner.schedule();
        }
    }

    pub fn state(&self) -> SchedulerState {
        let slots = self.inner.lock();
        match slots.phase {
            Phase::Dispatching { .. } => SchedulerState::Dispatching,
            Phase::Draining => SchedulerState::Draining,
            Phase::Idle if slots.pending.is_some() => SchedulerState::PendingOnly,
            Phase::Idle => SchedulerState::Idle,
        }
    }

    /// Sequence number of the pending frame, if any
    pub fn pending_sequence(&self) -> Option<u64> {
        self.inner.lock().pending.as_ref().map(Frame::sequence)
    }

    /// Sequence number of the frame currently in flight, if any
    pub fn in_flight_sequence(&self) -> Option<u64> {
        match self.inner.lock().phase {
            Phase::Dispatching { sequence } => Some(sequence),
            _ => None,
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        let stats = &self.inner.stats;
        SchedulerStats {
            submitted: stats.submitted.load(Ordering::Relaxed),
            superseded: stats.superseded.load(Ordering::Relaxed),
            dispatched: stats.dispatched.load(Ordering::Relaxed),
            stale: stats.stale.load(Ordering::Relaxed),
            failures: stats.failures.load(Ordering::Relaxed),
            barcodes: stats.barcodes.load(Ordering::Relaxed),
        }
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Slots> {
        // A panicking sink must not wedge the capture path
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Promote pending to in flight and dispatch it, unless a dispatch is
    /// already running. Stale frames are skipped without touching the toggle.
    fn schedule(self: &Arc<Self>) {
        loop {
            let (frame, inverted) = {
                let mut slots = self.lock();
                if matches!(slots.phase, Phase::Dispatching { .. }) {
                    return;
                }
                let Some(frame) = slots.pending.take() else {
                    slots.phase = Phase::Idle;
                    return;
                };
                slots.phase = Phase::Dispatching {
                    sequence: frame.sequence(),
                };
                (frame, self.support_inverted && slots.invert_next)
            };

            let image = if inverted {
                transform::to_inverted(&frame)
            } else {
                transform::to_direct(&frame)
            };

            match image {
                Ok(image) => {
                    if self.support_inverted {
                        let mut slots = self.lock();
                        slots.invert_next = !slots.invert_next;
                    }
                    self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("qrscan_frames_dispatched").increment(1);
                    trace!(sequence = frame.sequence(), inverted, "Dispatching frame");

                    let sequence = frame.sequence();
                    let detection = std::panic::catch_unwind(AssertUnwindSafe(|| {
                        self.backend.detect(image)
                    }))
                    .unwrap_or_else(|_| {
                        warn!(sequence, "Detection backend panicked before returning");
                        futures::future::ready(Err(DetectionError::Panicked)).boxed()
                    });
                    let inner = Arc::clone(self);
                    self.runtime.spawn(async move {
                        let result = match AssertUnwindSafe(detection).catch_unwind().await {
                            Ok(result) => result,
                            Err(_) => Err(DetectionError::Panicked),
                        };
                        inner.complete(frame, result);
                    });
                    return;
                }
                Err(err) => {
                    debug!(error = %err, "Skipping stale frame");
                    self.stats.stale.fetch_add(1, Ordering::Relaxed);
                    metrics::counter!("qrscan_frames_stale").increment(1);
                    drop(frame);
                    self.lock().phase = Phase::Draining;
                }
            }
        }
    }

    /// Completion of the single in-flight detection.
    fn complete(self: &Arc<Self>, frame: Frame, result: Result<Vec<Barcode>, DetectionError>) {
        self.lock().phase = Phase::Draining;

        match result {
            Ok(barcodes) => {
                self.stats
                    .barcodes
                    .fetch_add(barcodes.len() as u64, Ordering::Relaxed);
                metrics::counter!("qrscan_barcodes_reported").increment(barcodes.len() as u64);
                let delivered = std::panic::catch_unwind(AssertUnwindSafe(|| {
                    for barcode in &barcodes {
                        self.sink.on_barcode_value(&barcode.raw_value);
                    }
                }));
                if delivered.is_err() {
                    warn!(sequence = frame.sequence(), "Result sink panicked");
                }
            }
            Err(err) => {
                warn!(sequence = frame.sequence(), error = %err, "Barcode reading failure");
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("qrscan_detection_failures").increment(1);
            }
        }

        drop(frame);
        self.schedule();
    }
}
