use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use qrscan::capture::{FrameChannel, RawImage};
use qrscan::detector::{Barcode, DetectionBackend, DetectorImage};
use qrscan::error::DetectionError;
use qrscan::geometry::Rotation;
use qrscan::pipeline::{FrameScheduler, SchedulerState};

/// Tracks how many detections are outstanding at once.
#[derive(Default)]
struct CountingBackend {
    active: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    calls: Arc<AtomicUsize>,
}

impl DetectionBackend for CountingBackend {
    fn detect(
        &self,
        image: DetectorImage,
    ) -> BoxFuture<'static, Result<Vec<Barcode>, DetectionError>> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let active = Arc::clone(&self.active);
        async move {
            tokio::time::sleep(Duration::from_micros(200)).await;
            active.fetch_sub(1, Ordering::SeqCst);
            if call % 3 == 0 {
                Err(DetectionError::Backend("flaky".into()))
            } else {
                Ok(vec![Barcode::new(format!("frame-{}", image.sequence()))])
            }
        }
        .boxed()
    }
}

/// Records dispatched sequences; completes when the test releases a gate.
struct GatedBackend {
    dispatched: Arc<Mutex<Vec<u64>>>,
    gates: flume::Sender<oneshot::Sender<()>>,
}

impl DetectionBackend for GatedBackend {
    fn detect(
        &self,
        image: DetectorImage,
    ) -> BoxFuture<'static, Result<Vec<Barcode>, DetectionError>> {
        self.dispatched.lock().unwrap().push(image.sequence());
        let (tx, rx) = oneshot::channel();
        let _ = self.gates.send(tx);
        async move {
            let _ = rx.await;
            Ok(vec![])
        }
        .boxed()
    }
}

fn raw() -> RawImage {
    RawImage::new(vec![200u8; 32 * 32], 32, 32)
}

async fn wait_idle(scheduler: &FrameScheduler) {
    for _ in 0..1000 {
        if scheduler.state() == SchedulerState::Idle {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("scheduler stuck in {:?}", scheduler.state());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn at_most_one_detection_in_flight_under_load() {
    let backend = CountingBackend::default();
    let peak = Arc::clone(&backend.peak);
    let values = Arc::new(AtomicUsize::new(0));
    let sink = {
        let values = Arc::clone(&values);
        move |_: &str| {
            values.fetch_add(1, Ordering::SeqCst);
        }
    };
    let scheduler = FrameScheduler::new(Arc::new(backend), Arc::new(sink), true, Handle::current());
    let channel = FrameChannel::new(16);

    let producers: Vec<_> = (0..3)
        .map(|_| {
            let scheduler = scheduler.clone();
            let channel = channel.clone();
            thread::spawn(move || {
                for i in 0..300 {
                    if let Some(frame) = channel.acquire(raw(), Rotation::Deg90) {
                        scheduler.submit(frame);
                    }
                    if i % 50 == 0 {
                        thread::sleep(Duration::from_millis(1));
                    }
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    wait_idle(&scheduler).await;

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    let stats = scheduler.stats();
    assert_eq!(
        stats.submitted,
        stats.superseded + stats.dispatched + stats.stale
    );
    assert!(stats.dispatched >= 1);
    assert_eq!(stats.barcodes, values.load(Ordering::SeqCst) as u64);
    assert_eq!(channel.stats().outstanding, 0);
}

#[tokio::test]
async fn only_the_latest_frame_is_dispatched() {
    let dispatched = Arc::new(Mutex::new(Vec::new()));
    let (gate_tx, gate_rx) = flume::unbounded();
    let scheduler = FrameScheduler::new(
        Arc::new(GatedBackend {
            dispatched: Arc::clone(&dispatched),
            gates: gate_tx,
        }),
        Arc::new(|_: &str| {}),
        false,
        Handle::current(),
    );
    let channel = FrameChannel::new(8);

    let f0 = channel.acquire(raw(), Rotation::Deg0).unwrap();
    let f0_seq = f0.sequence();
    scheduler.submit(f0);
    let gate0 = gate_rx.recv_async().await.unwrap();

    let mut last = 0;
    for _ in 0..3 {
        let frame = channel.acquire(raw(), Rotation::Deg0).unwrap();
        last = frame.sequence();
        scheduler.submit(frame);
    }
    // F0 in flight, F3 pending; F1 and F2 already released
    assert_eq!(channel.stats().outstanding, 2);
    assert_eq!(scheduler.pending_sequence(), Some(last));
    assert_eq!(scheduler.in_flight_sequence(), Some(f0_seq));

    gate0.send(()).unwrap();
    let gate1 = tokio::time::timeout(Duration::from_secs(5), gate_rx.recv_async())
        .await
        .expect("pending frame never dispatched")
        .unwrap();
    assert_eq!(*dispatched.lock().unwrap(), vec![f0_seq, last]);

    gate1.send(()).unwrap();
    wait_idle(&scheduler).await;
    assert_eq!(channel.stats().outstanding, 0);
    assert_eq!(scheduler.stats().superseded, 2);
}

#[tokio::test]
async fn panicking_backend_does_not_stall() {
    struct PanicOnce {
        calls: AtomicUsize,
        seen: flume::Sender<u64>,
    }

    impl DetectionBackend for PanicOnce {
        fn detect(
            &self,
            image: DetectorImage,
        ) -> BoxFuture<'static, Result<Vec<Barcode>, DetectionError>> {
            let first = self.calls.fetch_add(1, Ordering::SeqCst) == 0;
            let _ = self.seen.send(image.sequence());
            async move {
                if first {
                    panic!("detector blew up");
                }
                Ok(vec![])
            }
            .boxed()
        }
    }

    let (seen_tx, seen_rx) = flume::unbounded();
    let scheduler = FrameScheduler::new(
        Arc::new(PanicOnce {
            calls: AtomicUsize::new(0),
            seen: seen_tx,
        }),
        Arc::new(|_: &str| {}),
        false,
        Handle::current(),
    );
    let channel = FrameChannel::new(4);

    scheduler.submit(channel.acquire(raw(), Rotation::Deg0).unwrap());
    seen_rx.recv_async().await.unwrap();
    wait_idle(&scheduler).await;
    assert_eq!(scheduler.stats().failures, 1);

    let frame = channel.acquire(raw(), Rotation::Deg0).unwrap();
    let seq = frame.sequence();
    scheduler.submit(frame);
    assert_eq!(seen_rx.recv_async().await.unwrap(), seq);
}

/// Reports one value per frame and records every dispatched sequence.
struct EchoBackend {
    seen: flume::Sender<u64>,
}

impl DetectionBackend for EchoBackend {
    fn detect(
        &self,
        image: DetectorImage,
    ) -> BoxFuture<'static, Result<Vec<Barcode>, DetectionError>> {
        let _ = self.seen.send(image.sequence());
        let value = format!("frame-{}", image.sequence());
        futures::future::ready(Ok(vec![Barcode::new(value)])).boxed()
    }
}

#[tokio::test]
async fn panicking_sink_does_not_stall() {
    let (seen_tx, seen_rx) = flume::unbounded();
    let sink_calls = Arc::new(AtomicUsize::new(0));
    let sink = {
        let sink_calls = Arc::clone(&sink_calls);
        move |_: &str| {
            if sink_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("sink blew up");
            }
        }
    };
    let scheduler = FrameScheduler::new(
        Arc::new(EchoBackend { seen: seen_tx }),
        Arc::new(sink),
        false,
        Handle::current(),
    );
    let channel = FrameChannel::new(4);

    scheduler.submit(channel.acquire(raw(), Rotation::Deg0).unwrap());
    seen_rx.recv_async().await.unwrap();
    wait_idle(&scheduler).await;

    let frame = channel.acquire(raw(), Rotation::Deg0).unwrap();
    let seq = frame.sequence();
    scheduler.submit(frame);
    let next = tokio::time::timeout(Duration::from_secs(5), seen_rx.recv_async())
        .await
        .expect("second frame never dispatched")
        .unwrap();
    assert_eq!(next, seq);
    wait_idle(&scheduler).await;
    assert_eq!(sink_calls.load(Ordering::SeqCst), 2);
    assert_eq!(channel.stats().outstanding, 0);
}

#[tokio::test]
async fn backend_panicking_on_call_does_not_stall() {
    struct PanicOnCall {
        calls: AtomicUsize,
        seen: flume::Sender<u64>,
    }

    impl DetectionBackend for PanicOnCall {
        fn detect(
            &self,
            image: DetectorImage,
        ) -> BoxFuture<'static, Result<Vec<Barcode>, DetectionError>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("detector refused the image");
            }
            let _ = self.seen.send(image.sequence());
            futures::future::ready(Ok(vec![])).boxed()
        }
    }

    let (seen_tx, seen_rx) = flume::unbounded();
    let scheduler = FrameScheduler::new(
        Arc::new(PanicOnCall {
            calls: AtomicUsize::new(0),
            seen: seen_tx,
        }),
        Arc::new(|_: &str| {}),
        false,
        Handle::current(),
    );
    let channel = FrameChannel::new(4);

    // The panic must not reach the submitting thread
    scheduler.submit(channel.acquire(raw(), Rotation::Deg0).unwrap());
    wait_idle(&scheduler).await;
    assert_eq!(scheduler.stats().failures, 1);
    assert_eq!(channel.stats().outstanding, 0);

    let frame = channel.acquire(raw(), Rotation::Deg0).unwrap();
    let seq = frame.sequence();
    scheduler.submit(frame);
    assert_eq!(seen_rx.recv_async().await.unwrap(), seq);
}
