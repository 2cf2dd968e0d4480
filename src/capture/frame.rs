use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use crossbeam::utils::CachePadded;
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::StaleFrameError;
use crate::geometry::Rotation;

/// Pixel formats a camera may deliver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    Grey,
    Yuyv4,
    Mjpeg,
}

/// One image handed over by the camera layer, already reduced to its luma plane.
#[derive(Debug, Clone)]
pub struct RawImage {
    /// Row-major 8 bit luma, `width * height` bytes
    pub luma: Bytes,
    pub width: u32,
    pub height: u32,
    /// Capture timestamp for latency tracking
    pub timestamp: Instant,
}

impl RawImage {
    pub fn new(luma: impl Into<Bytes>, width: u32, height: u32) -> Self {
        Self {
            luma: luma.into(),
            width,
            height,
            timestamp: Instant::now(),
        }
    }
}

/// A captured frame leased from a [`FrameChannel`].
///
/// Frames are move-only. Dropping one releases its slot in the channel, so a
/// frame is released exactly once, wherever its owner lets go of it.
pub struct Frame {
    image: RawImage,
    rotation: Rotation,
    sequence: u64,
    lease: Lease,
}

impl Frame {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn rotation(&self) -> Rotation {
        self.rotation
    }

    pub fn width(&self) -> u32 {
        self.image.width
    }

    pub fn height(&self) -> u32 {
        self.image.height
    }

    pub fn timestamp(&self) -> Instant {
        self.image.timestamp
    }

    /// Whether the channel that produced this frame is still open.
    pub fn is_live(&self) -> bool {
        self.lease.shared.open.load(Ordering::Acquire)
    }

    /// Borrow the luma plane, failing once the channel has been closed.
    pub fn luma(&self) -> Result<&Bytes, StaleFrameError> {
        if self.is_live() {
            Ok(&self.image.luma)
        } else {
            Err(StaleFrameError {
                sequence: self.sequence,
            })
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.image.width)
            .field("height", &self.image.height)
            .field("rotation", &self.rotation)
            .finish()
    }
}

struct Lease {
    shared: Arc<Shared>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.shared.stats.outstanding.fetch_sub(1, Ordering::AcqRel);
        self.shared.stats.released.fetch_add(1, Ordering::Relaxed);
    }
}

struct Shared {
    capacity: usize,
    open: AtomicBool,
    next_sequence: AtomicU64,
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    outstanding: AtomicUsize,
    acquired: AtomicU64,
    released: AtomicU64,
    rejected: AtomicU64,
}

/// Snapshot of a channel's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStats {
    pub outstanding: usize,
    pub acquired: u64,
    pub released: u64,
    pub rejected: u64,
}

/// Bounded frame-delivery channel between the camera and the scheduler.
///
/// At most `capacity` frames may be alive at once. Closing the channel makes
/// every outstanding frame stale.
#[derive(Clone)]
pub struct FrameChannel {
    shared: Arc<Shared>,
}

impl FrameChannel {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                capacity: capacity.max(1),
                open: AtomicBool::new(true),
                next_sequence: AtomicU64::new(0),
                stats: CachePadded::new(Stats::default()),
            }),
        }
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Lease a frame for `image`.
    ///
    /// Returns `None` when the channel is closed or all slots are taken.
    pub fn acquire(&self, image: RawImage, rotation: Rotation) -> Option<Frame> {
        let shared = &self.shared;
        if !shared.open.load(Ordering::Acquire) {
            shared.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let reserved = shared
            .stats
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < shared.capacity).then_some(n + 1)
            });
        if reserved.is_err() {
            shared.stats.rejected.fetch_add(1, Ordering::Relaxed);
            trace!(capacity = shared.capacity, "Frame channel full, dropping image");
            return None;
        }

        shared.stats.acquired.fetch_add(1, Ordering::Relaxed);
        let sequence = shared.next_sequence.fetch_add(1, Ordering::Relaxed);
        Some(Frame {
            image,
            rotation,
            sequence,
            lease: Lease {
                shared: Arc::clone(shared),
            },
        })
    }

    pub fn close(&self) {
        self.shared.open.store(false, Ordering::Release);
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ChannelStats {
        let stats = &self.shared.stats;
        ChannelStats {
            outstanding: stats.outstanding.load(Ordering::Acquire),
            acquired: stats.acquired.load(Ordering::Relaxed),
            released: stats.released.load(Ordering::Relaxed),
            rejected: stats.rejected.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> RawImage {
        RawImage::new(vec![0u8; 16], 4, 4)
    }

    #[test]
    fn drop_releases_slot() {
        let channel = FrameChannel::new(2);
        let a = channel.acquire(image(), Rotation::Deg0).unwrap();
        let b = channel.acquire(image(), Rotation::Deg0).unwrap();
        assert!(channel.acquire(image(), Rotation::Deg0).is_none());
        assert_eq!(channel.stats().outstanding, 2);

        drop(a);
        assert_eq!(channel.stats().outstanding, 1);
        assert_eq!(channel.stats().released, 1);
        assert!(channel.acquire(image(), Rotation::Deg0).is_some());
        drop(b);

        let stats = channel.stats();
        assert_eq!(stats.outstanding, 0);
        assert_eq!(stats.acquired, 3);
        assert_eq!(stats.released, 3);
        assert_eq!(stats.rejected, 1);
    }

    #[test]
    fn sequences_increase() {
        let channel = FrameChannel::new(4);
        let a = channel.acquire(image(), Rotation::Deg0).unwrap();
        let b = channel.acquire(image(), Rotation::Deg90).unwrap();
        assert!(b.sequence() > a.sequence());
        assert_eq!(b.rotation(), Rotation::Deg90);
    }

    #[test]
    fn closing_makes_frames_stale() {
        let channel = FrameChannel::new(4);
        let frame = channel.acquire(image(), Rotation::Deg0).unwrap();
        assert!(frame.luma().is_ok());

        channel.close();
        assert_eq!(
            frame.luma().unwrap_err(),
            StaleFrameError {
                sequence: frame.sequence()
            }
        );
        assert!(channel.acquire(image(), Rotation::Deg0).is_none());
    }
}
