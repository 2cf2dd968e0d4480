//! Capture-size selection and rotation compensation.
//!
//! Pure functions, consulted by the capture session when picking stream
//! sizes and when stamping each delivered frame with its rotation.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::error;

/// A width × height pair reported by the camera.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaptureSize {
    pub width: u32,
    pub height: u32,
}

impl CaptureSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl fmt::Display for CaptureSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Rotation the detector must apply to read the pixel data upright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees {
            0 => Some(Rotation::Deg0),
            90 => Some(Rotation::Deg90),
            180 => Some(Rotation::Deg180),
            270 => Some(Rotation::Deg270),
            _ => None,
        }
    }

    pub fn degrees(self) -> i32 {
        self.quarter_turns() as i32 * 90
    }

    /// Number of clockwise quarter turns.
    pub fn quarter_turns(self) -> u8 {
        match self {
            Rotation::Deg0 => 0,
            Rotation::Deg90 => 1,
            Rotation::Deg180 => 2,
            Rotation::Deg270 => 3,
        }
    }
}

/// Base compensation for each canonical device rotation.
fn device_rotation_base(device_rotation: i32) -> Option<i32> {
    match device_rotation {
        0 => Some(90),
        90 => Some(0),
        180 => Some(270),
        270 => Some(180),
        _ => None,
    }
}

/// Combine the current device rotation with the sensor mounting orientation.
///
/// Unknown device rotations and results that are not a multiple of 90 are
/// logged and mapped to [`Rotation::Deg0`].
pub fn compensate_rotation(device_rotation: i32, sensor_orientation: i32) -> Rotation {
    let Some(base) = device_rotation_base(device_rotation) else {
        error!(device_rotation, "Bad device rotation value");
        return Rotation::Deg0;
    };

    let compensation = (base + sensor_orientation + 270).rem_euclid(360);
    Rotation::from_degrees(compensation).unwrap_or_else(|| {
        error!(compensation, sensor_orientation, "Bad rotation value");
        Rotation::Deg0
    })
}

/// Orientation reported to the host for the preview surface.
///
/// Reverse-landscape sensors (270) are already rotated by the capture layer,
/// so they report as 90.
pub fn reported_orientation(sensor_orientation: i32) -> i32 {
    if sensor_orientation == 270 {
        90
    } else {
        sensor_orientation
    }
}

/// Pick the capture size closest to `target` from a device-reported list.
///
/// The list is assumed to be sorted, either ascending or descending; the
/// direction is inferred from the first two entries. Ascending lists return
/// the first size exceeding the target in both dimensions (or the last size).
/// Descending lists return the last size that still covers the target.
/// A 90/270 sensor swaps the axes the target is compared against.
///
/// Returns `None` only for an empty list.
pub fn select_size(
    available: &[CaptureSize],
    target: CaptureSize,
    sensor_orientation: i32,
) -> Option<CaptureSize> {
    let (first, rest) = available.split_first()?;
    let Some(second) = rest.first() else {
        return Some(*first);
    };

    let (want_width, want_height) = if sensor_orientation.rem_euclid(180) == 0 {
        (target.width, target.height)
    } else {
        (target.height, target.width)
    };

    let mut chosen = *first;
    if second.area() > first.area() {
        for size in available {
            chosen = *size;
            if size.height > want_height && size.width > want_width {
                break;
            }
        }
    } else {
        for size in available {
            if size.height < want_height || size.width < want_width {
                break;
            }
            chosen = *size;
        }
    }
    Some(chosen)
}
