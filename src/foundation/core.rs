use crate::foundation::error::{SpoolError, SpoolResult};

pub use kurbo::{Point, Rect};

/// Absolute-time comparison tolerance in seconds.
///
/// Timeline times are resolved in f64 seconds and quantized only at the
/// scheduler boundary, so interval comparisons tolerate accumulated rounding.
pub const TIME_EPS: f64 = 1e-9;

/// Return `true` when two timeline times are equal within [`TIME_EPS`].
pub fn time_eq(a: f64, b: f64) -> bool {
    (a - b).abs() <= TIME_EPS
}

/// Half-open time interval `[start, end)` in seconds on the global timeline.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TimeRange {
    /// Inclusive start, seconds.
    pub start: f64,
    /// Exclusive end, seconds.
    pub end: f64,
}

impl TimeRange {
    /// Create a validated range with `start <= end`.
    pub fn new(start: f64, end: f64) -> SpoolResult<Self> {
        if start > end {
            return Err(SpoolError::validation("TimeRange start must be <= end"));
        }
        Ok(Self { start, end })
    }

    /// Length of the interval in seconds.
    pub fn duration(self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    /// Return `true` when the interval contains no time.
    pub fn is_empty(self) -> bool {
        time_eq(self.start, self.end)
    }

    /// Return `true` when `t` is inside `[start, end)`.
    pub fn contains(self, t: f64) -> bool {
        self.start - TIME_EPS <= t && t < self.end - TIME_EPS
    }

    /// Smallest interval covering both `self` and `other`.
    pub fn union(self, other: Self) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

/// Frames-per-second represented as a rational `num/den`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Fps {
    /// Numerator (frames).
    pub num: u32,
    /// Denominator (seconds), must be non-zero.
    pub den: u32,
}

impl Fps {
    /// Create a validated FPS value.
    pub fn new(num: u32, den: u32) -> SpoolResult<Self> {
        if den == 0 {
            return Err(SpoolError::validation("Fps den must be > 0"));
        }
        if num == 0 {
            return Err(SpoolError::validation("Fps num must be > 0"));
        }
        Ok(Self { num, den })
    }

    /// Convert to floating-point FPS.
    pub fn as_f64(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    /// Duration of one frame in seconds.
    pub fn frame_duration_secs(self) -> f64 {
        f64::from(self.den) / f64::from(self.num)
    }

    /// Timeline time of the `frame`-th tick.
    pub fn frame_to_secs(self, frame: u64) -> f64 {
        (frame as f64) * self.frame_duration_secs()
    }

    /// Convert seconds to a frame index using floor semantics.
    pub fn secs_to_frame_floor(self, secs: f64) -> u64 {
        (secs * self.as_f64()).floor().max(0.0) as u64
    }
}

/// Output size of the root canvas in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CanvasSize {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}
