// Curve - interpolated controller automation readable from the realtime thread
//
// A curve of size N has point slots at steps 0..=N. Between two set points the
// value is interpolated linearly; after the last point it holds.

use std::sync::atomic::{AtomicI32, Ordering};

const NO_POINT: i32 = i32::MIN;

/// Owned copy of a curve's set points, `(step, value)` in step order
pub type CurveData = Vec<(u32, i32)>;

/// The segment of a curve covering a given step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterpolatedEvent {
    /// Step of the point the segment starts at
    pub step: u32,
    /// Step of the point the segment ends at (or the curve size)
    pub end_step: u32,
    /// Value at `step`
    pub start: i32,
    /// Value at `end_step`
    pub end: i32,
}

impl InterpolatedEvent {
    /// Linearly interpolated value at `step`
    pub fn value_at(&self, step: u32) -> i32 {
        if self.end_step <= self.step || step <= self.step {
            return self.start;
        }
        if step >= self.end_step {
            return self.end;
        }
        let span = (self.end_step - self.step) as i64;
        let offset = (step - self.step) as i64;
        (self.start as i64 + (self.end as i64 - self.start as i64) * offset / span) as i32
    }
}

#[derive(Debug)]
pub struct Curve {
    points: Box<[AtomicI32]>,
}

impl Curve {
    /// Create an empty curve with points at 0..=size
    pub fn new(size: u32) -> Self {
        Self {
            points: (0..=size).map(|_| AtomicI32::new(NO_POINT)).collect(),
        }
    }

    /// Create a curve from saved points; points past `size` are dropped
    pub fn from_data(size: u32, data: &[(u32, i32)]) -> Self {
        let curve = Self::new(size);
        for &(step, value) in data {
            if step <= size && value != NO_POINT {
                curve.set_point(step, value);
            }
        }
        curve
    }

    pub fn size(&self) -> u32 {
        (self.points.len() - 1) as u32
    }

    pub fn point(&self, step: u32) -> Option<i32> {
        let value = self.points.get(step as usize)?.load(Ordering::Relaxed);
        (value != NO_POINT).then_some(value)
    }

    pub(crate) fn set_point(&self, step: u32, value: i32) {
        if let Some(slot) = self.points.get(step as usize) {
            slot.store(value, Ordering::Relaxed);
        }
    }

    pub(crate) fn clear_point(&self, step: u32) -> Option<i32> {
        let value = self.points.get(step as usize)?.swap(NO_POINT, Ordering::Relaxed);
        (value != NO_POINT).then_some(value)
    }

    /// The segment covering `step`
    ///
    /// At `step == size` this is the segment ending at the last point slot.
    pub fn event(&self, step: u32) -> Option<InterpolatedEvent> {
        let size = self.size();
        if step > size {
            return None;
        }

        let search_from = if step == size && step > 0 { step - 1 } else { step };
        let start_step = match (0..=search_from).rev().find(|&s| self.point(s).is_some()) {
            Some(s) => s,
            None if step == size => {
                let value = self.point(size)?;
                return Some(InterpolatedEvent {
                    step: size,
                    end_step: size,
                    start: value,
                    end: value,
                });
            }
            None => return None,
        };
        let start = self.point(start_step)?;

        let next = (start_step + 1..=size).find_map(|s| self.point(s).map(|v| (s, v)));
        let (end_step, end) = next.unwrap_or((size, start));

        Some(InterpolatedEvent {
            step: start_step,
            end_step,
            start,
            end,
        })
    }

    /// Interpolated value at `step`, `None` before the first point
    ///
    /// Realtime safe: only atomic loads, no allocation.
    pub fn value_at(&self, step: u32) -> Option<i32> {
        let size = self.size();
        let step = step.min(size);
        let start_step = (0..=step).rev().find(|&s| self.point(s).is_some())?;
        let start = self.point(start_step)?;
        match (step + 1..=size).find_map(|s| self.point(s).map(|v| (s, v))) {
            Some((end_step, end)) if step > start_step => Some(
                InterpolatedEvent {
                    step: start_step,
                    end_step,
                    start,
                    end,
                }
                .value_at(step),
            ),
            _ => Some(start),
        }
    }

    /// Copy of all set points
    pub fn data(&self) -> CurveData {
        (0..=self.size())
            .filter_map(|s| self.point(s).map(|v| (s, v)))
            .collect()
    }

    pub fn point_count(&self) -> usize {
        (0..=self.size()).filter(|&s| self.point(s).is_some()).count()
    }
}
