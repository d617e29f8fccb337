//! Human-like timing and cursor motion.
//!
//! Every generator takes a sampler returning uniform values in `[0, 1)` so
//! that tests can pin the randomness; production code passes
//! [`random_unit`].

use std::time::Duration;

use crate::driver::Point;

/// One waypoint of a cursor movement and the pause after reaching it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathPoint {
    pub point: Point,
    pub delay: Duration,
}

pub fn random_unit() -> f64 {
    rand::random::<f64>()
}

/// Map a `[0, 1)` sample onto `[-1, 1)`.
fn signed(sample: f64) -> f64 {
    sample * 2.0 - 1.0
}

fn smoothstep(t: f64) -> f64 {
    t * t * (3.0 - 2.0 * t)
}

fn bezier(p0: Point, c: Point, p2: Point, t: f64) -> Point {
    let u = 1.0 - t;
    Point {
        x: u * u * p0.x + 2.0 * u * t * c.x + t * t * p2.x,
        y: u * u * p0.y + 2.0 * u * t * c.y + t * t * p2.y,
    }
}

/// Number of waypoints for a movement of `distance` pixels.
pub fn path_steps(distance: f64) -> usize {
    ((distance / 20.0).round() as usize).clamp(10, 40)
}

/// Build an eased, slightly wobbly path from `from` to `to`.
///
/// The curve is a quadratic Bézier whose control point is pushed off the
/// straight line by up to a fifth of the distance. Progress along it follows
/// smoothstep, so the cursor accelerates then brakes. Points in the middle
/// of the path get a few pixels of jitter; the last point is exactly `to`.
pub fn cursor_path<F>(from: Point, to: Point, mut sample: F) -> Vec<PathPoint>
where
    F: FnMut() -> f64,
{
    let distance = from.distance(&to);
    if distance < 1.0 {
        return vec![PathPoint {
            point: to,
            delay: point_delay(&mut sample),
        }];
    }

    let spread = distance / 5.0;
    let control = Point {
        x: (from.x + to.x) / 2.0 + signed(sample()) * spread,
        y: (from.y + to.y) / 2.0 + signed(sample()) * spread,
    };
    let jitter = (distance / 50.0).min(10.0);
    let steps = path_steps(distance);

    (1..=steps)
        .map(|i| {
            let linear = i as f64 / steps as f64;
            let mut point = if i == steps {
                to
            } else {
                bezier(from, control, to, smoothstep(linear))
            };
            if linear > 0.1 && linear < 0.9 {
                point.x += signed(sample()) * jitter;
                point.y += signed(sample()) * jitter;
            }
            PathPoint {
                point,
                delay: point_delay(&mut sample),
            }
        })
        .collect()
}

/// 10-30 ms per waypoint, with a 5 % chance of a 100-300 ms hesitation.
fn point_delay<F: FnMut() -> f64>(sample: &mut F) -> Duration {
    let mut ms = 10.0 + sample() * 20.0;
    if sample() < 0.05 {
        ms += 100.0 + sample() * 200.0;
    }
    Duration::from_millis(ms as u64)
}

/// Delay before the next keystroke: `base` ± `jitter` (relative), plus an
/// occasional thinking pause, and a little extra after word boundaries.
pub fn keystroke_delay<F>(base_ms: u64, jitter: f64, ch: char, mut sample: F) -> Duration
where
    F: FnMut() -> f64,
{
    let jitter = jitter.clamp(0.0, 1.0);
    let mut ms = base_ms as f64 * (1.0 + signed(sample()) * jitter);
    if ch == ' ' || ch.is_ascii_punctuation() {
        ms += base_ms as f64 * 0.5;
    }
    if sample() < 0.03 {
        ms += 200.0 + sample() * 300.0;
    }
    Duration::from_millis(ms.max(0.0) as u64)
}

/// Short random pause within `[min_ms, max_ms]`.
pub fn jitter_pause<F: FnMut() -> f64>(min_ms: u64, max_ms: u64, mut sample: F) -> Duration {
    let span = max_ms.saturating_sub(min_ms) as f64;
    Duration::from_millis(min_ms + (sample() * span) as u64)
}
