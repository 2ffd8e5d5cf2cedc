//! Frame time resource.

/// Inserted into the world before the first system of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Time {
    /// Seconds covered by the current frame.
    pub delta: f64,
    /// Seconds since the app started, at the end of the current frame.
    pub elapsed: f64,
    /// Zero-based index of the current frame.
    pub frame: u64,
}

impl Time {
    /// Time for frame `frame` of a fixed-step loop.
    ///
    /// `elapsed` is `(frame + 1) * fixed_dt` rather than a running sum, so it
    /// does not drift.
    pub fn fixed(frame: u64, fixed_dt: f64) -> Self {
        Self {
            delta: fixed_dt,
            elapsed: (frame + 1) as f64 * fixed_dt,
            frame,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_is_multiplied_not_accumulated() {
        let dt = 1.0 / 60.0;
        let mut summed = 0.0;
        for _ in 0..6000 {
            summed += dt;
        }
        let time = Time::fixed(5999, dt);
        assert_eq!(time.elapsed, 6000.0 * dt);
        assert!((time.elapsed - summed).abs() < 1e-9);
        assert_eq!(time.delta, dt);
    }
}
