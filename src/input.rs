//! Input Filter: pointer samples to a smoothed force.

use crate::error::FluidError;

/// Idle time after which residual force is cut to zero.
pub const IDLE_DECAY_MS: f64 = 75.0;
/// Raw speed ceiling, in pixels per millisecond.
pub const SPEED_CAP: f32 = 3.0;
pub const DEFAULT_SMOOTHING: usize = 5;
pub const MIN_SMOOTHING: usize = 4;
pub const MAX_SMOOTHING: usize = 8;

/// Smoothed pointer state consumed by force injection.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct InputState {
    /// Normalized position, origin bottom-left.
    pub mouse_x: f32,
    pub mouse_y: f32,
    /// Smoothed displacement in pixels, y up.
    pub mouse_dx: f32,
    pub mouse_dy: f32,
    /// Smoothed speed in viewport lengths per millisecond.
    pub speed: f32,
}

#[derive(Debug)]
pub struct InputFilter {
    state: InputState,
    dx_window: Vec<f32>,
    dy_window: Vec<f32>,
    speed_window: Vec<f32>,
    last_pointer: Option<(f32, f32)>,
    last_time_ms: Option<f64>,
    /// Set by `observe`, cleared once the idle decay fires.
    active: bool,
}

impl Default for InputFilter {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING)
    }
}

impl InputFilter {
    /// Filter averaging each raw sample with the last `smoothing` outputs.
    pub fn new(smoothing: usize) -> Self {
        let smoothing = smoothing.max(1);
        Self {
            state: InputState::default(),
            dx_window: vec![0.0; smoothing],
            dy_window: vec![0.0; smoothing],
            speed_window: vec![0.0; smoothing],
            last_pointer: None,
            last_time_ms: None,
            active: false,
        }
    }

    pub fn smoothing(&self) -> usize {
        self.dx_window.len()
    }

    /// Consistent copy of the smoothed state.
    pub fn snapshot(&self) -> InputState {
        self.state
    }

    /// Feeds one pointer sample given in viewport pixels (origin top-left).
    /// A sample with an empty viewport or a non-finite coordinate is
    /// rejected and leaves the filter untouched.
    pub fn observe(
        &mut self,
        pointer_x: f32,
        pointer_y: f32,
        viewport_width: f32,
        viewport_height: f32,
        timestamp_ms: f64,
    ) -> Result<InputState, FluidError> {
        let usable = viewport_width > 0.0
            && viewport_height > 0.0
            && viewport_width.is_finite()
            && viewport_height.is_finite()
            && pointer_x.is_finite()
            && pointer_y.is_finite()
            && timestamp_ms.is_finite();
        if !usable {
            return Err(FluidError::InvalidPointer {
                x: pointer_x,
                y: pointer_y,
                width: viewport_width,
                height: viewport_height,
            });
        }

        let (raw_dx, raw_dy) = match self.last_pointer {
            Some((x0, y0)) => (pointer_x - x0, y0 - pointer_y),
            None => (0.0, 0.0),
        };
        let elapsed = self
            .last_time_ms
            .map_or(0.0, |t0| (timestamp_ms - t0).max(0.0));
        let distance = (raw_dx * raw_dx + raw_dy * raw_dy).sqrt();
        let raw_speed = (distance as f64 / elapsed.max(f64::MIN_POSITIVE)) as f32;
        let raw_speed = raw_speed.clamp(0.0, SPEED_CAP) / viewport_width.max(viewport_height);

        self.state = InputState {
            mouse_x: pointer_x / viewport_width,
            mouse_y: 1.0 - pointer_y / viewport_height,
            mouse_dx: smooth(raw_dx, &mut self.dx_window),
            mouse_dy: smooth(raw_dy, &mut self.dy_window),
            speed: smooth(raw_speed, &mut self.speed_window),
        };
        self.last_pointer = Some((pointer_x, pointer_y));
        self.last_time_ms = Some(timestamp_ms);
        self.active = true;
        Ok(self.state)
    }

    /// Called once per frame. Returns true when the idle cut-off fired.
    pub fn decay(&mut self, now_ms: f64) -> bool {
        let Some(last) = self.last_time_ms else {
            return false;
        };
        if !self.active || now_ms - last <= IDLE_DECAY_MS {
            return false;
        }
        for window in [&mut self.dx_window, &mut self.dy_window, &mut self.speed_window] {
            window.fill(0.0);
        }
        self.state.mouse_dx = 0.0;
        self.state.mouse_dy = 0.0;
        self.state.speed = 0.0;
        self.active = false;
        log::debug!("pointer idle for {:.0} ms, force decayed", now_ms - last);
        true
    }
}

/// Mean of `raw` and the window, then the window shifts in the result.
fn smooth(raw: f32, window: &mut [f32]) -> f32 {
    let sum: f32 = window.iter().sum();
    let value = (raw + sum) / (window.len() as f32 + 1.0);
    window.rotate_left(1);
    if let Some(newest) = window.last_mut() {
        *newest = value;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_has_no_displacement() {
        let mut filter = InputFilter::new(5);
        let state = filter.observe(200.0, 100.0, 400.0, 200.0, 10.0).unwrap();
        assert_eq!(state.mouse_x, 0.5);
        assert_eq!(state.mouse_y, 0.5);
        assert_eq!((state.mouse_dx, state.mouse_dy, state.speed), (0.0, 0.0, 0.0));
    }

    #[test]
    fn single_displacement_spreads_over_window() {
        for k in MIN_SMOOTHING..=MAX_SMOOTHING {
            let mut filter = InputFilter::new(k);
            filter.observe(100.0, 100.0, 400.0, 400.0, 0.0).unwrap();
            let state = filter.observe(112.0, 94.0, 400.0, 400.0, 8.0).unwrap();
            let denom = k as f32 + 1.0;
            assert_eq!(state.mouse_dx, 12.0 / denom);
            assert_eq!(state.mouse_dy, 6.0 / denom);
        }
    }

    #[test]
    fn speed_is_capped_and_normalized() {
        let mut filter = InputFilter::new(4);
        filter.observe(0.0, 0.0, 500.0, 250.0, 0.0).unwrap();
        // 300 px in 1 ms would be 300 px/ms; the cap holds it at 3.
        let state = filter.observe(300.0, 0.0, 500.0, 250.0, 1.0).unwrap();
        assert_eq!(state.speed, (SPEED_CAP / 500.0) / 5.0);
    }

    #[test]
    fn window_feeds_back_smoothed_outputs() {
        let mut filter = InputFilter::new(4);
        filter.observe(0.0, 0.0, 100.0, 100.0, 0.0).unwrap();
        let first = filter.observe(10.0, 0.0, 100.0, 100.0, 10.0).unwrap().mouse_dx;
        let second = filter.observe(20.0, 0.0, 100.0, 100.0, 20.0).unwrap().mouse_dx;
        assert_eq!(first, 2.0);
        assert_eq!(second, (10.0 + 2.0) / 5.0);
    }

    #[test]
    fn idle_decay_zeroes_exactly() {
        let mut filter = InputFilter::new(6);
        filter.observe(0.0, 0.0, 100.0, 100.0, 0.0).unwrap();
        filter.observe(50.0, 20.0, 100.0, 100.0, 5.0).unwrap();
        filter.observe(90.0, 60.0, 100.0, 100.0, 10.0).unwrap();
        assert!(!filter.decay(80.0));
        assert_ne!(filter.snapshot().mouse_dx, 0.0);

        assert!(filter.decay(86.0));
        let state = filter.snapshot();
        assert_eq!((state.mouse_dx, state.mouse_dy, state.speed), (0.0, 0.0, 0.0));
        assert!(!filter.decay(500.0));

        // The window was cleared too: the next sample is not mixed with history.
        let state = filter.observe(96.0, 60.0, 100.0, 100.0, 600.0).unwrap();
        assert_eq!(state.mouse_dx, 6.0 / 7.0);
    }

    #[test]
    fn unusable_sample_leaves_window_clean() {
        let mut filter = InputFilter::new(4);
        filter.observe(10.0, 10.0, 32.0, 32.0, 0.0).unwrap();
        let before = filter.snapshot();
        for (x, y, w, h) in [
            (12.0, 10.0, 0.0, 0.0),
            (12.0, 10.0, 32.0, -1.0),
            (f32::NAN, 10.0, 32.0, 32.0),
            (12.0, f32::INFINITY, 32.0, 32.0),
        ] {
            let err = filter.observe(x, y, w, h, 10.0).unwrap_err();
            assert!(matches!(err, FluidError::InvalidPointer { .. }));
        }
        assert_eq!(filter.snapshot(), before);

        // Displacement and timing continue from the last accepted sample.
        let state = filter.observe(16.0, 16.0, 32.0, 32.0, 20.0).unwrap();
        assert!(state.speed.is_finite() && state.speed > 0.0);
        assert_eq!(state.mouse_dx, 6.0 / 5.0);
        assert_eq!(state.mouse_dy, -6.0 / 5.0);
    }

    #[test]
    fn decay_before_any_sample_is_noop() {
        let mut filter = InputFilter::default();
        assert!(!filter.decay(1e6));
        assert_eq!(filter.snapshot(), InputState::default());
    }
}
