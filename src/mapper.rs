//! Parameter Mapper: control values to simulation constants.

/// Value at `x` of the quadratic through `(x0, y0)`, `(x1, y1)`, `(x2, y2)`.
///
/// The `x` values must be distinct.
pub fn map(x: f64, x0: f64, x1: f64, x2: f64, y0: f64, y1: f64, y2: f64) -> f64 {
    y0 * (x - x1) * (x - x2) / (x0 - x1) / (x0 - x2)
        + y1 * (x - x0) * (x - x2) / (x1 - x0) / (x1 - x2)
        + y2 * (x - x0) * (x - x1) / (x2 - x0) / (x2 - x1)
}

/// Three designer-chosen (control, value) pairs for one parameter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Calibration {
    pub controls: [f64; 3],
    pub values: [f64; 3],
    /// Domain of the control surface.
    pub range: (f64, f64),
}

impl Calibration {
    pub fn map(&self, control: f64) -> f64 {
        let [x0, x1, x2] = self.controls;
        let [y0, y1, y2] = self.values;
        map(control, x0, x1, x2, y0, y1, y2)
    }

    pub fn clamp(&self, control: f64) -> f64 {
        control.clamp(self.range.0, self.range.1)
    }
}

/// Slider 1..100 to advection viscosity.
pub const VISCOSITY: Calibration = Calibration {
    controls: [1.0, 50.0, 100.0],
    values: [1.0, 11.7, 45.0],
    range: (1.0, 100.0),
};

/// Slider 0..100 to the per-frame pressure retention factor.
pub const PRESSURE: Calibration = Calibration {
    controls: [0.0, 50.0, 100.0],
    values: [0.0, 0.75, 1.0],
    range: (0.0, 100.0),
};
