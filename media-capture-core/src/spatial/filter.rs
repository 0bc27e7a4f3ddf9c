use std::f64::consts::PI;

/// Crossover used when none is given.
pub const DEFAULT_CUTOFF_HZ: f32 = 380.0;

/// Low and high band of one filtered sample.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BandSample {
    pub lf: f32,
    pub hf: f32,
}

/// Phase-matched second-order band splitter.
///
/// Both bands share the denominator, so `lf - hf` recombines into an
/// allpass. One instance per input channel; `next` must see that channel's
/// samples in order, since the history cannot be rewound.
#[derive(Debug, Clone, Default)]
pub struct BandSplitFilter {
    a1: f32,
    a2: f32,
    b0_lf: f32,
    b1_lf: f32,
    b0_hf: f32,
    b1_hf: f32,
    prev_x: [f32; 2],
    prev_lf: [f32; 2],
    prev_hf: [f32; 2],
}

impl BandSplitFilter {
    pub fn new(sample_rate: f32, cutoff_hz: f32) -> Self {
        let mut filter = Self::default();
        filter.configure(sample_rate, cutoff_hz);
        filter
    }

    /// Bilinear-transform coefficients for `cutoff_hz` at `sample_rate`.
    pub fn configure(&mut self, sample_rate: f32, cutoff_hz: f32) {
        let k = (PI * f64::from(cutoff_hz) / f64::from(sample_rate)).tan();
        let d = k * k + 2.0 * k + 1.0;
        self.a1 = (2.0 * (k * k - 1.0) / d) as f32;
        self.a2 = ((k * k - 2.0 * k + 1.0) / d) as f32;

        self.b0_lf = (k * k / d) as f32;
        self.b1_lf = 2.0 * self.b0_lf;

        self.b0_hf = (1.0 / d) as f32;
        self.b1_hf = -2.0 * self.b0_hf;
    }

    pub fn next(&mut self, x: f32) -> BandSample {
        let lf = x * self.b0_lf + self.prev_x[0] * self.b1_lf + self.prev_x[1] * self.b0_lf
            - self.prev_lf[0] * self.a1
            - self.prev_lf[1] * self.a2;
        let hf = x * self.b0_hf + self.prev_x[0] * self.b1_hf + self.prev_x[1] * self.b0_hf
            - self.prev_hf[0] * self.a1
            - self.prev_hf[1] * self.a2;

        self.prev_x = [x, self.prev_x[0]];
        self.prev_lf = [lf, self.prev_lf[0]];
        self.prev_hf = [hf, self.prev_hf[0]];
        BandSample { lf, hf }
    }
}
