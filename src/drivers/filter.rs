use micromath::F32Ext;

/// PT1 gain for a cutoff frequency at a sample period of `dt` seconds.
pub fn pt1_gain(cutoff_hz: f32, dt: f32) -> f32 {
    let rc = 1.0 / (2.0 * core::f32::consts::PI * cutoff_hz);
    (dt / (rc + dt)).clamp(0.0, 1.0)
}

/// PT1 Filter (First order low pass)
#[derive(Clone, Copy, Debug)]
pub struct Pt1Filter {
    gain: f32,
    state: f32,
}

impl Pt1Filter {
    pub fn new(gain: f32) -> Self {
        Self {
            gain: gain.clamp(0.0, 1.0),
            state: 0.0,
        }
    }

    /// Starts from zero, so the output ramps up to the first samples.
    pub fn filter(&mut self, input: f32) -> f32 {
        self.state += self.gain * (input - self.state);
        self.state
    }

    pub fn state(&self) -> f32 {
        self.state
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BiquadCoefficients {
    pub b0: f32,
    pub b1: f32,
    pub b2: f32,
    pub a1: f32,
    pub a2: f32,
}

impl BiquadCoefficients {
    /// Notch at `center_hz` for a filter run every `looptime_us`.
    pub fn notch(center_hz: f32, looptime_us: f32, q: f32) -> Self {
        let omega = 2.0 * core::f32::consts::PI * center_hz * looptime_us * 1e-6;
        let sn = omega.sin();
        let cs = omega.cos();
        let alpha = sn / (2.0 * q);

        let a0 = 1.0 + alpha;
        Self {
            b0: 1.0 / a0,
            b1: -2.0 * cs / a0,
            b2: 1.0 / a0,
            a1: -2.0 * cs / a0,
            a2: (1.0 - alpha) / a0,
        }
    }
}

/// Biquad Filter (Second order)
/// Direct Form 1, so coefficients can be swapped between samples without
/// disturbing the state.
#[derive(Clone, Copy, Debug, Default)]
pub struct BiquadFilter {
    coeffs: BiquadCoefficients,
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

impl BiquadFilter {
    pub fn new_notch(center_hz: f32, looptime_us: f32, q: f32) -> Self {
        Self {
            coeffs: BiquadCoefficients::notch(center_hz, looptime_us, q),
            ..Self::default()
        }
    }

    /// Retunes the notch, keeping the sample history.
    pub fn update_notch(&mut self, center_hz: f32, looptime_us: f32, q: f32) {
        self.coeffs = BiquadCoefficients::notch(center_hz, looptime_us, q);
    }

    pub fn coefficients(&self) -> BiquadCoefficients {
        self.coeffs
    }

    pub fn set_coefficients(&mut self, coeffs: BiquadCoefficients) {
        self.coeffs = coeffs;
    }

    pub fn filter(&mut self, input: f32) -> f32 {
        let c = &self.coeffs;
        let output = c.b0 * input + c.b1 * self.x1 + c.b2 * self.x2 - c.a1 * self.y1 - c.a2 * self.y2;

        self.x2 = self.x1;
        self.x1 = input;
        self.y2 = self.y1;
        self.y1 = output;

        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pt1_ramps_from_zero_and_converges() {
        let gain = pt1_gain(150.0, 250e-6);
        let mut lpf = Pt1Filter::new(gain);
        assert_eq!(lpf.filter(100.0), 100.0 * gain);
        assert!(lpf.filter(100.0) < 100.0);
        for _ in 0..200 {
            lpf.filter(200.0);
        }
        assert!((lpf.state() - 200.0).abs() < 0.5);
    }

    #[test]
    fn pt1_gain_in_range() {
        let g = pt1_gain(150.0, 250e-6);
        assert!(g > 0.18 && g < 0.20);
        assert_eq!(pt1_gain(1e9, 1.0), 1.0);
    }

    #[test]
    fn notch_rejects_center_and_passes_dc() {
        let looptime_us = 125.0;
        let mut notch = BiquadFilter::new_notch(500.0, looptime_us, 5.0);

        let mut peak: f32 = 0.0;
        for n in 0..4000 {
            let t = n as f32 * looptime_us * 1e-6;
            let x = (2.0 * core::f32::consts::PI * 500.0 * t).sin();
            let y = notch.filter(x);
            if n > 3000 {
                peak = peak.max(y.abs());
            }
        }
        assert!(peak < 0.3, "residual {}", peak);

        let mut dc = BiquadFilter::new_notch(500.0, looptime_us, 5.0);
        let mut y = 0.0;
        for _ in 0..2000 {
            y = dc.filter(1.0);
        }
        assert!((y - 1.0).abs() < 0.01);
    }

    #[test]
    fn retune_keeps_history() {
        let mut notch = BiquadFilter::new_notch(200.0, 125.0, 5.0);
        notch.filter(1.0);
        notch.filter(0.5);
        let before = (notch.x1, notch.y1);
        notch.update_notch(300.0, 125.0, 5.0);
        assert_eq!((notch.x1, notch.y1), before);
        assert_eq!(
            notch.coefficients(),
            BiquadCoefficients::notch(300.0, 125.0, 5.0)
        );
    }
}
