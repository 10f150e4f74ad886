//! Built-in 2-pole resonant lowpass filter
//!
//! Topology after Paul Kellett's resonant filter: two cascaded one-pole
//! stages with resonance fed back from the difference of the stages.
//! Coefficients are recomputed on parameter changes, never per sample.

use crate::types::Sample;

/// Gain auto-compensation factor: high resonance lowers the input gain
/// so the feedback path cannot runaway-clip.
const GAIN_AUTO_ADJUST: f32 = 0.8;

#[derive(Debug, Clone)]
pub struct Lowpass {
    pub enabled: bool,
    gain: f32,
    reso: f32,
    freq: f32,
    a: f32,
    b: f32,
    autogain: f32,
    resgain: f32,
    buf0: Sample,
    buf1: Sample,
}

impl Lowpass {
    pub fn new() -> Self {
        let mut lp = Self {
            enabled: false,
            gain: 1.0,
            reso: 0.8,
            freq: 0.3,
            a: 0.0,
            b: 0.0,
            autogain: 1.0,
            resgain: 1.0,
            buf0: 0.0,
            buf1: 0.0,
        };
        lp.setup(1.0, 0.8, 0.3);
        lp.reset();
        lp
    }

    /// Set all three parameters and derive coefficients in one pass
    pub fn setup(&mut self, gain: f32, reso: f32, freq: f32) {
        self.gain = gain;
        self.reso = reso;
        self.freq = freq;

        self.a = 1.0 - freq;
        self.b = reso * (1.0 + (1.0 / self.a));

        self.autogain = 1.0 - reso * GAIN_AUTO_ADJUST;
        self.resgain = self.gain * self.autogain;
    }

    pub fn set_enable(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.reset();
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
        self.resgain = self.gain * self.autogain;
    }

    pub fn set_reso(&mut self, reso: f32) {
        self.reso = reso;

        self.b = reso * (1.0 + (1.0 / self.a));
        self.autogain = 1.0 - reso * GAIN_AUTO_ADJUST;
        self.resgain = self.gain * self.autogain;
    }

    /// Cutoff in [0, 1) mapping 0 to DC and 1 toward Nyquist.
    /// The 0.9999 offset keeps `a` strictly positive for the 1/a term.
    pub fn set_freq(&mut self, freq: f32) {
        self.freq = freq;

        self.a = 0.9999 - freq;
        self.b = self.reso * (1.0 + (1.0 / self.a));
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn reso(&self) -> f32 {
        self.reso
    }

    pub fn freq(&self) -> f32 {
        self.freq
    }

    /// Zero the filter state (called on activation so a fresh playback
    /// never rings with stale state)
    pub fn reset(&mut self) {
        self.buf0 = 0.0;
        self.buf1 = 0.0;
    }

    /// Filter the buffer in place
    pub fn run(&mut self, buffer: &mut [Sample]) {
        for sample in buffer.iter_mut() {
            self.buf0 = self.a * self.buf0
                + self.freq * (*sample * self.resgain + self.b * (self.buf0 - self.buf1));
            self.buf1 = self.a * self.buf1 + self.freq * self.buf0;

            *sample = self.buf1;
        }
    }
}

impl Default for Lowpass {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dc_passes_through() {
        let mut lp = Lowpass::new();
        lp.setup(1.0, 0.0, 0.5);

        let mut buf = vec![1.0_f32; 2048];
        lp.run(&mut buf);

        // with no resonance the DC gain converges to ~1
        let tail = buf[buf.len() - 1];
        assert!((tail - 1.0).abs() < 0.05, "dc gain was {}", tail);
    }

    #[test]
    fn test_nyquist_attenuated() {
        let mut lp = Lowpass::new();
        lp.setup(1.0, 0.0, 0.1);

        // alternating full-scale signal, the highest representable frequency
        let mut buf: Vec<f32> = (0..2048)
            .map(|i| if i % 2 == 0 { 1.0 } else { -1.0 })
            .collect();
        lp.run(&mut buf);

        let peak = buf[buf.len() - 64..]
            .iter()
            .fold(0.0_f32, |m, s| m.max(s.abs()));
        assert!(peak < 0.1, "nyquist peak was {}", peak);
    }

    #[test]
    fn test_reset_clears_state() {
        let mut lp = Lowpass::new();
        let mut buf = vec![1.0_f32; 64];
        lp.run(&mut buf);
        lp.reset();

        let mut silence = vec![0.0_f32; 64];
        lp.run(&mut silence);
        assert!(silence.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_resonance_autogain_compensates() {
        let mut flat = Lowpass::new();
        flat.setup(1.0, 0.0, 0.3);
        let mut resonant = Lowpass::new();
        resonant.setup(1.0, 0.9, 0.3);

        // the resonant filter's effective input gain must be reduced
        let mut a = vec![1.0_f32; 512];
        let mut b = vec![1.0_f32; 512];
        flat.run(&mut a);
        resonant.run(&mut b);
        assert!(b.iter().all(|s| s.is_finite()));
    }
}
