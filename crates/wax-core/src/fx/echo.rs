//! Built-in echo: a fixed-capacity circular delay with feedback
//!
//! The ring is sized once at construction for the worst-case delay and
//! never reallocated; the active delay window is a prefix of it. The wet
//! signal goes to a side buffer and is mixed into the stereo output after
//! the dry signal, with its own pan and volume.

use crate::types::Sample;

#[derive(Debug, Clone)]
pub struct Echo {
    pub enabled: bool,
    length: f32,
    feedback: f32,
    pan: f32,
    volume: f32,
    /// Resolved mix gains, derived from pan/volume and the turntable's
    /// resolved volume
    pub volume_left: f32,
    pub volume_right: f32,
    ring: Vec<Sample>,
    /// Index of the last valid ring slot for the current delay
    delay: usize,
    ptr: usize,
    wet: Vec<Sample>,
}

impl Echo {
    pub fn new(capacity: usize) -> Self {
        Self {
            enabled: false,
            length: 0.5,
            feedback: 0.3,
            pan: 0.0,
            volume: 1.0,
            volume_left: 0.0,
            volume_right: 0.0,
            ring: vec![0.0; capacity.max(16)],
            delay: 0,
            ptr: 0,
            wet: Vec::new(),
        }
    }

    pub fn set_enable(&mut self, enabled: bool) {
        self.enabled = enabled;
        self.clear();
    }

    /// Recompute the delay window. `length` is normalized to [0, 1] of the
    /// source duration; the resolved sample count compensates for playback
    /// pitch so the echo tracks musical time, not wall-clock samples.
    pub fn update_delay(&mut self, length: f32, source_samples: usize, res_pitch: f32) {
        self.length = length;

        let mut res_length = if res_pitch == 0.0 {
            length * source_samples as f32
        } else {
            length * source_samples as f32 / res_pitch
        };

        if res_length < 0.0 {
            res_length = -res_length;
        }

        let capacity = self.ring.len() as f32;
        if res_length >= capacity {
            res_length = capacity * length;
        }

        let delay = ((res_length.floor() as i64) - 2).max(0) as usize;
        // lengths above 1.0 defeat the proportional clamp; the window
        // must never point past the ring
        self.delay = delay.min(self.ring.len() - 1);
    }

    pub fn set_feedback(&mut self, feedback: f32) {
        self.feedback = feedback;
    }

    pub fn set_pan(&mut self, pan: f32) {
        self.pan = pan;
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = volume;
    }

    pub fn length(&self) -> f32 {
        self.length
    }

    pub fn feedback(&self) -> f32 {
        self.feedback
    }

    pub fn pan(&self) -> f32 {
        self.pan
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Resolve the stereo mix gains from the turntable's resolved volume
    pub fn update_gains(&mut self, res_volume: f32) {
        let res = res_volume * self.volume;

        if self.pan > 0.0 {
            self.volume_left = (1.0 - self.pan) * res;
            self.volume_right = res;
        } else if self.pan < 0.0 {
            self.volume_left = res;
            self.volume_right = (1.0 + self.pan) * res;
        } else {
            self.volume_left = res;
            self.volume_right = res;
        }
    }

    /// Zero the ring so no stale repeats survive a stop/restart
    pub fn clear(&mut self) {
        self.ring.fill(0.0);
        self.ptr = 0;
    }

    pub fn set_block_size(&mut self, block: usize) {
        self.wet.clear();
        self.wet.resize(block, 0.0);
    }

    /// Read the dry block, fill the wet side buffer, feed the ring
    pub fn run(&mut self, dry: &[Sample]) {
        for (dry_sample, wet_sample) in dry.iter().zip(self.wet.iter_mut()) {
            if self.ptr > self.delay {
                self.ptr = 0;
            }
            let echoed = self.ring[self.ptr] * self.feedback;
            self.ring[self.ptr] = dry_sample + echoed;
            *wet_sample = echoed;
            self.ptr += 1;
        }
    }

    pub fn wet(&self) -> &[Sample] {
        &self.wet
    }

    #[cfg(test)]
    pub(crate) fn ring(&self) -> &[Sample] {
        &self.ring
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_with_delay(delay_samples: usize) -> Echo {
        let mut ec = Echo::new(1024);
        // length 1.0 over a source of delay_samples+2 at pitch 1 yields
        // exactly the requested delay window
        ec.update_delay(1.0, delay_samples + 2, 1.0);
        ec.set_block_size(64);
        ec
    }

    #[test]
    fn test_impulse_returns_after_delay() {
        let mut ec = echo_with_delay(9);
        ec.set_feedback(0.5);

        let mut dry = vec![0.0_f32; 64];
        dry[0] = 1.0;
        ec.run(&dry);

        let wet = ec.wet();
        assert_eq!(wet[0], 0.0);
        // ring wraps after delay+1 slots, so the echo lands there
        assert!((wet[10] - 0.5).abs() < 1e-6, "wet[10] = {}", wet[10]);
        // second repeat is feedback-squared
        assert!((wet[20] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_clear_silences_ring() {
        let mut ec = echo_with_delay(5);
        ec.set_feedback(0.9);

        let mut dry = vec![0.5_f32; 64];
        ec.run(&dry);
        ec.clear();

        dry.fill(0.0);
        ec.run(&dry);
        assert!(ec.wet().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_delay_pitch_compensation() {
        let mut ec = Echo::new(44100);
        ec.update_delay(0.5, 1000, 1.0);
        let at_unity = ec.delay;
        ec.update_delay(0.5, 1000, 2.0);
        let at_double = ec.delay;
        // doubling pitch halves the resolved delay
        assert_eq!(at_unity, 498);
        assert_eq!(at_double, 248);
    }

    #[test]
    fn test_delay_clamped_to_capacity() {
        let mut ec = Echo::new(100);
        ec.update_delay(0.8, 10_000, 0.1);
        assert!(ec.delay < 100);
    }

    #[test]
    fn test_oversized_length_stays_in_ring() {
        let mut ec = Echo::new(1000);
        ec.set_block_size(64);
        // length far above 1.0 with a large source overshoots the
        // proportional clamp; the window still has to fit the ring
        ec.update_delay(5.0, 4000, 1.0);
        assert!(ec.delay < 1000);

        let dry = vec![0.25_f32; 64];
        ec.run(&dry);
        assert!(ec.wet().iter().all(|s| s.is_finite()));
    }

    #[test]
    fn test_negative_pitch_uses_magnitude() {
        let mut ec = Echo::new(44100);
        ec.update_delay(0.5, 1000, 2.0);
        let forward = ec.delay;
        ec.update_delay(0.5, 1000, -2.0);
        assert_eq!(ec.delay, forward);
    }
}
