//! Turntable: one independently playable, scratchable sample channel
//!
//! A turntable owns an optional audio source, a fractional playback
//! position, an inertia-smoothed speed, an ordered effect chain, and mix
//! parameters. `render_block` produces one block of stereo float audio;
//! `forward_block` advances the position without producing audio.
//!
//! Position integration, fades and the wrap/sync behavior live in
//! `render_scratch`; everything downstream (effects, stereo split, echo
//! mix-in, peak tracking) composes on top in `render_block`.

use crate::fx::{Echo, EffectId, ExternalPlugin, FxSlot, Lowpass, StereoExternalPlugin, StereoFx};
use crate::source::AudioSource;
use crate::types::{Sample, TurntableId, INT16_CEILING};

/// Raised by the sync leader when its position wraps; `at` is the sample
/// offset of the wrap within the block
#[derive(Debug, Default, Clone, Copy)]
pub struct SyncPulse {
    pub triggered: bool,
    pub at: usize,
}

/// Which fade the next zero-crossing of the real speed should schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FadeState {
    /// Currently silent; a speed rise from zero fades in
    NeedFadeIn,
    /// Currently audible; a speed fall to zero fades out
    NeedFadeOut,
}

#[derive(Debug)]
pub struct Turntable {
    pub(crate) id: TurntableId,
    pub(crate) name: String,

    pub(crate) source: Option<AudioSource>,
    /// sourceRate / deviceRate, folded into the resolved pitch
    pub(crate) pitch_correction: f32,

    // position integrator
    pub(crate) pos_f: f64,
    pub(crate) maxpos: f64,
    pub(crate) pos_i_max: usize,

    // speed ramp
    /// Speed input (from motor spin, pitch changes, or scratch input)
    pub(crate) speed: f32,
    speed_target: f32,
    pub(crate) speed_real: f32,
    speed_step: f32,
    speed_last: f32,

    // fades
    fade: FadeState,
    fade_in: bool,
    fade_out: bool,
    do_mute: bool,

    // pitch and gain resolution
    pub(crate) rel_pitch: f32,
    pub(crate) res_pitch: f32,
    pub(crate) rel_volume: f32,
    pub(crate) res_volume: f32,
    res_volume_left: f32,
    res_volume_right: f32,
    pub(crate) pan: f32,
    /// Main volume after sqrt(N) normalization, pushed down by the mixer
    pub(crate) res_main_volume: f32,

    // mute resolution
    pub(crate) mute: bool,
    pub(crate) mix_mute: bool,
    pub(crate) mix_solo: bool,
    res_mute: bool,
    res_mute_old: bool,

    pub(crate) looping: bool,
    pub(crate) autotrigger: bool,
    pub(crate) is_playing: bool,

    // sync role
    pub(crate) is_sync_leader: bool,
    pub(crate) is_sync_follower: bool,
    pub(crate) sync_cycles: u32,
    pub(crate) sync_countdown: u32,
    pub(crate) want_stop: bool,

    // manual scratch drive
    pub(crate) do_scratch: bool,
    pub(crate) sense_cycles: u32,

    // effect chains
    fx: Vec<FxSlot>,
    stereo_fx: Vec<StereoFx>,
    next_effect_id: EffectId,

    // block buffers
    output: Vec<Sample>,
    output2: Vec<Sample>,
    inv_block: f32,

    peak_left: Sample,
    peak_right: Sample,
}

impl Turntable {
    pub(crate) fn new(id: TurntableId, name: String, echo_capacity: usize) -> Self {
        let mut table = Self {
            id,
            name,
            source: None,
            pitch_correction: 1.0,
            pos_f: 0.0,
            maxpos: 0.0,
            pos_i_max: 0,
            speed: 1.0,
            speed_target: 1.0,
            speed_real: 1.0,
            speed_step: 0.0,
            speed_last: 1.0,
            fade: FadeState::NeedFadeOut,
            fade_in: false,
            fade_out: false,
            do_mute: false,
            rel_pitch: 1.0,
            res_pitch: 1.0,
            rel_volume: 1.0,
            res_volume: 1.0,
            res_volume_left: 1.0,
            res_volume_right: 1.0,
            pan: 0.0,
            res_main_volume: 1.0,
            mute: false,
            mix_mute: false,
            mix_solo: false,
            res_mute: false,
            res_mute_old: false,
            looping: true,
            autotrigger: true,
            is_playing: false,
            is_sync_leader: false,
            is_sync_follower: false,
            sync_cycles: 0,
            sync_countdown: 0,
            want_stop: false,
            do_scratch: false,
            sense_cycles: 0,
            fx: vec![
                FxSlot::Lowpass(Lowpass::new()),
                FxSlot::Echo(Echo::new(echo_capacity)),
            ],
            stereo_fx: Vec::new(),
            next_effect_id: 0,
            output: Vec::new(),
            output2: Vec::new(),
            inv_block: 0.0,
            peak_left: 0.0,
            peak_right: 0.0,
        };
        table.recalc_volume();
        table
    }

    pub fn id(&self) -> TurntableId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    pub fn is_sync_leader(&self) -> bool {
        self.is_sync_leader
    }

    pub fn is_sync_follower(&self) -> bool {
        self.is_sync_follower
    }

    pub fn source(&self) -> Option<&AudioSource> {
        self.source.as_ref()
    }

    pub fn position(&self) -> f64 {
        self.pos_f
    }

    pub fn speed(&self) -> f32 {
        self.speed_real
    }

    /// Peak magnitudes since the last trigger/stop, for level meters
    pub fn peaks(&self) -> (Sample, Sample) {
        (self.peak_left, self.peak_right)
    }

    pub(crate) fn reset_peaks(&mut self) {
        self.peak_left = 0.0;
        self.peak_right = 0.0;
    }

    // ------------------------------------------------------------------
    // configuration

    pub(crate) fn set_output_size(&mut self, block: usize) {
        self.output.clear();
        self.output.resize(block, 0.0);
        self.output2.clear();
        self.output2.resize(block, 0.0);
        self.inv_block = if block > 0 { 1.0 / block as f32 } else { 0.0 };

        for slot in self.fx.iter_mut() {
            slot.set_block_size(block);
        }
    }

    pub(crate) fn attach_source(
        &mut self,
        source: AudioSource,
        device_rate: u32,
        main_pitch: f32,
    ) {
        self.pitch_correction = source.sample_rate() as f32 / device_rate as f32;
        self.maxpos = source.len() as f64;
        self.pos_i_max = source.len() - 1;
        self.pos_f = 0.0;
        self.source = Some(source);
        self.recalc_pitch(main_pitch);
    }

    pub(crate) fn update_pitch_correction(&mut self, device_rate: u32, main_pitch: f32) {
        self.pitch_correction = match &self.source {
            Some(source) => source.sample_rate() as f32 / device_rate as f32,
            None => 1.0,
        };
        self.recalc_pitch(main_pitch);
    }

    // ------------------------------------------------------------------
    // pitch / volume resolution

    pub(crate) fn set_pitch(&mut self, rel_pitch: f32, main_pitch: f32) {
        self.rel_pitch = rel_pitch;
        self.recalc_pitch(main_pitch);
    }

    pub(crate) fn recalc_pitch(&mut self, main_pitch: f32) {
        self.res_pitch = main_pitch * self.rel_pitch * self.pitch_correction;
        self.speed = self.res_pitch;
        self.update_echo_delay();
    }

    pub(crate) fn set_volume(&mut self, volume: f32) {
        self.rel_volume = volume;
        self.recalc_volume();
    }

    pub(crate) fn set_pan(&mut self, pan: f32) {
        self.pan = pan;
        self.recalc_volume();
    }

    pub(crate) fn recalc_volume(&mut self) {
        self.res_volume = self.rel_volume * self.res_main_volume;

        if self.pan > 0.0 {
            self.res_volume_left = (1.0 - self.pan) * self.res_volume;
            self.res_volume_right = self.res_volume;
        } else if self.pan < 0.0 {
            self.res_volume_left = self.res_volume;
            self.res_volume_right = (1.0 + self.pan) * self.res_volume;
        } else {
            self.res_volume_left = self.res_volume;
            self.res_volume_right = self.res_volume;
        }

        let res_volume = self.res_volume;
        if let Some(ec) = self.echo_mut() {
            ec.update_gains(res_volume);
        }
    }

    pub(crate) fn gains(&self) -> (f32, f32) {
        (self.res_volume_left, self.res_volume_right)
    }

    // ------------------------------------------------------------------
    // mute resolution

    /// Resolve the effective mute from the three flags and the global
    /// solo state; the edge is picked up as a fade in `calc_speed`
    pub(crate) fn resolve_mute(&mut self, solo_active: bool) {
        self.res_mute = self.mute || self.mix_mute || (solo_active && !self.mix_solo);
    }

    // ------------------------------------------------------------------
    // builtin effect parameter surface

    fn lowpass_mut(&mut self) -> Option<&mut Lowpass> {
        self.fx.iter_mut().find_map(|slot| match slot {
            FxSlot::Lowpass(lp) => Some(lp),
            _ => None,
        })
    }

    pub fn lowpass(&self) -> Option<&Lowpass> {
        self.fx.iter().find_map(|slot| match slot {
            FxSlot::Lowpass(lp) => Some(lp),
            _ => None,
        })
    }

    fn echo_mut(&mut self) -> Option<&mut Echo> {
        self.fx.iter_mut().find_map(|slot| match slot {
            FxSlot::Echo(ec) => Some(ec),
            _ => None,
        })
    }

    pub fn echo(&self) -> Option<&Echo> {
        self.fx.iter().find_map(|slot| match slot {
            FxSlot::Echo(ec) => Some(ec),
            _ => None,
        })
    }

    pub fn lp_set_enable(&mut self, enabled: bool) {
        if let Some(lp) = self.lowpass_mut() {
            lp.set_enable(enabled);
        }
    }

    pub fn lp_set_gain(&mut self, gain: f32) {
        if let Some(lp) = self.lowpass_mut() {
            lp.set_gain(gain);
        }
    }

    pub fn lp_set_reso(&mut self, reso: f32) {
        if let Some(lp) = self.lowpass_mut() {
            lp.set_reso(reso);
        }
    }

    pub fn lp_set_freq(&mut self, freq: f32) {
        if let Some(lp) = self.lowpass_mut() {
            lp.set_freq(freq);
        }
    }

    pub fn ec_set_enable(&mut self, enabled: bool) {
        if let Some(ec) = self.echo_mut() {
            ec.set_enable(enabled);
        }
    }

    pub fn ec_set_length(&mut self, length: f32) {
        let samples = self.source.as_ref().map_or(0, |s| s.len());
        let pitch = self.res_pitch;
        if let Some(ec) = self.echo_mut() {
            ec.update_delay(length, samples, pitch);
        }
    }

    fn update_echo_delay(&mut self) {
        let length = self.echo().map(|ec| ec.length());
        if let Some(length) = length {
            self.ec_set_length(length);
        }
    }

    pub fn ec_set_feedback(&mut self, feedback: f32) {
        if let Some(ec) = self.echo_mut() {
            ec.set_feedback(feedback);
        }
    }

    pub fn ec_set_pan(&mut self, pan: f32) {
        if let Some(ec) = self.echo_mut() {
            ec.set_pan(pan);
        }
        self.recalc_volume();
    }

    pub fn ec_set_volume(&mut self, volume: f32) {
        if let Some(ec) = self.echo_mut() {
            ec.set_volume(volume);
        }
        self.recalc_volume();
    }

    pub fn clear_echo(&mut self) {
        if let Some(ec) = self.echo_mut() {
            ec.clear();
        }
    }

    // ------------------------------------------------------------------
    // effect chain editing (callers hold the render lock)

    /// Append a mono external effect; returns its stable identifier
    pub fn add_effect(&mut self, plugin: Box<dyn ExternalPlugin>) -> EffectId {
        let id = self.next_effect_id;
        self.next_effect_id += 1;

        let mut fx = crate::fx::ExternalFx::new(id, plugin);
        if self.is_playing {
            fx.activate();
        }
        self.fx.push(FxSlot::External(fx));
        id
    }

    /// Append a stereo external effect; returns its stable identifier
    pub fn add_stereo_effect(&mut self, plugin: Box<dyn StereoExternalPlugin>) -> EffectId {
        let id = self.next_effect_id;
        self.next_effect_id += 1;

        let mut fx = StereoFx::new(id, plugin);
        if self.is_playing {
            fx.activate();
        }
        self.stereo_fx.push(fx);
        id
    }

    pub fn effect_count(&self) -> usize {
        self.fx.len()
    }

    pub fn effect_label(&self, index: usize) -> Option<&str> {
        self.fx.get(index).map(|slot| slot.label())
    }

    /// Swap a chain slot with its predecessor
    pub fn effect_up(&mut self, index: usize) {
        if index > 0 && index < self.fx.len() {
            self.fx.swap(index - 1, index);
        }
    }

    /// Swap a chain slot with its successor
    pub fn effect_down(&mut self, index: usize) {
        if index + 1 < self.fx.len() {
            self.fx.swap(index, index + 1);
        }
    }

    /// Move a chain slot to an absolute position
    pub fn effect_move(&mut self, index: usize, to: usize) {
        if index < self.fx.len() && to < self.fx.len() && index != to {
            let slot = self.fx.remove(index);
            self.fx.insert(to, slot);
        }
    }

    /// Remove an external effect from either chain; builtins stay
    pub fn remove_effect(&mut self, id: EffectId) -> bool {
        if let Some(pos) = self.fx.iter().position(|s| s.external_id() == Some(id)) {
            self.fx.remove(pos);
            return true;
        }
        if let Some(pos) = self.stereo_fx.iter().position(|s| s.id == id) {
            self.stereo_fx.remove(pos);
            return true;
        }
        false
    }

    pub(crate) fn external_mut(&mut self, id: EffectId) -> Option<&mut crate::fx::ExternalFx> {
        self.fx.iter_mut().find_map(|slot| match slot {
            FxSlot::External(fx) if fx.id == id => Some(fx),
            _ => None,
        })
    }

    pub(crate) fn stereo_external_mut(&mut self, id: EffectId) -> Option<&mut StereoFx> {
        self.stereo_fx.iter_mut().find(|fx| fx.id == id)
    }

    pub(crate) fn external(&self, id: EffectId) -> Option<&crate::fx::ExternalFx> {
        self.fx.iter().find_map(|slot| match slot {
            FxSlot::External(fx) if fx.id == id => Some(fx),
            _ => None,
        })
    }

    pub(crate) fn stereo_external(&self, id: EffectId) -> Option<&StereoFx> {
        self.stereo_fx.iter().find(|fx| fx.id == id)
    }

    // ------------------------------------------------------------------
    // play state

    /// Restart position and speed for a (re)trigger; the leader raises
    /// its pulse at offset zero
    pub(crate) fn retrigger(&mut self, sync: &mut SyncPulse) {
        self.pos_f = if self.res_pitch >= 0.0 { 0.0 } else { self.maxpos };

        self.fade = FadeState::NeedFadeOut;
        self.speed = self.res_pitch;
        self.speed_real = self.res_pitch;
        self.speed_target = self.res_pitch;
        self.want_stop = false;

        self.reset_peaks();

        if self.is_sync_leader {
            sync.triggered = true;
            sync.at = 0;
        }
    }

    /// Mark playing and activate the chains; returns false if the table
    /// was already playing (retrigger only)
    pub(crate) fn begin_playback(&mut self) -> bool {
        if self.is_playing {
            return false;
        }
        self.is_playing = true;

        for slot in self.fx.iter_mut() {
            slot.activate();
        }
        for fx in self.stereo_fx.iter_mut() {
            fx.activate();
        }
        true
    }

    /// Mark stopped and deactivate the chains (echo clears its ring)
    pub(crate) fn end_playback(&mut self) {
        self.is_playing = false;
        self.want_stop = false;
        self.reset_peaks();

        for slot in self.fx.iter_mut() {
            slot.deactivate();
        }
        for fx in self.stereo_fx.iter_mut() {
            fx.deactivate();
        }
    }

    // ------------------------------------------------------------------
    // rendering

    /// Step the real speed toward its target and schedule fades for
    /// zero-crossings and mute edges
    fn calc_speed(&mut self, inertia: f32) {
        self.do_mute = false;
        self.fade_out = false;
        self.fade_in = false;

        if self.speed != self.speed_target {
            self.speed_target = self.speed;
            self.speed_step = (self.speed_target - self.speed_real) / inertia;
        }

        if self.speed_target != self.speed_real {
            self.speed_real += self.speed_step;
            if self.speed_step < 0.0 && self.speed_real < self.speed_target {
                self.speed_real = self.speed_target;
            } else if self.speed_step > 0.0 && self.speed_real > self.speed_target {
                self.speed_real = self.speed_target;
            }
        }

        match self.fade {
            FadeState::NeedFadeIn => {
                if self.speed_last == 0.0 && self.speed_real != 0.0 {
                    self.fade_in = true;
                    self.fade = FadeState::NeedFadeOut;
                }
            }
            FadeState::NeedFadeOut => {
                if self.speed_last != 0.0 && self.speed_real == 0.0 {
                    self.fade_out = true;
                    self.fade = FadeState::NeedFadeIn;
                }
            }
        }

        self.speed_last = self.speed_real;

        if self.res_mute != self.res_mute_old {
            if self.res_mute {
                self.fade_out = true;
                self.fade_in = false;
                self.fade = FadeState::NeedFadeIn;
            } else {
                self.fade_in = true;
                self.fade_out = false;
                self.fade = FadeState::NeedFadeOut;
            }
            self.res_mute_old = self.res_mute;
        } else if self.res_mute {
            self.do_mute = true;
        }
    }

    /// Fill the mono output buffer from the integrated position with
    /// linear interpolation, handling wraparound, sync pulses, fades and
    /// the wants-stop flag
    pub(crate) fn render_scratch(&mut self, sync: &mut SyncPulse, inertia: f32) {
        self.calc_speed(inertia);

        let Self {
            source,
            output,
            pos_f,
            maxpos,
            pos_i_max,
            speed_real,
            res_pitch,
            looping,
            is_sync_leader,
            want_stop,
            fade_in,
            fade_out,
            do_mute,
            inv_block,
            ..
        } = self;

        let Some(source) = source.as_ref() else {
            output.fill(0.0);
            return;
        };
        let buffer = source.samples();

        let mut fade_vol: f32 = 0.0;

        for (sample, out) in output.iter_mut().enumerate() {
            if *speed_real != 0.0 || *fade_out {
                *pos_f += *speed_real as f64;

                if *pos_f >= *maxpos {
                    *pos_f -= *maxpos;
                    if *res_pitch > 0.0 {
                        if *looping {
                            if *is_sync_leader {
                                sync.triggered = true;
                                sync.at = sample;
                            }
                        } else {
                            *want_stop = true;
                        }
                    }
                } else if *pos_f < 0.0 {
                    *pos_f += *maxpos;
                    if *res_pitch < 0.0 {
                        if *looping {
                            if *is_sync_leader {
                                sync.triggered = true;
                                sync.at = sample;
                            }
                        } else {
                            *want_stop = true;
                        }
                    }
                }

                if *do_mute {
                    *out = 0.0;
                } else {
                    let pos_floor = pos_f.floor();
                    let amount_b = (*pos_f - pos_floor) as f32;
                    let amount_a = 1.0 - amount_b;

                    // the index can only land outside the buffer for
                    // extreme speeds; clamp rather than read past the end
                    let pos_i = (pos_floor as usize).min(*pos_i_max);

                    let sample_a = buffer[pos_i] as Sample;
                    // interpolating past the last sample wraps to the
                    // first for a click-free loop seam
                    let sample_b = if pos_i == *pos_i_max {
                        buffer[0] as Sample
                    } else {
                        buffer[pos_i + 1] as Sample
                    };

                    let mut res = sample_a * amount_a + sample_b * amount_b;

                    // scale to 0 dB := 1.0
                    res /= INT16_CEILING;

                    if *fade_in {
                        res *= fade_vol;
                    } else if *fade_out {
                        res *= 1.0 - fade_vol;
                    }

                    *out = res;
                }
            } else {
                *out = 0.0;
            }

            fade_vol += *inv_block;
        }
    }

    /// Advance the position without producing audio.
    ///
    /// Adding `speed * n` once differs from adding `speed` n times in the
    /// last bits, but double precision keeps the drift inaudible, so the
    /// bulk update is taken whenever the whole block stays strictly in
    /// bounds; wraps fall back to the per-sample loop so sync pulses and
    /// wants-stop keep their sample-accurate timing.
    pub(crate) fn forward_block(&mut self, sync: &mut SyncPulse, inertia: f32) {
        self.calc_speed(inertia);

        if self.speed_real == 0.0 && !self.fade_out {
            return;
        }
        if self.source.is_none() {
            return;
        }

        let block = self.output.len();
        let bulk = self.pos_f + self.speed_real as f64 * block as f64;
        if bulk > 0.0 && bulk < self.maxpos {
            self.pos_f = bulk;
            return;
        }

        for sample in 0..block {
            self.pos_f += self.speed_real as f64;

            if self.pos_f >= self.maxpos {
                self.pos_f -= self.maxpos;
                if self.res_pitch > 0.0 {
                    if self.looping {
                        if self.is_sync_leader {
                            sync.triggered = true;
                            sync.at = sample;
                        }
                    } else {
                        self.want_stop = true;
                    }
                }
            } else if self.pos_f < 0.0 {
                self.pos_f += self.maxpos;
                if self.res_pitch < 0.0 {
                    if self.looping {
                        if self.is_sync_leader {
                            sync.triggered = true;
                            sync.at = sample;
                        }
                    } else {
                        self.want_stop = true;
                    }
                }
            }
        }
    }

    /// Produce one full stereo block: scratch render, mono chain, stereo
    /// split and chain, gain resolution, echo wet mix-in, peak tracking
    pub(crate) fn render_block(&mut self, sync: &mut SyncPulse, inertia: f32) {
        if self.do_scratch && self.sense_cycles > 0 {
            self.sense_cycles -= 1;
            if self.sense_cycles == 0 {
                // manual drag released: the motor input drops to zero
                self.speed = 0.0;
            }
        }

        self.render_scratch(sync, inertia);

        {
            let Self { fx, output, .. } = self;
            for slot in fx.iter_mut() {
                if slot.is_enabled() {
                    slot.run(output);
                }
            }
        }

        let (gain_left, gain_right) = (self.res_volume_left, self.res_volume_right);

        if !self.stereo_fx.is_empty() {
            let Self {
                output,
                output2,
                stereo_fx,
                ..
            } = self;
            output2.copy_from_slice(output);

            for fx in stereo_fx.iter_mut() {
                if fx.enabled {
                    fx.run(output, output2);
                }
            }

            for s in output.iter_mut() {
                *s *= gain_left;
            }
            for s in output2.iter_mut() {
                *s *= gain_right;
            }
        } else {
            let Self {
                output, output2, ..
            } = self;
            for (right, left) in output2.iter_mut().zip(output.iter_mut()) {
                *right = *left * gain_right;
                *left *= gain_left;
            }
        }

        {
            let Self {
                fx,
                output,
                output2,
                ..
            } = self;
            let echo = fx.iter().find_map(|slot| match slot {
                FxSlot::Echo(ec) if ec.enabled => Some(ec),
                _ => None,
            });
            if let Some(ec) = echo {
                for ((left, right), &wet) in
                    output.iter_mut().zip(output2.iter_mut()).zip(ec.wet())
                {
                    *left += wet * ec.volume_left;
                    *right += wet * ec.volume_right;
                }
            }
        }

        for (&left, &right) in self.output.iter().zip(self.output2.iter()) {
            let l = left.abs();
            let r = right.abs();
            if l > self.peak_left {
                self.peak_left = l;
            }
            if r > self.peak_right {
                self.peak_right = r;
            }
        }
    }

    pub(crate) fn left(&self) -> &[Sample] {
        &self.output
    }

    pub(crate) fn right(&self) -> &[Sample] {
        &self.output2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INERTIA: f32 = 10.0;

    fn table_with_ramp() -> Turntable {
        let mut table = Turntable::new(TurntableId(0), "test".to_string(), 1024);
        let source = AudioSource::from_samples(vec![0, 100, 200, 300], 44100).unwrap();
        table.set_output_size(4);
        table.attach_source(source, 44100, 1.0);
        table
    }

    #[test]
    fn test_scratch_render_at_unit_speed() {
        let mut table = table_with_ramp();
        let mut sync = SyncPulse::default();
        table.retrigger(&mut sync);

        table.render_scratch(&mut sync, INERTIA);

        let max = INT16_CEILING;
        let expected = [100.0 / max, 200.0 / max, 300.0 / max, 0.0];
        for (got, want) in table.left().iter().zip(expected.iter()) {
            assert!((got - want).abs() < 1e-6, "got {:?}", table.left());
        }
        // wrapped exactly back to the start
        assert_eq!(table.position(), 0.0);
    }

    #[test]
    fn test_wraps_count_matches_distance() {
        let mut table = table_with_ramp();
        table.is_sync_leader = true;
        let mut sync = SyncPulse::default();
        table.retrigger(&mut sync);

        let mut pulses = 0;
        for _ in 0..3 {
            sync = SyncPulse::default();
            table.render_scratch(&mut sync, INERTIA);
            if sync.triggered {
                pulses += 1;
            }
        }
        // one wrap per block at speed 1 over a 4-sample source
        assert_eq!(pulses, 3);
        assert_eq!(table.position(), 0.0);
    }

    #[test]
    fn test_no_source_renders_silence() {
        let mut table = Turntable::new(TurntableId(0), "empty".to_string(), 64);
        table.set_output_size(8);
        let mut sync = SyncPulse::default();
        table.render_scratch(&mut sync, INERTIA);
        assert!(table.left().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_non_looping_raises_want_stop() {
        let mut table = table_with_ramp();
        table.looping = false;
        let mut sync = SyncPulse::default();
        table.retrigger(&mut sync);

        table.render_scratch(&mut sync, INERTIA);
        assert!(table.want_stop);
        assert!(!sync.triggered);
    }

    #[test]
    fn test_speed_ramps_with_inertia() {
        let mut table = table_with_ramp();
        let mut sync = SyncPulse::default();
        table.retrigger(&mut sync);

        // request double speed; one block moves one inertia step
        table.speed = 2.0;
        table.render_scratch(&mut sync, INERTIA);
        assert!((table.speed() - 1.1).abs() < 1e-6);

        for _ in 0..20 {
            table.render_scratch(&mut sync, INERTIA);
        }
        assert!((table.speed() - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_mute_emits_silence_but_advances() {
        let mut table = table_with_ramp();
        let mut sync = SyncPulse::default();
        table.retrigger(&mut sync);

        table.mute = true;
        table.resolve_mute(false);

        // first muted block fades out, second is fully muted
        table.render_scratch(&mut sync, INERTIA);
        table.render_scratch(&mut sync, INERTIA);
        assert!(table.left().iter().all(|&s| s == 0.0));
        // position kept moving the whole time
        assert_eq!(table.position(), 0.0);
    }

    #[test]
    fn test_pan_law() {
        let mut table = table_with_ramp();

        table.set_pan(0.0);
        let (l, r) = table.gains();
        assert_eq!(l, r);

        table.set_pan(1.0);
        let (l, r) = table.gains();
        assert_eq!(l, 0.0);
        assert_eq!(r, table.res_volume);

        table.set_pan(-1.0);
        let (l, r) = table.gains();
        assert_eq!(l, table.res_volume);
        assert_eq!(r, 0.0);

        // continuous through zero
        table.set_pan(0.001);
        let (l_pos, _) = table.gains();
        table.set_pan(-0.001);
        let (l_neg, _) = table.gains();
        assert!((l_pos - l_neg).abs() < 0.01);
    }

    #[test]
    fn test_forward_matches_per_sample_loop() {
        let mut bulk = table_with_ramp();
        let mut slow = table_with_ramp();
        let mut sync = SyncPulse::default();
        bulk.retrigger(&mut sync);
        slow.retrigger(&mut sync);

        // fractional speed that stays in bounds for the whole block
        bulk.speed = 0.3;
        bulk.speed_real = 0.3;
        bulk.speed_target = 0.3;
        slow.speed = 0.3;
        slow.speed_real = 0.3;
        slow.speed_target = 0.3;

        bulk.forward_block(&mut sync, INERTIA);
        slow.render_scratch(&mut sync, INERTIA);

        assert!((bulk.position() - slow.position()).abs() < 1e-9);
    }

    #[test]
    fn test_retrigger_restarts_at_end_for_negative_pitch() {
        let mut table = table_with_ramp();
        table.set_pitch(-1.0, 1.0);
        let mut sync = SyncPulse::default();
        table.retrigger(&mut sync);
        assert_eq!(table.position(), 4.0);
        assert_eq!(table.speed(), -1.0);
    }

    #[test]
    fn test_effect_chain_reorder_keeps_builtins() {
        let mut table = table_with_ramp();
        assert_eq!(table.effect_label(0), Some("Lowpass"));
        table.effect_down(0);
        assert_eq!(table.effect_label(0), Some("Echo"));
        assert_eq!(table.effect_label(1), Some("Lowpass"));
        table.effect_up(1);
        assert_eq!(table.effect_label(0), Some("Lowpass"));
    }

    #[test]
    fn test_external_effect_lifecycle() {
        use crate::fx::test_support::GainPlugin;

        let mut table = table_with_ramp();
        let id = table.add_effect(Box::new(GainPlugin::new()));
        assert_eq!(table.effect_count(), 3);

        if let Some(fx) = table.external_mut(id) {
            fx.enabled = true;
            fx.set_control(0, 0.0);
        }

        let mut sync = SyncPulse::default();
        table.retrigger(&mut sync);
        assert!(table.begin_playback());
        table.render_block(&mut sync, INERTIA);
        // gain of zero wipes the block
        assert!(table.left().iter().all(|&s| s == 0.0));

        assert!(table.remove_effect(id));
        assert_eq!(table.effect_count(), 2);
    }

    #[test]
    fn test_stereo_effect_runs_after_split() {
        use crate::fx::test_support::SwapPlugin;

        let mut table = table_with_ramp();
        let id = table.add_stereo_effect(Box::new(SwapPlugin));
        if let Some(fx) = table.stereo_external_mut(id) {
            fx.enabled = true;
        }
        // full pan right: without the swap the left channel would be zero
        table.set_pan(1.0);

        let mut sync = SyncPulse::default();
        table.retrigger(&mut sync);
        table.begin_playback();
        table.render_block(&mut sync, INERTIA);

        // left got the (swapped) signal scaled by zero gain
        assert!(table.left().iter().all(|&s| s == 0.0));
        // right kept signal content
        assert!(table.right().iter().any(|&s| s != 0.0));
    }
}
