//! The mixer: owns all turntables and produces the interleaved output
//!
//! Tables render into per-table float buffers; the mixer accumulates them
//! into a shared stereo mix, applies the sync-follower walk when the
//! leader's pulse fires, clamps to the 16-bit output range and converts.
//! Playing tables are tracked in `render_order`: the sync leader always
//! renders first so its pulse is visible to every follower in the same
//! block.

use thiserror::Error;

use crate::config::EngineConfig;
use crate::fx::EffectId;
use crate::param::ControlTarget;
use crate::source::AudioSource;
use crate::types::{clamp_to_output, Sample, TurntableId, INT16_CEILING};

use super::turntable::{SyncPulse, Turntable};

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("unknown {0}")]
    UnknownTable(TurntableId),
    #[error("{0} has no audio loaded")]
    NoSource(TurntableId),
    #[error("{table} has no effect {effect}")]
    UnknownEffect {
        table: TurntableId,
        effect: EffectId,
    },
}

#[derive(Debug)]
pub struct Mixer {
    tables: Vec<Turntable>,
    /// Ids of currently playing tables, in render order; the leader sits
    /// at the front
    render_order: Vec<TurntableId>,
    next_id: u32,

    main_volume: f32,
    main_pitch: f32,

    sample_rate: u32,
    block_size: usize,

    mix_buffer: Vec<Sample>,
    out_buffer: Vec<i16>,
    mix_max_left: Sample,
    mix_max_right: Sample,

    sync: SyncPulse,
    leader: Option<TurntableId>,
    solo_count: usize,

    inertia: f32,
    sense_cycles: u32,
    echo_capacity: usize,
}

impl Mixer {
    pub fn new(config: &EngineConfig) -> Self {
        let block_size = (config.sample_rate / 1000).max(1) as usize;
        Self {
            tables: Vec::new(),
            render_order: Vec::new(),
            next_id: 0,
            main_volume: config.main_volume,
            main_pitch: config.main_pitch,
            sample_rate: config.sample_rate,
            block_size,
            mix_buffer: vec![0.0; block_size * 2],
            out_buffer: vec![0; block_size * 2],
            mix_max_left: 0.0,
            mix_max_right: 0.0,
            sync: SyncPulse::default(),
            leader: None,
            solo_count: 0,
            inertia: config.inertia,
            sense_cycles: config.sense_cycles,
            echo_capacity: config.echo_capacity(),
        }
    }

    // ------------------------------------------------------------------
    // table management

    pub fn add_turntable(&mut self, name: impl Into<String>) -> TurntableId {
        let id = TurntableId(self.next_id);
        self.next_id += 1;

        let mut table = Turntable::new(id, name.into(), self.echo_capacity);
        table.set_output_size(self.block_size);
        self.tables.push(table);

        // the headroom normalization depends on the table count
        self.set_main_volume(self.main_volume);
        let solo = self.solo_count > 0;
        for table in self.tables.iter_mut() {
            table.resolve_mute(solo);
        }
        id
    }

    pub fn remove_turntable(&mut self, id: TurntableId) -> Result<(), ControlError> {
        let pos = self
            .tables
            .iter()
            .position(|t| t.id == id)
            .ok_or(ControlError::UnknownTable(id))?;

        if self.tables[pos].is_playing {
            self.stop_table(id);
        }
        if self.tables[pos].mix_solo {
            self.solo_count -= 1;
        }
        if self.leader == Some(id) {
            self.leader = None;
        }
        self.tables.remove(pos);

        self.set_main_volume(self.main_volume);
        let solo = self.solo_count > 0;
        for table in self.tables.iter_mut() {
            table.resolve_mute(solo);
        }
        Ok(())
    }

    pub fn tables(&self) -> &[Turntable] {
        &self.tables
    }

    pub fn table(&self, id: TurntableId) -> Option<&Turntable> {
        self.tables.iter().find(|t| t.id == id)
    }

    pub fn table_mut(&mut self, id: TurntableId) -> Option<&mut Turntable> {
        self.tables.iter_mut().find(|t| t.id == id)
    }

    fn table_checked(&mut self, id: TurntableId) -> Result<&mut Turntable, ControlError> {
        self.tables
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(ControlError::UnknownTable(id))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    // ------------------------------------------------------------------
    // global parameters

    /// Main volume with 1/sqrt(N) headroom normalization over the table
    /// count, so a full deck does not clip where one table would not
    pub fn set_main_volume(&mut self, volume: f32) {
        self.main_volume = volume;
        let res = volume / (self.tables.len().max(1) as f32).sqrt();
        for table in self.tables.iter_mut() {
            table.res_main_volume = res;
            table.recalc_volume();
        }
    }

    pub fn main_volume(&self) -> f32 {
        self.main_volume
    }

    pub fn set_main_pitch(&mut self, pitch: f32) {
        self.main_pitch = pitch;
        for table in self.tables.iter_mut() {
            table.recalc_pitch(pitch);
        }
    }

    pub fn main_pitch(&self) -> f32 {
        self.main_pitch
    }

    /// Adopt the device rate: 1 ms blocks, refreshed pitch correction
    pub fn set_sample_rate(&mut self, rate: u32) {
        self.sample_rate = rate;
        let block = (rate / 1000).max(1) as usize;
        self.set_block_size(block);

        let main_pitch = self.main_pitch;
        for table in self.tables.iter_mut() {
            table.update_pitch_correction(rate, main_pitch);
        }
    }

    pub fn set_block_size(&mut self, block: usize) {
        self.block_size = block;
        self.mix_buffer.clear();
        self.mix_buffer.resize(block * 2, 0.0);
        self.out_buffer.clear();
        self.out_buffer.resize(block * 2, 0);

        for table in self.tables.iter_mut() {
            table.set_output_size(block);
        }
    }

    // ------------------------------------------------------------------
    // sources

    pub fn load_source(
        &mut self,
        id: TurntableId,
        source: AudioSource,
    ) -> Result<(), ControlError> {
        let (sample_rate, main_pitch) = (self.sample_rate, self.main_pitch);
        let table = self.table_checked(id)?;

        let was_playing = table.is_playing;
        if was_playing {
            self.stop_table(id);
        }

        log::info!(
            "{}: loading {} samples at {} Hz",
            id,
            source.len(),
            source.sample_rate()
        );

        let table = self.table_checked(id)?;
        table.attach_source(source, sample_rate, main_pitch);

        if was_playing {
            self.trigger(id)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // transport

    /// Start or restart playback. Fails if no audio is loaded; an already
    /// playing table restarts from the top.
    pub fn trigger(&mut self, id: TurntableId) -> Result<(), ControlError> {
        let Self {
            tables,
            render_order,
            sync,
            ..
        } = self;

        let table = tables
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(ControlError::UnknownTable(id))?;
        if table.source.is_none() {
            return Err(ControlError::NoSource(id));
        }

        table.retrigger(sync);
        if table.begin_playback() {
            if table.is_sync_leader {
                render_order.insert(0, id);
            } else {
                render_order.push(id);
            }
        }
        Ok(())
    }

    pub fn stop(&mut self, id: TurntableId) {
        match self.table(id) {
            Some(table) if table.is_playing => self.stop_table(id),
            Some(_) => log::warn!("{}: stop requested while idle", id),
            None => log::warn!("{}: stop requested for unknown table", id),
        }
    }

    fn stop_table(&mut self, id: TurntableId) {
        self.render_order.retain(|&t| t != id);
        if let Some(table) = self.table_mut(id) {
            table.end_playback();
        }
    }

    pub fn stop_all(&mut self) {
        let ids: Vec<TurntableId> = self.render_order.clone();
        for id in ids {
            self.stop_table(id);
        }
    }

    /// Trigger every armed table with a loaded source; followers start
    /// with their countdown spent so the leader's first pulse aligns them
    pub fn autotrigger_all(&mut self) {
        let ids: Vec<TurntableId> = self
            .tables
            .iter()
            .filter(|t| t.autotrigger && t.source.is_some())
            .map(|t| t.id)
            .collect();

        for table in self.tables.iter_mut() {
            table.sync_countdown = 0;
        }
        for id in ids {
            if let Err(err) = self.trigger(id) {
                log::warn!("autotrigger: {}", err);
            }
        }
    }

    // ------------------------------------------------------------------
    // sync roles

    /// Exactly one leader at a time; assigning a new one demotes the old
    pub fn set_sync_leader(&mut self, id: TurntableId) -> Result<(), ControlError> {
        if self.leader == Some(id) {
            return Ok(());
        }
        self.table_checked(id)?;

        if let Some(prev) = self.leader.take() {
            if let Some(table) = self.table_mut(prev) {
                table.is_sync_leader = false;
            }
        }
        if let Some(table) = self.table_mut(id) {
            table.is_sync_leader = true;
            table.is_sync_follower = false;
        }
        self.leader = Some(id);
        Ok(())
    }

    pub fn clear_sync_leader(&mut self) {
        if let Some(prev) = self.leader.take() {
            if let Some(table) = self.table_mut(prev) {
                table.is_sync_leader = false;
            }
        }
    }

    pub fn sync_leader(&self) -> Option<TurntableId> {
        self.leader
    }

    /// A follower with `cycles` skips that many leader pulses between
    /// retriggers; countdown starts spent, so it fires on the very first
    /// pulse after arming
    pub fn set_sync_follower(
        &mut self,
        id: TurntableId,
        follow: bool,
        cycles: u32,
    ) -> Result<(), ControlError> {
        let table = self.table_checked(id)?;
        table.is_sync_follower = follow && !table.is_sync_leader;
        table.sync_cycles = cycles;
        table.sync_countdown = 0;
        Ok(())
    }

    pub fn set_sync_cycles(&mut self, id: TurntableId, cycles: u32) -> Result<(), ControlError> {
        let table = self.table_checked(id)?;
        table.sync_cycles = cycles;
        Ok(())
    }

    // ------------------------------------------------------------------
    // scratching

    /// Entering scratch mode stops the motor drive and arms the release
    /// sense window; leaving it restores the resolved pitch
    pub fn set_scratch(&mut self, id: TurntableId, on: bool) -> Result<(), ControlError> {
        let sense = self.sense_cycles;
        let table = self.table_checked(id)?;
        if on {
            table.speed = 0.0;
            table.do_scratch = true;
            table.sense_cycles = sense;
        } else {
            table.speed = table.res_pitch;
            table.do_scratch = false;
        }
        Ok(())
    }

    /// Re-arm the scratch release window after fresh input
    pub(crate) fn touch_scratch(&mut self, id: TurntableId) {
        let sense = self.sense_cycles;
        if let Some(table) = self.table_mut(id) {
            if table.do_scratch {
                table.sense_cycles = sense;
            }
        }
    }

    // ------------------------------------------------------------------
    // mixer strip

    pub fn set_mix_mute(&mut self, id: TurntableId, on: bool) -> Result<(), ControlError> {
        let table = self.table_checked(id)?;
        table.mix_mute = on;
        let solo = self.solo_count > 0;
        for table in self.tables.iter_mut() {
            table.resolve_mute(solo);
        }
        Ok(())
    }

    pub fn set_mix_solo(&mut self, id: TurntableId, on: bool) -> Result<(), ControlError> {
        let table = self.table_checked(id)?;
        if table.mix_solo != on {
            table.mix_solo = on;
            if on {
                self.solo_count += 1;
            } else {
                self.solo_count -= 1;
            }
        }
        let solo = self.solo_count > 0;
        for table in self.tables.iter_mut() {
            table.resolve_mute(solo);
        }
        Ok(())
    }

    /// Running output peaks since the last reset, in i16 units
    pub fn mix_peaks(&self) -> (Sample, Sample) {
        (self.mix_max_left, self.mix_max_right)
    }

    pub fn reset_mix_peaks(&mut self) {
        self.mix_max_left = 0.0;
        self.mix_max_right = 0.0;
    }

    // ------------------------------------------------------------------
    // rendering

    /// Render one block from every playing table into the interleaved
    /// 16-bit output buffer
    pub fn render_all(&mut self) -> &[i16] {
        let inertia = self.inertia;
        let Self {
            tables,
            render_order,
            mix_buffer,
            out_buffer,
            mix_max_left,
            mix_max_right,
            sync,
            ..
        } = self;

        if render_order.is_empty() {
            mix_buffer.fill(0.0);
            out_buffer.fill(0);
            sync.triggered = false;
            return out_buffer;
        }

        // the first table initializes the mix instead of accumulating
        let first = render_order[0];
        if let Some(table) = tables.iter_mut().find(|t| t.id == first) {
            table.render_block(sync, inertia);
            for (frame, (&left, &right)) in mix_buffer
                .chunks_exact_mut(2)
                .zip(table.left().iter().zip(table.right()))
            {
                frame[0] = left * INT16_CEILING;
                frame[1] = right * INT16_CEILING;
            }
        }

        // leader pulse: walk every follower, counting down skip cycles;
        // firing ones retrigger and join the render order for this block
        if sync.triggered {
            let mut i = 0;
            while i < tables.len() {
                let table = &mut tables[i];
                if table.is_sync_follower {
                    if table.sync_countdown > 0 {
                        table.sync_countdown -= 1;
                    } else {
                        table.sync_countdown = table.sync_cycles;
                        if table.source.is_some() {
                            table.retrigger(sync);
                            if table.begin_playback() {
                                render_order.push(table.id);
                            }
                        }
                    }
                }
                i += 1;
            }
        }

        // remaining tables accumulate (render_order may have just grown)
        let mut i = 1;
        while i < render_order.len() {
            let id = render_order[i];
            if let Some(table) = tables.iter_mut().find(|t| t.id == id) {
                table.render_block(sync, inertia);
                for (frame, (&left, &right)) in mix_buffer
                    .chunks_exact_mut(2)
                    .zip(table.left().iter().zip(table.right()))
                {
                    frame[0] += left * INT16_CEILING;
                    frame[1] += right * INT16_CEILING;
                }
            }
            i += 1;
        }

        for (frame, out) in mix_buffer.chunks_exact(2).zip(out_buffer.chunks_exact_mut(2)) {
            let left = clamp_to_output(frame[0]);
            let right = clamp_to_output(frame[1]);
            out[0] = left as i16;
            out[1] = right as i16;

            if left.abs() > *mix_max_left {
                *mix_max_left = left.abs();
            }
            if right.abs() > *mix_max_right {
                *mix_max_right = right.abs();
            }
        }

        sync.triggered = false;

        // tables that ran off their non-looping end leave the render set
        let mut i = 0;
        while i < render_order.len() {
            let id = render_order[i];
            let done = tables
                .iter()
                .find(|t| t.id == id)
                .map_or(true, |t| t.want_stop);
            if done {
                render_order.remove(i);
                if let Some(table) = tables.iter_mut().find(|t| t.id == id) {
                    table.end_playback();
                }
            } else {
                i += 1;
            }
        }

        out_buffer
    }

    /// Advance every playing table one block without producing audio.
    /// Follows the same leader-first order as `render_all` so follower
    /// retriggers stay aligned while the engine fast-forwards.
    pub fn forward_all(&mut self) {
        let inertia = self.inertia;
        let Self {
            tables,
            render_order,
            sync,
            ..
        } = self;

        if render_order.is_empty() {
            sync.triggered = false;
            return;
        }

        let first = render_order[0];
        if let Some(table) = tables.iter_mut().find(|t| t.id == first) {
            table.forward_block(sync, inertia);
        }

        if sync.triggered {
            let mut i = 0;
            while i < tables.len() {
                let table = &mut tables[i];
                if table.is_sync_follower {
                    if table.sync_countdown > 0 {
                        table.sync_countdown -= 1;
                    } else {
                        table.sync_countdown = table.sync_cycles;
                        if table.source.is_some() {
                            table.retrigger(sync);
                            if table.begin_playback() {
                                render_order.push(table.id);
                            }
                        }
                    }
                }
                i += 1;
            }
        }

        let mut i = 1;
        while i < render_order.len() {
            let id = render_order[i];
            if let Some(table) = tables.iter_mut().find(|t| t.id == id) {
                table.forward_block(sync, inertia);
            }
            i += 1;
        }
        sync.triggered = false;

        let mut i = 0;
        while i < render_order.len() {
            let id = render_order[i];
            let done = tables
                .iter()
                .find(|t| t.id == id)
                .map_or(true, |t| t.want_stop);
            if done {
                render_order.remove(i);
                if let Some(table) = tables.iter_mut().find(|t| t.id == id) {
                    table.end_playback();
                }
            } else {
                i += 1;
            }
        }
    }

    // ------------------------------------------------------------------
    // control surface

    /// Apply one control value to its engine target
    pub fn apply(&mut self, target: ControlTarget, value: f32) -> Result<(), ControlError> {
        let main_pitch = self.main_pitch;
        match target {
            ControlTarget::MainVolume => self.set_main_volume(value),
            ControlTarget::MainPitch => self.set_main_pitch(value),

            ControlTarget::Speed(id) => {
                self.table_checked(id)?.speed = value;
            }
            ControlTarget::Spin(id) => {
                let table = self.table_checked(id)?;
                table.speed = if value > 0.0 { table.res_pitch } else { 0.0 };
            }
            ControlTarget::Volume(id) => self.table_checked(id)?.set_volume(value),
            ControlTarget::Pitch(id) => self.table_checked(id)?.set_pitch(value, main_pitch),
            ControlTarget::Pan(id) => self.table_checked(id)?.set_pan(value),

            ControlTarget::Trigger(id) => {
                if value > 0.0 {
                    self.trigger(id)?;
                } else {
                    self.stop(id);
                }
            }
            ControlTarget::LoopMode(id) => {
                self.table_checked(id)?.looping = value > 0.0;
            }
            ControlTarget::Mute(id) => {
                self.table_checked(id)?.mute = value > 0.0;
                let solo = self.solo_count > 0;
                for table in self.tables.iter_mut() {
                    table.resolve_mute(solo);
                }
            }
            ControlTarget::SyncFollower(id) => {
                let cycles = self.table_checked(id)?.sync_cycles;
                self.set_sync_follower(id, value > 0.0, cycles)?;
            }
            ControlTarget::SyncCycles(id) => self.set_sync_cycles(id, value as u32)?,

            ControlTarget::LowpassEnable(id) => self.table_checked(id)?.lp_set_enable(value > 0.0),
            ControlTarget::LowpassGain(id) => self.table_checked(id)?.lp_set_gain(value),
            ControlTarget::LowpassReso(id) => self.table_checked(id)?.lp_set_reso(value),
            ControlTarget::LowpassFreq(id) => self.table_checked(id)?.lp_set_freq(value),

            ControlTarget::EchoEnable(id) => self.table_checked(id)?.ec_set_enable(value > 0.0),
            ControlTarget::EchoLength(id) => self.table_checked(id)?.ec_set_length(value),
            ControlTarget::EchoFeedback(id) => self.table_checked(id)?.ec_set_feedback(value),
            ControlTarget::EchoPan(id) => self.table_checked(id)?.ec_set_pan(value),
            ControlTarget::EchoVolume(id) => self.table_checked(id)?.ec_set_volume(value),

            ControlTarget::FxEnable { table, effect } => {
                let t = self.table_checked(table)?;
                if let Some(fx) = t.external_mut(effect) {
                    fx.enabled = value > 0.0;
                } else if let Some(fx) = t.stereo_external_mut(effect) {
                    fx.enabled = value > 0.0;
                } else {
                    return Err(ControlError::UnknownEffect { table, effect });
                }
            }
            ControlTarget::FxControl {
                table,
                effect,
                port,
            } => {
                let t = self.table_checked(table)?;
                if let Some(fx) = t.external_mut(effect) {
                    fx.set_control(port, value);
                } else if let Some(fx) = t.stereo_external_mut(effect) {
                    fx.set_control(port, value);
                } else {
                    return Err(ControlError::UnknownEffect { table, effect });
                }
            }
        }
        Ok(())
    }

    /// Read back the current value of a control target, for relative
    /// adjustments; unknown targets read as zero
    pub fn param_value(&self, target: ControlTarget) -> f32 {
        let as_flag = |b: bool| if b { 1.0 } else { 0.0 };
        match target {
            ControlTarget::MainVolume => self.main_volume,
            ControlTarget::MainPitch => self.main_pitch,
            ControlTarget::Speed(id) => self.table(id).map_or(0.0, |t| t.speed),
            ControlTarget::Spin(id) => self.table(id).map_or(0.0, |t| as_flag(t.speed != 0.0)),
            ControlTarget::Volume(id) => self.table(id).map_or(0.0, |t| t.rel_volume),
            ControlTarget::Pitch(id) => self.table(id).map_or(0.0, |t| t.rel_pitch),
            ControlTarget::Pan(id) => self.table(id).map_or(0.0, |t| t.pan),
            ControlTarget::Trigger(id) => self.table(id).map_or(0.0, |t| as_flag(t.is_playing)),
            ControlTarget::LoopMode(id) => self.table(id).map_or(0.0, |t| as_flag(t.looping)),
            ControlTarget::Mute(id) => self.table(id).map_or(0.0, |t| as_flag(t.mute)),
            ControlTarget::SyncFollower(id) => {
                self.table(id).map_or(0.0, |t| as_flag(t.is_sync_follower))
            }
            ControlTarget::SyncCycles(id) => {
                self.table(id).map_or(0.0, |t| t.sync_cycles as f32)
            }
            ControlTarget::LowpassEnable(id) => self
                .table(id)
                .and_then(|t| t.lowpass())
                .map_or(0.0, |lp| as_flag(lp.enabled)),
            ControlTarget::LowpassGain(id) => self
                .table(id)
                .and_then(|t| t.lowpass())
                .map_or(0.0, |lp| lp.gain()),
            ControlTarget::LowpassReso(id) => self
                .table(id)
                .and_then(|t| t.lowpass())
                .map_or(0.0, |lp| lp.reso()),
            ControlTarget::LowpassFreq(id) => self
                .table(id)
                .and_then(|t| t.lowpass())
                .map_or(0.0, |lp| lp.freq()),
            ControlTarget::EchoEnable(id) => self
                .table(id)
                .and_then(|t| t.echo())
                .map_or(0.0, |ec| as_flag(ec.enabled)),
            ControlTarget::EchoLength(id) => self
                .table(id)
                .and_then(|t| t.echo())
                .map_or(0.0, |ec| ec.length()),
            ControlTarget::EchoFeedback(id) => self
                .table(id)
                .and_then(|t| t.echo())
                .map_or(0.0, |ec| ec.feedback()),
            ControlTarget::EchoPan(id) => self
                .table(id)
                .and_then(|t| t.echo())
                .map_or(0.0, |ec| ec.pan()),
            ControlTarget::EchoVolume(id) => self
                .table(id)
                .and_then(|t| t.echo())
                .map_or(0.0, |ec| ec.volume()),
            ControlTarget::FxEnable { table, effect } => {
                self.table(table).map_or(0.0, |t| {
                    if let Some(fx) = t.external(effect) {
                        as_flag(fx.enabled)
                    } else if let Some(fx) = t.stereo_external(effect) {
                        as_flag(fx.enabled)
                    } else {
                        0.0
                    }
                })
            }
            ControlTarget::FxControl {
                table,
                effect,
                port,
            } => self.table(table).map_or(0.0, |t| {
                if let Some(fx) = t.external(effect) {
                    fx.control(port)
                } else if let Some(fx) = t.stereo_external(effect) {
                    fx.control(port)
                } else {
                    0.0
                }
            }),
        }
    }
}
