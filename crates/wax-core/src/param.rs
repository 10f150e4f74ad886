//! Control parameters, input routing and the event sequencer
//!
//! Every automatable knob in the engine is addressed by a [`ControlTarget`]
//! and described by a [`SeqParam`]: bounds, relative-input scale, whether a
//! hardware controller may be bound to it, and an optional binding. All
//! input paths (GUI absolute values, relative drags, controller events)
//! funnel through [`ParamBank`], which applies the value to the mixer and
//! records it into the [`Sequencer`] when a recording is armed.

use crate::engine::{ControlError, Mixer};
use crate::fx::{EffectId, PortHint, PortInfo};
use crate::types::TurntableId;

/// Addressable engine control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlTarget {
    MainVolume,
    MainPitch,

    Speed(TurntableId),
    Spin(TurntableId),
    Volume(TurntableId),
    Pitch(TurntableId),
    Pan(TurntableId),
    Trigger(TurntableId),
    LoopMode(TurntableId),
    Mute(TurntableId),
    SyncFollower(TurntableId),
    SyncCycles(TurntableId),

    LowpassEnable(TurntableId),
    LowpassGain(TurntableId),
    LowpassReso(TurntableId),
    LowpassFreq(TurntableId),

    EchoEnable(TurntableId),
    EchoLength(TurntableId),
    EchoFeedback(TurntableId),
    EchoPan(TurntableId),
    EchoVolume(TurntableId),

    FxEnable {
        table: TurntableId,
        effect: EffectId,
    },
    FxControl {
        table: TurntableId,
        effect: EffectId,
        port: usize,
    },
}

impl ControlTarget {
    /// The turntable this target belongs to, if any
    pub fn table(&self) -> Option<TurntableId> {
        use ControlTarget::*;
        match *self {
            MainVolume | MainPitch => None,
            Speed(id) | Spin(id) | Volume(id) | Pitch(id) | Pan(id) | Trigger(id)
            | LoopMode(id) | Mute(id) | SyncFollower(id) | SyncCycles(id)
            | LowpassEnable(id) | LowpassGain(id) | LowpassReso(id) | LowpassFreq(id)
            | EchoEnable(id) | EchoLength(id) | EchoFeedback(id) | EchoPan(id)
            | EchoVolume(id) => Some(id),
            FxEnable { table, .. } | FxControl { table, .. } => Some(table),
        }
    }

    pub fn effect(&self) -> Option<EffectId> {
        match *self {
            ControlTarget::FxEnable { effect, .. } | ControlTarget::FxControl { effect, .. } => {
                Some(effect)
            }
            _ => None,
        }
    }
}

/// Kind of controller message a binding listens for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerKind {
    ControlChange,
    Note,
}

/// A hardware controller assignment for one parameter
#[derive(Debug, Clone)]
pub struct ControllerBinding {
    pub kind: ControllerKind,
    pub channel: u8,
    pub number: u8,
    /// Invert the mapped range
    pub reverse: bool,
    /// Override the parameter bounds for this binding
    pub lower: Option<f32>,
    pub upper: Option<f32>,
}

/// One incoming controller message, value normalized to [0, 1]
#[derive(Debug, Clone, Copy)]
pub struct ControllerEvent {
    pub kind: ControllerKind,
    pub channel: u8,
    pub number: u8,
    pub value: f32,
}

/// Metadata for one automatable parameter
#[derive(Debug, Clone)]
pub struct SeqParam {
    pub target: ControlTarget,
    pub name: String,
    pub max: f32,
    pub min: f32,
    /// Step applied per unit of relative (drag/jog) input
    pub scale: f32,
    /// Whether a hardware controller may be bound here
    pub mappable: bool,
    pub boolean: bool,
    pub binding: Option<ControllerBinding>,
    touched: bool,
    touch_tick: Option<u64>,
}

impl SeqParam {
    fn new(
        target: ControlTarget,
        name: String,
        max: f32,
        min: f32,
        scale: f32,
        mappable: bool,
    ) -> Self {
        Self {
            target,
            name,
            max,
            min,
            scale,
            mappable,
            boolean: false,
            binding: None,
            touched: false,
            touch_tick: None,
        }
    }

    fn boolean(target: ControlTarget, name: String, mappable: bool) -> Self {
        let mut param = Self::new(target, name, 0.01, 0.0, 1.0, mappable);
        param.boolean = true;
        param
    }

    /// Clamp into the parameter's range; bounds may be stored reversed
    /// for controls whose knob direction is inverted
    pub fn clamp(&self, value: f32) -> f32 {
        let lo = self.min.min(self.max);
        let hi = self.min.max(self.max);
        value.clamp(lo, hi)
    }

    pub fn touched(&self) -> bool {
        self.touched
    }

    pub fn touch_tick(&self) -> Option<u64> {
        self.touch_tick
    }

    fn touch(&mut self, seq: &Sequencer) {
        if seq.is_recording() {
            self.touched = true;
            self.touch_tick = Some(seq.tick());
        }
    }
}

/// A turntable's scratch surface: which targets the X and Y drag axes feed
#[derive(Debug, Clone)]
struct ScratchAxes {
    table: TurntableId,
    x: ControlTarget,
    y: ControlTarget,
}

/// One recorded automation event
#[derive(Debug, Clone, Copy)]
pub struct SeqEvent {
    pub tick: u64,
    pub target: ControlTarget,
    pub value: f32,
}

/// Records control changes against the render-cycle clock and replays
/// them sample-block-accurately
#[derive(Debug, Default)]
pub struct Sequencer {
    events: Vec<SeqEvent>,
    tick: u64,
    recording: bool,
    playing: bool,
    cursor: usize,
}

impl Sequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn events(&self) -> &[SeqEvent] {
        &self.events
    }

    pub fn start_recording(&mut self) {
        self.recording = true;
    }

    pub fn stop_recording(&mut self) {
        self.recording = false;
    }

    pub fn start_playback(&mut self) {
        self.forward_to_start();
        self.playing = true;
    }

    pub fn stop_playback(&mut self) {
        self.playing = false;
    }

    pub fn forward_to_start(&mut self) {
        self.tick = 0;
        self.cursor = 0;
    }

    /// Store an event at the current tick. A later value for the same
    /// target within the same tick overwrites rather than duplicates.
    pub fn record(&mut self, target: ControlTarget, value: f32) {
        if !self.recording {
            return;
        }

        let tick = self.tick;
        if let Some(event) = self
            .events
            .iter_mut()
            .find(|e| e.tick == tick && e.target == target)
        {
            event.value = value;
            return;
        }

        let at = self.events.partition_point(|e| e.tick <= tick);
        self.events.insert(at, SeqEvent { tick, target, value });
    }

    /// Deliver all events due this tick, then advance the clock
    pub fn step(&mut self, mixer: &mut Mixer) {
        if self.playing {
            while self.cursor < self.events.len() && self.events[self.cursor].tick <= self.tick {
                let event = self.events[self.cursor];
                if let Err(err) = mixer.apply(event.target, event.value) {
                    log::warn!("sequencer: dropping event: {}", err);
                }
                self.cursor += 1;
            }
            if self.cursor >= self.events.len() {
                self.playing = false;
            }
        }

        if self.playing || self.recording {
            self.tick += 1;
        }
    }

    /// Drop everything recorded for a removed turntable
    pub fn purge(&mut self, table: TurntableId) {
        let before = self.events.len();
        self.events.retain(|e| e.target.table() != Some(table));
        let dropped = before - self.events.len();
        if dropped > 0 {
            log::info!("sequencer: purged {} events for {}", dropped, table);
        }
        self.cursor = self.cursor.min(self.events.len());
    }

    pub fn clear(&mut self) {
        self.events.clear();
        self.cursor = 0;
    }
}

/// All live parameters, addressed by target
#[derive(Debug, Default)]
pub struct ParamBank {
    params: Vec<SeqParam>,
    axes: Vec<ScratchAxes>,
}

impl ParamBank {
    pub fn new() -> Self {
        let mut bank = Self {
            params: Vec::new(),
            axes: Vec::new(),
        };
        bank.params.push(SeqParam::new(
            ControlTarget::MainVolume,
            "main volume".to_string(),
            2.5,
            0.0,
            0.1,
            false,
        ));
        bank.params.push(SeqParam::new(
            ControlTarget::MainPitch,
            "main pitch".to_string(),
            3.0,
            -3.0,
            0.1,
            false,
        ));
        bank
    }

    pub fn params(&self) -> &[SeqParam] {
        &self.params
    }

    pub fn find(&self, target: ControlTarget) -> Option<&SeqParam> {
        self.params.iter().find(|p| p.target == target)
    }

    pub fn find_mut(&mut self, target: ControlTarget) -> Option<&mut SeqParam> {
        self.params.iter_mut().find(|p| p.target == target)
    }

    pub fn set_binding(&mut self, target: ControlTarget, binding: Option<ControllerBinding>) {
        if let Some(param) = self.find_mut(target) {
            if param.mappable || binding.is_none() {
                param.binding = binding;
            } else {
                log::warn!("{}: not controller-mappable", param.name);
            }
        }
    }

    /// Register the full parameter set of a new turntable. By default the
    /// scratch surface maps horizontal drag to speed and leaves the
    /// vertical axis on the lowpass cutoff.
    pub fn add_turntable(&mut self, id: TurntableId) {
        use ControlTarget::*;

        let named = |name: &str| format!("{} [{}]", name, id);

        self.params.extend([
            SeqParam::new(Speed(id), named("speed"), 3.0, -3.0, 0.1, true),
            SeqParam::boolean(Spin(id), named("spin"), false),
            SeqParam::new(Volume(id), named("volume"), 2.0, 0.0, 0.05, true),
            SeqParam::new(Pan(id), named("pan"), 1.0, -1.0, 0.05, true),
            SeqParam::new(Pitch(id), named("pitch"), 3.0, -3.0, 0.05, true),
            SeqParam::boolean(Trigger(id), named("trigger"), true),
            SeqParam::boolean(LoopMode(id), named("loop"), false),
            SeqParam::boolean(Mute(id), named("mute"), true),
            SeqParam::boolean(SyncFollower(id), named("sync follower"), false),
            SeqParam::new(SyncCycles(id), named("sync cycles"), 0.0, 0.0, 0.0, false),
            SeqParam::boolean(LowpassEnable(id), named("lowpass: enable"), true),
            SeqParam::new(LowpassGain(id), named("lowpass: gain"), 2.0, 0.0, 0.05, true),
            SeqParam::new(
                LowpassReso(id),
                named("lowpass: resonance"),
                0.99,
                0.0,
                0.05,
                true,
            ),
            SeqParam::new(
                LowpassFreq(id),
                named("lowpass: frequency"),
                0.99,
                0.0,
                0.05,
                true,
            ),
            SeqParam::boolean(EchoEnable(id), named("echo: enable"), true),
            SeqParam::new(EchoLength(id), named("echo: length"), 1.0, 0.0, 0.05, true),
            SeqParam::new(
                EchoFeedback(id),
                named("echo: feedback"),
                1.0,
                0.0,
                0.05,
                true,
            ),
            SeqParam::new(EchoPan(id), named("echo: pan"), 1.0, -1.0, 0.05, true),
            SeqParam::new(EchoVolume(id), named("echo: volume"), 0.0, 3.0, 0.05, true),
        ]);

        self.axes.push(ScratchAxes {
            table: id,
            x: Speed(id),
            y: LowpassFreq(id),
        });
    }

    pub fn remove_turntable(&mut self, id: TurntableId) {
        self.params.retain(|p| p.target.table() != Some(id));
        self.axes.retain(|a| a.table != id);
    }

    /// Register parameters for a newly added external effect: an enable
    /// switch plus one parameter per control port, bounds taken from the
    /// port metadata
    pub fn add_effect_params(
        &mut self,
        table: TurntableId,
        effect: EffectId,
        label: &str,
        ports: &[PortInfo],
        sample_rate: u32,
    ) {
        self.params.push(SeqParam::boolean(
            ControlTarget::FxEnable { table, effect },
            format!("{}: enable [{}]", label, table),
            true,
        ));

        for (port, info) in ports.iter().enumerate() {
            let target = ControlTarget::FxControl {
                table,
                effect,
                port,
            };
            let name = format!("{}: {} [{}]", label, info.name, table);

            let (mut lower, mut upper) = (info.lower, info.upper);
            if info.sample_rate_scaled {
                lower *= sample_rate as f32;
                upper *= sample_rate as f32;
            }

            let param = match info.hint {
                PortHint::Toggle => SeqParam::boolean(target, name, true),
                PortHint::Integer => SeqParam::new(target, name, upper, lower, 0.0, false),
                PortHint::Float => {
                    let scale = (upper - lower) / 100.0;
                    SeqParam::new(target, name, upper, lower, scale, true)
                }
            };
            self.params.push(param);
        }
    }

    pub fn remove_effect_params(&mut self, table: TurntableId, effect: EffectId) {
        self.params
            .retain(|p| !(p.target.table() == Some(table) && p.target.effect() == Some(effect)));
    }

    /// Route the scratch surface's drag axes for one turntable
    pub fn set_scratch_axes(&mut self, table: TurntableId, x: ControlTarget, y: ControlTarget) {
        if let Some(axes) = self.axes.iter_mut().find(|a| a.table == table) {
            axes.x = x;
            axes.y = y;
        }
    }

    // ------------------------------------------------------------------
    // input paths

    /// Absolute value from the GUI or an API caller
    pub fn set_value(
        &mut self,
        mixer: &mut Mixer,
        seq: &mut Sequencer,
        target: ControlTarget,
        value: f32,
    ) -> Result<(), ControlError> {
        let value = match self.find_mut(target) {
            Some(param) => {
                param.touch(seq);
                param.clamp(value)
            }
            None => value,
        };
        mixer.apply(target, value)?;
        seq.record(target, value);
        Ok(())
    }

    /// Relative adjustment from a drag or jog input, stepped by the
    /// parameter's scale.
    ///
    /// Speed is the exception: relative speed input is the scratch drag
    /// itself, so it is only honored while the table is in scratch mode,
    /// applied unscaled, and always re-arms the release sense window.
    pub fn relative_input(
        &mut self,
        mixer: &mut Mixer,
        seq: &mut Sequencer,
        target: ControlTarget,
        adjustment: f32,
    ) -> Result<(), ControlError> {
        if let ControlTarget::Speed(id) = target {
            let scratching = mixer.table(id).map_or(false, |t| t.do_scratch);
            if scratching {
                if let Some(param) = self.find_mut(target) {
                    param.touch(seq);
                }
                mixer.apply(target, adjustment)?;
                seq.record(target, adjustment);
            }
            mixer.touch_scratch(id);
            return Ok(());
        }

        let Some(param) = self.find_mut(target) else {
            return Ok(());
        };
        param.touch(seq);
        let value = param.clamp(mixer.param_value(target) + adjustment * param.scale);

        mixer.apply(target, value)?;
        seq.record(target, value);
        Ok(())
    }

    /// Scratch-surface motion: X and Y deltas go to the table's routed
    /// axis targets
    pub fn surface_motion(
        &mut self,
        mixer: &mut Mixer,
        seq: &mut Sequencer,
        table: TurntableId,
        dx: f32,
        dy: f32,
    ) -> Result<(), ControlError> {
        let Some(axes) = self.axes.iter().find(|a| a.table == table) else {
            return Ok(());
        };
        let (x, y) = (axes.x, axes.y);

        if dx != 0.0 {
            self.relative_input(mixer, seq, x, dx)?;
        }
        if dy != 0.0 {
            self.relative_input(mixer, seq, y, dy)?;
        }
        Ok(())
    }

    /// Dispatch a hardware controller event to whichever parameter is
    /// bound to it
    pub fn controller_input(
        &mut self,
        mixer: &mut Mixer,
        seq: &mut Sequencer,
        event: ControllerEvent,
    ) -> Result<(), ControlError> {
        let Some(param) = self.params.iter_mut().find(|p| {
            p.binding.as_ref().map_or(false, |b| {
                b.kind == event.kind && b.channel == event.channel && b.number == event.number
            })
        }) else {
            return Ok(());
        };

        let binding = match param.binding.as_ref() {
            Some(b) => b,
            None => return Ok(()),
        };

        let value = if param.boolean {
            let mut on = event.value >= 0.5;
            if binding.reverse {
                on = !on;
            }
            if on {
                1.0
            } else {
                0.0
            }
        } else {
            let lower = binding.lower.unwrap_or(param.min.min(param.max));
            let upper = binding.upper.unwrap_or(param.min.max(param.max));
            let mut value = event.value * (upper - lower) + lower;
            if binding.reverse {
                value = (upper - value) + lower;
            }
            param.clamp(value)
        };

        param.touch(seq);
        let target = param.target;
        mixer.apply(target, value)?;
        seq.record(target, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::source::AudioSource;

    fn setup() -> (Mixer, Sequencer, ParamBank, TurntableId) {
        let mut mixer = Mixer::new(&EngineConfig {
            sample_rate: 4000,
            ..EngineConfig::default()
        });
        let mut bank = ParamBank::new();
        let id = mixer.add_turntable("a");
        bank.add_turntable(id);
        let source = AudioSource::from_samples(vec![500; 1000], 4000).unwrap();
        mixer.load_source(id, source).unwrap();
        (mixer, Sequencer::new(), bank, id)
    }

    #[test]
    fn test_turntable_registers_full_parameter_set() {
        let (_, _, bank, id) = setup();
        // 2 global + 19 per-table parameters
        assert_eq!(bank.params().len(), 21);
        assert!(bank.find(ControlTarget::Volume(id)).is_some());
        assert!(bank.find(ControlTarget::EchoVolume(id)).is_some());

        let speed = bank.find(ControlTarget::Speed(id)).unwrap();
        assert_eq!(speed.max, 3.0);
        assert_eq!(speed.min, -3.0);
        assert!(speed.mappable);
    }

    #[test]
    fn test_relative_input_scales_and_clamps() {
        let (mut mixer, mut seq, mut bank, id) = setup();
        let target = ControlTarget::Volume(id);

        // volume starts at 1.0; scale is 0.05
        bank.relative_input(&mut mixer, &mut seq, target, 2.0).unwrap();
        assert!((mixer.param_value(target) - 1.1).abs() < 1e-6);

        bank.relative_input(&mut mixer, &mut seq, target, 1000.0).unwrap();
        assert_eq!(mixer.param_value(target), 2.0);
    }

    #[test]
    fn test_relative_speed_needs_scratch_mode() {
        let (mut mixer, mut seq, mut bank, id) = setup();
        mixer.trigger(id).unwrap();
        let target = ControlTarget::Speed(id);

        bank.relative_input(&mut mixer, &mut seq, target, 2.5).unwrap();
        assert_eq!(mixer.param_value(target), 1.0);

        mixer.set_scratch(id, true).unwrap();
        bank.relative_input(&mut mixer, &mut seq, target, 2.5).unwrap();
        assert_eq!(mixer.param_value(target), 2.5);
    }

    #[test]
    fn test_controller_event_maps_range_and_reverse() {
        let (mut mixer, mut seq, mut bank, id) = setup();
        let target = ControlTarget::Volume(id);
        bank.set_binding(
            target,
            Some(ControllerBinding {
                kind: ControllerKind::ControlChange,
                channel: 0,
                number: 7,
                reverse: false,
                lower: None,
                upper: None,
            }),
        );

        let event = ControllerEvent {
            kind: ControllerKind::ControlChange,
            channel: 0,
            number: 7,
            value: 0.5,
        };
        bank.controller_input(&mut mixer, &mut seq, event).unwrap();
        // half of [0, 2]
        assert!((mixer.param_value(target) - 1.0).abs() < 1e-6);

        if let Some(param) = bank.find_mut(target) {
            if let Some(binding) = param.binding.as_mut() {
                binding.reverse = true;
            }
        }
        let event = ControllerEvent {
            value: 0.25,
            ..event
        };
        bank.controller_input(&mut mixer, &mut seq, event).unwrap();
        assert!((mixer.param_value(target) - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_unmappable_param_refuses_binding() {
        let (_, _, mut bank, id) = setup();
        let target = ControlTarget::Spin(id);
        bank.set_binding(
            target,
            Some(ControllerBinding {
                kind: ControllerKind::Note,
                channel: 0,
                number: 60,
                reverse: false,
                lower: None,
                upper: None,
            }),
        );
        assert!(bank.find(target).unwrap().binding.is_none());
    }

    #[test]
    fn test_effect_params_follow_port_metadata() {
        let (mut mixer, _, mut bank, id) = setup();
        let plugin = crate::fx::test_support::GainPlugin::new();
        use crate::fx::ExternalPlugin;
        let ports = plugin.control_ports();
        let effect = mixer
            .table_mut(id)
            .unwrap()
            .add_effect(Box::new(plugin));

        bank.add_effect_params(id, effect, "Test Gain", &ports, 4000);

        let enable = bank
            .find(ControlTarget::FxEnable { table: id, effect })
            .unwrap();
        assert!(enable.boolean);

        let amount = bank
            .find(ControlTarget::FxControl {
                table: id,
                effect,
                port: 0,
            })
            .unwrap();
        assert_eq!(amount.max, 2.0);
        assert_eq!(amount.min, 0.0);
        // float ports get a percent-of-range drag scale
        assert!((amount.scale - 0.02).abs() < 1e-6);

        bank.remove_effect_params(id, effect);
        assert!(bank
            .find(ControlTarget::FxControl {
                table: id,
                effect,
                port: 0
            })
            .is_none());
    }

    #[test]
    fn test_sequencer_replays_recorded_events() {
        let (mut mixer, mut seq, mut bank, id) = setup();
        let target = ControlTarget::Volume(id);

        seq.start_recording();
        seq.step(&mut mixer); // tick 0 -> 1
        seq.step(&mut mixer); // tick 1 -> 2
        bank.set_value(&mut mixer, &mut seq, target, 0.25).unwrap();
        seq.stop_recording();

        mixer.apply(target, 1.0).unwrap();
        seq.start_playback();
        seq.step(&mut mixer); // delivers ticks <= 0
        seq.step(&mut mixer);
        seq.step(&mut mixer); // tick 2 event fires here
        assert!((mixer.param_value(target) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_same_tick_record_overwrites() {
        let (mut mixer, mut seq, mut bank, id) = setup();
        let target = ControlTarget::Pan(id);

        seq.start_recording();
        bank.set_value(&mut mixer, &mut seq, target, 0.5).unwrap();
        bank.set_value(&mut mixer, &mut seq, target, -0.5).unwrap();
        seq.stop_recording();

        assert_eq!(seq.events().len(), 1);
        assert_eq!(seq.events()[0].value, -0.5);
    }

    #[test]
    fn test_purge_drops_events_for_removed_table() {
        let (mut mixer, mut seq, mut bank, id) = setup();

        seq.start_recording();
        bank.set_value(&mut mixer, &mut seq, ControlTarget::Volume(id), 0.5)
            .unwrap();
        bank.set_value(&mut mixer, &mut seq, ControlTarget::MainVolume, 2.0)
            .unwrap();
        seq.stop_recording();

        seq.purge(id);
        bank.remove_turntable(id);

        assert_eq!(seq.events().len(), 1);
        assert!(matches!(seq.events()[0].target, ControlTarget::MainVolume));
        assert!(bank.find(ControlTarget::Volume(id)).is_none());
    }

    #[test]
    fn test_surface_motion_routes_axes() {
        let (mut mixer, mut seq, mut bank, id) = setup();
        bank.set_scratch_axes(id, ControlTarget::Speed(id), ControlTarget::Volume(id));
        mixer.trigger(id).unwrap();
        mixer.set_scratch(id, true).unwrap();

        bank.surface_motion(&mut mixer, &mut seq, id, 1.5, -2.0)
            .unwrap();
        assert_eq!(mixer.param_value(ControlTarget::Speed(id)), 1.5);
        // volume moved by dy * scale from its default 1.0
        assert!((mixer.param_value(ControlTarget::Volume(id)) - 0.9).abs() < 1e-6);
    }
}
