//! Engine runtime: the shared session and the render thread
//!
//! All mutable engine state (mixer, sequencer, parameter bank) lives in a
//! single [`Session`] behind one mutex; the render thread takes the lock
//! once per block, so control changes land on block boundaries and never
//! race the audio path.
//!
//! The render thread is spawned once and parked; `run` hands it an opened
//! device, which then owns the thread until `stop` raises the stop flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::audio::{AudioDevice, AudioError, AudioResult};
use crate::config::EngineConfig;
use crate::fx::{EffectId, ExternalPlugin, StereoExternalPlugin};
use crate::param::{ControlTarget, ControllerEvent, ParamBank, Sequencer};
use crate::source::AudioSource;
use crate::types::TurntableId;

use super::mixer::{ControlError, Mixer};

/// The complete mutable engine state
#[derive(Debug)]
pub struct Session {
    pub mixer: Mixer,
    pub sequencer: Sequencer,
    pub params: ParamBank,
}

impl Session {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            mixer: Mixer::new(config),
            sequencer: Sequencer::new(),
            params: ParamBank::new(),
        }
    }

    pub fn into_shared(self) -> SharedSession {
        Arc::new(Mutex::new(self))
    }

    pub fn add_turntable(&mut self, name: impl Into<String>) -> TurntableId {
        let id = self.mixer.add_turntable(name);
        self.params.add_turntable(id);
        id
    }

    pub fn remove_turntable(&mut self, id: TurntableId) -> Result<(), ControlError> {
        self.mixer.remove_turntable(id)?;
        self.params.remove_turntable(id);
        self.sequencer.purge(id);
        Ok(())
    }

    pub fn load_source(&mut self, id: TurntableId, source: AudioSource) -> Result<(), ControlError> {
        self.mixer.load_source(id, source)
    }

    /// Add a mono external effect and register its parameters
    pub fn add_effect(
        &mut self,
        table: TurntableId,
        plugin: Box<dyn ExternalPlugin>,
    ) -> Result<EffectId, ControlError> {
        let label = plugin.label().to_string();
        let ports = plugin.control_ports();
        let sample_rate = self.mixer.sample_rate();

        let t = self
            .mixer
            .table_mut(table)
            .ok_or(ControlError::UnknownTable(table))?;
        let effect = t.add_effect(plugin);

        self.params
            .add_effect_params(table, effect, &label, &ports, sample_rate);
        Ok(effect)
    }

    /// Add a stereo external effect and register its parameters
    pub fn add_stereo_effect(
        &mut self,
        table: TurntableId,
        plugin: Box<dyn StereoExternalPlugin>,
    ) -> Result<EffectId, ControlError> {
        let label = plugin.label().to_string();
        let ports = plugin.control_ports();
        let sample_rate = self.mixer.sample_rate();

        let t = self
            .mixer
            .table_mut(table)
            .ok_or(ControlError::UnknownTable(table))?;
        let effect = t.add_stereo_effect(plugin);

        self.params
            .add_effect_params(table, effect, &label, &ports, sample_rate);
        Ok(effect)
    }

    pub fn remove_effect(
        &mut self,
        table: TurntableId,
        effect: EffectId,
    ) -> Result<(), ControlError> {
        let t = self
            .mixer
            .table_mut(table)
            .ok_or(ControlError::UnknownTable(table))?;
        if !t.remove_effect(effect) {
            return Err(ControlError::UnknownEffect { table, effect });
        }
        self.params.remove_effect_params(table, effect);
        Ok(())
    }

    pub fn set_value(&mut self, target: ControlTarget, value: f32) -> Result<(), ControlError> {
        let Self {
            mixer,
            sequencer,
            params,
        } = self;
        params.set_value(mixer, sequencer, target, value)
    }

    pub fn relative_input(
        &mut self,
        target: ControlTarget,
        adjustment: f32,
    ) -> Result<(), ControlError> {
        let Self {
            mixer,
            sequencer,
            params,
        } = self;
        params.relative_input(mixer, sequencer, target, adjustment)
    }

    pub fn surface_motion(
        &mut self,
        table: TurntableId,
        dx: f32,
        dy: f32,
    ) -> Result<(), ControlError> {
        let Self {
            mixer,
            sequencer,
            params,
        } = self;
        params.surface_motion(mixer, sequencer, table, dx, dy)
    }

    pub fn controller_input(&mut self, event: ControllerEvent) -> Result<(), ControlError> {
        let Self {
            mixer,
            sequencer,
            params,
        } = self;
        params.controller_input(mixer, sequencer, event)
    }

    /// One render cycle: deliver due sequencer events, then mix one block
    pub fn render_cycle(&mut self) -> &[i16] {
        let Self {
            mixer, sequencer, ..
        } = self;
        sequencer.step(mixer);
        mixer.render_all()
    }
}

pub type SharedSession = Arc<Mutex<Session>>;

/// Lock helper that survives a poisoned mutex: a panic elsewhere must not
/// silence the audio thread
fn lock_session(session: &SharedSession) -> MutexGuard<'_, Session> {
    match session.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Handle the output device pulls rendered audio through
#[derive(Clone)]
pub struct RenderFeed {
    session: SharedSession,
    stop: Arc<AtomicBool>,
}

impl RenderFeed {
    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn next_block(&self, into: &mut Vec<i16>) {
        let mut session = lock_session(&self.session);
        into.clear();
        into.extend_from_slice(session.render_cycle());
    }
}

/// Re-chunks the engine's fixed-size blocks into whatever slice sizes the
/// device callback asks for
pub struct BlockCursor {
    feed: RenderFeed,
    pending: Vec<i16>,
    pos: usize,
}

impl BlockCursor {
    pub fn new(feed: RenderFeed) -> Self {
        Self {
            feed,
            pending: Vec::new(),
            pos: 0,
        }
    }

    fn next_sample(&mut self) -> i16 {
        if self.feed.should_stop() {
            return 0;
        }
        if self.pos >= self.pending.len() {
            self.feed.next_block(&mut self.pending);
            self.pos = 0;
            if self.pending.is_empty() {
                return 0;
            }
        }
        let sample = self.pending[self.pos];
        self.pos += 1;
        sample
    }

    pub fn fill(&mut self, out: &mut [i16]) {
        for slot in out.iter_mut() {
            *slot = self.next_sample();
        }
    }

    pub fn fill_f32(&mut self, out: &mut [f32]) {
        for slot in out.iter_mut() {
            *slot = self.next_sample() as f32 / 32768.0;
        }
    }
}

/// The engine: owns the render thread and the device hand-over
pub struct Engine {
    session: SharedSession,
    device: Arc<Mutex<Option<Box<dyn AudioDevice>>>>,
    start: Arc<(Mutex<bool>, Condvar)>,
    stop_flag: Arc<AtomicBool>,
    loop_active: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Engine {
    pub fn new(session: SharedSession) -> Self {
        let device: Arc<Mutex<Option<Box<dyn AudioDevice>>>> = Arc::new(Mutex::new(None));
        let start = Arc::new((Mutex::new(false), Condvar::new()));
        let stop_flag = Arc::new(AtomicBool::new(true));
        let loop_active = Arc::new(AtomicBool::new(false));
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread = {
            let session = Arc::clone(&session);
            let device = Arc::clone(&device);
            let start = Arc::clone(&start);
            let stop_flag = Arc::clone(&stop_flag);
            let loop_active = Arc::clone(&loop_active);
            let shutdown = Arc::clone(&shutdown);

            std::thread::Builder::new()
                .name("render".to_string())
                .spawn(move || loop {
                    {
                        let (lock, cvar) = &*start;
                        let mut armed = match lock.lock() {
                            Ok(guard) => guard,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        while !*armed && !shutdown.load(Ordering::Acquire) {
                            armed = match cvar.wait(armed) {
                                Ok(guard) => guard,
                                Err(poisoned) => poisoned.into_inner(),
                            };
                        }
                        *armed = false;
                    }
                    if shutdown.load(Ordering::Acquire) {
                        break;
                    }

                    let taken = {
                        let mut slot = match device.lock() {
                            Ok(guard) => guard,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        slot.take()
                    };

                    if let Some(mut dev) = taken {
                        loop_active.store(true, Ordering::Release);
                        let feed = RenderFeed {
                            session: Arc::clone(&session),
                            stop: Arc::clone(&stop_flag),
                        };
                        if let Err(err) = dev.run(feed) {
                            log::error!("render thread: device failed: {}", err);
                        }
                        {
                            let mut slot = match device.lock() {
                                Ok(guard) => guard,
                                Err(poisoned) => poisoned.into_inner(),
                            };
                            *slot = Some(dev);
                        }
                        loop_active.store(false, Ordering::Release);
                    }
                })
        };

        let thread = match thread {
            Ok(handle) => Some(handle),
            Err(err) => {
                log::error!("failed to spawn render thread: {}", err);
                None
            }
        };

        Self {
            session,
            device,
            start,
            stop_flag,
            loop_active,
            shutdown,
            thread,
        }
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    pub fn is_running(&self) -> bool {
        self.loop_active.load(Ordering::Acquire)
    }

    /// Open the device, adopt its sample rate, autotrigger armed tables
    /// and unpark the render thread
    pub fn run(&mut self, mut device: Box<dyn AudioDevice>) -> AudioResult<()> {
        if self.is_running() {
            return Err(AudioError::AlreadyRunning);
        }

        device.open()?;
        let rate = device.sample_rate();

        {
            let mut session = lock_session(&self.session);
            session.mixer.set_sample_rate(rate);
            session.mixer.autotrigger_all();
            session.sequencer.forward_to_start();
        }

        self.stop_flag.store(false, Ordering::Release);
        {
            let mut slot = match self.device.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *slot = Some(device);
        }

        let (lock, cvar) = &*self.start;
        let mut armed = match lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *armed = true;
        cvar.notify_one();
        Ok(())
    }

    /// Raise the stop flag, wait for the device to return the thread, and
    /// bring every turntable to rest
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        while self.is_running() {
            std::thread::sleep(Duration::from_millis(1));
        }

        {
            let mut slot = match self.device.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(mut dev) = slot.take() {
                dev.close();
            }
        }

        let mut session = lock_session(&self.session);
        session.mixer.stop_all();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        self.stop_flag.store(true, Ordering::Release);
        {
            let (lock, cvar) = &*self.start;
            let _armed = match lock.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            cvar.notify_one();
        }
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::error!("render thread panicked during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct TestDevice {
        rate: u32,
        open: bool,
        blocks: Arc<AtomicUsize>,
    }

    impl AudioDevice for TestDevice {
        fn open(&mut self) -> AudioResult<()> {
            self.open = true;
            Ok(())
        }

        fn close(&mut self) {
            self.open = false;
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn sample_rate(&self) -> u32 {
            self.rate
        }

        fn run(&mut self, feed: RenderFeed) -> AudioResult<()> {
            let mut cursor = BlockCursor::new(feed.clone());
            let mut out = vec![0i16; 64];
            while !feed.should_stop() {
                cursor.fill(&mut out);
                self.blocks.fetch_add(1, Ordering::Relaxed);
            }
            Ok(())
        }
    }

    fn session_with_loaded_table() -> (SharedSession, TurntableId) {
        let config = EngineConfig {
            sample_rate: 4000,
            ..EngineConfig::default()
        };
        let mut session = Session::new(&config);
        let id = session.add_turntable("a");
        let source = AudioSource::from_samples(vec![1000; 256], 4000).unwrap();
        session.load_source(id, source).unwrap();
        (session.into_shared(), id)
    }

    #[test]
    fn test_engine_runs_and_stops() {
        let (session, id) = session_with_loaded_table();
        let blocks = Arc::new(AtomicUsize::new(0));
        let mut engine = Engine::new(Arc::clone(&session));

        engine
            .run(Box::new(TestDevice {
                rate: 4000,
                open: false,
                blocks: Arc::clone(&blocks),
            }))
            .unwrap();

        // wait for the device to have pulled some audio
        for _ in 0..2000 {
            if blocks.load(Ordering::Relaxed) > 10 {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(blocks.load(Ordering::Relaxed) > 10);
        assert!(engine.is_running());

        // the armed table autotriggered on start
        {
            let s = lock_session(&session);
            assert!(s.mixer.table(id).unwrap().is_playing());
        }

        engine.stop();
        assert!(!engine.is_running());
        let s = lock_session(&session);
        assert!(!s.mixer.table(id).unwrap().is_playing());
    }

    #[test]
    fn test_run_while_running_is_rejected() {
        let (session, _) = session_with_loaded_table();
        let blocks = Arc::new(AtomicUsize::new(0));
        let mut engine = Engine::new(session);

        engine
            .run(Box::new(TestDevice {
                rate: 4000,
                open: false,
                blocks: Arc::clone(&blocks),
            }))
            .unwrap();

        for _ in 0..2000 {
            if engine.is_running() {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        let second = engine.run(Box::new(TestDevice {
            rate: 4000,
            open: false,
            blocks,
        }));
        assert!(matches!(second, Err(AudioError::AlreadyRunning)));
        engine.stop();
    }

    #[test]
    fn test_block_cursor_rechunks_blocks() {
        let (session, _) = session_with_loaded_table();
        {
            let mut s = lock_session(&session);
            s.mixer.autotrigger_all();
        }
        let feed = RenderFeed {
            session,
            stop: Arc::new(AtomicBool::new(false)),
        };
        let mut cursor = BlockCursor::new(feed);

        // engine blocks are 8 samples (4 frames at 4 kHz); pull an odd size
        let mut out = vec![0i16; 13];
        cursor.fill(&mut out);
        assert!(out.iter().any(|&s| s != 0));

        // the tail of the split block comes out on the next pull
        let mut rest = vec![0i16; 3];
        cursor.fill(&mut rest);
        assert!(rest.iter().all(|&s| s != 0));
    }

    #[test]
    fn test_stopped_feed_yields_silence() {
        let (session, _) = session_with_loaded_table();
        let feed = RenderFeed {
            session,
            stop: Arc::new(AtomicBool::new(true)),
        };
        let mut cursor = BlockCursor::new(feed);
        let mut out = vec![7i16; 16];
        cursor.fill(&mut out);
        assert!(out.iter().all(|&s| s == 0));
    }
}
