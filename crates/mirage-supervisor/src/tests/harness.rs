//! Scripted engine and factory fakes driving the supervisor in tests.

use std::io::{Read, Seek, SeekFrom};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use mirage_core::components::{
    CartridgeOverride, CheatDevice, Debugger, DebuggerStatus, ReplayMovie, SioDriver,
};
use mirage_core::engine::{
    Engine, EngineCrash, EngineError, EngineFactory, EngineSignals, EngineTuning, FrameSource,
    SliceReport,
};
use mirage_core::sync::SyncChannel;
use mirage_core::vfs::{MemFile, VFile};

use crate::config::BootOptions;
use crate::supervisor::Supervisor;

pub(crate) const ROM_MAGIC: &[u8; 4] = b"MRGE";
pub(crate) const PATCH_MAGIC: &[u8; 4] = b"MPAT";
pub(crate) const TEST_TIMEOUT: Duration = Duration::from_secs(2);

pub(crate) const FRAME_WIDTH: u32 = 4;
pub(crate) const FRAME_HEIGHT: u32 = 2;
const FRAME_STRIDE: usize = FRAME_WIDTH as usize * 4;

pub(crate) fn rom_file() -> Box<dyn VFile> {
    let mut bytes = ROM_MAGIC.to_vec();
    bytes.extend_from_slice(b"scripted cartridge");
    Box::new(MemFile::from_vec(bytes))
}

pub(crate) fn patch_bytes() -> Vec<u8> {
    PATCH_MAGIC.to_vec()
}

/// Polls `predicate` until it holds or [`TEST_TIMEOUT`] elapses.
pub(crate) fn wait_until(predicate: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + TEST_TIMEOUT;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

/// Shared observation of everything the scripted engine was asked to do.
#[derive(Clone, Default)]
pub(crate) struct EngineProbe {
    pub slices: Arc<AtomicUsize>,
    pub frames: Arc<AtomicUsize>,
    pub resets: Arc<AtomicUsize>,
    pub bios_skips: Arc<AtomicUsize>,
    pub patches_applied: Arc<AtomicUsize>,
    pub overrides_applied: Arc<AtomicUsize>,
    pub rom_names: Arc<Mutex<Vec<String>>>,
    pub save_present: Arc<AtomicBool>,
    pub restored: Arc<Mutex<Vec<Vec<u8>>>>,
    pub key_source: Arc<Mutex<Option<Arc<AtomicU32>>>>,
    pub sio_drivers_set: Arc<AtomicBool>,
    pub saw_context_in_hook: Arc<AtomicBool>,
}

/// Per-session behavior knobs.
#[derive(Clone)]
pub(crate) struct EngineScript {
    /// Fail with a crash once this many slices have run.
    pub crash_on_slice: Option<usize>,
    /// Frames reported per slice.
    pub frames_per_slice: u32,
    /// Drive the real pacing channel from inside the slice.
    pub post_frames: bool,
}

impl Default for EngineScript {
    fn default() -> Self {
        Self {
            crash_on_slice: None,
            frames_per_slice: 1,
            post_frames: false,
        }
    }
}

pub(crate) struct ScriptedFrames {
    pixels: Mutex<Vec<u8>>,
}

impl ScriptedFrames {
    fn new() -> Self {
        Self {
            pixels: Mutex::new(vec![0xAB; FRAME_STRIDE * FRAME_HEIGHT as usize]),
        }
    }
}

impl FrameSource for ScriptedFrames {
    fn dimensions(&self) -> (u32, u32) {
        (FRAME_WIDTH, FRAME_HEIGHT)
    }

    fn with_pixels(&self, f: &mut dyn FnMut(&[u8], usize)) {
        let pixels = self.pixels.lock().unwrap();
        f(&pixels, FRAME_STRIDE);
    }
}

pub(crate) struct ScriptedEngine {
    signals: Arc<EngineSignals>,
    frames: Arc<ScriptedFrames>,
    sync: Option<Arc<SyncChannel>>,
    probe: EngineProbe,
    script: EngineScript,
    step: u64,
}

impl ScriptedEngine {
    fn new(probe: EngineProbe, script: EngineScript) -> Self {
        Self {
            signals: EngineSignals::new(),
            frames: Arc::new(ScriptedFrames::new()),
            sync: None,
            probe,
            script,
            step: 0,
        }
    }
}

impl Engine for ScriptedEngine {
    fn signals(&self) -> Arc<EngineSignals> {
        Arc::clone(&self.signals)
    }

    fn frame_source(&self) -> Arc<dyn FrameSource> {
        Arc::clone(&self.frames) as Arc<dyn FrameSource>
    }

    fn attach_sync(&mut self, sync: Arc<SyncChannel>) {
        self.sync = Some(sync);
    }

    fn apply_tuning(&mut self, _tuning: &EngineTuning) {}

    fn load_rom(
        &mut self,
        _rom: Box<dyn VFile>,
        save: Option<Box<dyn VFile>>,
        name: &str,
    ) -> Result<(), EngineError> {
        self.probe.rom_names.lock().unwrap().push(name.to_string());
        self.probe
            .save_present
            .store(save.is_some(), Ordering::SeqCst);
        Ok(())
    }

    fn cartridge_id(&self) -> Option<[u8; 4]> {
        Some(*ROM_MAGIC)
    }

    fn load_bios(&mut self, _bios: Box<dyn VFile>) -> Result<(), EngineError> {
        Ok(())
    }

    fn apply_patch(&mut self, _patch: Box<dyn VFile>) -> Result<(), EngineError> {
        self.probe.patches_applied.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn apply_override(&mut self, _data: &CartridgeOverride) {
        self.probe.overrides_applied.fetch_add(1, Ordering::SeqCst);
    }

    fn attach_replay(&mut self, _movie: Box<dyn ReplayMovie>) {}

    fn attach_cheats(&mut self, _cheats: Box<dyn CheatDevice>) {}

    fn set_debugger_attached(&mut self, _attached: bool) {}

    fn set_sio_drivers(&mut self, _drivers: Vec<Box<dyn SioDriver>>) {
        self.probe.sio_drivers_set.store(true, Ordering::SeqCst);
    }

    fn set_key_source(&mut self, keys: Arc<AtomicU32>) {
        *self.probe.key_source.lock().unwrap() = Some(keys);
    }

    fn reset(&mut self) {
        self.step = 0;
        self.probe.resets.fetch_add(1, Ordering::SeqCst);
    }

    fn skip_bios(&mut self) {
        self.probe.bios_skips.fetch_add(1, Ordering::SeqCst);
    }

    fn run_slice(&mut self) -> Result<SliceReport, EngineCrash> {
        let slice = self.probe.slices.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(crash_at) = self.script.crash_on_slice
            && slice >= crash_at
        {
            return Err(EngineCrash::new("scripted crash"));
        }
        if self.signals.break_requested() {
            return Ok(SliceReport::default());
        }
        thread::sleep(Duration::from_millis(1));
        self.step += 1;
        if self.script.post_frames
            && let Some(sync) = self.sync.as_ref()
        {
            for _ in 0..self.script.frames_per_slice {
                sync.post_frame();
            }
        }
        self.probe
            .frames
            .fetch_add(self.script.frames_per_slice as usize, Ordering::SeqCst);
        Ok(SliceReport {
            frames: self.script.frames_per_slice,
        })
    }

    fn serialize_state(&self) -> Vec<u8> {
        self.step.to_le_bytes().to_vec()
    }

    fn restore_state(&mut self, state: &[u8]) -> Result<(), EngineError> {
        self.probe.restored.lock().unwrap().push(state.to_vec());
        let bytes: [u8; 8] = state.try_into().map_err(|_| EngineError::BadState {
            reason: "snapshot is not eight bytes".to_string(),
        })?;
        self.step = u64::from_le_bytes(bytes);
        Ok(())
    }
}

/// Observation of the scripted debugger's lifecycle.
#[derive(Clone, Default)]
pub(crate) struct DebuggerProbe {
    pub entered: Arc<AtomicUsize>,
    /// Set when `enter_attached` ran before link drivers and the key
    /// source were wired into the engine.
    pub entered_before_wiring: Arc<AtomicBool>,
    pub runs: Arc<AtomicUsize>,
}

/// Debugger fake that owns the stepping loop in place of the inner run
/// loop and shuts the session down after a scripted number of passes.
pub(crate) struct ScriptedDebugger {
    engine_probe: EngineProbe,
    probe: DebuggerProbe,
    shutdown_after: usize,
}

impl ScriptedDebugger {
    pub(crate) fn new(
        engine_probe: EngineProbe,
        probe: DebuggerProbe,
        shutdown_after: usize,
    ) -> Self {
        Self {
            engine_probe,
            probe,
            shutdown_after,
        }
    }
}

impl Debugger for ScriptedDebugger {
    fn enter_attached(&mut self, engine: &mut dyn Engine) {
        self.probe.entered.fetch_add(1, Ordering::SeqCst);
        let wired = self.engine_probe.sio_drivers_set.load(Ordering::SeqCst)
            || self.engine_probe.key_source.lock().unwrap().is_some();
        if !wired && engine.cartridge_id().is_some() {
            self.probe.entered_before_wiring.store(true, Ordering::SeqCst);
        }
    }

    fn run(&mut self, engine: &mut dyn Engine) -> DebuggerStatus {
        let runs = self.probe.runs.fetch_add(1, Ordering::SeqCst) + 1;
        if runs >= self.shutdown_after {
            return DebuggerStatus::Shutdown;
        }
        let _ = engine.run_slice();
        DebuggerStatus::Running
    }
}

pub(crate) struct ScriptedFactory {
    pub probe: EngineProbe,
    pub script: EngineScript,
}

impl EngineFactory for ScriptedFactory {
    fn create(&self) -> Box<dyn Engine> {
        Box::new(ScriptedEngine::new(self.probe.clone(), self.script.clone()))
    }

    fn is_rom(&self, file: &mut dyn VFile) -> bool {
        magic_matches(file, ROM_MAGIC)
    }

    fn is_patch(&self, file: &mut dyn VFile) -> bool {
        magic_matches(file, PATCH_MAGIC)
    }
}

fn magic_matches(file: &mut dyn VFile, magic: &[u8; 4]) -> bool {
    let Ok(pos) = file.stream_position() else {
        return false;
    };
    let mut head = [0u8; 4];
    let matched = file.seek(SeekFrom::Start(0)).is_ok()
        && file.read_exact(&mut head).is_ok()
        && &head == magic;
    let _ = file.seek(SeekFrom::Start(pos));
    matched
}

/// A populated, unstarted session around a scripted engine.
pub(crate) fn scripted_supervisor(
    options: BootOptions,
    script: EngineScript,
) -> (Supervisor, EngineProbe) {
    let probe = EngineProbe::default();
    let mut supervisor = Supervisor::new(options);
    supervisor.set_engine_factory(Box::new(ScriptedFactory {
        probe: probe.clone(),
        script,
    }));
    supervisor.set_rom(rom_file(), "adventure.gba");
    (supervisor, probe)
}

pub(crate) fn started_supervisor(
    options: BootOptions,
    script: EngineScript,
) -> (Supervisor, EngineProbe) {
    let (mut supervisor, probe) = scripted_supervisor(options, script);
    supervisor.start().expect("scripted session must start");
    (supervisor, probe)
}
