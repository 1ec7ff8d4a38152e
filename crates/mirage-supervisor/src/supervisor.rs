//! Controller surface: session population, start/join lifecycle, and the
//! thread-safe verbs.
//!
//! Every verb that can collide with a reentrant interrupt first waits the
//! interrupt out, so controller commands serialize behind active debugging
//! sessions. The one deliberate exception is [`Supervisor::end`]: exit wins
//! over everything, including a worker parked in `Interrupted`.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, warn};

use mirage_core::components::{
    CheatDevice, Debugger, OverrideTable, ScreenshotEncoder, SioDriver,
};
use mirage_core::engine::{EngineCrash, EngineFactory, FrameSource};
use mirage_core::sync::SyncChannel;
use mirage_core::vfs::{OpenMode, VDir, VFile, open_sibling};

use crate::config::BootOptions;
use crate::context::{ContextHandle, SupervisorShared};
use crate::error::{ScreenshotError, StartError};
use crate::rewind::RewindRing;
use crate::screenshot;
use crate::signals;
use crate::state::SupervisorState;
use crate::worker::{WorkerArgs, WorkerHooks};

/// Worker-side lifecycle callback.
pub type WorkerHook = Box<dyn FnMut(&ContextHandle) + Send>;

/// Worker-side crash callback.
pub type CrashHook = Box<dyn FnMut(&ContextHandle, &EngineCrash) + Send>;

/// One supervised emulator session: owns the worker thread, the artifact
/// handles, and the state machine every controller verb goes through.
///
/// Populate the session (`set_*`), then [`Supervisor::start`] it. The
/// supervisor owns every artifact handed to it; handles are released at
/// [`Supervisor::join`] or when the supervisor drops.
pub struct Supervisor {
    shared: Arc<SupervisorShared>,
    options: BootOptions,
    worker: Option<JoinHandle<()>>,
    started: bool,
    factory: Option<Box<dyn EngineFactory>>,
    rom: Option<Box<dyn VFile>>,
    rom_name: Option<String>,
    save: Option<Box<dyn VFile>>,
    bios: Option<Box<dyn VFile>>,
    patch: Option<Box<dyn VFile>>,
    cheats_file: Option<Box<dyn VFile>>,
    movie_dir: Option<Box<dyn VDir>>,
    cheats: Option<Box<dyn CheatDevice>>,
    debugger: Option<Box<dyn Debugger>>,
    sio_drivers: Vec<Box<dyn SioDriver>>,
    override_table: Option<Box<dyn OverrideTable>>,
    start_callback: Option<WorkerHook>,
    clean_callback: Option<WorkerHook>,
    frame_callback: Option<WorkerHook>,
    crash_callback: Option<CrashHook>,
}

impl Supervisor {
    pub fn new(options: BootOptions) -> Self {
        Self {
            shared: Arc::new(SupervisorShared::new(options.video_sync, options.audio_sync)),
            options,
            worker: None,
            started: false,
            factory: None,
            rom: None,
            rom_name: None,
            save: None,
            bios: None,
            patch: None,
            cheats_file: None,
            movie_dir: None,
            cheats: None,
            debugger: None,
            sio_drivers: Vec::new(),
            override_table: None,
            start_callback: None,
            clean_callback: None,
            frame_callback: None,
            crash_callback: None,
        }
    }

    // Session population. Ownership of every handle transfers to the
    // supervisor.

    pub fn set_engine_factory(&mut self, factory: Box<dyn EngineFactory>) {
        self.factory = Some(factory);
    }

    pub fn set_rom(&mut self, rom: Box<dyn VFile>, name: impl Into<String>) {
        self.rom = Some(rom);
        self.rom_name = Some(name.into());
    }

    pub fn set_save(&mut self, save: Box<dyn VFile>) {
        self.save = Some(save);
    }

    pub fn set_bios(&mut self, bios: Box<dyn VFile>) {
        self.bios = Some(bios);
    }

    pub fn set_patch(&mut self, patch: Box<dyn VFile>) {
        self.patch = Some(patch);
    }

    pub fn set_cheats_file(&mut self, cheats_file: Box<dyn VFile>) {
        self.cheats_file = Some(cheats_file);
    }

    /// Directory scanned for a ROM and a sibling patch when no ROM handle
    /// is supplied. Doubles as the state directory unless one is set.
    pub fn set_game_dir(&mut self, dir: Box<dyn VDir>) {
        self.shared.dirs.lock().expect("directories poisoned").game_dir = Some(dir);
    }

    /// Directory that receives save and screenshot files.
    pub fn set_state_dir(&mut self, dir: Box<dyn VDir>) {
        self.shared.dirs.lock().expect("directories poisoned").state_dir = Some(dir);
    }

    pub fn set_movie_dir(&mut self, dir: Box<dyn VDir>) {
        self.movie_dir = Some(dir);
    }

    pub fn set_cheat_device(&mut self, cheats: Box<dyn CheatDevice>) {
        self.cheats = Some(cheats);
    }

    pub fn set_debugger(&mut self, debugger: Box<dyn Debugger>) {
        self.debugger = Some(debugger);
    }

    pub fn add_sio_driver(&mut self, driver: Box<dyn SioDriver>) {
        self.sio_drivers.push(driver);
    }

    pub fn set_override_table(&mut self, table: Box<dyn OverrideTable>) {
        self.override_table = Some(table);
    }

    /// Runs on the worker after bootstrap, before the first slice.
    pub fn on_start(&mut self, hook: WorkerHook) {
        self.start_callback = Some(hook);
    }

    /// Runs on the worker during teardown, before the engine is destroyed.
    pub fn on_clean(&mut self, hook: WorkerHook) {
        self.clean_callback = Some(hook);
    }

    /// Runs on the worker once per completed frame.
    pub fn on_frame(&mut self, hook: WorkerHook) {
        self.frame_callback = Some(hook);
    }

    /// Runs on the worker when the engine reports an unrecoverable crash.
    pub fn on_crash(&mut self, hook: CrashHook) {
        self.crash_callback = Some(hook);
    }

    /// Resolves the ROM, opens the save file, spawns the worker, and blocks
    /// until the session reaches `Running`.
    ///
    /// On error the session is inert at `Shutdown`: no worker exists,
    /// [`Supervisor::join`] is a safe no-op, and the artifact handles are
    /// released when the supervisor drops.
    pub fn start(&mut self) -> Result<(), StartError> {
        if self.started {
            return Err(StartError::AlreadyStarted);
        }
        let Some(factory) = self.factory.take() else {
            self.shared.change_state(SupervisorState::Shutdown, false);
            return Err(StartError::NoEngine);
        };

        self.shared.change_state(SupervisorState::Initialized, false);
        self.shared.sync.reset_for_start();
        self.shared.keys.store(0, Ordering::Relaxed);
        self.shared.set_frame_skip(self.options.frame_skip);
        self.shared.set_fps_target(self.options.effective_fps_target());
        *self.shared.rewind.lock().expect("rewind ring poisoned") =
            RewindRing::new(self.options.rewind_capacity, self.options.rewind_interval);

        if let Some(mut rom) = self.rom.take() {
            if factory.is_rom(rom.as_mut()) {
                self.rom = Some(rom);
            } else {
                warn!("supplied ROM handle not recognized, discarding");
                self.rom_name = None;
            }
        }

        {
            let mut dirs = self.shared.dirs.lock().expect("directories poisoned");
            if let Some(dir) = dirs.game_dir.as_deref_mut() {
                dir.rewind();
                while let Some(entry) = dir.list_next() {
                    let Ok(mut file) = dir.open_file(&entry.name, OpenMode::Read) else {
                        continue;
                    };
                    if self.rom.is_none() && factory.is_rom(file.as_mut()) {
                        debug!(name = %entry.name, "game directory ROM");
                        self.rom = Some(file);
                        self.rom_name = Some(entry.name);
                    } else if self.patch.is_none() && factory.is_patch(file.as_mut()) {
                        debug!(name = %entry.name, "game directory patch");
                        self.patch = Some(file);
                    }
                }
            }
        }

        let Some(rom) = self.rom.take() else {
            self.factory = Some(factory);
            self.shared.change_state(SupervisorState::Shutdown, false);
            return Err(StartError::NoRom);
        };
        let rom_name = self.rom_name.clone().unwrap_or_else(|| "rom".to_string());
        *self.shared.rom_name.lock().expect("rom name poisoned") = Some(rom_name.clone());

        if self.save.is_none() {
            let mut dirs = self.shared.dirs.lock().expect("directories poisoned");
            if let Some(dir) = dirs.state_dir_mut() {
                match open_sibling(dir, Some(&rom_name), "sram", ".sav", OpenMode::ReadWrite) {
                    Ok(save) => self.save = Some(save),
                    Err(error) => warn!(%error, "could not open save file, running without"),
                }
            }
        }

        signals::block_controller_signals();

        let args = WorkerArgs {
            shared: Arc::clone(&self.shared),
            factory,
            options: self.options.clone(),
            rom,
            rom_name,
            save: self.save.take(),
            bios: self.bios.take(),
            patch: self.patch.take(),
            cheats_file: self.cheats_file.take(),
            movie_dir: self.movie_dir.take(),
            cheats: self.cheats.take(),
            debugger: self.debugger.take(),
            sio_drivers: std::mem::take(&mut self.sio_drivers),
            override_table: self.override_table.take(),
            hooks: WorkerHooks {
                start: self.start_callback.take(),
                clean: self.clean_callback.take(),
                frame: self.frame_callback.take(),
                crash: self.crash_callback.take(),
            },
        };

        let mut guard = self.shared.lock_state();
        match thread::Builder::new()
            .name("mirage-worker".to_string())
            .spawn(move || crate::worker::run(args))
        {
            Ok(handle) => self.worker = Some(handle),
            Err(source) => {
                guard.state = SupervisorState::Shutdown;
                return Err(StartError::SpawnWorker { source });
            }
        }
        while guard.state < SupervisorState::Running {
            guard = self
                .shared
                .state_cond
                .wait(guard)
                .expect("state mutex poisoned");
        }
        drop(guard);
        self.started = true;
        Ok(())
    }

    /// Waits for the worker and releases the directory handles. A no-op
    /// when no worker was ever spawned.
    pub fn join(&mut self) {
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            error!("worker thread panicked");
        }
        self.shared.sync.disconnect();
        {
            let mut dirs = self.shared.dirs.lock().expect("directories poisoned");
            dirs.game_dir = None;
            dirs.state_dir = None;
        }
        self.shared.rewind.lock().expect("rewind ring poisoned").clear();
    }

    // Verbs. All of these are also available on the cloneable
    // [`ContextHandle`] for controller threads that do not own the session.

    /// Drives a running worker to `Paused` and suspends drawing. Blocks
    /// until the worker has parked.
    pub fn pause(&self) {
        self.shared.pause(false);
    }

    /// Worker self-pause; returns immediately.
    pub fn pause_from_thread(&self) {
        self.shared.pause(true);
    }

    pub fn unpause(&self) {
        self.shared.unpause();
    }

    pub fn toggle_pause(&self) {
        self.shared.toggle_pause();
    }

    /// Schedules an engine reset; the worker reinitializes and resumes on
    /// its own.
    pub fn reset(&self) {
        self.shared.reset();
    }

    /// Parks the worker for reentrant controller work. Nests: only the
    /// outermost call drives the transition, and the matching
    /// [`Supervisor::continue_run`] unwind restores the pre-interrupt
    /// state. Blocks until the worker has parked.
    pub fn interrupt(&self) {
        self.shared.interrupt();
    }

    /// Unwinds one level of interrupt nesting; at depth zero the worker
    /// resumes whatever it was doing before the outermost interrupt.
    pub fn continue_run(&self) {
        self.shared.continue_run();
    }

    /// Initiates exit. Safe from any thread at any time, including while
    /// the worker is parked in a pause, an interrupt, or a sync handshake:
    /// every condition the worker can wait on is woken and the engine halt
    /// flag is cleared.
    pub fn end(&self) {
        self.shared.end();
    }

    // Queries.

    pub fn state(&self) -> SupervisorState {
        self.shared.state_snapshot()
    }

    pub fn has_started(&self) -> bool {
        self.started && self.shared.state_snapshot() > SupervisorState::Initialized
    }

    pub fn has_exited(&self) -> bool {
        self.shared.state_snapshot().has_exited()
    }

    pub fn has_crashed(&self) -> bool {
        self.shared.state_snapshot() == SupervisorState::Crashed
    }

    pub fn is_active(&self) -> bool {
        self.shared.state_snapshot().is_active()
    }

    pub fn is_paused(&self) -> bool {
        self.shared.is_paused()
    }

    // Session access.

    /// The session's media pacing channel, for presenter and audio threads.
    pub fn sync(&self) -> Arc<SyncChannel> {
        Arc::clone(&self.shared.sync)
    }

    /// The engine's back buffer, when a session is live.
    pub fn frame_source(&self) -> Option<Arc<dyn FrameSource>> {
        self.shared
            .attachment
            .load_full()
            .map(|attachment| Arc::clone(&attachment.frames))
    }

    /// Cloneable handle for consumer threads and worker callbacks.
    pub fn handle(&self) -> ContextHandle {
        ContextHandle::new(Arc::clone(&self.shared))
    }

    pub fn set_keys(&self, keys: u32) {
        self.shared.keys.store(keys, Ordering::Relaxed);
    }

    pub fn keys(&self) -> u32 {
        self.shared.keys.load(Ordering::Relaxed)
    }

    pub fn fps_target(&self) -> f32 {
        self.shared.fps_target()
    }

    pub fn frame_skip(&self) -> i32 {
        self.shared.frame_skip()
    }

    /// Rolls emulation back `states_back` snapshots, newest first. Parks
    /// the worker through the interrupt protocol and hands the snapshot
    /// over for it to restore. Returns false when the ring has no such
    /// snapshot or the session is not active.
    pub fn rewind(&self, states_back: usize) -> bool {
        self.shared.rewind_to(states_back)
    }

    /// Captures the current back buffer into an auto-numbered image file
    /// under the state directory. The worker should be parked (paused or
    /// interrupted) so the buffer is stable.
    pub fn take_screenshot(&self, encoder: &dyn ScreenshotEncoder) -> Result<(), ScreenshotError> {
        screenshot::take(&self.shared, encoder)
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.end();
            self.join();
        }
    }
}
