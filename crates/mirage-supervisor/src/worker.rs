//! The worker thread: engine bootstrap, the run loop, and teardown.
//!
//! # Loop Structure
//!
//! The outer loop runs until the state passes `Exiting`. Each pass either
//! delegates stepping to an attached debugger or spins the inner loop,
//! which advances the engine slice by slice while the state stays
//! `Running`. When the inner loop falls out, the worker takes the state
//! gate and services whatever drove it out: acknowledging a pause or
//! interrupt (then parking on the state condition), or absorbing a reset
//! request. Rewind restores requested while the worker was parked are
//! applied before stepping resumes.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use mirage_core::components::{CheatDevice, Debugger, DebuggerStatus, OverrideTable, SioDriver};
use mirage_core::engine::{Engine, EngineError, EngineFactory, EngineTuning};
use mirage_core::vfs::{VDir, VFile};

use crate::config::BootOptions;
use crate::context::{ContextHandle, EngineAttachment, SupervisorShared};
use crate::registry;
use crate::signals;
use crate::state::SupervisorState;
use crate::supervisor::{CrashHook, WorkerHook};

const STATE_POISONED: &str = "state mutex poisoned";

pub(crate) struct WorkerHooks {
    pub start: Option<WorkerHook>,
    pub clean: Option<WorkerHook>,
    pub frame: Option<WorkerHook>,
    pub crash: Option<CrashHook>,
}

pub(crate) struct WorkerArgs {
    pub shared: Arc<SupervisorShared>,
    pub factory: Box<dyn EngineFactory>,
    pub options: BootOptions,
    pub rom: Box<dyn VFile>,
    pub rom_name: String,
    pub save: Option<Box<dyn VFile>>,
    pub bios: Option<Box<dyn VFile>>,
    pub patch: Option<Box<dyn VFile>>,
    pub cheats_file: Option<Box<dyn VFile>>,
    pub movie_dir: Option<Box<dyn VDir>>,
    pub cheats: Option<Box<dyn CheatDevice>>,
    pub debugger: Option<Box<dyn Debugger>>,
    pub sio_drivers: Vec<Box<dyn SioDriver>>,
    pub override_table: Option<Box<dyn OverrideTable>>,
    pub hooks: WorkerHooks,
}

struct Bootstrap {
    factory: Box<dyn EngineFactory>,
    options: BootOptions,
    rom: Box<dyn VFile>,
    rom_name: String,
    save: Option<Box<dyn VFile>>,
    bios: Option<Box<dyn VFile>>,
    patch: Option<Box<dyn VFile>>,
    cheats_file: Option<Box<dyn VFile>>,
    movie_dir: Option<Box<dyn VDir>>,
    cheats: Option<Box<dyn CheatDevice>>,
    sio_drivers: Vec<Box<dyn SioDriver>>,
    override_table: Option<Box<dyn OverrideTable>>,
}

pub(crate) fn run(args: WorkerArgs) {
    let WorkerArgs {
        shared,
        factory,
        options,
        rom,
        rom_name,
        save,
        bios,
        patch,
        cheats_file,
        movie_dir,
        cheats,
        mut debugger,
        sio_drivers,
        override_table,
        mut hooks,
    } = args;

    let _binding = registry::bind(Arc::clone(&shared));
    signals::clear_worker_signal_mask();
    let handle = ContextHandle::new(Arc::clone(&shared));

    let bootstrap = Bootstrap {
        factory,
        options: options.clone(),
        rom,
        rom_name: rom_name.clone(),
        save,
        bios,
        patch,
        cheats_file,
        movie_dir,
        cheats,
        sio_drivers,
        override_table,
    };

    let mut engine = match boot_engine(&shared, bootstrap, &mut debugger) {
        Ok(engine) => engine,
        Err(error) => {
            error!(%error, "engine bootstrap failed");
            shared.attachment.store(None);
            shared.change_state(SupervisorState::Crashed, true);
            shared.sync.disconnect();
            return;
        }
    };

    if let Some(hook) = hooks.start.as_mut() {
        hook(&handle);
    }

    info!(rom = %rom_name, "worker running");
    shared.change_state(SupervisorState::Running, true);

    let break_signals = engine.signals();
    let mut frame_count: u64 = 0;

    while shared.state_snapshot() < SupervisorState::Exiting {
        if let Some(debugger) = debugger.as_mut() {
            if debugger.run(engine.as_mut()) == DebuggerStatus::Shutdown {
                debug!("debugger requested shutdown");
                shared.change_state(SupervisorState::Exiting, false);
            }
        } else {
            loop {
                // Drop any break request left over from a serviced command
                // before reading the state, so a request that raced in
                // after the read still cuts the next slice short.
                break_signals.take_break();
                if shared.state_snapshot() != SupervisorState::Running {
                    break;
                }
                match engine.run_slice() {
                    Ok(report) => {
                        for _ in 0..report.frames {
                            frame_count += 1;
                            if let Some(hook) = hooks.frame.as_mut() {
                                hook(&handle);
                            }
                            maybe_record_rewind(&shared, engine.as_ref(), frame_count);
                        }
                    }
                    Err(crash) => {
                        error!(reason = %crash.reason, "engine crashed");
                        shared.change_state(SupervisorState::Crashed, true);
                        if let Some(hook) = hooks.crash.as_mut() {
                            hook(&handle, &crash);
                        }
                        break;
                    }
                }
            }
        }

        let mut reset_pending = false;
        {
            let mut guard = shared.lock_state();
            while guard.state > SupervisorState::Running && guard.state < SupervisorState::Exiting
            {
                match guard.state {
                    SupervisorState::Pausing => {
                        guard.state = SupervisorState::Paused;
                        shared.state_cond.notify_all();
                    }
                    SupervisorState::Interrupting => {
                        guard.state = SupervisorState::Interrupted;
                        shared.state_cond.notify_all();
                    }
                    SupervisorState::Resetting => {
                        guard.state = SupervisorState::Running;
                        reset_pending = true;
                    }
                    _ => {}
                }
                while guard.state == SupervisorState::Paused
                    || guard.state == SupervisorState::Interrupted
                {
                    guard = shared.state_cond.wait(guard).expect(STATE_POISONED);
                }
            }
        }

        if reset_pending {
            debug!("resetting engine");
            engine.reset();
            if options.skip_bios {
                engine.skip_bios();
            }
        }

        let pending_restore = shared
            .pending_restore
            .lock()
            .expect("restore slot poisoned")
            .take();
        if let Some(snapshot) = pending_restore
            && let Err(error) = engine.restore_state(&snapshot)
        {
            warn!(%error, "rewind restore rejected");
        }
    }

    {
        let mut guard = shared.lock_state();
        if guard.state != SupervisorState::Crashed {
            guard.state = SupervisorState::Shutdown;
        }
    }

    if let Some(hook) = hooks.clean.as_mut() {
        hook(&handle);
    }

    shared.attachment.store(None);
    drop(engine);

    // Unblock any consumer still parked on the sync channel.
    shared.sync.suspend_drawing();
    shared.sync.wake_producers();
    info!("worker exited");
}

/// Creates and wires the engine in artifact order: ROM, overrides, BIOS,
/// patch, replay, reset, cheats, debugger, link drivers, input. Artifact
/// failures other than the ROM load are recovered by continuing without
/// the artifact.
fn boot_engine(
    shared: &Arc<SupervisorShared>,
    bootstrap: Bootstrap,
    debugger: &mut Option<Box<dyn Debugger>>,
) -> Result<Box<dyn Engine>, EngineError> {
    let Bootstrap {
        factory,
        options,
        rom,
        rom_name,
        save,
        bios,
        patch,
        cheats_file,
        movie_dir,
        cheats,
        sio_drivers,
        override_table,
    } = bootstrap;

    let mut engine = factory.create();
    engine.attach_sync(Arc::clone(&shared.sync));
    engine.apply_tuning(&EngineTuning {
        audio_buffers: options.audio_buffers,
        idle_optimization: options.idle_optimization,
        log_filter: options.log_filter,
    });
    shared.attachment.store(Some(Arc::new(EngineAttachment {
        signals: engine.signals(),
        frames: engine.frame_source(),
    })));

    engine.load_rom(rom, save, &rom_name)?;

    if let Some(id) = engine.cartridge_id()
        && let Some(table) = override_table.as_ref()
        && let Some(data) = table.find(&id)
    {
        debug!(id = ?id, "applying cartridge override");
        engine.apply_override(&data);
    }
    if let Some(data) = options.cartridge_override.as_ref() {
        engine.apply_override(data);
    }

    if let Some(mut bios) = bios {
        if factory.is_bios(bios.as_mut()) {
            if let Err(error) = engine.load_bios(bios) {
                warn!(%error, "BIOS rejected, continuing without it");
            }
        } else {
            warn!("BIOS file not recognized, continuing without it");
        }
    }

    if let Some(patch) = patch
        && let Err(error) = engine.apply_patch(patch)
    {
        warn!(%error, "patch failed to apply, continuing unpatched");
    }

    let movie = movie_dir.and_then(|dir| {
        let movie = factory.open_movie(dir);
        if movie.is_none() {
            warn!("replay movie failed to open, continuing live");
        }
        movie
    });

    engine.reset();

    if let Some(movie) = movie {
        engine.attach_replay(movie);
    }

    if options.skip_bios {
        engine.skip_bios();
    }

    match cheats {
        Some(mut device) => {
            if let Some(mut file) = cheats_file
                && let Err(error) = device.parse(file.as_mut())
            {
                warn!(%error, "cheat file parse failed");
            }
            engine.attach_cheats(device);
        }
        None => {
            if cheats_file.is_some() {
                warn!("cheat file supplied without a cheat device");
            }
        }
    }

    engine.set_debugger_attached(debugger.is_some());
    if let Some(debugger) = debugger.as_mut() {
        debugger.enter_attached(engine.as_mut());
    }

    engine.set_sio_drivers(sio_drivers);
    engine.set_key_source(Arc::clone(&shared.keys));

    Ok(engine)
}

fn maybe_record_rewind(shared: &SupervisorShared, engine: &dyn Engine, frame_count: u64) {
    let interval = {
        let ring = shared.rewind.lock().expect("rewind ring poisoned");
        if !ring.is_enabled() {
            return;
        }
        ring.interval()
    };
    if !frame_count.is_multiple_of(u64::from(interval)) {
        return;
    }
    let snapshot = engine.serialize_state();
    shared
        .rewind
        .lock()
        .expect("rewind ring poisoned")
        .push(snapshot);
}
