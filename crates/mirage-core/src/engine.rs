//! Engine capability surface consumed by the supervisor.
//!
//! The emulator core itself (CPU, video, audio, memory) is opaque here; the
//! supervisor only depends on this small behavioral contract. An engine is
//! created on the worker thread by an [`EngineFactory`], wired to the
//! session's [`SyncChannel`], stepped through [`Engine::run_slice`], and
//! reached from other threads only through its [`EngineSignals`] block and
//! its [`FrameSource`].

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::components::{CartridgeOverride, CheatDevice, ReplayMovie, SioDriver};
use crate::sync::SyncChannel;
use crate::vfs::{VDir, VFile};

/// Recoverable engine-side failure (artifact load, state restore).
#[derive(Debug, Error)]
pub enum EngineError {
    /// An artifact could not be read or parsed.
    #[error("failed to load {what}: {source}")]
    Load {
        /// Which artifact failed.
        what: &'static str,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// A serialized state blob was rejected.
    #[error("rejected state snapshot: {reason}")]
    BadState {
        /// Engine-reported rejection reason.
        reason: String,
    },
    /// Engine-specific failure.
    #[error("{0}")]
    Other(String),
}

/// Unrecoverable engine failure reported out of [`Engine::run_slice`].
#[derive(Debug, Clone, Error)]
#[error("engine crashed: {reason}")]
pub struct EngineCrash {
    /// Engine-reported crash reason.
    pub reason: String,
}

impl EngineCrash {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// What a call to [`Engine::run_slice`] accomplished.
#[derive(Debug, Clone, Copy, Default)]
pub struct SliceReport {
    /// Video frames completed during the slice.
    pub frames: u32,
}

/// Idle-loop handling hint forwarded to the engine at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IdleOptimization {
    /// Execute idle loops as written.
    Ignore,
    /// Elide known idle loops.
    Remove,
    /// Detect idle loops at run time, then elide them.
    #[default]
    Detect,
}

/// Engine log verbosity carried in the boot configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LogFilter {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogFilter {
    pub fn as_level_filter(self) -> LevelFilter {
        match self {
            LogFilter::Off => LevelFilter::OFF,
            LogFilter::Error => LevelFilter::ERROR,
            LogFilter::Warn => LevelFilter::WARN,
            LogFilter::Info => LevelFilter::INFO,
            LogFilter::Debug => LevelFilter::DEBUG,
            LogFilter::Trace => LevelFilter::TRACE,
        }
    }
}

/// Boot-time tuning applied to a freshly created engine.
#[derive(Debug, Clone)]
pub struct EngineTuning {
    /// Audio buffer count; 0 keeps the engine default.
    pub audio_buffers: usize,
    pub idle_optimization: IdleOptimization,
    pub log_filter: LogFilter,
}

/// Cross-thread signal block shared between an engine and the supervisor.
///
/// The step function must observe `break_requested` and return at the next
/// boundary; the supervisor uses it to park the worker promptly. `halted`
/// mirrors the CPU halt flag so an exit request can make a halted CPU
/// runnable again.
#[derive(Debug, Default)]
pub struct EngineSignals {
    break_requested: AtomicBool,
    halted: AtomicBool,
}

impl EngineSignals {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Ask the step function to return at its next boundary.
    pub fn request_break(&self) {
        self.break_requested.store(true, Ordering::Release);
    }

    pub fn break_requested(&self) -> bool {
        self.break_requested.load(Ordering::Acquire)
    }

    /// Clear and return any pending break request.
    pub fn take_break(&self) -> bool {
        self.break_requested.swap(false, Ordering::AcqRel)
    }

    pub fn set_halted(&self, halted: bool) {
        self.halted.store(halted, Ordering::Release);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Acquire)
    }
}

/// Read access to the renderer's back buffer for presenters and the
/// screenshot helper.
///
/// Callers must hold the frame critical section (a live
/// [`crate::sync::FrameGuard`]) while reading, or otherwise know the
/// producer is parked.
pub trait FrameSource: Send + Sync {
    /// Output resolution in pixels.
    fn dimensions(&self) -> (u32, u32);

    /// Invoke `f` with the current pixel data and its stride in bytes per
    /// row.
    fn with_pixels(&self, f: &mut dyn FnMut(&[u8], usize));
}

/// The hosted emulator core. Owned by the worker thread for the whole
/// session; other threads interact only through [`EngineSignals`] and
/// [`FrameSource`].
pub trait Engine: Send {
    /// Signal block shared with the supervisor. Stable for the engine's
    /// lifetime.
    fn signals(&self) -> Arc<EngineSignals>;

    /// Back-buffer access for presenters. Stable for the engine's lifetime.
    fn frame_source(&self) -> Arc<dyn FrameSource>;

    /// Wire the session's pacing channel. The engine calls
    /// [`SyncChannel::post_frame`] once per completed frame and brackets its
    /// audio production with [`SyncChannel::lock_audio`].
    fn attach_sync(&mut self, sync: Arc<SyncChannel>);

    fn apply_tuning(&mut self, tuning: &EngineTuning);

    /// Load the cartridge. `save` is the backing save file, `name` the
    /// source file name for display and save-state association.
    fn load_rom(
        &mut self,
        rom: Box<dyn VFile>,
        save: Option<Box<dyn VFile>>,
        name: &str,
    ) -> Result<(), EngineError>;

    /// Cartridge identifier of the loaded ROM, for override lookup.
    fn cartridge_id(&self) -> Option<[u8; 4]>;

    fn load_bios(&mut self, bios: Box<dyn VFile>) -> Result<(), EngineError>;

    fn apply_patch(&mut self, patch: Box<dyn VFile>) -> Result<(), EngineError>;

    fn apply_override(&mut self, data: &CartridgeOverride);

    /// Attach an opened replay movie; playback starts immediately.
    fn attach_replay(&mut self, movie: Box<dyn ReplayMovie>);

    fn attach_cheats(&mut self, cheats: Box<dyn CheatDevice>);

    fn set_debugger_attached(&mut self, attached: bool);

    fn set_sio_drivers(&mut self, drivers: Vec<Box<dyn SioDriver>>);

    /// Key bitmap polled by the engine each input latch.
    fn set_key_source(&mut self, keys: Arc<AtomicU32>);

    fn reset(&mut self);

    /// Skip the BIOS intro and start execution at the cartridge entry.
    fn skip_bios(&mut self);

    /// Advance emulation. Returns at the next frame or event boundary, and
    /// promptly once [`EngineSignals::request_break`] has been called.
    fn run_slice(&mut self) -> Result<SliceReport, EngineCrash>;

    fn serialize_state(&self) -> Vec<u8>;

    fn restore_state(&mut self, state: &[u8]) -> Result<(), EngineError>;
}

/// Worker-side engine construction plus the artifact probes the bootstrap
/// needs before an engine exists.
pub trait EngineFactory: Send {
    fn create(&self) -> Box<dyn Engine>;

    /// Whether `file` looks like a loadable cartridge.
    fn is_rom(&self, file: &mut dyn VFile) -> bool;

    /// Whether `file` looks like a usable BIOS image.
    fn is_bios(&self, _file: &mut dyn VFile) -> bool {
        false
    }

    /// Whether `file` looks like a patch the engine can apply.
    fn is_patch(&self, _file: &mut dyn VFile) -> bool {
        false
    }

    /// Open a replay movie from a directory of recorded inputs.
    fn open_movie(&self, _dir: Box<dyn VDir>) -> Option<Box<dyn ReplayMovie>> {
        None
    }
}
