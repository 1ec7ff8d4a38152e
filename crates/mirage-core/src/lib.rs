#![deny(clippy::wildcard_imports)]

//! Shared contracts for the mirage emulator.
//!
//! This crate holds everything the supervisor and an engine implementation
//! need to agree on: the [`Engine`] capability surface, the media pacing
//! channel ([`SyncChannel`]) that the engine and the frontend consumers
//! rendezvous through, the virtual file system traits, and the collaborator
//! contracts (debugger, cheat device, replay movie, screenshot encoder).

pub mod components;
pub mod engine;
pub mod sync;
pub mod vfs;

pub use components::{
    CartridgeOverride, CheatDevice, Debugger, DebuggerStatus, OverrideTable, ReplayMovie,
    ScreenshotEncoder, SioDriver,
};
pub use engine::{
    Engine, EngineCrash, EngineError, EngineFactory, EngineSignals, EngineTuning, FrameSource,
    IdleOptimization, LogFilter, SliceReport,
};
pub use sync::{AudioGuard, FrameGuard, SyncChannel, FRAME_WAIT_TIMEOUT};
pub use vfs::{OpenMode, VDir, VDirEntry, VFile};
