//! Collaborator contracts around the engine.
//!
//! These subsystems live outside the supervisor; only the seams are named
//! here so an engine distribution can plug its own implementations.

use std::io;

use serde::{Deserialize, Serialize};

use crate::engine::{Engine, EngineError};
use crate::vfs::VFile;

/// Per-cartridge hardware quirks applied after ROM load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartridgeOverride {
    /// Four-byte cartridge code the override applies to.
    pub id: [u8; 4],
    /// Save memory type, when the header lies about it.
    pub save_type: Option<String>,
    /// Extra hardware bitmask (RTC, rumble, sensors).
    pub hardware: Option<u32>,
    /// Known idle-loop address for idle optimization.
    pub idle_loop: Option<u32>,
}

/// Lookup table of known cartridge overrides.
pub trait OverrideTable: Send {
    fn find(&self, id: &[u8; 4]) -> Option<CartridgeOverride>;
}

/// What the debugger wants the worker to do after a stepping session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebuggerStatus {
    /// Keep the session alive; re-enter the debugger on the next pass.
    Running,
    /// Tear the whole session down.
    Shutdown,
}

/// Interactive debugger driven by the worker in place of the free-running
/// inner loop.
pub trait Debugger: Send {
    /// Called once at bootstrap, after the cheat device is attached and
    /// before link drivers and the key source are wired.
    fn enter_attached(&mut self, engine: &mut dyn Engine);

    /// Run the debug session until it pauses or shuts down.
    fn run(&mut self, engine: &mut dyn Engine) -> DebuggerStatus;
}

/// Cheat engine attached to the engine's component table.
pub trait CheatDevice: Send {
    /// Parse a cheat list from `file` into the device.
    fn parse(&mut self, file: &mut dyn VFile) -> Result<(), EngineError>;
}

/// Input-replay movie feeding recorded key state into the engine.
pub trait ReplayMovie: Send {}

/// Serial I/O driver plugged into the engine's link port.
pub trait SioDriver: Send {}

/// Encodes a captured frame into an image file. The PNG implementation is
/// supplied by the frontend.
pub trait ScreenshotEncoder {
    fn encode(
        &self,
        width: u32,
        height: u32,
        stride: usize,
        pixels: &[u8],
        out: &mut dyn VFile,
    ) -> io::Result<()>;
}
