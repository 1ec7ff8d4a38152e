//! Typed errors for the supervisor control surface.

use std::io;

use thiserror::Error;

/// Bootstrap failure surfaced from [`crate::Supervisor::start`]. The
/// session is left at `Shutdown` and no worker is spawned.
#[derive(Debug, Error)]
pub enum StartError {
    /// No ROM handle was supplied and the game directory scan found none.
    #[error("no ROM to load")]
    NoRom,
    /// No engine factory was installed.
    #[error("no engine factory installed")]
    NoEngine,
    /// The session was already started once.
    #[error("session already started")]
    AlreadyStarted,
    /// Worker thread could not be spawned.
    #[error("failed to spawn worker thread: {source}")]
    SpawnWorker {
        /// I/O error returned by thread spawn.
        #[source]
        source: io::Error,
    },
}

/// Failure while capturing a screenshot.
#[derive(Debug, Error)]
pub enum ScreenshotError {
    /// No engine is attached; there is no back buffer to read.
    #[error("no live engine to capture")]
    NotRunning,
    /// The session has neither a state directory nor a game directory.
    #[error("no directory to write the screenshot into")]
    NoStateDirectory,
    /// File create or encode failure.
    #[error(transparent)]
    Io(#[from] io::Error),
}
