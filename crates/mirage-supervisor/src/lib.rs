#![deny(clippy::wildcard_imports)]

//! Supervisor core for the mirage emulator.
//!
//! Hosts a CPU-bound engine on a dedicated worker thread and coordinates it
//! with a video presenter, an audio consumer, and any number of controller
//! threads issuing pause, interrupt, reset, and shutdown verbs.
//!
//! # Thread Topology
//!
//! - worker thread: owns the engine, steps it while the session is running,
//!   and parks on the state condition when paused or interrupted,
//! - presenter / audio threads: rendezvous with the engine through the
//!   session's [`mirage_core::SyncChannel`],
//! - controller threads: drive the [`Supervisor`] verbs; every transition is
//!   serialized by the single state mutex.
//!
//! Worker-side callbacks that receive no explicit context argument (log
//! hooks, the screenshot helper) can recover the active session through
//! [`registry::current_context`].

pub mod config;
mod context;
pub mod error;
pub mod registry;
pub mod rewind;
pub mod screenshot;
mod signals;
pub mod state;
pub mod supervisor;
mod worker;

pub use config::{BootOptions, DEFAULT_FPS_TARGET};
pub use context::ContextHandle;
pub use error::{ScreenshotError, StartError};
pub use registry::current_context;
pub use rewind::RewindRing;
pub use state::SupervisorState;
pub use supervisor::{CrashHook, Supervisor, WorkerHook};

#[cfg(test)]
mod tests;
