//! Boot configuration applied to a session at start.

use serde::{Deserialize, Serialize};

use mirage_core::{CartridgeOverride, IdleOptimization, LogFilter};

/// Fallback frame rate when the caller leaves `fps_target` at zero.
pub const DEFAULT_FPS_TARGET: f32 = 60.0;

/// Immutable boot configuration for one supervised session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BootOptions {
    /// Frames the presenter lets the engine skip between claims.
    pub frame_skip: i32,
    /// Target frame rate for presenter throttling; 0 selects
    /// [`DEFAULT_FPS_TARGET`].
    pub fps_target: f32,
    /// Engine audio buffer count; 0 keeps the engine default.
    pub audio_buffers: usize,
    /// Start at the cartridge entry instead of the BIOS intro.
    pub skip_bios: bool,
    pub idle_optimization: IdleOptimization,
    pub log_filter: LogFilter,
    /// Engine blocks for the presenter once its skip budget is spent.
    pub video_sync: bool,
    /// Engine blocks for the audio consumer when its buffers are full.
    pub audio_sync: bool,
    /// Snapshot slots in the rewind ring; 0 disables rewind.
    pub rewind_capacity: usize,
    /// Frames between rewind snapshots.
    pub rewind_interval: u32,
    /// Explicit cartridge override applied after the table lookup.
    pub cartridge_override: Option<CartridgeOverride>,
}

impl Default for BootOptions {
    fn default() -> Self {
        Self {
            frame_skip: 0,
            fps_target: 0.0,
            audio_buffers: 0,
            skip_bios: false,
            idle_optimization: IdleOptimization::default(),
            log_filter: LogFilter::default(),
            video_sync: false,
            audio_sync: true,
            rewind_capacity: 0,
            rewind_interval: 0,
            cartridge_override: None,
        }
    }
}

impl BootOptions {
    /// Effective fps target after defaulting.
    pub fn effective_fps_target(&self) -> f32 {
        if self.fps_target > 0.0 {
            self.fps_target
        } else {
            DEFAULT_FPS_TARGET
        }
    }
}
