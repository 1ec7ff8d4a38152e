//! Shared per-session context: the state gate, the pacing channel, the
//! slots both sides of the supervisor publish into, and the verb
//! implementations every controller surface delegates to.

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tracing::{debug, warn};

use mirage_core::components::ScreenshotEncoder;
use mirage_core::engine::{EngineSignals, FrameSource};
use mirage_core::sync::SyncChannel;
use mirage_core::vfs::VDir;

use crate::error::ScreenshotError;
use crate::rewind::RewindRing;
use crate::state::{StateCell, SupervisorState};

const STATE_POISONED: &str = "state mutex poisoned";

/// Engine-side handles published by the worker for the engine's lifetime.
pub(crate) struct EngineAttachment {
    pub signals: Arc<EngineSignals>,
    pub frames: Arc<dyn FrameSource>,
}

/// Directory handles owned by the supervisor and dropped at join.
#[derive(Default)]
pub(crate) struct Directories {
    pub game_dir: Option<Box<dyn VDir>>,
    pub state_dir: Option<Box<dyn VDir>>,
}

impl Directories {
    /// Save and screenshot files land in the state directory, or in the
    /// game directory when no separate state directory was supplied.
    pub fn state_dir_mut(&mut self) -> Option<&mut (dyn VDir + '_)> {
        if self.state_dir.is_some() {
            self.state_dir.as_deref_mut().map(|d| d as &mut dyn VDir)
        } else {
            self.game_dir.as_deref_mut().map(|d| d as &mut dyn VDir)
        }
    }
}

pub(crate) struct SupervisorShared {
    state: Mutex<StateCell>,
    pub state_cond: Condvar,
    pub sync: Arc<SyncChannel>,
    pub attachment: ArcSwapOption<EngineAttachment>,
    /// Key bitmap polled by the engine; writable from any thread.
    pub keys: Arc<AtomicU32>,
    /// Snapshot the worker applies before re-entering its inner loop.
    pub pending_restore: Mutex<Option<Arc<[u8]>>>,
    pub rewind: Mutex<RewindRing>,
    pub dirs: Mutex<Directories>,
    pub rom_name: Mutex<Option<String>>,
    fps_target_bits: AtomicU32,
    frame_skip: AtomicI32,
}

impl SupervisorShared {
    pub fn new(video_sync: bool, audio_sync: bool) -> Self {
        Self {
            state: Mutex::new(StateCell::new()),
            state_cond: Condvar::new(),
            sync: Arc::new(SyncChannel::new(video_sync, audio_sync)),
            attachment: ArcSwapOption::empty(),
            keys: Arc::new(AtomicU32::new(0)),
            pending_restore: Mutex::new(None),
            rewind: Mutex::new(RewindRing::disabled()),
            dirs: Mutex::new(Directories::default()),
            rom_name: Mutex::new(None),
            fps_target_bits: AtomicU32::new(0),
            frame_skip: AtomicI32::new(0),
        }
    }

    pub fn lock_state(&self) -> MutexGuard<'_, StateCell> {
        self.state.lock().expect(STATE_POISONED)
    }

    pub fn state_snapshot(&self) -> SupervisorState {
        self.lock_state().state
    }

    /// Unconditional transition, optionally broadcast to waiters.
    pub fn change_state(&self, new_state: SupervisorState, broadcast: bool) {
        let mut guard = self.lock_state();
        guard.state = new_state;
        if broadcast {
            self.state_cond.notify_all();
        }
    }

    /// Serializes controller verbs behind an active debugging session.
    pub fn wait_on_interrupt<'a>(
        &'a self,
        mut guard: MutexGuard<'a, StateCell>,
    ) -> MutexGuard<'a, StateCell> {
        while guard.state == SupervisorState::Interrupted {
            guard = self.state_cond.wait(guard).expect(STATE_POISONED);
        }
        guard
    }

    /// Waits for the worker to leave `old_state`, re-waking the sync
    /// channels each pass so a producer parked mid-handshake can reach the
    /// state gate. Producer-blocking video sync is parked for the duration.
    pub fn wait_until_not_state<'a>(
        &'a self,
        mut guard: MutexGuard<'a, StateCell>,
        old_state: SupervisorState,
    ) -> MutexGuard<'a, StateCell> {
        let video_sync = self.sync.set_video_sync(false);
        while guard.state == old_state {
            drop(guard);
            self.sync.wake_producers();
            guard = self.lock_state();
            self.state_cond.notify_all();
            let (reacquired, _) = self
                .state_cond
                .wait_timeout(guard, Duration::from_millis(10))
                .expect(STATE_POISONED);
            guard = reacquired;
        }
        self.sync.set_video_sync(video_sync);
        guard
    }

    pub fn change_video_sync(&self, frame_on: bool) {
        if frame_on {
            self.sync.resume_drawing();
        } else {
            self.sync.suspend_drawing();
        }
    }

    // Verb implementations shared by `Supervisor` and `ContextHandle`.

    /// Pause path. `on_thread` callers are the worker itself, which parks
    /// as soon as control returns to its supervisor loop; other callers
    /// block until the worker has left `Pausing`.
    pub fn pause(&self, on_thread: bool) {
        let mut frame_on = true;
        {
            let mut guard = self.lock_state();
            guard = self.wait_on_interrupt(guard);
            if guard.state == SupervisorState::Running {
                guard.state = SupervisorState::Pausing;
                if !on_thread {
                    guard = self.wait_until_not_state(guard, SupervisorState::Pausing);
                }
                frame_on = false;
            }
        }
        self.change_video_sync(frame_on);
    }

    pub fn unpause(&self) {
        {
            let mut guard = self.lock_state();
            guard = self.wait_on_interrupt(guard);
            if guard.state == SupervisorState::Paused || guard.state == SupervisorState::Pausing {
                guard.state = SupervisorState::Running;
                self.state_cond.notify_all();
            }
        }
        self.change_video_sync(true);
    }

    pub fn toggle_pause(&self) {
        let mut frame_on = true;
        {
            let mut guard = self.lock_state();
            guard = self.wait_on_interrupt(guard);
            if guard.state == SupervisorState::Paused || guard.state == SupervisorState::Pausing {
                guard.state = SupervisorState::Running;
                self.state_cond.notify_all();
            } else if guard.state == SupervisorState::Running {
                guard.state = SupervisorState::Pausing;
                guard = self.wait_until_not_state(guard, SupervisorState::Pausing);
                frame_on = false;
            }
        }
        self.change_video_sync(frame_on);
    }

    pub fn reset(&self) {
        debug!("reset requested");
        let mut guard = self.lock_state();
        guard = self.wait_on_interrupt(guard);
        guard.state = SupervisorState::Resetting;
        self.state_cond.notify_all();
    }

    pub fn interrupt(&self) {
        let mut guard = self.lock_state();
        guard.interrupt_depth += 1;
        if guard.interrupt_depth > 1 || !guard.state.is_active() {
            return;
        }
        guard.saved_state = guard.state;
        guard = self.wait_on_interrupt(guard);
        guard.state = SupervisorState::Interrupting;
        if let Some(attachment) = self.attachment.load_full() {
            attachment.signals.request_break();
        }
        self.state_cond.notify_all();
        let _parked = self.wait_until_not_state(guard, SupervisorState::Interrupting);
    }

    pub fn continue_run(&self) {
        let mut guard = self.lock_state();
        if guard.interrupt_depth == 0 {
            warn!("continue without matching interrupt, state left unchanged");
            return;
        }
        guard.interrupt_depth -= 1;
        if guard.interrupt_depth == 0 && guard.state.is_active() {
            guard.state = guard.saved_state;
            self.state_cond.notify_all();
        }
    }

    /// Exit wins over everything: no interrupt serialization, every
    /// condition the worker can wait on is woken, and the engine halt flag
    /// is cleared so a halted CPU becomes runnable.
    pub fn end(&self) {
        debug!("end requested");
        {
            let mut guard = self.lock_state();
            guard.state = SupervisorState::Exiting;
            if let Some(attachment) = self.attachment.load_full() {
                attachment.signals.set_halted(false);
            }
            self.state_cond.notify_all();
        }
        self.sync.disconnect();
    }

    pub fn is_paused(&self) -> bool {
        let mut guard = self.lock_state();
        guard = self.wait_on_interrupt(guard);
        guard.state == SupervisorState::Paused
    }

    /// Rolls emulation back `states_back` snapshots through the interrupt
    /// protocol; the worker applies the restore before it resumes.
    pub fn rewind_to(&self, states_back: usize) -> bool {
        let Some(snapshot) = self
            .rewind
            .lock()
            .expect("rewind ring poisoned")
            .peek_back(states_back)
        else {
            return false;
        };
        if !self.state_snapshot().is_active() {
            return false;
        }
        self.interrupt();
        *self
            .pending_restore
            .lock()
            .expect("restore slot poisoned") = Some(snapshot);
        self.continue_run();
        true
    }

    pub fn set_fps_target(&self, fps: f32) {
        self.fps_target_bits.store(fps.to_bits(), Ordering::Relaxed);
    }

    pub fn fps_target(&self) -> f32 {
        f32::from_bits(self.fps_target_bits.load(Ordering::Relaxed))
    }

    pub fn set_frame_skip(&self, frame_skip: i32) {
        self.frame_skip.store(frame_skip, Ordering::Relaxed);
    }

    pub fn frame_skip(&self) -> i32 {
        self.frame_skip.load(Ordering::Relaxed)
    }
}

/// Cloneable, thread-safe view of a session: the full verb set plus media
/// access. Handed to worker-side callbacks, recoverable through
/// [`crate::registry::current_context`], and the way controller threads
/// other than the session owner drive the supervisor.
#[derive(Clone)]
pub struct ContextHandle {
    shared: Arc<SupervisorShared>,
}

impl ContextHandle {
    pub(crate) fn new(shared: Arc<SupervisorShared>) -> Self {
        Self { shared }
    }

    pub fn state(&self) -> SupervisorState {
        self.shared.state_snapshot()
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    pub fn has_exited(&self) -> bool {
        self.state().has_exited()
    }

    pub fn has_crashed(&self) -> bool {
        self.state() == SupervisorState::Crashed
    }

    pub fn is_paused(&self) -> bool {
        self.shared.is_paused()
    }

    /// Blocks until the worker parks. Worker-side callbacks must use
    /// [`ContextHandle::pause_from_thread`] instead.
    pub fn pause(&self) {
        self.shared.pause(false);
    }

    /// Worker self-pause: requests the pause and returns immediately; the
    /// worker parks at its next supervisor-loop pass.
    pub fn pause_from_thread(&self) {
        self.shared.pause(true);
    }

    pub fn unpause(&self) {
        self.shared.unpause();
    }

    pub fn toggle_pause(&self) {
        self.shared.toggle_pause();
    }

    pub fn reset(&self) {
        self.shared.reset();
    }

    pub fn interrupt(&self) {
        self.shared.interrupt();
    }

    pub fn continue_run(&self) {
        self.shared.continue_run();
    }

    pub fn end(&self) {
        self.shared.end();
    }

    pub fn rewind(&self, states_back: usize) -> bool {
        self.shared.rewind_to(states_back)
    }

    pub fn take_screenshot(&self, encoder: &dyn ScreenshotEncoder) -> Result<(), ScreenshotError> {
        crate::screenshot::take(&self.shared, encoder)
    }

    /// The session's media pacing channel.
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
}
