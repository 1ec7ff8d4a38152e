//! Paced producer/consumer rendezvous between the engine and its frontends.
//!
//! # Protocol
//!
//! Two independent handshakes share one [`SyncChannel`]:
//! - video: the engine calls [`SyncChannel::post_frame`] once per simulated
//!   frame; a presenter claims frames with [`SyncChannel::wait_frame_start`]
//!   and releases the back buffer by dropping the returned [`FrameGuard`].
//!   The skip budget lets the producer burn through `skip` frames without
//!   waiting before it parks for the consumer.
//! - audio: the consumer brackets its buffer read with [`SyncChannel::lock_audio`]
//!   and [`AudioGuard::consume`]; the engine parks in [`AudioGuard::produce`]
//!   until a buffer has been drained.
//!
//! Every wait loops on a real predicate, so spurious wakeups are harmless.
//! Disconnecting a consumer ([`SyncChannel::suspend_drawing`],
//! [`SyncChannel::set_audio_sync`] with `false`) wakes any parked producer.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Cap on how long a presenter waits for the next frame before giving up the
/// iteration. Keeps a stalled producer from freezing a UI thread.
pub const FRAME_WAIT_TIMEOUT: Duration = Duration::from_millis(50);

const VIDEO_POISONED: &str = "video frame mutex poisoned";
const AUDIO_POISONED: &str = "audio buffer mutex poisoned";

#[derive(Debug)]
struct VideoPacing {
    /// Frames produced but not yet claimed by a presenter.
    pending: u32,
    /// Producer parks for the presenter when it exhausts its skip budget.
    wait: bool,
    /// Presenter attached and drawing enabled.
    on: bool,
    /// Bumped on every real frame-available wake; the presenter's wait
    /// predicate.
    available_gen: u64,
}

#[derive(Debug)]
struct AudioPacing {
    /// Producer parks until the consumer drains a buffer.
    wait: bool,
    /// Count of consumer drains; the producer's wait predicate.
    consumed: u64,
}

/// The shared media rendezvous. One per emulator session.
#[derive(Debug)]
pub struct SyncChannel {
    video: Mutex<VideoPacing>,
    frame_available: Condvar,
    frame_required: Condvar,
    /// Remaining skip budget. Written under the video mutex, read lock-free
    /// by [`SyncChannel::drawing_frame`].
    frame_skip: AtomicI32,
    audio: Mutex<AudioPacing>,
    audio_required: Condvar,
}

impl SyncChannel {
    pub fn new(video_sync: bool, audio_sync: bool) -> Self {
        Self {
            video: Mutex::new(VideoPacing {
                pending: 0,
                wait: video_sync,
                on: true,
                available_gen: 0,
            }),
            frame_available: Condvar::new(),
            frame_required: Condvar::new(),
            frame_skip: AtomicI32::new(0),
            audio: Mutex::new(AudioPacing {
                wait: audio_sync,
                consumed: 0,
            }),
            audio_required: Condvar::new(),
        }
    }

    fn lock_video(&self) -> MutexGuard<'_, VideoPacing> {
        self.video.lock().expect(VIDEO_POISONED)
    }

    fn lock_audio_state(&self) -> MutexGuard<'_, AudioPacing> {
        self.audio.lock().expect(AUDIO_POISONED)
    }

    /// Rearms the video handshake for a fresh session: drawing on, no
    /// pending frames, empty skip budget.
    pub fn reset_for_start(&self) {
        let mut video = self.lock_video();
        video.pending = 0;
        video.on = true;
        self.frame_skip.store(0, Ordering::Relaxed);
    }

    /// Producer side: account one finished frame and, once the skip budget
    /// is exhausted, hand off to the presenter.
    ///
    /// Blocks while the presenter is attached, sync is on, and the frame has
    /// not been claimed. Returns immediately while skip budget remains.
    pub fn post_frame(&self) {
        let mut video = self.lock_video();
        video.pending += 1;
        let skip = self.frame_skip.fetch_sub(1, Ordering::Relaxed) - 1;
        if skip >= 0 {
            return;
        }
        loop {
            video.available_gen = video.available_gen.wrapping_add(1);
            self.frame_available.notify_all();
            if video.wait && video.on {
                video = self.frame_required.wait(video).expect(VIDEO_POISONED);
            }
            if !(video.wait && video.on && video.pending != 0) {
                return;
            }
        }
    }

    /// Consumer side: open the frame critical section and wait for the next
    /// frame with a [`FRAME_WAIT_TIMEOUT`] cap.
    ///
    /// The returned guard holds the frame lock whether or not a frame
    /// arrived; the back buffer may only be read while
    /// [`FrameGuard::available`] is true and the guard is alive. Dropping
    /// the guard closes the critical section.
    ///
    /// `frame_skip` becomes the producer's new skip budget when a frame is
    /// claimed.
    pub fn wait_frame_start(&self, frame_skip: i32) -> FrameGuard<'_> {
        let mut video = self.lock_video();
        self.frame_required.notify_all();
        if !video.on && video.pending == 0 {
            return FrameGuard {
                video,
                available: false,
            };
        }
        if video.on {
            let deadline = Instant::now() + FRAME_WAIT_TIMEOUT;
            let observed = video.available_gen;
            while video.available_gen == observed {
                let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                    return FrameGuard {
                        video,
                        available: false,
                    };
                };
                let (guard, timeout) = self
                    .frame_available
                    .wait_timeout(video, remaining)
                    .expect(VIDEO_POISONED);
                video = guard;
                if timeout.timed_out() && video.available_gen == observed {
                    return FrameGuard {
                        video,
                        available: false,
                    };
                }
            }
        }
        video.pending = 0;
        self.frame_skip.store(frame_skip, Ordering::Relaxed);
        FrameGuard {
            video,
            available: true,
        }
    }

    /// Advisory: whether the frame currently being produced will be
    /// presented rather than skipped. Read without the frame lock.
    pub fn drawing_frame(&self) -> bool {
        self.frame_skip.load(Ordering::Relaxed) <= 0
    }

    /// Detach the presenter. Parked producers wake and free-run.
    pub fn suspend_drawing(&self) {
        self.change_drawing(false);
    }

    /// Reattach the presenter.
    pub fn resume_drawing(&self) {
        self.change_drawing(true);
    }

    fn change_drawing(&self, on: bool) {
        let mut video = self.lock_video();
        if video.on != on {
            video.on = on;
            video.available_gen = video.available_gen.wrapping_add(1);
            self.frame_available.notify_all();
            self.frame_required.notify_all();
        }
    }

    /// Toggle producer-blocking video sync. Returns the previous value.
    /// Does not wake; callers that need a parked producer to move must
    /// follow up with [`SyncChannel::wake_producers`].
    pub fn set_video_sync(&self, on: bool) -> bool {
        let mut video = self.lock_video();
        std::mem::replace(&mut video.wait, on)
    }

    /// Wakes producers parked in [`SyncChannel::post_frame`] or
    /// [`AudioGuard::produce`] so they can re-check their predicates.
    pub fn wake_producers(&self) {
        {
            let _video = self.lock_video();
            self.frame_required.notify_all();
        }
        let _audio = self.lock_audio_state();
        self.audio_required.notify_all();
    }

    /// Consumer side: take the audio buffer lock.
    pub fn lock_audio(&self) -> AudioGuard<'_> {
        AudioGuard {
            sync: self,
            audio: self.lock_audio_state(),
        }
    }

    /// Toggle producer-blocking audio sync and wake a parked producer.
    pub fn set_audio_sync(&self, on: bool) {
        let mut audio = self.lock_audio_state();
        audio.wait = on;
        self.audio_required.notify_all();
    }

    /// Tear down both handshakes: no drawing, no producer blocking, every
    /// parked thread woken. Safe to call at any time from any thread.
    pub fn disconnect(&self) {
        {
            let mut video = self.lock_video();
            video.wait = false;
            video.on = false;
            video.available_gen = video.available_gen.wrapping_add(1);
            self.frame_available.notify_all();
            self.frame_required.notify_all();
        }
        let mut audio = self.lock_audio_state();
        audio.wait = false;
        self.audio_required.notify_all();
    }
}

/// Scoped frame critical section returned by [`SyncChannel::wait_frame_start`].
///
/// Holds the frame lock for its whole lifetime; dropping it is the matching
/// frame-end on every exit path. Do not issue blocking supervisor verbs
/// while holding the guard; they take the state gate first and then reach
/// for this lock.
#[must_use = "the frame lock is released when the guard drops"]
pub struct FrameGuard<'a> {
    video: MutexGuard<'a, VideoPacing>,
    available: bool,
}

impl FrameGuard<'_> {
    /// True when a frame was claimed and the back buffer may be read.
    pub fn available(&self) -> bool {
        self.available
    }
}

impl std::fmt::Debug for FrameGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameGuard")
            .field("available", &self.available)
            .field("pending", &self.video.pending)
            .finish()
    }
}

/// Scoped audio buffer lock returned by [`SyncChannel::lock_audio`].
#[must_use = "the audio lock is released when the guard drops"]
pub struct AudioGuard<'a> {
    sync: &'a SyncChannel,
    audio: MutexGuard<'a, AudioPacing>,
}

impl<'a> AudioGuard<'a> {
    /// Producer side: park until the consumer drains a buffer, then release
    /// the lock. With `wait` false (or audio sync off) this only releases.
    pub fn produce(self, wait: bool) {
        let AudioGuard { sync, mut audio } = self;
        if wait {
            let observed = audio.consumed;
            while audio.wait && audio.consumed == observed {
                audio = sync.audio_required.wait(audio).expect(AUDIO_POISONED);
            }
        }
    }

    /// Consumer side: record one drained buffer, wake the producer, release
    /// the lock.
    pub fn consume(self) {
        let AudioGuard { sync, mut audio } = self;
        audio.consumed = audio.consumed.wrapping_add(1);
        sync.audio_required.notify_all();
    }
}

#[cfg(test)]
#[path = "tests/sync_pacing.rs"]
mod tests;
