use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;

use crate::sync::{FRAME_WAIT_TIMEOUT, SyncChannel};

const PARK_CHECK: Duration = Duration::from_millis(80);
const WAKE_BUDGET: Duration = Duration::from_millis(500);

#[test]
fn post_frame_blocks_until_presenter_claims() {
    let sync = Arc::new(SyncChannel::new(true, false));
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);

    let producer = {
        let sync = Arc::clone(&sync);
        thread::spawn(move || {
            sync.post_frame();
            done_tx.send(()).unwrap();
        })
    };

    // Producer exhausted its skip budget on the first frame; it must park.
    assert_eq!(done_rx.recv_timeout(PARK_CHECK), Err(RecvTimeoutError::Timeout));

    let guard = sync.wait_frame_start(0);
    assert!(guard.available());
    drop(guard);

    // The producer is released on the presenter's next cycle.
    let _unclaimed = sync.wait_frame_start(0);
    assert!(done_rx.recv_timeout(WAKE_BUDGET).is_ok());
    producer.join().unwrap();
}

#[test]
fn skip_budget_paces_presenter_to_every_third_frame() {
    let sync = Arc::new(SyncChannel::new(true, false));

    let producer = {
        let sync = Arc::clone(&sync);
        thread::spawn(move || {
            let mut drawing = Vec::new();
            for _ in 0..9 {
                drawing.push(sync.drawing_frame());
                sync.post_frame();
            }
            drawing
        })
    };

    let mut claims = 0;
    let mut cycles = 0;
    while claims < 3 && cycles < 50 {
        let guard = sync.wait_frame_start(2);
        if guard.available() {
            claims += 1;
        }
        cycles += 1;
    }
    assert_eq!(claims, 3, "nine produced frames must yield three claims");

    // Release a producer possibly parked on its last handshake.
    sync.suspend_drawing();
    let drawing = producer.join().unwrap();
    assert_eq!(
        drawing,
        [true, false, false, true, false, false, true, false, false],
        "only every third frame is a drawn frame"
    );
}

#[test]
fn wait_frame_start_times_out_without_producer() {
    let sync = SyncChannel::new(true, false);
    let started = Instant::now();
    let guard = sync.wait_frame_start(0);
    assert!(!guard.available());
    let elapsed = started.elapsed();
    assert!(elapsed >= FRAME_WAIT_TIMEOUT - Duration::from_millis(10));
    assert!(elapsed < Duration::from_secs(2));
}

#[test]
fn suspended_presenter_returns_without_blocking() {
    let sync = SyncChannel::new(true, false);
    sync.suspend_drawing();
    let started = Instant::now();
    let guard = sync.wait_frame_start(0);
    assert!(!guard.available());
    assert!(started.elapsed() < Duration::from_millis(40));
}

#[test]
fn suspend_drawing_frees_parked_producer() {
    let sync = Arc::new(SyncChannel::new(true, false));
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);

    let producer = {
        let sync = Arc::clone(&sync);
        thread::spawn(move || {
            sync.post_frame();
            // Once drawing is suspended the remaining frames free-run.
            sync.post_frame();
            sync.post_frame();
            done_tx.send(()).unwrap();
        })
    };

    assert_eq!(done_rx.recv_timeout(PARK_CHECK), Err(RecvTimeoutError::Timeout));
    sync.suspend_drawing();
    assert!(done_rx.recv_timeout(WAKE_BUDGET).is_ok());
    producer.join().unwrap();
}

#[test]
fn audio_consume_unblocks_producer() {
    let sync = Arc::new(SyncChannel::new(false, true));
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);

    let producer = {
        let sync = Arc::clone(&sync);
        thread::spawn(move || {
            sync.lock_audio().produce(true);
            done_tx.send(()).unwrap();
        })
    };

    assert_eq!(done_rx.recv_timeout(PARK_CHECK), Err(RecvTimeoutError::Timeout));
    sync.lock_audio().consume();
    assert!(done_rx.recv_timeout(WAKE_BUDGET).is_ok());
    producer.join().unwrap();
}

#[test]
fn disconnect_wakes_audio_producer() {
    let sync = Arc::new(SyncChannel::new(false, true));
    let (done_tx, done_rx) = crossbeam_channel::bounded(1);

    let producer = {
        let sync = Arc::clone(&sync);
        thread::spawn(move || {
            sync.lock_audio().produce(true);
            done_tx.send(()).unwrap();
        })
    };

    assert_eq!(done_rx.recv_timeout(PARK_CHECK), Err(RecvTimeoutError::Timeout));
    sync.disconnect();
    assert!(done_rx.recv_timeout(WAKE_BUDGET).is_ok());
    producer.join().unwrap();
}

#[test]
fn produce_without_wait_never_parks() {
    let sync = SyncChannel::new(false, true);
    let started = Instant::now();
    sync.lock_audio().produce(false);
    assert!(started.elapsed() < Duration::from_millis(40));
}

#[test]
fn video_sync_toggle_reports_previous_value() {
    let sync = SyncChannel::new(true, false);
    assert!(sync.set_video_sync(false));
    assert!(!sync.set_video_sync(true));
    assert!(sync.set_video_sync(true));
}
