//! Countdown behaviour under a paused clock.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axis::watchdog::Watchdog;

fn counting(timeout_ms: u64) -> (Watchdog, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let hits = Arc::clone(&count);
    let watchdog = Watchdog::new(Duration::from_millis(timeout_ms), move || {
        hits.fetch_add(1, Ordering::SeqCst);
    })
    .expect("watchdog");
    (watchdog, count)
}

#[tokio::test(start_paused = true)]
async fn regular_pets_never_fire() {
    let (watchdog, count) = counting(3000);
    watchdog.start();

    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(2500)).await;
        watchdog.pet();
    }

    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert_eq!(watchdog.pets(), 20);
    watchdog.stop();
}

#[tokio::test(start_paused = true)]
async fn each_gap_fires_exactly_once() {
    let (watchdog, count) = counting(1000);
    watchdog.start();

    tokio::time::sleep(Duration::from_millis(5000)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);

    watchdog.pet();
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1, "pet restarts the window");

    tokio::time::sleep(Duration::from_millis(4000)).await;
    assert_eq!(count.load(Ordering::SeqCst), 2, "second gap fires once more");
    assert_eq!(watchdog.fires(), 2);
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_pending_fire() {
    let (watchdog, count) = counting(1000);
    watchdog.start();
    tokio::time::sleep(Duration::from_millis(900)).await;
    watchdog.stop();
    watchdog.stop();

    tokio::time::sleep(Duration::from_millis(5000)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert!(!watchdog.is_armed());
}

#[tokio::test(start_paused = true)]
async fn restart_after_stop_arms_fresh_window() {
    let (watchdog, count) = counting(1000);
    watchdog.start();
    watchdog.stop();
    watchdog.start();
    watchdog.start();

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1, "only the latest arm is live");
}

#[tokio::test(start_paused = true)]
async fn panicking_callback_does_not_wedge_timer() {
    let count = Arc::new(AtomicUsize::new(0));
    let hits = Arc::clone(&count);
    let watchdog = Watchdog::new(Duration::from_millis(100), move || {
        if hits.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("recovery failed");
        }
    })
    .expect("watchdog");

    watchdog.start();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);

    watchdog.pet();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn clones_share_one_timer() {
    let (watchdog, count) = counting(1000);
    let other = watchdog.clone();
    watchdog.start();

    tokio::time::sleep(Duration::from_millis(800)).await;
    other.pet();
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(count.load(Ordering::SeqCst), 0);
    assert!(other.since_last_pet() >= Duration::from_millis(800));
}
