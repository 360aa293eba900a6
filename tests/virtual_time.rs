use std::thread;
use std::time::Duration;

use tandem::{Clock, LifecycleState, RuntimeContext};

/// A paused second does not count: virtual time advances only while the
/// clock is running, 1:1 with wall time.
#[test]
fn paused_wall_time_is_excluded_from_virtual_time() {
    let clock = Clock::new();
    thread::sleep(Duration::from_millis(150));
    clock.pause();
    let frozen = clock.virtual_now();
    let wall_at_pause = clock.wall();
    thread::sleep(Duration::from_millis(300));
    assert_eq!(clock.virtual_now(), frozen);
    clock.resume();
    thread::sleep(Duration::from_millis(150));

    let virtual_total = clock.virtual_now();
    let wall_total = clock.wall();
    let paused_wall = wall_total - wall_at_pause - (virtual_total - frozen);
    // Roughly 300 ms of wall time never reached the virtual clock.
    assert!(paused_wall > 0.2, "paused span too short: {paused_wall}");
    assert!(virtual_total < wall_total - 0.2);
    // And the running spans agree with wall time within scheduling noise.
    assert!((virtual_total - (wall_total - paused_wall)).abs() < 0.05);
}

#[test]
fn virtual_time_is_monotone_across_transitions() {
    let clock = Clock::new();
    let mut last = clock.virtual_now();
    for _ in 0..5 {
        clock.pause();
        let now = clock.virtual_now();
        assert!(now >= last);
        last = now;
        clock.resume();
        thread::sleep(Duration::from_millis(10));
        let now = clock.virtual_now();
        assert!(now > last);
        last = now;
    }
}

#[test]
fn repeated_pause_and_resume_are_idempotent() {
    let clock = Clock::new();
    clock.pause();
    clock.pause();
    let frozen = clock.virtual_now();
    thread::sleep(Duration::from_millis(20));
    assert_eq!(clock.virtual_now(), frozen);
    clock.resume();
    clock.resume();
    thread::sleep(Duration::from_millis(20));
    assert!(clock.virtual_now() > frozen);
}

/// A pause in the middle of a virtual sleep extends it by the paused wall
/// duration.
#[test]
fn virtual_sleep_is_extended_by_a_pause() {
    let ctx = RuntimeContext::new();
    ctx.lifecycle().set(LifecycleState::Running);

    let sleeper = {
        let ctx = ctx.clone();
        thread::spawn(move || {
            let start = std::time::Instant::now();
            ctx.virtual_sleep(0.2).unwrap();
            start.elapsed()
        })
    };
    thread::sleep(Duration::from_millis(50));
    ctx.clock().pause();
    ctx.lifecycle().set(LifecycleState::Paused);
    thread::sleep(Duration::from_millis(250));
    ctx.clock().resume();
    ctx.lifecycle().set(LifecycleState::Running);

    let elapsed = sleeper.join().unwrap();
    assert!(
        elapsed >= Duration::from_millis(400),
        "sleep returned after {elapsed:?}, expected the paused span added"
    );
}
