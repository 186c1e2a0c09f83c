//! Millisecond countdown timers.
//!
//! A single tick source advances a `u32` millisecond counter, every timer only
//! records the tick at which it was started and its duration. Elapsed time is
//! computed with wrapping arithmetic so a counter overflow is harmless.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Monotonic millisecond tick
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u32;
}

pub type SharedClock = Arc<dyn Clock>;

/// Clock backed by `std::time::Instant`, truncated to a wrapping `u32`
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        MonotonicClock { origin: Instant::now() }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u32 {
        self.origin.elapsed().as_millis() as u32
    }
}

/// Clock advanced explicitly, the way a SysTick handler bumps its counter.
#[derive(Default)]
pub struct ManualClock {
    ticks: AtomicU32,
}

impl ManualClock {
    pub fn new(start: u32) -> Self {
        ManualClock {
            ticks: AtomicU32::new(start),
        }
    }

    pub fn advance(&self, ms: u32) {
        self.ticks.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn tick(&self) {
        self.advance(1);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u32 {
        self.ticks.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug)]
struct Deadline {
    started_at: u32,
    duration: u32,
}

#[derive(Clone)]
pub struct Timer {
    clock: SharedClock,
    deadline: Option<Deadline>,
}

impl Timer {
    pub fn new(clock: SharedClock) -> Self {
        Timer { clock, deadline: None }
    }

    /// Start counting down `ms` from now, replacing any previous countdown.
    pub fn start(&mut self, ms: u32) {
        self.deadline = Some(Deadline {
            started_at: self.clock.now_ms(),
            duration: ms,
        });
    }

    pub fn stop(&mut self) {
        self.deadline = None;
    }

    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    fn elapsed(&self, deadline: &Deadline) -> u32 {
        self.clock.now_ms().wrapping_sub(deadline.started_at)
    }

    /// A timer that was never started never expires.
    pub fn expired(&self) -> bool {
        match self.deadline {
            Some(ref d) => self.elapsed(d) > d.duration,
            None => false,
        }
    }

    pub fn remaining_ms(&self) -> u32 {
        match self.deadline {
            Some(ref d) => d.duration.saturating_sub(self.elapsed(d)),
            None => 0,
        }
    }
}

#[test]
fn timer_expires_after_duration() {
    let clock = Arc::new(ManualClock::new(0));
    let mut timer = Timer::new(clock.clone());

    assert!(!timer.expired());
    timer.start(3000);
    assert_eq!(timer.remaining_ms(), 3000);

    clock.advance(3000);
    assert!(!timer.expired());
    assert_eq!(timer.remaining_ms(), 0);

    clock.tick();
    assert!(timer.expired());
}

#[test]
fn timer_survives_tick_wraparound() {
    let clock = Arc::new(ManualClock::new(u32::MAX - 10));
    let mut timer = Timer::new(clock.clone());
    timer.start(100);

    clock.advance(50);
    assert!(clock.now_ms() < 100);
    assert!(!timer.expired());
    assert_eq!(timer.remaining_ms(), 50);

    clock.advance(51);
    assert!(timer.expired());
}

#[test]
fn timer_restart_resets_deadline() {
    let clock = Arc::new(ManualClock::new(42));
    let mut timer = Timer::new(clock.clone());
    timer.start(10);
    clock.advance(11);
    assert!(timer.expired());

    timer.start(10);
    assert!(!timer.expired());

    timer.stop();
    clock.advance(1000);
    assert!(!timer.expired());
}
