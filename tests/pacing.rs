use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tandem::{
    Agent, DynError, Environment, FixedIntervalInteraction, Interaction, InteractionDriver,
    LifecycleState, RuntimeContext, StepOutcome,
};

const INTERVAL: f64 = 0.2;

struct InstantEnv;

impl Environment<u64, u64> for InstantEnv {
    fn observe(&mut self) -> Result<u64, DynError> {
        Ok(0)
    }

    fn affect(&mut self, _action: u64) -> Result<(), DynError> {
        Ok(())
    }
}

/// Records the virtual time of each tick and stalls one chosen tick long
/// enough to overrun more than two intervals.
struct StallingAgent {
    ctx: RuntimeContext,
    ticks: Arc<Mutex<Vec<f64>>>,
    stall_at: usize,
    stall: Duration,
    seen: usize,
}

impl Agent<u64, u64> for StallingAgent {
    fn step(&mut self, _observation: u64) -> Result<u64, DynError> {
        self.ticks.lock().unwrap().push(self.ctx.clock().virtual_now());
        if self.seen == self.stall_at {
            thread::sleep(self.stall);
        }
        self.seen += 1;
        Ok(0)
    }
}

#[test]
fn overrun_skips_to_the_next_aligned_boundary() {
    let ctx = RuntimeContext::new();
    ctx.lifecycle().set(LifecycleState::Running);
    let ticks = Arc::new(Mutex::new(Vec::new()));
    let agent = StallingAgent {
        ctx: ctx.clone(),
        ticks: ticks.clone(),
        stall_at: 1,
        stall: Duration::from_secs_f64(2.5 * INTERVAL),
        seen: 0,
    };
    let interaction = Interaction::new(Box::new(agent), Box::new(InstantEnv));
    let mut driver = FixedIntervalInteraction::new(interaction, INTERVAL).unwrap();
    driver.setup(&ctx).unwrap();

    let horizon = ctx.clock().virtual_now() + 7.0 * INTERVAL;
    while ctx.clock().virtual_now() < horizon {
        assert_eq!(driver.run_once(&ctx).unwrap(), StepOutcome::Ran);
    }
    driver.teardown().unwrap();

    let ticks = ticks.lock().unwrap().clone();
    assert!(ticks.len() >= 4, "expected several ticks, got {ticks:?}");
    let origin = ticks[0];

    // Every tick lands in a distinct interval bucket: the stalled tick is
    // followed by a skip to the next aligned boundary, never by a burst of
    // catch-up ticks inside one interval.
    let mut last_bucket = -1i64;
    for tick in &ticks {
        let bucket = ((tick - origin) / INTERVAL + 0.25).floor() as i64;
        assert!(
            bucket > last_bucket,
            "two ticks within one interval: {ticks:?}"
        );
        last_bucket = bucket;
    }

    // The stall spanned at least two boundaries, so at least one was skipped
    // outright and the total tick count stays below the no-stall schedule.
    let buckets: Vec<i64> = ticks
        .iter()
        .map(|t| ((t - origin) / INTERVAL + 0.25).floor() as i64)
        .collect();
    let skipped = buckets
        .windows(2)
        .map(|w| w[1] - w[0] - 1)
        .sum::<i64>();
    assert!(skipped >= 1, "expected a skipped boundary: {buckets:?}");
}

#[test]
fn pre_tick_wait_yields_on_pause_and_cancels_on_shutdown() {
    let ctx = RuntimeContext::new();
    ctx.lifecycle().set(LifecycleState::Running);
    let ticks = Arc::new(Mutex::new(Vec::new()));
    let agent = StallingAgent {
        ctx: ctx.clone(),
        ticks: ticks.clone(),
        stall_at: usize::MAX,
        stall: Duration::ZERO,
        seen: 0,
    };
    let interaction = Interaction::new(Box::new(agent), Box::new(InstantEnv));
    let mut driver = FixedIntervalInteraction::new(interaction, 10.0).unwrap();
    driver.setup(&ctx).unwrap();

    // First call runs immediately and schedules the next tick far out.
    assert_eq!(driver.run_once(&ctx).unwrap(), StepOutcome::Ran);

    ctx.lifecycle().set(LifecycleState::Paused);
    assert_eq!(driver.run_once(&ctx).unwrap(), StepOutcome::Yielded);

    ctx.lifecycle().set(LifecycleState::ShuttingDown);
    assert_eq!(driver.run_once(&ctx).unwrap(), StepOutcome::Cancelled);
    assert_eq!(ticks.lock().unwrap().len(), 1);
}

#[test]
fn rejects_a_non_positive_interval() {
    let interaction: Interaction<u64, u64> = Interaction::new(
        Box::new(StallingAgent {
            ctx: RuntimeContext::new(),
            ticks: Arc::new(Mutex::new(Vec::new())),
            stall_at: usize::MAX,
            stall: Duration::ZERO,
            seen: 0,
        }),
        Box::new(InstantEnv),
    );
    assert!(FixedIntervalInteraction::new(interaction, 0.0).is_err());
}
