use tracing::warn;

use crate::error::DynError;
use crate::runtime::context::{RuntimeContext, SleepStatus};

use super::core::Interaction;

/// Result of one paced step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The tick ran.
    Ran,
    /// A pause interrupted the pre-tick wait; no tick ran. The caller parks
    /// at its pause gate and calls `run_once` again after resuming.
    Yielded,
    /// Shutdown interrupted the pre-tick wait; no tick ran.
    Cancelled,
}

/// Object-safe view of an interaction loop, letting the orchestrator own
/// drivers without knowing their observation and action types.
pub trait InteractionDriver: Send {
    fn setup(&mut self, ctx: &RuntimeContext) -> Result<(), DynError>;

    /// Waits for the next scheduled tick, then runs it.
    fn run_once(&mut self, ctx: &RuntimeContext) -> Result<StepOutcome, DynError>;

    fn teardown(&mut self) -> Result<(), DynError>;

    fn on_paused(&mut self);

    fn on_resumed(&mut self);
}

/// Drives an interaction at a fixed target interval over virtual time.
///
/// Each tick sleeps until `next_fire`, runs, then advances `next_fire` by
/// exactly one interval so small overruns do not accumulate drift. When more
/// than one whole interval has been missed, `next_fire` skips forward to the
/// next aligned boundary instead of replaying the backlog.
pub struct FixedIntervalInteraction<O, A> {
    interaction: Interaction<O, A>,
    interval: f64,
    next_fire: Option<f64>,
}

impl<O, A> FixedIntervalInteraction<O, A> {
    pub fn new(interaction: Interaction<O, A>, interval: f64) -> Result<Self, DynError> {
        if interval <= 0.0 || !interval.is_finite() {
            return Err(format!("interaction interval must be positive, got {interval}").into());
        }
        Ok(Self {
            interaction,
            interval,
            next_fire: None,
        })
    }

    pub fn interval(&self) -> f64 {
        self.interval
    }
}

impl<O: 'static, A: 'static> InteractionDriver for FixedIntervalInteraction<O, A> {
    fn setup(&mut self, _ctx: &RuntimeContext) -> Result<(), DynError> {
        // The schedule is anchored at the first paced call, once the
        // lifecycle has reached `Running`.
        self.next_fire = None;
        self.interaction.setup()
    }

    fn run_once(&mut self, ctx: &RuntimeContext) -> Result<StepOutcome, DynError> {
        let now = ctx.clock().virtual_now();
        let next = self.next_fire.get_or_insert(now);
        if now < *next {
            match ctx.virtual_sleep_until(*next) {
                SleepStatus::Elapsed => {}
                SleepStatus::Paused => return Ok(StepOutcome::Yielded),
                SleepStatus::Cancelled => return Ok(StepOutcome::Cancelled),
            }
        } else {
            let behind = now - *next;
            if behind >= self.interval {
                let skipped = (behind / self.interval) as u64;
                warn!(
                    behind_seconds = behind,
                    skipped_intervals = skipped,
                    "interaction overran its interval; skipping to the next boundary"
                );
                *next += skipped as f64 * self.interval;
            } else if behind > 0.0 {
                warn!(
                    behind_seconds = behind,
                    "interaction overran its interval; running immediately"
                );
            }
        }
        self.interaction.step()?;
        *next += self.interval;
        Ok(StepOutcome::Ran)
    }

    fn teardown(&mut self) -> Result<(), DynError> {
        self.interaction.teardown()
    }

    fn on_paused(&mut self) {
        self.interaction.on_paused();
    }

    fn on_resumed(&mut self) {
        self.interaction.on_resumed();
    }
}
