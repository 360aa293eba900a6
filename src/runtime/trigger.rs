use serde::{Deserialize, Serialize};

/// Stateful predicate deciding when a periodic action fires.
///
/// Triggers are polled against virtual-time seconds, so a paused runtime
/// accumulates no missed firings. State is serializable and rides along in
/// persistence records, letting cadences survive a restore.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Trigger {
    /// Fires when at least `period` seconds elapsed since the last fire.
    /// `last_fire` is `None` until the trigger is armed at registration.
    TimeInterval { period: f64, last_fire: Option<f64> },
    /// Fires on every `every`-th poll.
    StepCount { every: u64, seen: u64 },
    /// Fires when any child fires. Every child is polled so their state
    /// keeps advancing.
    Any(Vec<Trigger>),
    /// Fires when all children fire on the same poll.
    All(Vec<Trigger>),
}

impl Trigger {
    pub fn every(period: f64) -> Self {
        Trigger::TimeInterval {
            period,
            last_fire: None,
        }
    }

    pub fn steps(every: u64) -> Self {
        Trigger::StepCount { every, seen: 0 }
    }

    pub fn any(children: Vec<Trigger>) -> Self {
        Trigger::Any(children)
    }

    pub fn all(children: Vec<Trigger>) -> Self {
        Trigger::All(children)
    }

    /// Anchors time-interval state to `now`, the registration instant. The
    /// first fire then happens one full period later.
    pub fn arm(&mut self, now: f64) {
        match self {
            Trigger::TimeInterval { last_fire, .. } => *last_fire = Some(now),
            Trigger::StepCount { .. } => {}
            Trigger::Any(children) | Trigger::All(children) => {
                for child in children {
                    child.arm(now);
                }
            }
        }
    }

    /// Evaluates the trigger at virtual time `now`, updating internal state.
    pub fn poll(&mut self, now: f64) -> bool {
        match self {
            Trigger::TimeInterval { period, last_fire } => {
                let anchor = match last_fire {
                    Some(at) => *at,
                    None => {
                        // Unarmed triggers fire immediately and self-arm.
                        *last_fire = Some(now);
                        return true;
                    }
                };
                if now - anchor >= *period {
                    *last_fire = Some(now);
                    true
                } else {
                    false
                }
            }
            Trigger::StepCount { every, seen } => {
                *seen += 1;
                if *seen >= *every {
                    *seen = 0;
                    true
                } else {
                    false
                }
            }
            Trigger::Any(children) => {
                let mut fired = false;
                for child in children {
                    fired |= child.poll(now);
                }
                fired
            }
            Trigger::All(children) => {
                let mut fired = true;
                for child in children {
                    fired &= child.poll(now);
                }
                fired
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_interval_fires_once_per_period() {
        let mut trigger = Trigger::every(1.0);
        trigger.arm(0.0);
        assert!(!trigger.poll(0.5));
        assert!(trigger.poll(1.0));
        assert!(!trigger.poll(1.5));
        assert!(trigger.poll(2.1));
    }

    #[test]
    fn step_count_fires_every_n_polls() {
        let mut trigger = Trigger::steps(3);
        assert!(!trigger.poll(0.0));
        assert!(!trigger.poll(0.0));
        assert!(trigger.poll(0.0));
        assert!(!trigger.poll(0.0));
    }

    #[test]
    fn composites_combine_children() {
        let mut any = Trigger::any(vec![Trigger::steps(2), Trigger::steps(3)]);
        assert!(!any.poll(0.0));
        assert!(any.poll(0.0));

        let mut all = Trigger::all(vec![Trigger::steps(1), Trigger::steps(2)]);
        assert!(!all.poll(0.0));
        assert!(all.poll(0.0));
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut trigger = Trigger::every(5.0);
        trigger.arm(12.5);
        let encoded = serde_json::to_string(&trigger).unwrap();
        let decoded: Trigger = serde_json::from_str(&encoded).unwrap();
        assert_eq!(trigger, decoded);
    }
}
