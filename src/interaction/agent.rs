use crate::error::DynError;

/// Decision-making side of the interaction loop.
///
/// An agent receives observations and produces actions. Inside `step` it
/// typically reads inference views from the model registry and appends
/// experience tuples through data collectors; both handles are injected at
/// construction by user code.
///
/// The lifecycle hooks default to no-ops; implement the ones the agent
/// needs (the runtime calls them on the interaction thread).
pub trait Agent<O, A>: Send {
    /// Processes one observation and decides the next action.
    fn step(&mut self, observation: O) -> Result<A, DynError>;

    /// Called once before the first step.
    fn setup(&mut self) -> Result<(), DynError> {
        Ok(())
    }

    /// Called once after the last step.
    fn teardown(&mut self) -> Result<(), DynError> {
        Ok(())
    }

    /// Called when the runtime reaches a paused quiescent point.
    fn on_paused(&mut self) {}

    /// Called when the runtime resumes.
    fn on_resumed(&mut self) {}
}

/// Environment side of the interaction loop.
///
/// `observe` and `affect` bracket each agent step. Hooks mirror
/// [`Agent`]; use them to quiesce external resources such as sockets or
/// devices across a pause.
pub trait Environment<O, A>: Send {
    /// Produces the current observation.
    fn observe(&mut self) -> Result<O, DynError>;

    /// Applies the agent's action.
    fn affect(&mut self, action: A) -> Result<(), DynError>;

    fn setup(&mut self) -> Result<(), DynError> {
        Ok(())
    }

    fn teardown(&mut self) -> Result<(), DynError> {
        Ok(())
    }

    fn on_paused(&mut self) {}

    fn on_resumed(&mut self) {}
}
