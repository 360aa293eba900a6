use crate::error::DynError;

use super::agent::{Agent, Environment};

/// Combines an agent and an environment into one observe-decide-act loop.
pub struct Interaction<O, A> {
    agent: Box<dyn Agent<O, A>>,
    environment: Box<dyn Environment<O, A>>,
}

impl<O, A> Interaction<O, A> {
    pub fn new(agent: Box<dyn Agent<O, A>>, environment: Box<dyn Environment<O, A>>) -> Self {
        Self { agent, environment }
    }

    /// One tick: observe the environment, let the agent decide, apply the
    /// action. Any error is fatal to the interaction loop.
    pub fn step(&mut self) -> Result<(), DynError> {
        let observation = self.environment.observe()?;
        let action = self.agent.step(observation)?;
        self.environment.affect(action)
    }

    pub fn setup(&mut self) -> Result<(), DynError> {
        self.agent.setup()?;
        self.environment.setup()
    }

    pub fn teardown(&mut self) -> Result<(), DynError> {
        let agent = self.agent.teardown();
        let environment = self.environment.teardown();
        agent?;
        environment
    }

    pub fn on_paused(&mut self) {
        self.agent.on_paused();
        self.environment.on_paused();
    }

    pub fn on_resumed(&mut self) {
        self.agent.on_resumed();
        self.environment.on_resumed();
    }
}
