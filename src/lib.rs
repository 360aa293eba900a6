//! Tandem is a runtime for concurrent inference and learning: an interaction
//! thread drives an agent/environment loop at a fixed cadence while trainer
//! threads consume the experience stream and publish refreshed parameters
//! into a double-buffered model registry, all under one shared lifecycle.

pub mod runtime {
    pub mod clock;
    pub mod context;
    pub mod latch;
    pub mod lifecycle;
    pub mod shared_value;
    pub mod trigger;

    pub use clock::*;
    pub use context::*;
    pub use latch::*;
    pub use lifecycle::*;
    pub use shared_value::*;
    pub use trigger::*;
}

pub mod data {
    pub mod buffer;
    pub mod fabric;

    pub use buffer::*;
    pub use fabric::*;
}

pub mod model {
    pub mod interface;
    pub mod registry;

    pub use interface::*;
    pub use registry::*;
}

pub mod interaction {
    pub mod agent;
    pub mod core;
    pub mod paced;

    pub use agent::*;
    pub use core::*;
    pub use paced::*;
}

pub mod trainer {
    pub mod base;
    pub mod harness;

    pub use base::*;
    pub use harness::*;
}

pub mod orchestrator {
    pub mod control;
    pub mod threads;

    pub use control::*;
    pub use threads::*;
}

pub mod persistence {
    pub mod store;

    pub use store::*;
}

pub mod surface {
    pub mod command;
    pub mod server;

    pub use command::*;
    pub use server::*;
}

pub mod app;
pub mod builder;
pub mod config;
pub mod error;

pub use builder::{launch, RuntimeBuilder};
pub use config::{ConfigError, LaunchConfig, WebApiAddress};
pub use data::buffer::{
    replace_probability_for_survival, BufferPolicy, BufferSnapshot, BufferSpec, DataError,
    StepData,
};
pub use data::fabric::{DataCollector, DataFabric, DataUser};
pub use error::{DynError, FatalError, FatalSlot};
pub use interaction::agent::{Agent, Environment};
pub use interaction::core::Interaction;
pub use interaction::paced::{FixedIntervalInteraction, InteractionDriver, StepOutcome};
pub use model::interface::Model;
pub use model::registry::{
    InferenceView, ModelEntry, ModelRegistry, RegistryError, TrainingView,
};
pub use orchestrator::control::{
    CommandQueue, ControlCommand, Orchestrator, OrchestratorSettings, QueueFull, RunError,
    RuntimeHandle, StatusReport, ThreadReport, COMMAND_QUEUE_CAPACITY,
};
pub use orchestrator::threads::derive_system_status;
pub use persistence::store::{
    ComponentKind, Manifest, PersistError, Persistable, StateStore, MANIFEST_FILE,
    RECORD_TIMESTAMP_FORMAT, STATE_SCHEMA_VERSION,
};
pub use runtime::clock::Clock;
pub use runtime::context::{RuntimeContext, SleepStatus};
pub use runtime::latch::Latch;
pub use runtime::lifecycle::{
    Cancelled, GatePoll, LifecycleState, PauseGate, SystemStatus, LIFECYCLE_WAIT_SLICE,
};
pub use runtime::shared_value::SharedValue;
pub use runtime::trigger::Trigger;
pub use surface::command::{parse_command, respond_line, CommandVerb, SurfaceError};
pub use trainer::base::{Trainer, TrainerSession};
pub use trainer::harness::{TrainerHarness, TrainerStateHandle, DEFAULT_TRAINER_THROTTLE};
