use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{ConfigError, LaunchConfig};
use crate::data::buffer::BufferSpec;
use crate::data::fabric::{DataCollector, DataFabric, DataUser};
use crate::error::FatalSlot;
use crate::interaction::paced::InteractionDriver;
use crate::model::interface::Model;
use crate::model::registry::{ModelEntry, ModelRegistry};
use crate::orchestrator::control::{CommandQueue, Orchestrator, OrchestratorSettings};
use crate::persistence::{ComponentKind, StateStore};
use crate::runtime::context::RuntimeContext;
use crate::runtime::shared_value::SharedValue;
use crate::runtime::trigger::Trigger;
use crate::trainer::base::{Trainer, TrainerSession};
use crate::trainer::harness::{TrainerHarness, TrainerStateHandle, DEFAULT_TRAINER_THROTTLE};

struct TrainerSpec {
    name: String,
    trainer: Box<dyn Trainer>,
    trigger: Trigger,
    throttle: Duration,
}

/// Assembles a runtime from string-named components.
///
/// Buffers, model entries, and trainers register under unique names; the
/// interaction driver is set once. Cross-references (an agent looking up a
/// stream, a trainer looking up a model) resolve against the same names, and
/// every lookup failure is an error at build or launch time rather than
/// deep inside a running thread.
pub struct RuntimeBuilder {
    config: LaunchConfig,
    ctx: RuntimeContext,
    fabric: DataFabric,
    registry: Arc<ModelRegistry>,
    trainers: Vec<TrainerSpec>,
    driver: Option<Box<dyn InteractionDriver>>,
}

impl RuntimeBuilder {
    pub fn new(config: LaunchConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let ctx = RuntimeContext::new();
        let fabric = DataFabric::new(ctx.clock().clone());
        Ok(Self {
            config,
            ctx,
            fabric,
            registry: Arc::new(ModelRegistry::new()),
            trainers: Vec::new(),
            driver: None,
        })
    }

    /// Context handle for components that need the clock or lifecycle.
    pub fn context(&self) -> RuntimeContext {
        self.ctx.clone()
    }

    /// Declares an experience stream.
    pub fn add_buffer(&mut self, name: &str, spec: &BufferSpec) -> Result<(), ConfigError> {
        self.fabric
            .register(name, spec)
            .map_err(|err| ConfigError::invalid("buffers", err.to_string()))
    }

    /// Producer endpoint for a declared stream, to hand to the agent.
    pub fn collector(&self, name: &str) -> Result<DataCollector, ConfigError> {
        self.fabric
            .collector(name)
            .map_err(|_| ConfigError::UnknownComponent {
                kind: "buffer",
                name: name.to_string(),
            })
    }

    /// Consumer endpoint for a declared stream.
    pub fn user(&self, name: &str) -> Result<DataUser, ConfigError> {
        self.fabric
            .user(name)
            .map_err(|_| ConfigError::UnknownComponent {
                kind: "buffer",
                name: name.to_string(),
            })
    }

    /// Registers a model entry. Pass `None` for `inference` to keep the
    /// entry trainer-private.
    pub fn add_model(
        &mut self,
        name: &str,
        training: Box<dyn Model>,
        inference: Option<Box<dyn Model>>,
    ) -> Result<(), ConfigError> {
        self.registry
            .insert(ModelEntry::new(name, training, inference))
            .map_err(|_| ConfigError::DuplicateComponent {
                kind: "model",
                name: name.to_string(),
            })?;
        Ok(())
    }

    /// Registry lookup capability, to hand to agents and user code.
    pub fn models(&self) -> Arc<ModelRegistry> {
        self.registry.clone()
    }

    /// Registers a trainer with the default throttle.
    pub fn add_trainer(
        &mut self,
        name: &str,
        trainer: Box<dyn Trainer>,
        trigger: Trigger,
    ) -> Result<(), ConfigError> {
        self.add_trainer_with_throttle(name, trainer, trigger, DEFAULT_TRAINER_THROTTLE)
    }

    pub fn add_trainer_with_throttle(
        &mut self,
        name: &str,
        trainer: Box<dyn Trainer>,
        trigger: Trigger,
        throttle: Duration,
    ) -> Result<(), ConfigError> {
        if self.trainers.iter().any(|spec| spec.name == name) {
            return Err(ConfigError::DuplicateComponent {
                kind: "trainer",
                name: name.to_string(),
            });
        }
        self.trainers.push(TrainerSpec {
            name: name.to_string(),
            trainer,
            trigger,
            throttle,
        });
        Ok(())
    }

    /// Sets the interaction driver. At most one per runtime.
    pub fn set_interaction(&mut self, driver: Box<dyn InteractionDriver>) -> Result<(), ConfigError> {
        if self.driver.is_some() {
            return Err(ConfigError::DriverAlreadySet);
        }
        self.driver = Some(driver);
        Ok(())
    }

    /// Finalizes the assembly: mirrors every inference side from its
    /// training twin, wires the persistence registry, and produces the
    /// orchestrator.
    pub fn build(self) -> Result<Orchestrator, ConfigError> {
        let Self {
            config,
            ctx,
            fabric,
            registry,
            trainers,
            driver,
        } = self;

        // First publish: inference twins start byte-identical to training.
        for entry in registry.entries() {
            entry.publish().map_err(|err| {
                ConfigError::invalid("models", format!("initial publish of '{}' failed: {err}", entry.name()))
            })?;
        }

        let fabric = Arc::new(fabric);
        let mut store = StateStore::new(&config.states_dir, config.max_keep_states)
            .map_err(|err| ConfigError::invalid("states_dir", err.to_string()))?;

        for entry in registry.entries() {
            let name = entry.name().to_string();
            store
                .register(ComponentKind::Models, &name, entry)
                .map_err(|err| ConfigError::invalid("models", err.to_string()))?;
        }
        let stream_names: Vec<String> =
            fabric.stream_names().map(str::to_string).collect();
        for name in stream_names {
            let user = fabric
                .user(&name)
                .map_err(|err| ConfigError::invalid("buffers", err.to_string()))?;
            store
                .register(ComponentKind::Buffers, &name, Arc::new(user))
                .map_err(|err| ConfigError::invalid("buffers", err.to_string()))?;
        }

        let mut harnesses = Vec::with_capacity(trainers.len());
        for spec in trainers {
            let session = TrainerSession::new(fabric.clone(), registry.clone());
            let harness = Arc::new(Mutex::new(TrainerHarness::new(
                spec.name.clone(),
                spec.trainer,
                spec.trigger,
                spec.throttle,
                session,
            )));
            store
                .register(
                    ComponentKind::Trainers,
                    &spec.name,
                    Arc::new(TrainerStateHandle::new(harness.clone())),
                )
                .map_err(|err| ConfigError::invalid("trainers", err.to_string()))?;
            harnesses.push((spec.name, harness));
        }

        let settings = OrchestratorSettings {
            pause_timeout: Duration::from_secs_f64(config.pause_timeout_seconds),
            pause_attempts: config.pause_attempts,
            join_grace: Duration::from_secs_f64(config.join_grace_seconds),
            max_uptime: config.max_uptime(),
        };
        let save_trigger = config.save_interval().map(Trigger::every);
        let surface_addr = config
            .web_api_address
            .as_ref()
            .map(|address| (address.host.clone(), address.port));
        let resume_from: Option<PathBuf> = config.resume_from.clone();

        Ok(Orchestrator {
            ctx,
            driver,
            trainers: harnesses,
            store,
            resume_from,
            save_trigger,
            surface_addr,
            settings,
            fatal: FatalSlot::new(),
            queue: CommandQueue::new(),
            roster: Arc::new(Mutex::new(Vec::new())),
            control_addr: SharedValue::new(None),
        })
    }
}

/// Convenience for embedders: build and run in one call, returning the
/// lifecycle outcome.
pub fn launch(builder: RuntimeBuilder) -> Result<(), crate::orchestrator::control::RunError> {
    let orchestrator = builder.build()?;
    orchestrator.run()
}
