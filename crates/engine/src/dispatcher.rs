//! Process-wide dispatcher.
//!
//! `Engine` owns the in-memory queues and serializes execution processing:
//! 1. `trigger` pushes fired events onto `events` (or runs them in place
//!    when manual or synchronous).
//! 2. `prepare` turns queued events into executions, one transaction each.
//! 3. A single worker task drains `pending`, then polls storage for
//!    `queueing` executions, and hands each to a [`Processor`].
//!
//! Only the worker processes queued work, so at most one execution advances
//! at a time. Storage stays the source of truth; every queue here can be
//! rebuilt from it.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{broadcast, watch, Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use db::{
    Execution, ExecutionStatus, Job, NewExecution, NewWorkflow, Store, StoreTx, Workflow,
    WorkflowId,
};
use instructions::builtin::{ConditionInstruction, EchoInstruction, EndInstruction, ManualInstruction};
use instructions::Instruction;

use crate::config::EngineConfig;
use crate::dag::validate_flow;
use crate::registry::{InstructionRegistry, TriggerRegistry};
use crate::sync::{NoopSyncBus, SyncBus, SyncEnvelope, SyncMessage};
use crate::trigger::{EngineHandle, Trigger, TriggerOptions};
use crate::triggers::{ManualTrigger, ScheduleTrigger};
use crate::{EngineError, Processor};

/// A fired event waiting to become an execution.
struct QueuedEvent {
    workflow: Workflow,
    context: Value,
    options: TriggerOptions,
}

/// An execution waiting for the worker, optionally resuming a job.
struct Work {
    execution: Execution,
    job: Option<Job>,
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Collects registrations and settings, then builds an [`Engine`].
pub struct EngineBuilder {
    store: Arc<dyn Store>,
    config: EngineConfig,
    instructions: InstructionRegistry,
    triggers: TriggerRegistry,
    sync_bus: Arc<dyn SyncBus>,
}

impl EngineBuilder {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            config: EngineConfig::default(),
            instructions: InstructionRegistry::new(),
            triggers: TriggerRegistry::new(),
            sync_bus: Arc::new(NoopSyncBus),
        }
    }

    pub fn config(&mut self, config: EngineConfig) -> &mut Self {
        self.config = config;
        self
    }

    pub fn sync_bus(&mut self, bus: Arc<dyn SyncBus>) -> &mut Self {
        self.sync_bus = bus;
        self
    }

    pub fn register_instruction(
        &mut self,
        name: impl Into<String>,
        instruction: Arc<dyn Instruction>,
    ) -> Result<&mut Self, EngineError> {
        self.instructions.register(name, instruction)?;
        Ok(self)
    }

    pub fn register_trigger(
        &mut self,
        name: impl Into<String>,
        trigger: Arc<dyn Trigger>,
    ) -> Result<&mut Self, EngineError> {
        self.triggers.register(name, trigger)?;
        Ok(self)
    }

    /// Register the instructions and triggers shipped with the engine.
    pub fn register_builtins(&mut self) -> Result<&mut Self, EngineError> {
        self.register_instruction("condition", Arc::new(ConditionInstruction))?
            .register_instruction("end", Arc::new(EndInstruction))?
            .register_instruction("manual", Arc::new(ManualInstruction))?
            .register_instruction("echo", Arc::new(EchoInstruction))?
            .register_trigger("manual", Arc::new(ManualTrigger))?
            .register_trigger("schedule", Arc::new(ScheduleTrigger::new()))
    }

    pub fn build(self) -> Arc<Engine> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Engine {
            id: Uuid::new_v4(),
            config: self.config,
            store: self.store,
            instructions: Arc::new(self.instructions),
            triggers: self.triggers,
            sync_bus: self.sync_bus,
            ready: AtomicBool::new(false),
            enabled_cache: RwLock::new(HashMap::new()),
            events: Mutex::new(VecDeque::new()),
            pending: Mutex::new(VecDeque::new()),
            executing: Mutex::new(()),
            preparing: Mutex::new(()),
            backlog: AtomicBool::new(true),
            wake: Notify::new(),
            shutdown,
            tasks: Mutex::new(Vec::new()),
        })
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    /// Origin id stamped on outgoing sync messages.
    id: Uuid,
    config: EngineConfig,
    store: Arc<dyn Store>,
    instructions: Arc<InstructionRegistry>,
    triggers: TriggerRegistry,
    sync_bus: Arc<dyn SyncBus>,
    ready: AtomicBool,
    /// Workflows whose trigger listeners are attached.
    enabled_cache: RwLock<HashMap<WorkflowId, Workflow>>,
    events: Mutex<VecDeque<QueuedEvent>>,
    pending: Mutex<VecDeque<Work>>,
    /// Held by the worker while it processes.
    executing: Mutex<()>,
    /// Held while queued events are turned into executions.
    preparing: Mutex<()>,
    /// Storage may hold `queueing` executions that are not in `pending`.
    /// Seeding `pending` while this is set would jump ahead of them.
    backlog: AtomicBool,
    wake: Notify,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// The cached copy of an enabled workflow.
    pub async fn enabled_workflow(&self, id: WorkflowId) -> Option<Workflow> {
        self.enabled_cache.read().await.get(&id).cloned()
    }

    pub async fn is_enabled(&self, id: WorkflowId) -> bool {
        self.enabled_cache.read().await.contains_key(&id)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Attach triggers for every enabled workflow and start the worker.
    pub async fn start(self: &Arc<Self>) -> Result<(), EngineError> {
        if self.is_ready() {
            return Ok(());
        }

        let workflows = self.store.list_enabled_workflows().await?;
        for workflow in &workflows {
            self.toggle(workflow, Some(true), true).await;
        }

        self.shutdown.send_replace(false);
        self.ready.store(true, Ordering::SeqCst);

        let mut tasks = self.tasks.lock().await;
        tasks.push(tokio::spawn(
            Arc::clone(self).run_worker(self.shutdown.subscribe()),
        ));
        if self.config.sync_enabled {
            if let Some(rx) = self.sync_bus.subscribe() {
                tasks.push(tokio::spawn(
                    Arc::clone(self).run_sync_listener(rx, self.shutdown.subscribe()),
                ));
            }
        }
        drop(tasks);

        info!(engine_id = %self.id, workflows = workflows.len(), "engine started");
        self.dispatch();
        Ok(())
    }

    /// Stop accepting events, detach triggers, flush queued events into
    /// executions and wait for the in-flight execution to finish.
    pub async fn shutdown(&self) {
        if !self.ready.swap(false, Ordering::SeqCst) {
            return;
        }

        let attached: Vec<Workflow> = self
            .enabled_cache
            .write()
            .await
            .drain()
            .map(|(_, workflow)| workflow)
            .collect();
        for workflow in &attached {
            self.detach(workflow).await;
        }

        self.prepare().await;

        self.shutdown.send_replace(true);
        drop(self.executing.lock().await);

        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "engine task ended abnormally");
            }
        }
        info!(engine_id = %self.id, "engine stopped");
    }

    // -----------------------------------------------------------------------
    // Event intake
    // -----------------------------------------------------------------------

    /// Fire `workflow` for `context`.
    ///
    /// `None` as context means "do not trigger this time". Queued events
    /// return `None` right away; manual and synchronous runs return the
    /// processor once the flow finished or suspended, or `None` if the
    /// execution could not be created or processed.
    pub async fn trigger(
        self: &Arc<Self>,
        workflow: &Workflow,
        context: Option<Value>,
        options: TriggerOptions,
    ) -> Option<Processor> {
        if !self.is_ready() {
            warn!(workflow_id = workflow.id, "engine not ready, event ignored");
            return None;
        }
        if !options.manually && !self.is_enabled(workflow.id).await {
            warn!(workflow_id = workflow.id, "workflow not enabled, event ignored");
            return None;
        }
        let Some(context) = context else {
            warn!(workflow_id = workflow.id, "empty context, event ignored");
            return None;
        };

        let sync = options.manually
            || workflow.sync
            || self
                .triggers
                .get(&workflow.trigger_type)
                .map(|t| t.sync())
                .unwrap_or(false);
        if sync {
            return self.trigger_sync(workflow, context, options).await;
        }

        let first = {
            let mut events = self.events.lock().await;
            events.push_back(QueuedEvent {
                workflow: workflow.clone(),
                context,
                options,
            });
            events.len() == 1
        };
        if first {
            let engine = Arc::clone(self);
            tokio::spawn(async move { engine.prepare().await });
        }
        None
    }

    async fn trigger_sync(
        &self,
        workflow: &Workflow,
        context: Value,
        options: TriggerOptions,
    ) -> Option<Processor> {
        let execution = match self.create_execution(workflow, context, &options).await {
            Ok(Some(execution)) => execution,
            Ok(None) => return None,
            Err(err) => {
                error!(workflow_id = workflow.id, error = %err, "failed to create execution");
                return None;
            }
        };
        self.process(execution, None).await
    }

    /// Run a workflow now through its trigger's `execute`.
    pub async fn execute(
        self: &Arc<Self>,
        workflow_id: WorkflowId,
        context: Value,
    ) -> Result<Option<Processor>, EngineError> {
        let workflow = self.store.get_workflow(workflow_id).await?;
        let trigger = self.triggers.get(&workflow.trigger_type)?;
        trigger
            .execute(self, &workflow, context, TriggerOptions::default())
            .await
    }

    /// Turn every queued event into an execution, then wake the worker.
    ///
    /// On single-writer stores each creation waits for the in-flight
    /// execution first. A failed creation is logged and the event dropped.
    async fn prepare(&self) {
        let _preparing = self.preparing.lock().await;
        loop {
            let executing = if self.store.single_writer() {
                Some(self.executing.lock().await)
            } else {
                None
            };
            let Some(event) = self.events.lock().await.pop_front() else {
                break;
            };
            let workflow_id = event.workflow.id;

            match self
                .create_execution(&event.workflow, event.context, &event.options)
                .await
            {
                Ok(Some(execution)) => {
                    if execution.status == ExecutionStatus::Queueing {
                        let idle = executing.is_some() || self.executing.try_lock().is_ok();
                        self.seed(execution, idle).await;
                    }
                }
                Ok(None) => debug!(workflow_id, "event discarded by trigger"),
                // Requeueing would retry the same failure forever.
                Err(err) => {
                    error!(workflow_id, error = %err, "failed to create execution, event dropped")
                }
            }
        }
        self.dispatch();
    }

    /// Hand a fresh execution straight to the worker if it is next in line
    /// anyway. Otherwise the storage poll picks it up in id order.
    async fn seed(&self, execution: Execution, idle: bool) {
        let mut pending = self.pending.lock().await;
        if idle && pending.is_empty() && !self.backlog.load(Ordering::SeqCst) {
            debug!(execution_id = execution.id, "execution seeded for dispatch");
            pending.push_back(Work { execution, job: None });
        } else {
            self.backlog.store(true, Ordering::SeqCst);
        }
    }

    // -----------------------------------------------------------------------
    // Execution creation
    // -----------------------------------------------------------------------

    /// Validate the event with the workflow's trigger and create its
    /// execution in a transaction of its own. `Ok(None)` means the trigger
    /// discarded the event.
    pub async fn create_execution(
        &self,
        workflow: &Workflow,
        context: Value,
        options: &TriggerOptions,
    ) -> Result<Option<Execution>, EngineError> {
        let trigger = self.triggers.get(&workflow.trigger_type)?;
        if !trigger.validate_event(workflow, &context, options).await? {
            return Ok(None);
        }

        let mut tx = self.store.begin().await?;
        let (execution, counted) = self
            .insert_execution(tx.as_mut(), workflow, context, options)
            .await?;
        tx.commit().await?;

        if let Some(cached) = self.enabled_cache.write().await.get_mut(&workflow.id) {
            cached.executed = counted.executed;
            cached.all_executed = counted.all_executed;
        }
        Ok(Some(execution))
    }

    /// Create an execution inside the caller's transaction. The trigger's
    /// `validate_event` is the caller's business here.
    pub async fn create_execution_with(
        &self,
        tx: &mut dyn StoreTx,
        workflow: &Workflow,
        context: Value,
        options: &TriggerOptions,
    ) -> Result<Execution, EngineError> {
        let (execution, _) = self.insert_execution(tx, workflow, context, options).await?;
        Ok(execution)
    }

    async fn insert_execution(
        &self,
        tx: &mut dyn StoreTx,
        workflow: &Workflow,
        context: Value,
        options: &TriggerOptions,
    ) -> Result<(Execution, Workflow), EngineError> {
        let status = if options.deferred {
            ExecutionStatus::Started
        } else {
            ExecutionStatus::Queueing
        };
        let event_key = options
            .event_key
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let execution = tx
            .insert_execution(NewExecution {
                workflow_id: workflow.id,
                key: workflow.key.clone(),
                event_key,
                context,
                status,
            })
            .await?;

        // Reload instead of trusting the in-place increment.
        let mut counted = tx.increment_executed(workflow.id).await?;
        counted.all_executed = tx.sync_all_executed(&workflow.key).await?;

        debug!(
            execution_id = execution.id,
            workflow_id = workflow.id,
            %status,
            "execution created"
        );
        Ok((execution, counted))
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Wake the worker. Calls made while it is busy collapse into one
    /// extra pass.
    pub fn dispatch(&self) {
        self.wake.notify_one();
    }

    /// Queue a job left pending by its instruction; processing continues
    /// after that job's node.
    pub async fn resume(&self, job: Job) -> Result<(), EngineError> {
        let execution = self.store.get_execution(job.execution_id).await?;
        self.pending.lock().await.push_back(Work {
            execution,
            job: Some(job),
        });
        self.dispatch();
        Ok(())
    }

    /// Queue an execution created with `deferred`.
    pub async fn start_execution(&self, execution: Execution) {
        self.pending.lock().await.push_back(Work {
            execution,
            job: None,
        });
        self.dispatch();
    }

    async fn run_worker(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut checker = tokio::time::interval(self.config.checker_interval);
        checker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        checker.tick().await;

        loop {
            tokio::select! {
                _ = self.wake.notified() => {}
                _ = checker.tick() => debug!("periodic check for queueing executions"),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            self.drain().await;
        }
        debug!("worker stopped");
    }

    /// Process work until nothing is left, events are waiting to be
    /// prepared, or the engine stops.
    async fn drain(&self) {
        let _executing = self.executing.lock().await;

        while self.is_ready() {
            if !self.events.lock().await.is_empty() {
                debug!("events queued, deferring to prepare");
                break;
            }

            let queued = self.pending.lock().await.pop_front();
            let (work, recovered) = match queued {
                Some(work) => (work, false),
                None => {
                    // Creations committed after this point set it again.
                    self.backlog.store(false, Ordering::SeqCst);
                    match self.store.next_queueing_execution().await {
                        Ok(Some(execution)) => {
                            self.backlog.store(true, Ordering::SeqCst);
                            (Work { execution, job: None }, true)
                        }
                        Ok(None) => break,
                        Err(err) => {
                            self.backlog.store(true, Ordering::SeqCst);
                            error!(error = %err, "failed to poll queueing executions");
                            break;
                        }
                    }
                }
            };

            // A polled execution that failed before starting would be polled
            // again right away; leave it to the next wake-up.
            if self.process(work.execution, work.job).await.is_none() && recovered {
                break;
            }
        }
    }

    #[instrument(skip_all, fields(execution_id = execution.id, workflow_id = execution.workflow_id))]
    async fn process(&self, execution: Execution, job: Option<Job>) -> Option<Processor> {
        match self.run_processor(execution, job).await {
            Ok(processor) => Some(processor),
            Err(err) => {
                error!(error = %err, "execution processing failed");
                None
            }
        }
    }

    async fn run_processor(
        &self,
        execution: Execution,
        job: Option<Job>,
    ) -> Result<Processor, EngineError> {
        let workflow = self.store.get_workflow(execution.workflow_id).await?;
        let mut processor = Processor::new(
            Arc::clone(&self.store),
            Arc::clone(&self.instructions),
            workflow,
            execution,
        )
        .await?;
        match job {
            Some(job) => processor.resume(job).await?,
            None => processor.start().await?,
        }
        Ok(processor)
    }

    // -----------------------------------------------------------------------
    // Trigger toggling
    // -----------------------------------------------------------------------

    /// Attach or detach `workflow`'s trigger listener. `enable` defaults to
    /// `workflow.enabled`. Unless `silent`, peers are told through the sync
    /// bus. A missing trigger type is logged and leaves the workflow inert.
    pub async fn toggle(self: &Arc<Self>, workflow: &Workflow, enable: Option<bool>, silent: bool) {
        let enable = enable.unwrap_or(workflow.enabled);
        let previous = self.enabled_workflow(workflow.id).await;

        let unchanged = previous.as_ref().is_some_and(|prev| {
            prev.trigger_type == workflow.trigger_type && prev.config == workflow.config
        });
        if let Some(prev) = &previous {
            if !enable || !unchanged {
                self.detach(prev).await;
            }
        }

        if enable {
            if unchanged {
                self.enabled_cache
                    .write()
                    .await
                    .insert(workflow.id, workflow.clone());
            } else {
                self.enabled_cache.write().await.remove(&workflow.id);
                self.attach(workflow).await;
            }
        } else {
            if previous.is_none() {
                self.detach(workflow).await;
            }
            self.enabled_cache.write().await.remove(&workflow.id);
        }

        if !silent && self.config.sync_enabled {
            // A failed attach leaves the workflow inert; peers follow suit.
            let enabled = self.is_enabled(workflow.id).await;
            let envelope = SyncEnvelope {
                origin: self.id,
                message: SyncMessage::StatusChange {
                    workflow_id: workflow.id,
                    enabled,
                },
            };
            if let Err(err) = self.sync_bus.publish(envelope).await {
                warn!(workflow_id = workflow.id, error = %err, "failed to publish status change");
            }
        }
    }

    async fn attach(self: &Arc<Self>, workflow: &Workflow) {
        let trigger = match self.triggers.get(&workflow.trigger_type) {
            Ok(trigger) => trigger,
            Err(err) => {
                error!(workflow_id = workflow.id, error = %err, "cannot attach trigger, workflow left inert");
                return;
            }
        };
        match trigger.on(workflow, EngineHandle::new(self)).await {
            Ok(()) => {
                self.enabled_cache
                    .write()
                    .await
                    .insert(workflow.id, workflow.clone());
                debug!(workflow_id = workflow.id, trigger = %workflow.trigger_type, "trigger attached");
            }
            Err(err) => {
                error!(workflow_id = workflow.id, error = %err, "failed to attach trigger")
            }
        }
    }

    async fn detach(&self, workflow: &Workflow) {
        let trigger = match self.triggers.get(&workflow.trigger_type) {
            Ok(trigger) => trigger,
            Err(err) => {
                error!(workflow_id = workflow.id, error = %err, "cannot detach trigger");
                return;
            }
        };
        if let Err(err) = trigger.off(workflow).await {
            error!(workflow_id = workflow.id, error = %err, "failed to detach trigger");
        }
    }

    /// Apply a peer's status change to this engine's cache and listeners.
    pub async fn handle_sync_message(self: &Arc<Self>, envelope: SyncEnvelope) -> Result<(), EngineError> {
        if envelope.origin == self.id {
            return Ok(());
        }
        match envelope.message {
            SyncMessage::StatusChange {
                workflow_id,
                enabled: true,
            } => {
                let workflow = self.store.get_workflow(workflow_id).await?;
                self.toggle(&workflow, Some(true), true).await;
            }
            SyncMessage::StatusChange {
                workflow_id,
                enabled: false,
            } => {
                if let Some(cached) = self.enabled_workflow(workflow_id).await {
                    self.toggle(&cached, Some(false), true).await;
                }
            }
        }
        Ok(())
    }

    async fn run_sync_listener(
        self: Arc<Self>,
        mut rx: broadcast::Receiver<SyncEnvelope>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = rx.recv() => match received {
                    Ok(envelope) => {
                        if let Err(err) = self.handle_sync_message(envelope).await {
                            warn!(error = %err, "failed to apply sync message");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "sync listener lagged behind");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!("sync listener stopped");
    }

    // -----------------------------------------------------------------------
    // Workflow administration
    // -----------------------------------------------------------------------

    /// Persist a workflow version and (re)attach triggers.
    ///
    /// Saving a current version demotes the previous current version of the
    /// same key in the same transaction.
    pub async fn save_workflow(self: &Arc<Self>, workflow: NewWorkflow) -> Result<Workflow, EngineError> {
        validate_flow(&workflow.nodes)?;

        let mut tx = self.store.begin().await?;
        let demoted = if workflow.current == Some(true) {
            tx.demote_current(&workflow.key, workflow.id).await?
        } else {
            Vec::new()
        };
        let saved = tx.save_workflow(workflow).await?;
        tx.commit().await?;

        for previous in demoted.iter().filter(|w| w.enabled) {
            info!(workflow_id = previous.id, key = %previous.key, "previous version demoted");
            self.toggle(previous, Some(false), false).await;
        }
        self.toggle(&saved, None, false).await;
        Ok(saved)
    }

    /// Detach a workflow's triggers and delete it with its executions.
    pub async fn destroy_workflow(self: &Arc<Self>, id: WorkflowId) -> Result<(), EngineError> {
        let workflow = self.store.get_workflow(id).await?;
        self.toggle(&workflow, Some(false), false).await;
        self.store.delete_workflow(id).await?;
        info!(workflow_id = id, "workflow destroyed");
        Ok(())
    }
}
