//! The superstep driver: owns a compiled graph, a checkpoint store, and the
//! event bus, and exposes the invocation surface (run, resume, fork,
//! update_state, history).
//!
//! One invocation drives rounds until the active set drains, a task pauses
//! on an interrupt, a task fails, or the recursion limit trips. Every round
//! boundary is checkpointed according to the configured [`Durability`]; at a
//! pause boundary the completed siblings' writes are persisted as pending
//! writes so resuming never re-executes work that already finished.

use std::sync::{Arc, Mutex};

use chrono::Utc;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::channels::{
    self, ChannelError, ChannelRegistry, GOTO_CHANNEL, INTERRUPT_CHANNEL, NO_WRITES_MARKER,
    RESUME_CHANNEL, TASKS_CHANNEL,
};
use crate::checkpoint::{
    Checkpoint, CheckpointMetadata, CheckpointSource, CheckpointStore, CheckpointTuple,
    StoreError, StoredRef,
};
use crate::control::Route;
use crate::event_bus::{Event, EventBus, EventSink};
use crate::graphs::CompiledGraph;
use crate::interrupt::{Interrupt, Resume};
use crate::node::{NodeError, NodeOutput};
use crate::scheduler::{
    apply_barrier, prepare_tasks, run_tasks, SchedulerError, Task, VersionState,
};
use crate::types::NodeKind;
use crate::utils::ids::task_id;

use super::execution::{Durability, RunOutcome};
use super::runtime_config::RuntimeConfig;

/// Task id under which a fresh run's raw input is recorded as pending writes
/// on the pre-execution checkpoint.
pub const INPUT_TASK_ID: &str = "__input__";

/// Invocation-level failures.
#[derive(Debug, Error, Diagnostic)]
pub enum RunnerError {
    #[error("thread `{thread_id}` already has a history")]
    #[diagnostic(
        code(loomgraph::runner::thread_exists),
        help("Use continue_run, resume, or fork to act on an existing thread.")
    )]
    ThreadExists { thread_id: String },

    #[error("thread `{thread_id}` has no history")]
    #[diagnostic(code(loomgraph::runner::unknown_thread))]
    UnknownThread { thread_id: String },

    #[error("checkpoint {checkpoint_id} not found on thread `{thread_id}`")]
    #[diagnostic(code(loomgraph::runner::unknown_checkpoint))]
    UnknownCheckpoint {
        thread_id: String,
        checkpoint_id: u64,
    },

    #[error("thread `{thread_id}` has no pending interrupt")]
    #[diagnostic(
        code(loomgraph::runner::no_pending_interrupt),
        help("Only a thread paused on an interrupt can be resumed with values.")
    )]
    NoPendingInterrupt { thread_id: String },

    #[error("multiple tasks are interrupted; resume them by interrupt id")]
    #[diagnostic(
        code(loomgraph::runner::ambiguous_resume),
        help("Use Resume::ById to address each pending interrupt explicitly.")
    )]
    AmbiguousResume,

    #[error("node `{node}` failed")]
    #[diagnostic(code(loomgraph::runner::node_failed))]
    Node {
        node: String,
        #[source]
        source: NodeError,
    },

    #[error("recursion limit of {limit} rounds exceeded")]
    #[diagnostic(
        code(loomgraph::runner::recursion_limit),
        help("Raise RuntimeConfig::recursion_limit or break the routing cycle.")
    )]
    RecursionLimit { limit: usize },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    #[diagnostic(code(loomgraph::runner::serde))]
    Serde(#[from] serde_json::Error),
}

struct BufferedSave {
    checkpoint: Checkpoint,
    metadata: CheckpointMetadata,
    /// (task id, writes) recorded against this checkpoint.
    writes: Vec<(String, Vec<(String, Value)>)>,
}

/// Pending-write reconstruction for one paused checkpoint.
#[derive(Default)]
struct PauseState {
    /// Completed sibling outputs, reusable without re-execution.
    reused: FxHashMap<String, NodeOutput>,
    /// task id → (its pending interrupt, resume values already consumed).
    interrupted: Vec<(String, Interrupt, Vec<Value>)>,
}

/// Durable graph executor for many independent threads.
pub struct Runner {
    graph: CompiledGraph,
    store: Arc<dyn CheckpointStore>,
    config: RuntimeConfig,
    event_bus: EventBus,
    exit_buffers: Mutex<FxHashMap<String, Vec<BufferedSave>>>,
    async_saves: Mutex<Vec<JoinHandle<()>>>,
}

impl Runner {
    pub fn new(graph: CompiledGraph, store: Arc<dyn CheckpointStore>, config: RuntimeConfig) -> Self {
        let event_bus = if config.stdout_events {
            EventBus::default()
        } else {
            EventBus::with_sinks(Vec::new())
        };
        event_bus.listen_for_events();
        Self {
            graph,
            store,
            config,
            event_bus,
            exit_buffers: Mutex::new(FxHashMap::default()),
            async_saves: Mutex::new(Vec::new()),
        }
    }

    /// Attach an additional event sink (collector, channel, ...).
    pub fn add_event_sink<T: EventSink + 'static>(&self, sink: T) {
        self.event_bus.add_sink(sink);
    }

    #[must_use]
    pub fn graph(&self) -> &CompiledGraph {
        &self.graph
    }

    /// Start a fresh thread from `input` writes and drive it until it
    /// completes, pauses, or fails.
    ///
    /// The raw input is durably recorded before any execution, so a crash
    /// between accepting the input and finishing the first round can be
    /// recovered with [`continue_run`](Self::continue_run).
    #[instrument(skip(self, input))]
    pub async fn run(
        &self,
        thread_id: &str,
        input: Vec<(String, Value)>,
    ) -> Result<RunOutcome, RunnerError> {
        if self.store.get(thread_id, None).await?.is_some() {
            return Err(RunnerError::ThreadExists {
                thread_id: thread_id.to_string(),
            });
        }
        info!(thread_id, "starting thread");
        self.emit_diagnostic(format!("thread {thread_id} starting"));

        let input_checkpoint = Checkpoint {
            id: 1,
            thread_id: thread_id.to_string(),
            parents: FxHashMap::default(),
            round: -1,
            values: FxHashMap::default(),
            versions: FxHashMap::default(),
            versions_seen: FxHashMap::default(),
            created_at: Utc::now(),
        };
        self.persist_checkpoint(
            thread_id,
            input_checkpoint,
            CheckpointMetadata::new(CheckpointSource::Input, -1),
            vec![(INPUT_TASK_ID.to_string(), input.clone())],
        )
        .await?;

        self.apply_input_and_drive(thread_id, input, 1).await
    }

    /// Continue a thread from its latest checkpoint without new input.
    ///
    /// Recovers crashed runs: completed sibling writes are replayed from
    /// pending writes, tasks that had paused re-execute with the resume
    /// values they had already consumed.
    #[instrument(skip(self))]
    pub async fn continue_run(&self, thread_id: &str) -> Result<RunOutcome, RunnerError> {
        let tuple = self.require_latest(thread_id).await?;

        if tuple.metadata.source == CheckpointSource::Input {
            let input: Vec<(String, Value)> = tuple
                .pending_writes
                .iter()
                .filter(|w| w.task_id == INPUT_TASK_ID)
                .map(|w| (w.channel.clone(), w.value.clone()))
                .collect();
            let input_id = tuple.checkpoint.id;
            return self.apply_input_and_drive(thread_id, input, input_id).await;
        }

        let pause = Self::pause_state(&tuple)?;
        let resume_values = pause
            .interrupted
            .iter()
            .map(|(task_id, _, prior)| (task_id.clone(), prior.clone()))
            .collect();
        self.drive_from(thread_id, &tuple, pause.reused, resume_values)
            .await
    }

    /// Answer a thread's pending interrupt(s) and drive it onward.
    ///
    /// Resume matching is positional per task: the nth `interrupt` call of
    /// the re-executed node consumes the nth value accumulated for that task.
    /// With several tasks paused at once, [`Resume::ById`] is required.
    #[instrument(skip(self, resume))]
    pub async fn resume(&self, thread_id: &str, resume: Resume) -> Result<RunOutcome, RunnerError> {
        let tuple = self.require_latest(thread_id).await?;
        let pause = Self::pause_state(&tuple)?;
        if pause.interrupted.is_empty() {
            return Err(RunnerError::NoPendingInterrupt {
                thread_id: thread_id.to_string(),
            });
        }
        if pause.interrupted.len() > 1 && !matches!(resume, Resume::ById(_)) {
            return Err(RunnerError::AmbiguousResume);
        }
        info!(thread_id, pending = pause.interrupted.len(), "resuming thread");

        let mut resume_values: FxHashMap<String, Vec<Value>> = FxHashMap::default();
        for (task_id, interrupt, prior) in &pause.interrupted {
            let mut combined = prior.clone();
            combined.extend(resume.values_for(std::slice::from_ref(interrupt)));
            // Keep the accumulated values durable before re-executing, so a
            // crash mid-resume does not lose the caller's answers.
            self.store
                .put_writes(
                    thread_id,
                    tuple.checkpoint.id,
                    task_id,
                    vec![
                        (INTERRUPT_CHANNEL.to_string(), serde_json::to_value(interrupt)?),
                        (RESUME_CHANNEL.to_string(), Value::Array(combined.clone())),
                    ],
                )
                .await?;
            resume_values.insert(task_id.clone(), combined);
        }

        self.drive_from(thread_id, &tuple, pause.reused, resume_values)
            .await
    }

    /// Branch a new checkpoint off `checkpoint_id` without executing.
    ///
    /// The fork lands on the same thread with a fresh id and a parent pointer
    /// to its origin; the original chain is never mutated.
    #[instrument(skip(self))]
    pub async fn fork(&self, thread_id: &str, checkpoint_id: u64) -> Result<StoredRef, RunnerError> {
        self.branch(thread_id, Some(checkpoint_id), Vec::new(), CheckpointSource::Fork)
            .await
    }

    /// Apply caller edits to the latest state as a new checkpoint.
    ///
    /// Each write goes through the target channel's reducer, exactly as if a
    /// node had produced it.
    #[instrument(skip(self, writes))]
    pub async fn update_state(
        &self,
        thread_id: &str,
        writes: Vec<(String, Value)>,
    ) -> Result<StoredRef, RunnerError> {
        self.branch(thread_id, None, writes, CheckpointSource::Update)
            .await
    }

    /// Fork from `checkpoint_id` and drive the branch (time travel).
    #[instrument(skip(self))]
    pub async fn resume_from(
        &self,
        thread_id: &str,
        checkpoint_id: u64,
    ) -> Result<RunOutcome, RunnerError> {
        let branch = self.fork(thread_id, checkpoint_id).await?;
        let tuple = self
            .store
            .get(thread_id, Some(branch.checkpoint_id))
            .await?
            .ok_or(RunnerError::UnknownCheckpoint {
                thread_id: thread_id.to_string(),
                checkpoint_id: branch.checkpoint_id,
            })?;
        self.drive_from(thread_id, &tuple, FxHashMap::default(), FxHashMap::default())
            .await
    }

    /// Most recent checkpoint of a thread.
    pub async fn latest(&self, thread_id: &str) -> Result<Option<CheckpointTuple>, RunnerError> {
        Ok(self.store.get(thread_id, None).await?)
    }

    /// Checkpoint history, most recent first.
    pub async fn history(
        &self,
        thread_id: &str,
        before: Option<u64>,
        limit: Option<usize>,
        filter: Option<FxHashMap<String, Value>>,
    ) -> Result<Vec<CheckpointTuple>, RunnerError> {
        Ok(self.store.list(thread_id, before, limit, filter).await?)
    }

    async fn require_latest(&self, thread_id: &str) -> Result<CheckpointTuple, RunnerError> {
        self.store
            .get(thread_id, None)
            .await?
            .ok_or(RunnerError::UnknownThread {
                thread_id: thread_id.to_string(),
            })
    }

    /// Apply raw input through the barrier (activating the entry frontier),
    /// checkpoint round 0, and start the superstep loop.
    async fn apply_input_and_drive(
        &self,
        thread_id: &str,
        input: Vec<(String, Value)>,
        input_checkpoint_id: u64,
    ) -> Result<RunOutcome, RunnerError> {
        let mut registry = ChannelRegistry::from_schema(self.graph.full_schema());
        let mut state = VersionState::default();

        let pseudo = Task {
            id: task_id(0, &NodeKind::Start.encode(), ""),
            node: NodeKind::Start,
            path: String::new(),
            input: None,
            triggers: Vec::new(),
        };
        if let Err(error) = apply_barrier(
            &self.graph,
            &mut registry,
            &mut state,
            0,
            &[(pseudo, NodeOutput::Update(input))],
        ) {
            return Err(self.abort(thread_id, error.into()).await);
        }

        let loop_id = input_checkpoint_id + 1;
        let checkpoint = self.snapshot(thread_id, loop_id, 0, &registry, &state);
        self.persist_checkpoint(
            thread_id,
            checkpoint,
            CheckpointMetadata::new(CheckpointSource::Loop, 0),
            Vec::new(),
        )
        .await?;

        self.drive(
            thread_id,
            registry,
            state,
            1,
            loop_id,
            FxHashMap::default(),
            FxHashMap::default(),
        )
        .await
    }

    /// Restore execution state from a checkpoint and drive the next round.
    async fn drive_from(
        &self,
        thread_id: &str,
        tuple: &CheckpointTuple,
        reused: FxHashMap<String, NodeOutput>,
        resume_values: FxHashMap<String, Vec<Value>>,
    ) -> Result<RunOutcome, RunnerError> {
        let registry = ChannelRegistry::restore(self.graph.full_schema(), &tuple.checkpoint.values);
        let state = tuple.checkpoint.version_state();
        self.drive(
            thread_id,
            registry,
            state,
            tuple.checkpoint.round + 1,
            tuple.checkpoint.id,
            reused,
            resume_values,
        )
        .await
    }

    /// The superstep loop proper.
    #[allow(clippy::too_many_arguments)]
    async fn drive(
        &self,
        thread_id: &str,
        mut registry: ChannelRegistry,
        mut state: VersionState,
        mut next_round: i64,
        mut latest_id: u64,
        mut reused: FxHashMap<String, NodeOutput>,
        mut resume_values: FxHashMap<String, Vec<Value>>,
    ) -> Result<RunOutcome, RunnerError> {
        loop {
            let tasks = match prepare_tasks(&self.graph, &registry, &state, next_round) {
                Ok(tasks) => tasks,
                Err(error) => return Err(self.abort(thread_id, error.into()).await),
            };
            if tasks.is_empty() {
                self.flush_exit(thread_id).await?;
                self.drain_async_saves().await;
                let names: Vec<String> = self
                    .graph
                    .user_channels()
                    .iter()
                    .map(|def| def.name.clone())
                    .collect();
                info!(thread_id, rounds = next_round - 1, "thread completed");
                self.emit_diagnostic(format!("thread {thread_id} completed"));
                return Ok(RunOutcome::Complete(registry.read_many(names)));
            }
            if next_round > self.config.recursion_limit as i64 {
                let limit = self.config.recursion_limit;
                return Err(self.abort(thread_id, RunnerError::RecursionLimit { limit }).await);
            }

            let mut completed: Vec<(Task, NodeOutput)> = Vec::new();
            let mut to_run = Vec::new();
            for task in tasks {
                match reused.remove(&task.id) {
                    Some(output) => completed.push((task, output)),
                    None => to_run.push(task),
                }
            }

            let results = match run_tasks(
                &self.graph,
                &registry,
                to_run,
                thread_id,
                next_round,
                self.event_bus.get_sender(),
                &resume_values,
            )
            .await
            {
                Ok(results) => results,
                Err(error) => return Err(self.abort(thread_id, error.into()).await),
            };

            let mut interrupts: Vec<(Task, Interrupt)> = Vec::new();
            let mut failures: Vec<(Task, NodeError)> = Vec::new();
            for result in results {
                match result.output {
                    Ok(output) => completed.push((result.task, output)),
                    Err(NodeError::Suspended(interrupt)) => {
                        interrupts.push((result.task, *interrupt));
                    }
                    Err(error) => failures.push((result.task, error)),
                }
            }
            completed.sort_by(|a, b| {
                (a.0.node.encode(), &a.0.path).cmp(&(b.0.node.encode(), &b.0.path))
            });

            if !interrupts.is_empty() || !failures.is_empty() {
                return match self
                    .pause(thread_id, latest_id, completed, interrupts, failures, &resume_values)
                    .await
                {
                    Ok(outcome) => Ok(outcome),
                    Err(error) => Err(self.abort(thread_id, error).await),
                };
            }

            let outcome = match apply_barrier(
                &self.graph,
                &mut registry,
                &mut state,
                next_round,
                &completed,
            ) {
                Ok(outcome) => outcome,
                Err(error) => return Err(self.abort(thread_id, error.into()).await),
            };
            debug!(
                thread_id,
                round = next_round,
                updated = outcome.updated_channels.len(),
                next = outcome.next_nodes.len(),
                "round committed"
            );

            latest_id += 1;
            let checkpoint = self.snapshot(thread_id, latest_id, next_round, &registry, &state);
            self.persist_checkpoint(
                thread_id,
                checkpoint,
                CheckpointMetadata::new(CheckpointSource::Loop, next_round),
                Vec::new(),
            )
            .await?;

            reused.clear();
            resume_values.clear();
            next_round += 1;
        }
    }

    /// Persist the pause boundary: completed siblings' writes, interrupt
    /// payloads, and consumed resume values, all against the latest
    /// checkpoint. Failure outranks interruption.
    async fn pause(
        &self,
        thread_id: &str,
        latest_id: u64,
        completed: Vec<(Task, NodeOutput)>,
        interrupts: Vec<(Task, Interrupt)>,
        failures: Vec<(Task, NodeError)>,
        resume_values: &FxHashMap<String, Vec<Value>>,
    ) -> Result<RunOutcome, RunnerError> {
        // An async save for the latest checkpoint may still be in flight;
        // pending writes must not race it.
        self.drain_async_saves().await;

        for (task, output) in &completed {
            let writes = Self::encode_output_writes(output)?;
            self.record_pause_writes(thread_id, latest_id, &task.id, writes)
                .await?;
        }
        for (task, interrupt) in &interrupts {
            let consumed = resume_values.get(&task.id).cloned().unwrap_or_default();
            self.record_pause_writes(
                thread_id,
                latest_id,
                &task.id,
                vec![
                    (INTERRUPT_CHANNEL.to_string(), serde_json::to_value(interrupt)?),
                    (RESUME_CHANNEL.to_string(), Value::Array(consumed)),
                ],
            )
            .await?;
        }
        self.flush_exit(thread_id).await?;

        if let Some((task, error)) = failures.into_iter().next() {
            warn!(thread_id, node = %task.node, error = %error, "node failed");
            return Err(RunnerError::Node {
                node: task.node.to_string(),
                source: error,
            });
        }

        let mut pending: Vec<Interrupt> = interrupts.into_iter().map(|(_, i)| i).collect();
        pending.sort_by(|a, b| {
            (&a.node, &a.path, a.ordinal).cmp(&(&b.node, &b.path, b.ordinal))
        });
        info!(thread_id, pending = pending.len(), "thread interrupted");
        self.emit_diagnostic(format!("thread {thread_id} interrupted"));
        Ok(RunOutcome::Interrupted(pending))
    }

    /// Branch a new checkpoint (fork or state edit) off an existing one.
    async fn branch(
        &self,
        thread_id: &str,
        checkpoint_id: Option<u64>,
        overrides: Vec<(String, Value)>,
        source: CheckpointSource,
    ) -> Result<StoredRef, RunnerError> {
        let target = match checkpoint_id {
            Some(id) => self.store.get(thread_id, Some(id)).await?.ok_or(
                RunnerError::UnknownCheckpoint {
                    thread_id: thread_id.to_string(),
                    checkpoint_id: id,
                },
            )?,
            None => self.require_latest(thread_id).await?,
        };
        let latest_id = self.require_latest(thread_id).await?.checkpoint.id;

        let mut registry =
            ChannelRegistry::restore(self.graph.full_schema(), &target.checkpoint.values);
        let mut state = target.checkpoint.version_state();

        if !overrides.is_empty() {
            let next_version = state.max_version() + 1;
            let mut grouped: Vec<(String, Vec<Value>)> = Vec::new();
            for (channel, value) in overrides {
                if channels::is_reserved(&channel) {
                    return Err(ChannelError::invalid_update(
                        &channel,
                        "state edits may not touch engine-managed channels",
                    )
                    .into());
                }
                match grouped.iter_mut().find(|(name, _)| *name == channel) {
                    Some((_, batch)) => batch.push(value),
                    None => grouped.push((channel, vec![value])),
                }
            }
            for (channel, batch) in grouped {
                if registry.apply(&channel, batch)? {
                    state.versions.insert(channel, next_version);
                }
            }
        }

        let mut parents = FxHashMap::default();
        parents.insert(String::new(), target.checkpoint.id);
        let mut checkpoint = self.snapshot(
            thread_id,
            latest_id + 1,
            target.checkpoint.round,
            &registry,
            &state,
        );
        checkpoint.parents = parents;

        let round = checkpoint.round;
        let versions = checkpoint.versions.clone();
        // Branch points are durable immediately, whatever the durability mode.
        let stored = self
            .store
            .put(thread_id, checkpoint, CheckpointMetadata::new(source, round), versions)
            .await?;
        info!(thread_id, checkpoint_id = stored.checkpoint_id, %source, "branched checkpoint");
        Ok(stored)
    }

    fn snapshot(
        &self,
        thread_id: &str,
        id: u64,
        round: i64,
        registry: &ChannelRegistry,
        state: &VersionState,
    ) -> Checkpoint {
        Checkpoint {
            id,
            thread_id: thread_id.to_string(),
            parents: FxHashMap::default(),
            round,
            values: registry.checkpoint_values(),
            versions: state.versions.clone(),
            versions_seen: state.versions_seen.clone(),
            created_at: Utc::now(),
        }
    }

    /// Rebuild a paused round's bookkeeping from a checkpoint's pending
    /// writes: which tasks already completed (and what they produced) and
    /// which are waiting on an interrupt.
    fn pause_state(tuple: &CheckpointTuple) -> Result<PauseState, RunnerError> {
        let mut by_task: Vec<(String, Vec<(&str, &Value)>)> = Vec::new();
        for write in &tuple.pending_writes {
            if write.task_id == INPUT_TASK_ID {
                continue;
            }
            match by_task.iter_mut().find(|(id, _)| *id == write.task_id) {
                Some((_, writes)) => writes.push((&write.channel, &write.value)),
                None => by_task.push((
                    write.task_id.clone(),
                    vec![(&write.channel, &write.value)],
                )),
            }
        }

        let mut pause = PauseState::default();
        for (task_id, writes) in by_task {
            let is_interrupted = writes.iter().any(|(ch, _)| *ch == INTERRUPT_CHANNEL);
            if is_interrupted {
                let mut interrupt = None;
                let mut prior = Vec::new();
                for (channel, value) in writes {
                    match channel {
                        INTERRUPT_CHANNEL => {
                            interrupt = Some(serde_json::from_value((*value).clone())?);
                        }
                        RESUME_CHANNEL => {
                            if let Value::Array(values) = value {
                                prior = values.clone();
                            }
                        }
                        _ => {}
                    }
                }
                if let Some(interrupt) = interrupt {
                    pause.interrupted.push((task_id, interrupt, prior));
                }
            } else {
                let mut user_writes: Vec<(String, Value)> = Vec::new();
                let mut routes: Vec<Route> = Vec::new();
                for (channel, value) in writes {
                    match channel {
                        NO_WRITES_MARKER => {}
                        GOTO_CHANNEL => {
                            if let Value::String(encoded) = value {
                                routes.push(Route::Goto(NodeKind::decode(encoded)));
                            }
                        }
                        TASKS_CHANNEL => {
                            routes.push(Route::Send(serde_json::from_value(value.clone())?));
                        }
                        _ => user_writes.push((channel.to_string(), value.clone())),
                    }
                }
                pause.reused.insert(
                    task_id,
                    NodeOutput::UpdateAndGoto {
                        writes: user_writes,
                        routes,
                    },
                );
            }
        }
        pause.interrupted.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(pause)
    }

    /// Encode a completed task's output as pending writes: user writes
    /// verbatim, routing directives under reserved channels, and an explicit
    /// marker when there is nothing at all.
    fn encode_output_writes(output: &NodeOutput) -> Result<Vec<(String, Value)>, RunnerError> {
        let mut writes: Vec<(String, Value)> = output.writes().to_vec();
        for route in output.routes() {
            match route {
                Route::Goto(kind) => {
                    writes.push((GOTO_CHANNEL.to_string(), Value::String(kind.encode())));
                }
                Route::Send(packet) => {
                    writes.push((TASKS_CHANNEL.to_string(), serde_json::to_value(packet)?));
                }
            }
        }
        if writes.is_empty() {
            writes.push((NO_WRITES_MARKER.to_string(), Value::Null));
        }
        Ok(writes)
    }

    async fn persist_checkpoint(
        &self,
        thread_id: &str,
        checkpoint: Checkpoint,
        metadata: CheckpointMetadata,
        writes: Vec<(String, Vec<(String, Value)>)>,
    ) -> Result<(), RunnerError> {
        match self.config.durability {
            Durability::Sync => {
                let id = checkpoint.id;
                let versions = checkpoint.versions.clone();
                self.store
                    .put(thread_id, checkpoint, metadata, versions)
                    .await?;
                for (task_id, task_writes) in writes {
                    self.store
                        .put_writes(thread_id, id, &task_id, task_writes)
                        .await?;
                }
            }
            Durability::Async => {
                let store = self.store.clone();
                let thread = thread_id.to_string();
                let handle = tokio::spawn(async move {
                    let id = checkpoint.id;
                    let versions = checkpoint.versions.clone();
                    if let Err(error) = store.put(&thread, checkpoint, metadata, versions).await {
                        warn!(thread_id = %thread, checkpoint_id = id, %error, "async save failed");
                        return;
                    }
                    for (task_id, task_writes) in writes {
                        if let Err(error) =
                            store.put_writes(&thread, id, &task_id, task_writes).await
                        {
                            warn!(thread_id = %thread, checkpoint_id = id, %error, "async write save failed");
                        }
                    }
                });
                self.async_saves.lock().expect("saves poisoned").push(handle);
            }
            Durability::Exit => {
                self.exit_buffers
                    .lock()
                    .expect("exit buffer poisoned")
                    .entry(thread_id.to_string())
                    .or_default()
                    .push(BufferedSave {
                        checkpoint,
                        metadata,
                        writes,
                    });
            }
        }
        Ok(())
    }

    /// Attach pause-boundary writes to an already-persisted (or buffered)
    /// checkpoint.
    async fn record_pause_writes(
        &self,
        thread_id: &str,
        checkpoint_id: u64,
        task_id: &str,
        writes: Vec<(String, Value)>,
    ) -> Result<(), RunnerError> {
        if self.config.durability == Durability::Exit {
            let mut buffers = self.exit_buffers.lock().expect("exit buffer poisoned");
            if let Some(saves) = buffers.get_mut(thread_id) {
                if let Some(save) = saves
                    .iter_mut()
                    .find(|s| s.checkpoint.id == checkpoint_id)
                {
                    save.writes.push((task_id.to_string(), writes));
                    return Ok(());
                }
            }
        }
        self.store
            .put_writes(thread_id, checkpoint_id, task_id, writes)
            .await?;
        Ok(())
    }

    /// Make buffered history durable before surfacing an error, so the last
    /// committed round stays the recovery point even when the run dies
    /// between a checkpoint and the next flush boundary.
    async fn abort(&self, thread_id: &str, error: RunnerError) -> RunnerError {
        if let Err(flush_error) = self.flush_exit(thread_id).await {
            warn!(thread_id, %flush_error, "exit flush failed while aborting");
        }
        self.drain_async_saves().await;
        error
    }

    /// Flush the Exit-mode buffer for one thread. No-op in other modes.
    async fn flush_exit(&self, thread_id: &str) -> Result<(), RunnerError> {
        let saves = self
            .exit_buffers
            .lock()
            .expect("exit buffer poisoned")
            .remove(thread_id)
            .unwrap_or_default();
        for save in saves {
            let id = save.checkpoint.id;
            let versions = save.checkpoint.versions.clone();
            self.store
                .put(thread_id, save.checkpoint, save.metadata, versions)
                .await?;
            for (task_id, writes) in save.writes {
                self.store
                    .put_writes(thread_id, id, &task_id, writes)
                    .await?;
            }
        }
        Ok(())
    }

    /// Wait for outstanding background saves (Async mode).
    async fn drain_async_saves(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.async_saves.lock().expect("saves poisoned");
            guard.drain(..).collect()
        };
        for handle in handles {
            if let Err(error) = handle.await {
                warn!(%error, "async save task failed");
            }
        }
    }

    fn emit_diagnostic(&self, message: String) {
        let _ = self
            .event_bus
            .get_sender()
            .send(Event::diagnostic("runner", message));
    }
}
