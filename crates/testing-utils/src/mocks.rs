//! Mock implementations for the engine's collaborator traits
//!
//! In-memory doubles for the task store, notification sink, unit registry,
//! runnable units and listeners, so scheduler and tracker tests run without
//! a database or network.

use async_trait::async_trait;
use jobrunner_core::{SchedulerError, SchedulerResult};
use jobrunner_domain::{
    ExecutionOutcome, JobExecution, JobListener, LifecycleEvent, LifecycleListener,
    NotificationSink, ParameterValues, RunnableUnit, StatusChangedEvent, TaskRecord, TaskStore,
    UnitContext, UnitDescriptor, UnitFactory, UnitRegistry,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock task store that keeps every persisted version of each record
#[derive(Debug, Clone, Default)]
pub struct MockTaskStore {
    records: Arc<Mutex<HashMap<String, TaskRecord>>>,
    history: Arc<Mutex<Vec<TaskRecord>>>,
}

impl MockTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn all(&self) -> Vec<TaskRecord> {
        let mut records: Vec<TaskRecord> = self.records.lock().unwrap().values().cloned().collect();
        records.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        records
    }

    pub fn record(&self, identifier: &str) -> Option<TaskRecord> {
        self.records.lock().unwrap().get(identifier).cloned()
    }

    /// Every version written for `identifier`, in write order
    pub fn history(&self, identifier: &str) -> Vec<TaskRecord> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.identifier == identifier)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl TaskStore for MockTaskStore {
    async fn create(&self, task: &TaskRecord) -> SchedulerResult<()> {
        let mut records = self.records.lock().unwrap();
        if records.contains_key(&task.identifier) {
            return Err(SchedulerError::store_error(format!(
                "duplicate task record: {}",
                task.identifier
            )));
        }
        records.insert(task.identifier.clone(), task.clone());
        self.history.lock().unwrap().push(task.clone());
        Ok(())
    }

    async fn get(&self, identifier: &str) -> SchedulerResult<Option<TaskRecord>> {
        Ok(self.record(identifier))
    }

    async fn update(&self, task: &TaskRecord) -> SchedulerResult<()> {
        let mut records = self.records.lock().unwrap();
        if !records.contains_key(&task.identifier) {
            return Err(SchedulerError::store_error(format!(
                "task record not found: {}",
                task.identifier
            )));
        }
        records.insert(task.identifier.clone(), task.clone());
        self.history.lock().unwrap().push(task.clone());
        Ok(())
    }

    async fn list_by_parameter(&self, task_parameter_id: i64) -> SchedulerResult<Vec<TaskRecord>> {
        Ok(self
            .all()
            .into_iter()
            .filter(|r| r.task_parameter_id == Some(task_parameter_id))
            .collect())
    }
}

/// Task store whose every operation fails, simulating an outage
#[derive(Debug, Clone, Default)]
pub struct FailingTaskStore {
    attempts: Arc<AtomicUsize>,
}

impl FailingTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn fail(&self) -> SchedulerError {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        SchedulerError::store_error("store unavailable")
    }
}

#[async_trait]
impl TaskStore for FailingTaskStore {
    async fn create(&self, _task: &TaskRecord) -> SchedulerResult<()> {
        Err(self.fail())
    }

    async fn get(&self, _identifier: &str) -> SchedulerResult<Option<TaskRecord>> {
        Err(self.fail())
    }

    async fn update(&self, _task: &TaskRecord) -> SchedulerResult<()> {
        Err(self.fail())
    }

    async fn list_by_parameter(&self, _task_parameter_id: i64) -> SchedulerResult<Vec<TaskRecord>> {
        Err(self.fail())
    }
}

/// Task store that fails while marked down and delegates to a [`MockTaskStore`] otherwise
#[derive(Debug, Clone, Default)]
pub struct FlakyTaskStore {
    inner: MockTaskStore,
    down: Arc<AtomicBool>,
}

impl FlakyTaskStore {
    /// A store that starts out unavailable
    pub fn down() -> Self {
        let store = Self::default();
        store.set_down(true);
        store
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &MockTaskStore {
        &self.inner
    }

    fn check(&self) -> SchedulerResult<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(SchedulerError::store_error("store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for FlakyTaskStore {
    async fn create(&self, task: &TaskRecord) -> SchedulerResult<()> {
        self.check()?;
        self.inner.create(task).await
    }

    async fn get(&self, identifier: &str) -> SchedulerResult<Option<TaskRecord>> {
        self.check()?;
        self.inner.get(identifier).await
    }

    async fn update(&self, task: &TaskRecord) -> SchedulerResult<()> {
        self.check()?;
        self.inner.update(task).await
    }

    async fn list_by_parameter(&self, task_parameter_id: i64) -> SchedulerResult<Vec<TaskRecord>> {
        self.check()?;
        self.inner.list_by_parameter(task_parameter_id).await
    }
}

/// Notification sink that records every published event
#[derive(Debug, Clone, Default)]
pub struct RecordingNotificationSink {
    events: Arc<Mutex<Vec<StatusChangedEvent>>>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StatusChangedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn events_for(&self, identifier: &str) -> Vec<StatusChangedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.task.identifier == identifier)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotificationSink {
    async fn publish(&self, event: StatusChangedEvent) -> SchedulerResult<()> {
        self.events.lock().unwrap().push(event);
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct FailingNotificationSink;

#[async_trait]
impl NotificationSink for FailingNotificationSink {
    async fn publish(&self, _event: StatusChangedEvent) -> SchedulerResult<()> {
        Err(SchedulerError::Notification("bus unavailable".to_string()))
    }
}

/// One step of a [`ScriptedUnit`]
#[derive(Debug, Clone)]
pub enum Step {
    Emit(LifecycleEvent),
    Sleep(Duration),
    /// Return an error without emitting `failed`
    Fail(String),
    Panic(String),
    /// Block until interrupted, then return an error
    WaitForInterrupt,
}

/// Runnable unit that replays a fixed list of steps
pub struct ScriptedUnit {
    descriptor: UnitDescriptor,
    steps: Vec<Step>,
    interruptible: bool,
    runs: Arc<AtomicUsize>,
}

impl ScriptedUnit {
    pub fn new(code: &str, steps: Vec<Step>) -> Self {
        Self {
            descriptor: UnitDescriptor::new("local", code),
            steps,
            interruptible: true,
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_descriptor(mut self, descriptor: UnitDescriptor) -> Self {
        self.descriptor = descriptor;
        self
    }

    pub fn interruptible(mut self, interruptible: bool) -> Self {
        self.interruptible = interruptible;
        self
    }

    pub fn run_count(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RunnableUnit for ScriptedUnit {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    fn supports_interrupt(&self) -> bool {
        self.interruptible
    }

    async fn run(&self, ctx: UnitContext) -> SchedulerResult<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        for step in &self.steps {
            match step {
                Step::Emit(event) => ctx.emit(event.clone()).await,
                Step::Sleep(duration) => {
                    if self.interruptible {
                        tokio::select! {
                            _ = tokio::time::sleep(*duration) => {}
                            _ = ctx.interrupted() => {
                                return Err(SchedulerError::Interrupted(ctx.run_id().to_string()));
                            }
                        }
                    } else {
                        tokio::time::sleep(*duration).await;
                    }
                }
                Step::Fail(message) => {
                    return Err(SchedulerError::TaskExecution(message.clone()));
                }
                Step::Panic(message) => panic!("{}", message),
                Step::WaitForInterrupt => {
                    ctx.interrupted().await;
                    return Err(SchedulerError::Interrupted(ctx.run_id().to_string()));
                }
            }
        }
        Ok(())
    }
}

/// Factory creating a fresh [`ScriptedUnit`] per call
pub struct ScriptedUnitFactory {
    descriptor: UnitDescriptor,
    steps: Vec<Step>,
    created: Arc<AtomicUsize>,
    last_parameters: Arc<Mutex<Option<ParameterValues>>>,
}

impl ScriptedUnitFactory {
    pub fn new(descriptor: UnitDescriptor, steps: Vec<Step>) -> Self {
        Self {
            descriptor,
            steps,
            created: Arc::new(AtomicUsize::new(0)),
            last_parameters: Arc::new(Mutex::new(None)),
        }
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn last_parameters(&self) -> Option<ParameterValues> {
        self.last_parameters.lock().unwrap().clone()
    }
}

#[async_trait]
impl UnitFactory for ScriptedUnitFactory {
    fn descriptor(&self) -> &UnitDescriptor {
        &self.descriptor
    }

    async fn create(&self, parameters: ParameterValues) -> SchedulerResult<Arc<dyn RunnableUnit>> {
        self.created.fetch_add(1, Ordering::SeqCst);
        *self.last_parameters.lock().unwrap() = Some(parameters);
        Ok(Arc::new(
            ScriptedUnit::new(&self.descriptor.code, self.steps.clone())
                .with_descriptor(self.descriptor.clone()),
        ))
    }
}

/// Registry backed by a fixed map of factories
#[derive(Default)]
pub struct StaticUnitRegistry {
    factories: HashMap<(String, String), Arc<dyn UnitFactory>>,
}

impl StaticUnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_factory(mut self, factory: Arc<dyn UnitFactory>) -> Self {
        let descriptor = factory.descriptor();
        self.factories.insert(
            (descriptor.authority.clone(), descriptor.code.clone()),
            factory,
        );
        self
    }
}

#[async_trait]
impl UnitRegistry for StaticUnitRegistry {
    async fn describe(
        &self,
        authority: &str,
        code: &str,
    ) -> SchedulerResult<Option<Arc<dyn UnitFactory>>> {
        Ok(self
            .factories
            .get(&(authority.to_string(), code.to_string()))
            .cloned())
    }
}

/// Lifecycle listener capturing every callback it receives
#[derive(Debug, Clone)]
pub struct RecordingLifecycleListener {
    name: String,
    events: Arc<Mutex<Vec<(String, LifecycleEvent)>>>,
}

impl RecordingLifecycleListener {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// `(run_id, event_type)` pairs in arrival order
    pub fn events(&self) -> Vec<(String, String)> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(run_id, event)| (run_id.clone(), event.event_type().to_string()))
            .collect()
    }

    pub fn payloads(&self) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|(_, event)| event.clone())
            .collect()
    }
}

#[async_trait]
impl LifecycleListener for RecordingLifecycleListener {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_event(&self, run_id: &str, event: &LifecycleEvent) {
        self.events
            .lock()
            .unwrap()
            .push((run_id.to_string(), event.clone()));
    }
}

/// Job listener capturing executions and their outcomes
#[derive(Debug, Clone)]
pub struct RecordingJobListener {
    name: String,
    to_be_executed: Arc<Mutex<Vec<String>>>,
    executed: Arc<Mutex<Vec<(String, ExecutionOutcome)>>>,
}

impl RecordingJobListener {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            to_be_executed: Arc::new(Mutex::new(Vec::new())),
            executed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn to_be_executed(&self) -> Vec<String> {
        self.to_be_executed.lock().unwrap().clone()
    }

    pub fn executed(&self) -> Vec<(String, ExecutionOutcome)> {
        self.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl JobListener for RecordingJobListener {
    fn name(&self) -> &str {
        &self.name
    }

    async fn job_to_be_executed(&self, execution: &JobExecution) {
        self.to_be_executed
            .lock()
            .unwrap()
            .push(execution.run_id.clone());
    }

    async fn job_was_executed(&self, execution: &JobExecution, outcome: &ExecutionOutcome) {
        self.executed
            .lock()
            .unwrap()
            .push((execution.run_id.clone(), outcome.clone()));
    }
}
