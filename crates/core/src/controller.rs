//! Task lifecycle controller.
//!
//! Owns one [`CollectSession`] per task id and serializes the lifecycle calls
//! made against it. Each task moves through
//! `Uninitialized -> Loaded -> Collecting -> Unloaded`; Load is optional, so a
//! task may go straight from `Uninitialized` to `Collecting`.
//!
//! Tasks live in a sharded map. Creating a context happens under the shard
//! lock, so concurrent first accesses to the same id share one session. Each
//! task additionally carries a lifecycle lock held for the whole duration of a
//! plugin call, which gives at most one in-flight call per task while
//! unrelated tasks run in parallel.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tally_plugin_protocol::{Collector, Context, Plugin, StreamingCollector};
use tracing::{debug, info, warn};

use crate::config::TaskConfig;
use crate::registry::MetricRegistry;
use crate::session::{CallOutput, CollectSession};
use crate::stats::{ControllerSummary, TaskStats};
use crate::types::{Phase, TallyError, TallyResult};

const SHARD_COUNT: usize = 16;

/// Unloaded ids remembered per shard. Older ones are forgotten first.
const TOMBSTONES_PER_SHARD: usize = 1024;

/// How long Unload waits for an in-flight call before skipping the unload hook.
pub const DEFAULT_UNLOAD_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Uninitialized,
    Loaded,
    Collecting,
    Unloaded,
}

struct TaskSlot {
    session: Arc<CollectSession>,
    state: Mutex<TaskState>,
    stats: Mutex<TaskStats>,
}

impl TaskSlot {
    fn new(session: CollectSession) -> Self {
        Self {
            session: Arc::new(session),
            state: Mutex::new(TaskState::Uninitialized),
            stats: Mutex::new(TaskStats::default()),
        }
    }
}

/// Ids of unloaded tasks, so late calls fail with `TaskNotFound` instead of
/// silently creating a fresh context.
#[derive(Default)]
struct Tombstones {
    ids: HashSet<String>,
    order: VecDeque<String>,
}

impl Tombstones {
    fn insert(&mut self, task_id: &str) {
        if !self.ids.insert(task_id.to_string()) {
            return;
        }
        self.order.push_back(task_id.to_string());
        while self.order.len() > TOMBSTONES_PER_SHARD {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    fn remove(&mut self, task_id: &str) -> bool {
        if !self.ids.remove(task_id) {
            return false;
        }
        self.order.retain(|id| id != task_id);
        true
    }

    fn contains(&self, task_id: &str) -> bool {
        self.ids.contains(task_id)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.ids.len()
    }
}

#[derive(Default)]
struct Shard {
    tasks: HashMap<String, Arc<TaskSlot>>,
    unloaded: Tombstones,
}

pub struct TaskController {
    registry: Arc<MetricRegistry>,
    shards: Vec<Mutex<Shard>>,
    unload_timeout: Duration,
    total_loaded: AtomicU64,
    total_unloaded: AtomicU64,
    total_collect_requests: AtomicU64,
}

impl TaskController {
    #[must_use]
    pub fn new(registry: Arc<MetricRegistry>) -> Self {
        Self {
            registry,
            shards: (0..SHARD_COUNT).map(|_| Mutex::new(Shard::default())).collect(),
            unload_timeout: DEFAULT_UNLOAD_TIMEOUT,
            total_loaded: AtomicU64::new(0),
            total_unloaded: AtomicU64::new(0),
            total_collect_requests: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn with_unload_timeout(mut self, timeout: Duration) -> Self {
        self.unload_timeout = timeout;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    /// Supply the configuration and requested-metrics filter of a new task.
    ///
    /// Must happen before any other call for `task_id`. Configuring an id
    /// that was unloaded registers it as a new task.
    pub fn configure(
        &self,
        task_id: &str,
        config: TaskConfig,
        requested: Vec<String>,
    ) -> TallyResult<()> {
        let session = CollectSession::new(task_id, config, requested, Arc::clone(&self.registry))?;

        let mut shard = self.shard(task_id).lock();
        if shard.tasks.contains_key(task_id) {
            return Err(TallyError::invalid_lifecycle(
                task_id,
                "task context already exists",
            ));
        }
        if shard.unloaded.remove(task_id) {
            debug!(task_id, "Reusing id of an unloaded task");
        }
        shard
            .tasks
            .insert(task_id.to_string(), Arc::new(TaskSlot::new(session)));
        debug!(task_id, "Configured task");
        Ok(())
    }

    /// The session of `task_id`, created on first access.
    pub fn context(&self, task_id: &str) -> TallyResult<Arc<CollectSession>> {
        Ok(Arc::clone(&self.slot(task_id)?.session))
    }

    pub fn load(&self, plugin: &dyn Plugin, task_id: &str) -> TallyResult<CallOutput> {
        let slot = self.slot(task_id)?;
        let mut state = slot.state.lock();
        if slot.session.is_done() {
            return Err(TallyError::TaskNotFound(task_id.to_string()));
        }
        match *state {
            TaskState::Uninitialized => {}
            TaskState::Unloaded => return Err(TallyError::TaskNotFound(task_id.to_string())),
            TaskState::Loaded | TaskState::Collecting => {
                return Err(TallyError::invalid_lifecycle(
                    task_id,
                    format!("cannot load a task in state {:?}", *state),
                ));
            }
        }

        slot.session.begin_call();
        let result = plugin.load(slot.session.as_ref());
        let output = slot.session.drain();
        if let Err(source) = result {
            return Err(TallyError::plugin(task_id, Phase::Load, source, output));
        }

        *state = TaskState::Loaded;
        slot.stats.lock().record_load();
        self.total_loaded.fetch_add(1, Ordering::Relaxed);
        info!(task_id, "Task loaded");
        Ok(output)
    }

    pub fn collect(&self, collector: &dyn Collector, task_id: &str) -> TallyResult<CallOutput> {
        self.run_collect(task_id, |session| collector.collect(session))
    }

    /// Run a streaming collector until it returns, which it does once the
    /// task is unloaded. Output emitted meanwhile is picked up with [`Self::drain`].
    pub fn stream(
        &self,
        collector: &dyn StreamingCollector,
        task_id: &str,
    ) -> TallyResult<CallOutput> {
        self.run_collect(task_id, |session| collector.stream_collect(session))
    }

    /// Take whatever the task emitted since the last drain, without waiting
    /// for an in-flight call.
    pub fn drain(&self, task_id: &str) -> TallyResult<CallOutput> {
        let slot = self.existing_slot(task_id)?;
        let output = slot.session.drain();
        slot.stats.lock().record_streamed(output.metrics.len());
        Ok(output)
    }

    /// Unload a task. Calls for `task_id` fail with `TaskNotFound` from here on.
    ///
    /// If another call is still running after the unload timeout, the
    /// plugin's unload hook is skipped; the task is removed either way.
    pub fn unload(&self, plugin: &dyn Plugin, task_id: &str) -> TallyResult<CallOutput> {
        let slot = {
            let mut shard = self.shard(task_id).lock();
            let slot = shard
                .tasks
                .remove(task_id)
                .ok_or_else(|| TallyError::TaskNotFound(task_id.to_string()))?;
            shard.unloaded.insert(task_id);
            slot
        };
        slot.session.cancel();
        self.total_unloaded.fetch_add(1, Ordering::Relaxed);

        let Some(mut state) = slot.state.try_lock_for(self.unload_timeout) else {
            warn!(
                task_id,
                timeout = ?self.unload_timeout,
                "Task still busy after unload timeout, skipping unload hook"
            );
            return Ok(slot.session.drain());
        };

        slot.session.begin_call();
        let result = plugin.unload(slot.session.as_ref());
        *state = TaskState::Unloaded;
        info!(task_id, "Task unloaded");

        let output = slot.session.drain();
        match result {
            Ok(()) => Ok(output),
            Err(source) => Err(TallyError::plugin(task_id, Phase::Unload, source, output)),
        }
    }

    pub fn state(&self, task_id: &str) -> TallyResult<TaskState> {
        Ok(*self.existing_slot(task_id)?.state.lock())
    }

    pub fn stats(&self, task_id: &str) -> TallyResult<TaskStats> {
        Ok(self.existing_slot(task_id)?.stats.lock().clone())
    }

    /// Ids of every live task, sorted.
    #[must_use]
    pub fn task_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .shards
            .iter()
            .flat_map(|shard| shard.lock().tasks.keys().cloned().collect::<Vec<_>>())
            .collect();
        ids.sort();
        ids
    }

    #[must_use]
    pub fn active_tasks(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().tasks.len()).sum()
    }

    #[must_use]
    pub fn summary(&self) -> ControllerSummary {
        ControllerSummary {
            active_tasks: self.active_tasks(),
            total_loaded: self.total_loaded.load(Ordering::Relaxed),
            total_unloaded: self.total_unloaded.load(Ordering::Relaxed),
            total_collect_requests: self.total_collect_requests.load(Ordering::Relaxed),
        }
    }

    fn run_collect(
        &self,
        task_id: &str,
        call: impl FnOnce(&CollectSession) -> anyhow::Result<()>,
    ) -> TallyResult<CallOutput> {
        let slot = self.slot(task_id)?;
        let mut state = slot.state.lock();
        // Unloaded while this call waited for the lifecycle lock
        if *state == TaskState::Unloaded || slot.session.is_done() {
            return Err(TallyError::TaskNotFound(task_id.to_string()));
        }
        *state = TaskState::Collecting;

        slot.session.begin_call();
        let started = Instant::now();
        let result = call(slot.session.as_ref());
        let elapsed = started.elapsed();
        let output = slot.session.drain();

        slot.stats
            .lock()
            .record_collect(elapsed, output.metrics.len(), result.is_ok());
        self.total_collect_requests.fetch_add(1, Ordering::Relaxed);
        debug!(
            task_id,
            metrics = output.metrics.len(),
            warnings = output.warnings.len(),
            elapsed = ?elapsed,
            "Collect finished"
        );

        match result {
            Ok(()) => Ok(output),
            Err(source) => Err(TallyError::plugin(task_id, Phase::Collect, source, output)),
        }
    }

    fn shard(&self, task_id: &str) -> &Mutex<Shard> {
        let mut hasher = DefaultHasher::new();
        task_id.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    fn slot(&self, task_id: &str) -> TallyResult<Arc<TaskSlot>> {
        let mut shard = self.shard(task_id).lock();
        if shard.unloaded.contains(task_id) {
            return Err(TallyError::TaskNotFound(task_id.to_string()));
        }
        let slot = shard.tasks.entry(task_id.to_string()).or_insert_with(|| {
            debug!(task_id, "Creating task context");
            Arc::new(TaskSlot::new(CollectSession::unconfigured(
                task_id,
                Arc::clone(&self.registry),
            )))
        });
        Ok(Arc::clone(slot))
    }

    fn existing_slot(&self, task_id: &str) -> TallyResult<Arc<TaskSlot>> {
        self.shard(task_id)
            .lock()
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| TallyError::TaskNotFound(task_id.to_string()))
    }
}
