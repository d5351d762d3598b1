//! Task admission and lifecycle.
//!
//! All scheduler state sits behind one `parking_lot::Mutex`. The lock covers
//! list and allocation changes only; compilation and every executor RPC run
//! without it, so `add_task` never waits on the network.
//!
//! Lifecycle: `add_task` → Todos → `run_task` allocates executors, moves the
//! task to Doings and dispatches it → `poll_running` (or `finish_task`) moves
//! it to Dones or Fails and returns its executors to the pool.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use quarry_core::prelude::{EngineConfig, Location, TaskId};
use quarry_exec::ExecutorState;
use quarry_plan::{create_eplan, executor_number, EPlanNode, Instruction, LogicalPlan, PlanError, QueryCompiler};
use quarry_split::Split;
use tracing::{debug, info, warn};

use crate::client::ExecutorClient;
use crate::dispatch::dispatch;
use crate::error::{Result, SchedError};
use crate::sizing::max_parallelism;
use crate::task::{Task, TaskList, TaskStatus};
use crate::topology::Topology;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Nothing queued.
    Idle,
    /// The head task needs more executors than are free; it stays queued.
    Waiting {
        task_id: TaskId,
        required: usize,
        free: usize,
    },
    Dispatched {
        task_id: TaskId,
        parallelism: usize,
        executors: usize,
    },
}

#[derive(Default)]
struct State {
    todos: TaskList,
    doings: TaskList,
    dones: TaskList,
    fails: TaskList,
    /// Executor name → task holding it.
    allocated: HashMap<String, TaskId>,
    results: HashMap<TaskId, Split>,
    next_id: u64,
}

impl State {
    fn find(&self, id: TaskId) -> Option<&Task> {
        self.todos
            .get(id)
            .or_else(|| self.doings.get(id))
            .or_else(|| self.dones.get(id))
            .or_else(|| self.fails.get(id))
    }

    /// Move a task out of Doings and free its executors. Rows, when given,
    /// become visible together with the Done status.
    fn finish(
        &mut self,
        task_id: TaskId,
        success: bool,
        message: Option<String>,
        rows: Option<Split>,
    ) -> Result<()> {
        let mut task = self.doings.remove(task_id).ok_or_else(|| self.not_doing(task_id))?;
        task.error = message;
        if success {
            task.status = TaskStatus::Done;
            self.dones.push(task);
        } else {
            task.status = TaskStatus::Failed;
            self.fails.push(task);
        }
        if let Some(split) = rows {
            debug!(task = %task_id, rows = split.num_rows(), "results collected");
            self.results.insert(task_id, split);
        }
        let released = self.release(task_id);
        info!(task = %task_id, success, released, "task finished");
        Ok(())
    }

    fn release(&mut self, id: TaskId) -> usize {
        let before = self.allocated.len();
        self.allocated.retain(|_, holder| *holder != id);
        before - self.allocated.len()
    }

    fn not_doing(&self, id: TaskId) -> SchedError {
        match self.find(id) {
            Some(t) => SchedError::InvalidState {
                task_id: id,
                status: t.status.to_string(),
                expected: "doing",
            },
            None => SchedError::UnknownTask(id),
        }
    }
}

enum Verdict {
    Running,
    Done,
    Failed(String),
}

pub struct Scheduler {
    config: EngineConfig,
    compiler: Arc<dyn QueryCompiler>,
    topology: Arc<dyn Topology>,
    client: Arc<dyn ExecutorClient>,
    state: Mutex<State>,
}

impl Scheduler {
    pub fn new(
        config: EngineConfig,
        compiler: Arc<dyn QueryCompiler>,
        topology: Arc<dyn Topology>,
        client: Arc<dyn ExecutorClient>,
    ) -> Self {
        Self {
            config,
            compiler,
            topology,
            client,
            state: Mutex::new(State::default()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Compile and queue a query. A query that does not compile is recorded
    /// in Fails and never queued.
    pub fn add_task(&self, query: &str, catalog: &str, schema: &str, priority: i32) -> Result<TaskId> {
        let task_id = {
            let mut st = self.state.lock();
            st.next_id += 1;
            TaskId::new(st.next_id)
        };
        let mut task = Task::new(task_id, query, catalog, schema, priority);

        let compiled = self
            .compiler
            .compile(query, catalog, schema)
            .and_then(|plan| executor_number(&plan, 1).map(|n| (plan, n)));

        let mut st = self.state.lock();
        match compiled {
            Ok((plan, required)) => {
                task.plan = Some(plan);
                task.executor_number = required;
                info!(task = %task_id, priority, required, "task queued");
                st.todos.insert_sorted(task);
                Ok(task_id)
            }
            Err(source) => {
                warn!(task = %task_id, error = %source, "task rejected");
                task.status = TaskStatus::Failed;
                task.error = Some(source.to_string());
                st.fails.push(task);
                Err(SchedError::Compile { task_id, source })
            }
        }
    }

    /// Try to start the head of Todos. Non-blocking on capacity: a head
    /// that does not fit is left in place and `Waiting` is returned.
    pub fn run_task(&self) -> Result<RunOutcome> {
        let (task_id, parallelism, nodes) = {
            let mut st = self.state.lock();
            let free = self.free_locations(&st);
            let Some(head) = st.todos.top() else {
                return Ok(RunOutcome::Idle);
            };
            let task_id = head.id;
            let required = head.executor_number;
            let waiting = RunOutcome::Waiting {
                task_id,
                required,
                free: free.len(),
            };
            if required > free.len() {
                debug!(task = %task_id, required, free = free.len(), "waiting for executors");
                return Ok(waiting);
            }
            let plan = head.plan.clone().ok_or_else(|| SchedError::InvalidState {
                task_id,
                status: "queued without a plan".into(),
                expected: "todo",
            })?;
            let Some(p) = max_parallelism(
                &plan,
                free.len(),
                self.config.min_parallelism,
                self.config.max_parallelism,
            )?
            else {
                return Ok(waiting);
            };

            let Some(mut task) = st.todos.pop() else {
                return Ok(RunOutcome::Idle);
            };
            let (nodes, root) = match build_nodes(&plan, free, p, &task) {
                Ok(built) => built,
                Err(e) => {
                    warn!(task = %task_id, error = %e, "could not build physical plan");
                    task.status = TaskStatus::Failed;
                    task.error = Some(e.to_string());
                    st.fails.push(task);
                    return Err(e.into());
                }
            };

            for (location, _) in &nodes {
                st.allocated.insert(location.name.clone(), task_id);
            }
            task.status = TaskStatus::Doing;
            task.parallelism = p;
            task.executor_number = nodes.len();
            task.executors = nodes.iter().map(|(l, _)| l.clone()).collect();
            task.root = Some(root);
            info!(task = %task_id, parallelism = p, executors = nodes.len(), "task allocated");
            st.doings.push(task);
            (task_id, p, nodes)
        };

        match dispatch(self.client.as_ref(), task_id, &nodes, self.config.dispatch_mode) {
            Ok(()) => {
                if let Some(task) = self.state.lock().doings.get_mut(task_id) {
                    task.dispatched = true;
                }
                Ok(RunOutcome::Dispatched {
                    task_id,
                    parallelism,
                    executors: nodes.len(),
                })
            }
            Err(failure) => {
                if self.config.abort_on_dispatch_failure {
                    for location in &failure.contacted {
                        if let Err(e) = self.client.abort(location, task_id) {
                            warn!(task = %task_id, executor = %location.name, error = %e, "abort failed");
                        }
                    }
                }
                let mut st = self.state.lock();
                if let Some(mut task) = st.doings.remove(task_id) {
                    task.status = TaskStatus::Failed;
                    task.error = Some(format!(
                        "{} failed on {}: {}",
                        failure.phase, failure.location.name, failure.source
                    ));
                    st.fails.push(task);
                }
                if self.config.abort_on_dispatch_failure {
                    let released = st.release(task_id);
                    debug!(task = %task_id, released, "executors released after failed dispatch");
                }
                Err(SchedError::Dispatch {
                    task_id,
                    phase: failure.phase,
                    location: failure.location.name,
                    source: failure.source,
                })
            }
        }
    }

    /// Move a running task to Dones or Fails and free its executors.
    pub fn finish_task(&self, task_id: TaskId, success: bool, message: Option<String>) -> Result<()> {
        self.state.lock().finish(task_id, success, message, None)
    }

    /// Return the executors still held by `task_id` to the pool. Needed for
    /// failed dispatches when `abort_on_dispatch_failure` is off.
    pub fn release_executors(&self, task_id: TaskId) -> usize {
        self.state.lock().release(task_id)
    }

    /// Ask every executor of every dispatched task for its state. A task
    /// whose executors are all `Done` finishes (its root output is kept for
    /// `fetch_results`). One `Failed` executor, or one that no longer holds
    /// the task (restarted, or reset by someone else), fails the task.
    /// Executors of finished tasks are reset with `Abort` and released.
    /// Returns the ids of the tasks that finished.
    pub fn poll_running(&self) -> Result<Vec<TaskId>> {
        let running: Vec<(TaskId, Vec<Location>, Option<Location>)> = {
            let st = self.state.lock();
            st.doings
                .iter()
                .filter(|t| t.dispatched)
                .map(|t| (t.id, t.executors.clone(), t.root.clone()))
                .collect()
        };

        let mut finished = Vec::new();
        for (task_id, executors, root) in running {
            let mut verdict = Verdict::Done;
            for location in &executors {
                match self.client.status(location) {
                    Ok(report) if report.task_id != Some(task_id) => {
                        let holds = match report.task_id {
                            Some(other) => format!("task {other}"),
                            None => "no task".to_string(),
                        };
                        verdict = Verdict::Failed(format!(
                            "{}: executor lost task {task_id} ({} with {holds})",
                            location.name, report.state
                        ));
                        break;
                    }
                    Ok(report) => match report.state {
                        ExecutorState::Done => {}
                        ExecutorState::Failed => {
                            verdict = Verdict::Failed(format!(
                                "{}: {}",
                                location.name,
                                report.error.unwrap_or_else(|| "failed".into())
                            ));
                            break;
                        }
                        _ => verdict = Verdict::Running,
                    },
                    Err(e) => {
                        verdict = Verdict::Failed(format!("{}: {e}", location.name));
                        break;
                    }
                }
            }

            let mut results = None;
            if matches!(verdict, Verdict::Done) {
                if let Some(root) = &root {
                    match self.client.fetch_results(root, task_id) {
                        Ok(split) => results = Some(split),
                        Err(e) => {
                            verdict = Verdict::Failed(format!("fetching results from {}: {e}", root.name))
                        }
                    }
                }
            }
            let (success, message) = match verdict {
                Verdict::Running => continue,
                Verdict::Done => (true, None),
                Verdict::Failed(m) => (false, Some(m)),
            };

            for location in &executors {
                if let Err(e) = self.client.abort(location, task_id) {
                    warn!(task = %task_id, executor = %location.name, error = %e, "reset failed");
                }
            }
            if let Err(e) = self.state.lock().finish(task_id, success, message, results) {
                warn!(task = %task_id, error = %e, "task left doings while polling");
                continue;
            }
            finished.push(task_id);
        }
        Ok(finished)
    }

    /// Rows produced by a finished task.
    pub fn fetch_results(&self, task_id: TaskId) -> Result<Split> {
        let root = {
            let st = self.state.lock();
            if let Some(split) = st.results.get(&task_id) {
                return Ok(split.clone());
            }
            let task = st.find(task_id).ok_or(SchedError::UnknownTask(task_id))?;
            if task.status != TaskStatus::Done {
                return Err(SchedError::InvalidState {
                    task_id,
                    status: task.status.to_string(),
                    expected: "done",
                });
            }
            task.root.clone().ok_or_else(|| SchedError::InvalidState {
                task_id,
                status: "done without a root executor".into(),
                expected: "done",
            })?
        };
        let split = self.client.fetch_results(&root, task_id)?;
        self.state.lock().results.insert(task_id, split.clone());
        Ok(split)
    }

    pub fn task(&self, task_id: TaskId) -> Option<Task> {
        self.state.lock().find(task_id).cloned()
    }

    pub fn todos(&self) -> Vec<Task> {
        self.state.lock().todos.to_vec()
    }

    pub fn doings(&self) -> Vec<Task> {
        self.state.lock().doings.to_vec()
    }

    pub fn dones(&self) -> Vec<Task> {
        self.state.lock().dones.to_vec()
    }

    pub fn fails(&self) -> Vec<Task> {
        self.state.lock().fails.to_vec()
    }

    /// Healthy executors not held by any task.
    pub fn free_executors(&self) -> Vec<Location> {
        let st = self.state.lock();
        self.free_locations(&st)
    }

    fn free_locations(&self, st: &State) -> Vec<Location> {
        self.topology
            .executors()
            .into_iter()
            .filter(|e| e.is_healthy() && !st.allocated.contains_key(&e.location.name))
            .map(|e| e.location)
            .collect()
    }
}

type Dispatchable = (Vec<(Location, Instruction)>, Location);

/// Physical plan at parallelism `p` on the first free locations: each
/// executor with its instruction, plus the root's location.
fn build_nodes(
    plan: &LogicalPlan,
    mut free: Vec<Location>,
    p: usize,
    task: &Task,
) -> std::result::Result<Dispatchable, PlanError> {
    let mut enodes: Vec<EPlanNode> = Vec::new();
    let root = create_eplan(plan, &mut enodes, &mut free, p)?;
    let nodes = enodes
        .iter()
        .map(|node| -> std::result::Result<_, PlanError> {
            let instruction = Instruction::new(task.id, &task.catalog, &task.schema, node)?;
            Ok((node.location.clone(), instruction))
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((nodes, root.location))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Phase;
    use crate::testing::{Call, RecordingClient};
    use crate::topology::StaticTopology;
    use quarry_core::prelude::{DataType, Field, Metadata, Value};
    use quarry_exec::{RpcError, StatusReport};
    use quarry_plan::PipelineCompiler;

    const SORTED: &str = r#"
steps:
  - op: scan
    table: t
    partitions: 2
    columns: [ { name: a, type: Int64 } ]
  - op: order_by
    items: ["a desc"]
"#;

    const SCAN: &str = r#"
steps:
  - op: scan
    table: t
    partitions: 4
    columns: [ { name: a, type: Int64 } ]
"#;

    struct Fixture {
        sched: Scheduler,
        client: Arc<RecordingClient>,
        topology: Arc<StaticTopology>,
    }

    fn fixture(executors: usize, config: EngineConfig) -> Fixture {
        let topology = Arc::new(StaticTopology::new(
            (0..executors).map(|i| Location::new(format!("e{i}"), "127.0.0.1", 7000 + i as u16)),
        ));
        let client = Arc::new(RecordingClient::new());
        let sched = Scheduler::new(
            config,
            Arc::new(PipelineCompiler::new()),
            topology.clone(),
            client.clone(),
        );
        Fixture {
            sched,
            client,
            topology,
        }
    }

    #[test]
    fn bad_query_goes_straight_to_fails() {
        let f = fixture(4, EngineConfig::default());
        let err = f.sched.add_task("steps: [ { op: nope } ]", "c", "s", 0).unwrap_err();
        assert!(matches!(err, SchedError::Compile { .. }));
        assert!(f.sched.todos().is_empty());
        assert_eq!(f.sched.fails().len(), 1);
        assert_eq!(f.sched.fails()[0].status, TaskStatus::Failed);
    }

    #[test]
    fn todos_follow_priority() {
        let f = fixture(4, EngineConfig::default());
        let low = f.sched.add_task(SCAN, "c", "s", 1).unwrap();
        let high = f.sched.add_task(SCAN, "c", "s", 9).unwrap();
        let low2 = f.sched.add_task(SCAN, "c", "s", 1).unwrap();
        let ids: Vec<TaskId> = f.sched.todos().iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![high, low, low2]);
    }

    #[test]
    fn empty_queue_is_idle() {
        let f = fixture(4, EngineConfig::default());
        assert_eq!(f.sched.run_task().unwrap(), RunOutcome::Idle);
    }

    #[test]
    fn too_few_executors_leaves_task_queued() {
        let f = fixture(2, EngineConfig::default());
        let id = f.sched.add_task(SORTED, "c", "s", 0).unwrap();
        assert_eq!(
            f.sched.run_task().unwrap(),
            RunOutcome::Waiting {
                task_id: id,
                required: 3,
                free: 2
            }
        );
        assert_eq!(f.sched.todos().len(), 1);
        assert!(f.client.calls().is_empty());
    }

    #[test]
    fn dispatch_uses_largest_parallelism_that_fits() {
        let f = fixture(10, EngineConfig::default());
        let id = f.sched.add_task(SORTED, "c", "s", 0).unwrap();
        // min(p, 2) scans + p local sorts + 1 merge <= 10  =>  p = 7
        assert_eq!(
            f.sched.run_task().unwrap(),
            RunOutcome::Dispatched {
                task_id: id,
                parallelism: 7,
                executors: 10
            }
        );
        assert!(f.sched.free_executors().is_empty());
        let task = f.sched.task(id).unwrap();
        assert_eq!(task.status, TaskStatus::Doing);
        assert!(task.root.is_some());
        let dispatched = f.client.calls().iter().filter(|c| c.phase().is_some()).count();
        assert_eq!(dispatched, 40);
    }

    #[test]
    fn unhealthy_executors_are_not_allocated() {
        let f = fixture(3, EngineConfig::default());
        f.topology.set_status("e1", 1);
        assert_eq!(f.sched.free_executors().len(), 2);
        f.sched.add_task(SORTED, "c", "s", 0).unwrap();
        assert!(matches!(f.sched.run_task().unwrap(), RunOutcome::Waiting { .. }));
    }

    #[test]
    fn failed_dispatch_aborts_and_frees_executors() {
        let f = fixture(3, EngineConfig::default());
        let id = f.sched.add_task(SORTED, "c", "s", 0).unwrap();
        f.client.fail_on(Phase::SetupReaders, "e1");
        let err = f.sched.run_task().unwrap_err();
        assert!(matches!(err, SchedError::Dispatch { phase: Phase::SetupReaders, .. }));

        let aborts = f
            .client
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Abort(_, t) if *t == id))
            .count();
        assert_eq!(aborts, 3);
        assert!(!f.client.calls().contains(&Call::Dispatch(Phase::Run, "e0".into())));
        assert_eq!(f.sched.free_executors().len(), 3);
        assert_eq!(f.sched.task(id).unwrap().status, TaskStatus::Failed);
    }

    #[test]
    fn failed_dispatch_without_abort_keeps_executors() {
        let config = EngineConfig {
            abort_on_dispatch_failure: false,
            ..Default::default()
        };
        let f = fixture(3, config);
        let id = f.sched.add_task(SORTED, "c", "s", 0).unwrap();
        f.client.fail_on(Phase::SendInstruction, "e0");
        assert!(f.sched.run_task().is_err());
        assert!(f.sched.free_executors().is_empty());
        assert!(!f.client.calls().iter().any(|c| matches!(c, Call::Abort(..))));
        assert_eq!(f.sched.release_executors(id), 3);
        assert_eq!(f.sched.free_executors().len(), 3);
    }

    #[test]
    fn poll_finishes_task_and_keeps_results() {
        let f = fixture(3, EngineConfig::default());
        let id = f.sched.add_task(SORTED, "c", "s", 0).unwrap();
        f.sched.run_task().unwrap();
        assert!(f.sched.poll_running().unwrap().is_empty());

        let task = f.sched.task(id).unwrap();
        let root = task.root.clone().unwrap();
        let md = Metadata::new(vec![Field::new("a", DataType::Int64)]);
        let mut split = Split::new(md);
        split.append_row(vec![Value::I64(5)]).unwrap();
        f.client.set_results(&root.name, split);
        f.client.set_all(&task.executors, ExecutorState::Done);

        assert_eq!(f.sched.poll_running().unwrap(), vec![id]);
        assert_eq!(f.sched.task(id).unwrap().status, TaskStatus::Done);
        assert_eq!(f.sched.free_executors().len(), 3);
        assert_eq!(f.sched.fetch_results(id).unwrap().num_rows(), 1);
    }

    #[test]
    fn poll_fails_task_on_executor_failure() {
        let f = fixture(3, EngineConfig::default());
        let id = f.sched.add_task(SORTED, "c", "s", 0).unwrap();
        f.sched.run_task().unwrap();
        f.client.set_state("e2", ExecutorState::Failed, Some("disk on fire"));

        assert_eq!(f.sched.poll_running().unwrap(), vec![id]);
        let task = f.sched.task(id).unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.unwrap().contains("disk on fire"));
        assert!(matches!(
            f.sched.fetch_results(id),
            Err(SchedError::InvalidState { .. })
        ));
    }

    #[test]
    fn executor_that_lost_its_task_fails_the_task() {
        let f = fixture(3, EngineConfig::default());
        let id = f.sched.add_task(SORTED, "c", "s", 0).unwrap();
        f.sched.run_task().unwrap();
        let task = f.sched.task(id).unwrap();
        assert!(task.dispatched);

        f.client.set_all(&task.executors, ExecutorState::Done);
        f.client.restart(&task.executors[0].name);

        assert_eq!(f.sched.poll_running().unwrap(), vec![id]);
        let failed = f.sched.task(id).unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
        let error = failed.error.unwrap();
        assert!(error.contains("lost task"), "{error}");
        assert!(error.starts_with(&task.executors[0].name));
        assert_eq!(f.sched.free_executors().len(), 3);
        assert!(f.sched.poll_running().unwrap().is_empty());
    }

    #[test]
    fn failed_dispatch_never_marks_a_task_dispatched() {
        let f = fixture(3, EngineConfig::default());
        let id = f.sched.add_task(SORTED, "c", "s", 0).unwrap();
        f.client.fail_on(Phase::Run, "e2");
        assert!(f.sched.run_task().is_err());
        assert!(!f.sched.task(id).unwrap().dispatched);
    }

    /// Finishes one task through the scheduler when its executors are reset,
    /// the way a concurrent caller of `finish_task` would.
    struct RacingClient {
        inner: RecordingClient,
        sched: Mutex<Option<Arc<Scheduler>>>,
        target: Mutex<Option<TaskId>>,
    }

    impl ExecutorClient for RacingClient {
        fn send_instruction(&self, location: &Location, instruction: &Instruction) -> std::result::Result<(), RpcError> {
            self.inner.send_instruction(location, instruction)
        }

        fn setup_writers(&self, location: &Location) -> std::result::Result<(), RpcError> {
            self.inner.setup_writers(location)
        }

        fn setup_readers(&self, location: &Location) -> std::result::Result<(), RpcError> {
            self.inner.setup_readers(location)
        }

        fn run(&self, location: &Location) -> std::result::Result<(), RpcError> {
            self.inner.run(location)
        }

        fn abort(&self, location: &Location, task_id: TaskId) -> std::result::Result<(), RpcError> {
            let hit = {
                let mut target = self.target.lock();
                if *target == Some(task_id) {
                    target.take()
                } else {
                    None
                }
            };
            if let Some(id) = hit {
                let sched = self.sched.lock().clone();
                if let Some(sched) = sched {
                    sched.finish_task(id, false, Some("cancelled".into())).unwrap();
                }
            }
            self.inner.abort(location, task_id)
        }

        fn status(&self, location: &Location) -> std::result::Result<StatusReport, RpcError> {
            self.inner.status(location)
        }

        fn fetch_results(&self, location: &Location, task_id: TaskId) -> std::result::Result<Split, RpcError> {
            self.inner.fetch_results(location, task_id)
        }
    }

    #[test]
    fn task_finished_elsewhere_does_not_stop_the_poll() {
        let topology = Arc::new(StaticTopology::new(
            (0..6).map(|i| Location::new(format!("e{i}"), "127.0.0.1", 7100 + i as u16)),
        ));
        let client = Arc::new(RacingClient {
            inner: RecordingClient::new(),
            sched: Mutex::new(None),
            target: Mutex::new(None),
        });
        let config = EngineConfig {
            max_parallelism: 1,
            ..Default::default()
        };
        let sched = Arc::new(Scheduler::new(
            config,
            Arc::new(PipelineCompiler::new()),
            topology,
            client.clone(),
        ));
        *client.sched.lock() = Some(sched.clone());

        let first = sched.add_task(SORTED, "c", "s", 0).unwrap();
        let second = sched.add_task(SORTED, "c", "s", 0).unwrap();
        sched.run_task().unwrap();
        sched.run_task().unwrap();
        assert!(sched.free_executors().is_empty());

        let md = Metadata::new(vec![Field::new("a", DataType::Int64)]);
        for id in [first, second] {
            let task = sched.task(id).unwrap();
            client.inner.set_all(&task.executors, ExecutorState::Done);
            client.inner.set_results(&task.root.unwrap().name, Split::new(md.clone()));
        }
        *client.target.lock() = Some(first);

        assert_eq!(sched.poll_running().unwrap(), vec![second]);
        let first_task = sched.task(first).unwrap();
        assert_eq!(first_task.status, TaskStatus::Failed);
        assert_eq!(first_task.error.as_deref(), Some("cancelled"));
        assert_eq!(sched.task(second).unwrap().status, TaskStatus::Done);
        assert_eq!(sched.free_executors().len(), 6);
        assert!(matches!(
            sched.fetch_results(first),
            Err(SchedError::InvalidState { .. })
        ));

        // break the scheduler <-> client cycle
        client.sched.lock().take();
    }

    #[test]
    fn finish_task_checks_state() {
        let f = fixture(4, EngineConfig::default());
        assert!(matches!(
            f.sched.finish_task(TaskId::new(99), true, None),
            Err(SchedError::UnknownTask(_))
        ));
        let id = f.sched.add_task(SCAN, "c", "s", 0).unwrap();
        assert!(matches!(
            f.sched.finish_task(id, true, None),
            Err(SchedError::InvalidState { .. })
        ));
        f.sched.run_task().unwrap();
        f.sched.finish_task(id, false, Some("cancelled".into())).unwrap();
        assert_eq!(f.sched.fails().len(), 1);
        assert_eq!(f.sched.free_executors().len(), 4);
    }
}
