//! Scheduler behaviour across several tasks, driven through the recording
//! client so no sockets are involved.

use std::sync::Arc;

use quarry::core::prelude::{DataType, EngineConfig, Field, Location, Metadata, Value};
use quarry::exec::ExecutorState;
use quarry::plan::PipelineCompiler;
use quarry::sched::testing::{Call, RecordingClient};
use quarry::sched::{Phase, RunOutcome, Scheduler, StaticTopology, TaskStatus};
use quarry::split::Split;

const SCAN4: &str = r#"
steps:
  - op: scan
    table: t
    partitions: 4
    columns: [ { name: a, type: Int64 } ]
"#;

const SORTED: &str = r#"
steps:
  - op: scan
    table: t
    partitions: 1
    columns: [ { name: a, type: Int64 } ]
  - op: order_by
    items: ["a"]
"#;

fn locations(n: usize) -> Vec<Location> {
    (0..n)
        .map(|i| Location::new(format!("e{i}"), "127.0.0.1", 7100 + i as u16))
        .collect()
}

fn scheduler(n: usize, max_parallelism: usize) -> (Scheduler, Arc<RecordingClient>) {
    let client = Arc::new(RecordingClient::new());
    let config = EngineConfig {
        max_parallelism,
        ..Default::default()
    };
    let sched = Scheduler::new(
        config,
        Arc::new(PipelineCompiler::new()),
        Arc::new(StaticTopology::new(locations(n))),
        client.clone(),
    );
    (sched, client)
}

fn one_column(values: &[i64]) -> Split {
    let mut split = Split::new(Metadata::new(vec![Field::new("a", DataType::Int64)]));
    for v in values {
        split.append_row(vec![Value::I64(*v)]).unwrap();
    }
    split
}

#[test]
fn two_tasks_share_the_pool_without_overlap() {
    let (sched, client) = scheduler(4, 2);
    let big = sched.add_task(SCAN4, "c", "s", 5).unwrap();
    let small = sched.add_task(SCAN4, "c", "s", 1).unwrap();

    // scan x2 plus a union root
    assert_eq!(
        sched.run_task().unwrap(),
        RunOutcome::Dispatched {
            task_id: big,
            parallelism: 2,
            executors: 3
        }
    );
    // one executor left: the second task drops to parallelism 1
    assert_eq!(
        sched.run_task().unwrap(),
        RunOutcome::Dispatched {
            task_id: small,
            parallelism: 1,
            executors: 1
        }
    );
    assert!(sched.free_executors().is_empty());

    let big_task = sched.task(big).unwrap();
    let small_task = sched.task(small).unwrap();
    for l in &small_task.executors {
        assert!(!big_task.executors.contains(l));
    }

    // finish the first task only
    client.set_all(&big_task.executors, ExecutorState::Done);
    let root = big_task.root.clone().unwrap();
    client.set_results(&root.name, one_column(&[1, 2, 3]));
    client.clear_calls();
    assert_eq!(sched.poll_running().unwrap(), vec![big]);

    let aborted: Vec<String> = client
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::Abort(name, id) if id == big => Some(name),
            _ => None,
        })
        .collect();
    assert_eq!(aborted.len(), 3);
    assert_eq!(sched.free_executors().len(), 3);
    assert_eq!(sched.task(small).unwrap().status, TaskStatus::Doing);
    assert_eq!(sched.fetch_results(big).unwrap(), one_column(&[1, 2, 3]));

    client.set_all(&small_task.executors, ExecutorState::Done);
    let small_root = small_task.root.unwrap();
    client.set_results(&small_root.name, one_column(&[]));
    assert_eq!(sched.poll_running().unwrap(), vec![small]);
    assert_eq!(sched.dones().len(), 2);
    assert_eq!(sched.free_executors().len(), 4);
}

#[test]
fn head_of_queue_blocks_lower_priority_work() {
    let (sched, _client) = scheduler(3, 8);
    let first = sched.add_task(SORTED, "c", "s", 0).unwrap();
    assert!(matches!(sched.run_task().unwrap(), RunOutcome::Dispatched { .. }));

    let urgent = sched.add_task(SORTED, "c", "s", 9).unwrap();
    let _cheap = sched.add_task(SCAN4, "c", "s", 0).unwrap();
    assert_eq!(
        sched.run_task().unwrap(),
        RunOutcome::Waiting {
            task_id: urgent,
            required: 3,
            free: 0
        }
    );

    sched.finish_task(first, true, None).unwrap();
    assert_eq!(
        sched.run_task().unwrap(),
        RunOutcome::Dispatched {
            task_id: urgent,
            parallelism: 1,
            executors: 3
        }
    );
    assert_eq!(sched.todos().len(), 1);
}

#[test]
fn dispatch_walks_the_phases_in_order() {
    let (sched, client) = scheduler(3, 8);
    sched.add_task(SORTED, "c", "s", 0).unwrap();
    sched.run_task().unwrap();

    let phases: Vec<Phase> = client.calls().iter().filter_map(Call::phase).collect();
    assert_eq!(phases.len(), 12);
    for (i, chunk) in phases.chunks(3).enumerate() {
        assert!(chunk.iter().all(|p| *p == Phase::ALL[i]));
    }
}

#[test]
fn stale_reports_do_not_finish_a_task() {
    let (sched, client) = scheduler(4, 2);
    let id = sched.add_task(SCAN4, "c", "s", 0).unwrap();
    sched.run_task().unwrap();

    // nothing reported Done yet
    assert!(sched.poll_running().unwrap().is_empty());
    let task = sched.task(id).unwrap();
    client.set_all(&task.executors[..1], ExecutorState::Done);
    assert!(sched.poll_running().unwrap().is_empty());
    assert_eq!(sched.task(id).unwrap().status, TaskStatus::Doing);

    client.set_state(&task.executors[1].name, ExecutorState::Failed, Some("disk gone"));
    assert_eq!(sched.poll_running().unwrap(), vec![id]);
    let failed = sched.task(id).unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed.error.unwrap().contains("disk gone"));
}
