//! End-to-end lifecycle scenarios driven through the task manager with
//! a scripted fake runner factory: happy path with replay, conflicts,
//! interventions, admission timeouts, slow consumers, and restart
//! recovery.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use tr_domain::config::Config;
use tr_domain::task::TaskOptions;
use tr_domain::{InterventionMessage, Result, Task, TaskEvent, TaskKey, TaskStatus};
use tr_engine::{AgentRunner, PromptRequest, RunnerEvent, RunnerFactory, RunnerPool};
use tr_gateway::runtime::TaskManager;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scripted engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Replays one scripted segment per prompt; pends when out of events.
struct ScriptedRunner {
    segments: VecDeque<Vec<RunnerEvent>>,
    events: VecDeque<RunnerEvent>,
    interrupts: Arc<AtomicUsize>,
}

#[async_trait]
impl AgentRunner for ScriptedRunner {
    async fn send_prompt(&mut self, _req: PromptRequest) -> Result<()> {
        if let Some(segment) = self.segments.pop_front() {
            self.events.extend(segment);
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Result<Option<RunnerEvent>> {
        loop {
            if let Some(event) = self.events.pop_front() {
                // Yield between events so concurrent listeners get to run.
                tokio::time::sleep(Duration::from_millis(1)).await;
                return Ok(Some(event));
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    async fn interrupt(&mut self) -> Result<()> {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&mut self) {}
}

/// Hands each created runner the next script in line.
struct ScriptedFactory {
    scripts: Mutex<VecDeque<Vec<Vec<RunnerEvent>>>>,
    interrupts: Arc<AtomicUsize>,
}

impl ScriptedFactory {
    fn new(scripts: Vec<Vec<Vec<RunnerEvent>>>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            interrupts: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl RunnerFactory for ScriptedFactory {
    async fn create(&self) -> Result<Box<dyn AgentRunner>> {
        let segments = self.scripts.lock().pop_front().unwrap_or_default();
        Ok(Box::new(ScriptedRunner {
            segments: segments.into_iter().collect(),
            events: VecDeque::new(),
            interrupts: self.interrupts.clone(),
        }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Harness
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn test_config(dir: &tempfile::TempDir) -> Arc<Config> {
    let mut config = Config::default();
    config.storage.events_dir = dir.path().join("events");
    config.storage.tasks_file = dir.path().join("tasks.json");
    config.storage.save_debounce_ms = 10;
    config.pool.min_generic = 0;
    config.pool.maintenance_interval_secs = 3600;
    Arc::new(config)
}

fn build_manager(
    config: Arc<Config>,
    factory: Arc<ScriptedFactory>,
) -> Arc<TaskManager> {
    let pool = Arc::new(RunnerPool::new(factory, config.pool.clone()));
    Arc::new(TaskManager::new(config, pool).expect("manager"))
}

fn key(request: &str) -> TaskKey {
    TaskKey::new("bot", request)
}

fn happy_script(output: &str) -> Vec<Vec<RunnerEvent>> {
    vec![vec![
        RunnerEvent::SessionStarted { session_id: "s-A".into() },
        RunnerEvent::TextStart,
        RunnerEvent::TextDelta { text: output.into() },
        RunnerEvent::TextEnd,
        RunnerEvent::Result {
            success: true,
            output: Some(output.into()),
            error: None,
            attachments: vec![],
        },
    ]]
}

/// A runner that produces one event and then never finishes.
fn stuck_script() -> Vec<Vec<RunnerEvent>> {
    vec![vec![RunnerEvent::SessionStarted { session_id: "s-stuck".into() }]]
}

async fn wait_terminal(manager: &Arc<TaskManager>, key: &TaskKey) -> Task {
    for _ in 0..400 {
        if let Ok(task) = manager.get(key) {
            if task.status.is_terminal() {
                return task;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {key} never reached a terminal state");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S1 — happy path, replay, ack
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn happy_path_with_replay_and_ack() {
    let dir = tempfile::tempdir().unwrap();
    let manager = build_manager(test_config(&dir), ScriptedFactory::new(vec![happy_script("hello")]));

    let task = manager
        .create(key("t1"), "hi".into(), TaskOptions::default())
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Running);

    let done = wait_terminal(&manager, &key("t1")).await;
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.result.as_deref(), Some("hello"));
    assert_eq!(done.claude_session_id.as_deref(), Some("s-A"));

    // Monotonic, dense ids starting at 1; terminal event last.
    let log = manager.read_events_since(&key("t1"), 0).await.unwrap();
    let ids: Vec<u64> = log.iter().map(|r| r.id).collect();
    assert_eq!(ids, (1..=log.len() as u64).collect::<Vec<_>>());
    let types: Vec<&str> = log.iter().map(|r| r.event.event_type()).collect();
    assert_eq!(
        types,
        vec!["session", "text_start", "text_delta", "text_end", "result", "complete"]
    );

    // Replay correctness: read_since(n) returns exactly ids > n.
    let tail = manager.read_events_since(&key("t1"), 2).await.unwrap();
    assert_eq!(tail.iter().map(|r| r.id).collect::<Vec<_>>(), vec![3, 4, 5, 6]);

    // Session index serves lookups until deletion.
    assert_eq!(manager.get_by_session("s-A").unwrap().request_id, "t1");

    // Admission is fully released.
    assert_eq!(manager.admission().in_use(), 0);

    // Ack deletes the task, its log, and the session index entry.
    manager.ack(&key("t1")).await.unwrap();
    assert_eq!(manager.get(&key("t1")).unwrap_err().kind(), "not-found");
    assert_eq!(manager.get_by_session("s-A").unwrap_err().kind(), "not-found");
    assert!(manager.read_events_since(&key("t1"), 0).await.unwrap().is_empty());
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S2 — conflict on duplicate execute
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn duplicate_create_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let manager = build_manager(
        test_config(&dir),
        ScriptedFactory::new(vec![stuck_script(), stuck_script()]),
    );

    manager
        .create(key("t2"), "hi".into(), TaskOptions::default())
        .await
        .unwrap();

    let err = manager
        .create(key("t2"), "hi again".into(), TaskOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "conflict");

    // The original task is untouched and still running.
    assert_eq!(manager.get(&key("t2")).unwrap().status, TaskStatus::Running);
    assert_eq!(manager.get(&key("t2")).unwrap().prompt, "hi");

    manager.cancel_running(Duration::from_secs(2)).await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S3 — intervention mid-run
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn intervention_reaches_running_task() {
    let dir = tempfile::tempdir().unwrap();
    // First segment never yields a result, so the task stays running
    // until the intervention's follow-up segment finishes it.
    let script = vec![vec![
        vec![
            RunnerEvent::SessionStarted { session_id: "s-A".into() },
            RunnerEvent::TextStart,
            RunnerEvent::TextDelta { text: "working".into() },
            RunnerEvent::TextEnd,
        ],
        vec![
            RunnerEvent::TextStart,
            RunnerEvent::TextDelta { text: "checked X".into() },
            RunnerEvent::TextEnd,
            RunnerEvent::Result {
                success: true,
                output: Some("checked X".into()),
                error: None,
                attachments: vec![],
            },
        ],
    ]];
    let factory = ScriptedFactory::new(script);
    let manager = build_manager(test_config(&dir), factory.clone());

    manager
        .create(key("t3"), "hi".into(), TaskOptions::default())
        .await
        .unwrap();

    // Let the first block land, then intervene.
    tokio::time::sleep(Duration::from_millis(100)).await;
    manager
        .add_intervention(
            &key("t3"),
            InterventionMessage {
                text: "also check X".into(),
                user: "U1".into(),
                attachment_paths: vec![],
            },
        )
        .unwrap();

    let done = wait_terminal(&manager, &key("t3")).await;
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.result.as_deref(), Some("checked X"));

    // A mid-generation intervention interrupts the runner first.
    assert_eq!(factory.interrupts.load(Ordering::SeqCst), 1);

    let log = manager.read_events_since(&key("t3"), 0).await.unwrap();
    let types: Vec<&str> = log.iter().map(|r| r.event.event_type()).collect();
    let sent_at = types.iter().position(|t| *t == "intervention_sent").expect("sent event");
    let first_end = types.iter().position(|t| *t == "text_end").expect("text_end");
    assert!(sent_at > first_end, "intervention recorded after the first block");

    match &log[sent_at].event {
        TaskEvent::InterventionSent { user, text } => {
            assert_eq!(user, "U1");
            assert_eq!(text, "also check X");
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn intervention_by_session_routes_through_index() {
    let dir = tempfile::tempdir().unwrap();
    let script = vec![vec![
        vec![RunnerEvent::SessionStarted { session_id: "s-B".into() }],
        vec![RunnerEvent::Result {
            success: true,
            output: Some("ok".into()),
            error: None,
            attachments: vec![],
        }],
    ]];
    let manager = build_manager(test_config(&dir), ScriptedFactory::new(script));

    manager
        .create(key("t3b"), "hi".into(), TaskOptions::default())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    manager
        .add_intervention_by_session(
            "s-B",
            InterventionMessage {
                text: "follow up".into(),
                user: "U2".into(),
                attachment_paths: vec![],
            },
        )
        .unwrap();

    let done = wait_terminal(&manager, &key("t3b")).await;
    assert_eq!(done.status, TaskStatus::Completed);

    assert_eq!(
        manager
            .add_intervention_by_session("s-unknown", InterventionMessage {
                text: "x".into(),
                user: "u".into(),
                attachment_paths: vec![],
            })
            .unwrap_err()
            .kind(),
        "not-found"
    );
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S4 — intervention on a terminal task
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn intervention_on_terminal_task_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let manager = build_manager(test_config(&dir), ScriptedFactory::new(vec![happy_script("done")]));

    manager
        .create(key("t4"), "hi".into(), TaskOptions::default())
        .await
        .unwrap();
    wait_terminal(&manager, &key("t4")).await;

    let err = manager
        .add_intervention(
            &key("t4"),
            InterventionMessage {
                text: "too late".into(),
                user: "U1".into(),
                attachment_paths: vec![],
            },
        )
        .unwrap_err();
    assert_eq!(err.kind(), "not-running");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S5 — admission timeout
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn admission_timeout_errors_rate_limited() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::clone(&test_config(&dir));
    config.admission.max_concurrent = 1;
    config.admission.acquire_timeout_ms = 100;
    let manager = build_manager(
        Arc::new(config),
        ScriptedFactory::new(vec![stuck_script(), stuck_script()]),
    );

    manager
        .create(TaskKey::new("a", "1"), "hold the slot".into(), TaskOptions::default())
        .await
        .unwrap();
    manager
        .create(TaskKey::new("a", "2"), "wait".into(), TaskOptions::default())
        .await
        .unwrap();

    let starved = wait_terminal(&manager, &TaskKey::new("a", "2")).await;
    assert_eq!(starved.status, TaskStatus::Error);

    let log = manager
        .read_events_since(&TaskKey::new("a", "2"), 0)
        .await
        .unwrap();
    assert_eq!(log.len(), 1);
    match &log[0].event {
        TaskEvent::Error { kind, .. } => assert_eq!(kind, "rate-limited"),
        other => panic!("unexpected: {other:?}"),
    }

    // The first task kept its slot the whole time.
    assert_eq!(manager.get(&TaskKey::new("a", "1")).unwrap().status, TaskStatus::Running);
    manager.cancel_running(Duration::from_secs(2)).await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// S6 — slow consumer is dropped, others unaffected
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn slow_consumer_dropped_healthy_listener_complete() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::clone(&test_config(&dir));
    config.listeners.queue_capacity = 2;

    let mut events = vec![RunnerEvent::SessionStarted { session_id: "s-A".into() }];
    for i in 0..8 {
        events.push(RunnerEvent::ThinkingDelta { text: format!("step {i}") });
    }
    events.push(RunnerEvent::Result {
        success: true,
        output: Some("done".into()),
        error: None,
        attachments: vec![],
    });
    let manager = build_manager(Arc::new(config), ScriptedFactory::new(vec![vec![events]]));

    // Attach both listeners before execution starts producing.
    let (_slow_id, mut slow_rx) = manager.add_listener(&key("t6"));
    let (_ok_id, mut ok_rx) = manager.add_listener(&key("t6"));

    // Healthy listener drains concurrently.
    let drained = tokio::spawn(async move {
        let mut seen = Vec::new();
        while let Some(record) = ok_rx.recv().await {
            seen.push(record);
        }
        seen
    });

    manager
        .create(key("t6"), "hi".into(), TaskOptions::default())
        .await
        .unwrap();
    wait_terminal(&manager, &key("t6")).await;

    let log = manager.read_events_since(&key("t6"), 0).await.unwrap();
    let healthy: Vec<_> = drained.await.unwrap();
    assert_eq!(healthy.len(), log.len(), "healthy listener saw every event");
    assert!(healthy.last().unwrap().event.is_terminal());

    // The slow listener got at most its queue depth, then its channel
    // closed; the executor never blocked on it.
    let mut slow_count = 0;
    while slow_rx.recv().await.is_some() {
        slow_count += 1;
    }
    assert!(slow_count <= 2, "slow listener capped at queue capacity, got {slow_count}");
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Terminal stability, delivery, overwrite-after-terminal
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn terminal_state_is_stable_and_delivered_once() {
    let dir = tempfile::tempdir().unwrap();
    let manager = build_manager(test_config(&dir), ScriptedFactory::new(vec![happy_script("v1")]));

    manager
        .create(key("t7"), "hi".into(), TaskOptions::default())
        .await
        .unwrap();
    wait_terminal(&manager, &key("t7")).await;

    // Terminal monotonicity: further transitions are rejected.
    assert_eq!(
        manager.complete(&key("t7"), "again".into(), None).unwrap_err().kind(),
        "not-running"
    );
    assert_eq!(manager.error(&key("t7"), "nope".into()).unwrap_err().kind(), "not-running");

    // delivered_at is set exactly once.
    manager.mark_delivered(&key("t7")).unwrap();
    assert_eq!(manager.mark_delivered(&key("t7")).unwrap_err().kind(), "conflict");

    // Ack on a running task is refused; terminal ack works (covered in S1).
    manager.ack(&key("t7")).await.unwrap();
}

#[tokio::test]
async fn create_overwrites_stale_terminal_record() {
    let dir = tempfile::tempdir().unwrap();
    let manager = build_manager(
        test_config(&dir),
        ScriptedFactory::new(vec![happy_script("first"), happy_script("second")]),
    );

    manager
        .create(key("t8"), "one".into(), TaskOptions::default())
        .await
        .unwrap();
    wait_terminal(&manager, &key("t8")).await;
    let old_log_len = manager.read_events_since(&key("t8"), 0).await.unwrap().len();
    assert!(old_log_len > 0);

    // Un-acked terminal record: a fresh create replaces it and its log.
    manager
        .create(key("t8"), "two".into(), TaskOptions::default())
        .await
        .unwrap();
    let done = wait_terminal(&manager, &key("t8")).await;
    assert_eq!(done.prompt, "two");
    assert_eq!(done.result.as_deref(), Some("second"));

    // Ids restarted at 1 — the old log is gone.
    let log = manager.read_events_since(&key("t8"), 0).await.unwrap();
    assert_eq!(log[0].id, 1);
}

#[tokio::test]
async fn ack_running_task_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let manager = build_manager(test_config(&dir), ScriptedFactory::new(vec![stuck_script()]));

    manager
        .create(key("t9"), "hi".into(), TaskOptions::default())
        .await
        .unwrap();
    assert_eq!(manager.ack(&key("t9")).await.unwrap_err().kind(), "conflict");

    manager.cancel_running(Duration::from_secs(2)).await;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cancellation & shutdown
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn cancel_running_drives_tasks_to_cancelled_error() {
    let dir = tempfile::tempdir().unwrap();
    let manager = build_manager(test_config(&dir), ScriptedFactory::new(vec![stuck_script()]));

    manager
        .create(key("t10"), "hi".into(), TaskOptions::default())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let signalled = manager.cancel_running(Duration::from_secs(2)).await;
    assert_eq!(signalled, 1);

    let task = manager.get(&key("t10")).unwrap();
    assert_eq!(task.status, TaskStatus::Error);

    let log = manager.read_events_since(&key("t10"), 0).await.unwrap();
    match &log.last().unwrap().event {
        TaskEvent::Error { kind, .. } => assert_eq!(kind, "cancelled"),
        other => panic!("unexpected: {other:?}"),
    }
    assert_eq!(manager.admission().in_use(), 0);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Restart recovery & cleanup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[tokio::test]
async fn crashed_running_tasks_are_errored_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&dir);

    {
        let manager = build_manager(config.clone(), ScriptedFactory::new(vec![stuck_script()]));
        manager
            .create(key("t11"), "hi".into(), TaskOptions::default())
            .await
            .unwrap();
        // Snapshot with the task still running, then "crash".
        manager.flush().unwrap();
    }

    let manager = build_manager(config, ScriptedFactory::new(vec![]));
    let task = manager.get(&key("t11")).unwrap();
    assert_eq!(task.status, TaskStatus::Error);
    assert!(task.error.as_deref().unwrap_or_default().contains("restart"));
}

#[tokio::test]
async fn cleanup_old_deletes_expired_terminal_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let manager = build_manager(test_config(&dir), ScriptedFactory::new(vec![happy_script("x")]));

    manager
        .create(key("t12"), "hi".into(), TaskOptions::default())
        .await
        .unwrap();
    wait_terminal(&manager, &key("t12")).await;

    // Young terminal tasks survive.
    assert_eq!(manager.cleanup_old(chrono::Duration::hours(1)).await, 0);
    // A zero max-age sweeps them.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(manager.cleanup_old(chrono::Duration::zero()).await, 1);
    assert_eq!(manager.get(&key("t12")).unwrap_err().kind(), "not-found");
}
