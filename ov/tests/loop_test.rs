//! End-to-end loop tests: real task store, registry, signals, and git
//! worktrees, with a scripted worker standing in for the agent.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::process::Command;

use overseer::r#loop::{Engine, EngineConfig, read_status, SessionState};
use overseer::registry::{LoopKind, ProcessRegistry, ProcessStatus, ProcessTarget};
use overseer::signals::{ControlSignals, StopScope};
use overseer::worker::{MockWorker, Worker, WorkerOutcome};
use overseer::worktree::{WorktreeConfig, WorktreeManager};
use queuestore::{Task, TaskStatus, TaskStore};

struct Harness {
    _state: TempDir,
    _repo: TempDir,
    _shared: TempDir,
    store: TaskStore,
    registry: ProcessRegistry,
    signals: ControlSignals,
    config: EngineConfig,
    worktree_config: WorktreeConfig,
}

async fn git(dir: &std::path::Path, args: &[&str]) {
    let out = Command::new("git").args(args).current_dir(dir).output().await.unwrap();
    assert!(out.status.success(), "git {args:?}: {}", String::from_utf8_lossy(&out.stderr));
}

async fn harness(kind: LoopKind) -> Harness {
    let state = TempDir::new().unwrap();
    let repo = TempDir::new().unwrap();
    let shared = TempDir::new().unwrap();

    git(repo.path(), &["init", "-b", "main"]).await;
    git(repo.path(), &["config", "user.email", "test@test.com"]).await;
    git(repo.path(), &["config", "user.name", "Test"]).await;
    git(repo.path(), &["commit", "--allow-empty", "-m", "initial"]).await;

    let queue_dir = state.path().join("queue");
    let control_dir = state.path().join("control");
    let store = TaskStore::open(&queue_dir).unwrap();
    let registry = ProcessRegistry::open(state.path().join("registry")).unwrap();
    let signals = ControlSignals::open(&control_dir).unwrap();

    let worktree_config = WorktreeConfig {
        project_root: repo.path().to_path_buf(),
        shared_root: shared.path().to_path_buf(),
        base_branch: "main".to_string(),
        queue_dir,
        control_dir,
        queue_mount: ".overseer/queue".into(),
        control_mount: ".overseer/control".into(),
        copy_files: vec![],
        deny_dirs: vec![".git".to_string()],
    };

    let config = EngineConfig {
        kind,
        max_retries: 0,
        failure_threshold: 3,
        preflight_analysis: false,
        cooldown: Duration::from_millis(10),
        idle_poll: Duration::from_millis(10),
        session_dir: state.path().join("session"),
        scratch_dir: state.path().join("scratch"),
        prompt_template: "Task: {{task-name}}".to_string(),
        exit_on_idle: true,
        record_id: None,
    };

    Harness {
        _state: state,
        _repo: repo,
        _shared: shared,
        store,
        registry,
        signals,
        config,
        worktree_config,
    }
}

fn engine(h: &Harness, worker: Arc<dyn Worker>) -> Engine {
    Engine::new(
        h.config.clone(),
        TaskStore::open(h.worktree_config.queue_dir.clone()).unwrap(),
        ProcessRegistry::open(h._state.path().join("registry")).unwrap(),
        ControlSignals::open(h.worktree_config.control_dir.clone()).unwrap(),
        WorktreeManager::new(h.worktree_config.clone()),
        worker,
    )
}

#[tokio::test]
async fn test_happy_path_lands_task_in_done() {
    let h = harness(LoopKind::Execution).await;
    h.store
        .create(&Task::with_id("abc123abc123abc1", "Fix login", "the login page 500s"))
        .unwrap();

    let worker = Arc::new(MockWorker::succeeding());
    let stats = engine(&h, worker.clone()).run().await.unwrap();

    assert_eq!(stats.tasks_attempted, 1);
    assert_eq!(stats.tasks_succeeded, 1);

    let task = h.store.get("abc123abc123abc1").unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Done);
    assert!(task.completed_at.is_some());

    // Worktree and branch were torn down after the merge
    let manager = WorktreeManager::new(h.worktree_config.clone());
    assert!(manager.entry("abc123abc123abc1").is_none());

    // The worker saw the rendered prompt
    let prompts = worker.prompts.lock().unwrap();
    assert_eq!(prompts.as_slice(), &["Task: Fix login".to_string()]);
}

#[tokio::test]
async fn test_priority_one_dispatches_before_three() {
    let h = harness(LoopKind::Execution).await;
    h.store
        .create(&Task::with_id("lowpriority12345", "Later", "d").with_priority(3))
        .unwrap();
    h.store
        .create(&Task::with_id("highpriority1234", "First", "d").with_priority(1))
        .unwrap();

    let worker = Arc::new(MockWorker::succeeding());
    let stats = engine(&h, worker.clone()).run().await.unwrap();
    assert_eq!(stats.tasks_succeeded, 2);

    let prompts = worker.prompts.lock().unwrap();
    assert_eq!(prompts.as_slice(), &["Task: First".to_string(), "Task: Later".to_string()]);
}

#[tokio::test]
async fn test_crash_skips_then_succeeds_on_refetch() {
    let h = harness(LoopKind::Execution).await;
    h.store
        .create(&Task::with_id("crashingtask1234", "Crashy", "d"))
        .unwrap();

    // First attempt crashes; the skip returns the task to todo, the
    // loop refetches it, and the second attempt succeeds
    let worker = Arc::new(MockWorker::new(vec![WorkerOutcome {
        combined_output: "Segmentation fault".to_string(),
        exit_code: 139,
        timed_out: false,
    }]));
    let stats = engine(&h, worker).run().await.unwrap();

    assert_eq!(stats.tasks_failed, 1);
    assert_eq!(stats.tasks_succeeded, 1);
    let task = h.store.get("crashingtask1234").unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Done);
    assert_eq!(task.skip_history.len(), 1);
    assert!(task.skip_history[0].reason.contains("Crash"));
}

#[tokio::test]
async fn test_failure_threshold_pauses_session() {
    let mut h = harness(LoopKind::Execution).await;
    h.config.failure_threshold = 2;
    // Without exit_on_idle the engine would idle after pausing; the
    // test stops it once the pause lands
    h.config.exit_on_idle = false;
    for id in ["failingtask11111", "failingtask22222"] {
        h.store.create(&Task::with_id(id, "Failing", "d")).unwrap();
    }

    let failures: Vec<WorkerOutcome> = (0..2)
        .map(|_| WorkerOutcome {
            combined_output: "boom".to_string(),
            exit_code: 1,
            timed_out: false,
        })
        .collect();
    let worker = Arc::new(MockWorker::new(failures));
    let handle = tokio::spawn(engine(&h, worker).run());

    // Wait for the threshold to trip
    let mut paused = false;
    for _ in 0..100 {
        if h.signals.paused() {
            paused = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(paused, "failure threshold did not pause the session");

    let status = read_status(&h.config.session_dir, LoopKind::Execution).unwrap();
    assert_eq!(status.state, SessionState::Paused);
    assert_eq!(status.consecutive_failures, 2);

    h.signals.assert_stop(StopScope::Global, "test");
    let stats = handle.await.unwrap().unwrap();
    assert_eq!(stats.tasks_failed, 2);
}

#[tokio::test]
async fn test_analysis_routes_questions_to_needs_input() {
    let h = harness(LoopKind::Analysis).await;
    h.store
        .create(&Task::with_id("ambiguoustask123", "Vague ask", "d"))
        .unwrap();
    h.store
        .create(&Task::with_id("cleartask1234567", "Clear ask", "d"))
        .unwrap();

    let worker = Arc::new(MockWorker::new(vec![
        WorkerOutcome {
            combined_output: "QUESTION: which auth backend?".to_string(),
            exit_code: 0,
            timed_out: false,
        },
        WorkerOutcome {
            combined_output: "criteria written".to_string(),
            exit_code: 0,
            timed_out: false,
        },
    ]));
    let stats = engine(&h, worker).run().await.unwrap();
    assert_eq!(stats.tasks_succeeded, 2);

    // Insertion order: the ambiguous task was analysed first
    let vague = h.store.get("ambiguoustask123").unwrap().unwrap();
    assert_eq!(vague.status, TaskStatus::NeedsInput);
    let clear = h.store.get("cleartask1234567").unwrap().unwrap();
    assert_eq!(clear.status, TaskStatus::Analysed);
    // Both carry a closed analysis session
    assert_eq!(clear.analysis_sessions.len(), 1);
    assert!(clear.analysis_sessions[0].ended_at.is_some());
    assert!(vague.analysis_sessions[0].ended_at.is_some());
}

#[tokio::test]
async fn test_engine_adopts_launch_record_and_honors_its_stop() {
    let mut h = harness(LoopKind::Execution).await;
    h.config.exit_on_idle = false;
    h.config.record_id = Some("launchrecord1234".to_string());

    let worker = Arc::new(MockWorker::succeeding());
    let handle = tokio::spawn(engine(&h, worker).run());

    // The handed-down record flips to running in place, no second
    // record appears
    let mut running = false;
    for _ in 0..100 {
        if let Some(record) = h.registry.get("launchrecord1234") {
            if record.status == ProcessStatus::Running {
                running = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(running, "engine did not adopt the launch record");
    assert_eq!(h.registry.list(None).unwrap().len(), 1);

    // A stop keyed by the id that `launch` returned reaches the loop
    h.registry
        .stop(&ProcessTarget::Id("launchrecord1234".to_string()))
        .unwrap();
    let stats = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("engine did not honor the stop")
        .unwrap()
        .unwrap();
    assert_eq!(stats.tasks_attempted, 0);
    assert_eq!(
        h.registry.get("launchrecord1234").unwrap().status,
        ProcessStatus::Stopped
    );
}

#[tokio::test]
async fn test_stop_signal_ends_idle_loop() {
    let mut h = harness(LoopKind::Execution).await;
    h.config.exit_on_idle = false;

    let worker = Arc::new(MockWorker::succeeding());
    let handle = tokio::spawn(engine(&h, worker).run());
    tokio::time::sleep(Duration::from_millis(200)).await;

    h.signals.assert_stop(StopScope::Kind(LoopKind::Execution), "test");
    let stats = tokio::time::timeout(Duration::from_secs(10), handle)
        .await
        .expect("engine did not honor stop")
        .unwrap()
        .unwrap();
    assert_eq!(stats.tasks_attempted, 0);
}
