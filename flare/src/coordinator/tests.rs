//! Tests for the coordinator.

use super::*;
use crate::agent::{AgentConfig, AgentWorker};
use crate::core::readiness::{Readiness, SharedReadiness};
use crate::error::{ConfigError, FlareError};
use crate::stats::MultiLogger;
use crate::task::{RunSettings, TaskOptions, TaskSettings};
use crate::test_support::{input_seqs, CountingAlgorithm, Recorder, ScriptedEnv};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn run_settings() -> RunSettings {
    RunSettings::default()
        .with_poll_interval(Duration::from_millis(5))
        .with_shutdown_timeout(Duration::from_millis(500))
        .with_interrupt_handler(false)
}

fn coordinator(run: RunSettings) -> Coordinator {
    Coordinator::with_logger(run, Box::new(MultiLogger::new())).unwrap()
}

fn task(algorithm: CountingAlgorithm, interval: usize, agents: usize) -> TaskSettings {
    TaskSettings::builder(algorithm)
        .with_sample_interval(interval)
        .with_num_agents(agents)
        .build()
}

fn single_task(run: RunSettings, interval: usize, agents: usize) -> (Coordinator, Recorder) {
    let algorithm = CountingAlgorithm::new();
    let recorder = algorithm.recorder();
    let mut coordinator = coordinator(run);
    coordinator
        .create_tasks([("rl", task(algorithm, interval, agents))])
        .unwrap();
    (coordinator, recorder)
}

fn steps(tag: usize, episode_len: usize, max_steps: usize) -> AgentWorker {
    AgentWorker::new(ScriptedEnv::new(tag, episode_len), AgentConfig::new().with_max_steps(max_steps))
}

// ============================================================================
// Task creation and registration
// ============================================================================

#[test]
fn test_invalid_task_settings_create_nothing() {
    let mut coordinator = coordinator(run_settings());
    let missing = TaskSettings::new(
        Box::new(CountingAlgorithm::new()),
        TaskOptions {
            num_agents: Some(1),
            ..Default::default()
        },
    );
    let result = coordinator.create_tasks([("a", task(CountingAlgorithm::new(), 2, 1)), ("b", missing)]);

    assert!(matches!(
        result,
        Err(FlareError::Config(ConfigError::MissingField { field: "sample_interval", .. }))
    ));
    assert!(coordinator.task_names().is_empty());
}

#[test]
fn test_duplicate_task_rejected() {
    let mut coordinator = coordinator(run_settings());
    let result = coordinator.create_tasks(vec![
        ("rl".to_string(), task(CountingAlgorithm::new(), 2, 1)),
        ("rl".to_string(), task(CountingAlgorithm::new(), 2, 1)),
    ]);
    assert!(matches!(result, Err(FlareError::Config(ConfigError::DuplicateTask(name))) if name == "rl"));
}

#[test]
fn test_register_requires_tasks() {
    let mut coordinator = coordinator(run_settings());
    assert!(matches!(
        coordinator.register_agent(steps(0, 3, 3)),
        Err(FlareError::Config(ConfigError::NoTasks))
    ));
}

#[test]
fn test_agent_ids_follow_registration_order() {
    let (mut coordinator, _) = single_task(run_settings(), 2, 3);
    let ids = coordinator
        .register_agents((0..3).map(|i| steps(i, 3, 3)))
        .unwrap();
    assert_eq!(ids, vec![0, 1, 2]);
    assert_eq!(coordinator.task("rl").map(|t| t.helper_count()), Some(3));

    assert_eq!(coordinator.remove_agent().unwrap(), Some(2));
    assert_eq!(coordinator.num_agents(), 2);
    assert!(!coordinator.task("rl").unwrap().has_helper(2));
    assert_eq!(coordinator.register_agent(steps(9, 3, 3)).unwrap(), 2);
}

#[test]
fn test_unknown_acting_task_rejected() {
    let (mut coordinator, _) = single_task(run_settings(), 2, 1);
    let worker = AgentWorker::new(ScriptedEnv::new(0, 3), AgentConfig::new().with_acting_task("other"));
    assert!(matches!(
        coordinator.register_agent(worker),
        Err(FlareError::Config(ConfigError::UnknownTask(_)))
    ));
    assert_eq!(coordinator.num_agents(), 0);
}

#[test]
fn test_start_without_agents_fails_fast() {
    let (mut coordinator, _) = single_task(run_settings(), 2, 1);
    assert!(matches!(
        coordinator.start(),
        Err(FlareError::Config(ConfigError::ZeroAgents))
    ));
}

#[test]
fn test_register_after_start_leaves_state_unchanged() {
    let (mut coordinator, recorder) = single_task(run_settings(), 2, 1);
    coordinator.register_agent(steps(0, 3, 4)).unwrap();
    coordinator.start().unwrap();

    let flags_before: Vec<Readiness> = coordinator.readiness_flags().iter().map(|f| f.get()).collect();
    assert!(matches!(
        coordinator.register_agent(steps(1, 3, 4)),
        Err(FlareError::RegistrationClosed)
    ));
    assert!(matches!(coordinator.remove_agent(), Err(FlareError::RegistrationClosed)));
    assert!(matches!(coordinator.start(), Err(FlareError::AlreadyStarted)));

    let flags_after: Vec<Readiness> = coordinator.readiness_flags().iter().map(|f| f.get()).collect();
    assert_eq!(flags_before, flags_after);
    assert_eq!(coordinator.num_agents(), 1);
    assert_eq!(recorder.updates(), 2);
}

// ============================================================================
// Startup barrier and ordering
// ============================================================================

#[test]
fn test_no_task_activity_before_all_agents_ready() {
    let flags: Arc<Mutex<Vec<SharedReadiness>>> = Arc::default();
    let violations = Arc::new(AtomicUsize::new(0));
    let hook_flags = Arc::clone(&flags);
    let hook_violations = Arc::clone(&violations);
    let algorithm = CountingAlgorithm::new().with_predict_hook(move || {
        let flags = hook_flags.lock();
        if flags.len() != 3 || flags.iter().any(|f| f.get() == Readiness::NotStarted) {
            hook_violations.fetch_add(1, Ordering::SeqCst);
        }
    });
    let recorder = algorithm.recorder();

    let mut coordinator = coordinator(run_settings());
    coordinator.create_tasks([("rl", task(algorithm, 2, 3))]).unwrap();
    for i in 0..3 {
        let env = ScriptedEnv::new(i, 5).with_reset_delay(Duration::from_millis(30 * i as u64));
        coordinator
            .register_agent(AgentWorker::new(env, AgentConfig::new().with_max_steps(4)))
            .unwrap();
    }
    *flags.lock() = coordinator.readiness_flags().to_vec();

    let stats = coordinator.start().unwrap();
    assert_eq!(violations.load(Ordering::SeqCst), 0);
    assert_eq!(recorder.predictions(), 12);
    assert_eq!(stats.total_steps, 12);
}

#[test]
fn test_records_arrive_in_order_per_agent() {
    let (mut coordinator, recorder) = single_task(run_settings(), 3, 4);
    for i in 0..4 {
        coordinator.register_agent(steps(i, 7, 30)).unwrap();
    }
    coordinator.start().unwrap();

    for agent_id in 0..4 {
        let batches = recorder.batches_for(agent_id);
        assert_eq!(input_seqs(&batches), (0..30).collect::<Vec<_>>());
        for batch in &batches {
            assert!(batch.transitions.iter().all(|t| t.agent_id == agent_id));
            assert!(batch.transitions.iter().all(|t| t.inputs[0][0] == agent_id as f32));
        }
    }
}

#[test]
fn test_interval_four_gives_one_batch_per_agent() {
    let (mut coordinator, recorder) = single_task(run_settings(), 4, 2);
    coordinator.register_agent(steps(0, 10, 4)).unwrap();
    coordinator.register_agent(steps(1, 10, 4)).unwrap();
    coordinator.start().unwrap();

    let batches = recorder.batches();
    assert_eq!(batches.len(), 2);
    for agent_id in 0..2 {
        let mine = recorder.batches_for(agent_id);
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].len(), 4);
    }
}

#[test]
fn test_two_tasks_each_see_every_agent() {
    let acting = CountingAlgorithm::new();
    let watching = CountingAlgorithm::new();
    let acting_recorder = acting.recorder();
    let watching_recorder = watching.recorder();

    let mut coordinator = coordinator(run_settings());
    coordinator
        .create_tasks([("act", task(acting, 2, 2)), ("watch", task(watching, 3, 2))])
        .unwrap();
    for i in 0..2 {
        let config = AgentConfig::new().with_max_steps(6).with_acting_task("act");
        coordinator
            .register_agent(AgentWorker::new(ScriptedEnv::new(i, 4), config))
            .unwrap();
    }
    let stats = coordinator.start().unwrap();

    assert_eq!(acting_recorder.predictions(), 12);
    assert_eq!(watching_recorder.predictions(), 0);
    assert_eq!(acting_recorder.updates(), 6);
    assert_eq!(watching_recorder.updates(), 4);
    assert_eq!(stats.task("act").map(|t| t.updates), Some(6));
    assert_eq!(stats.task("watch").map(|t| t.samples), Some(12));
}

// ============================================================================
// Failures and interrupts
// ============================================================================

#[test]
fn test_environment_failure_is_isolated() {
    let (mut coordinator, recorder) = single_task(run_settings(), 2, 2);
    let failing = AgentWorker::new(
        ScriptedEnv::new(0, 10).failing_at(3),
        AgentConfig::new().with_max_steps(8),
    );
    coordinator.register_agent(failing).unwrap();
    coordinator.register_agent(steps(1, 10, 8)).unwrap();

    let stats = coordinator.start().unwrap();
    assert_eq!(recorder.batches_for(1).len(), 4);
    assert_eq!(stats.agent(0).map(|a| a.steps), Some(2));
    assert_eq!(stats.agent(1).map(|a| a.steps), Some(8));
    assert!(coordinator.readiness_flags().iter().all(|f| f.is_stopped()));
}

#[test]
fn test_algorithm_failure_aborts_run() {
    let mut coordinator = coordinator(run_settings());
    coordinator
        .create_tasks([("rl", task(CountingAlgorithm::new().failing_at(2), 1, 2))])
        .unwrap();
    coordinator.register_agent(steps(0, 5, 1000)).unwrap();
    coordinator.register_agent(steps(1, 5, 1000)).unwrap();

    let result = coordinator.start();
    assert!(matches!(result, Err(FlareError::Algorithm { ref task, .. }) if task == "rl"));
    assert!(coordinator.readiness_flags().iter().all(|f| f.is_stopped()));
}

#[test]
fn test_interrupt_mid_run_is_bounded() {
    let timeout = Duration::from_millis(300);
    let run = run_settings().with_shutdown_timeout(timeout);
    let (mut coordinator, _) = single_task(run, 2, 3);
    for i in 0..3 {
        let env = ScriptedEnv::new(i, 50).with_step_delay(Duration::from_millis(1));
        coordinator
            .register_agent(AgentWorker::new(env, AgentConfig::new()))
            .unwrap();
    }

    let interrupt = coordinator.interrupt_handle();
    let trigger = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        interrupt.trigger();
    });

    let started = Instant::now();
    let result = coordinator.start();
    let elapsed = started.elapsed();
    trigger.join().unwrap();

    assert!(matches!(result, Err(FlareError::Interrupted)));
    assert!(elapsed < Duration::from_millis(100) + timeout * 5 + Duration::from_secs(1));
    assert!(coordinator
        .readiness_flags()
        .iter()
        .all(|f| f.get() != Readiness::Running));
}

#[test]
fn test_interrupt_skips_agents_stuck_past_timeout() {
    let timeout = Duration::from_millis(150);
    let step_delay = Duration::from_secs(3);
    let run = run_settings().with_shutdown_timeout(timeout);
    let (mut coordinator, _) = single_task(run, 2, 3);
    for i in 0..3 {
        let env = ScriptedEnv::new(i, 50).with_step_delay(step_delay);
        coordinator
            .register_agent(AgentWorker::new(env, AgentConfig::new()))
            .unwrap();
    }

    let interrupt = coordinator.interrupt_handle();
    let trigger = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(100));
        interrupt.trigger();
    });

    let started = Instant::now();
    let result = coordinator.start();
    let elapsed = started.elapsed();
    trigger.join().unwrap();

    // Three agents and the aggregator each get one timeout; none waits out the step.
    assert!(matches!(result, Err(FlareError::Interrupted)));
    assert!(elapsed < Duration::from_millis(100) + timeout * 5 + Duration::from_millis(500));
    assert!(elapsed < step_delay);
    assert!(coordinator
        .readiness_flags()
        .iter()
        .all(|f| f.get() == Readiness::Stopped));
}

#[test]
fn test_interrupt_during_startup_barrier() {
    let timeout = Duration::from_millis(100);
    let run = run_settings().with_shutdown_timeout(timeout);
    let (mut coordinator, recorder) = single_task(run, 2, 2);
    coordinator.register_agent(steps(0, 5, 10)).unwrap();
    let slow = ScriptedEnv::new(1, 5).with_reset_delay(Duration::from_secs(2));
    coordinator
        .register_agent(AgentWorker::new(slow, AgentConfig::new().with_max_steps(10)))
        .unwrap();

    let interrupt = coordinator.interrupt_handle();
    let trigger = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        interrupt.trigger();
    });

    let started = Instant::now();
    let result = coordinator.start();
    trigger.join().unwrap();

    assert!(matches!(result, Err(FlareError::Interrupted)));
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(recorder.predictions(), 0);
    assert!(coordinator.readiness_flags().iter().all(|f| f.is_stopped()));
}

// ============================================================================
// Checkpoints
// ============================================================================

#[test]
fn test_checkpoints_saved_on_cadence() {
    let dir = tempfile::tempdir().unwrap();
    let run = run_settings()
        .with_model_dir(dir.path())
        .with_model_save_interval(2)
        .with_keep_last_n(2);
    let (mut coordinator, recorder) = single_task(run, 1, 1);
    coordinator.register_agent(steps(0, 4, 8)).unwrap();

    let stats = coordinator.start().unwrap();
    assert_eq!(recorder.updates(), 8);
    assert_eq!(stats.save_requests, 4);
    assert_eq!(stats.task("rl").map(|t| t.checkpoints_saved), Some(4));

    let saved: Vec<_> = std::fs::read_dir(dir.path().join("rl"))
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "ckpt"))
        .collect();
    assert!(!saved.is_empty() && saved.len() <= 2);
}

#[test]
fn test_checkpoint_signal_saves_every_task() {
    let dir = tempfile::tempdir().unwrap();
    let run = run_settings()
        .with_model_dir(dir.path())
        .with_model_save_interval(2);
    let mut coordinator = coordinator(run);
    coordinator
        .create_tasks([
            ("act", task(CountingAlgorithm::new(), 1, 1)),
            ("watch", task(CountingAlgorithm::new(), 100, 1)),
        ])
        .unwrap();
    coordinator.register_agent(steps(0, 10, 4)).unwrap();

    let stats = coordinator.start().unwrap();
    assert_eq!(stats.task("act").map(|t| t.updates), Some(4));
    assert_eq!(stats.task("watch").map(|t| t.updates), Some(1));
    assert_eq!(stats.save_requests, 2);

    // Only `act` reached its cadence, yet both tasks were persisted each time.
    assert_eq!(stats.task("act").map(|t| t.checkpoints_saved), Some(2));
    assert_eq!(stats.task("watch").map(|t| t.checkpoints_saved), Some(2));
    assert!(dir.path().join("watch").join("pass-00000.ckpt").exists());
}
