use super::*;
use crate::bus::{ControllerCall, RecordingController};
use crate::clock::ManualClock;

const T0: i64 = 1_700_000_000_000;

fn setup(resume: ResumeStrategy) -> (ConsumerBackoffManager, Arc<ManualClock>, Arc<RecordingController>) {
    let clock = Arc::new(ManualClock::new(T0));
    let config = BackoffManagerConfig {
        resume,
        sweep_interval_ms: 10,
    };
    let manager = ConsumerBackoffManager::new(clock.clone(), &config);
    (manager, clock, Arc::new(RecordingController::new()))
}

fn as_controller(controller: &Arc<RecordingController>) -> Arc<dyn PartitionController> {
    controller.clone()
}

fn tp() -> TopicPartition {
    TopicPartition::new("orders-retry-0", 0)
}

#[test]
fn test_due_record_proceeds_without_state() {
    let (manager, _clock, controller) = setup(ResumeStrategy::Sweep);

    let decision = manager
        .maybe_backoff(&as_controller(&controller), &tp(), 5, T0)
        .unwrap();

    assert_eq!(decision, BackoffDecision::Proceed);
    assert_eq!(manager.pending_count(), 0);
    assert!(controller.calls().is_empty());
}

#[test]
fn test_future_record_pauses_and_rewinds() {
    let (manager, _clock, controller) = setup(ResumeStrategy::Sweep);

    let decision = manager
        .maybe_backoff(&as_controller(&controller), &tp(), 5, T0 + 1000)
        .unwrap();

    assert_eq!(decision, BackoffDecision::Paused);
    assert_eq!(
        controller.calls(),
        vec![ControllerCall::Pause(tp()), ControllerCall::Seek(tp(), 5)]
    );
    assert_eq!(
        manager.pending(&tp()),
        Some(BackoffExecution {
            topic_partition: tp(),
            offset: 5,
            due_timestamp: T0 + 1000,
        })
    );
}

#[test]
fn test_sweep_resumes_only_when_due() {
    let (manager, clock, controller) = setup(ResumeStrategy::Sweep);
    manager
        .maybe_backoff(&as_controller(&controller), &tp(), 5, T0 + 1000)
        .unwrap();

    clock.advance(Duration::from_millis(999));
    assert!(manager.sweep().is_empty());
    assert_eq!(controller.resume_count(&tp()), 0);

    clock.advance(Duration::from_millis(1));
    assert_eq!(manager.sweep(), vec![tp()]);
    assert_eq!(controller.resume_count(&tp()), 1);
    assert_eq!(manager.pending_count(), 0);

    // Redelivery of the same offset is now due.
    let decision = manager
        .maybe_backoff(&as_controller(&controller), &tp(), 5, T0 + 1000)
        .unwrap();
    assert_eq!(decision, BackoffDecision::Proceed);
}

#[test]
fn test_later_offset_is_held_behind_pending_one() {
    let (manager, clock, controller) = setup(ResumeStrategy::Sweep);
    manager
        .maybe_backoff(&as_controller(&controller), &tp(), 5, T0 + 1000)
        .unwrap();
    clock.advance(Duration::from_millis(2000));

    // Offset 6 is due, but offset 5 has not been redelivered yet.
    let decision = manager
        .maybe_backoff(&as_controller(&controller), &tp(), 6, T0)
        .unwrap();

    assert_eq!(decision, BackoffDecision::Paused);
    assert_eq!(controller.calls().last(), Some(&ControllerCall::Seek(tp(), 5)));
    assert_eq!(manager.pending(&tp()).map(|p| p.offset), Some(5));
}

#[test]
fn test_partitions_back_off_independently() {
    let (manager, clock, controller) = setup(ResumeStrategy::Sweep);
    let other = TopicPartition::new("orders-retry-0", 1);
    manager
        .maybe_backoff(&as_controller(&controller), &tp(), 5, T0 + 1000)
        .unwrap();

    let decision = manager
        .maybe_backoff(&as_controller(&controller), &other, 9, T0)
        .unwrap();

    assert_eq!(decision, BackoffDecision::Proceed);
    assert_eq!(controller.pause_count(&other), 0);

    clock.advance(Duration::from_millis(1000));
    assert_eq!(manager.sweep(), vec![tp()]);
}

#[test]
fn test_revocation_drops_state_and_resume_is_noop() {
    let (manager, clock, controller) = setup(ResumeStrategy::Sweep);
    manager
        .maybe_backoff(&as_controller(&controller), &tp(), 5, T0 + 1000)
        .unwrap();

    manager.on_partitions_revoked(&[tp()]);
    clock.advance(Duration::from_millis(5000));

    assert!(manager.sweep().is_empty());
    assert_eq!(controller.resume_count(&tp()), 0);
    assert!(manager.pending(&tp()).is_none());
}

#[test]
fn test_early_redelivery_resumes_pending_partition() {
    let (manager, clock, controller) = setup(ResumeStrategy::Sweep);
    manager
        .maybe_backoff(&as_controller(&controller), &tp(), 5, T0 + 1000)
        .unwrap();
    clock.advance(Duration::from_millis(1000));

    let decision = manager
        .maybe_backoff(&as_controller(&controller), &tp(), 5, T0 + 1000)
        .unwrap();

    assert_eq!(decision, BackoffDecision::Proceed);
    assert_eq!(controller.resume_count(&tp()), 1);
    assert_eq!(manager.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timer_resumes_at_due_time() {
    let (manager, clock, controller) = setup(ResumeStrategy::Timer);
    manager
        .maybe_backoff(&as_controller(&controller), &tp(), 5, T0 + 1000)
        .unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;
    clock.advance(Duration::from_millis(500));
    assert_eq!(controller.resume_count(&tp()), 0);

    clock.advance(Duration::from_millis(500));
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(controller.resume_count(&tp()), 1);
    assert_eq!(manager.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stale_timer_does_not_resume_newer_pause() {
    let (manager, clock, controller) = setup(ResumeStrategy::Timer);
    manager
        .maybe_backoff(&as_controller(&controller), &tp(), 5, T0 + 1000)
        .unwrap();
    manager.on_partitions_revoked(&[tp()]);
    // Reassigned and paused again with a later due time.
    manager
        .maybe_backoff(&as_controller(&controller), &tp(), 5, T0 + 3000)
        .unwrap();

    clock.advance(Duration::from_millis(1000));
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(controller.resume_count(&tp()), 0);

    clock.advance(Duration::from_millis(2000));
    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(controller.resume_count(&tp()), 1);
}

#[tokio::test(start_paused = true)]
async fn test_sweeper_task_resumes_and_stops() {
    let (manager, clock, controller) = setup(ResumeStrategy::Sweep);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = manager.spawn_sweeper(Duration::from_millis(10), shutdown_rx);
    manager
        .maybe_backoff(&as_controller(&controller), &tp(), 5, T0 + 1000)
        .unwrap();

    clock.advance(Duration::from_millis(1000));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(controller.resume_count(&tp()), 1);

    shutdown_tx.send(true).unwrap();
    sweeper.await.unwrap();
}

#[test]
fn test_failed_resume_stays_pending_until_sweep_succeeds() {
    let (manager, clock, controller) = setup(ResumeStrategy::Sweep);
    manager
        .maybe_backoff(&as_controller(&controller), &tp(), 5, T0 + 1000)
        .unwrap();
    controller.fail_next_resumes(1);
    clock.advance(Duration::from_millis(1000));

    assert!(manager.sweep().is_empty());
    assert_eq!(manager.pending_count(), 1);
    assert_eq!(controller.resume_count(&tp()), 0);

    assert_eq!(manager.sweep(), vec![tp()]);
    assert_eq!(manager.pending_count(), 0);
    assert_eq!(controller.resume_count(&tp()), 1);
}

#[test]
fn test_failed_resume_on_due_redelivery_keeps_entry() {
    let (manager, clock, controller) = setup(ResumeStrategy::Sweep);
    manager
        .maybe_backoff(&as_controller(&controller), &tp(), 5, T0 + 1000)
        .unwrap();
    controller.fail_next_resumes(1);
    clock.advance(Duration::from_millis(1000));

    let result = manager.maybe_backoff(&as_controller(&controller), &tp(), 5, T0 + 1000);

    assert!(matches!(result, Err(BusError::Consumer(_))));
    assert_eq!(manager.pending_count(), 1);
    assert_eq!(manager.sweep(), vec![tp()]);
}

#[tokio::test(start_paused = true)]
async fn test_timer_retries_failed_resume() {
    let (manager, clock, controller) = setup(ResumeStrategy::Timer);
    controller.fail_next_resumes(2);
    manager
        .maybe_backoff(&as_controller(&controller), &tp(), 5, T0 + 1000)
        .unwrap();

    tokio::time::sleep(Duration::from_millis(10)).await;
    clock.advance(Duration::from_millis(1000));
    tokio::time::sleep(Duration::from_millis(1040)).await;
    assert_eq!(controller.resume_count(&tp()), 0);
    assert_eq!(manager.pending_count(), 1);

    tokio::time::sleep(RESUME_RETRY_DELAY * 2).await;
    assert_eq!(controller.resume_count(&tp()), 1);
    assert_eq!(manager.pending_count(), 0);
}

#[test]
fn test_timer_without_runtime_refuses_to_pause() {
    let (manager, _clock, controller) = setup(ResumeStrategy::Timer);

    let result = manager.maybe_backoff(&as_controller(&controller), &tp(), 5, T0 + 1000);

    assert!(matches!(result, Err(BusError::Consumer(_))));
    assert!(controller.calls().is_empty());
    assert_eq!(manager.pending_count(), 0);
}
