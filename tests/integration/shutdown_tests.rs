//! Failure paths: retries, the overall deadline and the emergency shutdown.

use std::sync::Arc;
use std::thread;
use std::time::Duration as StdDuration;

use embassy_time::{with_timeout, Duration};
use futures_lite::future::block_on;
use wardstock::app::events::DispenseEvent;
use wardstock::app::service::Dispenser;
use wardstock::error::Error;
use wardstock::fsm::Phase;
use wardstock::safety::{self, EmergencyShutdown, ShutdownTimeouts};

use super::mock_transport::{fast_config, MockTransport, RecordingSink};

const SHUTDOWN: [&str; 3] = ["# 1 1 1 50 53", "# 1 1 6 10 18", "# 1 1 3 0 5"];

fn short_timeouts() -> ShutdownTimeouts {
    ShutdownTimeouts {
        lift: Duration::from_millis(100),
        door: Duration::from_millis(100),
    }
}

fn tail(lines: &[String], n: usize) -> &[String] {
    &lines[lines.len().saturating_sub(n)..]
}

#[test]
fn overall_deadline_rests_the_lift() {
    let transport = MockTransport::connected();
    transport.silence_vmc();
    let mut cfg = fast_config();
    cfg.timing.overall_timeout_ms = 600;
    let mut d = Dispenser::new(Arc::new(transport), cfg, RecordingSink::default());

    let report = d.dispense_report(1, 5);

    assert_eq!(report.error, Some(Error::OverallDeadlineExceeded));
    assert_eq!(report.dispensed, 0);

    let lines = d.transport().motion_lines();
    assert_eq!(&lines[..3], &["# 1 1 3 1 6", "# 1 1 5 10 17", "# 1 1 1 1400 1403"]);
    assert_eq!(tail(&lines, 3), &SHUTDOWN);

    let events = &d.sink().events;
    assert!(events.contains(&DispenseEvent::Finished {
        dispensed: 0,
        requested: 1,
        error: Some(Error::OverallDeadlineExceeded)
    }));
    assert!(matches!(
        events.last(),
        Some(DispenseEvent::ShutdownTriggered { .. })
    ));
    assert!(!d.transport().readers_attached());
}

#[test]
fn exhausted_retries_with_lift_raised_rest_the_lift() {
    let transport = MockTransport::connected();
    transport.silence_vmc();
    let mut d = Dispenser::new(Arc::new(transport), fast_config(), RecordingSink::default());

    let report = d.dispense_report(1, 5);

    assert_eq!(report.error, Some(Error::MaxRetriesExceeded));
    // Same frame and sequence on every resend.
    let frames = d.transport().command_frames();
    assert!(frames.len() >= 2);
    assert!(frames.windows(2).all(|w| w[0] == w[1]));
    assert_eq!(d.transport().sequence_value(), 1, "nothing was acked");

    assert_eq!(tail(&d.transport().motion_lines(), 3), &SHUTDOWN);
    assert!(d.sink().events.iter().any(|e| matches!(
        e,
        DispenseEvent::Retry {
            phase: Phase::WaitingForCmdAck,
            ..
        }
    )));
}

#[test]
fn silent_motion_controller_never_raises_the_lift() {
    let transport = MockTransport::connected();
    transport.silence_motion();
    let mut d = Dispenser::new(Arc::new(transport), fast_config(), RecordingSink::default());

    let report = d.dispense_report(1, 5);

    assert_eq!(report.error, Some(Error::MaxRetriesExceeded));
    // Original lock plus three resends, and no shutdown traffic.
    assert_eq!(d.transport().motion_lines(), vec!["# 1 1 3 1 6"; 4]);
    assert!(d.transport().command_frames().is_empty());
    assert!(
        !d.sink()
            .events
            .iter()
            .any(|e| matches!(e, DispenseEvent::ShutdownTriggered { .. }))
    );
}

#[test]
fn door_timeout_resends_then_recovers() {
    let transport = MockTransport::connected();
    // Lock is answered, the first door command is lost.
    transport.answer_motion_times(1);
    let transport = Arc::new(transport);
    let mut d = Dispenser::new(Arc::clone(&transport), fast_config(), RecordingSink::default());

    let restorer = {
        let t = Arc::clone(&transport);
        thread::spawn(move || {
            thread::sleep(StdDuration::from_millis(100));
            t.restore_motion();
        })
    };
    let report = d.dispense_report(1, 5);
    restorer.join().unwrap();

    assert!(report.is_complete(), "{:?}", report);
    let lines = transport.motion_lines();
    assert_eq!(&lines[..3], &["# 1 1 3 1 6", "# 1 1 5 10 17", "# 1 1 5 10 17"]);
    assert!(d.sink().events.contains(&DispenseEvent::Retry {
        phase: Phase::OpeningDoor,
        attempt: 1
    }));
}

#[test]
fn shutdown_sequence_runs_even_without_replies() {
    let transport = MockTransport::connected();
    transport.silence_motion();

    let report = block_on(safety::run(&transport, Phase::LiftingUp, short_timeouts()));

    assert!(!report.skipped);
    assert!(!report.lift_rested);
    assert!(!report.door_closed);
    assert!(report.unlock_sent);
    assert_eq!(transport.motion_lines(), SHUTDOWN);
    assert!(!transport.readers_attached());
}

#[test]
fn shutdown_confirms_each_step() {
    let transport = Arc::new(MockTransport::connected());

    let report =
        EmergencyShutdown::trigger(Arc::clone(&transport), Phase::ClosingDoor, short_timeouts())
            .wait_blocking();

    assert!(report.lift_rested);
    assert!(report.door_closed);
    assert!(report.unlock_sent);
    assert_eq!(transport.motion_lines(), SHUTDOWN);
}

#[test]
fn shutdown_is_skipped_before_the_lift_moves() {
    let transport = MockTransport::connected();

    for phase in [Phase::Ready, Phase::LockingRack, Phase::OpeningDoor] {
        let report = block_on(safety::run(&transport, phase, short_timeouts()));
        assert!(report.skipped);
    }
    assert_eq!(transport.write_count(), 0);
}

#[test]
fn abandoned_dispense_triggers_detached_shutdown() {
    let transport = MockTransport::connected();
    transport.silence_vmc();
    let mut d = Dispenser::new(Arc::new(transport), fast_config(), RecordingSink::default());

    // Give up on the dispense once the lift is up and the VMC is silent.
    let outcome = block_on(with_timeout(
        Duration::from_millis(150),
        d.dispense_async(1, 5),
    ));
    assert!(outcome.is_err());

    thread::sleep(StdDuration::from_millis(300));
    let lines = d.transport().motion_lines();
    assert!(lines.len() >= 6, "{:?}", lines);
    assert_eq!(tail(&lines, 3), &SHUTDOWN);
}
