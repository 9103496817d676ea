//! End-to-end dispense cycles against the scripted controllers.

use std::sync::Arc;

use wardstock::app::events::DispenseEvent;
use wardstock::app::service::Dispenser;
use wardstock::error::Error;
use wardstock::fsm::Phase;

use super::mock_transport::{fast_config, MockTransport, RecordingSink};

const RAISE_SLOT_5: [&str; 3] = ["# 1 1 3 1 6", "# 1 1 5 10 17", "# 1 1 1 1400 1403"];
const LOWER: [&str; 4] = ["# 1 1 1 50 53", "# 1 1 1 -1 2", "# 1 1 6 10 18", "# 1 1 3 0 5"];

fn dispenser(transport: MockTransport) -> Dispenser<MockTransport, RecordingSink> {
    Dispenser::new(Arc::new(transport), fast_config(), RecordingSink::default())
}

#[test]
fn two_units_run_the_full_cycle() {
    let mut d = dispenser(MockTransport::connected());

    let report = d.dispense_report(2, 5);

    assert_eq!(report.requested, 2);
    assert_eq!(report.dispensed, 2);
    assert_eq!(report.error, None);
    assert!(report.is_complete());

    let mut expected: Vec<&str> = RAISE_SLOT_5.to_vec();
    expected.extend(LOWER);
    assert_eq!(d.transport().motion_lines(), expected);

    let frames = d.transport().command_frames();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0][4], 2, "first unit uses the next sequence number");
    assert_eq!(frames[1][4], 3);
    assert_eq!(&frames[0][7..9], &[0x00, 0x05]);
    assert_eq!(d.transport().sequence_value(), 3);
    assert!(d.transport().acks_sent() >= 2, "both status frames are acked");
    assert!(!d.transport().readers_attached());
}

#[test]
fn events_describe_the_cycle() {
    let mut d = dispenser(MockTransport::connected());
    assert!(d.dispense(1, 12));

    let events = &d.sink().events;
    assert_eq!(
        events.first(),
        Some(&DispenseEvent::Started {
            slot: 12,
            quantity: 1,
            floor: 1210
        })
    );
    assert_eq!(
        events.last(),
        Some(&DispenseEvent::Finished {
            dispensed: 1,
            requested: 1,
            error: None
        })
    );
    assert!(events.contains(&DispenseEvent::SequenceCommitted(2)));
    assert!(events.contains(&DispenseEvent::ItemReported {
        index: 0,
        dispensed: true
    }));
    assert!(events.contains(&DispenseEvent::PhaseChanged {
        from: Phase::Finalizing,
        to: Phase::Ready
    }));
    assert!(
        !events
            .iter()
            .any(|e| matches!(e, DispenseEvent::ShutdownTriggered { .. }))
    );
}

#[test]
fn failed_unit_yields_partial_dispense() {
    let transport = MockTransport::connected();
    transport.script_statuses(&[wardstock::protocol::vmc::STATUS_DISPENSED, 0x00]);
    let mut d = dispenser(transport);

    let report = d.dispense_report(2, 5);

    assert_eq!(report.dispensed, 1);
    assert_eq!(
        report.error,
        Some(Error::PartialDispense {
            dispensed: 1,
            requested: 2
        })
    );
    assert!(!report.is_complete());
    // The mechanism still returns to rest normally.
    let lines = d.transport().motion_lines();
    assert_eq!(&lines[lines.len() - 4..], &LOWER);
    assert!(d.sink().events.contains(&DispenseEvent::ItemReported {
        index: 1,
        dispensed: false
    }));
}

#[test]
fn sequence_wraps_after_255() {
    let transport = MockTransport::connected();
    transport.set_sequence(255);
    let mut d = dispenser(transport);

    assert!(d.dispense(1, 40));

    assert_eq!(d.transport().command_frames()[0][4], 1);
    assert_eq!(d.transport().sequence_value(), 1);
    assert_eq!(d.transport().motion_lines()[2], "# 1 1 1 790 793");
}

#[test]
fn invalid_requests_touch_nothing() {
    let mut d = dispenser(MockTransport::connected());

    assert!(matches!(
        d.dispense_report(0, 5).error,
        Some(Error::InvalidRequest(_))
    ));
    assert!(matches!(
        d.dispense_report(1, 0).error,
        Some(Error::InvalidRequest(_))
    ));
    assert!(matches!(
        d.dispense_report(1, 61).error,
        Some(Error::InvalidRequest(_))
    ));
    assert_eq!(d.transport().write_count(), 0);
    assert!(d.sink().events.is_empty());
}

#[test]
fn disconnected_transport_is_rejected() {
    let mut d = dispenser(MockTransport::new());

    let report = d.dispense_report(1, 5);

    assert_eq!(report.error, Some(Error::NotConnected));
    assert_eq!(report.dispensed, 0);
    assert_eq!(d.transport().write_count(), 0);
}

#[test]
fn back_to_back_dispenses_continue_the_sequence() {
    let mut d = dispenser(MockTransport::connected());

    assert!(d.dispense(1, 5));
    assert!(d.dispense(2, 60));

    let seqs: Vec<u8> = d
        .transport()
        .command_frames()
        .iter()
        .map(|f| f[4])
        .collect();
    assert_eq!(seqs, [2, 3, 4]);
    assert!(d.transport().motion_lines().contains(&"# 1 1 1 360 363".to_owned()));
}
