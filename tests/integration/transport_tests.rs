//! `SerialTransport` over pseudo-terminals standing in for the two lines.

use std::io::{Read, Write};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use serialport::{SerialPort, TTYPort};

use wardstock::adapters::serial::SerialTransport;
use wardstock::adapters::storage::FileStorage;
use wardstock::adapters::stty::NoopConfigurator;
use wardstock::app::ports::{Link, Transport};
use wardstock::app::service::{motion_reader, vmc_reader};
use wardstock::protocol::motion::{MotionResponse, REPLY_DOOR_CLOSED, REPLY_RACK_LOCKED};
use wardstock::protocol::vmc::{VmcResponse, POLL};

/// Controller end of one line plus the node the transport opens.
struct Line {
    controller: TTYPort,
    _node: TTYPort,
    path: String,
}

fn line() -> Line {
    let (mut controller, node) = TTYPort::pair().unwrap();
    controller.set_timeout(Duration::from_secs(1)).unwrap();
    let path = node.name().unwrap();
    Line {
        controller,
        _node: node,
        path,
    }
}

struct Rig {
    dir: tempfile::TempDir,
    vmc: Line,
    motion: Line,
}

fn rig() -> Rig {
    Rig {
        dir: tempfile::tempdir().unwrap(),
        vmc: line(),
        motion: line(),
    }
}

fn transport(r: &Rig) -> SerialTransport<NoopConfigurator, FileStorage> {
    let storage = FileStorage::open(r.dir.path().join("state.json")).unwrap();
    SerialTransport::new(&r.vmc.path, &r.motion.path, NoopConfigurator, storage)
}

#[test]
fn reader_delivers_controller_output() {
    let mut r = rig();
    let t = transport(&r);
    assert!(t.connect(57_600, 9_600));

    let (vtx, vrx) = mpsc::channel();
    let (mtx, mrx) = mpsc::channel();
    assert!(t.start_reading(
        Link::Vmc,
        vmc_reader(move |resp, _| vtx.send(resp).unwrap())
    ));
    assert!(t.start_reading(
        Link::Motion,
        motion_reader(move |resp, _| mtx.send(resp).unwrap())
    ));

    r.vmc.controller.write_all(&POLL).unwrap();
    r.motion.controller.write_all(REPLY_RACK_LOCKED).unwrap();

    assert_eq!(
        vrx.recv_timeout(Duration::from_secs(1)).unwrap(),
        VmcResponse::Poll
    );
    assert_eq!(
        mrx.recv_timeout(Duration::from_secs(1)).unwrap(),
        MotionResponse::RackLocked
    );
    t.disconnect();
}

#[test]
fn writes_reach_the_controller() {
    let mut r = rig();
    let t = transport(&r);
    assert!(t.connect(57_600, 9_600));

    assert!(t.write_ascii(Link::Motion, "# 1 1 5 10 17"));
    let mut buf = [0u8; 13];
    r.motion.controller.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"# 1 1 5 10 17");
    t.disconnect();
}

#[test]
fn nothing_is_delivered_after_stop() {
    let mut r = rig();
    let t = transport(&r);
    assert!(t.connect(57_600, 9_600));

    let (tx, rx) = mpsc::channel();
    assert!(t.start_reading(
        Link::Motion,
        motion_reader(move |resp, _| {
            let _ = tx.send(resp);
        })
    ));
    t.stop_reading(Link::Motion);

    r.motion.controller.write_all(REPLY_DOOR_CLOSED).unwrap();
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
}

#[test]
fn stop_returns_while_the_line_is_idle() {
    let r = rig();
    let t = Arc::new(transport(&r));
    assert!(t.connect(57_600, 9_600));
    assert!(t.start_reading(Link::Motion, Box::new(|_: &[u8]| {})));
    // Let the reader block in a read with nothing on the line.
    thread::sleep(Duration::from_millis(50));

    let (done_tx, done_rx) = mpsc::channel();
    let stopper = Arc::clone(&t);
    thread::spawn(move || {
        stopper.stop_reading(Link::Motion);
        stopper.disconnect();
        let _ = done_tx.send(());
    });

    assert!(done_rx.recv_timeout(Duration::from_secs(2)).is_ok());
    assert!(!t.is_connected());
}

#[test]
fn sequence_survives_a_new_transport() {
    let r = rig();
    {
        let t = transport(&r);
        assert_eq!(t.sequence(), 1);
        t.save_sequence(42);
    }
    let t = transport(&r);
    assert_eq!(t.sequence(), 42);
}

#[test]
fn start_reading_requires_connection() {
    let r = rig();
    let t = transport(&r);
    assert!(!t.start_reading(Link::Vmc, Box::new(|_: &[u8]| {})));
    assert!(!t.write_ascii(Link::Motion, "# 1 1 3 1 6"));
}
